use std::collections::HashSet;

use ulid::Ulid;

use crate::engine::error::EngineError;
use crate::engine::{Engine, overlap};
use crate::limits;
use crate::model::{Ms, Window};

pub const NO_CAPACITY_MATCH: &str = "no capacity match";
pub const FULLY_BOOKED: &str = "fully booked for slot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub start: Ms,
    pub party_size: i64,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityOutcome {
    pub available: bool,
    /// Free candidate tables, ascending capacity then id.
    pub free_tables: Vec<Ulid>,
    pub window: Window,
    pub reason: Option<&'static str>,
}

/// Shared validation for availability checks and bookings. Returns the
/// requested window and the party size.
pub(crate) fn validate_request(
    start: Ms,
    party_size: i64,
    duration_minutes: Option<i64>,
) -> Result<(Window, u32), EngineError> {
    if !(limits::MIN_VALID_TIMESTAMP_MS..=limits::MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(EngineError::InvalidArgument(format!(
            "start timestamp out of range: {start}"
        )));
    }
    if party_size <= 0 {
        return Err(EngineError::InvalidArgument(format!(
            "party_size must be positive, got {party_size}"
        )));
    }
    if party_size > limits::MAX_PARTY_SIZE {
        return Err(EngineError::InvalidArgument(format!(
            "party_size exceeds maximum {}",
            limits::MAX_PARTY_SIZE
        )));
    }
    let minutes = duration_minutes.unwrap_or(limits::DEFAULT_DURATION_MIN);
    if minutes <= 0 {
        return Err(EngineError::InvalidArgument(format!(
            "duration_minutes must be positive, got {minutes}"
        )));
    }
    let duration_ms = minutes * 60_000;
    if duration_ms > limits::MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::InvalidArgument(format!(
            "duration exceeds maximum {} minutes",
            limits::MAX_RESERVATION_DURATION_MS / 60_000
        )));
    }
    Ok((Window::new(start, start + duration_ms), party_size as u32))
}

/// Conflict scan window for a requested window: the venue-local calendar
/// day of the start, widened left by the maximum reservation duration
/// (to catch windows spanning midnight into the day) and right to the
/// requested end (to catch starts after the day boundary).
pub(crate) fn conflict_scan_window(window: &Window, utc_offset_minutes: i32) -> Window {
    let offset = utc_offset_minutes as Ms * 60_000;
    let local_start = window.start + offset;
    let day_start = local_start.div_euclid(limits::DAY_MS) * limits::DAY_MS - offset;
    let day_end = day_start + limits::DAY_MS;
    Window::new(
        day_start - limits::MAX_RESERVATION_DURATION_MS,
        day_end.max(window.end),
    )
}

impl Engine {
    /// Advisory availability check: runs outside any transaction, so the
    /// answer can be stale by the time a booking is attempted.
    pub fn check_availability(
        &self,
        req: &AvailabilityRequest,
    ) -> Result<AvailabilityOutcome, EngineError> {
        let (window, party) = validate_request(req.start, req.party_size, req.duration_minutes)?;

        let candidates = self
            .store
            .tables_in_band(party, party + limits::CAPACITY_HEADROOM);
        if candidates.is_empty() {
            return Ok(AvailabilityOutcome {
                available: false,
                free_tables: Vec::new(),
                window,
                reason: Some(NO_CAPACITY_MATCH),
            });
        }

        let candidate_ids: HashSet<Ulid> = candidates.iter().map(|t| t.id).collect();
        let scan = conflict_scan_window(&window, self.config.utc_offset_minutes);
        let existing = self.store.reservations_starting_in(&scan);
        let busy = overlap::busy_tables(&window, existing.iter(), &candidate_ids);

        // candidates are already sorted ascending capacity then id
        let free_tables: Vec<Ulid> = candidates
            .iter()
            .filter(|t| !busy.contains(&t.id))
            .map(|t| t.id)
            .collect();

        if free_tables.is_empty() {
            return Ok(AvailabilityOutcome {
                available: false,
                free_tables,
                window,
                reason: Some(FULLY_BOOKED),
            });
        }
        Ok(AvailabilityOutcome {
            available: true,
            free_tables,
            window,
            reason: None,
        })
    }
}
