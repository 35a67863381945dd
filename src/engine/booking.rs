use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::availability::{FULLY_BOOKED, NO_CAPACITY_MATCH, conflict_scan_window, validate_request};
use crate::engine::error::EngineError;
use crate::engine::{Engine, overlap};
use crate::limits;
use crate::model::{
    AuditAction, AuditEntry, Contact, Event, Ms, Reservation, ReservationStatus, Source,
};
use crate::observability;
use crate::store::CommitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: Option<String>,
    pub start: Ms,
    pub party_size: i64,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
    pub source: Option<Source>,
    /// Caller identity; `None` books as the anonymous web guest.
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingOutcome {
    pub reservation_id: Ulid,
    pub table_id: Ulid,
}

fn validate_contact(req: &ReservationRequest) -> Result<Contact, EngineError> {
    let name = req.contact_name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidArgument("contact name required".into()));
    }
    if name.len() > limits::MAX_CONTACT_NAME_LEN {
        return Err(EngineError::InvalidArgument("contact name too long".into()));
    }
    let phone = req.contact_phone.trim();
    if phone.is_empty() {
        return Err(EngineError::InvalidArgument("contact phone required".into()));
    }
    if phone.len() > limits::MAX_CONTACT_PHONE_LEN {
        return Err(EngineError::InvalidArgument("contact phone too long".into()));
    }
    if let Some(email) = &req.contact_email
        && email.len() > limits::MAX_CONTACT_EMAIL_LEN
    {
        return Err(EngineError::InvalidArgument("contact email too long".into()));
    }
    if let Some(notes) = &req.notes
        && notes.len() > limits::MAX_NOTES_LEN
    {
        return Err(EngineError::InvalidArgument("notes too long".into()));
    }
    Ok(Contact {
        name: name.to_string(),
        phone: phone.to_string(),
        email: req.contact_email.clone(),
    })
}

impl Engine {
    /// Book a table. One atomic transaction per attempt: candidates and
    /// the busy set are recomputed inside the transaction, commit
    /// validates the read set, and a stale read set is retried with
    /// jittered backoff before surfacing Aborted. Of two concurrent
    /// overlapping requests for the same table, at most one commits.
    pub async fn create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<BookingOutcome, EngineError> {
        let contact = validate_contact(req)?;
        let (window, party) = validate_request(req.start, req.party_size, req.duration_minutes)?;
        let scan = conflict_scan_window(&window, self.config.utc_offset_minutes);
        let created_by = req
            .created_by
            .clone()
            .unwrap_or_else(|| "guest_web".to_string());

        let deadline = Instant::now() + Duration::from_millis(limits::BOOKING_RETRY_BUDGET_MS);

        for attempt in 0..=limits::BOOKING_RETRIES {
            let mut tx = self.store.begin();
            let candidates =
                tx.read_candidate_tables(party, party + limits::CAPACITY_HEADROOM);
            if candidates.is_empty() {
                return Err(EngineError::FailedPrecondition(NO_CAPACITY_MATCH.into()));
            }

            let candidate_ids: HashSet<Ulid> = candidates.iter().map(|t| t.id).collect();
            let existing = tx.read_reservations(&candidate_ids, &scan);
            let busy = overlap::busy_tables(&window, existing.iter(), &candidate_ids);

            // candidates arrive sorted ascending capacity then id; the
            // first free one is the deterministic assignment
            let Some(assigned) = candidates.iter().find(|t| !busy.contains(&t.id)) else {
                return Err(EngineError::ResourceExhausted(FULLY_BOOKED.into()));
            };

            let reservation = Reservation {
                id: Ulid::new(),
                table_id: assigned.id,
                party_size: party,
                window,
                status: ReservationStatus::Confirmed,
                contact: contact.clone(),
                notes: req.notes.clone(),
                source: req.source.unwrap_or(Source::Web),
                created_at: Self::now_ms(),
                created_by: created_by.clone(),
            };
            let event = Event::ReservationCommitted {
                reservation: reservation.clone(),
            };
            tx.stage(event.clone());

            match tx.commit().await {
                Ok(()) => {
                    metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
                    info!(
                        reservation_id = %reservation.id,
                        table_id = %reservation.table_id,
                        party_size = party,
                        "reservation confirmed"
                    );
                    self.recorder
                        .record(AuditEntry {
                            actor_id: created_by,
                            action: AuditAction::ReservationCreated,
                            target: format!("reservations/{}", reservation.id),
                            metadata: serde_json::json!({
                                "table_id": reservation.table_id.to_string(),
                                "party_size": party,
                                "start": window.start,
                                "end": window.end,
                            }),
                            at: Self::now_ms(),
                        })
                        .await;
                    self.notify.send(crate::notify::RESERVATIONS_CHANNEL, &event);
                    return Ok(BookingOutcome {
                        reservation_id: reservation.id,
                        table_id: reservation.table_id,
                    });
                }
                Err(CommitError::Conflict) => {
                    metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                    debug!(attempt, "booking commit conflicted");
                    if attempt == limits::BOOKING_RETRIES || Instant::now() >= deadline {
                        break;
                    }
                    let backoff = limits::BOOKING_BACKOFF_BASE_MS << attempt;
                    let jitter =
                        rand::thread_rng().gen_range(0..=limits::BOOKING_BACKOFF_JITTER_MS);
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                }
                Err(CommitError::Journal(msg)) => {
                    return Err(EngineError::Internal(format!("journal append: {msg}")));
                }
            }
        }

        Err(EngineError::Aborted(
            "booking retry budget exhausted under contention".into(),
        ))
    }
}
