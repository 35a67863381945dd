use std::collections::HashSet;

use ulid::Ulid;

use crate::model::{Reservation, Window};

/// Table ids from `candidates` that have an active reservation
/// overlapping `requested`. Pure; callers restrict `existing` to
/// whatever scan window they trust.
///
/// Overlap is half-open: `existing.start < requested.end` and
/// `existing.end > requested.start`. Touching endpoints never conflict,
/// so back-to-back seatings share a boundary instant.
pub fn busy_tables<'a, I>(
    requested: &Window,
    existing: I,
    candidates: &HashSet<Ulid>,
) -> HashSet<Ulid>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing
        .into_iter()
        .filter(|r| r.status.is_active())
        .filter(|r| candidates.contains(&r.table_id))
        .filter(|r| r.window.overlaps(requested))
        .map(|r| r.table_id)
        .collect()
}
