use crate::model::Ms;

pub const MAX_VENUES: usize = 64;
pub const MAX_VENUE_NAME_LEN: usize = 64;
pub const MAX_TABLES_PER_VENUE: usize = 512;

pub const MAX_PARTY_SIZE: i64 = 64;
/// Largest table a party may be seated at: party_size + headroom.
pub const CAPACITY_HEADROOM: u32 = 2;

pub const DEFAULT_DURATION_MIN: i64 = 90;
pub const MAX_RESERVATION_DURATION_MS: Ms = 6 * 60 * 60 * 1000;
pub const DAY_MS: Ms = 24 * 60 * 60 * 1000;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z. Anything past this is a caller bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_CONTACT_NAME_LEN: usize = 128;
pub const MAX_CONTACT_PHONE_LEN: usize = 32;
pub const MAX_CONTACT_EMAIL_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 512;

/// Retries after the initial booking attempt.
pub const BOOKING_RETRIES: u32 = 3;
pub const BOOKING_RETRY_BUDGET_MS: u64 = 5_000;
pub const BOOKING_BACKOFF_BASE_MS: u64 = 25;
pub const BOOKING_BACKOFF_JITTER_MS: u64 = 25;
