use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Integer minor-currency units (cents) — the only money type.
pub type Cents = i64;

/// Half-open interval `[start, end)` a table is held for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap: touching endpoints do not conflict.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableShape {
    Round,
    Rect,
}

impl TableShape {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "round" => Some(Self::Round),
            "rect" | "rectangle" => Some(Self::Rect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Rect => "rect",
        }
    }
}

/// A bookable table. `status` is display-only floor-plan state; the
/// booking path never consults it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub capacity: u32,
    pub shape: TableShape,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Active reservations hold their table. Cancelled, completed and
    /// no-show windows are kept for the record but free the slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Seated)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "seated" => Some(Self::Seated),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no-show" | "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Seated => "seated",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no-show",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Web,
    Phone,
    WalkIn,
}

impl Source {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Some(Self::Web),
            "phone" => Some(Self::Phone),
            "walk-in" | "walk_in" | "walkin" => Some(Self::WalkIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Phone => "phone",
            Self::WalkIn => "walk-in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub table_id: Ulid,
    pub party_size: u32,
    pub window: Window,
    pub status: ReservationStatus,
    pub contact: Contact,
    pub notes: Option<String>,
    pub source: Source,
    pub created_at: Ms,
    pub created_by: String,
}

/// Subtotal snapshot owned by the POS collaborator. Line items stay
/// with the POS; nothing here is derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Ulid,
    pub table_id: Ulid,
    pub subtotal: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    ReservationCreated,
    ReservationStatusChanged,
    ChargeCreated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationCreated => "reservation.created",
            Self::ReservationStatusChanged => "reservation.status_changed",
            Self::ChargeCreated => "charge.created",
        }
    }
}

/// Append-only; never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: AuditAction,
    pub target: String,
    pub metadata: serde_json::Value,
    pub at: Ms,
}

/// The event types — flat, no nesting. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TableCreated { table: Table },
    OrderRecorded { order: Order },
    ReservationCommitted { reservation: Reservation },
    ReservationStatusChanged { id: Ulid, status: ReservationStatus },
    AuditRecorded { entry: AuditEntry },
}
