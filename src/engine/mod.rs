pub mod availability;
pub mod booking;
pub mod charge;
pub mod error;
pub mod overlap;
pub mod tax;


use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditRecorder, AuditSink, JournalAuditSink};
use crate::gateway::PaymentGateway;
use crate::limits;
use crate::model::{
    AuditAction, AuditEntry, Event, Ms, Order, Reservation, ReservationStatus, Table, TableShape,
    Window,
};
use crate::notify::{NotifyHub, RESERVATIONS_CHANNEL};
use crate::store::{CommitError, Store};

use error::EngineError;

/// Per-venue settings resolved at startup.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    /// Fixed UTC offset of the venue clock, used for day-bucketing
    /// conflict scans. Default is UTC-5 (Montréal standard time).
    pub utc_offset_minutes: i32,
    pub currency: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -300,
            currency: "cad".into(),
        }
    }
}

/// One venue's reservation and charge engine. Cheap to share; all
/// methods take `&self`.
pub struct Engine {
    pub(crate) store: Arc<Store>,
    pub(crate) recorder: AuditRecorder,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub notify: Arc<NotifyHub>,
    pub(crate) config: VenueConfig,
}

impl Engine {
    /// Open the engine for a venue, replaying its journal.
    pub fn new(
        journal_path: &Path,
        notify: Arc<NotifyHub>,
        gateway: Arc<dyn PaymentGateway>,
        config: VenueConfig,
    ) -> io::Result<Self> {
        let store = Arc::new(Store::open(journal_path)?);
        let recorder = AuditRecorder::new(Arc::new(JournalAuditSink::new(store.clone())));
        Ok(Self {
            store,
            recorder,
            gateway,
            notify,
            config,
        })
    }

    /// Replace the audit sink. Test hook.
    #[cfg(test)]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.recorder = AuditRecorder::new(sink);
        self
    }

    pub(crate) fn now_ms() -> Ms {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Ms
    }

    /// Staff-only operations reject the anonymous guest identity.
    fn require_staff<'a>(&self, caller: Option<&'a str>) -> Result<&'a str, EngineError> {
        caller.ok_or_else(|| {
            EngineError::PermissionDenied("staff credentials required".into())
        })
    }

    fn commit_err(e: CommitError) -> EngineError {
        match e {
            // Only read-set transactions can conflict; plain writes retry
            // at the caller.
            CommitError::Conflict => EngineError::Aborted("write conflicted, retry".into()),
            CommitError::Journal(msg) => EngineError::Internal(msg),
        }
    }

    /// Floor-plan boundary: register a table.
    pub async fn create_table(
        &self,
        caller: Option<&str>,
        id: Ulid,
        capacity: i64,
        shape: TableShape,
        status: Option<String>,
    ) -> Result<(), EngineError> {
        self.require_staff(caller)?;
        if capacity <= 0 || capacity > i64::from(u32::MAX) {
            return Err(EngineError::InvalidArgument(format!(
                "capacity must be positive, got {capacity}"
            )));
        }
        if self.store.table(&id).is_some() {
            return Err(EngineError::FailedPrecondition(format!(
                "table {id} already exists"
            )));
        }
        if self.store.table_count() >= limits::MAX_TABLES_PER_VENUE {
            return Err(EngineError::ResourceExhausted(format!(
                "venue table limit {} reached",
                limits::MAX_TABLES_PER_VENUE
            )));
        }
        let table = Table {
            id,
            capacity: capacity as u32,
            shape,
            status: status.unwrap_or_else(|| "available".into()),
        };
        let mut tx = self.store.begin();
        tx.stage(Event::TableCreated { table });
        tx.commit().await.map_err(Self::commit_err)?;
        info!(table_id = %id, capacity, "table created");
        Ok(())
    }

    /// POS boundary: snapshot an order subtotal so charges can be issued
    /// against it.
    pub async fn record_order(
        &self,
        caller: Option<&str>,
        id: Ulid,
        table_id: Ulid,
        subtotal: i64,
    ) -> Result<(), EngineError> {
        self.require_staff(caller)?;
        if subtotal < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "subtotal must be non-negative, got {subtotal}"
            )));
        }
        if self.store.table(&table_id).is_none() {
            return Err(EngineError::NotFound(format!("table {table_id}")));
        }
        if self.store.order(&id).is_some() {
            return Err(EngineError::FailedPrecondition(format!(
                "order {id} already recorded"
            )));
        }
        let mut tx = self.store.begin();
        tx.stage(Event::OrderRecorded {
            order: Order {
                id,
                table_id,
                subtotal,
            },
        });
        tx.commit().await.map_err(Self::commit_err)?;
        Ok(())
    }

    /// Front-of-house flow: seat, complete, cancel or no-show a
    /// reservation. Cancelled and no-show free the slot immediately.
    pub async fn set_reservation_status(
        &self,
        caller: Option<&str>,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<(), EngineError> {
        let actor = self.require_staff(caller)?;
        let Some(reservation) = self.store.reservation(&id) else {
            return Err(EngineError::NotFound(format!("reservation {id}")));
        };

        let event = Event::ReservationStatusChanged { id, status };
        let mut tx = self.store.begin();
        tx.stage(event.clone());
        tx.commit().await.map_err(Self::commit_err)?;

        self.recorder
            .record(AuditEntry {
                actor_id: actor.to_string(),
                action: AuditAction::ReservationStatusChanged,
                target: format!("reservations/{id}"),
                metadata: serde_json::json!({
                    "from": reservation.status.as_str(),
                    "to": status.as_str(),
                }),
                at: Self::now_ms(),
            })
            .await;
        self.notify.send(RESERVATIONS_CHANNEL, &event);
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<Table> {
        self.store.list_tables()
    }

    pub fn list_reservations(&self, range: Option<Window>) -> Vec<Reservation> {
        self.store.list_reservations(range)
    }

    pub async fn journal_appends_since_compact(&self) -> io::Result<u64> {
        self.store.appends_since_compact().await
    }

    pub async fn compact_journal(&self) -> io::Result<()> {
        self.store.compact().await
    }
}
