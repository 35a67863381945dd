use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::model::{AuditEntry, Event};
use crate::store::Store;

#[derive(Debug)]
pub enum AuditError {
    Sink(String),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::Sink(msg) => write!(f, "audit sink: {msg}"),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Default sink: appends the entry to the venue journal through an
/// empty-read-set transaction, so it survives restarts with the rest of
/// the state.
pub struct JournalAuditSink {
    store: Arc<Store>,
}

impl JournalAuditSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for JournalAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut tx = self.store.begin();
        tx.stage(Event::AuditRecorded { entry });
        tx.commit().await.map_err(|e| AuditError::Sink(e.to_string()))
    }
}

/// Best-effort recorder: sink failures are logged at warn and swallowed.
/// The primary operation has already committed by the time this runs and
/// must never be failed or rolled back by bookkeeping.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let action = entry.action;
        let target = entry.target.clone();
        if let Err(e) = self.sink.append(entry).await {
            warn!(action = action.as_str(), %target, "audit append failed: {e}");
        }
    }
}
