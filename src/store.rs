use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::{AuditEntry, Event, Order, Reservation, Table, Window};
use crate::observability;

const JOURNAL_QUEUE_DEPTH: usize = 1024;

pub(crate) enum JournalCommand {
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background journal writer. Batches whatever is queued, writes it all,
/// then fsyncs once before answering the waiters (group commit).
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
            if batch.len() >= 256 {
                break;
            }
        }

        let mut waiters: Vec<(oneshot::Sender<io::Result<()>>, io::Result<()>)> = Vec::new();
        let mut appended = 0u64;

        for cmd in batch {
            match cmd {
                JournalCommand::Append { events, response } => {
                    let mut result = Ok(());
                    for event in &events {
                        if let Err(e) = journal.append_buffered(event) {
                            result = Err(e);
                            break;
                        }
                    }
                    appended += events.len() as u64;
                    waiters.push((response, result));
                }
                JournalCommand::Rewrite { events, response } => {
                    let result = journal.rewrite(&events);
                    let _ = response.send(result);
                }
                JournalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(journal.appends_since_compact());
                }
            }
        }

        if waiters.is_empty() {
            continue;
        }

        let flush = journal.flush_sync();
        metrics::counter!(observability::JOURNAL_FLUSHES_TOTAL).increment(1);
        metrics::counter!(observability::JOURNAL_EVENTS_TOTAL).increment(appended);

        for (response, result) in waiters {
            let outcome = match (&flush, result) {
                (Err(e), Ok(())) => Err(io::Error::new(e.kind(), e.to_string())),
                (_, r) => r,
            };
            let _ = response.send(outcome);
        }
    }
}

#[derive(Debug)]
pub enum CommitError {
    /// A read-set table's reservations changed since the read.
    Conflict,
    Journal(String),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Conflict => write!(f, "transaction read set is stale"),
            CommitError::Journal(e) => write!(f, "journal append failed: {e}"),
        }
    }
}

/// In-memory state for one venue, backed by the append-only journal.
///
/// Every table carries a write stamp that is bumped whenever one of its
/// reservations is written. A `Tx` records the stamp of each table it
/// scans; commit re-checks those stamps under the commit gate, so a
/// transaction observes any reservation insert or status change on its
/// candidate tables — including rows that did not exist at read time.
pub struct Store {
    tables: DashMap<Ulid, Table>,
    reservations: DashMap<Ulid, Reservation>,
    orders: DashMap<Ulid, Order>,
    audit_log: StdMutex<Vec<AuditEntry>>,
    stamps: DashMap<Ulid, u64>,
    commit_gate: Mutex<()>,
    journal_tx: mpsc::Sender<JournalCommand>,
}

impl Store {
    /// Open the store, replaying the venue journal into memory and
    /// spawning the background writer task.
    pub fn open(journal_path: &Path) -> io::Result<Self> {
        let events = Journal::replay(journal_path)?;
        let journal = Journal::open(journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(JOURNAL_QUEUE_DEPTH);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let store = Self {
            tables: DashMap::new(),
            reservations: DashMap::new(),
            orders: DashMap::new(),
            audit_log: StdMutex::new(Vec::new()),
            stamps: DashMap::new(),
            commit_gate: Mutex::new(()),
            journal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        Ok(store)
    }

    fn stamp(&self, table_id: &Ulid) -> u64 {
        self.stamps.get(table_id).map(|e| *e.value()).unwrap_or(0)
    }

    fn bump_stamp(&self, table_id: &Ulid) {
        *self.stamps.entry(*table_id).or_insert(0) += 1;
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::TableCreated { table } => {
                self.tables.insert(table.id, table.clone());
            }
            Event::OrderRecorded { order } => {
                self.orders.insert(order.id, order.clone());
            }
            Event::ReservationCommitted { reservation } => {
                self.bump_stamp(&reservation.table_id);
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationStatusChanged { id, status } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    self.bump_stamp(&r.table_id);
                    r.status = *status;
                }
            }
            Event::AuditRecorded { entry } => {
                self.audit_log.lock().unwrap().push(entry.clone());
            }
        }
    }

    pub fn begin(&self) -> Tx<'_> {
        Tx {
            store: self,
            read_stamps: Vec::new(),
            staged: Vec::new(),
        }
    }

    pub fn table(&self, id: &Ulid) -> Option<Table> {
        self.tables.get(id).map(|t| t.clone())
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn list_tables(&self) -> Vec<Table> {
        let mut tables: Vec<Table> = self.tables.iter().map(|t| t.clone()).collect();
        tables.sort_by_key(|t| (t.capacity, t.id));
        tables
    }

    /// Tables whose capacity falls in `[min, max]`, ascending capacity
    /// then id.
    pub fn tables_in_band(&self, min: u32, max: u32) -> Vec<Table> {
        let mut tables: Vec<Table> = self
            .tables
            .iter()
            .filter(|t| t.capacity >= min && t.capacity <= max)
            .map(|t| t.clone())
            .collect();
        tables.sort_by_key(|t| (t.capacity, t.id));
        tables
    }

    pub fn order(&self, id: &Ulid) -> Option<Order> {
        self.orders.get(id).map(|o| o.clone())
    }

    pub fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.clone())
    }

    /// Reservations whose window STARTS inside `scan`, any status.
    pub fn reservations_starting_in(&self, scan: &Window) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|r| r.window.start >= scan.start && r.window.start < scan.end)
            .map(|r| r.clone())
            .collect()
    }

    pub fn list_reservations(&self, range: Option<Window>) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| match &range {
                Some(w) => r.window.start >= w.start && r.window.start <= w.end,
                None => true,
            })
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| (r.window.start, r.id));
        out
    }

    #[cfg(test)]
    pub fn audit_snapshot(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().unwrap().clone()
    }

    pub(crate) async fn journal_append(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, wait) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append { events, response })
            .await
            .map_err(|_| io::Error::other("journal writer task gone"))?;
        wait.await
            .map_err(|_| io::Error::other("journal writer task gone"))?
    }

    pub async fn appends_since_compact(&self) -> io::Result<u64> {
        let (response, wait) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .map_err(|_| io::Error::other("journal writer task gone"))?;
        wait.await
            .map_err(|_| io::Error::other("journal writer task gone"))
    }

    /// Rewrite the journal from live state. Holds the commit gate so the
    /// snapshot cannot interleave with a commit's append+apply.
    pub async fn compact(&self) -> io::Result<()> {
        let _gate = self.commit_gate.lock().await;

        let mut events: Vec<Event> = Vec::new();
        for table in self.list_tables() {
            events.push(Event::TableCreated { table });
        }
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by_key(|o| o.id);
        for order in orders {
            events.push(Event::OrderRecorded { order });
        }
        for reservation in self.list_reservations(None) {
            events.push(Event::ReservationCommitted { reservation });
        }
        for entry in self.audit_log.lock().unwrap().iter() {
            events.push(Event::AuditRecorded { entry: entry.clone() });
        }

        let (response, wait) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Rewrite { events, response })
            .await
            .map_err(|_| io::Error::other("journal writer task gone"))?;
        wait.await
            .map_err(|_| io::Error::other("journal writer task gone"))?
    }
}

/// A transaction: reads pin per-table write stamps, writes are staged
/// events. `commit` validates the stamps under the commit gate, appends
/// the staged events to the journal, then applies them to memory.
/// Dropping a Tx aborts it; nothing was shared before commit.
pub struct Tx<'a> {
    store: &'a Store,
    read_stamps: Vec<(Ulid, u64)>,
    staged: Vec<Event>,
}

impl Tx<'_> {
    /// Candidate scan: tables in the capacity band, each pinned at its
    /// current write stamp.
    pub fn read_candidate_tables(&mut self, min: u32, max: u32) -> Vec<Table> {
        let tables = self.store.tables_in_band(min, max);
        for table in &tables {
            self.read_stamps.push((table.id, self.store.stamp(&table.id)));
        }
        tables
    }

    /// Reservations on the pinned tables starting inside `scan`. Safe
    /// without further pinning: any write to those tables bumps a stamp
    /// recorded by `read_candidate_tables`.
    pub fn read_reservations(&self, table_ids: &HashSet<Ulid>, scan: &Window) -> Vec<Reservation> {
        self.store
            .reservations_starting_in(scan)
            .into_iter()
            .filter(|r| table_ids.contains(&r.table_id))
            .collect()
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub async fn commit(self) -> Result<(), CommitError> {
        let _gate = self.store.commit_gate.lock().await;

        for (table_id, seen) in &self.read_stamps {
            if self.store.stamp(table_id) != *seen {
                return Err(CommitError::Conflict);
            }
        }

        if self.staged.is_empty() {
            return Ok(());
        }

        self.store
            .journal_append(self.staged.clone())
            .await
            .map_err(|e| CommitError::Journal(e.to_string()))?;

        for event in &self.staged {
            self.store.apply(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, ReservationStatus, Source, TableShape};

    fn test_journal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("maitred_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}_{}.journal", Ulid::new()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn table(capacity: u32) -> Table {
        Table {
            id: Ulid::new(),
            capacity,
            shape: TableShape::Rect,
            status: "available".into(),
        }
    }

    fn reservation(table_id: Ulid, start: i64, end: i64) -> Reservation {
        Reservation {
            id: Ulid::new(),
            table_id,
            party_size: 2,
            window: Window::new(start, end),
            status: ReservationStatus::Confirmed,
            contact: Contact {
                name: "Ada".into(),
                phone: "555-0100".into(),
                email: None,
            },
            notes: None,
            source: Source::Web,
            created_at: 0,
            created_by: "guest_web".into(),
        }
    }

    #[tokio::test]
    async fn commit_applies_staged_events() {
        let store = Store::open(&test_journal_path("commit_applies")).unwrap();
        let t = table(4);
        let mut tx = store.begin();
        tx.stage(Event::TableCreated { table: t.clone() });
        tx.commit().await.unwrap();
        assert_eq!(store.table(&t.id).unwrap(), t);
    }

    #[tokio::test]
    async fn stale_read_set_conflicts() {
        let store = Store::open(&test_journal_path("stale_read_set")).unwrap();
        let t = table(4);
        {
            let mut tx = store.begin();
            tx.stage(Event::TableCreated { table: t.clone() });
            tx.commit().await.unwrap();
        }

        let mut first = store.begin();
        let seen = first.read_candidate_tables(2, 4);
        assert_eq!(seen.len(), 1);
        first.stage(Event::ReservationCommitted {
            reservation: reservation(t.id, 1_000, 2_000),
        });

        // A concurrent booking lands on the same table first.
        let mut second = store.begin();
        second.read_candidate_tables(2, 4);
        second.stage(Event::ReservationCommitted {
            reservation: reservation(t.id, 1_500, 2_500),
        });
        second.commit().await.unwrap();

        match first.commit().await {
            Err(CommitError::Conflict) => {}
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_change_invalidates_readers() {
        let store = Store::open(&test_journal_path("status_invalidates")).unwrap();
        let t = table(2);
        let r = reservation(t.id, 1_000, 2_000);
        {
            let mut tx = store.begin();
            tx.stage(Event::TableCreated { table: t.clone() });
            tx.stage(Event::ReservationCommitted { reservation: r.clone() });
            tx.commit().await.unwrap();
        }

        let mut reader = store.begin();
        reader.read_candidate_tables(2, 4);
        reader.stage(Event::ReservationCommitted {
            reservation: reservation(t.id, 3_000, 4_000),
        });

        {
            let mut tx = store.begin();
            tx.stage(Event::ReservationStatusChanged {
                id: r.id,
                status: ReservationStatus::Cancelled,
            });
            tx.commit().await.unwrap();
        }

        assert!(matches!(reader.commit().await, Err(CommitError::Conflict)));
    }

    #[tokio::test]
    async fn empty_read_set_commit_is_unconditional() {
        let store = Store::open(&test_journal_path("empty_read_set")).unwrap();
        let t = table(4);
        {
            let mut tx = store.begin();
            tx.stage(Event::TableCreated { table: t.clone() });
            tx.commit().await.unwrap();
        }
        // Audit appends carry no read set and must never conflict.
        let mut tx = store.begin();
        tx.stage(Event::AuditRecorded {
            entry: AuditEntry {
                actor_id: "staff:amelie".into(),
                action: crate::model::AuditAction::ReservationCreated,
                target: "reservations/x".into(),
                metadata: serde_json::json!({}),
                at: 0,
            },
        });
        tx.commit().await.unwrap();
        assert_eq!(store.audit_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn replay_restores_state() {
        let path = test_journal_path("replay_restores");
        let t = table(4);
        let r = reservation(t.id, 1_000, 2_000);
        {
            let store = Store::open(&path).unwrap();
            let mut tx = store.begin();
            tx.stage(Event::TableCreated { table: t.clone() });
            tx.stage(Event::ReservationCommitted { reservation: r.clone() });
            tx.commit().await.unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.table(&t.id).unwrap(), t);
        assert_eq!(reopened.reservation(&r.id).unwrap(), r);
    }

    #[tokio::test]
    async fn compact_preserves_state() {
        let path = test_journal_path("compact_preserves");
        let t = table(4);
        let r = reservation(t.id, 1_000, 2_000);
        {
            let store = Store::open(&path).unwrap();
            let mut tx = store.begin();
            tx.stage(Event::TableCreated { table: t.clone() });
            tx.stage(Event::ReservationCommitted { reservation: r.clone() });
            tx.commit().await.unwrap();

            let mut tx = store.begin();
            tx.stage(Event::ReservationStatusChanged {
                id: r.id,
                status: ReservationStatus::Seated,
            });
            tx.commit().await.unwrap();

            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await.unwrap(), 0);
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(
            reopened.reservation(&r.id).unwrap().status,
            ReservationStatus::Seated
        );
        assert_eq!(reopened.table(&t.id).unwrap(), t);
    }
}
