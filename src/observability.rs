use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "maitred_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "maitred_query_duration_seconds";

/// Counter: bookings committed.
pub const BOOKINGS_TOTAL: &str = "maitred_bookings_total";

/// Counter: booking commit attempts aborted by read-set conflicts.
pub const BOOKING_CONFLICTS_TOTAL: &str = "maitred_booking_conflicts_total";

/// Counter: payment charges issued.
pub const CHARGES_TOTAL: &str = "maitred_charges_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "maitred_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "maitred_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "maitred_connections_rejected_total";

/// Gauge: number of active venues (loaded engines).
pub const VENUES_ACTIVE: &str = "maitred_venues_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "maitred_auth_failures_total";

/// Counter: journal group-commit flushes.
pub const JOURNAL_FLUSHES_TOTAL: &str = "maitred_journal_flushes_total";

/// Counter: events appended to venue journals.
pub const JOURNAL_EVENTS_TOTAL: &str = "maitred_journal_events_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTable { .. } => "insert_table",
        Command::InsertOrder { .. } => "insert_order",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertCharge { .. } => "insert_charge",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectTables => "select_tables",
        Command::SelectReservations { .. } => "select_reservations",
        Command::Listen { .. } => "listen",
    }
}
