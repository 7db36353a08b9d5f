use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed over the wire. Labels: command, status.
pub const QUERIES_TOTAL: &str = "vacancy_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "vacancy_query_duration_seconds";

/// Counter: availability resolutions. Labels: strategy, status.
pub const RESOLVE_TOTAL: &str = "vacancy_resolve_total";

/// Histogram: availability resolution latency in seconds. Labels: strategy.
pub const RESOLVE_DURATION_SECONDS: &str = "vacancy_resolve_duration_seconds";

/// Histogram: listings returned per resolution. Labels: strategy.
pub const RESOLVE_RESULT_SIZE: &str = "vacancy_resolve_result_size";

/// Histogram: candidate listings after the join strategy's period step.
pub const JOIN_CANDIDATES: &str = "vacancy_join_candidates";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vacancy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vacancy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vacancy_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vacancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vacancy_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "vacancy_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertListing { .. } => "insert_listing",
        Command::DeleteListing { .. } => "delete_listing",
        Command::InsertPeriod { .. } => "insert_period",
        Command::DeletePeriod { .. } => "delete_period",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectListings => "select_listings",
        Command::SelectPeriods { .. } => "select_periods",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailableListings { .. } => "select_available_listings",
    }
}
