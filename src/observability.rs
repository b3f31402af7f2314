use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol requests. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "tablebook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "tablebook_request_duration_seconds";

// ── Reservation metrics ─────────────────────────────────────────

/// Counter: reservations created. Labels: mode (direct, advisory).
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "tablebook_reservations_committed_total";

/// Counter: commits refused because the table was already taken.
pub const COMMIT_CONFLICTS_TOTAL: &str = "tablebook_commit_conflicts_total";

/// Counter: table selections. Labels: method (advisory, fallback).
pub const SELECTIONS_TOTAL: &str = "tablebook_selections_total";

/// Histogram: advisor round-trip in seconds, including timeouts.
pub const ADVISORY_DURATION_SECONDS: &str = "tablebook_advisory_duration_seconds";

/// Counter: reservation status changes. Labels: to.
pub const STATUS_CHANGES_TOTAL: &str = "tablebook_status_changes_total";

/// Counter: reservations completed by the sweeper.
pub const SWEEP_COMPLETED_TOTAL: &str = "tablebook_sweep_completed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablebook_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(request: &Request) -> &'static str {
    match request {
        Request::AvailableTables { .. } => "available_tables",
        Request::TablesByFloor { .. } => "tables_by_floor",
        Request::TimeSlots { .. } => "time_slots",
        Request::Durations { .. } => "durations",
        Request::Dates { .. } => "dates",
        Request::Reserve { .. } => "reserve",
        Request::Approve { .. } => "approve",
        Request::Reject { .. } => "reject",
        Request::Cancel { .. } => "cancel",
        Request::GetReservation { .. } => "get_reservation",
        Request::CustomerReservations { .. } => "customer_reservations",
        Request::TableReservations { .. } => "table_reservations",
        Request::SelectionRecord { .. } => "selection_record",
        Request::RegisterRestaurant { .. } => "register_restaurant",
        Request::RegisterTable { .. } => "register_table",
        Request::SetTableActive { .. } => "set_table_active",
        Request::Listen { .. } => "listen",
        Request::Unlisten { .. } => "unlisten",
        Request::Ping => "ping",
    }
}
