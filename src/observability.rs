use std::net::SocketAddr;

use crate::model::TransitionAction;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total slot queries served.
pub const SLOT_QUERIES_TOTAL: &str = "slotwise_slot_queries_total";

/// Histogram: slot query latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "slotwise_slot_query_duration_seconds";

/// Counter: total bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotwise_bookings_created_total";

/// Counter: total lifecycle transitions applied. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "slotwise_transitions_total";

/// Counter: transitions rejected because the slot was taken.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "slotwise_scheduling_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

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

/// Install a line-oriented tracing subscriber.
/// No-op when a global subscriber is already set (tests).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Map a TransitionAction to a short label for metrics.
pub fn action_label(action: TransitionAction) -> &'static str {
    match action {
        TransitionAction::Create => "create",
        TransitionAction::ProposeTime => "propose_time",
        TransitionAction::CounterPropose => "counter_propose",
        TransitionAction::Approve => "approve",
        TransitionAction::Decline => "decline",
        TransitionAction::Complete => "complete",
        TransitionAction::Cancel => "cancel",
        TransitionAction::Reactivate => "reactivate",
    }
}
