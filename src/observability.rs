use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: committed writes. Labels: op.
pub const WRITES_TOTAL: &str = "rota_writes_total";

/// Counter: responsibility chains resolved.
pub const RESOLUTIONS_TOTAL: &str = "rota_resolutions_total";

/// Histogram: chain resolution latency in seconds.
pub const RESOLUTION_DURATION_SECONDS: &str = "rota_resolution_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: schedules repaired by conflict resolution. Labels: action.
pub const CONFLICT_REPAIRS_TOTAL: &str = "rota_conflict_repairs_total";

/// Counter: records permanently removed by retention. Labels: entity.
pub const PURGED_TOTAL: &str = "rota_purged_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rota_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rota_wal_flush_batch_size";

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
