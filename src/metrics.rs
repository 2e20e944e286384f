use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const RUNS_TOTAL: &str = "matching_runs_total";
pub const RUNS_REJECTED: &str = "matching_runs_rejected";
pub const MATCHES_TOTAL: &str = "matches_total";
pub const TRADES_EXCLUDED: &str = "trades_excluded_total";
pub const OPEN_LEFTOVERS: &str = "open_leftovers";
pub const RUN_SECONDS: &str = "matching_run_seconds";

/// Install the Prometheus recorder and register all ledger metrics.
///
/// With `listen` set, a scrape endpoint is served on that address; it must be
/// called from inside the tokio runtime.
pub fn init_metrics(listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let builder = PrometheusBuilder::new();
    match listen {
        Some(addr) => builder.with_http_listener(addr).install()?,
        None => {
            builder.install_recorder()?;
        }
    }

    // Pre-register counters so they appear even before the first increment.
    counter!(RUNS_TOTAL).absolute(0);
    counter!(RUNS_REJECTED).absolute(0);
    counter!(MATCHES_TOTAL).absolute(0);
    counter!(TRADES_EXCLUDED).absolute(0);

    gauge!(OPEN_LEFTOVERS).set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!(RUN_SECONDS).record(0.0);

    Ok(())
}
