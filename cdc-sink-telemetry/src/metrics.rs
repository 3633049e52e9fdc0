use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::{sync::Mutex, time::Duration};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port of the standalone metrics endpoint started by [`init_metrics`].
pub const METRICS_PORT: u16 = 9000;

/// Interval between two upkeep runs of the cached recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// Global cache for the Prometheus handle used by [`init_metrics_handle`].
//
// A [`Mutex`] is used instead of a `OnceLock` because the initialization is fallible and
// `OnceLock::get_or_try_init` is unstable. The recorder is global and can only be installed once,
// while tests call [`init_metrics_handle`] many times.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder once and returns a handle for rendering.
///
/// Use this when metrics are exposed through an existing HTTP surface. Subsequent calls return
/// clones of the cached handle. Must be called from within a tokio runtime, since the first call
/// spawns the upkeep task.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let handle_clone = handle.clone();

    // Periodic upkeep keeps histogram buckets from growing without bound.
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            handle_clone.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the Prometheus recorder with an HTTP listener on `[::]:9000/metrics`.
///
/// Every metric carries the `component` global label when one is given.
pub fn init_metrics(component: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(SocketAddr::new(
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        METRICS_PORT,
    ));

    if let Some(component) = component {
        builder = builder.add_global_label("component", component);
    }

    builder.install()?;

    Ok(())
}
