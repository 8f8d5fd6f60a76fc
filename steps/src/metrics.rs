//! Checks against a node's Prometheus metrics.

use crate::common::check;
use std::time::Duration;
use tracing::debug;
use waku_interop_node::{Error, Metrics, Node};
use waku_interop_utils::Retry;

/// Default budget for a metric to reach its expected value.
pub const METRIC_TIMEOUT: Duration = Duration::from_secs(90);

const METRIC_POLL: Retry = Retry::secs(90, 1000);

/// Compare metric `name` in `metrics` with `expected`.
///
/// `name` matches the first sample whose key starts with it, so labels may be
/// left off.
pub fn check_metric_value(metrics: &Metrics, name: &str, expected: f64) -> Result<(), Error> {
    let actual = metrics
        .get(name)
        .ok_or_else(|| Error::Assertion(format!("Metric '{name}' not found")))?;
    debug!(name, actual, "found metric");
    check(actual == expected, || {
        format!("Expected value for '{name}' is {expected}, but got {actual}")
    })
}

/// Fetch `node`'s metrics and check `name` equals `expected`.
pub async fn check_metric(node: &Node, name: &str, expected: f64) -> Result<(), Error> {
    debug!(name, expected, "checking metric");
    let metrics = node.metrics().await?;
    check_metric_value(&metrics, name, expected)
}

/// Poll every second until `name` equals `expected` or `timeout` (default 90 s)
/// passes. Unsupported variants fail at once.
pub async fn wait_for_metric(
    node: &Node,
    name: &str,
    expected: f64,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    METRIC_POLL
        .with_timeout(timeout.unwrap_or(METRIC_TIMEOUT))
        .run_if(|| check_metric(node, name, expected), |err| !err.is_setup())
        .await
}
