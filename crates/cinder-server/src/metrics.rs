//! Prometheus metrics.
//!
//! When metrics are enabled, installs a prometheus recorder and the
//! router serves its rendering at `/metrics`. The hot path records
//! through the `metrics` crate's global recorder; with no recorder
//! installed those calls are no-ops.

use std::time::Duration;

use cinder_core::registry::STORE_COMMANDS;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Verbs the websocket layer handles itself.
const SERVER_COMMANDS: &[&str] = &["ABORT", "QUNWATCH"];

/// Label for names outside the known command tables.
pub const UNKNOWN_COMMAND: &str = "unknown";

/// Installs the prometheus recorder and spawns its upkeep task.
pub fn install_recorder() -> Result<PrometheusHandle, String> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install prometheus recorder: {e}"))?;

    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            upkeep.run_upkeep();
        }
    });

    Ok(handle)
}

/// Maps a client-supplied command name onto a fixed label set, so junk
/// verbs cannot grow the series count.
pub fn command_label(name: &str) -> &'static str {
    STORE_COMMANDS
        .iter()
        .chain(SERVER_COMMANDS)
        .find(|known| **known == name)
        .copied()
        .unwrap_or(UNKNOWN_COMMAND)
}

pub fn record_command(label: &'static str) {
    counter!("cinder_commands_total", "command" => label).increment(1);
}

pub fn on_connection_opened() {
    gauge!("cinder_connections_active").increment(1.0);
}

pub fn on_connection_closed() {
    gauge!("cinder_connections_active").decrement(1.0);
}

pub fn on_write_retry() {
    counter!("cinder_write_retries_total").increment(1);
}

pub fn on_write_failure(kind: &'static str) {
    counter!("cinder_write_failures_total", "kind" => kind).increment(1);
}

pub fn on_update_delivered() {
    counter!("cinder_updates_delivered_total").increment(1);
}
