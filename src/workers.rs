use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tokio::sync::watch;

use crate::node::ChordNode;

/// Jittered period: uniform over [T - T/4, T + T/4] so the ring's timers
/// never fall into lock-step.
fn jittered(period_ms: u64) -> Duration {
    let quarter = period_ms / 4;
    let ms = rand::thread_rng().gen_range(period_ms - quarter..=period_ms + quarter);
    Duration::from_millis(ms)
}

pub fn spawn_stabilize(
    node: Arc<ChordNode>,
    shutdown: watch::Receiver<bool>,
) -> actix_rt::task::JoinHandle<()> {
    actix_rt::spawn(run_stabilize(node, shutdown))
}

pub fn spawn_fix_fingers(
    node: Arc<ChordNode>,
    shutdown: watch::Receiver<bool>,
) -> actix_rt::task::JoinHandle<()> {
    actix_rt::spawn(run_fix_fingers(node, shutdown))
}

async fn run_stabilize(node: Arc<ChordNode>, mut shutdown: watch::Receiver<bool>) {
    let period = node.config().stabilize_interval_ms;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(jittered(period)) => {
                if let Err(e) = node.stabilize().await {
                    warn!("node {}: stabilize tick failed: {}", node.id(), e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("node {}: stabilize worker stopped", node.id());
}

async fn run_fix_fingers(node: Arc<ChordNode>, mut shutdown: watch::Receiver<bool>) {
    let period = node.config().fix_fingers_interval_ms;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(jittered(period)) => {
                if let Err(e) = node.fix_fingers().await {
                    warn!("node {}: fix_fingers tick failed: {}", node.id(), e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("node {}: fix_fingers worker stopped", node.id());
}
