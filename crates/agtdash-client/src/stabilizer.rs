//! Stabilizer driver: feeds the raw channel flag into
//! [`ConnectionStabilizer`] and publishes the debounced value.

use agtdash_core::channel::ChannelState;
use agtdash_core::stabilizer::{ConnectionStabilizer, StabilizerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SessionClock;

/// Spawn the driver. The returned receiver carries the stable flag.
pub fn spawn_stabilizer(
    mut channel: watch::Receiver<ChannelState>,
    config: StabilizerConfig,
    clock: SessionClock,
    cancel: CancellationToken,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let initial = channel.borrow_and_update().raw_connected;
    let (stable_tx, stable_rx) = watch::channel(initial);

    let task = tokio::spawn(async move {
        let mut stabilizer = ConnectionStabilizer::new(initial, config);
        loop {
            let deadline = stabilizer.next_deadline().map(|ms| clock.instant_at(ms));
            let changed = tokio::select! {
                () = cancel.cancelled() => break,
                result = channel.changed() => {
                    if result.is_err() {
                        break;
                    }
                    let raw = channel.borrow_and_update().raw_connected;
                    stabilizer.observe(raw, clock.now_ms())
                }
                () = sleep_until(deadline) => stabilizer.advance(clock.now_ms()),
            };
            if changed {
                let stable = stabilizer.stable();
                tracing::debug!(stable, "connection status changed");
                stable_tx.send_replace(stable);
            }
        }
        stabilizer.cancel_all();
    });

    (stable_rx, task)
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
