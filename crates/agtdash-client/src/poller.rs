//! Polling safety net: re-runs a refresh on a long interval regardless of
//! the realtime channel.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Call `tick` every `period`, first one `period` after start. A tick that
/// overruns delays the next one instead of bursting; cancellation abandons
/// a tick in flight.
pub fn spawn_poller<F, Fut>(period: Duration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tracing::debug!(period_secs = period.as_secs(), "poll tick");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tick() => {}
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&count);
        let task = spawn_poller(Duration::from_secs(60), cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "no immediate tick");

        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        cancel.cancel();
        task.await.expect("join");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_running_tick() {
        let cancel = CancellationToken::new();
        let task = spawn_poller(Duration::from_secs(1), cancel.clone(), || {
            std::future::pending::<()>()
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stops while a tick is running")
            .expect("join");
    }
}
