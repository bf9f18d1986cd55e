use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawns a supervisor that runs `tick` at `start`, `start + period`,
/// `start + 2 * period` and so on.
///
/// Ticks are anchored to when the previous tick was scheduled, not to when it
/// finished. A tick that overruns its period is followed immediately by the
/// next one, and only one tick runs at a time. Cancelling `token` stops the
/// loop before the next tick and drops an in-flight tick.
pub fn spawn_ticker<F, Fut>(
    name: String,
    start: Instant,
    period: Duration,
    token: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut n: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            n += 1;
            trace!("{name} tick {n}");

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tick() => {}
            }
        }
        debug!("{name} ticker stopped after {n} ticks");
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::spawn_ticker;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_do_not_drift() {
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let origin = Instant::now();

        let fired_c = fired.clone();
        let handle = spawn_ticker(
            "test".to_owned(),
            origin,
            Duration::from_secs(10),
            token.clone(),
            move || {
                let fired = fired_c.clone();
                async move {
                    fired.lock().unwrap().push(origin.elapsed().as_secs());
                    // slow work must not push the next tick back
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(*fired.lock().unwrap(), vec![0, 10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_runs_next_tick_immediately() {
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let origin = Instant::now();

        let fired_c = fired.clone();
        let handle = spawn_ticker(
            "overrun".to_owned(),
            origin,
            Duration::from_secs(10),
            token.clone(),
            move || {
                let fired = fired_c.clone();
                async move {
                    let at = origin.elapsed().as_secs();
                    fired.lock().unwrap().push(at);
                    if at == 0 {
                        tokio::time::sleep(Duration::from_secs(15)).await;
                    }
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(26)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(*fired.lock().unwrap(), vec![0, 15, 25]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_inflight_tick() {
        let done = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let done_c = done.clone();
        let handle = spawn_ticker(
            "cancel".to_owned(),
            Instant::now(),
            Duration::from_secs(1),
            token.clone(),
            move || {
                let done = done_c.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }
}
