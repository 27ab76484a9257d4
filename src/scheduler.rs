//! Timing glue feeding the reconciliation worker.
//!
//! Both producers here only ever send [`Trigger`]s; all reconciliation
//! state stays with the worker that receives them.

use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

use crate::types::Trigger;

/// Spread of the jittered interval around its nominal value.
const JITTER_FACTOR: f64 = 0.25;

/// Randomize `nominal` uniformly within ±25%.
pub fn jitter<R: Rng>(nominal: Duration, rng: &mut R) -> Duration {
    let factor = rng.random_range((1.0 - JITTER_FACTOR)..=(1.0 + JITTER_FACTOR));
    let min = nominal.mul_f64(1.0 - JITTER_FACTOR);
    let max = nominal.mul_f64(1.0 + JITTER_FACTOR);
    nominal.mul_f64(factor).clamp(min, max)
}

/// Send a [`Trigger::Tick`] after every freshly jittered interval until
/// shutdown is signalled or the worker is gone.
///
/// A tick is dropped when the previous one has not been picked up yet, so a
/// slow cycle never queues a backlog.
pub async fn run_ticker<R: Rng + Send>(
    nominal: Duration,
    mut rng: R,
    triggers: mpsc::Sender<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = jitter(nominal, &mut rng);
        debug!("Next reconciliation in {:?}", wait);

        tokio::select! {
            _ = sleep(wait) => {}
            _ = shutdown.changed() => break,
        }

        match triggers.try_send(Trigger::Tick) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Reconciliation still pending, skipping tick"),
            Err(TrySendError::Closed(_)) => break,
        }
    }
    info!("Interval ticker stopped");
}

/// Collapse bursts of change signals into one [`Trigger::NodesChanged`],
/// sent once no further change arrived for `quiet`.
pub async fn debounce(
    mut changes: mpsc::Receiver<()>,
    quiet: Duration,
    triggers: mpsc::Sender<Trigger>,
) {
    while changes.recv().await.is_some() {
        let mut collapsed = 1;
        let mut closed = false;
        loop {
            match timeout(quiet, changes.recv()).await {
                Ok(Some(())) => collapsed += 1,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        debug!("Membership settled after {} change events", collapsed);
        if triggers.send(Trigger::NodesChanged).await.is_err() || closed {
            break;
        }
    }
    info!("Change debouncer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn jitter_stays_within_a_quarter() {
        let nominal = Duration::from_secs(900);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let wait = jitter(nominal, &mut rng);
            assert!(wait >= Duration::from_secs(675), "{:?}", wait);
            assert!(wait <= Duration::from_secs(1125), "{:?}", wait);
        }
    }

    #[test]
    fn jitter_is_spread_across_the_range() {
        let nominal = Duration::from_secs(900);
        let mut rng = StdRng::seed_from_u64(42);
        let waits: Vec<Duration> = (0..1_000).map(|_| jitter(nominal, &mut rng)).collect();

        let distinct: HashSet<Duration> = waits.iter().copied().collect();
        assert!(distinct.len() > 900);
        assert!(waits.iter().any(|w| *w < Duration::from_secs(800)));
        assert!(waits.iter().any(|w| *w > Duration::from_secs(1000)));
    }

    #[test]
    fn jitter_is_deterministic_for_a_seed() {
        let nominal = Duration::from_secs(60);
        let a = jitter(nominal, &mut StdRng::seed_from_u64(1));
        let b = jitter(nominal, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_sends_ticks_until_shutdown() {
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_ticker(
            Duration::from_secs(900),
            StdRng::seed_from_u64(3),
            tx,
            shutdown_rx,
        ));

        assert_eq!(rx.recv().await, Some(Trigger::Tick));
        assert_eq!(rx.recv().await, Some(Trigger::Tick));

        shutdown_tx.send(true).unwrap();
        ticker.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_does_not_queue_a_backlog() {
        let (tx, mut rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_ticker(
            Duration::from_secs(10),
            StdRng::seed_from_u64(3),
            tx,
            shutdown_rx,
        ));

        sleep(Duration::from_secs(100)).await;
        assert_eq!(rx.try_recv(), Ok(Trigger::Tick));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_triggers_once() {
        let (change_tx, change_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(debounce(change_rx, Duration::from_secs(30), tx));

        for _ in 0..5 {
            change_tx.send(()).await.unwrap();
            sleep(Duration::from_secs(10)).await;
        }
        assert!(rx.try_recv().is_err());

        sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.try_recv(), Ok(Trigger::NodesChanged));
        assert!(rx.try_recv().is_err());

        change_tx.send(()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Trigger::NodesChanged));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_change_is_flushed_when_watch_ends() {
        let (change_tx, change_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(4);
        let debouncer = tokio::spawn(debounce(change_rx, Duration::from_secs(30), tx));

        change_tx.send(()).await.unwrap();
        drop(change_tx);
        debouncer.await.unwrap();

        assert_eq!(rx.recv().await, Some(Trigger::NodesChanged));
        assert_eq!(rx.recv().await, None);
    }
}
