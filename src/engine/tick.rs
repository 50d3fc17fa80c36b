// src/engine/tick.rs

//! What the runner waits on between polling rounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::clock::ManualClock;
use crate::worker::BoxFuture;

pub trait Ticker: Send {
    /// Resolve when the next polling round is due.
    fn tick(&mut self) -> BoxFuture<'_, ()>;
}

/// Wall-clock ticker. The first tick fires one full period after creation.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl Ticker for IntervalTicker {
    fn tick(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.interval.tick().await;
        })
    }
}

/// Ticker for tests: every tick moves a [`ManualClock`] forward by `step`
/// and returns without sleeping.
#[derive(Debug, Clone)]
pub struct SteppingTicker {
    clock: ManualClock,
    step: Duration,
    ticks: Arc<AtomicUsize>,
}

impl SteppingTicker {
    pub fn new(clock: ManualClock, step: Duration) -> Self {
        Self {
            clock,
            step,
            ticks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ticks taken so far, shared between clones.
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Ticker for SteppingTicker {
    fn tick(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.clock.advance(self.step);
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, elapsed_between};

    #[tokio::test]
    async fn stepping_ticker_drives_the_clock() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut ticker = SteppingTicker::new(clock.clone(), Duration::from_secs(30));

        for _ in 0..4 {
            ticker.tick().await;
        }

        assert_eq!(ticker.ticks(), 4);
        assert_eq!(elapsed_between(start, clock.now()), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn interval_ticker_waits_a_full_period_first() {
        let started = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::from_millis(50));
        ticker.tick().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
