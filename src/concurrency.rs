//! Adaptive (AIMD) concurrency gate for DNS/HTTP validation units.
//!
//! `acquire()` waits until `in_flight < limit`. Each permit reports its
//! latency and whether it ended in a transient DNS failure; after every
//! window of completions the limit grows additively when latency and error
//! rate are both under their thresholds, and shrinks multiplicatively when
//! the error rate is over. The limit always stays in `[floor, ceiling]`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::ConcurrencyConfig;

#[derive(Debug, Default)]
struct Window {
    completions: usize,
    errors: usize,
    latency_total: Duration,
}

#[derive(Debug)]
struct State {
    limit: usize,
    in_flight: usize,
    peak_in_flight: usize,
    completed: u64,
    errors: u64,
    increases: u64,
    decreases: u64,
    window: Window,
}

/// Point-in-time view of the controller, reported in the summary.
#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    pub limit: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub completed: u64,
    pub errors: u64,
    pub increases: u64,
    pub decreases: u64,
}

pub struct AdaptiveLimiter {
    cfg: ConcurrencyConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl AdaptiveLimiter {
    pub fn new(cfg: ConcurrencyConfig) -> Arc<Self> {
        let limit = cfg.initial.clamp(cfg.floor.max(1), cfg.ceiling.max(1));
        Arc::new(Self {
            cfg,
            state: Mutex::new(State {
                limit,
                in_flight: 0,
                peak_in_flight: 0,
                completed: 0,
                errors: 0,
                increases: 0,
                decreases: 0,
                window: Window::default(),
            }),
            notify: Notify::new(),
        })
    }

    /// Wait for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> Permit {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut s = self.state.lock();
        if s.in_flight >= s.limit {
            return None;
        }
        s.in_flight += 1;
        s.peak_in_flight = s.peak_in_flight.max(s.in_flight);
        Some(Permit {
            limiter: Arc::clone(self),
            started: Instant::now(),
        })
    }

    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn stats(&self) -> LimiterStats {
        let s = self.state.lock();
        LimiterStats {
            limit: s.limit,
            in_flight: s.in_flight,
            peak_in_flight: s.peak_in_flight,
            completed: s.completed,
            errors: s.errors,
            increases: s.increases,
            decreases: s.decreases,
        }
    }

    fn record(&self, latency: Duration, error: bool) {
        let mut s = self.state.lock();
        s.completed += 1;
        if error {
            s.errors += 1;
        }
        s.window.completions += 1;
        s.window.latency_total += latency;
        if error {
            s.window.errors += 1;
        }
        if s.window.completions < self.cfg.window {
            return;
        }

        let window = std::mem::take(&mut s.window);
        let mean = window.latency_total / window.completions as u32;
        let error_rate = window.errors as f64 / window.completions as f64;
        let before = s.limit;

        if error_rate > self.cfg.error_threshold {
            let shrunk = (s.limit as f64 * self.cfg.decrease_factor).floor() as usize;
            s.limit = shrunk.max(self.cfg.floor);
            s.decreases += 1;
        } else if mean < self.cfg.latency_threshold && error_rate < self.cfg.error_threshold {
            s.limit = (s.limit + self.cfg.increase_step).min(self.cfg.ceiling);
            s.increases += 1;
        }

        if s.limit != before {
            debug!(
                from = before,
                to = s.limit,
                mean_latency_ms = mean.as_millis() as u64,
                error_rate,
                "concurrency limit adjusted"
            );
        }
        let grew = s.limit > before;
        drop(s);
        if grew {
            self.notify.notify_waiters();
        }
    }

    fn release(&self) {
        {
            let mut s = self.state.lock();
            s.in_flight = s.in_flight.saturating_sub(1);
        }
        self.notify.notify_one();
    }
}

/// One granted slot. Dropping it frees the slot; `complete` also feeds the
/// controller a latency/error sample.
pub struct Permit {
    limiter: Arc<AdaptiveLimiter>,
    started: Instant,
}

impl Permit {
    /// Report the unit's outcome; `transient_error` marks a DNS failure that
    /// survived its retries.
    pub fn complete(self, transient_error: bool) {
        self.limiter.record(self.started.elapsed(), transient_error);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cfg(initial: usize) -> ConcurrencyConfig {
        ConcurrencyConfig {
            initial,
            floor: 2,
            ceiling: 30,
            window: 4,
            increase_step: 10,
            decrease_factor: 0.5,
            latency_threshold: Duration::from_secs(2),
            error_threshold: 0.10,
        }
    }

    #[test]
    fn grows_after_healthy_window() {
        let l = AdaptiveLimiter::new(cfg(10));
        for _ in 0..4 {
            l.try_acquire().unwrap().complete(false);
        }
        assert_eq!(l.limit(), 20);
        for _ in 0..8 {
            l.try_acquire().unwrap().complete(false);
        }
        assert_eq!(l.limit(), 30, "clamped to ceiling");
    }

    #[test]
    fn shrinks_on_errors_down_to_floor() {
        let l = AdaptiveLimiter::new(cfg(10));
        for i in 0..4 {
            l.try_acquire().unwrap().complete(i == 0);
        }
        assert_eq!(l.limit(), 5);
        for _ in 0..3 {
            for _ in 0..4 {
                l.try_acquire().unwrap().complete(true);
            }
        }
        assert_eq!(l.limit(), 2);
        let stats = l.stats();
        assert_eq!(stats.decreases, 4);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn no_permit_beyond_limit() {
        let l = AdaptiveLimiter::new(cfg(3));
        let held: Vec<_> = (0..3).map(|_| l.try_acquire().unwrap()).collect();
        assert!(l.try_acquire().is_none());
        drop(held);
        assert_eq!(l.in_flight(), 0);
        assert!(l.try_acquire().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_never_exceeds_limit_under_load() {
        let l = AdaptiveLimiter::new(ConcurrencyConfig {
            ceiling: 8,
            ..cfg(4)
        });
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..200 {
            let l = Arc::clone(&l);
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let permit = l.acquire().await;
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                permit.complete(false);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 8);
        assert!(l.stats().peak_in_flight <= 8);
        assert_eq!(l.stats().completed, 200);
    }
}
