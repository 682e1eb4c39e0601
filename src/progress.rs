//! Real-time progress tracking.
//!
//! Producers (source runners, the validation loop, the critical pass) hold a
//! cheap, cloneable [`ProgressHandle`] and push [`ProgressEvent`]s into an
//! unbounded channel, so reporting never blocks the work itself. A single
//! aggregation task owns the [`ProgressTracker`], emits periodic `tracing`
//! lines and publishes snapshots on a `watch` channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Number of recent completion events used for the throughput average.
pub const THROUGHPUT_WINDOW: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discovery,
    Validation,
    Critical,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Discovery, Phase::Validation, Phase::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Validation => "validation",
            Phase::Critical => "critical",
        }
    }

    fn index(&self) -> usize {
        match self {
            Phase::Discovery => 0,
            Phase::Validation => 1,
            Phase::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Started(Phase),
    TotalDelta(Phase, u64),
    CompletedDelta(Phase, u64),
    Finished(Phase),
    Shutdown,
}

/// Cloneable sender side. A disabled handle drops every event.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressHandle {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn start(&self, phase: Phase) {
        self.send(ProgressEvent::Started(phase));
    }

    pub fn add_total(&self, phase: Phase, n: u64) {
        if n > 0 {
            self.send(ProgressEvent::TotalDelta(phase, n));
        }
    }

    pub fn advance(&self, phase: Phase, n: u64) {
        if n > 0 {
            self.send(ProgressEvent::CompletedDelta(phase, n));
        }
    }

    pub fn finish(&self, phase: Phase) {
        self.send(ProgressEvent::Finished(phase));
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub phase_name: Phase,
    pub state: PhaseState,
    pub completed: u64,
    pub total: u64,
    pub percent: f64,
    /// Units per second over the recent window.
    pub throughput: f64,
    pub eta_seconds: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct PhaseTrack {
    state: PhaseState,
    completed: u64,
    total: u64,
    started: Option<(Instant, DateTime<Utc>)>,
    last_update: Option<DateTime<Utc>>,
    samples: VecDeque<(Instant, u64)>,
}

impl PhaseTrack {
    fn new() -> Self {
        Self {
            state: PhaseState::NotStarted,
            completed: 0,
            total: 0,
            started: None,
            last_update: None,
            samples: VecDeque::with_capacity(THROUGHPUT_WINDOW),
        }
    }

    fn ensure_running(&mut self, now: Instant) {
        if self.state == PhaseState::NotStarted {
            self.state = PhaseState::Running;
            self.started = Some((now, Utc::now()));
            self.samples.push_back((now, 0));
        }
    }

    fn throughput(&self, now: Instant) -> f64 {
        if let (Some((t0, c0)), Some((t1, c1))) = (self.samples.front(), self.samples.back()) {
            let secs = t1.duration_since(*t0).as_secs_f64();
            if secs > 0.0 && c1 > c0 {
                return (c1 - c0) as f64 / secs;
            }
        }
        match self.started {
            Some((t0, _)) => {
                let secs = now.duration_since(t0).as_secs_f64();
                if secs > 0.0 {
                    self.completed as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

/// Pure per-phase state machine; time is passed in so it can be tested
/// without a clock.
#[derive(Debug)]
pub struct ProgressTracker {
    phases: [PhaseTrack; 3],
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            phases: [PhaseTrack::new(), PhaseTrack::new(), PhaseTrack::new()],
        }
    }

    pub fn apply(&mut self, event: ProgressEvent, now: Instant) {
        let phase = match event {
            ProgressEvent::Started(p)
            | ProgressEvent::TotalDelta(p, _)
            | ProgressEvent::CompletedDelta(p, _)
            | ProgressEvent::Finished(p) => p,
            ProgressEvent::Shutdown => return,
        };
        let t = &mut self.phases[phase.index()];
        t.ensure_running(now);
        match event {
            ProgressEvent::TotalDelta(_, n) => t.total += n,
            ProgressEvent::CompletedDelta(_, n) => {
                t.completed += n;
                t.total = t.total.max(t.completed);
                if t.samples.len() == THROUGHPUT_WINDOW {
                    t.samples.pop_front();
                }
                t.samples.push_back((now, t.completed));
            }
            ProgressEvent::Finished(_) => t.state = PhaseState::Completed,
            _ => {}
        }
        t.last_update = Some(Utc::now());
    }

    pub fn snapshot(&self, phase: Phase, now: Instant) -> ProgressSnapshot {
        let t = &self.phases[phase.index()];
        let percent = match (t.state, t.total) {
            (PhaseState::Completed, _) => 100.0,
            (_, 0) => 0.0,
            (_, total) => (t.completed as f64 / total as f64 * 100.0).min(100.0),
        };
        let throughput = t.throughput(now);
        let eta_seconds = match t.state {
            PhaseState::Running if throughput > 0.0 => {
                Some(t.total.saturating_sub(t.completed) as f64 / throughput)
            }
            PhaseState::Completed => Some(0.0),
            _ => None,
        };
        ProgressSnapshot {
            phase_name: phase,
            state: t.state,
            completed: t.completed,
            total: t.total,
            percent,
            throughput,
            eta_seconds,
            start_time: t.started.map(|(_, wall)| wall),
            last_update: t.last_update,
        }
    }

    pub fn snapshots(&self, now: Instant) -> Vec<ProgressSnapshot> {
        Phase::ALL.iter().map(|p| self.snapshot(*p, now)).collect()
    }
}

/// Owner of the aggregation task.
pub struct ProgressReporter {
    handle: ProgressHandle,
    updates: watch::Receiver<Vec<ProgressSnapshot>>,
    task: JoinHandle<Vec<ProgressSnapshot>>,
}

impl ProgressReporter {
    /// Spawn the aggregation task; snapshots are logged every `interval`.
    pub fn spawn(interval: Duration) -> Self {
        Self::spawn_into(interval, Arc::new(watch::channel(Vec::new()).0))
    }

    /// Like [`spawn`](Self::spawn) but publishes on a caller-owned channel.
    pub fn spawn_into(
        interval: Duration,
        watch_tx: Arc<watch::Sender<Vec<ProgressSnapshot>>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch_rx = watch_tx.subscribe();

        let task = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(ProgressEvent::Shutdown) | None => break,
                        Some(event) => {
                            tracker.apply(event, Instant::now());
                            watch_tx.send_replace(tracker.snapshots(Instant::now()));
                        }
                    },
                    _ = ticker.tick() => {
                        for s in tracker.snapshots(Instant::now()) {
                            if s.state == PhaseState::Running {
                                info!(
                                    phase = s.phase_name.as_str(),
                                    completed = s.completed,
                                    total = s.total,
                                    percent = format!("{:.1}", s.percent),
                                    throughput = format!("{:.1}/s", s.throughput),
                                    eta_secs = s.eta_seconds.map(|e| e.round() as u64),
                                    "progress"
                                );
                            }
                        }
                    }
                }
            }

            let final_snapshots = tracker.snapshots(Instant::now());
            watch_tx.send_replace(final_snapshots.clone());
            final_snapshots
        });

        Self {
            handle: ProgressHandle { tx: Some(tx) },
            updates: watch_rx,
            task,
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Live snapshots for UI collaborators.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ProgressSnapshot>> {
        self.updates.clone()
    }

    /// Stop the task after draining queued events and return final snapshots.
    pub async fn finish(self) -> Vec<ProgressSnapshot> {
        self.handle.send(ProgressEvent::Shutdown);
        self.task.await.unwrap_or_default()
    }
}
