//! Scheduler: fixed-rate periodic tasks plus the wall-clock skew watchdog.
//!
//! Every periodic activity in the process is a task registered here. Ticks
//! of one fund never block ticks of another (each task is its own tokio
//! task); a handler that overruns its period skips the backlog and bumps a
//! missed-tick counter. All tasks observe the shared stop token between
//! iterations.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Wall-clock regressions larger than this trip the skew watchdog.
const SKEW_TOLERANCE_MS: i64 = 1_000;

/// Monitors wall-clock sanity. When the wall clock moves backward by more
/// than a second, the generation counter bumps; strategies that see a new
/// generation reset their highwater marks to `now - poll window`.
pub struct SkewMonitor {
    clock: Arc<dyn Clock>,
    last_wall_ms: parking_lot::Mutex<i64>,
    generation: AtomicU64,
}

impl SkewMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        let now = clock.now_utc().timestamp_millis();
        Arc::new(Self {
            clock,
            last_wall_ms: parking_lot::Mutex::new(now),
            generation: AtomicU64::new(0),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// One watchdog pass. Returns true when a regression was detected.
    pub fn check(&self) -> bool {
        let now_ms = self.clock.now_utc().timestamp_millis();
        let mut last = self.last_wall_ms.lock();
        let skewed = now_ms < *last - SKEW_TOLERANCE_MS;
        if skewed {
            let gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            warn!(
                regressed_ms = *last - now_ms,
                generation = gen,
                "wall clock moved backward, resetting poll highwater marks"
            );
        }
        *last = now_ms;
        skewed
    }
}

/// Counters for one registered task.
#[derive(Debug, Default)]
pub struct TaskMetrics {
    pub ticks: AtomicU64,
    pub missed: AtomicU64,
}

pub struct Scheduler {
    stop: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(stop: watch::Receiver<bool>) -> Self {
        Self { stop }
    }

    pub fn stop_token(&self) -> watch::Receiver<bool> {
        self.stop.clone()
    }

    /// Register a periodic task. The handler runs to completion each tick;
    /// if it overruns the period the intervening ticks are skipped (no
    /// backlog) and the missed counter increments once per overrun.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: impl Into<String>,
        period: Duration,
        metrics: Arc<TaskMetrics>,
        mut handler: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let name = name.into();
        let mut stop = self.stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *stop.borrow() {
                    break;
                }

                let started = tokio::time::Instant::now();
                handler().await;
                metrics.ticks.fetch_add(1, Ordering::Relaxed);

                let elapsed = started.elapsed();
                if elapsed > period {
                    metrics.missed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        task = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        period_ms = period.as_millis() as u64,
                        "tick overran its period, skipping backlog"
                    );
                }
            }
            info!(task = %name, "periodic task stopped");
        })
    }

    /// Spawn the skew watchdog at a one-second cadence.
    pub fn spawn_skew_watchdog(&self, monitor: Arc<SkewMonitor>) -> tokio::task::JoinHandle<()> {
        self.spawn_periodic(
            "skew-watchdog",
            Duration::from_secs(1),
            Arc::new(TaskMetrics::default()),
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.check();
                }
            },
        )
    }
}
