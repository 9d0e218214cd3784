//! Per-fund signal queue with the anti-front-running delay.
//!
//! Multi-producer (a strategy may enqueue from more than one poll tick),
//! single-consumer (the fund's executor drains it). FIFO by insertion; a
//! signal becomes due once its `execute_at` has passed. The capacity bound
//! is a soft overflow guard: on overflow the new signal is dropped and
//! counted, never the queued ones.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::Signal;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct QueuedSignal {
    pub signal: Signal,
    pub execute_at: DateTime<Utc>,
}

pub struct SignalQueue {
    fund_id: String,
    delay: Duration,
    capacity: usize,
    inner: Mutex<VecDeque<QueuedSignal>>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl SignalQueue {
    pub fn new(fund_id: impl Into<String>, delay: Duration) -> Self {
        Self::with_capacity(fund_id, delay, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(fund_id: impl Into<String>, delay: Duration, capacity: usize) -> Self {
        Self {
            fund_id: fund_id.into(),
            delay,
            capacity,
            inner: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn fund_id(&self) -> &str {
        &self.fund_id
    }

    /// Enqueue a signal, stamping `execute_at = now + delay`. Returns false
    /// when the overflow guard dropped it.
    pub fn enqueue(&self, signal: Signal, now: DateTime<Utc>) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                fund = %self.fund_id,
                signal = signal.id(),
                "signal queue full, dropping new signal"
            );
            return false;
        }
        let execute_at = now
            + chrono::Duration::from_std(self.delay).unwrap_or_else(|_| chrono::Duration::zero());
        queue.push_back(QueuedSignal { signal, execute_at });
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove and return all head elements whose `execute_at` has passed.
    /// Stops at the first not-yet-due element to preserve FIFO processing.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<QueuedSignal> {
        let mut queue = self.inner.lock();
        let mut due = Vec::new();
        while queue.front().is_some_and(|head| head.execute_at <= now) {
            if let Some(head) = queue.pop_front() {
                due.push(head);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}
