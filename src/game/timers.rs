//! Scheduled resumptions on the session loop

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Something the session must revisit once its due time passes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerEvent {
    /// Reconciliation deadline for a pending hit
    HitDeadline(String),
    /// Auto-destroy of a projectile
    ProjectileExpiry(String),
}

/// Min-heap of timers ordered by due time, then by scheduling order.
///
/// Timers are never cancelled. Handlers check whether their subject still
/// exists, so a timer firing late is a no-op.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(u64, u64, TimerEvent)>>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_ms: u64, event: TimerEvent) {
        self.seq += 1;
        self.heap.push(Reverse((due_ms, self.seq, event)));
    }

    /// Pop every timer due at or before `now`, in due order
    pub fn drain_due(&mut self, now: u64) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, _, event))) = self.heap.pop() {
                due.push(event);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
