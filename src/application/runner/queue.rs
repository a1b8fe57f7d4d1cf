//! Execution priority queue
//!
//! Thread-safe max-heap keyed by (priority descending, enqueue time
//! ascending). The runner's workers pop from it; the scheduler and the
//! retry path push into it. Cancellation marks entries so they evaporate
//! on pop instead of requiring a heap rebuild.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::error::{CoreError, CoreResult};
use crate::domain::value_objects::Priority;

/// Queue entry; a lightweight handle, the execution itself lives in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedExecution {
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    /// Tie-breaker keeping the pop order total and deterministic
    seq: u64,
}

impl Ord for QueuedExecution {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedExecution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedExecution>,
    cancelled: HashSet<Uuid>,
}

/// Bounded priority queue of executions awaiting admission
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    seq: AtomicU64,
    notify: Notify,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                cancelled: HashSet::new(),
            }),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues an execution handle; fails when the queue is at capacity
    pub fn try_push(
        &self,
        execution_id: Uuid,
        job_id: Uuid,
        priority: Priority,
        queued_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.heap.len() >= self.capacity {
            return Err(CoreError::validation("execution queue is full"));
        }
        state.heap.push(QueuedExecution {
            execution_id,
            job_id,
            priority,
            queued_at,
            seq: self.seq.fetch_add(1, AtomicOrdering::SeqCst),
        });
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Pops the best admissible entry
    ///
    /// `admissible` filters by job (the runner skips jobs that already have
    /// a running execution); skipped entries keep their queue position.
    /// Cancelled entries are dropped on the way.
    pub fn pop_where(&self, admissible: impl Fn(&QueuedExecution) -> bool) -> Option<QueuedExecution> {
        let mut state = self.state.lock().unwrap();
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = state.heap.pop() {
            if state.cancelled.remove(&entry.execution_id) {
                continue;
            }
            if admissible(&entry) {
                found = Some(entry);
                break;
            }
            skipped.push(entry);
        }
        for entry in skipped {
            state.heap.push(entry);
        }
        if found.is_some() {
            drop(state);
            self.notify.notify_waiters();
        }
        found
    }

    /// Waits until an admissible entry is available and pops it
    pub async fn pop_wait(
        &self,
        admissible: impl Fn(&QueuedExecution) -> bool,
    ) -> QueuedExecution {
        loop {
            // Arm the notification before checking, so a push between the
            // check and the await cannot be lost.
            let notified = self.notify.notified();
            if let Some(entry) = self.pop_where(&admissible) {
                return entry;
            }
            notified.await;
        }
    }

    /// Wakes waiting workers; called when the admissibility condition may
    /// have changed (a running job finished)
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Removes a queued execution
    ///
    /// Returns true when the execution was still queued.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap();
        let present = state.heap.iter().any(|e| e.execution_id == execution_id);
        if present {
            state.cancelled.insert(execution_id);
        }
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn push(queue: &ExecutionQueue, priority: u8, queued_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        queue
            .try_push(id, Uuid::new_v4(), Priority::new(priority), queued_at)
            .unwrap();
        id
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let queue = ExecutionQueue::new(10);
        let now = Utc::now();
        let low = push(&queue, 2, now);
        let high = push(&queue, 9, now + Duration::seconds(5));
        let mid_late = push(&queue, 5, now + Duration::seconds(2));
        let mid_early = push(&queue, 5, now);

        let order: Vec<Uuid> = std::iter::from_fn(|| queue.pop_where(|_| true))
            .map(|e| e.execution_id)
            .collect();
        assert_eq!(order, vec![high, mid_early, mid_late, low]);
    }

    #[test]
    fn test_capacity_bound() {
        let queue = ExecutionQueue::new(2);
        let now = Utc::now();
        push(&queue, 5, now);
        push(&queue, 5, now);
        let overflow = queue.try_push(Uuid::new_v4(), Uuid::new_v4(), Priority::default(), now);
        assert!(overflow.is_err());
    }

    #[test]
    fn test_inadmissible_entries_keep_position() {
        let queue = ExecutionQueue::new(10);
        let now = Utc::now();
        let blocked_job = Uuid::new_v4();
        let blocked = Uuid::new_v4();
        queue
            .try_push(blocked, blocked_job, Priority::new(9), now)
            .unwrap();
        let admissible = push(&queue, 5, now);

        // The high-priority entry's job is busy; the lower one is admitted.
        let popped = queue.pop_where(|e| e.job_id != blocked_job).unwrap();
        assert_eq!(popped.execution_id, admissible);

        // Once the job frees up, the skipped entry is still there, first.
        let popped = queue.pop_where(|_| true).unwrap();
        assert_eq!(popped.execution_id, blocked);
    }

    #[test]
    fn test_cancel_removes_queued_entry() {
        let queue = ExecutionQueue::new(10);
        let now = Utc::now();
        let id = push(&queue, 5, now);
        assert!(queue.cancel(id));
        assert!(queue.pop_where(|_| true).is_none());
        // Cancelling something unknown reports false.
        assert!(!queue.cancel(Uuid::new_v4()));
    }

    proptest::proptest! {
        /// Popping everything always yields (priority desc, queued_at asc)
        /// regardless of push order.
        #[test]
        fn prop_pop_order_total(entries in proptest::collection::vec((1u8..=10, 0i64..10_000), 0..50)) {
            let queue = ExecutionQueue::new(100);
            let base = Utc::now();
            for (priority, offset_ms) in &entries {
                queue
                    .try_push(
                        Uuid::new_v4(),
                        Uuid::new_v4(),
                        Priority::new(*priority),
                        base + Duration::milliseconds(*offset_ms),
                    )
                    .unwrap();
            }
            let popped: Vec<QueuedExecution> =
                std::iter::from_fn(|| queue.pop_where(|_| true)).collect();
            proptest::prop_assert_eq!(popped.len(), entries.len());
            for pair in popped.windows(2) {
                let ordered = pair[0].priority > pair[1].priority
                    || (pair[0].priority == pair[1].priority
                        && pair[0].queued_at <= pair[1].queued_at);
                proptest::prop_assert!(ordered);
            }
        }
    }

    #[tokio::test]
    async fn test_pop_wait_wakes_on_push() {
        let queue = std::sync::Arc::new(ExecutionQueue::new(10));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop_wait(|_| true).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let id = push(&queue, 5, Utc::now());
        let entry = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.execution_id, id);
    }
}
