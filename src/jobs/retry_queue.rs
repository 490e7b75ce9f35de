/// Delayed re-delivery of jobs deferred for consistency
use crate::error::{BalanzaError, BalanzaResult};
use crate::jobs::JobEnvelope;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Durable, time-ordered queue owned by the job dispatcher.
///
/// The resolver only decides whether to call it; deferred jobs are never held
/// in worker memory.
pub trait DelayedRetryQueue: Send + Sync {
    fn schedule_at(&self, at: SystemTime, job: JobEnvelope) -> BalanzaResult<()>;
}

/// Process-local retry queue for tests and single-node development.
///
/// Jobs are stored as serialized payloads, exactly as a durable queue would
/// hold them, ordered by due time and then by insertion.
#[derive(Debug, Default)]
pub struct InMemoryRetryQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<(SystemTime, u64), String>,
    next_seq: u64,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every job due at or before `now`, earliest first
    pub fn pop_due(&self, now: SystemTime) -> BalanzaResult<Vec<JobEnvelope>> {
        let due: Vec<String> = {
            let mut state = self.inner.lock();
            let mut due = Vec::new();
            while let Some(entry) = state.entries.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                due.push(entry.remove());
            }
            due
        };

        due.iter().map(|payload| JobEnvelope::from_json(payload)).collect()
    }

    /// Due time of the earliest scheduled job
    pub fn next_due(&self) -> Option<SystemTime> {
        self.inner.lock().entries.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl DelayedRetryQueue for InMemoryRetryQueue {
    fn schedule_at(&self, at: SystemTime, job: JobEnvelope) -> BalanzaResult<()> {
        let payload = job
            .to_json()
            .map_err(|e| BalanzaError::retry_queue(format!("cannot encode {}: {}", job.id, e)))?;

        let mut state = self.inner.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert((at, seq), payload);
        tracing::debug!("Scheduled {} ({}) for re-delivery", job.id, job.kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_time_order() {
        let queue = InMemoryRetryQueue::new();
        let now = SystemTime::now();

        let late = JobEnvelope::new("LateWorker", json!([]));
        let early = JobEnvelope::new("EarlyWorker", json!([]));
        let future = JobEnvelope::new("FutureWorker", json!([]));

        queue.schedule_at(now - Duration::from_secs(1), late.clone()).unwrap();
        queue.schedule_at(now - Duration::from_secs(10), early.clone()).unwrap();
        queue.schedule_at(now + Duration::from_secs(60), future.clone()).unwrap();
        assert_eq!(queue.len(), 3);

        let due = queue.pop_due(now).unwrap();
        assert_eq!(due, vec![early, late]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_same_due_time_keeps_insertion_order() {
        let queue = InMemoryRetryQueue::new();
        let at = SystemTime::now();

        let first = JobEnvelope::new("FirstWorker", json!([]));
        let second = JobEnvelope::new("SecondWorker", json!([]));
        queue.schedule_at(at, first.clone()).unwrap();
        queue.schedule_at(at, second.clone()).unwrap();

        assert_eq!(queue.pop_due(at).unwrap(), vec![first, second]);
        assert!(queue.is_empty());
        assert!(queue.next_due().is_none());
    }

    #[test]
    fn test_nothing_due() {
        let queue = InMemoryRetryQueue::new();
        let now = SystemTime::now();
        queue
            .schedule_at(now + Duration::from_secs(5), JobEnvelope::new("Worker", json!(null)))
            .unwrap();

        assert!(queue.pop_due(now).unwrap().is_empty());
        assert_eq!(queue.len(), 1);
    }
}
