//! In-memory job queue for tests and single-process runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{JobQueue, QueueError, QueueResult, QueuedJob};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, QueuedJob>,
    ready: HashMap<String, Vec<(Instant, String)>>,
    dead: Vec<(QueuedJob, String)>,
}

/// Job queue kept in process memory; can be switched off to simulate an outage
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    alive: AtomicBool,
}

impl MemoryJobQueue {
    /// Create an empty, reachable queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            alive: AtomicBool::new(true),
        }
    }

    /// Take the queue down or bring it back
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Jobs not yet acked or dead-lettered, including claimed ones
    pub fn pending_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Dead-lettered jobs with their reasons
    pub fn dead_letters(&self) -> Vec<(QueuedJob, String)> {
        self.state.lock().dead.clone()
    }

    fn check_alive(&self) -> QueueResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Connect("memory queue unavailable".to_string()))
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn add(&self, job: QueuedJob) -> QueueResult<bool> {
        self.check_alive()?;
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        state
            .ready
            .entry(job.topic.clone())
            .or_default()
            .push((Instant::now(), job.id.clone()));
        state.jobs.insert(job.id.clone(), job);
        Ok(true)
    }

    async fn next_ready(&self, topic: &str) -> QueueResult<Option<QueuedJob>> {
        self.check_alive()?;
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(ready) = state.ready.get_mut(topic) else {
            return Ok(None);
        };
        let next = ready
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= now)
            .min_by_key(|(_, (at, _))| *at)
            .map(|(index, _)| index);

        let Some(index) = next else {
            return Ok(None);
        };
        let (_, id) = ready.remove(index);
        Ok(state.jobs.get(&id).cloned())
    }

    async fn ack(&self, job: &QueuedJob) -> QueueResult<()> {
        self.check_alive()?;
        self.state.lock().jobs.remove(&job.id);
        Ok(())
    }

    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> QueueResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        state.jobs.insert(job.id.clone(), job.clone());
        state
            .ready
            .entry(job.topic.clone())
            .or_default()
            .push((Instant::now() + delay, job.id.clone()));
        Ok(())
    }

    async fn dead_letter(&self, job: &QueuedJob, reason: &str) -> QueueResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        state.jobs.remove(&job.id);
        state.dead.push((job.clone(), reason.to_string()));
        Ok(())
    }

    async fn is_alive(&self) -> QueueResult<bool> {
        Ok(self.alive.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backup_request::BackupRequestId;
    use crate::domain::events::{BackupRequestReceived, EventEnvelope};

    fn job(id: &str) -> QueuedJob {
        let envelope =
            EventEnvelope::wrap(&BackupRequestReceived::new(BackupRequestId(id.to_string()))).unwrap();
        QueuedJob::new(envelope, 3)
    }

    #[tokio::test]
    async fn test_add_is_idempotent_while_pending() {
        let queue = MemoryJobQueue::new();
        assert!(queue.add(job("r1")).await.unwrap());
        assert!(!queue.add(job("r1")).await.unwrap());
        assert_eq!(queue.pending_count(), 1);

        let claimed = queue.next_ready("backup-request-received").await.unwrap().unwrap();
        assert!(queue.next_ready("backup-request-received").await.unwrap().is_none());

        queue.ack(&claimed).await.unwrap();
        assert!(queue.add(job("r1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_later_respects_delay() {
        tokio::time::pause();
        let queue = MemoryJobQueue::new();
        queue.add(job("r1")).await.unwrap();
        let mut claimed = queue.next_ready("backup-request-received").await.unwrap().unwrap();

        claimed.attempts_made = 1;
        queue.retry_later(&claimed, Duration::from_secs(2)).await.unwrap();
        assert!(queue.next_ready("backup-request-received").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let again = queue.next_ready("backup-request-received").await.unwrap().unwrap();
        assert_eq!(again.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_unavailable_queue_reports_connect_errors() {
        let queue = MemoryJobQueue::new();
        queue.set_alive(false);

        assert!(matches!(queue.add(job("r1")).await, Err(QueueError::Connect(_))));
        assert!(!queue.is_alive().await.unwrap());
    }
}
