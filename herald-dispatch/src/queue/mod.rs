//! Dispatch queue management
//!
//! Jobs wait in a [`QueueStore`] until a worker dequeues them. A dequeued job
//! is in flight and invisible to other workers until it is completed or put
//! back. Jobs put back with a delay are parked until a timer re-inserts them.

pub mod store;

use std::{collections::HashMap, sync::Arc, time::Duration};

use herald_common::tracing;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub use self::store::{MemoryQueueStore, MemoryStoreConfig, QueueStore, QueueStoreConfig};
use crate::types::{Job, JobId, JobState, LeadId, QueueDepth};

#[derive(Debug)]
struct Inner {
    store: Box<dyn QueueStore>,
    in_flight: HashMap<JobId, LeadId>,
    delayed: HashMap<JobId, Job>,
    next_sequence: u64,
}

/// Priority queue of pending jobs shared by all workers
#[derive(Debug)]
pub struct DispatchQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new(QueueStoreConfig::default())
    }
}

impl DispatchQueue {
    #[must_use]
    pub fn new(config: QueueStoreConfig) -> Self {
        Self::with_store(config.into_store())
    }

    #[must_use]
    pub fn with_store(store: Box<dyn QueueStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                in_flight: HashMap::new(),
                delayed: HashMap::new(),
                next_sequence: 1,
            }),
            notify: Notify::new(),
        }
    }

    /// Add a new job, assigning its arrival sequence
    pub fn enqueue(&self, mut job: Job) -> JobId {
        let id = job.id;
        {
            let mut inner = self.inner.lock();
            job.sequence = inner.next_sequence;
            inner.next_sequence += 1;
            job.state = JobState::Queued;
            inner.store.push(job);
        }
        self.notify.notify_one();
        id
    }

    /// Take the highest-priority waiting job, if any
    pub fn dequeue(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        let mut job = inner.store.pop()?;
        job.state = JobState::InFlight;
        inner.in_flight.insert(job.id, job.lead.id.clone());
        drop(inner);
        Some(job)
    }

    /// Wait until a job can be dequeued
    pub async fn next(&self) -> Job {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.dequeue() {
                return job;
            }

            notified.await;
        }
    }

    /// Put an in-flight job back, keeping its place in arrival order
    pub fn requeue(&self, mut job: Job) {
        {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(&job.id);
            job.state = JobState::Queued;
            inner.store.push(job);
        }
        self.notify.notify_one();
    }

    /// Park an in-flight job and put it back after `delay`
    pub fn requeue_after(self: &Arc<Self>, mut job: Job, delay: Duration) {
        let id = job.id;
        {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(&id);
            job.state = JobState::RetryWait;
            inner.delayed.insert(id, job);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.promote(id);
        });
    }

    /// Move a parked job back into the store, unless it was cancelled
    fn promote(&self, id: JobId) {
        let promoted = {
            let mut inner = self.inner.lock();
            match inner.delayed.remove(&id) {
                Some(mut job) => {
                    job.state = JobState::Queued;
                    inner.store.push(job);
                    true
                }
                None => false,
            }
        };

        if promoted {
            tracing::trace!(job_id = %id, "Delayed job back in queue");
            self.notify.notify_one();
        }
    }

    /// Forget an in-flight job that reached a terminal state
    pub fn complete(&self, id: &JobId) {
        self.inner.lock().in_flight.remove(id);
    }

    /// Remove every waiting and parked job for `lead`. In-flight jobs are not
    /// affected.
    pub fn cancel(&self, lead: &LeadId) -> usize {
        let mut inner = self.inner.lock();
        let waiting = inner.store.remove_lead(lead).len();
        let before = inner.delayed.len();
        inner.delayed.retain(|_, job| &job.lead.id != lead);
        waiting + (before - inner.delayed.len())
    }

    /// Whether a job for `lead` is currently held by a worker
    #[must_use]
    pub fn is_in_flight(&self, lead: &LeadId) -> bool {
        self.inner.lock().in_flight.values().any(|id| id == lead)
    }

    #[must_use]
    pub fn depth(&self) -> QueueDepth {
        let inner = self.inner.lock();
        QueueDepth {
            waiting: inner.store.len(),
            delayed: inner.delayed.len(),
            in_flight: inner.in_flight.len(),
        }
    }
}
