//! Queue storage backends

use std::{cmp::Ordering, collections::BinaryHeap, fmt::Debug};

use serde::{Deserialize, Serialize};

use crate::types::{Job, LeadId};

/// Storage for jobs waiting to be dequeued.
///
/// Implementations must pop jobs by priority descending, then by sequence
/// ascending. They only hold waiting jobs; in-flight and delayed jobs are
/// tracked by the queue itself.
pub trait QueueStore: Send + Sync + Debug {
    fn push(&mut self, job: Job);

    fn pop(&mut self) -> Option<Job>;

    /// Remove every waiting job for `lead`
    fn remove_lead(&mut self, lead: &LeadId) -> Vec<Job>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration for the queue backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStoreConfig {
    /// In-process binary heap. Jobs do not survive a restart.
    Memory(MemoryStoreConfig),
}

impl Default for QueueStoreConfig {
    fn default() -> Self {
        Self::Memory(MemoryStoreConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Jobs to allocate room for up front
    #[serde(default)]
    pub initial_capacity: usize,
}

impl QueueStoreConfig {
    /// Convert the configuration into a concrete store
    #[must_use]
    pub fn into_store(self) -> Box<dyn QueueStore> {
        match self {
            Self::Memory(config) => Box::new(MemoryQueueStore::with_capacity(config.initial_capacity)),
        }
    }
}

#[derive(Debug)]
struct Ranked(Job);

impl Ranked {
    const fn key(&self) -> (crate::types::Priority, std::cmp::Reverse<u64>) {
        (self.0.priority, std::cmp::Reverse(self.0.sequence))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// In-memory store backed by a binary heap
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    heap: BinaryHeap<Ranked>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn push(&mut self, job: Job) {
        self.heap.push(Ranked(job));
    }

    fn pop(&mut self) -> Option<Job> {
        self.heap.pop().map(|ranked| ranked.0)
    }

    fn remove_lead(&mut self, lead: &LeadId) -> Vec<Job> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|ranked| &ranked.0.lead.id == lead);
        self.heap = BinaryHeap::from(kept);
        removed.into_iter().map(|ranked| ranked.0).collect()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
