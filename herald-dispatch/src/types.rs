//! Type definitions for leads, jobs and messages

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use herald_common::Domain;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of a lead as assigned by the lead source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(Arc<str>);

impl LeadId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LeadId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A prospective recipient, as supplied by the lead source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub address: String,
    #[serde(default)]
    pub last_reply_at: Option<DateTime<Utc>>,
}

impl Lead {
    #[must_use]
    pub fn new(id: impl Into<LeadId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_reply_at: None,
        }
    }

    #[must_use]
    pub fn with_last_reply(mut self, at: DateTime<Utc>) -> Self {
        self.last_reply_at = Some(at);
        self
    }

    /// The destination domain used for rate limiting
    #[must_use]
    pub fn domain(&self) -> Option<Domain> {
        Domain::from_address(&self.address)
    }
}

/// Unique, time-ordered job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch priority. Higher priorities are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        if value > 0 { Self::High } else { Self::Normal }
    }
}

/// Lifecycle of a job.
///
/// `Queued → InFlight → { Sent | RetryWait → Queued | Dead }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    InFlight,
    RetryWait,
    Sent,
    Dead,
}

/// A pending send for one lead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub lead: Lead,
    /// Subject intent; doubles as the subject category name
    pub intent: String,
    /// Pre-rendered body, if the caller supplied one
    pub body: Option<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Number of failed attempts that consumed retry budget
    pub attempts: u32,
    pub state: JobState,
    pub last_error: Option<String>,
    /// Arrival order, assigned by the queue on first enqueue
    pub(crate) sequence: u64,
}

impl Job {
    #[must_use]
    pub fn new(lead: Lead, intent: impl Into<String>, body: Option<String>, priority: Priority) -> Self {
        Self {
            id: JobId::generate(),
            lead,
            intent: intent.into(),
            body,
            priority,
            created_at: Utc::now(),
            attempts: 0,
            state: JobState::Queued,
            last_error: None,
            sequence: 0,
        }
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// The rendered message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Successful transport outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub sent_at: DateTime<Utc>,
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Ready to be dequeued
    pub waiting: usize,
    /// Parked until a retry or requeue delay elapses
    pub delayed: usize,
    /// Currently held by a worker
    pub in_flight: usize,
}

/// A job that reached a terminal failure, kept for operator inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: Job,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}
