//! Dispatch engine for templated outbound messages to leads
//!
//! This crate provides:
//! - A priority queue of send jobs with cancellation and delayed requeue
//! - Round-robin account rotation with health filtering
//! - Per-account and per-domain rate limiting
//! - Periodic account health probing
//! - Reply-first lead handling and subject variation
//!
//! The message transport is supplied by the caller through [`Transport`].

pub mod account;
pub mod config;
mod engine;
mod error;
pub mod policy;
pub mod pool;
mod processor;
pub mod queue;
pub mod quota;
pub mod rate_limiter;
pub mod reply;
pub mod subject;
mod transport;
mod types;

// Re-export account types
pub use account::{Account, AccountId, AccountStatus, AccountStatusReport, Endpoint, Security};
// Re-export configuration types
pub use config::{ConfigPatch, DomainRateLimit, EngineConfig, SubjectPolicy, WarmupBounds};
// Re-export core types
pub use engine::{Engine, EngineStats};
// Re-export error types
pub use error::{ConfigError, DispatchError, PermanentError, SendError, TransientError};
pub use reply::Stage;
pub use transport::Transport;
pub use types::{
    DeadLetter, Job, JobId, JobState, Lead, LeadId, OutboundMessage, Priority, QueueDepth,
    SendReceipt,
};
