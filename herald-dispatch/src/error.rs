//! Typed error handling for dispatch operations.
//!
//! Send failures are split by how the engine reacts to them:
//! - Transient failures are retried on the backoff schedule
//! - Permanent failures are dead-lettered immediately
//! - Quota failures block the account and retry the job elsewhere

use thiserror::Error;

use crate::types::LeadId;

/// Outcome classification for a failed send or probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Failure that may succeed on a later attempt.
    #[error("Transient failure: {0}")]
    Transient(#[from] TransientError),

    /// Failure that will not succeed however often it is retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// The account's provider-side throughput quota is exhausted.
    #[error("Quota exceeded: {0}")]
    Quota(String),
}

/// Failures that are retried with backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransientError {
    /// The send did not complete within the configured timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection could not be established; nothing was transmitted.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote side asked us to try again later.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// The session broke off once submission had started; the message may
    /// have been delivered.
    #[error("Connection interrupted: {0}")]
    Interrupted(String),
}

/// Failures that dead-letter the job without consuming retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermanentError {
    /// Recipient address is invalid or unknown.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The account's credentials were rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The message was refused for any other permanent reason.
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

impl SendError {
    /// Returns `true` if the job should be retried.
    ///
    /// Quota failures are retried, through a different account.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Quota(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if the provider reported quota exhaustion.
    #[must_use]
    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    /// Returns `true` if the message provably never left the process.
    ///
    /// Only these failures may give back the account's rate-limit reservation.
    #[must_use]
    pub const fn never_transmitted(&self) -> bool {
        matches!(self, Self::Transient(TransientError::ConnectionFailed(_)))
    }
}

/// Rejected configuration update. The previous configuration stays in force.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// Top-level engine error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No sending accounts were configured. Fatal at startup.
    #[error("No sending accounts configured")]
    NoAccounts,

    /// Every account is unhealthy or rate-limited right now.
    #[error("No account available")]
    NoAccountAvailable,

    /// The lead replied and is handled by a human; automated jobs are refused.
    #[error("Lead {0} is in human mode")]
    LeadSuppressed(LeadId),

    /// The lead's address has no usable domain part.
    #[error("Invalid lead address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let error = SendError::from(TransientError::Timeout("30s".to_string()));
        assert!(error.is_retryable());
        assert!(!error.is_permanent());
        assert!(!error.never_transmitted());
    }

    #[test]
    fn test_quota_is_retryable() {
        let error = SendError::Quota("Daily user sending quota exceeded".to_string());
        assert!(error.is_retryable());
        assert!(error.is_quota());
        assert!(!error.is_permanent());
    }

    #[test]
    fn test_permanent_is_not_retryable() {
        let error = SendError::from(PermanentError::InvalidRecipient("a@x.com".to_string()));
        assert!(!error.is_retryable());
        assert!(error.is_permanent());
    }

    #[test]
    fn test_connection_failure_never_transmitted() {
        let error = SendError::from(TransientError::ConnectionFailed("refused".to_string()));
        assert!(error.never_transmitted());
    }

    #[test]
    fn test_interrupted_session_keeps_reservation() {
        let error = SendError::from(TransientError::Interrupted("incomplete response".to_string()));
        assert!(error.is_retryable());
        assert!(!error.never_transmitted());
    }

    #[test]
    fn test_send_error_lifts_into_dispatch_error() {
        fn send() -> Result<(), DispatchError> {
            Err(SendError::Quota("Daily user sending quota exceeded".to_string()))?;
            Ok(())
        }

        assert!(matches!(send(), Err(DispatchError::Send(e)) if e.is_quota()));
    }

    #[test]
    fn test_error_display() {
        let error = SendError::from(TransientError::ServerBusy("421 try later".to_string()));
        assert_eq!(error.to_string(), "Transient failure: Server busy: 421 try later");

        let error = DispatchError::from(ConfigError::invalid("burst_limit", "must be at least 1"));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration value for burst_limit: must be at least 1"
        );
    }
}
