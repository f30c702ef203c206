//! Audit logging for dispatch lifecycle events
//!
//! Every event is emitted on the `audit` tracing target so operators can route
//! them separately from diagnostic logs.
//!
//! ## Audit Events
//!
//! - `SendAttempt`: a job was handed to the transport through an account
//! - `SendSuccess`: the transport accepted the message
//! - `SendDeadLettered`: a job reached a terminal failure
//! - `LeadReplied`: a lead replied and left automated dispatch
//!
//! Recipient addresses are redacted when `redact_recipients` is set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for dispatch lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient addresses from audit logs (PII protection)
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Global audit configuration (thread-safe)
static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact the local part of an address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        email.split_once('@').map_or_else(
            || "[REDACTED]".to_string(),
            |(_, domain)| format!("[REDACTED]@{domain}"),
        )
    } else {
        email.to_string()
    }
}

/// Log a send attempt.
///
/// `attempt` is 1-based.
pub fn log_send_attempt(job_id: &str, lead_id: &str, recipient: &str, account: &str, attempt: u32) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "audit",
        tracing::Level::INFO,
        event = "SendAttempt",
        job_id = %job_id,
        lead_id = %lead_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        account = %account,
        attempt,
        "Audit: Send attempt"
    );
}

/// Log a successful send, with the time the job spent queued
pub fn log_send_success(
    job_id: &str,
    lead_id: &str,
    recipient: &str,
    account: &str,
    subject: &str,
    queued_ms: i64,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "audit",
        tracing::Level::INFO,
        event = "SendSuccess",
        job_id = %job_id,
        lead_id = %lead_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        account = %account,
        subject = %subject,
        queued_ms,
        "Audit: Send successful"
    );
}

/// Log a job reaching the dead-letter state
pub fn log_send_dead_lettered(job_id: &str, lead_id: &str, recipient: &str, error: &str, attempts: u32) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "audit",
        tracing::Level::WARN,
        event = "SendDeadLettered",
        job_id = %job_id,
        lead_id = %lead_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        error = %error,
        attempts,
        "Audit: Job dead-lettered"
    );
}

/// Log a reply event and the number of queued jobs it cancelled
pub fn log_lead_replied(lead_id: &str, cancelled: usize) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "audit",
        tracing::Level::INFO,
        event = "LeadReplied",
        lead_id = %lead_id,
        cancelled,
        "Audit: Lead replied, automation stopped"
    );
}
