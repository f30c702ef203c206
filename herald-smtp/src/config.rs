use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by every account's SMTP connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Display name placed on the From header
    #[serde(default)]
    pub from_name: Option<String>,

    /// Timeout for each SMTP command
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            from_name: None,
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

impl SmtpConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

mod defaults {
    pub const fn timeout_secs() -> u64 {
        30
    }
}
