//! Sending accounts and their health table

use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identity of a sending account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Arc<str>);

impl AccountId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Connection security for an account's endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// TLS from the first byte (usually port 465)
    #[default]
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 587)
    StartTls,
    /// No encryption; only for local relays and tests
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub security: Security,
}

/// A sending identity. Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Address used in the From header
    pub address: String,
    pub endpoint: Endpoint,
    /// Opaque reference resolved by the transport into a secret
    pub credential_ref: String,
    /// Warmup daily figure for young accounts, clamped by the engine
    #[serde(default)]
    pub warmup_daily_limit: Option<u32>,
}

/// Health label maintained by the quota monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    Ready,
    /// The provider reported quota exhaustion
    Blocked,
    /// The health probe failed for any other reason
    Error,
}

impl Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "READY",
            Self::Blocked => "BLOCKED",
            Self::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHealth {
    pub status: AccountStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for AccountHealth {
    fn default() -> Self {
        Self {
            status: AccountStatus::Ready,
            last_checked: None,
        }
    }
}

/// Operator-facing view of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusReport {
    pub account_id: AccountId,
    pub status: AccountStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Health of every account, keyed by id.
///
/// Written by the quota monitor, read by the pool and for status reports.
#[derive(Debug, Default)]
pub struct HealthTable {
    entries: RwLock<HashMap<AccountId, AccountHealth>>,
}

impl HealthTable {
    /// Create a table with every account marked ready and never checked
    #[must_use]
    pub fn new<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> Self {
        Self {
            entries: RwLock::new(
                accounts
                    .into_iter()
                    .map(|account| (account.id.clone(), AccountHealth::default()))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn get(&self, id: &AccountId) -> Option<AccountHealth> {
        self.entries.read().get(id).copied()
    }

    #[must_use]
    pub fn is_ready(&self, id: &AccountId) -> bool {
        self.get(id)
            .is_some_and(|health| health.status == AccountStatus::Ready)
    }

    /// Record a status, returning the previous one
    pub(crate) fn set(
        &self,
        id: &AccountId,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Option<AccountStatus> {
        self.entries
            .write()
            .insert(
                id.clone(),
                AccountHealth {
                    status,
                    last_checked: Some(at),
                },
            )
            .map(|previous| previous.status)
    }

    /// Reports in the order of `accounts`
    #[must_use]
    pub fn reports(&self, accounts: &[Account]) -> Vec<AccountStatusReport> {
        let entries = self.entries.read();
        accounts
            .iter()
            .map(|account| {
                let health = entries.get(&account.id).copied().unwrap_or_default();
                AccountStatusReport {
                    account_id: account.id.clone(),
                    status: health.status,
                    last_checked: health.last_checked,
                }
            })
            .collect()
    }
}
