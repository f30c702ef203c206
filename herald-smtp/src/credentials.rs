//! Resolution of account credential references into secrets

use std::{collections::HashMap, fmt::Debug};

use herald_dispatch::Account;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential {reference} for account {account} is not set")]
    Missing { account: String, reference: String },

    #[error("Credential {reference} for account {account} is empty")]
    Empty { account: String, reference: String },
}

/// Turns an account's opaque `credential_ref` into the secret used to log in
pub trait CredentialResolver: Send + Sync + Debug {
    /// Resolve the secret for `account`
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved to a non-empty
    /// secret.
    fn resolve(&self, account: &Account) -> Result<String, CredentialError>;
}

/// Reads each credential from the environment variable it names
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, account: &Account) -> Result<String, CredentialError> {
        let secret =
            std::env::var(&account.credential_ref).map_err(|_| CredentialError::Missing {
                account: account.id.to_string(),
                reference: account.credential_ref.clone(),
            })?;

        non_empty(account, secret)
    }
}

/// Fixed reference-to-secret table, for embedding and tests
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), secret.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, account: &Account) -> Result<String, CredentialError> {
        let secret = self
            .secrets
            .get(&account.credential_ref)
            .cloned()
            .ok_or_else(|| CredentialError::Missing {
                account: account.id.to_string(),
                reference: account.credential_ref.clone(),
            })?;

        non_empty(account, secret)
    }
}

fn non_empty(account: &Account, secret: String) -> Result<String, CredentialError> {
    if secret.is_empty() {
        Err(CredentialError::Empty {
            account: account.id.to_string(),
            reference: account.credential_ref.clone(),
        })
    } else {
        Ok(secret)
    }
}
