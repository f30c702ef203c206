//! Domain newtype for type safety
//!
//! Wraps destination domain names so rate-limit keys cannot be confused with
//! full addresses or account identifiers.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A lower-cased domain name
///
/// # Examples
///
/// ```
/// use herald_common::Domain;
///
/// let domain = Domain::new("Example.COM");
/// assert_eq!(domain.as_str(), "example.com");
///
/// let domain = Domain::from_address("lead@mail.example.com").unwrap();
/// assert_eq!(domain.as_str(), "mail.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain`, normalising to lower case
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().trim().to_ascii_lowercase()))
    }

    /// Extract the domain part of an address such as `user@example.com`
    ///
    /// Returns `None` when there is no `@` or nothing follows it.
    #[must_use]
    pub fn from_address(address: &str) -> Option<Self> {
        let address = address.trim().trim_end_matches('>');
        address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
            .map(Self::new)
    }

    /// Get the domain as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
