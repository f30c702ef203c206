//! Account rotation
//!
//! The pool hands out accounts round-robin. Accounts that are not `Ready` in
//! the health table, or that the rate limiter refuses, are skipped; the
//! cursor only moves past the account that was actually chosen.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use herald_common::{Domain, tracing};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    account::{Account, HealthTable},
    config::EngineConfig,
    error::DispatchError,
    rate_limiter::{RateLimiter, Reservation},
};

#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Account>,
    health: Arc<HealthTable>,
    limiter: RateLimiter,
    cursor: Mutex<usize>,
}

impl AccountPool {
    /// Create a pool over `accounts`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoAccounts`] if `accounts` is empty.
    pub fn new(accounts: Vec<Account>, health: Arc<HealthTable>) -> Result<Self, DispatchError> {
        if accounts.is_empty() {
            return Err(DispatchError::NoAccounts);
        }

        Ok(Self {
            accounts,
            health,
            limiter: RateLimiter::new(),
            cursor: Mutex::new(0),
        })
    }

    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Select the next account able to send to `domain` and reserve its slot
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoAccountAvailable`] if every account is
    /// unhealthy or rate-limited.
    pub fn next(&self, domain: &Domain, config: &EngineConfig) -> Result<Reservation, DispatchError> {
        self.next_at(domain, config, Instant::now(), Utc::now().date_naive())
    }

    pub(crate) fn next_at(
        &self,
        domain: &Domain,
        config: &EngineConfig,
        now: Instant,
        today: NaiveDate,
    ) -> Result<Reservation, DispatchError> {
        let mut cursor = self.cursor.lock();
        let count = self.accounts.len();

        for offset in 0..count {
            let index = (*cursor + offset) % count;
            let account = &self.accounts[index];

            if !self.health.is_ready(&account.id) {
                continue;
            }

            match self.limiter.reserve(account, domain, config, now, today) {
                Ok(reservation) => {
                    *cursor = (index + 1) % count;
                    return Ok(reservation);
                }
                Err(limited) => {
                    tracing::trace!(account = %account.id, %domain, ?limited, "Account rate limited");
                }
            }
        }

        Err(DispatchError::NoAccountAvailable)
    }

    /// Hand back a slot whose send never left the process
    pub fn release(&self, reservation: &Reservation) {
        self.limiter.release(reservation);
    }
}
