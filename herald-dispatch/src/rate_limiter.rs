//! Per-account and per-domain rate limiting
//!
//! Every send needs a reservation from the [`RateLimiter`]. A reservation is
//! granted only when all of the following hold for the chosen account:
//!
//! - the previous send through the account is at least `60s / per_domain_per_minute` ago
//! - fewer than `burst_limit` sends happened inside the burst window
//! - the account's daily cap is not reached (counted per UTC day)
//! - the destination domain's own spacing, when one is configured, has elapsed
//!
//! Reservations are pessimistic: counters move when the slot is granted, not
//! when the send completes. A send that provably never left the process can
//! hand its slot back with [`RateLimiter::release`].
//!
//! # Example
//!
//! ```text
//! per_domain_per_minute: 1, burst_limit: 3, burst_window: 10m
//! - t=0s    reserve → granted
//! - t=30s   reserve → refused, 30s of spacing left
//! - t=60s   reserve → granted
//! - t=120s  reserve → granted (3rd send in window)
//! - t=180s  reserve → refused until t=600s, burst exhausted
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::NaiveDate;
use dashmap::DashMap;
use herald_common::{Domain, tracing};
use tokio::time::Instant;

use crate::{
    account::{Account, AccountId},
    config::EngineConfig,
};

/// Why a reservation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimited {
    /// Account spacing not yet elapsed; the remaining wait
    Spacing(Duration),
    /// Burst ceiling reached; time until the oldest send leaves the window
    Burst(Duration),
    /// Daily cap reached
    DailyCap(u32),
    /// Destination domain spacing not yet elapsed; the remaining wait
    Domain(Duration),
}

/// Send history for a single account
#[derive(Debug, Default)]
struct AccountWindow {
    last_send: Option<Instant>,
    last_token: u64,
    burst: VecDeque<Instant>,
    day: Option<NaiveDate>,
    sent_today: u32,
}

impl AccountWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .burst
            .front()
            .is_some_and(|sent| now.duration_since(*sent) >= window)
        {
            self.burst.pop_front();
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.sent_today = 0;
        }
    }
}

/// Send history for a throttled destination domain
#[derive(Debug, Default)]
struct DomainWindow {
    last_send: Option<Instant>,
    last_token: u64,
}

/// A granted send slot
#[derive(Debug, Clone)]
pub struct Reservation {
    pub account: Account,
    pub domain: Domain,
    pub(crate) at: Instant,
    token: u64,
    day: NaiveDate,
    previous_send: Option<Instant>,
    previous_domain_send: Option<Option<Instant>>,
}

/// Snapshot of an account's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateUsage {
    pub sent_today: u32,
    pub in_burst_window: usize,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    accounts: DashMap<AccountId, Arc<parking_lot::Mutex<AccountWindow>>>,
    domains: DashMap<Domain, Arc<parking_lot::Mutex<DomainWindow>>>,
    tokens: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn account_window(&self, id: &AccountId) -> Arc<parking_lot::Mutex<AccountWindow>> {
        self.accounts.entry(id.clone()).or_default().clone()
    }

    fn domain_window(&self, domain: &Domain) -> Arc<parking_lot::Mutex<DomainWindow>> {
        self.domains.entry(domain.clone()).or_default().clone()
    }

    /// Reserve a send slot on `account` for a message to `domain`
    ///
    /// # Errors
    ///
    /// Returns the first limit that refuses the send; nothing is recorded in
    /// that case.
    pub fn reserve(
        &self,
        account: &Account,
        domain: &Domain,
        config: &EngineConfig,
        now: Instant,
        today: NaiveDate,
    ) -> Result<Reservation, RateLimited> {
        let window = self.account_window(&account.id);
        let mut window = window.lock();

        window.roll_day(today);
        let cap = config.daily_cap(account.warmup_daily_limit);
        if window.sent_today >= cap {
            return Err(RateLimited::DailyCap(cap));
        }

        let burst_window = config.burst_window();
        window.prune(now, burst_window);
        if window.burst.len() >= config.burst_limit as usize {
            let wait = window.burst.front().map_or(Duration::ZERO, |oldest| {
                burst_window.saturating_sub(now.duration_since(*oldest))
            });
            return Err(RateLimited::Burst(wait));
        }

        if let Some(last) = window.last_send {
            let elapsed = now.duration_since(last);
            let spacing = config.min_spacing();
            if elapsed < spacing {
                return Err(RateLimited::Spacing(spacing - elapsed));
            }
        }

        let token = self.tokens.fetch_add(1, Ordering::Relaxed) + 1;

        let previous_domain_send = match config.domain_spacing(domain) {
            Some(spacing) => {
                let domain_window = self.domain_window(domain);
                let mut domain_window = domain_window.lock();
                if let Some(last) = domain_window.last_send {
                    let elapsed = now.duration_since(last);
                    if elapsed < spacing {
                        tracing::trace!(%domain, account = %account.id, "Destination domain spacing not elapsed");
                        return Err(RateLimited::Domain(spacing - elapsed));
                    }
                }
                domain_window.last_token = token;
                Some(domain_window.last_send.replace(now))
            }
            None => None,
        };

        let previous_send = window.last_send.replace(now);
        window.last_token = token;
        window.burst.push_back(now);
        window.sent_today += 1;

        Ok(Reservation {
            account: account.clone(),
            domain: domain.clone(),
            at: now,
            token,
            day: today,
            previous_send,
            previous_domain_send,
        })
    }

    /// Give back a reservation whose send never left the process.
    ///
    /// Counters are always rolled back; the last-send timestamps are restored
    /// only if no newer reservation has replaced them.
    pub fn release(&self, reservation: &Reservation) {
        if let Some(window) = self.accounts.get(&reservation.account.id).map(|w| w.clone()) {
            let mut window = window.lock();
            if let Some(position) = window.burst.iter().rposition(|at| *at == reservation.at) {
                window.burst.remove(position);
            }
            if window.day == Some(reservation.day) {
                window.sent_today = window.sent_today.saturating_sub(1);
            }
            if window.last_token == reservation.token {
                window.last_send = reservation.previous_send;
            }
        }

        if let Some(previous) = reservation.previous_domain_send
            && let Some(window) = self.domains.get(&reservation.domain).map(|w| w.clone())
        {
            let mut window = window.lock();
            if window.last_token == reservation.token {
                window.last_send = previous;
            }
        }

        tracing::debug!(
            account = %reservation.account.id,
            domain = %reservation.domain,
            "Released rate limit reservation"
        );
    }

    /// Current counters for an account, if it has ever been reserved
    #[must_use]
    pub fn usage(&self, id: &AccountId, now: Instant, config: &EngineConfig) -> Option<RateUsage> {
        self.accounts.get(id).map(|window| {
            let mut window = window.lock();
            window.prune(now, config.burst_window());
            RateUsage {
                sent_today: window.sent_today,
                in_burst_window: window.burst.len(),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{account::tests::account, config::DomainRateLimit};

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn domain() -> Domain {
        Domain::new("x.com")
    }

    #[test]
    fn test_spacing_between_sends() {
        let limiter = RateLimiter::new();
        let config = EngineConfig::default();
        let acct = account("acct1");
        let start = Instant::now();

        limiter.reserve(&acct, &domain(), &config, start, today()).unwrap();

        let refused = limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(30), today())
            .unwrap_err();
        assert_eq!(refused, RateLimited::Spacing(Duration::from_secs(30)));

        limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(60), today())
            .unwrap();
    }

    #[test]
    fn test_spacing_holds_across_many_sends() {
        let limiter = RateLimiter::new();
        let config = EngineConfig {
            per_domain_per_minute: 6.0,
            burst_limit: 1000,
            daily_limit: 1000,
            ..EngineConfig::default()
        };
        let acct = account("acct1");
        let start = Instant::now();

        let mut granted = Vec::new();
        for step in 0..300 {
            let now = start + Duration::from_secs(step);
            if let Ok(reservation) = limiter.reserve(&acct, &domain(), &config, now, today()) {
                granted.push(reservation.at);
            }
        }

        assert_eq!(granted.len(), 30);
        for pair in granted.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_burst_ceiling() {
        let limiter = RateLimiter::new();
        let config = EngineConfig::default();
        let acct = account("acct1");
        let start = Instant::now();

        for minute in 0..3 {
            limiter
                .reserve(&acct, &domain(), &config, start + Duration::from_secs(60 * minute), today())
                .unwrap();
        }

        let refused = limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(180), today())
            .unwrap_err();
        assert_eq!(refused, RateLimited::Burst(Duration::from_secs(420)));

        limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(600), today())
            .unwrap();
    }

    #[test]
    fn test_daily_cap_uses_warmup() {
        let limiter = RateLimiter::new();
        let config = EngineConfig {
            per_domain_per_minute: 60.0,
            burst_limit: 1000,
            ..EngineConfig::default()
        };
        let mut acct = account("young");
        acct.warmup_daily_limit = Some(5);
        let start = Instant::now();

        for second in 0..20 {
            limiter
                .reserve(&acct, &domain(), &config, start + Duration::from_secs(second), today())
                .unwrap();
        }
        let refused = limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(20), today())
            .unwrap_err();
        assert_eq!(refused, RateLimited::DailyCap(20));

        let tomorrow = today().succ_opt().unwrap();
        limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(21), tomorrow)
            .unwrap();
    }

    #[test]
    fn test_domain_spacing_shared_across_accounts() {
        let limiter = RateLimiter::new();
        let mut config = EngineConfig::default();
        config
            .domain_limits
            .insert("gmail.com".to_string(), DomainRateLimit { per_minute: 0.5 });
        let gmail = Domain::new("gmail.com");
        let start = Instant::now();

        limiter.reserve(&account("acct1"), &gmail, &config, start, today()).unwrap();

        let refused = limiter
            .reserve(&account("acct2"), &gmail, &config, start + Duration::from_secs(60), today())
            .unwrap_err();
        assert_eq!(refused, RateLimited::Domain(Duration::from_secs(60)));

        limiter
            .reserve(&account("acct2"), &domain(), &config, start + Duration::from_secs(60), today())
            .unwrap();
    }

    #[test]
    fn test_release_restores_slot() {
        let limiter = RateLimiter::new();
        let config = EngineConfig::default();
        let acct = account("acct1");
        let start = Instant::now();

        let reservation = limiter.reserve(&acct, &domain(), &config, start, today()).unwrap();
        limiter.release(&reservation);

        let usage = limiter.usage(&acct.id, start, &config).unwrap();
        assert_eq!(usage.sent_today, 0);
        assert_eq!(usage.in_burst_window, 0);
        limiter
            .reserve(&acct, &domain(), &config, start + Duration::from_secs(1), today())
            .unwrap();
    }

    #[test]
    fn test_release_keeps_newer_reservation() {
        let limiter = RateLimiter::new();
        let config = EngineConfig::default();
        let acct = account("acct1");
        let start = Instant::now();

        let first = limiter.reserve(&acct, &domain(), &config, start, today()).unwrap();
        let later = start + Duration::from_secs(60);
        limiter.reserve(&acct, &domain(), &config, later, today()).unwrap();

        limiter.release(&first);

        let refused = limiter
            .reserve(&acct, &domain(), &config, later + Duration::from_secs(10), today())
            .unwrap_err();
        assert_eq!(refused, RateLimited::Spacing(Duration::from_secs(50)));
        assert_eq!(limiter.usage(&acct.id, later, &config).unwrap().sent_today, 1);
    }
}
