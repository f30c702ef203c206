//! Account health monitoring
//!
//! The [`QuotaMonitor`] periodically verifies every sending account and
//! labels it `Ready`, `Blocked` (provider quota exhausted) or `Error` (any
//! other probe failure). It is the only writer of the health table; workers
//! that hit a quota error report it here instead of writing directly.

use std::sync::Arc;

use chrono::Utc;
use herald_common::{Signal, internal, tracing};
use tokio::task::JoinSet;

use crate::{
    account::{Account, AccountId, AccountStatus, HealthTable},
    config::SharedConfig,
    error::{SendError, TransientError},
    transport::Transport,
};

#[derive(Debug)]
pub struct QuotaMonitor {
    accounts: Arc<[Account]>,
    health: Arc<HealthTable>,
    transport: Arc<dyn Transport>,
    config: Arc<SharedConfig>,
}

impl QuotaMonitor {
    #[must_use]
    pub const fn new(
        accounts: Arc<[Account]>,
        health: Arc<HealthTable>,
        transport: Arc<dyn Transport>,
        config: Arc<SharedConfig>,
    ) -> Self {
        Self {
            accounts,
            health,
            transport,
            config,
        }
    }

    /// Verify a single account and record the result
    pub async fn probe(&self, account: &Account) -> AccountStatus {
        let timeout = self.config.load().probe_timeout();
        let result = verify(Arc::clone(&self.transport), account.clone(), timeout).await;
        let status = classify(&account.id, &result);
        self.record(&account.id, status);
        status
    }

    /// Probe every account concurrently
    pub async fn run_cycle(&self) -> Vec<(AccountId, AccountStatus)> {
        let timeout = self.config.load().probe_timeout();
        let mut probes = JoinSet::new();

        for account in self.accounts.iter() {
            let transport = Arc::clone(&self.transport);
            let account = account.clone();
            probes.spawn(async move {
                let result = verify(transport, account.clone(), timeout).await;
                (account.id, result)
            });
        }

        let mut results = Vec::with_capacity(self.accounts.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, result)) => {
                    let status = classify(&id, &result);
                    self.record(&id, status);
                    results.push((id, status));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Account probe task failed");
                }
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Mark `account` blocked after a send reported quota exhaustion
    pub fn report_quota_exhausted(&self, account: &AccountId, reason: &str) {
        tracing::warn!(account = %account, reason, "Send reported quota exhaustion");
        self.record(account, AccountStatus::Blocked);
    }

    fn record(&self, id: &AccountId, status: AccountStatus) {
        let previous = self.health.set(id, status, Utc::now());
        if previous == Some(status) {
            tracing::debug!(account = %id, %status, "Account status unchanged");
            return;
        }

        match status {
            AccountStatus::Ready => {
                internal!(level = INFO, "Account {id} is READY");
            }
            AccountStatus::Blocked | AccountStatus::Error => {
                tracing::warn!(account = %id, %status, previous = ?previous, "Account excluded from rotation");
            }
        }
    }

    /// Run probe cycles until shutdown. The first cycle runs immediately.
    ///
    /// The interval is re-read from the configuration after every cycle.
    pub async fn serve(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        internal!("Quota monitor starting for {} accounts", self.accounts.len());

        loop {
            let results = self.run_cycle().await;
            let ready = results
                .iter()
                .filter(|(_, status)| *status == AccountStatus::Ready)
                .count();
            tracing::debug!(ready, total = results.len(), "Quota monitor cycle complete");

            let interval = self.config.load().probe_interval();
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Quota monitor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Quota monitor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }
    }
}

async fn verify(
    transport: Arc<dyn Transport>,
    account: Account,
    timeout: std::time::Duration,
) -> Result<(), SendError> {
    tokio::time::timeout(timeout, transport.verify(&account))
        .await
        .unwrap_or_else(|_| {
            Err(TransientError::Timeout(format!(
                "Probe did not complete within {}s",
                timeout.as_secs()
            ))
            .into())
        })
}

fn classify(id: &AccountId, result: &Result<(), SendError>) -> AccountStatus {
    match result {
        Ok(()) => AccountStatus::Ready,
        Err(SendError::Quota(reason)) => {
            tracing::debug!(account = %id, reason, "Probe reported quota exhaustion");
            AccountStatus::Blocked
        }
        Err(e) => {
            tracing::debug!(account = %id, error = %e, "Probe failed");
            AccountStatus::Error
        }
    }
}
