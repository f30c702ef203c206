//! Scripted transport for testing dispatch scenarios
//!
//! Every account has a script of outcomes consumed one per send; when the
//! script is empty the account's default outcome applies. Every attempt is
//! recorded together with the (paused) clock reading at which it happened.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use herald_dispatch::{
    Account, AccountId, OutboundMessage, SendError, SendReceipt, Transport,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// What a scripted send or probe does
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Fail(SendError),
    /// Fails only after the send has been in flight for a while
    FailAfter(Duration, SendError),
    /// Never completes within any sane timeout
    Hang,
}

/// A send attempt observed by the transport
#[derive(Debug, Clone)]
pub struct Attempt {
    pub account: AccountId,
    pub message: OutboundMessage,
    pub at: Instant,
    pub accepted: bool,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<AccountId, VecDeque<Outcome>>>,
    defaults: Mutex<HashMap<AccountId, Outcome>>,
    verify: Mutex<HashMap<AccountId, Outcome>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next sends through `account`
    pub fn script(&self, account: &str, outcomes: impl IntoIterator<Item = Outcome>) {
        self.scripts
            .lock()
            .entry(AccountId::from(account))
            .or_default()
            .extend(outcomes);
    }

    /// Outcome for sends through `account` once its script is exhausted
    pub fn default_outcome(&self, account: &str, outcome: Outcome) {
        self.defaults.lock().insert(AccountId::from(account), outcome);
    }

    /// Outcome for health probes of `account`
    pub fn verify_outcome(&self, account: &str, outcome: Outcome) {
        self.verify.lock().insert(AccountId::from(account), outcome);
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<Attempt> {
        self.attempts().into_iter().filter(|a| a.accepted).collect()
    }

    fn next_outcome(&self, account: &AccountId) -> Outcome {
        if let Some(outcome) = self
            .scripts
            .lock()
            .get_mut(account)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        self.defaults
            .lock()
            .get(account)
            .cloned()
            .unwrap_or(Outcome::Accept)
    }
}

async fn resolve(outcome: Outcome) -> Result<(), SendError> {
    match outcome {
        Outcome::Accept => Ok(()),
        Outcome::Fail(e) => Err(e),
        Outcome::FailAfter(delay, e) => {
            tokio::time::sleep(delay).await;
            Err(e)
        }
        Outcome::Hang => {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        account: &Account,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        let outcome = self.next_outcome(&account.id);
        let accepted = matches!(outcome, Outcome::Accept);
        self.attempts.lock().push(Attempt {
            account: account.id.clone(),
            message: message.clone(),
            at: Instant::now(),
            accepted,
        });

        resolve(outcome).await?;
        Ok(SendReceipt { sent_at: Utc::now() })
    }

    async fn verify(&self, account: &Account) -> Result<(), SendError> {
        let outcome = self
            .verify
            .lock()
            .get(&account.id)
            .cloned()
            .unwrap_or(Outcome::Accept);
        resolve(outcome).await
    }
}
