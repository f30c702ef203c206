//! Engine test harness
//!
//! # Example
//!
//! ```no_run
//! let harness = EngineHarness::builder()
//!     .with_accounts(&["acct1", "acct2"])
//!     .build();
//!
//! harness.engine().enqueue(lead, "administrative", None, Priority::Normal)?;
//! harness.start();
//! tokio::time::sleep(Duration::from_secs(60)).await;
//! harness.shutdown().await;
//! ```
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::sync::Arc;

use herald_common::Signal;
use herald_dispatch::{
    Account, AccountId, DispatchError, Endpoint, Engine, EngineConfig, Security,
    subject::SubjectGenerator,
};
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};

use super::mock_transport::MockTransport;

pub struct EngineHarness {
    engine: Engine,
    transport: Arc<MockTransport>,
    shutdown_tx: broadcast::Sender<Signal>,
    handle: Mutex<Option<JoinHandle<Result<(), DispatchError>>>>,
}

impl EngineHarness {
    #[must_use]
    pub fn builder() -> EngineHarnessBuilder {
        EngineHarnessBuilder::default()
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    /// Start workers and the quota monitor in the background
    pub fn start(&self) {
        let engine = self.engine.clone();
        let shutdown = self.shutdown_tx.subscribe();
        *self.handle.lock() = Some(tokio::spawn(async move { engine.serve(shutdown).await }));
    }

    /// Signal shutdown and wait for the engine to stop
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(Signal::Shutdown);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .expect("engine task panicked")
                .expect("engine returned an error");
        }
    }
}

pub struct EngineHarnessBuilder {
    accounts: Vec<Account>,
    config: EngineConfig,
    transport: MockTransport,
    seed: u64,
}

impl Default for EngineHarnessBuilder {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            config: EngineConfig {
                workers: 1,
                ..EngineConfig::default()
            },
            transport: MockTransport::new(),
            seed: 7,
        }
    }
}

impl EngineHarnessBuilder {
    #[must_use]
    pub fn with_accounts(mut self, ids: &[&str]) -> Self {
        self.accounts.extend(ids.iter().map(|id| account(id)));
        self
    }

    #[must_use]
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Adjust the transport's script before the engine starts
    #[must_use]
    pub fn with_transport(self, configure: impl FnOnce(&MockTransport)) -> Self {
        configure(&self.transport);
        self
    }

    #[must_use]
    pub fn build(self) -> EngineHarness {
        self.try_build().expect("failed to build engine")
    }

    pub fn try_build(self) -> Result<EngineHarness, DispatchError> {
        let transport = Arc::new(self.transport);
        let engine = Engine::with_subjects(
            self.config,
            self.accounts,
            Arc::clone(&transport) as Arc<dyn herald_dispatch::Transport>,
            SubjectGenerator::with_seed(self.seed),
        )?;
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(EngineHarness {
            engine,
            transport,
            shutdown_tx,
            handle: Mutex::new(None),
        })
    }
}

#[must_use]
pub fn account(id: &str) -> Account {
    Account {
        id: AccountId::from(id),
        address: format!("{id}@sender.example"),
        endpoint: Endpoint {
            host: "smtp.sender.example".to_string(),
            port: 465,
            security: Security::Tls,
        },
        credential_ref: format!("{}_PASSWORD", id.to_uppercase()),
        warmup_daily_limit: None,
    }
}
