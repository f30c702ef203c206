//! The dispatch engine
//!
//! [`Engine`] owns every piece of runtime state: configuration, queue,
//! account pool, health table, lead registry and subject records. Nothing is
//! global, so several engines can live in one process (tests do this).

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use chrono::Utc;
use herald_common::{Signal, audit, internal, tracing};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::{
    account::{Account, AccountId, AccountStatus, AccountStatusReport, HealthTable},
    config::{ConfigPatch, EngineConfig, SharedConfig},
    error::{ConfigError, DispatchError},
    pool::AccountPool,
    processor,
    queue::DispatchQueue,
    quota::QuotaMonitor,
    reply::{ReplyPolicy, Stage},
    subject::SubjectGenerator,
    transport::Transport,
    types::{DeadLetter, Job, JobId, JobState, Lead, LeadId, Priority, QueueDepth},
};

/// Counters since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub enqueued: u64,
    pub sent: u64,
    /// Failed attempts that were scheduled for another try
    pub retried: u64,
    pub dead_lettered: u64,
    /// Jobs dropped because their lead replied
    pub cancelled: u64,
    /// Times a worker found no account able to send
    pub no_account: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) dead_lettered: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) no_account: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            no_account: self.no_account.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the engine handle, its workers and the monitor
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) config: Arc<SharedConfig>,
    pub(crate) queue: Arc<DispatchQueue>,
    pub(crate) pool: AccountPool,
    pub(crate) health: Arc<HealthTable>,
    pub(crate) monitor: QuotaMonitor,
    pub(crate) replies: ReplyPolicy,
    pub(crate) subjects: SubjectGenerator,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dead_letters: Mutex<VecDeque<DeadLetter>>,
    pub(crate) counters: Counters,
    pub(crate) no_account_streak: AtomicU32,
}

impl EngineState {
    /// Record a terminal failure and retain the job for inspection
    pub(crate) fn dead_letter(&self, mut job: Job, reason: String) {
        job.state = JobState::Dead;
        self.queue.complete(&job.id);

        tracing::warn!(
            job_id = %job.id,
            lead_id = %job.lead.id,
            attempts = job.attempts,
            reason = %reason,
            "Job dead-lettered"
        );
        audit::log_send_dead_lettered(
            &job.id.to_string(),
            job.lead.id.as_str(),
            &job.lead.address,
            &reason,
            job.attempts,
        );

        let capacity = self.config.load().dead_letter_capacity;
        let mut dead_letters = self.dead_letters.lock();
        while dead_letters.len() >= capacity {
            dead_letters.pop_front();
        }
        dead_letters.push_back(DeadLetter {
            job,
            reason,
            dead_at: Utc::now(),
        });
        drop(dead_letters);

        Counters::bump(&self.counters.dead_lettered);
    }
}

/// Handle to a running or runnable dispatch engine
#[derive(Debug, Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl Engine {
    /// Create an engine over `accounts`, sending through `transport`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoAccounts`] if `accounts` is empty, or a
    /// configuration error if `config` is invalid.
    pub fn new(
        config: EngineConfig,
        accounts: Vec<Account>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DispatchError> {
        Self::with_subjects(config, accounts, transport, SubjectGenerator::new())
    }

    /// Like [`Engine::new`], with a caller-supplied subject generator
    ///
    /// # Errors
    ///
    /// See [`Engine::new`].
    pub fn with_subjects(
        config: EngineConfig,
        accounts: Vec<Account>,
        transport: Arc<dyn Transport>,
        subjects: SubjectGenerator,
    ) -> Result<Self, DispatchError> {
        let queue = Arc::new(DispatchQueue::new(config.queue.clone()));
        let config = Arc::new(SharedConfig::new(config)?);
        let health = Arc::new(HealthTable::new(&accounts));
        let pool = AccountPool::new(accounts, Arc::clone(&health))?;
        let monitor = QuotaMonitor::new(
            pool.accounts().to_vec().into(),
            Arc::clone(&health),
            Arc::clone(&transport),
            Arc::clone(&config),
        );

        internal!(
            level = INFO,
            "Dispatch engine created with {} accounts",
            pool.accounts().len()
        );

        Ok(Self {
            state: Arc::new(EngineState {
                config,
                queue,
                pool,
                health,
                monitor,
                replies: ReplyPolicy::new(),
                subjects,
                transport,
                dead_letters: Mutex::new(VecDeque::new()),
                counters: Counters::default(),
                no_account_streak: AtomicU32::new(0),
            }),
        })
    }

    /// Queue a send for `lead`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::LeadSuppressed`] if the lead has replied and
    /// [`DispatchError::InvalidAddress`] if its address has no domain.
    pub fn enqueue(
        &self,
        lead: Lead,
        intent: impl Into<String>,
        body: Option<String>,
        priority: Priority,
    ) -> Result<JobId, DispatchError> {
        if self.state.replies.is_human_mode(&lead.id) {
            return Err(DispatchError::LeadSuppressed(lead.id));
        }
        if lead.domain().is_none() {
            return Err(DispatchError::InvalidAddress(lead.address));
        }

        self.state.replies.observe(&lead);
        let job = Job::new(lead, intent, body, priority);
        let lead_id = job.lead.id.clone();
        let id = self.state.queue.enqueue(job);
        Counters::bump(&self.state.counters.enqueued);

        tracing::debug!(job_id = %id, lead_id = %lead_id, ?priority, "Job enqueued");
        Ok(id)
    }

    #[must_use]
    pub fn queue_depth(&self) -> QueueDepth {
        self.state.queue.depth()
    }

    #[must_use]
    pub fn account_statuses(&self) -> Vec<AccountStatusReport> {
        self.state.health.reports(self.state.pool.accounts())
    }

    /// Probe every account now, outside the monitor's schedule
    pub async fn probe_accounts(&self) -> Vec<(AccountId, AccountStatus)> {
        self.state.monitor.run_cycle().await
    }

    /// Apply a configuration patch atomically
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the current configuration in force, if the
    /// patched configuration is invalid.
    pub fn update_config(&self, patch: ConfigPatch) -> Result<Arc<EngineConfig>, ConfigError> {
        match self.state.config.update(patch) {
            Ok(config) => {
                internal!(level = INFO, "Engine configuration updated");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected configuration update");
                Err(e)
            }
        }
    }

    /// Record that `lead` replied. Its waiting jobs are cancelled and further
    /// enqueues are refused. Returns the number of cancelled jobs.
    pub fn on_reply(&self, lead: &LeadId) -> usize {
        self.state.replies.on_reply(lead, Utc::now());
        let cancelled = self.state.queue.cancel(lead);
        self.state
            .counters
            .cancelled
            .fetch_add(cancelled as u64, Ordering::Relaxed);

        audit::log_lead_replied(lead.as_str(), cancelled);
        cancelled
    }

    #[must_use]
    pub fn lead_stage(&self, lead: &LeadId) -> Stage {
        self.state
            .replies
            .stage_of(lead, self.config().follow_up_wait(), Utc::now())
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.state.counters.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> Arc<EngineConfig> {
        self.state.config.load()
    }

    /// Run the quota monitor and the worker pool until shutdown.
    ///
    /// Workers finish the job they hold before exiting; waiting and delayed
    /// jobs are dropped with the engine.
    ///
    /// # Errors
    ///
    /// Does not currently fail.
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        let workers = self.config().workers;
        internal!(level = INFO, "Dispatch engine starting {workers} workers");

        let mut tasks = JoinSet::new();

        let state = Arc::clone(&self.state);
        let monitor_shutdown = shutdown.resubscribe();
        tasks.spawn(async move { state.monitor.serve(monitor_shutdown).await });

        for worker in 0..workers {
            let state = Arc::clone(&self.state);
            let worker_shutdown = shutdown.resubscribe();
            tasks.spawn(processor::serve_worker(worker, state, worker_shutdown));
        }
        drop(shutdown);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Dispatch task failed");
            }
        }

        internal!(level = INFO, "Dispatch engine stopped");
        Ok(())
    }
}
