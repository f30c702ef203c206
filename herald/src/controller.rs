use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use herald_common::{Signal, audit, audit::AuditConfig, internal, logging, tracing};
use herald_dispatch::{Account, DispatchError, Engine, EngineConfig, Lead, LeadId, Priority};
use herald_smtp::{CredentialResolver, EnvCredentials, SmtpConfig, SmtpTransport};
use serde::Deserialize;
use tokio::sync::broadcast;

/// A lead to enqueue when the service starts
#[derive(Debug, Clone, Deserialize)]
pub struct SeedLead {
    pub id: LeadId,
    pub address: String,
    #[serde(default)]
    pub last_reply_at: Option<DateTime<Utc>>,
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub body: Option<String>,
    /// Anything above zero is sent with high priority
    #[serde(default)]
    pub priority: i64,
}

fn default_intent() -> String {
    "neutral_safe".to_string()
}

impl SeedLead {
    fn lead(&self) -> Lead {
        let lead = Lead::new(self.id.clone(), self.address.clone());
        match self.last_reply_at {
            Some(at) => lead.with_last_reply(at),
            None => lead,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Herald {
    #[serde(default)]
    engine: EngineConfig,
    accounts: Vec<Account>,
    #[serde(default)]
    leads: Vec<SeedLead>,
    #[serde(default)]
    smtp: SmtpConfig,
    #[serde(default)]
    audit: AuditConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Herald {
    /// Build the dispatch engine over SMTP and enqueue the seed leads
    ///
    /// # Errors
    ///
    /// Returns an error if no accounts are configured or the engine
    /// configuration is invalid.
    pub fn engine(
        &self,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Engine, DispatchError> {
        let transport = Arc::new(SmtpTransport::new(self.smtp.clone(), credentials));
        let engine = Engine::new(self.engine.clone(), self.accounts.clone(), transport)?;

        let seeded = self.seed(&engine);
        internal!(
            level = INFO,
            "Seeded {seeded} of {} configured leads",
            self.leads.len()
        );

        Ok(engine)
    }

    fn seed(&self, engine: &Engine) -> usize {
        self.leads
            .iter()
            .filter(|seed| {
                match engine.enqueue(
                    seed.lead(),
                    seed.intent.as_str(),
                    seed.body.clone(),
                    Priority::from(seed.priority),
                ) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(lead_id = %seed.id, error = %e, "Skipping seed lead");
                        false
                    }
                }
            })
            .count()
    }

    /// Run the dispatch engine until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// This function will return an error if the engine cannot be built or
    /// the signal handlers cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        audit::init(self.audit.clone());

        let engine = self.engine(Arc::new(EnvCredentials))?;
        internal!("Controller running");

        let ret = tokio::select! {
            r = engine.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}
