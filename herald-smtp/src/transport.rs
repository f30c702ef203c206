//! [`Transport`] implementation over authenticated SMTP submission

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use herald_common::{internal, tracing};
use herald_dispatch::{
    Account, AccountId, OutboundMessage, PermanentError, Security, SendError, SendReceipt,
    TransientError, Transport,
};
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::{classify::classify_lettre, config::SmtpConfig, credentials::CredentialResolver};

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Sends through each account's own SMTP server.
///
/// One lettre transport (and its connection pool) is built per account on
/// first use and reused after that.
#[derive(Debug)]
pub struct SmtpTransport {
    config: SmtpConfig,
    credentials: Arc<dyn CredentialResolver>,
    mailers: DashMap<AccountId, Mailer>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: SmtpConfig, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            config,
            credentials,
            mailers: DashMap::new(),
        }
    }

    fn mailer(&self, account: &Account) -> Result<Mailer, SendError> {
        if let Some(mailer) = self.mailers.get(&account.id) {
            return Ok(mailer.clone());
        }

        let secret = self
            .credentials
            .resolve(account)
            .map_err(|e| PermanentError::AuthenticationFailed(e.to_string()))?;

        let endpoint = &account.endpoint;
        let builder = match endpoint.security {
            Security::Tls => Mailer::relay(&endpoint.host),
            Security::StartTls => Mailer::starttls_relay(&endpoint.host),
            Security::None => Ok(Mailer::builder_dangerous(&endpoint.host)),
        }
        .map_err(|e| classify_lettre(&e))?;

        let mailer = builder
            .port(endpoint.port)
            .credentials(Credentials::new(account.address.clone(), secret))
            .timeout(Some(self.config.timeout()))
            .build();

        internal!(
            "Built SMTP transport for account {} ({}:{}, {:?})",
            account.id,
            endpoint.host,
            endpoint.port,
            endpoint.security
        );

        self.mailers.insert(account.id.clone(), mailer.clone());
        Ok(mailer)
    }

    pub(crate) fn build_message(
        &self,
        account: &Account,
        message: &OutboundMessage,
    ) -> Result<Message, SendError> {
        let sender = account.address.parse::<Address>().map_err(|e| {
            PermanentError::MessageRejected(format!(
                "Account {} has an invalid address {}: {e}",
                account.id, account.address
            ))
        })?;
        let recipient = message.to.parse::<Address>().map_err(|e| {
            PermanentError::InvalidRecipient(format!("{}: {e}", message.to))
        })?;

        Message::builder()
            .from(Mailbox::new(self.config.from_name.clone(), sender))
            .to(Mailbox::new(None, recipient))
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| PermanentError::MessageRejected(e.to_string()).into())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        account: &Account,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        let email = self.build_message(account, message)?;
        let mailer = self.mailer(account)?;

        let response = mailer.send(email).await.map_err(|e| {
            tracing::debug!(account = %account.id, error = %e, "SMTP send failed");
            classify_lettre(&e)
        })?;

        tracing::trace!(
            account = %account.id,
            code = %response.code(),
            "SMTP server accepted message"
        );

        Ok(SendReceipt {
            sent_at: Utc::now(),
        })
    }

    async fn verify(&self, account: &Account) -> Result<(), SendError> {
        let mailer = self.mailer(account)?;

        match mailer.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransientError::ConnectionFailed(format!(
                "SMTP server for account {} did not answer the handshake",
                account.id
            ))
            .into()),
            Err(e) => Err(classify_lettre(&e)),
        }
    }
}
