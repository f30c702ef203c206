//! The message transport seam

use async_trait::async_trait;

use crate::{
    account::Account,
    error::SendError,
    types::{OutboundMessage, SendReceipt},
};

/// Delivers a rendered message through a sending account.
///
/// Implementations classify their own failures into [`SendError`]; the engine
/// never inspects transport-specific error types.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `message` through `account`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure if the message was not accepted.
    async fn send(&self, account: &Account, message: &OutboundMessage)
    -> Result<SendReceipt, SendError>;

    /// Check that `account` can currently send, without sending a message.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Quota`] when the provider reports exhaustion and
    /// any other variant for every other failure.
    async fn verify(&self, account: &Account) -> Result<(), SendError>;
}
