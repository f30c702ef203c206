//! SMTP transport for the herald dispatch engine
//!
//! [`SmtpTransport`] delivers each message through the sending account's own
//! SMTP server and maps server replies onto [`herald_dispatch::SendError`].

mod classify;
pub mod config;
pub mod credentials;
mod transport;

pub use classify::classify;
pub use config::SmtpConfig;
pub use credentials::{CredentialError, CredentialResolver, EnvCredentials, StaticCredentials};
pub use transport::SmtpTransport;
