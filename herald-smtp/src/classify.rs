//! Mapping of SMTP failures onto the dispatch error taxonomy

use herald_dispatch::{PermanentError, SendError, TransientError};

/// Words a provider uses when it throttles an account
const QUOTA_WORDS: &[&str] = &[
    "quota",
    "limit",
    "limits",
    "limited",
    "rate",
    "ratelimit",
    "ratelimited",
];

fn mentions_quota(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| {
            let word = word.to_ascii_lowercase();
            QUOTA_WORDS.contains(&word.as_str())
        })
}

/// Classify a failed SMTP exchange by reply code and reply text.
///
/// A reply that mentions quota or rate limits blocks the account whatever
/// its code. Without a reply code the server never answered and nothing is
/// assumed to have been transmitted.
#[must_use]
pub fn classify(code: Option<u16>, message: &str) -> SendError {
    let message = message.trim().to_string();

    if mentions_quota(&message) {
        return SendError::Quota(message);
    }

    match code {
        Some(530 | 534 | 535) => PermanentError::AuthenticationFailed(message).into(),
        Some(550 | 551 | 553) => PermanentError::InvalidRecipient(message).into(),
        Some(500..=599) => PermanentError::MessageRejected(message).into(),
        Some(_) => TransientError::ServerBusy(message).into(),
        None => TransientError::ConnectionFailed(message).into(),
    }
}

/// Classify an error reported by lettre
pub(crate) fn classify_lettre(error: &lettre::transport::smtp::Error) -> SendError {
    let message = error.to_string();

    if error.is_timeout() {
        return TransientError::Timeout(message).into();
    }

    let code = error
        .status()
        .and_then(|code| code.to_string().parse::<u16>().ok());

    if code.is_none() && (error.is_transient() || error.is_permanent()) {
        // Reply without a parseable code
        return if mentions_quota(&message) {
            SendError::Quota(message)
        } else if error.is_permanent() {
            PermanentError::MessageRejected(message).into()
        } else {
            TransientError::ServerBusy(message).into()
        };
    }

    if code.is_none() {
        return if before_transmission(error) {
            TransientError::ConnectionFailed(message).into()
        } else {
            TransientError::Interrupted(message).into()
        };
    }

    classify(code, &message)
}

/// Only failures to open the connection or negotiate TLS are known to have
/// happened before any part of the message was written.
fn before_transmission(error: &lettre::transport::smtp::Error) -> bool {
    error.is_tls() || error.to_string().starts_with("Connection error")
}
