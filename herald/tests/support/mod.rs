#![allow(dead_code)]

#[path = "../../../herald-smtp/tests/support/mock_server.rs"]
pub mod mock_server;

pub use mock_server::{MockSmtpServer, SmtpCommand};
