//! Scriptable SMTP submission server for transport tests
//!
//! Speaks just enough SMTP for lettre to authenticate and submit a message,
//! with a configurable reply for each stage of the exchange.

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// Command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content between DATA and the terminating dot
    MessageContent(String),
    Noop,
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    capabilities: Vec<String>,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_end_response: SmtpResponse,
    drop_after_data: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock submission server"),
            capabilities: vec![
                "localhost".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "SIZE 10000000".to_string(),
            ],
            auth_response: SmtpResponse::new(235, "2.7.0 Authentication successful"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_end_response: SmtpResponse::new(250, "OK: queued"),
            drop_after_data: false,
        }
    }
}

fn ehlo_bytes(capabilities: &[String]) -> Vec<u8> {
    let mut response = String::new();
    let last = capabilities.len().saturating_sub(1);

    for (i, capability) in capabilities.iter().enumerate() {
        let separator = if i < last { '-' } else { ' ' };
        let _ = write!(&mut response, "250{separator}{capability}\r\n");
    }

    response.into_bytes()
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// The content of every message accepted so far
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let command_line = line.trim();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));
            let argument = argument.to_string();

            let (response, command) = match verb.to_uppercase().as_str() {
                "EHLO" => (ehlo_bytes(&config.capabilities), SmtpCommand::Ehlo(argument)),
                "AUTH" => (config.auth_response.to_bytes(), SmtpCommand::Auth(argument)),
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument),
                ),
                "RCPT" => (
                    config.rcpt_to_response.to_bytes(),
                    SmtpCommand::RcptTo(argument),
                ),
                "DATA" => (
                    SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes(),
                    SmtpCommand::Data,
                ),
                "NOOP" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Noop),
                "RSET" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Rset),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer
                        .write_all(&SmtpResponse::new(221, "Bye").to_bytes())
                        .await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(command_line.to_string()),
                ),
            };

            commands.write().await.push(command.clone());
            writer.write_all(&response).await?;
            writer.flush().await?;

            if command == SmtpCommand::Data {
                let mut content = String::new();
                let mut data_line = String::new();

                loop {
                    data_line.clear();
                    if reader.read_line(&mut data_line).await? == 0 {
                        return Ok(());
                    }
                    if data_line.trim_end() == "." {
                        break;
                    }
                    content.push_str(&data_line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                if config.drop_after_data {
                    return Ok(());
                }
                writer
                    .write_all(&config.data_end_response.to_bytes())
                    .await?;
                writer.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Close the connection once the message content arrives, without replying
    #[must_use]
    pub fn with_drop_after_data(mut self) -> Self {
        self.config.drop_after_data = true;
        self
    }

    /// Bind to a free local port and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if no port can be bound
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server_commands = Arc::clone(&commands);
        let server_shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                let config = Arc::clone(&config);
                let commands = Arc::clone(&server_commands);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, config, commands).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
        })
    }
}
