//! PostgreSQL driver adapter.
//!
//! A health ping is a full connect plus `SELECT 1`. Driver errors are
//! mapped onto [`FailureSignature`] so the generic retry policy can decide
//! whether to keep waiting.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};

use crate::config::DatabaseConfig;
use crate::readiness::{Connector, FailureSignature, PingError};

/// Connection parameters for the provisioned database.
#[derive(Clone)]
pub struct PgConnector {
    host: String,
    port: u16,
    user: String,
    password: SecretString,
    dbname: String,
    connect_timeout: Duration,
}

impl std::fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("dbname", &self.dbname)
            .finish()
    }
}

impl PgConnector {
    pub fn new(host: impl Into<String>, port: u16, db: &DatabaseConfig) -> Self {
        Self {
            host: host.into(),
            port,
            user: db.user.clone(),
            password: db.password.clone(),
            dbname: db.dbname.clone(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Same target, different role.
    pub fn with_credentials(&self, user: impl Into<String>, password: SecretString) -> Self {
        Self {
            user: user.into(),
            password,
            ..self.clone()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Connection string with the password masked, for log lines.
    pub fn display_url(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }

    /// Open a new connection and drive it on a background task.
    pub async fn connect(&self) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(self.password.expose_secret())
            .dbname(&self.dbname)
            .connect_timeout(self.connect_timeout);

        let (client, connection) = config.connect(NoTls).await?;
        let label = self.display_url();
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("Connection {} closed: {}", label, e);
            }
        });
        Ok((client, task))
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn ping(&self) -> Result<PgSession, PingError> {
        let (client, task) = self.connect().await.map_err(ping_error)?;
        if let Err(e) = client.simple_query("SELECT 1").await {
            task.abort();
            return Err(ping_error(e));
        }
        Ok(PgSession {
            client,
            task,
            connector: self.clone(),
        })
    }
}

/// An open, verified connection handed to the workload.
pub struct PgSession {
    client: Client,
    task: JoinHandle<()>,
    connector: PgConnector,
}

impl PgSession {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Parameters used to open this session; use them to open more.
    pub fn connector(&self) -> &PgConnector {
        &self.connector
    }

    /// Split into the client and its connection task.
    pub fn into_parts(self) -> (Client, JoinHandle<()>) {
        (self.client, self.task)
    }

    /// Close the connection and wait briefly for the driver task to finish.
    pub async fn close(self) {
        drop(self.client);
        if tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .is_err()
        {
            tracing::debug!("Connection task did not exit after close");
        }
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("url", &self.connector.display_url())
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

/// Map a driver error onto the recognised failure signatures.
pub fn signature_of(err: &tokio_postgres::Error) -> FailureSignature {
    if let Some(code) = err.code() {
        return signature_for_code(code);
    }
    if err.is_closed() {
        return FailureSignature::EndOfStream;
    }

    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return signature_for_io(io);
        }
        source = e.source();
    }
    FailureSignature::Other
}

/// `57P03` ("the database system is starting up") is the only retryable code.
pub fn signature_for_code(code: &SqlState) -> FailureSignature {
    if *code == SqlState::CANNOT_CONNECT_NOW {
        FailureSignature::StartingUp
    } else {
        FailureSignature::Other
    }
}

pub fn signature_for_io(err: &std::io::Error) -> FailureSignature {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset => FailureSignature::ConnectionReset,
        std::io::ErrorKind::UnexpectedEof => FailureSignature::EndOfStream,
        _ => FailureSignature::Other,
    }
}

fn ping_error(err: tokio_postgres::Error) -> PingError {
    let signature = signature_of(&err);
    let detail = match err.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => err.to_string(),
    };
    PingError::new(signature, detail).with_source(err)
}
