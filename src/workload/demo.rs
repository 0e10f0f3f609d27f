//! Two transactions that deadlock on a unique index and a table lock.
//!
//! ```text
//! tx1 (role test)                     tx0 (admin)
//! INSERT test1@example.com
//!                                     INSERT test2@example.com
//!                                     ALTER TABLE users ...   (waits on tx1)
//! INSERT test2@example.com (waits on tx0)
//!                 ── deadlock, the server aborts tx0 ──
//! COMMIT
//! ```
//!
//! A background monitor prints `pg_stat_activity` while this runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use postgres_protocol::escape::{escape_identifier, escape_literal};
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;

use crate::postgres::{PgConnector, PgSession};
use crate::workload::Workload;

const INSERT_USER: &str = "INSERT INTO users(first_name, last_name, email) \
                           VALUES ($1, $2, $3) RETURNING id";

/// Outcome of [`ConflictDemo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSummary {
    /// Rows in `users` after both transactions finished.
    pub committed_rows: i64,
    /// Why the admin transaction failed, if it did.
    pub aborted: Option<String>,
}

/// Schema setup followed by two conflicting transactions.
#[derive(Debug, Clone)]
pub struct ConflictDemo {
    /// Role created for the second connection.
    pub test_user: String,
    pub test_password: SecretString,
    /// How often the activity monitor samples `pg_stat_activity`.
    pub monitor_interval: Duration,
    /// Head start given to tx0 before tx1 issues its conflicting insert.
    pub conflict_delay: Duration,
}

impl Default for ConflictDemo {
    fn default() -> Self {
        Self {
            test_user: "test".to_string(),
            test_password: SecretString::from("test"),
            monitor_interval: Duration::from_secs(1),
            conflict_delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl Workload<PgSession> for ConflictDemo {
    type Output = DemoSummary;

    async fn run(&self, session: PgSession) -> anyhow::Result<DemoSummary> {
        let connector = session.connector().clone();
        let (admin, admin_task) = session.into_parts();
        let admin = Arc::new(admin);

        self.setup_schema(&admin).await.context("schema setup")?;

        let stop_monitor = CancellationToken::new();
        let _monitor_guard = stop_monitor.clone().drop_guard();
        let monitor = spawn_activity_monitor(
            connector.clone(),
            self.monitor_interval,
            stop_monitor.clone(),
        );

        let test = connector.with_credentials(&self.test_user, self.test_password.clone());
        let (tx1, tx1_task) = test
            .connect()
            .await
            .with_context(|| format!("connect as {}", self.test_user))?;

        admin.batch_execute("BEGIN").await.context("tx0 begin")?;
        tx1.batch_execute("BEGIN").await.context("tx1 begin")?;

        tx1.execute(INSERT_USER, &[&"test1", &"test1", &"test1@example.com"])
            .await
            .context("tx1-1")?;

        let tx0_client = admin.clone();
        let tx0 = tokio::spawn(async move {
            tx0_client
                .execute(INSERT_USER, &[&"test2", &"test2", &"test2@example.com"])
                .await
                .map_err(|e| format!("tx0-1: {e}"))?;
            // Needs an exclusive lock that tx1 holds.
            tx0_client
                .batch_execute("ALTER TABLE users ADD COLUMN counter TEXT")
                .await
                .map_err(|e| format!("tx0-2: {e}"))?;
            Ok::<(), String>(())
        });

        tokio::time::sleep(self.conflict_delay).await;

        // Same email as tx0's pending row.
        tx1.execute(INSERT_USER, &[&"test3", &"test3", &"test2@example.com"])
            .await
            .context("tx1-2")?;
        tx1.batch_execute("COMMIT").await.context("tx1 commit")?;
        drop(tx1);
        let _ = tx1_task.await;

        let aborted = match tx0.await {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => {
                tracing::warn!("Admin transaction failed: {}", reason);
                Some(reason)
            }
            Err(e) => Some(format!("tx0 task failed: {e}")),
        };

        admin.batch_execute("ROLLBACK").await.context("tx0 rollback")?;

        let committed_rows: i64 = admin
            .query_one("SELECT count(*) FROM users", &[])
            .await
            .context("count users")?
            .try_get(0)?;

        stop_monitor.cancel();
        let _ = monitor.await;

        drop(admin);
        let _ = tokio::time::timeout(Duration::from_secs(5), admin_task).await;

        tracing::info!(committed_rows, aborted = aborted.is_some(), "Demo finished");
        Ok(DemoSummary {
            committed_rows,
            aborted,
        })
    }
}

impl ConflictDemo {
    fn create_role_sql(&self) -> String {
        format!(
            "CREATE USER {} WITH ENCRYPTED PASSWORD {}",
            escape_identifier(&self.test_user),
            escape_literal(self.test_password.expose_secret())
        )
    }

    async fn setup_schema(&self, client: &Client) -> Result<(), tokio_postgres::Error> {
        client
            .batch_execute(
                "CREATE TABLE users (
                    id SERIAL PRIMARY KEY,
                    first_name TEXT,
                    last_name TEXT,
                    email TEXT,
                    UNIQUE (email)
                )",
            )
            .await?;

        let user = escape_identifier(&self.test_user);
        client.batch_execute(&self.create_role_sql()).await?;
        client
            .batch_execute(&format!(
                "GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO {user};
                 GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public TO {user};"
            ))
            .await?;

        tracing::info!("Created table users and role {}", self.test_user);
        Ok(())
    }
}

/// One row of `pg_stat_activity`.
#[derive(Debug, Clone)]
pub struct Activity {
    pub pid: i32,
    pub user: Option<String>,
    pub application: Option<String>,
    pub client_addr: Option<String>,
    pub wait_event_type: Option<String>,
    pub state: Option<String>,
    pub query: Option<String>,
}

async fn sample_activity(client: &Client) -> Result<Vec<Activity>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT pid, usename::text, application_name, client_addr::text, \
                    wait_event_type, state, query \
             FROM pg_stat_activity WHERE datname = current_database()",
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| -> Result<Activity, tokio_postgres::Error> {
            Ok(Activity {
                pid: row.try_get(0)?,
                user: row.try_get(1)?,
                application: row.try_get(2)?,
                client_addr: row.try_get(3)?,
                wait_event_type: row.try_get(4)?,
                state: row.try_get(5)?,
                query: row.try_get(6)?,
            })
        })
        .collect()
}

/// Print `pg_stat_activity` every `interval` on a dedicated connection
/// until `stop` fires.
fn spawn_activity_monitor(
    connector: PgConnector,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (client, task) = match connector.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Activity monitor could not connect: {}", e);
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => match sample_activity(&client).await {
                    Ok(activity) => {
                        tracing::info!("pg_stat_activity: {} connection(s)", activity.len());
                        for a in &activity {
                            tracing::info!(
                                pid = a.pid,
                                user = a.user.as_deref().unwrap_or(""),
                                application = a.application.as_deref().unwrap_or(""),
                                client = a.client_addr.as_deref().unwrap_or(""),
                                waiting = a.wait_event_type.as_deref().unwrap_or(""),
                                state = a.state.as_deref().unwrap_or(""),
                                "{}",
                                a.query.as_deref().unwrap_or("")
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Activity sample failed: {}", e);
                        break;
                    }
                },
            }
        }

        tracing::debug!("Stopping activity monitor");
        drop(client);
        let _ = task.await;
    })
}
