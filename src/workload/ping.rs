use async_trait::async_trait;

use crate::postgres::PgSession;
use crate::workload::Workload;

/// Reads the server version and closes the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionCheck;

#[async_trait]
impl Workload<PgSession> for VersionCheck {
    type Output = String;

    async fn run(&self, session: PgSession) -> anyhow::Result<String> {
        let row = session.client().query_one("SELECT version()", &[]).await?;
        let version: String = row.try_get(0)?;
        tracing::info!("Connected to {}", version);
        session.close().await;
        Ok(version)
    }
}
