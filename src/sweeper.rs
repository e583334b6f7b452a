// Background retention sweep: periodically deletes rows whose
// `event_timestamp` predates the configured retention horizon. Assumes
// `retention_ms` is far larger than `linger_ms`, so every deleted row is
// either finished or long expired by the time it's swept.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, info_span, warn, Instrument};

use crate::arbiter::queries;
use crate::config::Config;

#[derive(Clone)]
pub struct RetentionSweeper {
    pool: PgPool,
    config: Arc<Config>,
}

impl RetentionSweeper {
    pub fn new(pool: PgPool, config: Arc<Config>) -> Self {
        Self { pool, config }
    }

    /// Runs a single sweep and returns the number of rows deleted.
    pub async fn sweep_once(&self) -> Result<u64, sqlx::Error> {
        queries::sweep(&self.pool, &self.config)
            .instrument(info_span!(
                "lease_arbiter.sweep",
                lease_table = %self.config.lease_table,
                retention_ms = self.config.retention_ms,
            ))
            .await
    }

    /// Runs `sweep_once` on a fixed cadence until the returned handle is
    /// dropped or aborted. Individual sweep failures are logged and do not
    /// stop the loop; the next tick tries again.
    pub fn spawn(self, cadence: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            // The first tick fires immediately; skip it so startup doesn't
            // race the schema bootstrap.
            interval.tick().await;
            loop {
                interval.tick().await;
                match self.sweep_once().await {
                    Ok(rows_deleted) => {
                        info!(rows_deleted, "retention sweep completed");
                    }
                    Err(err) => {
                        warn!(error = %err, "retention sweep failed, will retry next cadence");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_construction_does_not_touch_the_network() {
        let config = Arc::new(Config {
            lease_table: "leases".into(),
            constants_table: "constants".into(),
            epsilon_ms: 10,
            linger_ms: 1000,
            retention_ms: 100_000,
            sweep_cadence: std::time::Duration::from_secs(4 * 60 * 60),
        });
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction never touches the network");
        let _sweeper = RetentionSweeper::new(pool, config);
    }
}
