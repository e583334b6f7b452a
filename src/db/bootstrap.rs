// Schema bootstrap: creates the lease table and the constants table on
// startup, then upserts the `(epsilon, linger)` row so concurrent startups
// converge on the configured values.
//
// Table names are caller-configured (see `Config`), so unlike the host
// service's compile-time `sqlx::migrate!` setup, DDL here is assembled with
// `format!` — `Config::validate` has already restricted both names to a
// safe identifier charset before any of this runs.

use sqlx::PgPool;
use tracing::{info_span, Instrument};

use crate::config::Config;
use crate::error::ArbiterError;

pub async fn bootstrap_schema(pool: &PgPool, config: &Config) -> Result<(), ArbiterError> {
    config.validate()?;

    async {
        let create_lease_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                flow_group TEXT NOT NULL,
                flow_name TEXT NOT NULL,
                job_name TEXT NOT NULL,
                action_type TEXT NOT NULL,
                event_timestamp TIMESTAMPTZ NOT NULL,
                lease_acquisition_timestamp TIMESTAMPTZ,
                PRIMARY KEY (flow_group, flow_name, job_name, action_type)
            )",
            table = config.lease_table
        );
        sqlx::query(&create_lease_table).execute(pool).await?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_event_timestamp_idx ON {table} (event_timestamp)",
            table = config.lease_table
        );
        sqlx::query(&create_index).execute(pool).await?;

        let create_constants_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id SMALLINT PRIMARY KEY DEFAULT 1,
                epsilon_ms BIGINT NOT NULL,
                linger_ms BIGINT NOT NULL,
                CONSTRAINT {table}_single_row CHECK (id = 1)
            )",
            table = config.constants_table
        );
        sqlx::query(&create_constants_table).execute(pool).await?;

        let upsert_constants = format!(
            "INSERT INTO {table} (id, epsilon_ms, linger_ms) VALUES (1, $1, $2)
             ON CONFLICT (id) DO UPDATE SET epsilon_ms = EXCLUDED.epsilon_ms, linger_ms = EXCLUDED.linger_ms",
            table = config.constants_table
        );
        sqlx::query(&upsert_constants)
            .bind(config.epsilon_ms)
            .bind(config.linger_ms)
            .execute(pool)
            .await?;

        Ok::<_, sqlx::Error>(())
    }
    .instrument(info_span!(
        "lease_arbiter.bootstrap",
        lease_table = %config.lease_table,
        constants_table = %config.constants_table
    ))
    .await?;

    Ok(())
}
