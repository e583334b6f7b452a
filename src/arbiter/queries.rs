// Parameterised SQL templates for the arbitration protocol.
//
// Table names are interpolated via `format!` (already restricted to a safe
// identifier charset by `Config::validate`); every value that varies per
// call is bound as a positional parameter. Every timestamp written to the
// store is the store's own `now()` — participant-supplied event times are
// only ever used inside read-side comparisons, never written back.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::Config;
use crate::model::ActionKey;

/// Projection of the joined lease/constants row, as read by the info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityStatus(pub i16);

impl ValidityStatus {
    pub const VALID: Self = Self(1);
    pub const EXPIRED: Self = Self(2);
    pub const FINISHED: Self = Self(3);
}

#[derive(Debug, Clone)]
pub struct InfoRow {
    pub event_timestamp: DateTime<Utc>,
    pub lease_acquisition_timestamp: Option<DateTime<Utc>>,
    pub is_within_epsilon: bool,
    pub validity_status: ValidityStatus,
    pub linger_ms: i64,
    pub current_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReselectRow {
    pub event_timestamp: DateTime<Utc>,
    pub lease_acquisition_timestamp: Option<DateTime<Utc>>,
    pub linger_ms: i64,
    pub current_ts: DateTime<Utc>,
}

fn key_predicate() -> &'static str {
    "l.flow_group = $1 AND l.flow_name = $2 AND l.job_name = $3 AND l.action_type = $4"
}

/// Live-variant info query: epsilon is symmetric around the store's `now()`.
pub async fn info_query_live(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
) -> Result<Option<InfoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT
            l.event_timestamp,
            l.lease_acquisition_timestamp,
            (ABS(EXTRACT(EPOCH FROM (now() - l.event_timestamp))) * 1000 <= c.epsilon_ms) AS is_within_epsilon,
            CASE
                WHEN l.lease_acquisition_timestamp IS NULL THEN 3
                WHEN now() < l.lease_acquisition_timestamp + (c.linger_ms || ' milliseconds')::interval THEN 1
                ELSE 2
            END::smallint AS validity_status,
            c.linger_ms,
            now() AS current_ts
        FROM {table} l
        CROSS JOIN {constants_table} c
        WHERE {predicate} AND c.id = 1",
        table = config.lease_table,
        constants_table = config.constants_table,
        predicate = key_predicate(),
    );

    let row = sqlx::query_as::<_, (DateTime<Utc>, Option<DateTime<Utc>>, bool, i16, i64, DateTime<Utc>)>(
        &sql,
    )
    .bind(&key.flow_group)
    .bind(&key.flow_name)
    .bind(&key.job_name)
    .bind(key.action_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(event_timestamp, lease_acquisition_timestamp, is_within_epsilon, validity_status, linger_ms, current_ts)| {
        InfoRow {
            event_timestamp,
            lease_acquisition_timestamp,
            is_within_epsilon,
            validity_status: ValidityStatus(validity_status),
            linger_ms,
            current_ts,
        }
    }))
}

/// Reminder-variant info query: epsilon is asymmetric — the reminder's
/// event time must be older than or equal to the stored one.
pub async fn info_query_reminder(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
    reminder_event_millis: i64,
) -> Result<Option<InfoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT
            l.event_timestamp,
            l.lease_acquisition_timestamp,
            (
                to_timestamp($5::double precision / 1000.0) <= l.event_timestamp
                AND EXTRACT(EPOCH FROM (l.event_timestamp - to_timestamp($5::double precision / 1000.0))) * 1000 <= c.epsilon_ms
            ) AS is_within_epsilon,
            CASE
                WHEN l.lease_acquisition_timestamp IS NULL THEN 3
                WHEN now() < l.lease_acquisition_timestamp + (c.linger_ms || ' milliseconds')::interval THEN 1
                ELSE 2
            END::smallint AS validity_status,
            c.linger_ms,
            now() AS current_ts
        FROM {table} l
        CROSS JOIN {constants_table} c
        WHERE {predicate} AND c.id = 1",
        table = config.lease_table,
        constants_table = config.constants_table,
        predicate = key_predicate(),
    );

    let row = sqlx::query_as::<_, (DateTime<Utc>, Option<DateTime<Utc>>, bool, i16, i64, DateTime<Utc>)>(
        &sql,
    )
    .bind(&key.flow_group)
    .bind(&key.flow_name)
    .bind(&key.job_name)
    .bind(key.action_type.as_str())
    .bind(reminder_event_millis)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(event_timestamp, lease_acquisition_timestamp, is_within_epsilon, validity_status, linger_ms, current_ts)| {
        InfoRow {
            event_timestamp,
            lease_acquisition_timestamp,
            is_within_epsilon,
            validity_status: ValidityStatus(validity_status),
            linger_ms,
            current_ts,
        }
    }))
}

/// INSERT-IF-ABSENT: creates the row, both timestamps set to `now()`.
/// A concurrent insert is absorbed by `ON CONFLICT DO NOTHING` and reported
/// as zero rows affected rather than a duplicate-key error.
pub async fn insert_if_absent(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "INSERT INTO {table} (flow_group, flow_name, job_name, action_type, event_timestamp, lease_acquisition_timestamp)
         VALUES ($1, $2, $3, $4, now(), now())
         ON CONFLICT (flow_group, flow_name, job_name, action_type) DO NOTHING",
        table = config.lease_table,
    );

    let result = sqlx::query(&sql)
        .bind(&key.flow_group)
        .bind(&key.flow_name)
        .bind(&key.job_name)
        .bind(key.action_type.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// UPDATE-IF-MATCH-ALL: CAS on both timestamps matching the caller's read.
pub async fn update_if_match_all(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
    expected_event: DateTime<Utc>,
    expected_lease: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {table}
         SET event_timestamp = now(), lease_acquisition_timestamp = now()
         WHERE flow_group = $1 AND flow_name = $2 AND job_name = $3 AND action_type = $4
           AND event_timestamp = $5 AND lease_acquisition_timestamp = $6",
        table = config.lease_table,
    );

    let result = sqlx::query(&sql)
        .bind(&key.flow_group)
        .bind(&key.flow_name)
        .bind(&key.job_name)
        .bind(key.action_type.as_str())
        .bind(expected_event)
        .bind(expected_lease)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// UPDATE-IF-FINISHED: CAS on the event matching and the lease being clear.
pub async fn update_if_finished(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
    expected_event: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {table}
         SET event_timestamp = now(), lease_acquisition_timestamp = now()
         WHERE flow_group = $1 AND flow_name = $2 AND job_name = $3 AND action_type = $4
           AND event_timestamp = $5 AND lease_acquisition_timestamp IS NULL",
        table = config.lease_table,
    );

    let result = sqlx::query(&sql)
        .bind(&key.flow_group)
        .bind(&key.flow_name)
        .bind(&key.job_name)
        .bind(key.action_type.as_str())
        .bind(expected_event)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Mandatory re-select after any claim attempt: the caller's local clock
/// cannot be trusted to know what the store actually wrote.
pub async fn reselect(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
) -> Result<Option<ReselectRow>, sqlx::Error> {
    let sql = format!(
        "SELECT l.event_timestamp, l.lease_acquisition_timestamp, c.linger_ms, now() AS current_ts
         FROM {table} l
         CROSS JOIN {constants_table} c
         WHERE {predicate} AND c.id = 1",
        table = config.lease_table,
        constants_table = config.constants_table,
        predicate = key_predicate(),
    );

    let row = sqlx::query_as::<_, (DateTime<Utc>, Option<DateTime<Utc>>, i64, DateTime<Utc>)>(&sql)
        .bind(&key.flow_group)
        .bind(&key.flow_name)
        .bind(&key.job_name)
        .bind(key.action_type.as_str())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(event_timestamp, lease_acquisition_timestamp, linger_ms, current_ts)| ReselectRow {
        event_timestamp,
        lease_acquisition_timestamp,
        linger_ms,
        current_ts,
    }))
}

/// Completion CAS: clears the lease only if both timestamps still match
/// what the caller held when it was granted the lease.
pub async fn complete(
    pool: &PgPool,
    config: &Config,
    key: &ActionKey,
    expected_event: DateTime<Utc>,
    expected_lease: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {table}
         SET lease_acquisition_timestamp = NULL, event_timestamp = event_timestamp
         WHERE flow_group = $1 AND flow_name = $2 AND job_name = $3 AND action_type = $4
           AND event_timestamp = $5 AND lease_acquisition_timestamp = $6",
        table = config.lease_table,
    );

    let result = sqlx::query(&sql)
        .bind(&key.flow_group)
        .bind(&key.flow_name)
        .bind(&key.job_name)
        .bind(key.action_type.as_str())
        .bind(expected_event)
        .bind(expected_lease)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Retention sweep: deletes rows whose `event_timestamp` predates the
/// configured retention horizon.
pub async fn sweep(pool: &PgPool, config: &Config) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "DELETE FROM {table} WHERE event_timestamp < now() - ($1 || ' milliseconds')::interval",
        table = config.lease_table,
    );

    let result = sqlx::query(&sql).bind(config.retention_ms).execute(pool).await?;

    Ok(result.rows_affected())
}
