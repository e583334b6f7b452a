// End-to-end scenarios against a real Postgres instance. Skips (rather than
// fails) when no test database is configured, mirroring the reference
// service's own Postgres-gated integration test convention.

use lease_arbiter::{ActionKey, ActionType, Config, LeaseArbiter, LeaseParams};

async fn test_arbiter(table_suffix: &str) -> Option<LeaseArbiter> {
    let database_url = std::env::var("LEASE_ARBITER_TEST_DATABASE_URL").ok()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("pool should connect to test database");

    let config = Config {
        lease_table: format!("lease_arbiter_leases_{table_suffix}"),
        constants_table: format!("lease_arbiter_constants_{table_suffix}"),
        epsilon_ms: 10,
        linger_ms: 1000,
        retention_ms: 100_000,
        sweep_cadence: std::time::Duration::from_secs(4 * 60 * 60),
    };

    let arbiter = LeaseArbiter::new(pool, config);
    arbiter.bootstrap().await.expect("bootstrap should succeed");
    Some(arbiter)
}

fn key() -> ActionKey {
    ActionKey::new("flow-group", "flow-name", "job-name", ActionType::Launch).unwrap()
}

#[tokio::test]
async fn s1_first_claim_wins_and_completes() {
    let Some(arbiter) = test_arbiter("s1").await else {
        eprintln!("skipping s1_first_claim_wins_and_completes: set LEASE_ARBITER_TEST_DATABASE_URL to run it");
        return;
    };

    let params_a = LeaseParams::live(key(), 1000);
    let status_a = arbiter.try_acquire_lease(params_a, true).await.unwrap();

    let params_b = LeaseParams::live(key(), 1000);
    let status_b = arbiter.try_acquire_lease(params_b, true).await.unwrap();

    use lease_arbiter::LeaseAttemptStatus::*;
    match (status_a, status_b) {
        (Obtained { handle, min_linger_millis }, LeasedToAnother { min_linger_millis: hint, .. }) => {
            assert!(min_linger_millis > 0);
            assert!(hint > 0);
            let completed = arbiter.record_lease_success(handle).await.unwrap();
            assert!(completed);
        }
        other => panic!("expected (Obtained, LeasedToAnother), got {other:?}"),
    }
}

#[tokio::test]
async fn s2_stale_reminder_after_completion_is_discarded() {
    let Some(arbiter) = test_arbiter("s2").await else {
        eprintln!("skipping s2_stale_reminder_after_completion_is_discarded: set LEASE_ARBITER_TEST_DATABASE_URL to run it");
        return;
    };

    let k = key();
    let status = arbiter.try_acquire_lease(LeaseParams::live(k.clone(), 1000), true).await.unwrap();
    let lease_arbiter::LeaseAttemptStatus::Obtained { handle, .. } = status else {
        panic!("expected to obtain the lease");
    };
    assert!(arbiter.record_lease_success(handle).await.unwrap());

    let reminder = LeaseParams::reminder(k, 1000);
    let result = arbiter.try_acquire_lease(reminder, true).await.unwrap();
    assert_eq!(result, lease_arbiter::LeaseAttemptStatus::NoLongerLeasing);
}

#[tokio::test]
async fn s4_same_event_valid_lease_reports_wait_hint_close_to_linger() {
    let Some(arbiter) = test_arbiter("s4").await else {
        eprintln!("skipping s4_same_event_valid_lease_reports_wait_hint_close_to_linger: set LEASE_ARBITER_TEST_DATABASE_URL to run it");
        return;
    };

    let k = key();
    let _ = arbiter.try_acquire_lease(LeaseParams::live(k.clone(), 4000), true).await.unwrap();
    let second = arbiter.try_acquire_lease(LeaseParams::live(k, 4000), true).await.unwrap();

    match second {
        lease_arbiter::LeaseAttemptStatus::LeasedToAnother { min_linger_millis, .. } => {
            assert!(min_linger_millis > 0 && min_linger_millis <= 1000);
        }
        other => panic!("expected LeasedToAnother, got {other:?}"),
    }
}

#[tokio::test]
async fn s6_retention_sweep_deletes_old_rows() {
    let Some(arbiter) = test_arbiter("s6").await else {
        eprintln!("skipping s6_retention_sweep_deletes_old_rows: set LEASE_ARBITER_TEST_DATABASE_URL to run it");
        return;
    };

    let k = key();
    let status = arbiter.try_acquire_lease(LeaseParams::live(k.clone(), 1000), true).await.unwrap();
    let lease_arbiter::LeaseAttemptStatus::Obtained { handle, .. } = status else {
        panic!("expected to obtain the lease");
    };
    assert!(arbiter.record_lease_success(handle).await.unwrap());

    sqlx::query(&format!(
        "UPDATE {} SET event_timestamp = now() - interval '1000 days'",
        arbiter.config().lease_table
    ))
    .execute(arbiter.pool())
    .await
    .unwrap();

    let sweeper = lease_arbiter::RetentionSweeper::new(
        arbiter.pool().clone(),
        std::sync::Arc::new(arbiter.config().clone()),
    );
    let deleted = sweeper.sweep_once().await.unwrap();
    assert_eq!(deleted, 1);

    let status = arbiter.try_acquire_lease(LeaseParams::live(k, 2000), true).await.unwrap();
    assert!(matches!(status, lease_arbiter::LeaseAttemptStatus::Obtained { .. }));
}
