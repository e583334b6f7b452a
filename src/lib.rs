//! Multi-active lease arbitration over a shared Postgres store.
//!
//! Several stateless participants compete for the exclusive right to act on
//! a named action event. At most one holds the lease at a time; holders that
//! die or stall have their lease expire for another participant to claim.
//! Correctness under contention is delegated entirely to the store: every
//! claim is a single conditional (compare-and-swap) statement, and every
//! timestamp durably observed by any participant originated from the
//! store's own `now()`, never a participant's local wall clock.

pub mod arbiter;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod retry;
pub mod sweeper;

pub use arbiter::LeaseArbiter;
pub use config::{Config, ConfigError};
pub use db::pool::{create_pg_pool, PoolConfig};
pub use error::ArbiterError;
pub use model::{
    ActionKey, ActionKeyError, ActionType, LeaseAttemptStatus, LeaseHandle, LeaseParams,
};
pub use sweeper::RetentionSweeper;
