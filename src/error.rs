use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ActionKeyError;

/// Errors the arbiter surfaces to callers.
///
/// Transient store errors and absorbed duplicate-key races are handled
/// internally and never reach this type; everything here is either a
/// caller mistake (bad config, bad key) or a structural invariant break
/// that the caller cannot safely paper over.
#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("invalid lease-arbiter configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid action key: {0}")]
    ActionKey(#[from] ActionKeyError),

    #[error("lease-arbiter store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("lease-arbiter invariant violated: {0}")]
    InvariantViolation(String),
}

impl ArbiterError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Whether a store error is worth retrying (connection/pool-level failure)
/// as opposed to a statement-level outcome the decision state machine
/// should handle directly.
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
