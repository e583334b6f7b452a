// Entities crossing the arbiter boundary: action keys, lease parameters, and
// the decision result. All timestamps here are milliseconds since the Unix
// epoch, UTC — the store's own `TIMESTAMPTZ` values are converted at the
// edge and never otherwise touch this module.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Longest allowed `flow_group` / `flow_name` component, in characters.
pub const MAX_FLOW_COMPONENT_LEN: usize = 255;
/// Longest allowed `job_name` component, in characters.
pub const MAX_JOB_NAME_LEN: usize = 255;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ActionKeyError {
    #[error("flow group is empty")]
    EmptyFlowGroup,
    #[error("flow name is empty")]
    EmptyFlowName,
    #[error("job name is empty")]
    EmptyJobName,
    #[error("flow group exceeds maximum length of {MAX_FLOW_COMPONENT_LEN} characters")]
    FlowGroupTooLong,
    #[error("flow name exceeds maximum length of {MAX_FLOW_COMPONENT_LEN} characters")]
    FlowNameTooLong,
    #[error("job name exceeds maximum length of {MAX_JOB_NAME_LEN} characters")]
    JobNameTooLong,
    #[error("unknown action type: {0}")]
    UnknownActionType(String),
}

/// Closed enumeration of verbs an ActionKey can be claimed for.
///
/// Distinct action types on the same flow are independent leases — a
/// LAUNCH and a KILL for the same job may be held concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Launch,
    Kill,
    Resume,
}

impl ActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launch => "LAUNCH",
            Self::Kill => "KILL",
            Self::Resume => "RESUME",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ActionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAUNCH" => Ok(Self::Launch),
            "KILL" => Ok(Self::Kill),
            "RESUME" => Ok(Self::Resume),
            other => Err(ActionKeyError::UnknownActionType(other.to_owned())),
        }
    }
}

/// Identifies the unit of work subject to arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub flow_group: String,
    pub flow_name: String,
    pub job_name: String,
    pub action_type: ActionType,
}

impl ActionKey {
    pub fn new(
        flow_group: impl Into<String>,
        flow_name: impl Into<String>,
        job_name: impl Into<String>,
        action_type: ActionType,
    ) -> Result<Self, ActionKeyError> {
        let flow_group = flow_group.into();
        let flow_name = flow_name.into();
        let job_name = job_name.into();

        if flow_group.is_empty() {
            return Err(ActionKeyError::EmptyFlowGroup);
        }
        if flow_name.is_empty() {
            return Err(ActionKeyError::EmptyFlowName);
        }
        if job_name.is_empty() {
            return Err(ActionKeyError::EmptyJobName);
        }
        if flow_group.chars().count() > MAX_FLOW_COMPONENT_LEN {
            return Err(ActionKeyError::FlowGroupTooLong);
        }
        if flow_name.chars().count() > MAX_FLOW_COMPONENT_LEN {
            return Err(ActionKeyError::FlowNameTooLong);
        }
        if job_name.chars().count() > MAX_JOB_NAME_LEN {
            return Err(ActionKeyError::JobNameTooLong);
        }

        Ok(Self { flow_group, flow_name, job_name, action_type })
    }
}

/// Caller-supplied input to `try_acquire_lease`.
///
/// Reminders carry the event time of the *original* event they are
/// reminding about, never the current wall clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseParams {
    pub key: ActionKey,
    pub event_millis: i64,
    pub is_reminder: bool,
}

impl LeaseParams {
    pub fn live(key: ActionKey, event_millis: i64) -> Self {
        Self { key, event_millis, is_reminder: false }
    }

    pub fn reminder(key: ActionKey, event_millis: i64) -> Self {
        Self { key, event_millis, is_reminder: true }
    }
}

/// The exact row state the caller observed at the moment it was granted the
/// lease. Needed (not just the millisecond projection) so `record_lease_success`
/// can CAS against precisely what the store wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub key: ActionKey,
    pub consensus_event_millis: i64,
    pub lease_acquisition_millis: i64,
    pub(crate) event_timestamp: DateTime<Utc>,
    pub(crate) lease_acquisition_timestamp: DateTime<Utc>,
}

/// Result of `try_acquire_lease`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAttemptStatus {
    /// The caller now holds the lease.
    Obtained { handle: LeaseHandle, min_linger_millis: i64 },
    /// Another participant holds it; retry no sooner than `min_linger_millis`.
    LeasedToAnother { consensus_params: LeaseParams, min_linger_millis: i64 },
    /// The event has already been completed; no further action required.
    NoLongerLeasing,
}

pub(crate) fn millis_from_datetime(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_key_rejects_empty_components() {
        assert_eq!(
            ActionKey::new("", "f", "j", ActionType::Launch).unwrap_err(),
            ActionKeyError::EmptyFlowGroup
        );
        assert_eq!(
            ActionKey::new("g", "", "j", ActionType::Launch).unwrap_err(),
            ActionKeyError::EmptyFlowName
        );
        assert_eq!(
            ActionKey::new("g", "f", "", ActionType::Launch).unwrap_err(),
            ActionKeyError::EmptyJobName
        );
    }

    #[test]
    fn action_key_enforces_length_bounds() {
        let long = "a".repeat(MAX_FLOW_COMPONENT_LEN + 1);
        assert_eq!(
            ActionKey::new(long.clone(), "f", "j", ActionType::Launch).unwrap_err(),
            ActionKeyError::FlowGroupTooLong
        );
        assert_eq!(
            ActionKey::new("g", long, "j", ActionType::Launch).unwrap_err(),
            ActionKeyError::FlowNameTooLong
        );
        let long_job = "a".repeat(MAX_JOB_NAME_LEN + 1);
        assert_eq!(
            ActionKey::new("g", "f", long_job, ActionType::Launch).unwrap_err(),
            ActionKeyError::JobNameTooLong
        );
    }

    #[test]
    fn action_key_accepts_max_length_components() {
        let at_max = "a".repeat(MAX_FLOW_COMPONENT_LEN);
        assert!(ActionKey::new(at_max.clone(), at_max, "j", ActionType::Launch).is_ok());
    }

    #[test]
    fn action_type_round_trips_through_display_and_from_str() {
        for variant in [ActionType::Launch, ActionType::Kill, ActionType::Resume] {
            let parsed: ActionType = variant.to_string().parse().unwrap();
            assert_eq!(parsed, variant);
        }
    }

    #[test]
    fn action_type_rejects_unknown_verb() {
        assert_eq!(
            "DEPLOY".parse::<ActionType>().unwrap_err(),
            ActionKeyError::UnknownActionType("DEPLOY".to_owned())
        );
    }
}
