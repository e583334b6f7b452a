// Pure decision logic, split out from the I/O orchestration in `mod.rs` so
// every branch of the state machine can be exercised without a database.

use crate::arbiter::queries::ValidityStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stale reminder: a newer event has already superseded it.
    StaleReminder,
    /// Lease has expired; attempt UPDATE-IF-MATCH-ALL.
    ClaimExpired { log_epsilon_violation: bool },
    /// Finished, and the caller's event is the same one that finished.
    FinishedWithinEpsilon,
    /// Finished, but a distinct event has since arrived; attempt UPDATE-IF-FINISHED.
    ClaimFinished,
    /// Another holder owns the exact same event.
    LeasedToAnotherSameEvent { wait_hint_ms: i64 },
    /// Another holder owns an older event; the caller's trigger is new.
    LeasedToAnotherNewEvent { wait_hint_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// True when a reminder arrived with an event time newer than what was
    /// laundered into the store — a monotonicity violation upstream, logged
    /// as a warning but not treated as fatal (the DB time is authoritative).
    pub reminder_newer_than_stored: bool,
}

/// Maps the info-query projection plus the reminder/live distinction to one
/// of the six decision cases. Takes plain millisecond values so it has no
/// dependency on `chrono` or the store.
#[allow(clippy::too_many_arguments)]
pub fn classify(
    is_reminder: bool,
    caller_event_millis: i64,
    db_event_millis: i64,
    is_within_epsilon: bool,
    validity_status: ValidityStatus,
    db_lease_millis: Option<i64>,
    db_current_millis: i64,
    linger_ms: i64,
) -> Classification {
    if is_reminder && caller_event_millis < db_event_millis {
        return Classification { decision: Decision::StaleReminder, reminder_newer_than_stored: false };
    }
    let reminder_newer_than_stored = is_reminder && caller_event_millis > db_event_millis;
    // A reminder newer than the stored event time proceeds as equal (same
    // event) rather than as a distinct one, regardless of what the epsilon
    // comparison itself reports.
    let is_within_epsilon = is_within_epsilon || reminder_newer_than_stored;

    let decision = if validity_status.0 == ValidityStatus::VALID.0 {
        let lease_millis = db_lease_millis
            .expect("validity_status == VALID implies a non-null lease_acquisition_timestamp");
        let wait_hint_ms = (lease_millis + linger_ms) - db_current_millis;
        if is_within_epsilon {
            Decision::LeasedToAnotherSameEvent { wait_hint_ms }
        } else {
            Decision::LeasedToAnotherNewEvent { wait_hint_ms }
        }
    } else if validity_status.0 == ValidityStatus::EXPIRED.0 {
        Decision::ClaimExpired { log_epsilon_violation: is_within_epsilon && !is_reminder }
    } else {
        debug_assert_eq!(validity_status.0, ValidityStatus::FINISHED.0);
        if is_within_epsilon {
            Decision::FinishedWithinEpsilon
        } else {
            Decision::ClaimFinished
        }
    };

    Classification { decision, reminder_newer_than_stored }
}
