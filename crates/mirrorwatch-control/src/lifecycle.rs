//! Endpoint lifecycle state machine.
//!
//! This module defines the valid state transitions for endpoints and applies
//! them, recording every transition in the endpoint's history.
//!
//! # State Machine
//!
//! ```text
//!     ┌─────────┐  no slot   ┌────────┐  slot free  ┌───────────┐
//!     │ Unknown │───────────▶│ Queued │────────────▶│ Mirroring │
//!     └────┬────┘            └────────┘             └─────┬─────┘
//!          │                     ▲   ▲                    │
//!          │ slot free           │   │ (mirror timeout)   │ (decision)
//!          └─────────────────────┼───┼────────────────────┤
//!                                │   └────────────────────┤
//!                 (reinvestigate)│                        ▼
//!                                │                   ┌─────────┐
//!                                └───────────────────│  Known  │
//!                                                    └─────────┘
//!
//!     any observed state ──(absent from poll)──▶ Inactive ──(reappears)──▶ prior state
//!     any state ──(ignore)──▶ Ignored ──(clear)──▶ Unknown
//! ```

use mirrorwatch_core::EndpointHash;
use mirrorwatch_store::{Endpoint, EndpointState, StateChange, Timestamp};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    hash: &EndpointHash,
    from: EndpointState,
    to: EndpointState,
) -> Result<EndpointState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            hash: *hash,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: EndpointState, to: EndpointState) -> bool {
    use EndpointState::{Ignored, Inactive, Known, Mirroring, Queued, Unknown};

    matches!(
        (from, to),
        // Investigation
        (Unknown | Known, Queued | Mirroring)
            | (Queued, Mirroring)
            | (Mirroring, Known | Queued)
            // Operator exclusion
            | (Unknown | Queued | Mirroring | Known | Inactive, Ignored)
            | (Ignored, Unknown)
            // Topology presence
            | (Unknown | Queued | Mirroring | Known, Inactive)
            | (Inactive, Unknown | Queued | Known)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: EndpointState) -> Vec<EndpointState> {
    use EndpointState::{Ignored, Inactive, Known, Mirroring, Queued, Unknown};

    match state {
        Unknown | Known => vec![Queued, Mirroring, Ignored, Inactive],
        Queued => vec![Mirroring, Ignored, Inactive],
        Mirroring => vec![Known, Queued, Ignored, Inactive],
        Ignored => vec![Unknown],
        Inactive => vec![Unknown, Queued, Known, Ignored],
    }
}

/// Returns true if the endpoint's traffic is currently mirrored.
#[must_use]
pub const fn is_investigating(state: EndpointState) -> bool {
    matches!(state, EndpointState::Mirroring)
}

/// Returns true if the endpoint is somewhere in the investigation cycle.
///
/// This is the set matched by the `state active` query.
#[must_use]
pub const fn is_active(state: EndpointState) -> bool {
    matches!(
        state,
        EndpointState::Queued | EndpointState::Mirroring | EndpointState::Known
    )
}

/// Returns true if the endpoint is expected to appear in topology polls.
#[must_use]
pub const fn is_observed(state: EndpointState) -> bool {
    matches!(
        state,
        EndpointState::Unknown
            | EndpointState::Queued
            | EndpointState::Mirroring
            | EndpointState::Known
    )
}

/// Returns true if the endpoint may be moved into `Mirroring`.
#[must_use]
pub const fn can_investigate(state: EndpointState) -> bool {
    matches!(
        state,
        EndpointState::Unknown | EndpointState::Queued | EndpointState::Known
    )
}

/// The state an `Inactive` endpoint returns to when it reappears.
///
/// An endpoint that was mirroring lost its mirror on deactivation, so it
/// re-enters the queue instead of claiming a slot.
#[must_use]
pub const fn restore_target(prior: Option<EndpointState>) -> EndpointState {
    match prior {
        Some(EndpointState::Queued | EndpointState::Mirroring) => EndpointState::Queued,
        Some(EndpointState::Known) => EndpointState::Known,
        _ => EndpointState::Unknown,
    }
}

/// Move `endpoint` to `to`, recording the transition at `now`.
///
/// Entering `Inactive` or `Ignored` remembers the current state; entering
/// `Queued` marks `Mirroring` as the pending state.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn apply_transition(
    endpoint: &mut Endpoint,
    to: EndpointState,
    now: Timestamp,
) -> Result<EndpointState> {
    let from = endpoint.state;
    validate_transition(&endpoint.hash, from, to)?;

    if matches!(to, EndpointState::Inactive | EndpointState::Ignored) {
        endpoint.prior_state = Some(from);
    }
    endpoint.pending_state = match to {
        EndpointState::Queued => Some(EndpointState::Mirroring),
        _ => None,
    };
    endpoint.state = to;
    endpoint.history.push(StateChange { state: to, at: now });

    tracing::debug!(
        endpoint = %endpoint.name,
        from = %from,
        to = %to,
        "Endpoint state transition"
    );
    Ok(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorwatch_store::EndpointData;

    fn endpoint() -> Endpoint {
        Endpoint::new(
            EndpointData {
                tenant: "foo".to_string(),
                mac: "00:00:00:00:00:00".to_string(),
                segment: "foo".to_string(),
                port: "1".to_string(),
                ..EndpointData::default()
            },
            100,
        )
    }

    #[test]
    fn valid_transitions() {
        use EndpointState::*;

        assert!(is_valid_transition(Unknown, Queued));
        assert!(is_valid_transition(Unknown, Mirroring));
        assert!(is_valid_transition(Queued, Mirroring));
        assert!(is_valid_transition(Mirroring, Known));
        assert!(is_valid_transition(Mirroring, Queued));
        assert!(is_valid_transition(Known, Mirroring));
        assert!(is_valid_transition(Ignored, Unknown));
        assert!(is_valid_transition(Known, Inactive));
        assert!(is_valid_transition(Inactive, Known));
        assert!(is_valid_transition(Inactive, Ignored));
    }

    #[test]
    fn invalid_transitions() {
        use EndpointState::*;

        // Ignored endpoints must be cleared before investigation
        assert!(!is_valid_transition(Ignored, Mirroring));
        assert!(!is_valid_transition(Ignored, Inactive));
        // Inactive endpoints never claim a mirror slot directly
        assert!(!is_valid_transition(Inactive, Mirroring));
        // Classification requires mirroring first
        assert!(!is_valid_transition(Queued, Known));
        assert!(!is_valid_transition(Unknown, Known));
        assert!(!is_valid_transition(Known, Known));
    }

    #[test]
    fn transitions_from_agree_with_validation() {
        for from in EndpointState::ALL {
            let targets = valid_transitions_from(from);
            for to in EndpointState::ALL {
                assert_eq!(
                    targets.contains(&to),
                    is_valid_transition(from, to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn apply_records_history_and_pending() {
        let mut ep = endpoint();
        apply_transition(&mut ep, EndpointState::Queued, 110).unwrap();
        assert_eq!(ep.pending_state, Some(EndpointState::Mirroring));

        apply_transition(&mut ep, EndpointState::Mirroring, 120).unwrap();
        assert_eq!(ep.pending_state, None);

        apply_transition(&mut ep, EndpointState::Known, 130).unwrap();
        let states: Vec<_> = ep.history.iter().map(|c| (c.state, c.at)).collect();
        assert_eq!(
            states,
            vec![
                (EndpointState::Unknown, 100),
                (EndpointState::Queued, 110),
                (EndpointState::Mirroring, 120),
                (EndpointState::Known, 130),
            ]
        );
    }

    #[test]
    fn apply_rejects_invalid_without_side_effects() {
        let mut ep = endpoint();
        let err = apply_transition(&mut ep, EndpointState::Known, 110).unwrap_err();
        assert!(matches!(err, ControlError::InvalidState { .. }));
        assert_eq!(ep.state, EndpointState::Unknown);
        assert_eq!(ep.history.len(), 1);
    }

    #[test]
    fn inactive_remembers_prior_state() {
        let mut ep = endpoint();
        apply_transition(&mut ep, EndpointState::Mirroring, 110).unwrap();
        apply_transition(&mut ep, EndpointState::Inactive, 120).unwrap();
        assert_eq!(ep.prior_state, Some(EndpointState::Mirroring));

        let target = restore_target(ep.prior_state);
        assert_eq!(target, EndpointState::Queued);
        apply_transition(&mut ep, target, 130).unwrap();
        assert_eq!(ep.pending_state, Some(EndpointState::Mirroring));
    }

    #[test]
    fn restore_targets() {
        assert_eq!(restore_target(Some(EndpointState::Known)), EndpointState::Known);
        assert_eq!(restore_target(Some(EndpointState::Queued)), EndpointState::Queued);
        assert_eq!(restore_target(Some(EndpointState::Unknown)), EndpointState::Unknown);
        assert_eq!(restore_target(None), EndpointState::Unknown);
    }

    #[test]
    fn state_predicates() {
        assert!(is_investigating(EndpointState::Mirroring));
        assert!(!is_investigating(EndpointState::Queued));

        assert!(is_active(EndpointState::Known));
        assert!(!is_active(EndpointState::Unknown));
        assert!(!is_active(EndpointState::Inactive));

        assert!(is_observed(EndpointState::Unknown));
        assert!(!is_observed(EndpointState::Ignored));

        assert!(can_investigate(EndpointState::Queued));
        assert!(!can_investigate(EndpointState::Ignored));
    }
}
