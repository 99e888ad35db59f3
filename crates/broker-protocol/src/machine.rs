//! The transition table of the data-request state machine.
//!
//! Every entry point shares one guarded-transition path: handlers name the
//! expected source state, [`crate::requests`] performs the compare-and-swap,
//! and this table is the single authority on which edges exist at all.

use broker_types::RequestStatus;

/// Returns true when the state machine admits an edge `from -> to`.
///
/// The happy path is a strict total order; `Denied`, `Failed`, and
/// `Expired` are reachable from any non-terminal state. Terminal states
/// have no outgoing edges.
pub fn is_valid_transition(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;

    if from.is_terminal() {
        return false;
    }

    match (from, to) {
        (AwaitingConsent, Approved) | (AwaitingConsent, Denied) => true,
        (Approved, Verified) => true,
        (Verified, Delivered) => true,
        (Delivered, Completed) => true,
        // Side exits from any non-terminal state.
        (_, Failed) | (_, Expired) => true,
        _ => false,
    }
}
