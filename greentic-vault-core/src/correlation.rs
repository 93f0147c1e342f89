//! Correlation ID rules.
//!
//! The gateway rewrites a caller's ID to `owner::id` once authorization has
//! produced the owner, and strips that prefix again before replying. Node-side
//! capability calls use `workflow::phase::reference`.

pub const SEPARATOR: &str = "::";

/// Phase label used when a capability is invoked before any execution exists.
pub const SUBSCRIPTION_PHASE: &str = "subscription";

pub fn prefix_with_owner(owner: &str, id: &str) -> String {
    format!("{owner}{SEPARATOR}{id}")
}

/// Removes everything up to and including the first separator.
pub fn strip_owner_prefix(id: &str) -> &str {
    match id.find(SEPARATOR) {
        Some(index) => &id[index + SEPARATOR.len()..],
        None => id,
    }
}

/// Owner segment of a gateway-rewritten ID, if the ID carries one.
pub fn owner_of(id: &str) -> Option<&str> {
    id.find(SEPARATOR).map(|index| &id[..index])
}

/// An owner can prefix an ID only if it is non-empty and free of the separator.
pub fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty() && !owner.contains(SEPARATOR)
}

/// Returns true when `id` was issued for `owner` by the gateway.
pub fn is_owned_by(id: &str, owner: &str) -> bool {
    !owner.is_empty() && owner_of(id) == Some(owner)
}

/// ID for a capability call; a blank execution ID marks the subscription phase.
pub fn capability_request_id(workflow_id: &str, execution_id: &str, reference_id: &str) -> String {
    let phase = if execution_id.is_empty() {
        SUBSCRIPTION_PHASE
    } else {
        execution_id
    };
    format!("{workflow_id}{SEPARATOR}{phase}{SEPARATOR}{reference_id}")
}
