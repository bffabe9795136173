//! Picking a unique effective nickname against the current leases.

use chatrelay_api::*;

use crate::SessionId;

/// True if some other session holds `name` (case-insensitive).
/// A lease without a session id counts as another session.
pub fn is_taken(
    name: &str,
    session_id: &SessionId,
    entries: &[PresenceEntry],
) -> bool {
    let name = name.to_lowercase();
    entries.iter().any(|e| {
        e.nickname.to_lowercase() == name
            && e.session_id.as_deref() != Some(session_id.as_str())
    })
}

/// The first of `desired`, `desired2`, `desired3`, ... not held by
/// another session.
///
/// A lease on `desired` held by this same session is a ghost of an
/// earlier connection and is reclaimed as is.
pub fn negotiate(
    desired: &str,
    session_id: &SessionId,
    entries: &[PresenceEntry],
) -> String {
    let mut candidate = desired.to_string();
    let mut suffix = 2_u32;

    while is_taken(&candidate, session_id, entries) {
        candidate = format!("{desired}{suffix}");
        suffix += 1;
    }

    candidate
}

/// True if the lease on exactly `name` names a session other than ours.
///
/// Checked after claiming `name`: the relay keeps the first claim, so a
/// concurrent claim by another session shows up here.
pub fn is_claimed_by_other(
    name: &str,
    session_id: &SessionId,
    entries: &[PresenceEntry],
) -> bool {
    entries.iter().any(|e| {
        e.nickname == name
            && e.session_id
                .as_deref()
                .is_some_and(|s| s != session_id.as_str())
    })
}
