//! Room authentication gate
//!
//! Per-room state is a single nullable token slot with first-write-wins
//! registration:
//!
//! | registered | supplied | decision                         |
//! |------------|----------|----------------------------------|
//! | unset      | unset    | allow (legacy, nothing registers)|
//! | unset      | set      | allow and register               |
//! | set        | unset    | reject `AuthRequired`            |
//! | set        | equal    | allow                            |
//! | set        | differs  | reject `AuthMismatch`            |
//!
//! A tokenless joiner never registers: a client that connects before
//! its key arrives (`auth=null`) leaves the slot open for whichever
//! participant first presents a real token. Comparison is constant
//! time. The slot is cleared whenever the room is destroyed, including
//! by the stale sweep, so a fresh group can re-register later.

use weft_crypto::ct_eq;
use weft_protocol::CloseReason;

/// Outcome of evaluating a join attempt against the token slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Admit without touching the slot
    Allow,
    /// Admit and store the supplied token as the room's registrant
    AllowAndRegister,
    /// Refuse with the given close reason (always code 4403)
    Reject(CloseReason),
}

/// Evaluate a supplied token against the registered slot
pub fn evaluate(registered: Option<&[u8]>, supplied: Option<&[u8]>) -> AuthDecision {
    match (registered, supplied) {
        (None, None) => AuthDecision::Allow,
        (None, Some(_)) => AuthDecision::AllowAndRegister,
        (Some(_), None) => AuthDecision::Reject(CloseReason::AuthRequired),
        (Some(registered), Some(supplied)) => {
            if ct_eq(registered, supplied) {
                AuthDecision::Allow
            } else {
                AuthDecision::Reject(CloseReason::AuthMismatch)
            }
        }
    }
}

/// Normalize the `auth` query parameter
///
/// Absent, empty, and the literal `null` all mean "no token": clients
/// that cannot compute the HMAC yet connect with `auth=null` and retry
/// with a real token once their key arrives.
pub fn normalize_supplied(auth: Option<&str>) -> Option<Vec<u8>> {
    match auth {
        None => None,
        Some("") | Some("null") => None,
        Some(token) => Some(token.as_bytes().to_vec()),
    }
}
