//! Room naming rules
//!
//! Room names are ASCII slugs of `[A-Za-z0-9:_-]`, 1 to 256 characters.
//! The colon is significant: prefixes decide which rooms the daemon
//! bridges to an external relay by default.

use crate::error::{ProtocolError, Result};

/// Maximum room name length in characters
pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Room name prefixes that are bridged outbound by default.
/// Anything else stays local-only.
pub const BRIDGED_PREFIXES: &[&str] = &["workspace-meta:", "workspace-folders:", "doc-"];

/// Validate a room name slug
pub fn validate_room_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
        return Err(ProtocolError::BadRoomName(truncate_for_log(name)));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'-')
    {
        return Err(ProtocolError::BadRoomName(truncate_for_log(name)));
    }
    Ok(())
}

/// Whether a room is bridged to the external relay by default
pub fn is_bridged_by_default(name: &str) -> bool {
    BRIDGED_PREFIXES.iter().any(|p| name.starts_with(p))
}

// Bad names can be arbitrary client input; keep error payloads short.
fn truncate_for_log(name: &str) -> String {
    name.chars().take(32).collect()
}
