//! Wire protocol for weft
//!
//! Frame codec, sync steps, close codes, room naming rules, and the
//! opaque document state shared by the server and the bridge client.
//! Update payloads are never interpreted here — the protocol layer
//! moves bytes and enforces bounds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod doc;
pub mod error;
pub mod frame;
pub mod room_name;
pub mod sync;

pub use close::{CloseReason, CLOSE_AUTH};
pub use doc::DocState;
pub use error::{ProtocolError, Result};
pub use frame::{Frame, FrameLimits, DEFAULT_MAX_SYNC, MAX_AWARENESS};
pub use room_name::{is_bridged_by_default, validate_room_name, MAX_ROOM_NAME_LEN};
pub use sync::SyncMessage;
