//! The on-wire log: record codec, object framing, and the replay engine.
//!
//! Every mutation of the filesystem is described by a fixed-layout binary
//! record. Records accumulate in memory and are packed, together with any
//! file data they reference, into numbered immutable objects. Replaying the
//! record streams of all objects in index order reconstructs the complete
//! in-memory state.

pub mod object;
pub mod record;
pub mod replay;

pub use object::{OBJECT_HEADER_LEN, ObjectHeader, ObjectKind, ParsedKey, object_key, parse_object_key};
pub use record::{DataRecord, InodeRecord, LogRecord, WireError};
pub use replay::{ReplayError, replay_object};
