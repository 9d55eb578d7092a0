//! Length-prefixed JSON-header framing codec for the replication protocol.
//!
//! A message is a minimal-JSON header object followed immediately by `s`
//! opaque payload bytes. Headers are exposed as a tagged [`Header`] struct
//! rather than untyped JSON, while the on-wire minimal-JSON subset stays
//! exactly as the protocol expects it (numeric fields stay quoted strings).

pub mod codec;
pub mod header;
pub mod json;
pub mod list;

pub use codec::{decode_frame, encode_frame, Decoded, Frame, HEADER_MAX};
pub use header::{Cmd, Header, HeaderError, PacketKind, Status};
pub use list::{ListEntry, ListPayload};
