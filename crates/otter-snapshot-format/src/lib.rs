//! # Otter Snapshot Format
//!
//! This crate defines the byte-level format of Otter heap snapshots: the
//! bytecode vocabulary, the arithmetic that folds small parameters into
//! bytecode ranges, and the byte sink/source used by both directions.
//!
//! ## Design Principles
//!
//! - **One byte per instruction**: parameters that fit are embedded in the
//!   low bits, everything else follows as LEB128
//! - **Immutable vocabulary**: decoding is a lookup in a table built at
//!   compile time
//! - **Fail closed**: reserved bytes are errors, never skipped

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bytecode;
pub mod encoding;
pub mod error;
pub mod header;
pub mod space;
pub mod stream;

pub use bytecode::Bytecode;
pub use error::FormatError;
pub use header::SnapshotHeader;
pub use space::{ANY_OLD_SPACE, Alignment, NUMBER_OF_SPACES, Space};
pub use stream::{SnapshotSink, SnapshotSource};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Magic bytes for snapshot streams
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"OTTERSN\0";
