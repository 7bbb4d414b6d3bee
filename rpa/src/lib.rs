//! RPA (RenPy Archive) reading and writing
//!
//! This crate handles every archive layout the engine has shipped:
//! headerless 1.0 pairs with a sibling `.rpi` index, 2.0 headers carrying
//! the index offset, and the obfuscated 3.0/3.2 headers that XOR index
//! values with a step folded from the header tokens. Archives are
//! rebuilt through a staged temp file that must reload cleanly before
//! the target is replaced.

pub mod archive;
pub mod builder;
pub mod error;
pub mod header;
pub mod index;
pub mod obfuscate;
pub mod preview;
pub mod reader;
pub mod rpyc;
pub mod version;

pub use archive::{ExtractReport, RpaArchive};
pub use builder::{ArchiveBuilder, DEFAULT_STEP, SaveOptions, StagedArchive};
pub use error::{Error, Result};
pub use version::RpaVersion;

// Re-export commonly used types
pub use header::RpaHeader;
pub use index::{ArchiveDirectory, ByteRange, EntrySource};
pub use preview::PreviewKind;
