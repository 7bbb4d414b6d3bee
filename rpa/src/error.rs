//! Error types for RPA archive parsing and building

use std::path::PathBuf;
use thiserror::Error;

/// Result type for RPA operations
pub type Result<T> = std::result::Result<T, Error>;

/// RPA error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not an RPA archive of any recognized version
    #[error("Not a recognized RPA archive: {0:?}")]
    UnsupportedFormat(PathBuf),

    /// Archive version cannot be written
    #[error("Archive version not supported for saving: {0}")]
    VersionNotSupported(String),

    /// Malformed archive header line
    #[error("Invalid archive header: {0}")]
    InvalidHeader(String),

    /// Index blob failed to decompress or deserialize
    #[error("Invalid archive index: {0}")]
    InvalidIndex(String),

    /// Pickle error from renpy-pickle
    #[error("Pickle error: {0}")]
    Pickle(#[from] renpy_pickle::Error),

    /// Entry path missing from the archive index
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),

    /// Filesystem path does not exist
    #[error("Path not found: {0:?}")]
    PathNotFound(PathBuf),

    /// Entry path is empty or escapes the extraction root
    #[error("Invalid entry path: {0}")]
    InvalidEntryPath(String),

    /// Refusing to write an archive with no entries
    #[error("Cannot save an empty archive")]
    EmptyArchive,

    /// Staged archive failed validation before commit
    #[error("Staged archive failed validation: {0}")]
    CorruptedArchive(String),

    /// Entry content lives in an archive but no archive path is available
    #[error("Entry references archive content but no source archive is set")]
    NoSourceArchive,

    /// Compiled script container is malformed
    #[error("Invalid script container: {0}")]
    InvalidScript(String),
}
