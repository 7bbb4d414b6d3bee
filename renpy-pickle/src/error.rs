//! Error types for pickle decoding and encoding

use thiserror::Error;

/// Result type for pickle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or encoding the pickle subset
#[derive(Debug, Error)]
pub enum Error {
    /// Opcode outside the supported subset
    #[error("unsupported pickle opcode 0x{0:02x}")]
    UnsupportedOpcode(u8),

    /// Protocol number beyond what this decoder understands
    #[error("unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),

    /// Input ended in the middle of an opcode or its argument
    #[error("pickle stream ended unexpectedly")]
    UnexpectedEof,

    /// An opcode needed more stack operands than were present
    #[error("pickle stack underflow")]
    StackUnderflow,

    /// An opcode needed a mark, but none was set
    #[error("pickle opcode requires a mark, but none was set")]
    MissingMark,

    /// A memo slot was fetched before anything was stored in it
    #[error("pickle memo slot {0} referenced before assignment")]
    MemoMissing(u32),

    /// A `LONG` payload wider than 64 bits
    #[error("pickle integer does not fit in 64 bits")]
    IntegerOverflow,

    /// Unicode string data that is not valid UTF-8
    #[error("pickle string data is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The stack held a different shape than the opcode requires
    #[error("expected {expected} on the pickle stack, found {found}")]
    TypeMismatch {
        /// Type the opcode requires
        expected: &'static str,
        /// Type actually found
        found: &'static str,
    },

    /// Structurally invalid stream
    #[error("malformed pickle stream: {0}")]
    Malformed(&'static str),

    /// A value too large for its wire-format length field
    #[error("{0} exceeds the pickle wire format's length range")]
    TooLarge(&'static str),
}
