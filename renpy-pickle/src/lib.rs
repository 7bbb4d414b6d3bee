//! Constrained codec for the Python-pickle subset used by RenPy archives.
//!
//! RenPy archive indexes are zlib-compressed pickle streams holding one
//! shape of data: a dictionary mapping tree paths to lists of
//! `(offset, length[, prefix])` tuples. This crate decodes and encodes
//! exactly that world of integers, strings, byte strings, lists, tuples,
//! dictionaries, and `None`, and nothing else.
//!
//! It is not a pickle virtual machine. There is no class instantiation,
//! no `__reduce__`, no persistent IDs, no extension registry. Streams
//! using any opcode outside the subset fail with
//! [`Error::UnsupportedOpcode`]; a hostile stream cannot make the
//! decoder execute anything.
//!
//! # Example
//!
//! ```
//! use renpy_pickle::{decode, encode, Value};
//!
//! let index = Value::Dict(vec![(
//!     Value::from("foo.txt"),
//!     Value::List(vec![Value::Tuple(vec![
//!         Value::Int(34),
//!         Value::Int(5),
//!         Value::from(""),
//!     ])]),
//! )]);
//!
//! let bytes = encode(&index)?;
//! assert_eq!(decode(&bytes)?, index);
//! # Ok::<(), renpy_pickle::Error>(())
//! ```

pub mod decode;
pub mod encode;
pub mod error;
mod opcode;
pub mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::{Error, Result};
pub use value::Value;
