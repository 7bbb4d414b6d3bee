//! Decoded pickle values with type-safe accessors

use std::fmt;

/// A node in a decoded pickle object graph.
///
/// Only the shapes that RenPy archive indexes actually serialize are
/// representable: integers, strings, byte strings, lists, tuples,
/// dictionaries, and `None`. Anything else fails at decode time with
/// [`Error::UnsupportedOpcode`](crate::Error::UnsupportedOpcode).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Python `None`
    None,
    /// Integer value (all pickle integer opcodes collapse to `i64`)
    Int(i64),
    /// Text string
    Str(String),
    /// Raw byte string
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<Value>),
    /// Tuple of values
    Tuple(Vec<Value>),
    /// Dictionary, as key/value pairs in insertion order
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// Get the value as an integer, if it is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as raw bytes, if it is a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the elements of a list **or** tuple.
    ///
    /// Legacy archive tools disagree on whether index rows are lists or
    /// tuples, so sequence consumers accept either.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Get the key/value pairs of a dictionary, if it is one
    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Dict(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Convert to the dictionary pairs, consuming self
    pub fn into_dict(self) -> Option<Vec<(Value, Value)>> {
        match self {
            Self::Dict(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Check if this value is `None`
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Get the name of this value's type, for diagnostics
    pub fn value_type(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Dict(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
