//! Archive index: the path directory and its compressed pickle codec
//!
//! On the wire the index is a zlib-compressed pickle of a dict mapping
//! entry paths to lists of `(offset, length[, prefix])` tuples. In memory
//! the directory also tracks files staged from disk for the next save.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::{trace, warn};

use renpy_pickle::Value;

use crate::error::{Error, Result};
use crate::obfuscate;
use crate::version::RpaVersion;

/// A contiguous span of archive bytes plus an optional literal prefix.
///
/// `length` covers the whole logical slice, prefix included; the body read
/// from the archive at `offset` is `length - prefix.len()` bytes with the
/// prefix prepended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    /// Absolute offset of the body in the archive file
    pub offset: u64,
    /// Logical length of the slice, prefix bytes included
    pub length: u64,
    /// Literal bytes prepended before the body
    pub prefix: Vec<u8>,
}

/// Where an entry's bytes currently live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// One or more byte ranges inside the loaded archive
    Archive(Vec<ByteRange>),
    /// A file on disk staged for the next save
    External(PathBuf),
}

impl EntrySource {
    /// Whether the entry's bytes live inside the archive file
    pub fn in_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Total content length in bytes. Staged entries are measured on disk.
    pub fn total_length(&self) -> Result<u64> {
        match self {
            Self::Archive(ranges) => Ok(ranges.iter().map(|r| r.length).sum()),
            Self::External(path) => Ok(path.metadata()?.len()),
        }
    }
}

/// Offset and length of an entry's body as written into a new archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Entry path inside the archive
    pub path: String,
    /// Absolute offset of the body
    pub offset: u64,
    /// Body length in bytes
    pub length: u64,
}

/// Ordered path directory of an archive.
///
/// Paths use forward slashes and sort lexicographically, so listings and
/// rebuilt indexes are deterministic.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDirectory {
    entries: BTreeMap<String, EntrySource>,
}

impl ArchiveDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry path is present
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Look up an entry's source
    pub fn get(&self, path: &str) -> Option<&EntrySource> {
        self.entries.get(path)
    }

    /// Stage a file on disk to be packed under `entry_path` on the next
    /// save. Replaces any existing entry at that path.
    pub fn stage_file(&mut self, entry_path: &str, file: &Path) -> Result<()> {
        if !file.is_file() {
            return Err(Error::PathNotFound(file.to_path_buf()));
        }
        let path = normalize_entry_path(entry_path)?;
        trace!("Staged {file:?} as {path:?}");
        self.entries
            .insert(path, EntrySource::External(file.to_path_buf()));
        Ok(())
    }

    /// Remove an entry, returning its source
    pub fn remove(&mut self, path: &str) -> Result<EntrySource> {
        self.entries
            .remove(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))
    }

    /// Iterate entry paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate entries in sorted path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntrySource)> {
        self.entries.iter().map(|(path, source)| (path.as_str(), source))
    }

    pub(crate) fn insert(&mut self, path: String, source: EntrySource) {
        self.entries.insert(path, source);
    }
}

/// Normalize an entry path to forward slashes without a leading slash
fn normalize_entry_path(path: &str) -> Result<String> {
    let normalized = path.replace('\\', "/");
    let normalized = normalized.trim_start_matches('/');
    if normalized.is_empty() {
        return Err(Error::InvalidEntryPath(path.to_string()));
    }
    Ok(normalized.to_string())
}

/// Decode a compressed index blob into a directory.
///
/// Obfuscating versions XOR offsets and lengths with `step`. Entries whose
/// value is `None` or an empty list are skipped with a warning rather than
/// failing the whole load.
pub fn decode_index(blob: &[u8], version: RpaVersion, step: u64) -> Result<ArchiveDirectory> {
    let mut pickled = Vec::new();
    ZlibDecoder::new(blob)
        .read_to_end(&mut pickled)
        .map_err(|e| Error::InvalidIndex(format!("zlib: {e}")))?;

    let value = renpy_pickle::decode(&pickled)?;
    let pairs = value
        .into_dict()
        .ok_or_else(|| Error::InvalidIndex("index root is not a dict".into()))?;

    let mut directory = ArchiveDirectory::new();
    for (key, val) in pairs {
        let path = match key {
            Value::Str(s) => s,
            Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            other => {
                return Err(Error::InvalidIndex(format!(
                    "non-string entry path of type {}",
                    other.value_type()
                )));
            }
        };

        if val.is_none() {
            warn!("Skipping null index entry for {path:?}");
            continue;
        }
        let items = val.as_items().ok_or_else(|| {
            Error::InvalidIndex(format!(
                "entry {path:?} maps to {}, not a list",
                val.value_type()
            ))
        })?;

        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            ranges.push(decode_range(&path, item, version, step)?);
        }
        if ranges.is_empty() {
            warn!("Skipping index entry with no ranges for {path:?}");
            continue;
        }

        trace!("Indexed {path:?} with {} range(s)", ranges.len());
        directory.insert(path, EntrySource::Archive(ranges));
    }

    Ok(directory)
}

/// Decode one `(offset, length[, prefix])` tuple
fn decode_range(path: &str, item: &Value, version: RpaVersion, step: u64) -> Result<ByteRange> {
    let fields = item.as_items().ok_or_else(|| {
        Error::InvalidIndex(format!(
            "range for {path:?} is {}, not a tuple",
            item.value_type()
        ))
    })?;
    if fields.len() < 2 {
        return Err(Error::InvalidIndex(format!(
            "range for {path:?} has {} element(s), need at least 2",
            fields.len()
        )));
    }

    let offset = range_number(path, &fields[0])?;
    let length = range_number(path, &fields[1])?;
    let prefix = match fields.get(2) {
        None => Vec::new(),
        Some(Value::Str(s)) => s.clone().into_bytes(),
        Some(Value::Bytes(b)) => b.clone(),
        Some(other) => {
            return Err(Error::InvalidIndex(format!(
                "prefix for {path:?} is {}, not a string",
                other.value_type()
            )));
        }
    };

    let (offset, length) = if version.is_obfuscated() {
        (
            obfuscate::xor_value(offset, step),
            obfuscate::xor_value(length, step),
        )
    } else {
        (offset, length)
    };

    Ok(ByteRange {
        offset,
        length,
        prefix,
    })
}

fn range_number(path: &str, value: &Value) -> Result<u64> {
    match value.as_int() {
        Some(n) if n >= 0 => Ok(n as u64),
        Some(n) => Err(Error::InvalidIndex(format!(
            "negative range value {n} for {path:?}"
        ))),
        None => Err(Error::InvalidIndex(format!(
            "range value for {path:?} is {}, not an int",
            value.value_type()
        ))),
    }
}

/// Encode index records into a compressed pickle blob.
///
/// Versions before 3.0 write two-element tuples; later versions append an
/// empty prefix and XOR offsets and lengths with `step`. Every entry is
/// written as a single range.
pub fn encode_index(records: &[IndexRecord], version: RpaVersion, step: u64) -> Result<Vec<u8>> {
    let mut pairs = Vec::with_capacity(records.len());
    for record in records {
        let (offset, length) = if version.is_obfuscated() {
            (
                obfuscate::xor_value(record.offset, step),
                obfuscate::xor_value(record.length, step),
            )
        } else {
            (record.offset, record.length)
        };

        let mut fields = vec![index_number(offset)?, index_number(length)?];
        if version.index_has_prefix() {
            fields.push(Value::Str(String::new()));
        }
        pairs.push((
            Value::Str(record.path.clone()),
            Value::List(vec![Value::Tuple(fields)]),
        ));
    }

    let pickled = renpy_pickle::encode(&Value::Dict(pairs))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&pickled)?;
    Ok(encoder.finish()?)
}

fn index_number(value: u64) -> Result<Value> {
    let n = i64::try_from(value)
        .map_err(|_| Error::InvalidIndex(format!("index value {value:#x} overflows")))?;
    Ok(Value::Int(n))
}
