//! Archive header line detection, parsing, and emission
//!
//! Versions 2.0 and up carry a single ASCII header line at offset zero.
//! Version 1.0 archives have no header at all and are recognized by a
//! sibling `.rpi` index file.

use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::obfuscate;
use crate::version::RpaVersion;

/// Only the low 32 bits of the step survive the header round trip
pub(crate) const STEP_MASK: u64 = 0xFFFF_FFFF;

/// Longest header line we are willing to scan for before giving up
const MAX_HEADER_LINE: u64 = 4096;

/// Parsed archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpaHeader {
    /// Detected archive version
    pub version: RpaVersion,
    /// Absolute offset of the compressed index blob
    pub index_offset: u64,
    /// Obfuscation step folded from the header tokens
    pub step: u64,
}

/// Identify the archive version from its first line.
///
/// Magic prefixes win; a headerless file is version 1.0 only when it
/// carries an archive extension and a sibling `.rpi` index exists next
/// to it.
pub fn detect(archive_path: &Path, first_line: &str) -> Result<RpaHeader> {
    for version in [RpaVersion::V32, RpaVersion::V3, RpaVersion::V2] {
        if let Some(magic) = version.magic() {
            if first_line.starts_with(magic) {
                debug!("Detected RPA {} header in {:?}", version, archive_path);
                return parse_tokens(first_line, version);
            }
        }
    }

    if has_archive_extension(archive_path) && companion_index_path(archive_path).is_file() {
        debug!("No header magic, treating {archive_path:?} as version 1.0");
        return Ok(RpaHeader {
            version: RpaVersion::V1,
            index_offset: 0,
            step: 0,
        });
    }

    Err(Error::UnsupportedFormat(archive_path.to_path_buf()))
}

/// Parse the whitespace-separated hex tokens of a header line.
///
/// Version 3.0 folds every token after the offset into the step; version
/// 3.2 skips one reserved token first, so its emitted three-token header
/// folds to a step of zero.
pub fn parse_tokens(line: &str, version: RpaVersion) -> Result<RpaHeader> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let offset_token = tokens
        .get(1)
        .ok_or_else(|| Error::InvalidHeader("missing index offset".into()))?;
    let index_offset = u64::from_str_radix(offset_token, 16)
        .map_err(|_| Error::InvalidHeader(format!("bad index offset {offset_token:?}")))?;

    let step = match version {
        RpaVersion::V1 | RpaVersion::V2 => 0,
        RpaVersion::V3 => obfuscate::fold_step(tokens.get(2..).unwrap_or(&[]))?,
        RpaVersion::V32 => obfuscate::fold_step(tokens.get(3..).unwrap_or(&[]))?,
    };

    Ok(RpaHeader {
        version,
        index_offset,
        step,
    })
}

/// Render the header line for an archive being written.
///
/// Version 1.0 has no header and renders as an empty string. Obfuscating
/// versions write the masked step into the slot after the offset.
pub fn emit(version: RpaVersion, index_offset: u64, step: u64) -> String {
    match version.magic() {
        None => String::new(),
        Some(magic) if version.is_obfuscated() => {
            let wire_step = step & STEP_MASK;
            format!("{magic}{index_offset:016x} {wire_step:08x}\n")
        }
        Some(magic) => format!("{magic}{index_offset:016x}\n"),
    }
}

/// Path of the sibling index file used by version 1.0 archives
pub fn companion_index_path(archive_path: &Path) -> PathBuf {
    archive_path.with_extension("rpi")
}

/// Resolve the content file a load request refers to. Opening a `.rpi`
/// index directly loads its sibling `.rpa` archive.
pub fn resolve_archive_path(path: &Path) -> PathBuf {
    if extension_matches(path, "rpi") {
        path.with_extension("rpa")
    } else {
        path.to_path_buf()
    }
}

fn has_archive_extension(path: &Path) -> bool {
    extension_matches(path, "rpa") || extension_matches(path, "rpi")
}

fn extension_matches(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(wanted))
}

/// Read the first line of an archive without scanning past a sane bound.
///
/// Binary junk without a newline stops at the bound and simply fails the
/// magic checks downstream.
pub(crate) fn read_first_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(MAX_HEADER_LINE)
        .read_until(b'\n', &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
