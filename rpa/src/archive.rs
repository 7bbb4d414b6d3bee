//! Loaded archive facade: load, list, extract, stage, and save

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::builder::{ArchiveBuilder, SaveOptions};
use crate::error::{Error, Result};
use crate::header::{self, RpaHeader};
use crate::index::{self, ArchiveDirectory, EntrySource};
use crate::preview::{self, PreviewKind};
use crate::reader;
use crate::rpyc;
use crate::version::RpaVersion;

/// An RPA archive: its directory plus where the bytes live.
///
/// A loaded archive remembers the file it came from so ranged entries can
/// be read lazily; a fresh archive starts empty and holds only staged
/// files until saved.
#[derive(Debug, Default)]
pub struct RpaArchive {
    archive_path: Option<PathBuf>,
    index_path: Option<PathBuf>,
    version: Option<RpaVersion>,
    step: u64,
    index: ArchiveDirectory,
}

impl RpaArchive {
    /// Create an empty archive with nothing staged
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an archive from disk, detecting its version and decoding the
    /// full index. A `.rpi` path loads its sibling `.rpa` archive. Entry
    /// content is not read until asked for.
    pub fn load(path: &Path) -> Result<Self> {
        let archive_path = header::resolve_archive_path(path);
        let archive_path = archive_path.as_path();
        if !archive_path.is_file() {
            return Err(Error::PathNotFound(archive_path.to_path_buf()));
        }

        let file = File::open(archive_path)?;
        let mut file_reader = BufReader::new(file);
        let first_line = header::read_first_line(&mut file_reader)?;
        let RpaHeader {
            version,
            index_offset,
            step,
        } = header::detect(archive_path, &first_line)?;

        let (blob, index_path) = if version == RpaVersion::V1 {
            let companion = header::companion_index_path(archive_path);
            (fs::read(&companion)?, Some(companion))
        } else {
            let mut blob = Vec::new();
            file_reader.seek(SeekFrom::Start(index_offset))?;
            file_reader.read_to_end(&mut blob)?;
            (blob, None)
        };

        let index = index::decode_index(&blob, version, step)?;
        debug!(
            "Loaded RPA {version} archive with {} entries from {archive_path:?}",
            index.len()
        );

        Ok(Self {
            archive_path: Some(archive_path.to_path_buf()),
            index_path,
            version: Some(version),
            step,
            index,
        })
    }

    /// Path of the loaded archive file, if any
    pub fn path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }

    /// Path of the companion index file, for version 1.0 archives
    pub fn index_file(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// Detected version, if the archive was loaded from disk
    pub fn version(&self) -> Option<RpaVersion> {
        self.version
    }

    /// Obfuscation step folded from the header
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether an entry path is present
    pub fn contains(&self, entry_path: &str) -> bool {
        self.index.contains(entry_path)
    }

    /// Entry paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.index.paths()
    }

    /// Entries with their sources, in sorted path order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &EntrySource)> {
        self.index.iter()
    }

    /// Read access to the directory
    pub fn directory(&self) -> &ArchiveDirectory {
        &self.index
    }

    /// Stage a file on disk under `entry_path` for the next save
    pub fn stage_file(&mut self, entry_path: &str, file: &Path) -> Result<()> {
        self.index.stage_file(entry_path, file)
    }

    /// Remove an entry, returning its source
    pub fn remove_entry(&mut self, entry_path: &str) -> Result<EntrySource> {
        self.index.remove(entry_path)
    }

    /// Read an entry's full content into memory
    pub fn extract_data(&self, entry_path: &str) -> Result<Vec<u8>> {
        let source = self
            .index
            .get(entry_path)
            .ok_or_else(|| Error::EntryNotFound(entry_path.to_string()))?;
        reader::read_entry(self.archive_path.as_deref(), source)
    }

    /// Extract an entry under `dest_root`, returning the path written
    pub fn extract(&self, entry_path: &str, dest_root: &Path) -> Result<PathBuf> {
        let source = self
            .index
            .get(entry_path)
            .ok_or_else(|| Error::EntryNotFound(entry_path.to_string()))?;
        reader::extract_entry(self.archive_path.as_deref(), entry_path, source, dest_root)
    }

    /// Extract an entry into the directory the archive itself lives in
    pub fn extract_local(&self, entry_path: &str) -> Result<PathBuf> {
        let archive = self.archive_path.as_deref().ok_or(Error::NoSourceArchive)?;
        let dest = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        self.extract(entry_path, dest)
    }

    /// Extract many entries, collecting per-entry failures instead of
    /// stopping at the first. The cancel flag is checked before each
    /// entry.
    pub fn extract_batch<I, S>(
        &self,
        entry_paths: I,
        dest_root: &Path,
        cancel: &AtomicBool,
    ) -> ExtractReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ExtractReport::default();
        for entry_path in entry_paths {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                debug!("Extraction cancelled after {} entries", report.written.len());
                break;
            }

            let entry_path = entry_path.as_ref();
            match self.extract(entry_path, dest_root) {
                Ok(written) => report.written.push((entry_path.to_string(), written)),
                Err(e) => {
                    warn!("Failed to extract {entry_path:?}: {e}");
                    report.failures.push((entry_path.to_string(), e));
                }
            }
        }
        report
    }

    /// Classify an entry by extension and read its content
    pub fn preview(&self, entry_path: &str) -> Result<(PreviewKind, Vec<u8>)> {
        let data = self.extract_data(entry_path)?;
        Ok((preview::classify(entry_path), data))
    }

    /// Parse the slot table of a compiled script entry
    pub fn script_slots(&self, entry_path: &str) -> Result<BTreeMap<u32, Vec<u8>>> {
        let data = self.extract_data(entry_path)?;
        rpyc::parse_slots(&data)
    }

    /// Decompressed source pickle of a compiled script entry
    pub fn script_source(&self, entry_path: &str) -> Result<Vec<u8>> {
        let data = self.extract_data(entry_path)?;
        rpyc::source_pickle(&data)
    }

    /// Save options matching the loaded version, or 3.0 for a fresh
    /// archive
    pub fn default_save_options(&self) -> SaveOptions {
        SaveOptions {
            version: self.version.unwrap_or(RpaVersion::V3),
            ..SaveOptions::default()
        }
    }

    /// Write the archive to `target` and reload from the written file.
    ///
    /// The write is staged and validated before the target is touched;
    /// on success every entry becomes archive-backed again.
    pub fn save(&mut self, target: &Path, options: SaveOptions) -> Result<PathBuf> {
        let mut builder = ArchiveBuilder::new(&self.index, options);
        if let Some(source) = self.archive_path.as_deref() {
            builder = builder.source_archive(source);
        }
        let written = builder.build(target)?;

        *self = Self::load(&written)?;
        Ok(written)
    }
}

/// Result of a batch extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Entries written, in extraction order, with the paths they landed at
    pub written: Vec<(String, PathBuf)>,
    /// Entries that failed, with their errors
    pub failures: Vec<(String, Error)>,
    /// Whether the batch stopped on the cancel flag
    pub cancelled: bool,
}

impl ExtractReport {
    /// Whether every requested entry was written
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}
