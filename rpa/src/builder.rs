//! Writing archives: stage to a temp file, validate, then commit
//!
//! A save never touches the target until the staged copy reloads
//! cleanly, so a failed write leaves any existing archive intact.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, warn};

use crate::archive::RpaArchive;
use crate::error::{Error, Result};
use crate::header::{self, STEP_MASK};
use crate::index::{self, ArchiveDirectory, IndexRecord};
use crate::reader;
use crate::version::RpaVersion;

/// Step written by default into version 3.0 headers
pub const DEFAULT_STEP: u64 = 0xDEAD_BEEF;

/// Options controlling how an archive is written
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Archive version to emit
    pub version: RpaVersion,
    /// Obfuscation step recorded in the header
    pub step: u64,
    /// Exclusive upper bound on random filler bytes inserted before each
    /// entry; zero disables padding
    pub padding: u32,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            version: RpaVersion::V3,
            step: DEFAULT_STEP,
            padding: 0,
        }
    }
}

/// Builder that stages, validates, and commits a new archive
pub struct ArchiveBuilder<'a> {
    directory: &'a ArchiveDirectory,
    source_archive: Option<&'a Path>,
    options: SaveOptions,
}

impl<'a> ArchiveBuilder<'a> {
    /// Create a builder over a directory of entries
    pub fn new(directory: &'a ArchiveDirectory, options: SaveOptions) -> Self {
        Self {
            directory,
            source_archive: None,
            options,
        }
    }

    /// Set the archive file that backs `EntrySource::Archive` entries
    pub fn source_archive(mut self, archive: &'a Path) -> Self {
        self.source_archive = Some(archive);
        self
    }

    /// Stage, validate, and commit the archive. Returns the path of the
    /// archive actually written, after target normalization.
    pub fn build(self, target: &Path) -> Result<PathBuf> {
        let staged = self.stage(target)?;
        let staged = staged.validate()?;
        staged.commit()
    }

    /// Write the archive to temp files next to the target without
    /// touching the target itself.
    pub fn stage(&self, target: &Path) -> Result<StagedArchive> {
        if self.directory.is_empty() {
            return Err(Error::EmptyArchive);
        }

        let target_archive = normalize_target(target);
        let temp_archive = temp_path_for(&target_archive);
        let (temp_index, target_index) = if self.options.version == RpaVersion::V1 {
            (
                Some(temp_archive.with_extension("rpi")),
                Some(header::companion_index_path(&target_archive)),
            )
        } else {
            (None, None)
        };

        debug!(
            "Staging {} entries as RPA {} into {:?}",
            self.directory.len(),
            self.options.version,
            temp_archive
        );

        let staged = StagedArchive {
            temp_archive,
            temp_index,
            target_archive,
            target_index,
            entry_count: self.directory.len(),
            committed: false,
        };
        self.write_contents(&staged)?;
        Ok(staged)
    }

    fn write_contents(&self, staged: &StagedArchive) -> Result<()> {
        let version = self.options.version;
        let wire_step = self.options.step & STEP_MASK;
        // A reloaded 3.2 header folds to a step of zero, so the index must
        // be obfuscated with zero for the archive to read back.
        let obf_step = match version {
            RpaVersion::V3 => wire_step,
            _ => 0,
        };

        let file = File::create(&staged.temp_archive)?;
        let mut writer = BufWriter::new(file);
        let mut offset: u64 = 0;

        let header_len = version.header_len();
        if header_len > 0 {
            // Reserve the header line; it is rewritten once the index
            // offset is known.
            writer.write_all(&vec![0u8; header_len as usize])?;
            offset += header_len;
        }

        let mut rng = rand::rng();
        let mut records = Vec::with_capacity(self.directory.len());
        for (path, source) in self.directory.iter() {
            let pad = pad_count(&mut rng, self.options.padding);
            if pad > 0 {
                let filler: Vec<u8> = (0..pad).map(|_| rng.random_range(1u8..=254)).collect();
                writer.write_all(&filler)?;
                offset += pad;
            }

            let content = reader::read_entry(self.source_archive, source)?;
            writer.write_all(&content)?;
            records.push(IndexRecord {
                path: path.to_string(),
                offset,
                length: content.len() as u64,
            });
            offset += content.len() as u64;
        }

        let index_offset = offset;
        let blob = index::encode_index(&records, version, obf_step)?;
        match &staged.temp_index {
            Some(index_path) => fs::write(index_path, &blob)?,
            None => writer.write_all(&blob)?,
        }

        if header_len > 0 {
            writer.seek(SeekFrom::Start(0))?;
            let line = header::emit(version, index_offset, wire_step);
            writer.write_all(line.as_bytes())?;
        }
        writer.flush()?;

        debug!(
            "Staged {} entries, index at {index_offset:#x}",
            records.len()
        );
        Ok(())
    }
}

/// An archive written to temp files, awaiting validation and commit.
///
/// Dropping an uncommitted stage removes its temp files.
pub struct StagedArchive {
    temp_archive: PathBuf,
    temp_index: Option<PathBuf>,
    target_archive: PathBuf,
    target_index: Option<PathBuf>,
    entry_count: usize,
    committed: bool,
}

impl StagedArchive {
    /// Path of the staged temp archive
    pub fn temp_path(&self) -> &Path {
        &self.temp_archive
    }

    /// Reload the staged archive from disk and check it is intact
    pub fn validate(self) -> Result<Self> {
        debug!("Validating staged archive {:?}", self.temp_archive);
        let reloaded = RpaArchive::load(&self.temp_archive)
            .map_err(|e| Error::CorruptedArchive(e.to_string()))?;
        if reloaded.len() != self.entry_count {
            return Err(Error::CorruptedArchive(format!(
                "expected {} entries, reloaded {}",
                self.entry_count,
                reloaded.len()
            )));
        }
        Ok(self)
    }

    /// Copy the temp files over the target and remove them
    pub fn commit(mut self) -> Result<PathBuf> {
        debug!("Committing staged archive to {:?}", self.target_archive);
        fs::copy(&self.temp_archive, &self.target_archive)?;
        if let (Some(temp), Some(target)) = (&self.temp_index, &self.target_index) {
            fs::copy(temp, target)?;
        }
        self.committed = true;
        self.cleanup();
        Ok(self.target_archive.clone())
    }

    fn cleanup(&self) {
        for path in [Some(&self.temp_archive), self.temp_index.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove temp file {path:?}: {e}");
                }
            }
        }
    }
}

impl Drop for StagedArchive {
    fn drop(&mut self) {
        if !self.committed {
            self.cleanup();
        }
    }
}

/// Number of filler bytes to insert for a padding bound
fn pad_count<R: Rng>(rng: &mut R, bound: u32) -> u64 {
    match bound {
        0 => 0,
        1 => 1,
        bound => u64::from(rng.random_range(1..bound)),
    }
}

/// Force the target to an `.rpa` path: companion `.rpi` targets swap
/// extension, anything else gains `.rpa`.
fn normalize_target(target: &Path) -> PathBuf {
    match target.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("rpa") => target.to_path_buf(),
        Some(ext) if ext.eq_ignore_ascii_case("rpi") => target.with_extension("rpa"),
        _ => {
            let mut name = target.as_os_str().to_os_string();
            name.push(".rpa");
            PathBuf::from(name)
        }
    }
}

/// Temp archive next to the target, named after it with a timestamp and
/// a random tag. Keeps the `.rpa` extension so the validation reload
/// treats it like any other archive.
fn temp_path_for(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("archive");
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let tag: u32 = rand::rng().random();
    target.with_file_name(format!("{stem}_{timestamp}_{tag:08x}.rpa"))
}
