//! Reading entry content out of archive files and staged files

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::index::EntrySource;

/// Read the full content of an entry.
///
/// Archive-backed entries concatenate each range's prefix and body in
/// order; staged entries read the file they point at. `archive` is the
/// path of the loaded archive file, if any.
pub fn read_entry(archive: Option<&Path>, source: &EntrySource) -> Result<Vec<u8>> {
    match source {
        EntrySource::External(path) => {
            if !path.is_file() {
                return Err(Error::PathNotFound(path.clone()));
            }
            Ok(fs::read(path)?)
        }
        EntrySource::Archive(ranges) => {
            let archive = archive.ok_or(Error::NoSourceArchive)?;
            let mut file = File::open(archive)?;
            let file_len = file.metadata()?.len();

            let mut content = Vec::new();
            for range in ranges {
                // length counts the prefix; only the remainder is read
                // from the archive.
                let body_len = range
                    .length
                    .checked_sub(range.prefix.len() as u64)
                    .ok_or_else(|| {
                        Error::InvalidIndex(format!(
                            "prefix longer than range length {} at {:#x}",
                            range.length, range.offset
                        ))
                    })?;
                let end = range.offset.checked_add(body_len).ok_or_else(|| {
                    Error::InvalidIndex(format!("range overflow at {:#x}", range.offset))
                })?;
                if end > file_len {
                    return Err(Error::InvalidIndex(format!(
                        "range {:#x}+{body_len} runs past the end of {archive:?}",
                        range.offset
                    )));
                }

                content.extend_from_slice(&range.prefix);
                file.seek(SeekFrom::Start(range.offset))?;
                let mut body = vec![0u8; body_len as usize];
                file.read_exact(&mut body)?;
                content.append(&mut body);
            }
            Ok(content)
        }
    }
}

/// Extract an entry to disk under `dest_root`, creating parent
/// directories as needed. Returns the path written.
pub fn extract_entry(
    archive: Option<&Path>,
    entry_path: &str,
    source: &EntrySource,
    dest_root: &Path,
) -> Result<PathBuf> {
    if !dest_root.is_dir() {
        return Err(Error::PathNotFound(dest_root.to_path_buf()));
    }

    let relative = safe_relative_path(entry_path)?;
    let content = read_entry(archive, source)?;

    let target = dest_root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, &content)?;

    debug!("Extracted {entry_path:?} to {target:?} ({} bytes)", content.len());
    Ok(target)
}

/// Turn an entry path into a relative filesystem path that cannot escape
/// the extraction root. Backslashes count as separators; `..` segments are
/// rejected outright.
pub(crate) fn safe_relative_path(entry_path: &str) -> Result<PathBuf> {
    let normalized = entry_path.replace('\\', "/");
    let mut relative = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Error::InvalidEntryPath(entry_path.to_string())),
            name => relative.push(name),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(Error::InvalidEntryPath(entry_path.to_string()));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ByteRange;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_external_entry() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("staged.txt");
        std::fs::write(&file, b"staged content").unwrap();

        let source = EntrySource::External(file.clone());
        assert_eq!(read_entry(None, &source).unwrap(), b"staged content");

        std::fs::remove_file(&file).unwrap();
        assert!(matches!(
            read_entry(None, &source),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_read_archive_ranges_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.rpa");
        std::fs::write(&archive, b"0123456789abcdef").unwrap();

        let source = EntrySource::Archive(vec![
            ByteRange {
                offset: 2,
                length: 5,
                prefix: b"P:".to_vec(),
            },
            ByteRange {
                offset: 10,
                length: 4,
                prefix: Vec::new(),
            },
        ]);
        assert_eq!(read_entry(Some(&archive), &source).unwrap(), b"P:234abcd");
    }

    #[test]
    fn test_read_rejects_prefix_longer_than_range() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.rpa");
        std::fs::write(&archive, b"0123456789").unwrap();

        let source = EntrySource::Archive(vec![ByteRange {
            offset: 0,
            length: 2,
            prefix: b"too long".to_vec(),
        }]);
        assert!(matches!(
            read_entry(Some(&archive), &source),
            Err(Error::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_read_rejects_range_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.rpa");
        std::fs::write(&archive, b"short").unwrap();

        let source = EntrySource::Archive(vec![ByteRange {
            offset: 3,
            length: 100,
            prefix: Vec::new(),
        }]);
        assert!(matches!(
            read_entry(Some(&archive), &source),
            Err(Error::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_read_archive_entry_without_archive() {
        let source = EntrySource::Archive(vec![ByteRange {
            offset: 0,
            length: 1,
            prefix: Vec::new(),
        }]);
        assert!(matches!(
            read_entry(None, &source),
            Err(Error::NoSourceArchive)
        ));
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("img/bg.png").unwrap(),
            PathBuf::from("img/bg.png")
        );
        assert_eq!(
            safe_relative_path("dir\\sub\\f.txt").unwrap(),
            PathBuf::from("dir/sub/f.txt")
        );
        assert_eq!(safe_relative_path("./a//b").unwrap(), PathBuf::from("a/b"));

        assert!(safe_relative_path("../escape.txt").is_err());
        assert!(safe_relative_path("a/../../b").is_err());
        assert!(safe_relative_path("").is_err());
        assert!(safe_relative_path("/").is_err());
    }

    #[test]
    fn test_extract_entry_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.rpa");
        std::fs::write(&archive, b"hello world").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        let source = EntrySource::Archive(vec![ByteRange {
            offset: 6,
            length: 5,
            prefix: Vec::new(),
        }]);
        let written =
            extract_entry(Some(&archive), "deep/nested/w.txt", &source, &dest).unwrap();

        assert_eq!(written, dest.join("deep/nested/w.txt"));
        assert_eq!(std::fs::read(&written).unwrap(), b"world");
    }

    #[test]
    fn test_extract_requires_existing_dest() {
        let dir = tempfile::tempdir().unwrap();
        let source = EntrySource::Archive(vec![]);
        assert!(matches!(
            extract_entry(None, "a.txt", &source, &dir.path().join("missing")),
            Err(Error::PathNotFound(_))
        ));
    }
}
