//! Extraction, preview, and script container tests against built
//! archives

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Compression;
use flate2::write::ZlibEncoder;
use pretty_assertions::assert_eq;
use rpa::{Error, PreviewKind, RpaArchive, SaveOptions};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build a saved archive from (entry path, content) pairs and reload it
fn build_archive(dir: &Path, files: &[(&str, &[u8])]) -> RpaArchive {
    let mut archive = RpaArchive::new();
    for (i, (entry_path, content)) in files.iter().enumerate() {
        let file = dir.join(format!("input_{i}.bin"));
        fs::write(&file, content).unwrap();
        archive.stage_file(entry_path, &file).unwrap();
    }
    archive
        .save(&dir.join("fixture.rpa"), SaveOptions::default())
        .unwrap();
    archive
}

/// Minimal compiled script container with the given slot payloads
fn script_container(slots: &[(u32, &[u8])]) -> Vec<u8> {
    let magic = b"RENPY RPC2";
    let table_len = 12 * (slots.len() + 1);
    let mut payload_start = magic.len() + table_len;

    let mut data = magic.to_vec();
    for (slot, payload) in slots {
        data.extend_from_slice(&slot.to_le_bytes());
        data.extend_from_slice(&(payload_start as u32).to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        payload_start += payload.len();
    }
    data.extend_from_slice(&[0u8; 12]);
    for (_, payload) in slots {
        data.extend_from_slice(payload);
    }
    data
}

#[test]
fn test_extract_single_entry_creates_directories() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("gui/menu/main.png", b"pixels")]);

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    let written = archive.extract("gui/menu/main.png", &dest).unwrap();

    assert_eq!(written, dest.join("gui/menu/main.png"));
    assert_eq!(fs::read(&written).unwrap(), b"pixels");
}

#[test]
fn test_extract_requires_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("a.txt", b"alpha")]);

    assert!(matches!(
        archive.extract("a.txt", &dir.path().join("missing")),
        Err(Error::PathNotFound(_))
    ));
}

#[test]
fn test_extract_local_lands_next_to_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("docs/readme.txt", b"hi")]);

    let written = archive.extract_local("docs/readme.txt").unwrap();
    assert_eq!(written, dir.path().join("docs/readme.txt"));
    assert_eq!(fs::read(&written).unwrap(), b"hi");

    let fresh = RpaArchive::new();
    assert!(matches!(
        fresh.extract_local("docs/readme.txt"),
        Err(Error::NoSourceArchive)
    ));
}

#[test]
fn test_extract_unknown_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("a.txt", b"alpha")]);

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    assert!(matches!(
        archive.extract("ghost.txt", &dest),
        Err(Error::EntryNotFound(_))
    ));
}

#[test]
fn test_extract_staged_entry_without_saving() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("loose.txt");
    fs::write(&staged, b"not packed yet").unwrap();

    let mut archive = RpaArchive::new();
    archive.stage_file("docs/loose.txt", &staged).unwrap();

    assert_eq!(
        archive.extract_data("docs/loose.txt").unwrap(),
        b"not packed yet"
    );

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    let written = archive.extract("docs/loose.txt", &dest).unwrap();
    assert_eq!(fs::read(written).unwrap(), b"not packed yet");
}

#[test]
fn test_batch_collects_failures() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(
        dir.path(),
        &[("a.txt", b"alpha"), ("b.txt", b"beta")],
    );

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    let cancel = AtomicBool::new(false);
    let report = archive.extract_batch(["a.txt", "ghost.txt", "b.txt"], &dest, &cancel);

    assert_eq!(report.written.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "ghost.txt");
    assert!(matches!(report.failures[0].1, Error::EntryNotFound(_)));
    assert!(!report.cancelled);
    assert!(!report.is_complete());
}

#[test]
fn test_batch_honors_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("a.txt", b"alpha")]);

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    let cancel = AtomicBool::new(false);
    cancel.store(true, Ordering::Relaxed);
    let report = archive.extract_batch(["a.txt"], &dest, &cancel);

    assert!(report.cancelled);
    assert!(report.written.is_empty());
    assert!(!report.is_complete());
}

#[test]
fn test_traversal_entry_cannot_escape() {
    // Entry paths from the wild can carry `..`; extraction must refuse
    // them while raw reads still work.
    let dir = tempfile::tempdir().unwrap();
    let evil = dir.path().join("payload.bin");
    fs::write(&evil, b"outside?").unwrap();

    let mut archive = RpaArchive::new();
    archive.stage_file("../escape.txt", &evil).unwrap();
    archive
        .save(&dir.path().join("evil.rpa"), SaveOptions::default())
        .unwrap();

    assert_eq!(archive.extract_data("../escape.txt").unwrap(), b"outside?");

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    assert!(matches!(
        archive.extract("../escape.txt", &dest),
        Err(Error::InvalidEntryPath(_))
    ));
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_preview_classification() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(
        dir.path(),
        &[
            ("img/bg.png", b"not real pixels".as_slice()),
            ("script.rpy", b"label start:".as_slice()),
            ("bgm/theme.ogg", b"OggS".as_slice()),
            ("data/blob.dat", b"\x00\x01".as_slice()),
        ],
    );

    let (kind, data) = archive.preview("img/bg.png").unwrap();
    assert_eq!(kind, PreviewKind::Image);
    assert_eq!(data, b"not real pixels");

    let (kind, _) = archive.preview("script.rpy").unwrap();
    assert_eq!(kind, PreviewKind::Text);
    let (kind, _) = archive.preview("bgm/theme.ogg").unwrap();
    assert_eq!(kind, PreviewKind::Audio);
    let (kind, _) = archive.preview("data/blob.dat").unwrap();
    assert_eq!(kind, PreviewKind::Unknown);

    assert!(matches!(
        archive.preview("nope.png"),
        Err(Error::EntryNotFound(_))
    ));
}

#[test]
fn test_script_slots_and_source() {
    let pickled = renpy_pickle::encode(&renpy_pickle::Value::from("source here")).unwrap();
    let container = script_container(&[(1, &zlib(&pickled)), (2, b"static analysis")]);

    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("game/script.rpyc", &container)]);

    let slots = archive.script_slots("game/script.rpyc").unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[&2], b"static analysis");

    assert_eq!(archive.script_source("game/script.rpyc").unwrap(), pickled);

    // The compiled container previews as unknown data.
    let (kind, _) = archive.preview("game/script.rpyc").unwrap();
    assert_eq!(kind, PreviewKind::Unknown);
}

#[test]
fn test_script_slots_reject_plain_entries() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_archive(dir.path(), &[("script.rpy", b"label start:")]);

    assert!(matches!(
        archive.script_slots("script.rpy"),
        Err(Error::InvalidScript(_))
    ));
}
