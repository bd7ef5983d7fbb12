//! Low level helpers for line-oriented record files. Callers hold the
//! relevant named lock.

use crate::{IoContext, StoreError};
use ms_types::{RecordFormat, SampleIdentity, SchemaProfile};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Read the whole file, or None if it does not exist.
pub(crate) fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).at(path),
    }
}

/// Split into lines, keeping the terminators so that untouched lines can be
/// copied back byte for byte.
pub(crate) fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split_inclusive(|&b| b == b'\n').collect()
}

pub(crate) fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Decode every well-formed record, calling `on_bad` for the rest.
pub(crate) fn decode_all(
    bytes: &[u8],
    profile: SchemaProfile,
    mut on_bad: impl FnMut(&[u8], String),
) -> Vec<SampleIdentity> {
    let mut out = Vec::new();
    for line in split_lines(bytes) {
        if is_blank(line) {
            continue;
        }
        match decode_line(line, profile) {
            Ok(id) => out.push(id),
            Err(reason) => on_bad(line, reason),
        }
    }
    out
}

pub(crate) fn decode_line(line: &[u8], profile: SchemaProfile) -> Result<SampleIdentity, String> {
    let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
    ms_types::record::decode(text, profile).map_err(|e| e.to_string())
}

/// Append raw lines to `path` with a single write followed by `sync_data`.
///
/// If the file ends in a torn line (no trailing newline, left by a writer that
/// died mid-append) a newline is written first so the fragment stays isolated
/// on its own line instead of corrupting the first new record.
pub(crate) fn append_raw(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    if payload.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).at(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .at(path)?;

    let mut buf = Vec::with_capacity(payload.len() + 1);
    if !ends_with_newline(&mut file).at(path)? {
        buf.push(b'\n');
    }
    buf.extend_from_slice(payload);
    file.write_all(&buf).at(path)?;
    file.sync_data().at(path)
}

pub(crate) fn append_records(
    path: &Path,
    entries: &[SampleIdentity],
    format: RecordFormat,
    profile: SchemaProfile,
) -> Result<(), StoreError> {
    let payload: String = entries
        .iter()
        .map(|id| format.encode(id, profile))
        .collect();
    append_raw(path, payload.as_bytes())
}

/// True for an empty file or one whose last byte is a newline.
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Flush directory metadata so a completed rename survives power loss.
/// Not every filesystem supports fsync on a directory; failures are ignored.
pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        if let Err(e) = d.sync_all() {
            log::debug!("fsync of directory {} failed: {e}", dir.display());
        }
    }
}
