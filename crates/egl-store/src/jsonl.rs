//! JSON-Lines persistence: one canonical JSON record per line.
//!
//! Ledgers are rewritten whole with an atomic replace. The nonce registry
//! grows by appends under a lock (see `nonce_registry`).

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use egl_kernel::canonical::canonical_json_string;
use egl_kernel::{LedgerRecord, ProvenanceLedger};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Read records from a JSONL reader. Blank lines are skipped.
pub fn read_records<T: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<T>, JsonlError> {
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| JsonlError::Io(line_no + 1, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: T =
            serde_json::from_str(trimmed).map_err(|e| JsonlError::Parse(line_no + 1, e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

/// Write each value as one canonical line.
pub fn write_records(writer: &mut impl Write, records: &[Value]) -> Result<(), JsonlError> {
    for record in records {
        writeln!(writer, "{}", canonical_json_string(record)).map_err(|e| JsonlError::Io(0, e.to_string()))?;
    }
    Ok(())
}

pub fn read_records_from_path<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, JsonlError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| JsonlError::Io(0, format!("{}: {e}", path.display())))?;
    validate_substrate_bytes(path, &bytes)?;
    read_records(BufReader::new(bytes.as_slice()))
}

/// Replace the file at `path` with `records`. The new content lands in a
/// sibling temp file first and is renamed over the target.
pub fn write_records_to_path(path: impl AsRef<Path>, records: &[Value]) -> Result<(), JsonlError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| JsonlError::Io(0, format!("{}: {e}", parent.display())))?;
    }

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), JsonlError> {
        let file =
            File::create(&tmp_path).map_err(|e| JsonlError::Io(0, format!("{}: {e}", tmp_path.display())))?;
        let mut writer = BufWriter::new(file);
        write_records(&mut writer, records)?;
        let file = writer
            .into_inner()
            .map_err(|e| JsonlError::Io(0, format!("{}: {e}", tmp_path.display())))?;
        file.sync_all()
            .map_err(|e| JsonlError::Io(0, format!("{}: {e}", tmp_path.display())))?;
        Ok(())
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        JsonlError::Io(0, format!("{} -> {}: {e}", tmp_path.display(), path.display()))
    })
}

/// Append one canonical line, creating the file if needed.
pub fn append_record(path: impl AsRef<Path>, record: &Value) -> Result<(), JsonlError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| JsonlError::Io(0, format!("{}: {e}", parent.display())))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| JsonlError::Io(0, format!("{}: {e}", path.display())))?;
    writeln!(file, "{}", canonical_json_string(record))
        .map_err(|e| JsonlError::Io(0, format!("{}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| JsonlError::Io(0, format!("{}: {e}", path.display())))
}

/// Write a run ledger in `(fixture_id, seq)` order.
pub fn write_ledger_to_path(path: impl AsRef<Path>, ledger: &ProvenanceLedger) -> Result<(), JsonlError> {
    let values = ledger
        .ordered()
        .into_iter()
        .map(LedgerRecord::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| JsonlError::Serialize(e.to_string()))?;
    write_records_to_path(path, &values)
}

pub fn read_ledger_from_path(path: impl AsRef<Path>) -> Result<ProvenanceLedger, JsonlError> {
    let records: Vec<LedgerRecord> = read_records_from_path(path)?;
    Ok(ProvenanceLedger::from_records(records))
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}

fn validate_substrate_bytes(path: &Path, bytes: &[u8]) -> Result<(), JsonlError> {
    if bytes.contains(&0) {
        return Err(JsonlError::Corrupt(format!("{}: contains NUL byte(s)", path.display())));
    }
    if std::str::from_utf8(bytes).is_err() {
        return Err(JsonlError::Corrupt(format!(
            "{}: contains non-UTF-8 byte sequence(s)",
            path.display()
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, String),

    #[error("line {0}: parse error: {1}")]
    Parse(usize, String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupted ledger file: {0}")]
    Corrupt(String),
}
