//! Error-record export: permanently failed items, one JSON object per line

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use scrapeline_core::ErrorRecord;

const PREFIX: &str = "errors-";

/// Pick `errors-{run}.jsonl` (millisecond timestamp), adding `-N` until the
/// name is free.
fn export_name(dir: &Path, run_started_at: DateTime<Utc>) -> String {
    let stamp = run_started_at.format("%Y%m%dT%H%M%S%.3fZ");
    let mut name = format!("{PREFIX}{stamp}.jsonl");
    let mut n = 1u32;
    while dir.join(&name).exists() {
        name = format!("{PREFIX}{stamp}-{n}.jsonl");
        n += 1;
    }
    name
}

/// Write `records` to `{dir}/errors-{run}.jsonl` via a tmp file and rename.
/// An existing export is never replaced.
///
/// Returns `None` without touching the filesystem when there is nothing to
/// export.
pub fn export_error_records(
    dir: &Path,
    records: &[ErrorRecord],
    run_started_at: DateTime<Utc>,
) -> io::Result<Option<PathBuf>> {
    if records.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(dir)?;
    let name = export_name(dir, run_started_at);
    let path = dir.join(&name);
    let tmp = dir.join(format!("{name}.tmp"));

    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        for record in records {
            serde_json::to_writer(&mut w, record)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        w.get_ref().sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    log::info!(
        "wrote {} error records to {}",
        records.len(),
        path.display()
    );
    Ok(Some(path))
}

/// Existing error-record exports in `dir`, oldest first.
pub fn list_error_exports(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(paths),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        let is_export = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(".jsonl"));
        if is_export {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
