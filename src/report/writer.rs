// src/report/writer.rs

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::registry::RegistrySnapshot;
use crate::report::{render, rows_from_snapshot};

/// Write the report for `snapshot` to `path`.
///
/// The text goes to a temporary file in the same directory which is then
/// renamed over `path`, so readers see either the old or the new report.
pub fn save_atomic(snapshot: &RegistrySnapshot, path: &Path, max_width: usize) -> Result<()> {
    let text = render(&rows_from_snapshot(snapshot), max_width)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary report in {}", dir.display()))?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("replacing report {}", path.display()))?;
    Ok(())
}

/// Print the report for `snapshot` to `out`.
pub fn print_report(snapshot: &RegistrySnapshot, max_width: usize, mut out: impl Write) -> Result<()> {
    let text = render(&rows_from_snapshot(snapshot), max_width)?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}
