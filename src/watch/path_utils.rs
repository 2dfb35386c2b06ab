// src/watch/path_utils.rs

//! Naming helpers for run-tree paths and project work directories.

use std::path::Path;

/// Replace everything outside `[A-Za-z0-9_-]` with `_`.
pub fn slugify(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Work directory name for a project.
///
/// `<run_id>-<experiment>-<project>`, with `-<index>` appended for every
/// alignment after the first so repeated demultiplexing passes stay apart.
pub fn work_dir_name(run_id: &str, experiment: &str, project: &str, alignment_index: usize) -> String {
    let mut name = [run_id, experiment, project]
        .iter()
        .map(|s| slugify(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if alignment_index > 0 {
        name.push_str(&format!("-{alignment_index}"));
    }
    name
}

/// Final path component as a string, or the whole path if there is none.
pub fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
