// src/fs/mock.rs

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;

use super::FileSystem;

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug)]
struct MockNode {
    entry: MockEntry,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeMap<PathBuf, MockNode>,
    denied: BTreeSet<PathBuf>,
}

/// In-memory filesystem for discovery tests.
///
/// Parents are created implicitly. Every node carries a modification time
/// that tests can move around, and any path can be marked unreadable to
/// simulate a permission error.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock();
        ensure_parents(&mut state, &path);
        state.nodes.insert(
            path,
            MockNode {
                entry: MockEntry::File(content.into()),
                modified: SystemTime::now(),
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock();
        ensure_parents(&mut state, &path);
        state.nodes.entry(path).or_insert(MockNode {
            entry: MockEntry::Dir,
            modified: SystemTime::now(),
        });
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state.lock();
        state.nodes.retain(|p, _| !p.starts_with(path));
    }

    pub fn set_modified(&self, path: impl AsRef<Path>, when: SystemTime) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(path.as_ref()) {
            node.modified = when;
        }
    }

    /// Make reads of `path` fail with `PermissionDenied` until [`allow`] is called.
    ///
    /// [`allow`]: MockFileSystem::allow
    pub fn deny(&self, path: impl AsRef<Path>) {
        self.state.lock().denied.insert(path.as_ref().to_path_buf());
    }

    pub fn allow(&self, path: impl AsRef<Path>) {
        self.state.lock().denied.remove(path.as_ref());
    }
}

fn ensure_parents(state: &mut MockState, path: &Path) {
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if dir.as_os_str().is_empty() {
            break;
        }
        state.nodes.entry(dir.to_path_buf()).or_insert(MockNode {
            entry: MockEntry::Dir,
            modified: SystemTime::now(),
        });
        parent = dir.parent();
    }
}

fn denied(path: &Path) -> anyhow::Error {
    anyhow::Error::new(io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("permission denied: {:?}", path),
    ))
}

fn not_found(path: &Path) -> anyhow::Error {
    anyhow::Error::new(io::Error::new(
        io::ErrorKind::NotFound,
        format!("not found: {:?}", path),
    ))
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.state.lock();
        if state.denied.contains(path) {
            return Err(denied(path));
        }
        match state.nodes.get(path).map(|n| &n.entry) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(not_found(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        let state = self.state.lock();
        matches!(state.nodes.get(path).map(|n| &n.entry), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let state = self.state.lock();
        matches!(state.nodes.get(path).map(|n| &n.entry), Some(MockEntry::Dir))
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let state = self.state.lock();
        state
            .nodes
            .get(path)
            .map(|n| n.modified)
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock();
        if state.denied.contains(path) {
            return Err(denied(path));
        }
        match state.nodes.get(path).map(|n| &n.entry) {
            Some(MockEntry::Dir) => Ok(state
                .nodes
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            Some(MockEntry::File(_)) => Err(anyhow!("Not a directory: {:?}", path)),
            None => Err(not_found(path)),
        }
    }
}
