// src/watch/log_once.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Remembers the last message logged for each unit so an unchanged
/// condition is reported once instead of every poll cycle.
#[derive(Debug, Default)]
pub struct LogOnce {
    last: HashMap<PathBuf, String>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `message` differs from what was last logged for `unit`.
    pub fn first(&mut self, unit: &Path, message: &str) -> bool {
        match self.last.get(unit) {
            Some(prev) if prev == message => false,
            _ => {
                self.last.insert(unit.to_path_buf(), message.to_string());
                true
            }
        }
    }

    /// Forget `unit`, so its next message is logged again.
    pub fn clear(&mut self, unit: &Path) {
        self.last.remove(unit);
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}
