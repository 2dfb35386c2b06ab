// src/task/builtin/mod.rs

//! Tasks shipped with the daemon.
//!
//! | task         | order | after      |
//! |--------------|-------|------------|
//! | `noop`       | 0     |            |
//! | `fail`       | 1     |            |
//! | `copy`       | 2     |            |
//! | `trim`       | 10    |            |
//! | `merge`      | 11    | `trim`     |
//! | `mergereads` | 11    | `trim`     |
//! | `assemble`   | 12    | `merge`    |
//! | `manual`     | 100   |            |
//! | `geneious`   | 101   | `assemble` |
//! | `metadata`   | 1000  |            |
//! | `package`    | 1001  | `metadata` |
//! | `upload`     | 1002  | `package`  |
//! | `email`      | 1003  | `upload`   |

mod assemble;
mod basic;
mod delivery;
mod gated;
mod reads;

use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::services::Services;
use crate::task::Task;

pub use assemble::AssembleTask;
pub use basic::{CopyTask, FailTask, MetadataTask, NoopTask};
pub use delivery::{DEFAULT_SUBJECT, DEFAULT_TEXT, EmailTask, PackageTask, UploadTask, render_template, zip_dir};
pub use gated::{GeneiousTask, ManualTask};
pub use reads::{MergeReadsTask, MergeTask, TrimTask};

/// Names of every built-in task.
pub const BUILTIN_NAMES: [&str; 13] = [
    "noop",
    "fail",
    "copy",
    "trim",
    "merge",
    "mergereads",
    "assemble",
    "manual",
    "geneious",
    "metadata",
    "package",
    "upload",
    "email",
];

/// One instance of every built-in task.
pub fn all(services: &Services) -> Vec<Arc<dyn Task>> {
    vec![
        Arc::new(NoopTask::new()),
        Arc::new(FailTask::new()),
        Arc::new(CopyTask::new()),
        Arc::new(TrimTask::new()),
        Arc::new(MergeTask::new()),
        Arc::new(MergeReadsTask::new()),
        Arc::new(AssembleTask::new()),
        Arc::new(ManualTask::new()),
        Arc::new(GeneiousTask::new()),
        Arc::new(MetadataTask::new()),
        Arc::new(PackageTask::new()),
        Arc::new(UploadTask::new(Arc::clone(&services.uploader))),
        Arc::new(EmailTask::new(Arc::clone(&services.mailer))),
    ]
}

/// Run filesystem-heavy work off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| anyhow!("blocking task panicked or was cancelled: {err}"))?
}
