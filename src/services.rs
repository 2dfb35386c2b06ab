// src/services.rs

//! Upload and notification collaborators.
//!
//! The daemon never speaks a network protocol itself. Uploads and mail go
//! through a configured shell command; without one, uploads resolve to a
//! local `file://` URL and mail is only logged.

use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use crate::config::ConfigFile;
use crate::exec::command::{RunOptions, run_command, shell};

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Publishes a file and returns a URL for it.
pub trait Uploader: Send + Sync + Debug {
    fn upload<'a>(&'a self, path: &'a Path, name: &'a str) -> ServiceFuture<'a, String>;
}

/// A plain-text notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Message {
    /// RFC 822 style rendering, suitable for `sendmail -t`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(from) = &self.from {
            out.push_str(&format!("From: {from}\n"));
        }
        out.push_str(&format!("To: {}\n", self.to.join(", ")));
        out.push_str(&format!("Subject: {}\n\n", self.subject));
        out.push_str(&self.body);
        if !self.body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Delivers notifications.
pub trait Mailer: Send + Sync + Debug {
    fn send<'a>(&'a self, message: &'a Message) -> ServiceFuture<'a, ()>;

    /// Sender address used when a message does not set one.
    fn sender(&self) -> Option<&str> {
        None
    }
}

/// Uploader used when none is configured.
#[derive(Debug, Clone, Default)]
pub struct LocalUploader;

impl Uploader for LocalUploader {
    fn upload<'a>(&'a self, path: &'a Path, _name: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(async move { Ok(format!("file://{}", path.display())) })
    }
}

/// Runs `command` with `{path}` and `{name}` substituted; the last
/// non-empty stdout line is the URL.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    command: String,
}

impl CommandUploader {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Uploader for CommandUploader {
    fn upload<'a>(&'a self, path: &'a Path, name: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            let script = self
                .command
                .replace("{path}", &path.display().to_string())
                .replace("{name}", name);
            let output = run_command(
                shell(&script),
                RunOptions {
                    label: "uploader",
                    capture_stdout: true,
                    ..RunOptions::default()
                },
            )
            .await?;
            if !output.success() {
                bail!("uploader exited with status {}", output.code());
            }
            match output.last_line() {
                Some(url) => Ok(url.to_string()),
                None => bail!("uploader printed no URL"),
            }
        })
    }
}

/// Mailer used when no command is configured: messages go to the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    from: Option<String>,
}

impl LogMailer {
    pub fn new(from: Option<String>) -> Self {
        Self { from }
    }
}

impl Mailer for LogMailer {
    fn send<'a>(&'a self, message: &'a Message) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            info!(to = ?message.to, subject = %message.subject, "mail (not sent, no mailer command)");
            Ok(())
        })
    }

    fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }
}

/// Pipes the rendered message into `command` (e.g. `sendmail -t`).
#[derive(Debug, Clone)]
pub struct CommandMailer {
    command: String,
    from: Option<String>,
}

impl CommandMailer {
    pub fn new(command: impl Into<String>, from: Option<String>) -> Self {
        Self {
            command: command.into(),
            from,
        }
    }
}

impl Mailer for CommandMailer {
    fn send<'a>(&'a self, message: &'a Message) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let rendered = message.render();
            let output = run_command(
                shell(&self.command),
                RunOptions {
                    label: "mailer",
                    stdin: Some(&rendered),
                    ..RunOptions::default()
                },
            )
            .await?;
            if !output.success() {
                bail!("mailer exited with status {}", output.code());
            }
            Ok(())
        })
    }

    fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }
}

/// The collaborators tasks and the engine talk to.
#[derive(Debug, Clone)]
pub struct Services {
    pub uploader: Arc<dyn Uploader>,
    pub mailer: Arc<dyn Mailer>,
}

impl Services {
    pub fn new(uploader: Arc<dyn Uploader>, mailer: Arc<dyn Mailer>) -> Self {
        Self { uploader, mailer }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        let uploader: Arc<dyn Uploader> = match &cfg.uploader {
            Some(section) => Arc::new(CommandUploader::new(section.command.clone())),
            None => Arc::new(LocalUploader),
        };
        let from = cfg.mailer.as_ref().and_then(|m| m.from.clone());
        let mailer: Arc<dyn Mailer> = match cfg.mailer.as_ref().and_then(|m| m.command.clone()) {
            Some(command) => Arc::new(CommandMailer::new(command, from)),
            None => Arc::new(LogMailer::new(from)),
        };
        Self { uploader, mailer }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            uploader: Arc::new(LocalUploader),
            mailer: Arc::new(LogMailer::default()),
        }
    }
}
