// src/exec/command.rs

//! External process runner shared by built-in tasks, custom tasks and the
//! collaborator services.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::task::TaskLog;

/// Build a `sh -c <script>` command.
pub fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Build a command from a program and its arguments.
pub fn program<I, S>(program: &str, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Per-invocation options for [`run_command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions<'a> {
    /// Name used in tracing fields.
    pub label: &'a str,
    /// Receives every stdout/stderr line.
    pub log: Option<&'a TaskLog>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<&'a str>,
    /// Keep stdout lines in [`CommandOutput::stdout`].
    pub capture_stdout: bool,
    pub cwd: Option<&'a Path>,
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
}

impl CommandOutput {
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last non-empty stdout line, trimmed.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }
}

/// Run a command to completion, streaming its output into the task log.
///
/// The child is killed if this future is dropped. A non-zero exit is not an
/// error here; callers decide what it means.
pub async fn run_command(mut cmd: Command, opts: RunOptions<'_>) -> Result<CommandOutput> {
    if let Some(cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if opts.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    debug!(label = opts.label, command = ?cmd.as_std(), "spawning process");
    if let Some(log) = opts.log {
        log.note(&format!("running: {:?}", cmd.as_std()));
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for '{}'", opts.label))?;

    if let (Some(input), Some(mut stdin)) = (opts.stdin, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .with_context(|| format!("writing stdin of '{}'", opts.label))?;
        // Dropping closes the pipe so the child sees EOF.
        drop(stdin);
    }

    // Always consume stderr so buffers don't fill.
    let stderr_pump = child.stderr.take().map(|stderr| {
        let log = opts.log.cloned();
        let label = opts.label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(label = %label, "stderr: {}", line);
                if let Some(log) = &log {
                    log.line(&line);
                }
            }
        })
    });

    let mut captured = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("reading stdout of '{}'", opts.label))?
        {
            if let Some(log) = opts.log {
                log.line(&line);
            }
            if opts.capture_stdout {
                captured.push(line);
            }
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of '{}'", opts.label))?;
    if let Some(pump) = stderr_pump {
        let _ = pump.await;
    }

    info!(
        label = opts.label,
        exit_code = status.code().unwrap_or(-1),
        success = status.success(),
        "process exited"
    );
    if let Some(log) = opts.log {
        log.note(&format!("exit status: {status}"));
    }

    Ok(CommandOutput {
        status,
        stdout: captured,
    })
}

/// Run a command and turn a non-zero exit into an error.
pub async fn run_checked(cmd: Command, opts: RunOptions<'_>) -> Result<CommandOutput> {
    let output = run_command(cmd, opts).await?;
    if !output.success() {
        anyhow::bail!("'{}' exited with status {}", opts.label, output.code());
    }
    Ok(output)
}
