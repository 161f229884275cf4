//! External process execution
//!
//! Runs a tool to completion, forwarding its output line by line to tracing
//! (`info` when verbose, `debug` otherwise). A nonzero exit becomes
//! [`SorterError::ExternalTool`] carrying the tail of stderr.

use crate::error::{Result, SorterError};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// A command line plus environment and working directory
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Run `command` to completion
pub async fn call_command(command: &ToolCommand, verbose: bool) -> Result<()> {
    if verbose {
        info!("Running: {}", command.display());
    } else {
        debug!(command = %command.display(), "Running external tool");
    }

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &command.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| SorterError::ExternalTool {
        tool: command.program.clone(),
        status: "not started".to_string(),
        stderr: e.to_string(),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let tool = command.program.clone();

    let (_, stderr_tail, status) = tokio::join!(
        forward_lines(stdout, &tool, verbose, 0),
        forward_lines(stderr, &tool, verbose, STDERR_TAIL_LINES),
        child.wait()
    );
    let status = status?;

    if status.success() {
        debug!(tool = %tool, "External tool finished");
        Ok(())
    } else {
        Err(SorterError::ExternalTool {
            tool,
            status: status.to_string(),
            stderr: stderr_tail.join("\n"),
        })
    }
}

/// Short git commit hash of a tool checkout, `None` if unavailable
pub async fn git_short_hash(folder: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .current_dir(folder)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!hash.is_empty()).then_some(hash)
}

async fn forward_lines<R>(stream: Option<R>, tool: &str, verbose: bool, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(keep);
    let Some(stream) = stream else {
        return Vec::new();
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if verbose {
            info!("{}: {}", tool, line);
        } else {
            debug!(tool = %tool, "{}", line);
        }
        if keep > 0 {
            if tail.len() == keep {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    tail.into_iter().collect()
}
