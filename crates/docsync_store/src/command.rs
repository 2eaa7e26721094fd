//! Git subprocess runner with deadlines and cancellation.

use crate::error::{StoreError, StoreResult};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished git process.
#[derive(Debug, Clone)]
pub(crate) struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Converts a failed exit into [`StoreError::Git`].
    pub fn check(self, command: &str) -> StoreResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(StoreError::git(command, self.stderr.trim()))
        }
    }

    /// Returns true if either stream mentions `needle` (case-insensitive).
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.stdout.to_ascii_lowercase().contains(&needle)
            || self.stderr.to_ascii_lowercase().contains(&needle)
    }
}

/// Runs `git <args>` in `cwd`.
///
/// The process is killed when `timeout` elapses or `cancel` fires. Output
/// streams are drained on helper threads so a chatty process can never
/// block on a full pipe.
pub(crate) fn run_git(
    cwd: &Path,
    args: &[&str],
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> StoreResult<GitOutput> {
    let command = subcommand(args);
    tracing::debug!(?args, cwd = %cwd.display(), "running git");

    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StoreError::Cancelled);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(command, ?timeout, "git command timed out");
            return Err(StoreError::Timeout {
                command: command.to_string(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    };

    Ok(GitOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

/// Returns the git subcommand, skipping `-c key=value` pairs and flags.
fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        if !arg.starts_with('-') {
            return arg;
        }
    }
    "git"
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// Returns true if a `git` executable can be started.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
