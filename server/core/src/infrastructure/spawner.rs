// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Subprocess runner.
//!
//! Spawns one external scanner binary with a sanitized environment and
//! POSIX resource caps, drains stdout/stderr into capped buffers, enforces
//! the wall-clock timeout by SIGKILLing the whole process group, and
//! assembles a structured result. Partial output captured before a timeout
//! is preserved.
//!
//! Every child starts in its own session (`setsid`) so the group can be
//! signalled as a unit, and is entered into a process table consulted at
//! server shutdown (SIGTERM, grace period, SIGKILL). On non-Unix platforms
//! resource caps and group signalling are skipped; the child itself is still
//! killed on timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::errors::ErrorType;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Exit code reported for a timed-out execution.
pub const TIMEOUT_RETURNCODE: i32 = 124;
/// Exit code reported when the binary is missing.
pub const NOT_FOUND_RETURNCODE: i32 = 127;

/// Per-spawn resource limits, resolved from config + descriptor.
#[derive(Debug, Clone)]
pub struct SpawnLimits {
    pub timeout: Duration,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
    pub max_memory_mb: u64,
    pub max_file_descriptors: u64,
}

/// Raw outcome of one spawn; the tool layer folds it into a `ToolOutput`.
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
    pub timed_out: bool,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
}

impl SpawnResult {
    fn failure(error_type: ErrorType, returncode: i32, message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.clone(),
            returncode,
            truncated_stdout: false,
            truncated_stderr: false,
            timed_out: false,
            error: Some(message),
            error_type: Some(error_type),
        }
    }
}

/// Live process groups, keyed by child PID. Entries are removed on reap;
/// whatever remains at shutdown is terminated as a group.
#[derive(Debug, Default)]
pub struct ProcessTable {
    inner: DashMap<u32, ()>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, pid: u32) {
        self.inner.insert(pid, ());
    }

    fn remove(&self, pid: u32) {
        self.inner.remove(&pid);
    }

    pub fn live_count(&self) -> usize {
        self.inner.len()
    }

    /// SIGTERM every live group, wait up to `grace`, then SIGKILL what is
    /// left. Reaping stays with the owning spawn call.
    pub async fn terminate_all(&self, grace: Duration) {
        if self.inner.is_empty() {
            return;
        }
        let pids: Vec<u32> = self.inner.iter().map(|e| *e.key()).collect();
        warn!(live = pids.len(), "terminating live scan process groups");
        for pid in &pids {
            signal_group(*pid, TermSignal::Term);
        }

        let deadline = tokio::time::Instant::now() + grace;
        while !self.inner.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for entry in self.inner.iter() {
            signal_group(*entry.key(), TermSignal::Kill);
        }
    }
}

/// Spawner with a shared process table.
#[derive(Clone, Default)]
pub struct Spawner {
    table: Arc<ProcessTable>,
}

impl Spawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_table(&self) -> Arc<ProcessTable> {
        self.table.clone()
    }

    /// Run `program` with `args` under `limits` and collect the outcome.
    pub async fn spawn(&self, program: &Path, args: &[String], limits: &SpawnLimits) -> SpawnResult {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env(
                "PATH",
                std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
            )
            .env("LANG", "C.UTF-8")
            .env("LC_ALL", "C.UTF-8")
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let cpu_soft = limits.timeout.as_secs().max(1);
            let memory_bytes = limits.max_memory_mb.saturating_mul(1024 * 1024);
            let nofile = limits.max_file_descriptors;
            // Safety: only async-signal-safe libc calls between fork and exec.
            unsafe {
                cmd.pre_exec(move || {
                    new_session()?;
                    apply_resource_limits(cpu_soft, memory_bytes, nofile)?;
                    Ok(())
                });
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return SpawnResult::failure(
                    ErrorType::NotFound,
                    NOT_FOUND_RETURNCODE,
                    format!("command not found: {}", program.display()),
                );
            }
            Err(err) => {
                return SpawnResult::failure(
                    ErrorType::ExecutionError,
                    1,
                    format!("failed to spawn {}: {}", program.display(), err),
                );
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            self.table.register(pid);
        }

        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), limits.max_stdout_bytes));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), limits.max_stderr_bytes));

        let (status, timed_out) = match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(err)) => {
                if let Some(pid) = pid {
                    signal_group(pid, TermSignal::Kill);
                    self.table.remove(pid);
                }
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return SpawnResult::failure(
                    ErrorType::ExecutionError,
                    1,
                    format!("failed waiting on {}: {}", program.display(), err),
                );
            }
            Err(_elapsed) => {
                debug!(program = %program.display(), timeout = ?limits.timeout, "wall-clock timeout, killing process group");
                if let Some(pid) = pid {
                    signal_group(pid, TermSignal::Kill);
                }
                // Reap so the group does not linger as a zombie.
                let _ = child.wait().await;
                (None, true)
            }
        };

        if let Some(pid) = pid {
            self.table.remove(pid);
        }

        let (stdout_bytes, truncated_stdout) = stdout_task.await.unwrap_or((Vec::new(), false));
        let (stderr_bytes, truncated_stderr) = stderr_task.await.unwrap_or((Vec::new(), false));

        let returncode = if timed_out {
            TIMEOUT_RETURNCODE
        } else {
            exit_code(status)
        };

        let (error, error_type) = if timed_out {
            (
                Some(format!(
                    "execution exceeded {:.1}s wall-clock limit",
                    limits.timeout.as_secs_f64()
                )),
                Some(ErrorType::Timeout),
            )
        } else {
            (None, None)
        };

        SpawnResult {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            returncode,
            truncated_stdout,
            truncated_stderr,
            timed_out,
            error,
            error_type,
        }
    }
}

/// Drain a pipe to EOF, keeping at most `cap` bytes. The remainder is read
/// and discarded so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, truncated)
}

fn exit_code(status: Option<std::process::ExitStatus>) -> i32 {
    match status {
        Some(status) => {
            if let Some(code) = status.code() {
                return code;
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return 128 + signal;
                }
            }
            -1
        }
        None => -1,
    }
}

#[derive(Debug, Clone, Copy)]
enum TermSignal {
    Term,
    Kill,
}

/// Signal the whole process group for `pid` (best-effort).
#[cfg(unix)]
fn signal_group(pid: u32, signal: TermSignal) {
    let sig = match signal {
        TermSignal::Term => libc::SIGTERM,
        TermSignal::Kill => libc::SIGKILL,
    };
    let pid = pid as libc::pid_t;
    unsafe {
        let pgid = libc::getpgid(pid);
        if pgid > 0 {
            libc::killpg(pgid, sig);
        } else {
            libc::kill(pid, sig);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: TermSignal) {}

/// Put the child into its own session so descendants share its group.
/// EPERM means we already lead a session; fall back to a fresh group.
#[cfg(unix)]
fn new_session() -> std::io::Result<()> {
    if unsafe { libc::setsid() } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            if unsafe { libc::setpgid(0, 0) } == -1 {
                return Err(std::io::Error::last_os_error());
            }
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
fn apply_resource_limits(cpu_soft: u64, memory_bytes: u64, nofile: u64) -> std::io::Result<()> {
    set_rlimit(libc::RLIMIT_CPU, cpu_soft, cpu_soft.saturating_add(5))?;
    set_rlimit(libc::RLIMIT_AS, memory_bytes, memory_bytes)?;
    set_rlimit(libc::RLIMIT_NOFILE, nofile, nofile)?;
    set_rlimit(libc::RLIMIT_CORE, 0, 0)?;
    Ok(())
}

#[cfg(all(unix, target_os = "linux"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(target_os = "linux")))]
type RlimitResource = libc::c_int;

#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, soft: u64, hard: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
