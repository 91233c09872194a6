// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External delegate processes.
//
// Every tool the handlers shell out to runs through a `ProcessRegistry`, so
// the controller can see what is running and kill it on cancel. The worker
// polls the child instead of blocking in `wait()`; a killed child simply
// disappears from the registry. On unix each delegate leads its own process
// group, so killing it also kills whatever a shell command started.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured output of a finished delegate.
#[derive(Debug, Clone, Default)]
pub struct DelegateOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Running child processes, keyed by PID. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    running: Arc<Mutex<HashMap<u32, Child>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        // A panic while holding the lock leaves the map itself intact.
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// PIDs of the delegates currently running.
    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Run `command` to completion, registering it while it runs.
    ///
    /// Returns [`ScanwerkError::Cancelled`] if `cancel` is set before the
    /// process starts or by the time it exits, and a
    /// [`ScanwerkError::Delegate`] for a non-zero exit.
    #[instrument(skip_all, fields(tool = %tool_name(&command)))]
    pub fn run(&self, mut command: Command, cancel: &AtomicBool) -> Result<DelegateOutput> {
        let tool = tool_name(&command);
        if cancel.load(Ordering::SeqCst) {
            return Err(ScanwerkError::Cancelled);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ScanwerkError::DelegateUnavailable {
                tool: tool.clone(),
                reason: err.to_string(),
            })?;
        let pid = child.id();
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        self.lock().insert(pid, child);
        debug!(pid, "delegate started");

        let status = self.wait_for(pid);
        let output = DelegateOutput {
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        };

        if cancel.load(Ordering::SeqCst) {
            info!(pid, "delegate cancelled");
            return Err(ScanwerkError::Cancelled);
        }
        match status {
            Some(status) if status.success() => {
                debug!(pid, "delegate finished");
                Ok(output)
            }
            Some(status) => Err(ScanwerkError::Delegate {
                tool,
                status: status.code().unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            }),
            None => Err(ScanwerkError::Delegate {
                tool,
                status: -1,
                stderr: "killed".into(),
            }),
        }
    }

    /// Poll until the child exits or is removed by [`Self::kill_all`].
    fn wait_for(&self, pid: u32) -> Option<ExitStatus> {
        loop {
            {
                let mut running = self.lock();
                let child = running.get_mut(&pid)?;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        running.remove(&pid);
                        return Some(status);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(pid, error = %err, "lost track of delegate");
                        running.remove(&pid);
                        return None;
                    }
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill every registered process, calling `on_kill` with each PID.
    ///
    /// Returns how many were killed.
    pub fn kill_all(&self, mut on_kill: impl FnMut(u32)) -> usize {
        let killed: Vec<(u32, Child)> = self.lock().drain().collect();
        let count = killed.len();
        for (pid, mut child) in killed {
            kill_group(pid, &mut child);
            let _ = child.wait();
            info!(pid, "killed delegate");
            on_kill(pid);
        }
        count
    }
}

/// Kill the process group `pid` leads, falling back to the child alone.
#[cfg(unix)]
fn kill_group(pid: u32, child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return kill_child(pid, child);
    };
    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, error = %err, "process group already gone");
        kill_child(pid, child);
    }
}

#[cfg(not(unix))]
fn kill_group(pid: u32, child: &mut Child) {
    kill_child(pid, child);
}

fn kill_child(pid: u32, child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(pid, error = %err, "delegate already gone");
    }
}

fn tool_name(command: &Command) -> String {
    Path::new(command.get_program())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn spawn_reader(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Locate `name` on `PATH`, or check it directly if it contains a slash.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Fail with [`ScanwerkError::DelegateUnavailable`] unless `tool` is on `PATH`.
pub fn require_tool(tool: &str) -> Result<PathBuf> {
    find_executable(tool).ok_or_else(|| ScanwerkError::DelegateUnavailable {
        tool: tool.to_string(),
        reason: "not found on PATH".into(),
    })
}

/// Free space on the filesystem holding `dir`, in MiB, as reported by `df`.
pub fn free_space_mib(dir: &Path) -> Option<u64> {
    let output = Command::new("df").arg("-Pk").arg(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df_available(&String::from_utf8_lossy(&output.stdout))
}

/// "Available" column of POSIX `df -Pk` output, converted to MiB.
fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let kib: u64 = line.split_whitespace().nth(3)?.parse().ok()?;
    Some(kib / 1024)
}
