//! Managed dev-server processes.
//!
//! Each process runs in its own process group with piped output streamed
//! line-by-line into a bounded log buffer. Stop is SIGTERM to the group, a
//! bounded grace period, then SIGKILL. Exit status is retained until the id
//! is reused.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{BridgeError, Result};
use crate::ring::RingBuffer;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

const TERM_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: String,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    pub at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub started_at: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLogs {
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

pub struct StartSpec {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

struct ManagedProcess {
    command: String,
    args: Vec<String>,
    cwd: Option<String>,
    pid: Option<u32>,
    started_at: String,
    logs: Arc<StdMutex<RingBuffer<LogLine>>>,
    exit: Arc<StdMutex<Option<ExitInfo>>>,
}

impl ManagedProcess {
    fn is_running(&self) -> bool {
        self.exit.lock().unwrap().is_none()
    }

    fn descriptor(&self, id: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            id: id.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            started_at: self.started_at.clone(),
            running: self.is_running(),
            exit: self.exit.lock().unwrap().clone(),
        }
    }
}

pub struct ProcessManager {
    log_capacity: usize,
    procs: tokio::sync::Mutex<HashMap<String, ManagedProcess>>,
}

impl ProcessManager {
    pub fn new(log_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            log_capacity,
            procs: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Spawn a process under the given id. A live process already holding
    /// the id is an error; an exited record is replaced.
    pub async fn start(&self, spec: StartSpec) -> Result<ProcessDescriptor> {
        let mut procs = self.procs.lock().await;
        if let Some(existing) = procs.get(&spec.id) {
            if existing.is_running() {
                return Err(BridgeError::Process(format!(
                    "Process '{}' is already running (pid {:?})",
                    spec.id, existing.pid
                )));
            }
            procs.remove(&spec.id);
        }

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        // Own process group so stop() can signal the whole tree.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(
                    nix::unistd::Pid::from_raw(0),
                    nix::unistd::Pid::from_raw(0),
                )
                .ok();
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::Process(format!("Failed to start '{}': {e}", spec.command))
        })?;
        let pid = child.id();

        let logs = Arc::new(StdMutex::new(RingBuffer::new(self.log_capacity)));
        let exit = Arc::new(StdMutex::new(None));

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, LogStream::Stdout, logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, LogStream::Stderr, logs.clone());
        }

        let exit_slot = exit.clone();
        let proc_id = spec.id.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let info = match status {
                Ok(status) => ExitInfo {
                    code: status.code(),
                    signal: exit_signal(&status),
                    at: iso_now(),
                },
                Err(e) => {
                    tracing::warn!(id = %proc_id, error = %e, "Failed to await process exit");
                    ExitInfo {
                        code: None,
                        signal: None,
                        at: iso_now(),
                    }
                }
            };
            tracing::info!(id = %proc_id, code = ?info.code, "Managed process exited");
            *exit_slot.lock().unwrap() = Some(info);
        });

        let managed = ManagedProcess {
            command: spec.command,
            args: spec.args,
            cwd: spec.cwd,
            pid,
            started_at: iso_now(),
            logs,
            exit,
        };
        let descriptor = managed.descriptor(&spec.id);
        tracing::info!(id = %spec.id, pid = ?pid, "Started managed process");
        procs.insert(spec.id, managed);
        Ok(descriptor)
    }

    /// SIGTERM the tree, wait for exit within the grace period, escalate to
    /// SIGKILL. The exit record stays for later inspection.
    pub async fn stop(&self, id: &str) -> Result<ProcessDescriptor> {
        let (pid, exit) = {
            let procs = self.procs.lock().await;
            let managed = procs
                .get(id)
                .ok_or_else(|| BridgeError::NotFound(format!("process {id}")))?;
            if !managed.is_running() {
                return Err(BridgeError::Process(format!(
                    "Process '{id}' is not running"
                )));
            }
            let pid = managed.pid.ok_or_else(|| {
                BridgeError::Process(format!("Process '{id}' has no pid"))
            })?;
            (pid, managed.exit.clone())
        };

        signal_group(pid, false);
        if !wait_for_exit(&exit, TERM_GRACE).await {
            tracing::warn!(id, pid, "Process ignored SIGTERM, escalating to SIGKILL");
            signal_group(pid, true);
            wait_for_exit(&exit, KILL_GRACE).await;
        }

        let procs = self.procs.lock().await;
        procs
            .get(id)
            .map(|m| m.descriptor(id))
            .ok_or_else(|| BridgeError::NotFound(format!("process {id}")))
    }

    pub async fn logs(&self, id: &str, clear: bool) -> Result<ProcessLogs> {
        let procs = self.procs.lock().await;
        let managed = procs
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(format!("process {id}")))?;
        let mut logs = managed.logs.lock().unwrap();
        let (stdout, stderr) = if clear {
            let stdout = logs.drain_where(|l| l.stream == LogStream::Stdout);
            let stderr = logs.drain();
            (stdout, stderr)
        } else {
            let all = logs.peek();
            let (stdout, stderr): (Vec<LogLine>, Vec<LogLine>) =
                all.into_iter().partition(|l| l.stream == LogStream::Stdout);
            (stdout, stderr)
        };
        Ok(ProcessLogs {
            stdout_lines: stdout.into_iter().map(format_line).collect(),
            stderr_lines: stderr.into_iter().map(format_line).collect(),
        })
    }

    pub async fn list(&self) -> Vec<ProcessDescriptor> {
        let procs = self.procs.lock().await;
        let mut out: Vec<ProcessDescriptor> =
            procs.iter().map(|(id, m)| m.descriptor(id)).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let procs = self.procs.lock().await;
            procs
                .iter()
                .filter(|(_, m)| m.is_running())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                tracing::warn!(id = %id, error = %e, "Failed to stop managed process");
            }
        }
    }
}

fn format_line(line: LogLine) -> String {
    format!("[{}] {}", line.timestamp, line.line)
}

fn spawn_line_reader(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    stream: LogStream,
    logs: Arc<StdMutex<RingBuffer<LogLine>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.lock().unwrap().push(LogLine {
                timestamp: iso_now(),
                stream,
                line,
            });
        }
    });
}

async fn wait_for_exit(exit: &StdMutex<Option<ExitInfo>>, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if exit.lock().unwrap().is_some() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn signal_group(pid: u32, kill: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let signal = if kill { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            tracing::debug!(pid, ?signal, error = %e, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, kill);
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, script: &str) -> StartSpec {
        StartSpec {
            id: id.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Poll an async condition until it holds or the deadline passes.
    macro_rules! wait_until {
        ($deadline:expr, $cond:expr) => {{
            let end = tokio::time::Instant::now() + $deadline;
            loop {
                if $cond {
                    break true;
                }
                if tokio::time::Instant::now() >= end {
                    break false;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }};
    }

    #[tokio::test]
    async fn captures_interleaved_output_by_stream() {
        let manager = ProcessManager::new(100);
        manager
            .start(spec("echoer", "echo out-line; echo err-line 1>&2"))
            .await
            .unwrap();

        let got = wait_until!(Duration::from_secs(5), {
            let logs = manager.logs("echoer", false).await.unwrap();
            !logs.stdout_lines.is_empty() && !logs.stderr_lines.is_empty()
        });
        assert!(got, "expected both streams to be captured");

        let logs = manager.logs("echoer", false).await.unwrap();
        assert!(logs.stdout_lines[0].contains("out-line"));
        assert!(logs.stderr_lines[0].contains("err-line"));
    }

    #[tokio::test]
    async fn exit_status_is_recorded_and_retained() {
        let manager = ProcessManager::new(100);
        manager.start(spec("quick", "exit 3")).await.unwrap();

        let exited = wait_until!(Duration::from_secs(5), {
            let list = manager.list().await;
            list.iter().any(|p| p.id == "quick" && !p.running)
        });
        assert!(exited);

        let list = manager.list().await;
        let p = list.iter().find(|p| p.id == "quick").unwrap();
        assert_eq!(p.exit.as_ref().unwrap().code, Some(3));
    }

    #[tokio::test]
    async fn duplicate_live_id_is_rejected_and_reusable_after_stop() {
        let manager = ProcessManager::new(100);
        manager.start(spec("srv", "sleep 30")).await.unwrap();

        let dup = manager.start(spec("srv", "sleep 30")).await;
        assert!(dup.is_err());
        assert!(dup.unwrap_err().to_string().contains("already running"));

        let stopped = manager.stop("srv").await.unwrap();
        assert!(!stopped.running);

        // Exited record is replaced on reuse.
        manager.start(spec("srv", "echo again")).await.unwrap();
    }

    #[tokio::test]
    async fn stop_terminates_the_process_tree() {
        let manager = ProcessManager::new(100);
        let started = manager
            .start(spec("tree", "sh -c 'sleep 60' & sleep 60"))
            .await
            .unwrap();
        let pid = started.pid.unwrap();

        let stopped = manager.stop("tree").await.unwrap();
        assert!(!stopped.running);
        assert!(stopped.exit.is_some());
        // The group leader is gone.
        assert!(!crate::browser::launch::is_alive(pid));
    }

    #[tokio::test]
    async fn stop_unknown_and_exited_processes_error() {
        let manager = ProcessManager::new(100);
        assert!(manager.stop("ghost").await.is_err());

        manager.start(spec("done", "true")).await.unwrap();
        let exited = wait_until!(Duration::from_secs(5), {
            manager.list().await.iter().any(|p| p.id == "done" && !p.running)
        });
        assert!(exited);
        let err = manager.stop("done").await.unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn clearing_logs_empties_the_buffer() {
        let manager = ProcessManager::new(100);
        manager.start(spec("logs", "echo one; echo two")).await.unwrap();

        let captured = wait_until!(Duration::from_secs(5), {
            manager.logs("logs", false).await.unwrap().stdout_lines.len() >= 2
        });
        assert!(captured);

        let drained = manager.logs("logs", true).await.unwrap();
        assert_eq!(drained.stdout_lines.len(), 2);
        let after = manager.logs("logs", false).await.unwrap();
        assert!(after.stdout_lines.is_empty());
        assert!(after.stderr_lines.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_logs_is_not_found() {
        let manager = ProcessManager::new(100);
        assert!(manager.logs("nope", false).await.is_err());
    }
}
