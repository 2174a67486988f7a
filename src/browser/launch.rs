//! Locating and launching a debuggable browser.
//!
//! Launch is detached (its own session) so the browser outlives this
//! process; a PID file records what we started so a later instance can
//! sweep it. PIDs get recycled — a recorded PID is only ever killed after
//! its process name verifies as a browser.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::Config;
use crate::error::{BridgeError, Result};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Executable names probed on PATH, most common first.
const BROWSER_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "brave-browser",
    "microsoft-edge",
];

/// Conventional absolute install locations (macOS app bundles mostly).
const BROWSER_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
];

/// Substrings a verified browser process name must contain.
const BROWSER_PROC_NAMES: &[&str] = &["chrome", "chromium", "brave", "msedge", "edge"];

const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
const READINESS_POLL: Duration = Duration::from_millis(200);
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Find a browser executable: configured override first, then PATH, then
/// conventional install locations.
pub fn locate(config: &Config) -> Option<PathBuf> {
    if let Some(path) = &config.browser_path {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
        tracing::warn!(path = %path, "Configured browser path does not exist");
        return None;
    }
    for name in BROWSER_NAMES {
        if let Ok(p) = which::which(name) {
            return Some(p);
        }
    }
    BROWSER_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Launch the browser with remote debugging enabled and wait for its
/// inspection endpoint to answer. Returns the launched PID.
pub async fn launch(config: &Config, client: &reqwest::Client) -> Result<u32> {
    let Some(executable) = locate(config) else {
        return Err(BridgeError::BrowserUnreachable(
            "No browser executable found. Install Chrome/Chromium or set PAGELENS_BROWSER_PATH."
                .to_string(),
        ));
    };

    let profile_dir =
        std::env::temp_dir().join(format!("pagelens-profile-{}", config.debug_port));

    let mut cmd = Command::new(&executable);
    cmd.arg(format!("--remote-debugging-port={}", config.debug_port))
        .arg(format!("--user-data-dir={}", profile_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(url) = &config.launch_url {
        cmd.arg(url);
    }

    // Detach into its own session so the browser survives our exit and the
    // whole tree can be signalled as one group later.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().ok();
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| {
        BridgeError::BrowserUnreachable(format!(
            "Failed to launch {}: {e}",
            executable.display()
        ))
    })?;
    let pid = child.id().ok_or_else(|| {
        BridgeError::BrowserUnreachable("Browser exited immediately after launch".to_string())
    })?;

    tracing::info!(pid, executable = %executable.display(), port = config.debug_port, "Launched browser");

    wait_until_ready(client, &config.inspection_base()).await?;
    Ok(pid)
}

async fn wait_until_ready(client: &reqwest::Client, base: &str) -> Result<()> {
    let deadline = tokio::time::Instant::now() + READINESS_TIMEOUT;
    loop {
        match client.get(format!("{base}/json/version")).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BridgeError::BrowserUnreachable(format!(
                "Browser did not open its debug endpoint at {base} within {READINESS_TIMEOUT:?}"
            )));
        }
        tokio::time::sleep(READINESS_POLL).await;
    }
}

pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Verify by process name that `pid` is a browser. Any failure to read the
/// name answers `false` — killing a recycled PID is worse than leaking a
/// browser.
pub fn is_browser_process(pid: u32) -> bool {
    match process_name(pid) {
        Some(name) => {
            let name = name.to_lowercase();
            BROWSER_PROC_NAMES.iter().any(|n| name.contains(n))
        }
        None => false,
    }
}

fn process_name(pid: u32) -> Option<String> {
    if let Ok(comm) = std::fs::read_to_string(format!("/proc/{pid}/comm")) {
        return Some(comm.trim().to_string());
    }
    let output = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "comm="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// Terminate the whole process group: SIGTERM, a short grace period, then
/// SIGKILL if anything is still alive.
pub async fn kill_tree(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        let deadline = tokio::time::Instant::now() + KILL_GRACE;
        while is_alive(pid) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if is_alive(pid) {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// PID-file path for a given debug port. Deterministic so a fresh instance
/// can find what its predecessor launched.
pub fn pid_file_path(debug_port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("pagelens-browser-{debug_port}.pid"))
}

pub fn write_pid_file(debug_port: u16, pid: u32) {
    let path = pid_file_path(debug_port);
    if let Err(e) = std::fs::write(&path, pid.to_string()) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write PID file");
    }
}

/// Synchronous so it can run on the way out of `main`.
pub fn remove_pid_file(debug_port: u16) {
    let path = pid_file_path(debug_port);
    if path.exists() {
        let _ = std::fs::remove_file(&path);
    }
}

fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Crash-recovery sweep: if a previous instance left a PID file and that PID
/// is still a live, verified browser, kill its tree. The file is removed in
/// every case.
pub async fn sweep_stale_pid_file(debug_port: u16) {
    let path = pid_file_path(debug_port);
    let Some(pid) = read_pid_file(&path) else {
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        return;
    };
    if is_alive(pid) {
        if is_browser_process(pid) {
            tracing::info!(pid, "Sweeping browser left by a previous instance");
            kill_tree(pid).await;
        } else {
            tracing::warn!(pid, "Stale PID file points at a non-browser process, leaving it alone");
        }
    }
    let _ = std::fs::remove_file(&path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_path_is_port_scoped() {
        let a = pid_file_path(9222);
        let b = pid_file_path(9322);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("9222"));
    }

    #[test]
    fn our_own_pid_is_alive_but_not_a_browser() {
        let pid = std::process::id();
        assert!(is_alive(pid));
        assert!(!is_browser_process(pid));
    }

    #[test]
    fn unknown_pid_fails_closed() {
        // PID 4_000_000 is above the default pid_max on Linux.
        assert!(!is_browser_process(4_000_000));
    }

    #[tokio::test]
    async fn sweep_removes_unparseable_pid_file_without_killing() {
        let port = 39_221;
        let path = pid_file_path(port);
        std::fs::write(&path, "not-a-pid").unwrap();
        sweep_stale_pid_file(port).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn sweep_leaves_non_browser_process_alive() {
        let port = 39_222;
        let path = pid_file_path(port);
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        sweep_stale_pid_file(port).await;
        assert!(!path.exists());
        assert!(is_alive(std::process::id()));
    }
}
