//! Game-running guard.
//!
//! Before touching the live save the manager asks whether the game is up.
//! The answer comes from the first usable [`ProcessProbe`] in a chain:
//! in-process introspection, then a shell listing, then "not running".
//! A probe that is unavailable or errors is skipped, so a broken probe can
//! never lock the player out of their saves.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

pub const SHELL_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One way of answering "is a process with this executable name alive".
pub trait ProcessProbe {
    fn name(&self) -> &'static str;

    /// Whether this probe can run on the current system at all.
    fn is_available(&self) -> bool {
        true
    }

    fn is_running(&self, exe: &str) -> Result<bool, String>;
}

/// Primary probe: walks the OS process table through `sysinfo`.
pub struct SysinfoProbe;

impl ProcessProbe for SysinfoProbe {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn is_available(&self) -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    fn is_running(&self, exe: &str) -> Result<bool, String> {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(system
            .processes()
            .values()
            .any(|p| p.name().to_string_lossy().eq_ignore_ascii_case(exe)))
    }
}

/// Secondary probe: asks the platform's process listing command.
pub struct ShellProbe {
    pub timeout: Duration,
}

impl Default for ShellProbe {
    fn default() -> Self {
        Self {
            timeout: SHELL_PROBE_TIMEOUT,
        }
    }
}

impl ShellProbe {
    fn command(exe: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("tasklist");
            cmd.args(["/FI", &format!("IMAGENAME eq {}", exe), "/NH"]);
            cmd
        } else {
            let mut cmd = Command::new("ps");
            cmd.args(["-A", "-o", "comm="]);
            cmd
        }
    }

    fn listing_mentions(listing: &str, exe: &str) -> bool {
        if cfg!(windows) {
            listing.to_ascii_lowercase().contains(&exe.to_ascii_lowercase())
        } else {
            listing.lines().any(|line| {
                let line = line.trim();
                // `comm` may be a full path on some systems
                let base = line.rsplit('/').next().unwrap_or(line);
                base.eq_ignore_ascii_case(exe)
            })
        }
    }
}

impl ProcessProbe for ShellProbe {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn is_running(&self, exe: &str) -> Result<bool, String> {
        let listing = run_with_timeout(Self::command(exe), self.timeout)?;
        Ok(Self::listing_mentions(&listing, exe))
    }
}

/// Final fallback: permit the operation.
pub struct AssumeNotRunning;

impl ProcessProbe for AssumeNotRunning {
    fn name(&self) -> &'static str {
        "assume-not-running"
    }

    fn is_running(&self, _exe: &str) -> Result<bool, String> {
        Ok(false)
    }
}

/// Runs `cmd`, collecting stdout on a helper thread so a full pipe cannot
/// stall the deadline. The child is killed when the deadline passes.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<String, String> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("spawn failed: {}", e))?;
    let mut stdout = child.stdout.take().ok_or("no stdout handle")?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = String::new();
        let res = stdout.read_to_string(&mut buf).map(|_| buf);
        let _ = tx.send(res);
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => break,
            Ok(Some(status)) => return Err(format!("exited with {}", status)),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("timed out after {:?}", timeout));
            }
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(e) => return Err(e.to_string()),
        }
    }
    let remaining = deadline.saturating_duration_since(Instant::now());
    rx.recv_timeout(remaining.max(Duration::from_millis(100)))
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

/// Advisory check consulted before save and load. Not a lock: the game can
/// start right after a negative answer.
pub struct GameGuard {
    exe: String,
    probes: Vec<Box<dyn ProcessProbe>>,
}

impl GameGuard {
    /// The standard chain: sysinfo, shell listing, then assume not running.
    pub fn new(exe: impl Into<String>) -> Self {
        Self::with_probes(
            exe,
            vec![
                Box::new(SysinfoProbe),
                Box::new(ShellProbe::default()),
                Box::new(AssumeNotRunning),
            ],
        )
    }

    pub fn with_probes(exe: impl Into<String>, probes: Vec<Box<dyn ProcessProbe>>) -> Self {
        Self {
            exe: exe.into(),
            probes,
        }
    }

    pub fn exe(&self) -> &str {
        &self.exe
    }

    pub fn is_game_running(&self) -> bool {
        for probe in &self.probes {
            if !probe.is_available() {
                debug!("process probe {} unavailable, skipping", probe.name());
                continue;
            }
            match probe.is_running(&self.exe) {
                Ok(running) => {
                    debug!("process probe {}: {} running = {}", probe.name(), self.exe, running);
                    return running;
                }
                Err(e) => warn!("process probe {} failed: {}", probe.name(), e),
            }
        }
        false
    }
}
