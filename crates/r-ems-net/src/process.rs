//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulator subprocess launch, supervision and exit cleanup."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Supervision of the simulator subprocess.
//!
//! Every live child is tracked in a process-wide registry so that a panic,
//! ctrl-c or SIGTERM in the host still tears the simulator down. Dropping a
//! [`SimulatorProcess`] kills the child as well.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::protocol::{time_string, PAUSE_AT_KEY};
use crate::ChannelError;

pub const SERVER_FLAG: &str = "--server";
pub const VERBOSE_FLAG: &str = "--verbose";
pub const DEFINE_FLAG: &str = "-D";
pub const PORT_FLAG: &str = "-P";
pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";

type SharedChild = Arc<Mutex<Child>>;

static LIVE_CHILDREN: Lazy<Mutex<Vec<Weak<Mutex<Child>>>>> =
    Lazy::new(|| Mutex::new(Vec::new()));
static EXIT_HOOKS: OnceCell<()> = OnceCell::new();

/// Ordered launch arguments. Keys are flags; a `None` value is a bare flag.
pub type LaunchArgs = IndexMap<String, Option<String>>;

/// Default arguments for a pause-at-start server, with `extra` layered on top.
///
/// Keys in `extra` replace defaults in place and new keys are appended, so a
/// `-P` in `extra` wins over `port`.
pub fn launch_args(
    start: NaiveDateTime,
    timezone: Option<&str>,
    port: Option<u16>,
    extra: &IndexMap<String, Option<String>>,
) -> LaunchArgs {
    let mut args = LaunchArgs::new();
    args.insert(SERVER_FLAG.to_owned(), None);
    args.insert(VERBOSE_FLAG.to_owned(), None);
    args.insert(
        DEFINE_FLAG.to_owned(),
        Some(format!("{PAUSE_AT_KEY}\"{}\"", time_string(start, timezone))),
    );
    if let Some(port) = port {
        args.insert(PORT_FLAG.to_owned(), Some(port.to_string()));
    }
    for (key, value) in extra {
        args.insert(key.clone(), value.clone());
    }
    args
}

/// Port requested through the extra arguments, if any.
pub fn requested_port(args: &LaunchArgs) -> Option<u16> {
    args.get(PORT_FLAG)
        .and_then(|value| value.as_deref())
        .and_then(|value| value.trim().parse().ok())
}

/// Flatten arguments into argv order.
pub fn flatten_args(args: &LaunchArgs) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() * 2);
    for (key, value) in args {
        argv.push(key.clone());
        if let Some(value) = value {
            argv.push(value.clone());
        }
    }
    argv
}

/// Everything needed to spawn one simulator attempt.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub args: LaunchArgs,
    pub folder: PathBuf,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        let mut parts = vec![
            self.executable.display().to_string(),
            self.model.display().to_string(),
        ];
        parts.extend(flatten_args(&self.args));
        parts.join(" ")
    }
}

/// A running simulator child.
#[derive(Debug)]
pub struct SimulatorProcess {
    child: SharedChild,
    pid: Option<u32>,
}

impl SimulatorProcess {
    /// Spawn the simulator inside `spec.folder` with stdout and stderr
    /// redirected to files there.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, ChannelError> {
        let stdout = create_log(&spec.folder.join(STDOUT_FILE))?;
        let stderr = create_log(&spec.folder.join(STDERR_FILE))?;
        let child = Command::new(&spec.executable)
            .arg(&spec.model)
            .args(flatten_args(&spec.args))
            .current_dir(&spec.folder)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                executable: spec.executable.clone(),
                source,
            })?;
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        register(&child);
        info!(pid, command = %spec.command_line(), "simulator process spawned");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the child has already terminated.
    pub fn try_exit_status(&self) -> Option<ExitStatus> {
        match self.child.lock().try_wait() {
            Ok(status) => status,
            Err(err) => {
                warn!(pid = self.pid, error = %err, "unable to query simulator status");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.try_exit_status().is_none()
    }

    pub fn kill(&self) {
        let mut child = self.child.lock();
        if matches!(child.try_wait(), Ok(None)) {
            if let Err(err) = child.start_kill() {
                warn!(pid = self.pid, error = %err, "failed to kill simulator");
            } else {
                debug!(pid = self.pid, "simulator killed");
            }
        }
    }

    /// Poll for exit until `timeout`, then kill.
    ///
    /// Returns the exit status when the child left on its own.
    pub async fn wait_for_exit(&self, timeout: Duration, interval: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_exit_status() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                warn!(
                    pid = self.pid,
                    timeout_secs = timeout.as_secs_f64(),
                    "simulator did not exit in time; killing"
                );
                self.kill();
                return None;
            }
            sleep(interval).await;
        }
    }
}

impl Drop for SimulatorProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn create_log(path: &Path) -> Result<File, ChannelError> {
    File::create(path).map_err(|source| ChannelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn register(child: &SharedChild) {
    let mut live = LIVE_CHILDREN.lock();
    live.retain(|weak| weak.strong_count() > 0);
    live.push(Arc::downgrade(child));
}

/// Number of registered children that are still alive.
pub fn live_children() -> usize {
    LIVE_CHILDREN
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|child| matches!(child.lock().try_wait(), Ok(None)))
        .count()
}

/// Kill every registered child that is still running. Returns how many were
/// signalled.
pub fn kill_all() -> usize {
    let children: Vec<SharedChild> = {
        let mut live = LIVE_CHILDREN.lock();
        let children = live.iter().filter_map(Weak::upgrade).collect();
        live.clear();
        children
    };
    let mut killed = 0;
    for child in children {
        let mut child = child.lock();
        if matches!(child.try_wait(), Ok(None)) && child.start_kill().is_ok() {
            killed += 1;
        }
    }
    if killed > 0 {
        warn!(killed, "killed simulator processes on exit");
    }
    killed
}

/// Chain a panic hook that kills live simulators. Idempotent.
pub fn install_exit_hooks() {
    EXIT_HOOKS.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            kill_all();
            previous(panic_info);
        }));
    });
}

/// Exit status used after ctrl-c.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;
/// Exit status used after SIGTERM.
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// Kill live simulators and exit the host when it receives ctrl-c or
/// SIGTERM. The exit status is `128 + signal`.
pub fn spawn_signal_cleanup() -> JoinHandle<()> {
    tokio::spawn(async {
        let code = cleanup_after(shutdown_signal(), kill_all).await;
        std::process::exit(code);
    })
}

/// Wait for `signal`, run `kill`, and hand back the exit status to use.
async fn cleanup_after<S, K>(signal: S, kill: K) -> i32
where
    S: std::future::Future<Output = i32>,
    K: FnOnce() -> usize,
{
    let code = signal.await;
    let killed = kill();
    info!(code, killed, "termination signal received; exiting");
    code
}

async fn shutdown_signal() -> i32 {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => INTERRUPTED_EXIT_CODE,
            _ = terminate() => TERMINATED_EXIT_CODE,
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        INTERRUPTED_EXIT_CODE
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
