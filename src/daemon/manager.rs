//! Daemon process management
//!
//! Locates, launches and terminates daemon processes. Every launched child is
//! kept in a registry keyed by coin; callers only ever see an opaque
//! [`DaemonHandle`].

use super::config::{AppLayout, CoinProfile, HostPlatform};
use super::credentials::Credentials;
use super::error::ProcessError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// How long a daemon gets to exit after SIGTERM before it is killed
const STOP_GRACE: Duration = Duration::from_secs(30);

const REAP_POLL: Duration = Duration::from_millis(100);

/// Identifies one process launched by [`ProcessController::start`]
///
/// Not `Clone`: `stop` consumes it, so a handle cannot be used twice.
#[derive(Debug, PartialEq, Eq)]
pub struct DaemonHandle {
    coin: String,
    pid: u32,
}

impl DaemonHandle {
    #[cfg(test)]
    pub(crate) fn new_for_test(coin: &str, pid: u32) -> Self {
        Self {
            coin: coin.to_string(),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Launches and tracks one daemon process per coin
pub struct ProcessController {
    layout: AppLayout,
    platform: HostPlatform,
    /// Child processes we spawned, keyed by coin
    processes: Mutex<HashMap<String, Child>>,
}

impl ProcessController {
    pub fn new(layout: AppLayout, platform: HostPlatform) -> Self {
        Self {
            layout,
            platform,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &AppLayout {
        &self.layout
    }

    /// Expected binary path, whether or not it exists
    pub fn binary_path(&self, profile: &CoinProfile) -> PathBuf {
        self.layout.binary_path(profile, &self.platform)
    }

    /// Path of the installed daemon binary
    ///
    /// No side effects; `BinaryNotFound` means "install first".
    pub fn locate(&self, profile: &CoinProfile) -> Result<PathBuf, ProcessError> {
        let path = self.binary_path(profile);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ProcessError::BinaryNotFound(path))
        }
    }

    /// Launch `binary` for `profile`
    pub fn start(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        binary: &Path,
    ) -> Result<DaemonHandle, ProcessError> {
        let coin = profile.key();
        log::info!("Starting {} daemon from {}", profile.name, binary.display());

        let data_dir = self.layout.data_dir(profile);
        std::fs::create_dir_all(&data_dir).map_err(|source| ProcessError::DataDirError {
            path: data_dir.clone(),
            source,
        })?;

        let previous = self.processes().remove(&coin);
        if let Some(previous) = previous {
            retire(&coin, previous);
        }

        if let Some(pid) = find_untracked_process(binary) {
            log::warn!(
                "Another process (PID {}) is already running {}; the new {} daemon may fail to bind its port",
                pid,
                binary.display(),
                profile.name
            );
        }

        let mut cmd = Command::new(binary);
        cmd.args(launch_args(profile, credentials, &data_dir));

        // Configure stdio - redirect to null to prevent blocking
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.stdin(Stdio::null());

        // Own process group so Ctrl-C on the gateway does not reach the daemon
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        // On Windows, prevent console window from appearing
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            path: binary.to_path_buf(),
            source,
        })?;

        let pid = child.id();
        log::info!("{} daemon started with PID {}", profile.name, pid);

        self.processes().insert(coin.clone(), child);

        Ok(DaemonHandle { coin, pid })
    }

    /// Terminate the process behind `handle`
    ///
    /// Sends SIGTERM (kill on non-Unix), waits up to a grace period for the
    /// process to exit, then kills it.
    pub async fn stop(&self, handle: DaemonHandle) -> Result<(), ProcessError> {
        let tracked = {
            let mut processes = self.processes();
            let matches = processes
                .get(&handle.coin)
                .is_some_and(|child| child.id() == handle.pid);
            if matches {
                processes.remove(&handle.coin)
            } else {
                None
            }
        };
        let mut child = tracked.ok_or_else(|| {
            ProcessError::StopFailed(format!(
                "no tracked process {} for {}",
                handle.pid, handle.coin
            ))
        })?;

        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(ProcessError::StopFailed(format!(
                    "process {} already exited ({})",
                    handle.pid, status
                )));
            }
            Ok(None) => {}
            Err(e) => return Err(ProcessError::StopFailed(e.to_string())),
        }

        log::info!("Stopping {} daemon (PID {})", handle.coin, handle.pid);
        terminate(&mut child)?;
        reap(&mut child, handle.pid).await;

        Ok(())
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<String, Child>> {
        // A panic while holding the lock leaves the map itself intact
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Command-line flags for a daemon launch
pub fn launch_args(
    profile: &CoinProfile,
    credentials: &Credentials,
    data_dir: &Path,
) -> Vec<String> {
    let mut args = vec![
        format!("-rpcuser={}", credentials.user()),
        format!("-rpcpassword={}", credentials.password()),
    ];

    if profile.use_test_net {
        args.push("-testnet".to_string());
    }

    if profile.index_transactions {
        args.push("-addressindex=1".to_string());
    }

    args.push(format!("-datadir={}", data_dir.display()));
    args
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<(), ProcessError> {
    let pid = child.id() as libc::pid_t;
    // SAFETY: plain kill(2) on a PID we spawned and have not reaped yet
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ProcessError::StopFailed(
            std::io::Error::last_os_error().to_string(),
        ))
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<(), ProcessError> {
    child
        .kill()
        .map_err(|e| ProcessError::StopFailed(e.to_string()))
}

/// Wait for `child` to exit, killing it after [`STOP_GRACE`]
async fn reap(child: &mut Child, pid: u32) {
    let deadline = tokio::time::Instant::now() + STOP_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("Daemon process {} exited ({})", pid, status);
                return;
            }
            Ok(None) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(REAP_POLL).await;
            }
            Ok(None) => {
                log::warn!("Daemon process {} ignored SIGTERM, killing", pid);
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(e) => {
                log::warn!("Failed to wait for daemon process {}: {}", pid, e);
                return;
            }
        }
    }
}

/// Kill a child left tracked by an earlier start
///
/// The supervisor stops before starting, so this only fires when that stop
/// failed; the old daemon would otherwise hold the RPC port untracked.
fn retire(coin: &str, mut previous: Child) {
    if let Ok(Some(_)) = previous.try_wait() {
        return;
    }
    log::warn!(
        "Killing leftover {} process {} before starting a new one",
        coin,
        previous.id()
    );
    if let Err(e) = previous.kill() {
        log::warn!("Failed to kill process {}: {}", previous.id(), e);
    }
    let _ = previous.wait();
}

/// PID of another process running `binary`
fn find_untracked_process(binary: &Path) -> Option<u32> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
    );

    sys.processes()
        .iter()
        .find(|(_, process)| process.exe() == Some(binary))
        .map(|(pid, _)| pid.as_u32())
}
