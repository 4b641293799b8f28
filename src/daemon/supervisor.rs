//! Per-coin daemon supervision
//!
//! Each configured coin gets one [`DaemonSupervisor`] running its own
//! heartbeat task:
//!
//! ```text
//!   tick ──► probe (getblockcount)
//!              │ ok ─────────────────────────────► Running
//!              │ err
//!              ▼
//!          Unresponsive ──► installing flag held / backing off? ──► skip
//!              │
//!              ├─ stop tracked handle (best effort)
//!              ├─ locate ── absent ──► Missing ──► Installing ──► resolve + install
//!              └─ Starting ──► start ──► Running
//!                               └─ err ──► Unresponsive (+ backoff)
//! ```
//!
//! Supervisors share nothing with each other; one coin's slow install never
//! delays another coin's heartbeat.

use super::config::CoinProfile;
use super::credentials::Credentials;
use super::downloader::ProgressFn;
use super::error::{GatewayError, ProcessError, ProvisionError, RecoveryError};
use super::installer::ArchiveInstaller;
use super::manager::{DaemonHandle, ProcessController};
use super::release::ReleaseResolver;
use super::rpc::{RpcGateway, RpcReply, LIVENESS_METHOD};
use super::state::{
    create_daemon_status, DaemonState, DaemonStatus, DownloadProgress, DownloadStage,
    SharedDaemonStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Heartbeat floor; profiles asking for less are clamped to this
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(1000);

/// Default cap on the retry delay after failed installs or starts
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Everything the supervisor needs from the outside world
#[async_trait]
pub trait DaemonBackend: Send + Sync {
    /// Forward one JSON-RPC call to the coin's daemon
    async fn call(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<RpcReply, GatewayError>;

    /// Path of the installed daemon binary
    fn locate(&self, profile: &CoinProfile) -> Result<PathBuf, ProcessError>;

    /// Resolve and install the pinned release
    async fn provision(
        &self,
        profile: &CoinProfile,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), ProvisionError>;

    /// Launch the daemon
    async fn start(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        binary: &Path,
    ) -> Result<DaemonHandle, ProcessError>;

    /// Terminate a daemon we launched
    async fn stop(&self, handle: DaemonHandle) -> Result<(), ProcessError>;
}

/// Production backend wiring the leaf components together
pub struct LocalBackend {
    resolver: ReleaseResolver,
    installer: ArchiveInstaller,
    processes: Arc<ProcessController>,
    gateway: RpcGateway,
}

impl LocalBackend {
    pub fn new(
        resolver: ReleaseResolver,
        installer: ArchiveInstaller,
        processes: ProcessController,
        gateway: RpcGateway,
    ) -> Self {
        Self {
            resolver,
            installer,
            processes: Arc::new(processes),
            gateway,
        }
    }
}

#[async_trait]
impl DaemonBackend for LocalBackend {
    async fn call(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<RpcReply, GatewayError> {
        self.gateway.call(profile, credentials, method, params).await
    }

    fn locate(&self, profile: &CoinProfile) -> Result<PathBuf, ProcessError> {
        self.processes.locate(profile)
    }

    async fn provision(
        &self,
        profile: &CoinProfile,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), ProvisionError> {
        on_progress(&DownloadProgress {
            stage: DownloadStage::FetchingRelease,
            ..Default::default()
        });
        let asset = self.resolver.resolve(profile).await?;

        let lib_dir = self.processes.layout().lib_dir();
        self.installer.install(&asset, &lib_dir, on_progress).await?;
        Ok(())
    }

    async fn start(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        binary: &Path,
    ) -> Result<DaemonHandle, ProcessError> {
        let processes = Arc::clone(&self.processes);
        let profile = profile.clone();
        let credentials = credentials.clone();
        let binary = binary.to_path_buf();

        let path = binary.clone();
        // Process scan and spawn block
        tokio::task::spawn_blocking(move || processes.start(&profile, &credentials, &binary))
            .await
            .map_err(|e| ProcessError::SpawnFailed {
                path,
                source: std::io::Error::other(e.to_string()),
            })?
    }

    async fn stop(&self, handle: DaemonHandle) -> Result<(), ProcessError> {
        self.processes.stop(handle).await
    }
}

/// Supervisor tuning shared by all coins
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Heartbeat floor
    pub min_heartbeat: Duration,
    /// Cap on the retry delay; zero disables backoff
    pub max_backoff: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            min_heartbeat: MIN_HEARTBEAT,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Capped exponential backoff between recovery attempts
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    /// `min(base * 2^(failures-1), max)`; zero when `max` is zero
    fn delay(base: Duration, max: Duration, failures: u32) -> Duration {
        if max.is_zero() || failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(max)
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    fn record_failure(&mut self, now: Instant, base: Duration, max: Duration) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = Self::delay(base, max, self.failures);
        self.retry_at = (!delay.is_zero()).then(|| now + delay);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }
}

/// Clears the installing flag however the recovery attempt ends
struct InstallingGuard<'a>(&'a AtomicBool);

impl Drop for InstallingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps one coin's daemon installed and running
pub struct DaemonSupervisor {
    profile: CoinProfile,
    credentials: Arc<Credentials>,
    backend: Arc<dyn DaemonBackend>,
    options: SupervisorOptions,
    status: SharedDaemonStatus,
    /// Handle of the process we launched, if any
    handle: Mutex<Option<DaemonHandle>>,
    /// Set while an install/start attempt is in flight
    installing: AtomicBool,
    backoff: Mutex<Backoff>,
    /// Whether a daemon was ever seen running or launched
    ever_started: AtomicBool,
}

impl DaemonSupervisor {
    /// Activate `profile`; credentials are fixed from here on
    pub fn new(
        profile: CoinProfile,
        backend: Arc<dyn DaemonBackend>,
        options: SupervisorOptions,
    ) -> Self {
        let credentials = Arc::new(Credentials::for_profile(&profile));
        let status = create_daemon_status(
            &profile.name,
            &profile.currency_code,
            &profile.daemon_version,
        );

        Self {
            profile,
            credentials,
            backend,
            options,
            status,
            handle: Mutex::new(None),
            installing: AtomicBool::new(false),
            backoff: Mutex::new(Backoff::default()),
            ever_started: AtomicBool::new(false),
        }
    }

    pub fn profile(&self) -> &CoinProfile {
        &self.profile
    }

    pub fn credentials(&self) -> Arc<Credentials> {
        Arc::clone(&self.credentials)
    }

    pub fn status(&self) -> SharedDaemonStatus {
        Arc::clone(&self.status)
    }

    pub async fn snapshot(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    /// Effective heartbeat interval
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.profile.daemon_heartbeat).max(self.options.min_heartbeat)
    }

    /// Forward an RPC call using this coin's port and credentials
    pub async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<RpcReply, GatewayError> {
        self.backend
            .call(&self.profile, &self.credentials, method, params)
            .await
    }

    /// Run the heartbeat loop until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.heartbeat();
        log::info!(
            "Supervising {} ({}) every {:?} on port {}",
            self.profile.name,
            self.profile.currency_code,
            period,
            self.profile.rpc_port()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// One heartbeat: evaluate, then react if the daemon is down
    pub async fn tick(&self) -> DaemonState {
        if self.evaluate().await {
            return DaemonState::Running;
        }
        self.react().await;
        self.status.read().await.state
    }

    /// Liveness probe; true when the daemon answered at all
    async fn evaluate(&self) -> bool {
        let result = self
            .backend
            .call(&self.profile, &self.credentials, LIVENESS_METHOD, &serde_json::json!([]))
            .await;

        match result {
            Ok(reply) => {
                self.ever_started.store(true, Ordering::Release);
                let changed = self.set_state(DaemonState::Running).await;
                if changed {
                    // Came up on its own; earlier failures no longer count
                    self.backoff.lock().await.reset();
                    self.status.write().await.consecutive_failures = 0;
                }
                if changed && !reply.is_success() {
                    log::warn!(
                        "{} daemon answered {} with HTTP {}; RPC credentials may not match",
                        self.profile.currency_code,
                        LIVENESS_METHOD,
                        reply.status
                    );
                }
                true
            }
            Err(e) => {
                if self.installing.load(Ordering::Acquire) {
                    log::debug!(
                        "{} probe failed during install: {}",
                        self.profile.currency_code,
                        e
                    );
                } else if self.set_state(DaemonState::Unresponsive).await {
                    log::warn!("{} daemon unresponsive: {}", self.profile.currency_code, e);
                }
                false
            }
        }
    }

    /// Recover an unresponsive daemon unless another attempt is in flight
    async fn react(&self) {
        if self
            .installing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!(
                "{} recovery already in progress, skipping",
                self.profile.currency_code
            );
            return;
        }
        let _guard = InstallingGuard(&self.installing);

        if !self.backoff.lock().await.ready(Instant::now()) {
            log::debug!("{} backing off", self.profile.currency_code);
            return;
        }

        self.status.write().await.installing = true;
        let result = self.recover().await;

        let mut backoff = self.backoff.lock().await;
        let mut status = self.status.write().await;
        status.installing = false;

        match result {
            Ok(()) => {
                backoff.reset();
                status.consecutive_failures = 0;
                status.last_error = None;
            }
            Err(e) => {
                let delay = backoff.record_failure(
                    Instant::now(),
                    self.heartbeat(),
                    self.options.max_backoff,
                );
                status.consecutive_failures = backoff.failures;
                status.last_error = Some(e.to_string());
                status.transition(DaemonState::Unresponsive);

                if e.is_launch_failure() && !self.ever_started.load(Ordering::Acquire) {
                    log::error!(
                        "{} daemon failed its first launch: {}",
                        self.profile.currency_code,
                        e
                    );
                } else {
                    log::warn!("{} recovery failed: {}", self.profile.currency_code, e);
                }
                if !delay.is_zero() {
                    log::info!(
                        "{} next recovery attempt in {:?}",
                        self.profile.currency_code,
                        delay
                    );
                }
            }
        }
    }

    /// Stop, locate or install, then start
    async fn recover(&self) -> Result<(), RecoveryError> {
        self.stop_tracked().await;

        let binary = match self.backend.locate(&self.profile) {
            Ok(path) => path,
            Err(ProcessError::BinaryNotFound(path)) => {
                log::info!(
                    "{} binary missing at {}, installing v{}",
                    self.profile.currency_code,
                    path.display(),
                    self.profile.daemon_version
                );
                self.set_state(DaemonState::Missing).await;
                self.set_state(DaemonState::Installing).await;

                let status = Arc::clone(&self.status);
                let on_progress = move |progress: &DownloadProgress| {
                    // Progress is best effort; skip updates while a reader holds the lock
                    if let Ok(mut status) = status.try_write() {
                        status.download_progress = Some(progress.clone());
                    }
                };
                self.backend.provision(&self.profile, &on_progress).await?;
                self.backend.locate(&self.profile)?
            }
            Err(e) => return Err(e.into()),
        };

        {
            let mut status = self.status.write().await;
            status.binary_path = Some(binary.display().to_string());
            status.transition(DaemonState::Starting);
        }

        let handle = self
            .backend
            .start(&self.profile, &self.credentials, &binary)
            .await?;

        self.ever_started.store(true, Ordering::Release);
        {
            let mut status = self.status.write().await;
            status.pid = Some(handle.pid());
            status.download_progress = None;
            status.transition(DaemonState::Running);
        }
        *self.handle.lock().await = Some(handle);

        Ok(())
    }

    /// Best-effort stop of the process we launched last
    async fn stop_tracked(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };

        let pid = handle.pid();
        if let Err(e) = self.backend.stop(handle).await {
            log::warn!(
                "{} failed to stop PID {}: {}",
                self.profile.currency_code,
                pid,
                e
            );
        }
        self.status.write().await.pid = None;
    }

    /// Final teardown; optionally stops the daemon
    ///
    /// Tries the daemon's own `stop` RPC first and falls back to signalling
    /// the process when that fails and we launched it.
    pub async fn shutdown(&self, stop_daemon: bool) {
        self.set_state(DaemonState::Stopping).await;

        if stop_daemon {
            match self.call("stop", &serde_json::json!([])).await {
                Ok(reply) if reply.is_success() => {
                    log::info!(
                        "{} daemon acknowledged stop RPC",
                        self.profile.currency_code
                    );
                    self.handle.lock().await.take();
                }
                Ok(reply) => {
                    log::warn!(
                        "{} stop RPC answered HTTP {}",
                        self.profile.currency_code,
                        reply.status
                    );
                    self.stop_tracked().await;
                }
                Err(e) => {
                    log::warn!("{} stop RPC failed: {}", self.profile.currency_code, e);
                    self.stop_tracked().await;
                }
            }
        }

        let mut status = self.status.write().await;
        status.pid = None;
        status.installing = false;
        status.transition(DaemonState::Stopped);
    }

    async fn set_state(&self, state: DaemonState) -> bool {
        let mut status = self.status.write().await;
        let previous = status.state;
        let changed = status.transition(state);
        if changed {
            log::info!(
                "{}: {} -> {}",
                self.profile.currency_code,
                previous,
                state
            );
        }
        changed
    }
}

/// All active coins, addressable by currency code
pub struct CoinRegistry {
    supervisors: Vec<Arc<DaemonSupervisor>>,
    by_code: HashMap<String, usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CoinRegistry {
    /// One supervisor per profile, all sharing `backend`
    pub fn new(
        profiles: Vec<CoinProfile>,
        backend: Arc<dyn DaemonBackend>,
        options: SupervisorOptions,
    ) -> Self {
        Self::from_supervisors(
            profiles
                .into_iter()
                .map(|p| Arc::new(DaemonSupervisor::new(p, Arc::clone(&backend), options)))
                .collect(),
        )
    }

    pub fn from_supervisors(supervisors: Vec<Arc<DaemonSupervisor>>) -> Self {
        let by_code = supervisors
            .iter()
            .enumerate()
            .map(|(i, s)| (s.profile().key(), i))
            .collect();

        Self {
            supervisors,
            by_code,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start every coin's heartbeat task
    pub async fn spawn_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for supervisor in &self.supervisors {
            tasks.push(Arc::clone(supervisor).spawn());
        }
    }

    /// Supervisor for `code`, case-insensitive
    pub fn get(&self, code: &str) -> Option<&Arc<DaemonSupervisor>> {
        self.by_code
            .get(&code.to_lowercase())
            .map(|&i| &self.supervisors[i])
    }

    pub fn credentials(&self, code: &str) -> Option<Arc<Credentials>> {
        self.get(code).map(|s| s.credentials())
    }

    /// Status snapshots in configuration order
    pub async fn statuses(&self) -> Vec<DaemonStatus> {
        let mut statuses = Vec::with_capacity(self.supervisors.len());
        for supervisor in &self.supervisors {
            statuses.push(supervisor.snapshot().await);
        }
        statuses
    }

    /// Abort all heartbeat tasks, then tear every coin down
    pub async fn shutdown(&self, stop_daemons: bool) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
            let _ = task.await;
        }

        let teardowns = self
            .supervisors
            .iter()
            .map(|s| s.shutdown(stop_daemons));
        futures_util::future::join_all(teardowns).await;

        log::info!("All supervisors stopped");
    }
}
