//! Daemon supervision for coin gateways
//!
//! Keeps each configured coin daemon installed and running, and forwards
//! JSON-RPC calls to it with the credentials it was launched with.
//!
//! ## Features
//!
//! - **Release Resolution**: Pick the pinned release asset for this host from a release feed
//! - **Installation**: Stream, verify (SHA256) and unpack zip/tar.gz archives
//! - **Process Management**: Launch with generated credentials, terminate on demand
//! - **Health Checking**: Per-coin heartbeat with install/restart and capped backoff
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    daemon module                         │
//! ├─────────────────────────────────────────────────────────┤
//! │  supervisor.rs  - Heartbeat loop, backend seam, registry │
//! │  rpc.rs         - JSON-RPC gateway to local daemons      │
//! │  manager.rs     - Process lifecycle (locate/start/stop)  │
//! │  release.rs     - Release feed asset selection           │
//! │  installer.rs   - Download, verify, extract              │
//! │  downloader.rs  - Streaming HTTP download                │
//! │  hasher.rs      - SHA256 verification                    │
//! │  extractor.rs   - Archive extraction (zip/tar.gz)        │
//! │  config.rs      - Coin profiles and filesystem layout    │
//! │  credentials.rs - RPC credentials                        │
//! │  state.rs       - Lifecycle states and status records    │
//! │  error.rs       - Error types                            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod credentials;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod hasher;
pub mod installer;
pub mod manager;
pub mod release;
pub mod rpc;
pub mod state;
pub mod supervisor;

// Re-export key types for convenience
pub use config::{AppLayout, CoinProfile, HostPlatform};
pub use credentials::Credentials;
pub use error::{GatewayError, InstallError, ProcessError, ResolveError};
pub use rpc::{RpcGateway, RpcReply};
pub use state::{DaemonState, DaemonStatus};
pub use supervisor::{
    CoinRegistry, DaemonBackend, DaemonSupervisor, LocalBackend, SupervisorOptions,
};
