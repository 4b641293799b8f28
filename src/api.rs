//! HTTP surface
//!
//! Thin axum layer over the coin registry: status, recent activity and a raw
//! JSON-RPC pass-through per coin.

use crate::daemon::error::GatewayError;
use crate::daemon::state::DaemonStatus;
use crate::daemon::supervisor::CoinRegistry;
use crate::logging::{ActivityEntry, ActivityLog};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state for all handlers
pub struct AppState {
    pub registry: Arc<CoinRegistry>,
    pub activity: &'static ActivityLog,
}

/// Body of `POST /api/:coin/v1/rpc`
#[derive(Debug, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!([])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorCode {
    code: &'static str,
    error_message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorCode>,
}

fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            errors: vec![ErrorCode {
                code,
                error_message: message,
            }],
        }),
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/meta/v1/coins", get(list_coins))
        .route("/api/meta/v1/activity", get(list_activity))
        .route("/api/:coin/v1/rpc", post(forward_rpc))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("HTTP API listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_coins(State(state): State<Arc<AppState>>) -> Json<Vec<DaemonStatus>> {
    Json(state.registry.statuses().await)
}

async fn list_activity(State(state): State<Arc<AppState>>) -> Json<Vec<ActivityEntry>> {
    Json(state.activity.entries())
}

async fn forward_rpc(
    State(state): State<Arc<AppState>>,
    Path(coin): Path<String>,
    Json(call): Json<RpcCall>,
) -> Response {
    let Some(supervisor) = state.registry.get(&coin) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "COIN_NOT_FOUND",
            format!("coin {} is not configured", coin),
        );
    };

    match supervisor.call(&call.method, &call.params).await {
        Ok(reply) => {
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                Body::from(reply.body),
            )
                .into_response()
        }
        Err(GatewayError::Unreachable(e)) => {
            log::warn!("{} {} failed: daemon unreachable: {}", coin, call.method, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "DAEMON_UNREACHABLE", e)
        }
        Err(GatewayError::TransportError(e)) => {
            log::warn!("{} {} failed: {}", coin, call.method, e);
            error_response(StatusCode::BAD_GATEWAY, "DAEMON_TRANSPORT_ERROR", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::config::test_profile;
    use crate::daemon::credentials::Credentials;
    use crate::daemon::downloader::ProgressFn;
    use crate::daemon::error::{ProcessError, ProvisionError};
    use crate::daemon::manager::DaemonHandle;
    use crate::daemon::rpc::RpcReply;
    use crate::daemon::supervisor::{DaemonBackend, SupervisorOptions};
    use crate::daemon::CoinProfile;
    use async_trait::async_trait;
    use std::path::{Path as FsPath, PathBuf};

    /// NAV answers with the call echoed back, PIVX is down, BTC is broken
    struct EchoBackend;

    #[async_trait]
    impl DaemonBackend for EchoBackend {
        async fn call(
            &self,
            profile: &CoinProfile,
            credentials: &Credentials,
            method: &str,
            params: &serde_json::Value,
        ) -> Result<RpcReply, GatewayError> {
            match profile.currency_code.as_str() {
                "NAV" => Ok(RpcReply {
                    status: if method == "badmethod" { 404 } else { 200 },
                    body: serde_json::to_vec(&serde_json::json!({
                        "method": method,
                        "params": params,
                        "user": credentials.user(),
                    }))
                    .unwrap(),
                }),
                "PIVX" => Err(GatewayError::Unreachable("connection refused".to_string())),
                _ => Err(GatewayError::TransportError("connection reset".to_string())),
            }
        }

        fn locate(&self, profile: &CoinProfile) -> Result<PathBuf, ProcessError> {
            Err(ProcessError::BinaryNotFound(PathBuf::from(&profile.lib_path)))
        }

        async fn provision(
            &self,
            _profile: &CoinProfile,
            _on_progress: &ProgressFn<'_>,
        ) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn start(
            &self,
            profile: &CoinProfile,
            _credentials: &Credentials,
            _binary: &FsPath,
        ) -> Result<DaemonHandle, ProcessError> {
            Ok(DaemonHandle::new_for_test(&profile.key(), 1))
        }

        async fn stop(&self, _handle: DaemonHandle) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    async fn spawn_api() -> (String, Arc<CoinRegistry>) {
        let mut nav = test_profile("NAV");
        nav.rpc_user = Some("alice".to_string());
        nav.rpc_password = Some("secret".to_string());

        let registry = Arc::new(CoinRegistry::new(
            vec![nav, test_profile("PIVX"), test_profile("BTC")],
            Arc::new(EchoBackend),
            SupervisorOptions::default(),
        ));
        let state = Arc::new(AppState {
            registry: Arc::clone(&registry),
            activity: Box::leak(Box::new(ActivityLog::new(8))),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, state, std::future::pending()));

        (base, registry)
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _) = spawn_api().await;
        let body = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_rpc_is_forwarded_with_coin_credentials() {
        let (base, _) = spawn_api().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/nav/v1/rpc", base))
            .json(&serde_json::json!({ "method": "getbalance", "params": ["*", 6] }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["method"], "getbalance");
        assert_eq!(body["params"], serde_json::json!(["*", 6]));
        assert_eq!(body["user"], "alice");
    }

    #[tokio::test]
    async fn test_daemon_status_is_passed_through() {
        let (base, _) = spawn_api().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/NAV/v1/rpc", base))
            .json(&serde_json::json!({ "method": "badmethod" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["params"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_gateway_errors_map_to_5xx() {
        let (base, _) = spawn_api().await;
        let client = reqwest::Client::new();

        let down = client
            .post(format!("{}/api/pivx/v1/rpc", base))
            .json(&serde_json::json!({ "method": "getblockcount" }))
            .send()
            .await
            .unwrap();
        assert_eq!(down.status(), 503);
        let body: serde_json::Value = down.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "DAEMON_UNREACHABLE");

        let broken = client
            .post(format!("{}/api/btc/v1/rpc", base))
            .json(&serde_json::json!({ "method": "getblockcount" }))
            .send()
            .await
            .unwrap();
        assert_eq!(broken.status(), 502);
    }

    #[tokio::test]
    async fn test_unknown_coin_is_404() {
        let (base, _) = spawn_api().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/doge/v1/rpc", base))
            .json(&serde_json::json!({ "method": "getblockcount" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "COIN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_coins() {
        let (base, _) = spawn_api().await;
        let coins: Vec<serde_json::Value> = reqwest::get(format!("{}/api/meta/v1/coins", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(coins.len(), 3);
        assert_eq!(coins[0]["currencyCode"], "NAV");
        assert_eq!(coins[0]["state"], "unknown");
    }
}
