//! JSON-RPC gateway to local daemons
//!
//! Stateless: profile and credentials are passed on every call, so one
//! gateway serves all coins concurrently.

use super::config::CoinProfile;
use super::credentials::Credentials;
use super::downloader::create_client;
use super::error::GatewayError;
use serde::Serialize;
use std::time::Duration;

/// Method used as the liveness probe
pub const LIVENESS_METHOD: &str = "getblockcount";

/// Daemons are always co-located
const DAEMON_HOST: &str = "127.0.0.1";

/// RPC request body
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: &'a serde_json::Value,
}

/// Raw daemon reply, passed through to callers undecoded
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RpcReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends authenticated JSON-RPC requests to the daemon of a given coin
#[derive(Debug, Clone)]
pub struct RpcGateway {
    client: reqwest::Client,
}

impl RpcGateway {
    /// Gateway whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_client(Some(timeout))?,
        })
    }

    /// URL of the daemon for the profile's network mode
    pub fn endpoint(profile: &CoinProfile) -> String {
        format!("http://{}:{}", DAEMON_HOST, profile.rpc_port())
    }

    /// Issue one RPC call; no retries
    ///
    /// `params` is forwarded as-is. Any HTTP response, including error
    /// statuses, is returned as `Ok`.
    pub async fn call(
        &self,
        profile: &CoinProfile,
        credentials: &Credentials,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<RpcReply, GatewayError> {
        let request = RpcRequest { method, params };

        let response = self
            .client
            .post(Self::endpoint(profile))
            .basic_auth(credentials.user(), Some(credentials.password()))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        log::trace!(
            "{} {} -> {} ({} bytes)",
            profile.currency_code,
            method,
            status,
            body.len()
        );

        Ok(RpcReply { status, body })
    }
}
