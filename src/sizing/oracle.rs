//! # External sizing oracle.
//!
//! The oracle is an upstream service that recommends a total shard count and
//! reports how many session starts remain in the current rate-limit window.
//! Auto-sizing refuses to proceed when the remaining budget cannot cover the
//! recommendation, rather than under-provisioning.
//!
//! The pure helpers at the bottom map entity ids onto shards the same way the
//! upstream gateway does: `(id >> 22) % total`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Default API base for [`HttpSizingOracle`].
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Rate-limit budget for session starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStartLimit {
    /// Session starts allowed per window.
    pub total: u32,
    /// Session starts left in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets.
    pub reset_after: u64,
    /// Shards that may identify concurrently.
    pub max_concurrency: u32,
}

/// Oracle answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    /// Gateway URL, if the oracle reports one.
    #[serde(default)]
    pub url: Option<String>,
    /// Recommended total shard count.
    #[serde(default = "one")]
    pub shards: u32,
    /// Session start budget, if reported.
    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}

fn one() -> u32 {
    1
}

/// Source of shard count recommendations.
#[async_trait]
pub trait SizingOracle: Send + Sync + 'static {
    /// Raw oracle answer.
    async fn gateway_info(&self) -> Result<GatewayInfo, OracleError>;

    /// Recommended shard count, checked against the session start budget.
    ///
    /// Fails with [`OracleError::SessionLimit`] when fewer session starts remain
    /// than shards are recommended.
    async fn recommended_shards(&self) -> Result<u32, OracleError> {
        let info = self.gateway_info().await?;
        let recommended = info.shards.max(1);

        match info.session_start_limit {
            Some(limit) if limit.remaining < recommended => Err(OracleError::SessionLimit {
                remaining: limit.remaining,
                required: recommended,
                reset_after: Duration::from_millis(limit.reset_after),
            }),
            _ => Ok(recommended),
        }
    }
}

/// Oracle backed by the gateway HTTP API (`GET {base}/gateway/bot`).
#[derive(Clone, Debug)]
pub struct HttpSizingOracle {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSizingOracle {
    /// Oracle against the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Oracle against a custom base URL (proxies, tests).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    /// Uses a preconfigured client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl SizingOracle for HttpSizingOracle {
    async fn gateway_info(&self) -> Result<GatewayInfo, OracleError> {
        let url = format!("{}/gateway/bot", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if status.is_client_error() || status.is_server_error() {
            let message = serde_json::from_slice::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| "Unknown error".to_owned());
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let info: GatewayInfo = serde_json::from_slice(&body)?;
        tracing::debug!(shards = info.shards, "oracle recommendation received");
        Ok(info)
    }
}

/// Oracle returning a fixed answer.
#[derive(Clone, Debug)]
pub struct StaticOracle {
    info: GatewayInfo,
}

impl StaticOracle {
    /// Recommends `shards` with an unlimited session budget.
    pub fn new(shards: u32) -> Self {
        Self {
            info: GatewayInfo {
                url: None,
                shards,
                session_start_limit: None,
            },
        }
    }

    /// Attaches a session start budget.
    pub fn with_session_limit(mut self, remaining: u32, reset_after: Duration) -> Self {
        self.info.session_start_limit = Some(SessionStartLimit {
            total: remaining,
            remaining,
            reset_after: reset_after.as_millis().min(u128::from(u64::MAX)) as u64,
            max_concurrency: 1,
        });
        self
    }
}

#[async_trait]
impl SizingOracle for StaticOracle {
    async fn gateway_info(&self) -> Result<GatewayInfo, OracleError> {
        Ok(self.info.clone())
    }
}

/// Shard serving entity `id` in a fleet of `total` shards.
///
/// `total = 0` is treated as a single shard.
pub fn shard_for_entity(id: u64, total: u32) -> u32 {
    ((id >> 22) % u64::from(total.max(1))) as u32
}

/// Shards needed to carry `count` entities at `per_shard` each (rounded up).
pub fn optimal_shards(count: u64, per_shard: u64) -> u32 {
    count.div_ceil(per_shard.max(1)).min(u64::from(u32::MAX)) as u32
}

/// Groups entity ids by the shard serving them; index `i` holds shard `i`'s ids.
pub fn distribute_entities(ids: &[u64], total: u32) -> Vec<Vec<u64>> {
    let mut buckets = vec![Vec::new(); total.max(1) as usize];
    for &id in ids {
        buckets[shard_for_entity(id, total) as usize].push(id);
    }
    buckets
}
