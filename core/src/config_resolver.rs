//! Resolves a phone number to its AgentConfig, cache-aside against the shared cache with
//! a fallback GET to the management API's internal lookup endpoint.

use crate::cache::Cache;
use crate::config::{CacheConfig, ManagementApiConfig};
use crate::error::ConfigError;
use crate::model::AgentConfig;
use std::time::Duration;
use tracing::warn;

pub struct ConfigResolver {
    cache: Cache,
    http: reqwest::Client,
    management_api: ManagementApiConfig,
    ttl: Duration,
}

impl ConfigResolver {
    pub fn new(cache: Cache, management_api: ManagementApiConfig, cache_config: &CacheConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(management_api.timeout_ms))
            .build()
            .expect("reqwest client construction must not fail");
        Self {
            cache,
            http,
            management_api,
            ttl: Duration::from_secs(cache_config.config_ttl_seconds),
        }
    }

    /// `None` means the call must be rejected: either nothing is configured for this
    /// phone number, or the lookup itself failed. Either way no AgentConfig is returned.
    pub async fn resolve(&self, phone_number: &str) -> Result<AgentConfig, ConfigError> {
        let key = format!("agent_config:{phone_number}");

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(config) = serde_json::from_str::<AgentConfig>(&cached) {
                    return Ok(config);
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: "config_resolver", %err, "cache read failed, falling through to management API");
            }
        }

        let url = format!(
            "{}/api/v1/agents/internal/lookup",
            self.management_api.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .query(&[("phone_number", phone_number)])
            .header("X-Internal-Key", &self.management_api.shared_secret)
            .send()
            .await
            .map_err(|e| ConfigError::FetchFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ConfigError::Missing);
        }
        if !response.status().is_success() {
            return Err(ConfigError::FetchFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let config: AgentConfig = response
            .json()
            .await
            .map_err(|e| ConfigError::FetchFailed(e.to_string()))?;

        if let Ok(serialized) = serde_json::to_string(&config) {
            if let Err(err) = self.cache.set_ex(&key, &serialized, self.ttl).await {
                warn!(target: "config_resolver", %err, "failed to populate config cache");
            }
        }

        Ok(config)
    }
}
