//! Startup health probing for upstream proxies
//!
//! Each configured proxy makes one cheap round trip to a reachability URL
//! before it is admitted to the pool.

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::config::HealthCheckConfig;
use crate::error::{Result, RelayError};
use crate::models::ProxyEndpoint;

/// Health probe configuration
#[derive(Debug, Clone)]
pub struct HealthProbeConfig {
    /// URL fetched through each proxy
    pub check_url: String,
    /// Timeout for each probe
    pub check_timeout: Duration,
    /// Probes running in parallel
    pub workers: usize,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            check_url: "http://www.gstatic.com/generate_204".to_string(),
            check_timeout: Duration::from_secs(10),
            workers: 8,
        }
    }
}

impl From<&HealthCheckConfig> for HealthProbeConfig {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            check_url: config.url.clone(),
            check_timeout: config.timeout,
            workers: config.workers.max(1),
        }
    }
}

/// Vets proxies before they are admitted to the pool
pub struct HealthProbe {
    config: HealthProbeConfig,
}

impl HealthProbe {
    pub fn new(config: HealthProbeConfig) -> Self {
        Self { config }
    }

    /// Whether `endpoint` completes a round trip to the reachability URL
    ///
    /// Any HTTP response counts, rate-limit and block statuses included,
    /// except 407: a proxy that rejects our credentials cannot carry traffic.
    #[instrument(skip(self), fields(proxy = %endpoint))]
    pub async fn vet(&self, endpoint: &ProxyEndpoint) -> bool {
        match self.round_trip(endpoint).await {
            Ok(status) => {
                debug!("Proxy {} is reachable (status {})", endpoint, status);
                true
            }
            Err(msg) => {
                warn!("Proxy {} failed health probe: {}", endpoint, msg);
                false
            }
        }
    }

    /// Vet every endpoint, returning the survivors in their original order
    ///
    /// Fails with a configuration error when no proxy survives.
    pub async fn vet_all(&self, endpoints: Vec<ProxyEndpoint>) -> Result<Vec<ProxyEndpoint>> {
        let total = endpoints.len();
        info!("Probing {} proxies via {}", total, self.config.check_url);

        let mut results = futures::stream::iter(endpoints.into_iter().enumerate())
            .map(|(index, endpoint)| async move {
                let healthy = self.vet(&endpoint).await;
                (index, endpoint, healthy)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let healthy: Vec<ProxyEndpoint> = results
            .into_iter()
            .filter_map(|(_, endpoint, healthy)| healthy.then_some(endpoint))
            .collect();

        info!(
            "Health probe complete: {} healthy, {} unhealthy",
            healthy.len(),
            total - healthy.len()
        );

        if healthy.is_empty() {
            return Err(RelayError::InvalidConfig(format!(
                "none of the {} configured proxies passed the health probe",
                total
            )));
        }
        Ok(healthy)
    }

    async fn round_trip(&self, endpoint: &ProxyEndpoint) -> std::result::Result<u16, String> {
        let proxy = reqwest::Proxy::all(endpoint.url())
            .map_err(|e| format!("invalid proxy url: {}", e))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.config.check_timeout)
            .build()
            .map_err(|e| format!("client build failed: {}", e))?;

        let response = client
            .get(&self.config.check_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "probe timed out".to_string()
                } else {
                    format!("probe failed: {}", e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err("proxy rejected credentials (407)".to_string());
        }
        Ok(status.as_u16())
    }
}
