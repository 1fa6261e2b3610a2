//! Shared pool of upstream proxies
//!
//! Holds the configured endpoints plus per-endpoint usage state. Each
//! endpoint's state sits behind its own lock, so operations touching
//! different proxies never contend.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ProxyPoolConfig;
use crate::error::{Result, RelayError};
use crate::models::{ProxyEndpoint, ProxyId, ProxyStatusView, ProxyUsageState};

#[derive(Debug)]
struct PoolEntry {
    endpoint: ProxyEndpoint,
    state: Mutex<ProxyUsageState>,
}

/// Pool of upstream proxy endpoints with usage bookkeeping
#[derive(Debug)]
pub struct ProxyPool {
    entries: Vec<PoolEntry>,
    min_interval: Duration,
}

impl ProxyPool {
    /// Create a pool from already-validated endpoints
    ///
    /// Duplicate identities are dropped, keeping the first occurrence.
    pub fn new(endpoints: Vec<ProxyEndpoint>, min_interval: Duration) -> Self {
        let mut seen = HashSet::new();
        let entries = endpoints
            .into_iter()
            .filter(|endpoint| {
                let fresh = seen.insert(endpoint.id());
                if !fresh {
                    warn!("Skipping duplicate proxy {}", endpoint);
                }
                fresh
            })
            .map(|endpoint| PoolEntry {
                endpoint,
                state: Mutex::new(ProxyUsageState::default()),
            })
            .collect();

        Self {
            entries,
            min_interval,
        }
    }

    /// Parse the configured parallel lists into a pool
    pub fn load_from(config: &ProxyPoolConfig) -> Result<Self> {
        Ok(Self::new(parse_endpoints(config)?, config.min_interval))
    }

    /// Snapshot of the configured endpoints
    pub fn all(&self) -> Vec<ProxyEndpoint> {
        self.entries.iter().map(|e| e.endpoint.clone()).collect()
    }

    /// Snapshot of endpoints together with their current usage state
    pub fn snapshot(&self) -> Vec<(ProxyEndpoint, ProxyUsageState)> {
        self.entries
            .iter()
            .map(|e| (e.endpoint.clone(), *e.state.lock()))
            .collect()
    }

    pub fn usage(&self, id: &ProxyId) -> Option<ProxyUsageState> {
        self.entry(id).map(|e| *e.state.lock())
    }

    /// Minimum spacing between two requests through the same proxy
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Record that an attempt through `id` started at `at`
    pub fn record_use(&self, id: &ProxyId, at: Instant) {
        self.update(id, |state| {
            if state.last_used_at.map_or(true, |prev| at > prev) {
                state.last_used_at = Some(at);
            }
        });
    }

    /// Put `id` in cooldown until `until`
    ///
    /// Never shortens an existing cooldown, and never ends before the
    /// minimum spacing from the last use has elapsed.
    pub fn record_cooldown(&self, id: &ProxyId, until: Instant) {
        let min_interval = self.min_interval;
        self.update(id, |state| {
            let floor = state.last_used_at.map(|t| t + min_interval);
            let until = floor.map_or(until, |f| until.max(f));
            if state.cooldown_until.map_or(true, |prev| until > prev) {
                state.cooldown_until = Some(until);
            }
        });
    }

    pub fn record_failure(&self, id: &ProxyId) {
        self.update(id, |state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        });
    }

    pub fn record_success(&self, id: &ProxyId) {
        self.update(id, |state| state.consecutive_failures = 0);
    }

    pub fn pool_size(&self) -> usize {
        self.entries.len()
    }

    /// Number of proxies that could serve a request right now
    pub fn active_proxy_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.state.lock().is_ready(now, self.min_interval))
            .count()
    }

    /// Per-proxy usage view (no credentials)
    pub fn status(&self) -> Vec<ProxyStatusView> {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|e| ProxyStatusView::new(&e.endpoint, &e.state.lock(), now, self.min_interval))
            .collect()
    }

    fn entry(&self, id: &ProxyId) -> Option<&PoolEntry> {
        self.entries.iter().find(|e| e.endpoint.has_id(id))
    }

    fn update(&self, id: &ProxyId, f: impl FnOnce(&mut ProxyUsageState)) {
        match self.entry(id) {
            Some(entry) => f(&mut entry.state.lock()),
            None => debug!("Ignoring usage update for unknown proxy {}", id),
        }
    }
}

/// Turn the configured parallel lists into endpoints
///
/// List-shape problems are fatal; individual malformed entries are skipped
/// with a warning unless nothing usable remains.
fn parse_endpoints(config: &ProxyPoolConfig) -> Result<Vec<ProxyEndpoint>> {
    let count = config.hosts.len();
    if config.ports.len() != count || config.usernames.len() != count {
        return Err(RelayError::InvalidConfig(format!(
            "proxy lists have mismatched lengths: {} hosts, {} ports, {} usernames",
            count,
            config.ports.len(),
            config.usernames.len()
        )));
    }
    if !config.passwords.is_empty() && config.passwords.len() != count {
        return Err(RelayError::InvalidConfig(format!(
            "PROXY_PASSWORDS has {} entries, expected {}",
            config.passwords.len(),
            count
        )));
    }
    if config.passwords.is_empty() && config.password.trim().is_empty() {
        return Err(RelayError::InvalidConfig(
            "PROXY_PASSWORD must be set when proxies are configured".into(),
        ));
    }

    let mut endpoints = Vec::with_capacity(count);
    for index in 0..count {
        let host = &config.hosts[index];
        let password = config
            .passwords
            .get(index)
            .unwrap_or(&config.password);

        let port = match config.ports[index].trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                warn!(
                    "Skipping proxy entry {} ({}): invalid port {:?}",
                    index,
                    host.trim(),
                    config.ports[index]
                );
                continue;
            }
        };

        match ProxyEndpoint::new(host, port, &config.usernames[index], password) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => warn!("Skipping proxy entry {}: {}", index, e),
        }
    }

    if endpoints.is_empty() {
        return Err(RelayError::InvalidConfig(
            "no usable proxy entries in configuration".into(),
        ));
    }

    Ok(endpoints)
}
