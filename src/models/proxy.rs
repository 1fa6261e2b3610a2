use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::error::{Result, RelayError};

/// Identity of an upstream proxy
///
/// Two endpoints with the same `(host, port, username)` triple are the same
/// logical proxy regardless of password or construction site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProxyId {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Upstream proxy credential set
///
/// Value-like: usage bookkeeping lives in the pool, not here.
#[derive(Clone, Serialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    url: String,
}

impl ProxyEndpoint {
    /// Build an endpoint, trimming fields and validating them
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let host = host.trim();
        let username = username.trim();
        let password = password.trim();

        if host.is_empty() {
            return Err(RelayError::InvalidConfig("proxy host is empty".into()));
        }
        if username.is_empty() {
            return Err(RelayError::InvalidConfig(format!(
                "proxy {}:{} has an empty username",
                host, port
            )));
        }
        if port == 0 {
            return Err(RelayError::InvalidConfig(format!(
                "proxy {} has port 0",
                host
            )));
        }

        // IPv6 literals need brackets in the authority
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };
        let mut url = Url::parse(&format!("http://{}:{}", authority, port))?;
        url.set_username(username).map_err(|_| {
            RelayError::InvalidConfig(format!("proxy {} cannot carry credentials", host))
        })?;
        let secret = (!password.is_empty()).then_some(password);
        url.set_password(secret).map_err(|_| {
            RelayError::InvalidConfig(format!("proxy {} cannot carry credentials", host))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            url: url.to_string(),
        })
    }

    pub fn id(&self) -> ProxyId {
        ProxyId {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }

    /// Whether this endpoint has the given identity
    pub fn has_id(&self, id: &ProxyId) -> bool {
        self.host == id.host && self.port == id.port && self.username == id.username
    }

    /// Proxy URL with percent-encoded credentials, suitable for an HTTP client
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PartialEq for ProxyEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.has_id(&other.id())
    }
}

impl Eq for ProxyEndpoint {}

impl Hash for ProxyEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.username.hash(state);
    }
}

// Never print the password
impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Mutable per-proxy usage bookkeeping, owned by the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyUsageState {
    pub last_used_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub consecutive_failures: u32,
}

impl ProxyUsageState {
    /// Earliest instant the proxy may serve another request
    ///
    /// `None` means it has never been used nor cooled down.
    pub fn ready_at(&self, min_interval: Duration) -> Option<Instant> {
        let spacing = self.last_used_at.map(|t| t + min_interval);
        match (spacing, self.cooldown_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_ready(&self, now: Instant, min_interval: Duration) -> bool {
        self.ready_at(min_interval).map_or(true, |t| t <= now)
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|t| t > now)
    }
}

/// Per-proxy view for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatusView {
    pub proxy: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub last_used_secs_ago: Option<f64>,
    pub cooldown_remaining_ms: Option<u64>,
    pub cooling_down: bool,
    pub consecutive_failures: u32,
    pub available: bool,
}

impl ProxyStatusView {
    pub fn new(
        endpoint: &ProxyEndpoint,
        state: &ProxyUsageState,
        now: Instant,
        min_interval: Duration,
    ) -> Self {
        Self {
            proxy: endpoint.to_string(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            username: endpoint.username.clone(),
            last_used_secs_ago: state
                .last_used_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            cooldown_remaining_ms: state
                .cooldown_until
                .filter(|t| *t > now)
                .map(|t| t.duration_since(now).as_millis() as u64),
            cooling_down: state.in_cooldown(now),
            consecutive_failures: state.consecutive_failures,
            available: state.is_ready(now, min_interval),
        }
    }
}
