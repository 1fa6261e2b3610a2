//! Transcript retrieval
//!
//! The fetch capability is abstracted behind [`TranscriptFetcher`]; the
//! service drives it either directly or through the proxy pool.

pub mod format;
pub mod service;
pub mod youtube;

pub use format::OutputFormat;
pub use service::TranscriptService;
pub use youtube::YoutubeFetcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ProxyEndpoint, Transcript};
use crate::proxy::retry::{AttemptFailure, FailureKind};

/// Network egress point for one fetch
#[derive(Debug, Clone)]
pub enum Egress {
    /// Connect straight to the upstream
    Direct,
    /// Route through an upstream proxy
    Proxy(ProxyEndpoint),
}

impl Egress {
    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        match self {
            Egress::Direct => None,
            Egress::Proxy(endpoint) => Some(endpoint),
        }
    }
}

/// Ordered language wishes for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePreferences {
    /// Preferred language codes, most wanted first
    pub languages: Vec<String>,
    /// Allow translating or substituting another track when nothing matches
    pub allow_fallback: bool,
}

impl LanguagePreferences {
    /// `[requested, default]`, deduplicated; just `[default]` without a request
    pub fn new(requested: Option<&str>, default_language: &str, allow_fallback: bool) -> Self {
        let mut languages = Vec::with_capacity(2);
        if let Some(lang) = requested.map(str::trim).filter(|l| !l.is_empty()) {
            languages.push(lang.to_string());
        }
        if !languages.iter().any(|l| l == default_language) {
            languages.push(default_language.to_string());
        }
        Self {
            languages,
            allow_fallback,
        }
    }

    /// The language the caller actually asked for
    pub fn primary(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }
}

/// Classified failure of one fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("language unavailable: {0}")]
    LanguageUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected upstream response: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::LanguageUnavailable(_) => FailureKind::LanguageUnavailable,
            FetchError::RateLimited(_) => FailureKind::RateLimited,
            FetchError::Transport(_) => FailureKind::ConnectionError,
            FetchError::Unknown(_) => FailureKind::Other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::NotFound(m)
            | FetchError::LanguageUnavailable(m)
            | FetchError::RateLimited(m)
            | FetchError::Transport(m)
            | FetchError::Unknown(m) => m,
        }
    }
}

impl From<FetchError> for AttemptFailure {
    fn from(err: FetchError) -> Self {
        AttemptFailure::new(err.kind(), err.message())
    }
}

/// External transcript capability
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    /// Fetch captions for `video_id` through `egress`
    async fn fetch(
        &self,
        video_id: &str,
        preferences: &LanguagePreferences,
        egress: &Egress,
    ) -> Result<Transcript, FetchError>;

    /// Name reported as the `source` of responses
    fn source_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_preferences_append_default() {
        let prefs = LanguagePreferences::new(Some("de"), "en", true);
        assert_eq!(prefs.languages, vec!["de", "en"]);
        assert_eq!(prefs.primary(), Some("de"));

        let prefs = LanguagePreferences::new(Some("en"), "en", true);
        assert_eq!(prefs.languages, vec!["en"]);

        let prefs = LanguagePreferences::new(None, "en", false);
        assert_eq!(prefs.languages, vec!["en"]);

        let prefs = LanguagePreferences::new(Some("  "), "en", true);
        assert_eq!(prefs.languages, vec!["en"]);
    }

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::RateLimited("429".into()).kind().is_transient());
        assert!(FetchError::Transport("reset".into()).kind().is_transient());
        assert!(!FetchError::NotFound("gone".into()).kind().is_transient());
        assert!(!FetchError::LanguageUnavailable("fr".into()).kind().is_transient());
        assert_eq!(FetchError::Unknown("?".into()).kind(), FailureKind::Other);

        let failure: AttemptFailure = FetchError::Transport("reset".into()).into();
        assert_eq!(failure.kind, FailureKind::ConnectionError);
        assert_eq!(failure.message, "reset");
    }
}
