//! Transcript service
//!
//! Validates requests, runs the fetch either directly or through the retry
//! orchestrator, and renders the result.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{Egress, LanguagePreferences, OutputFormat, TranscriptFetcher};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::models::TranscriptResponse;
use crate::proxy::health::HealthProbe;
use crate::proxy::pool::ProxyPool;
use crate::proxy::retry::{AttemptFailure, RetryOrchestrator, RetryPolicy};

const MAX_VIDEO_ID_LEN: usize = 64;

/// How fetches reach the upstream
#[derive(Debug, Clone)]
pub enum FetchMode {
    /// One attempt without a proxy
    Direct,
    /// Rotating attempts through the proxy pool
    Pooled(RetryOrchestrator),
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Direct => "direct",
            FetchMode::Pooled(_) => "pool",
        }
    }
}

pub struct TranscriptService {
    fetcher: Arc<dyn TranscriptFetcher>,
    mode: FetchMode,
    default_language: String,
}

impl TranscriptService {
    pub fn new(fetcher: Arc<dyn TranscriptFetcher>, mode: FetchMode, default_language: &str) -> Self {
        Self {
            fetcher,
            mode,
            default_language: default_language.to_string(),
        }
    }

    /// Build the service, loading and vetting the proxy pool when enabled
    pub async fn from_config(config: &Config, fetcher: Arc<dyn TranscriptFetcher>) -> Result<Self> {
        let language = &config.fetch.default_language;

        if !config.proxy.enabled {
            warn!("Proxy pool disabled, fetching transcripts directly");
            return Ok(Self::new(fetcher, FetchMode::Direct, language));
        }

        let mut pool = ProxyPool::load_from(&config.proxy)?;
        info!("Configured {} upstream proxies", pool.pool_size());

        if config.healthcheck.enabled {
            let probe = HealthProbe::new((&config.healthcheck).into());
            let healthy = probe.vet_all(pool.all()).await?;
            pool = ProxyPool::new(healthy, config.proxy.min_interval);
        }
        let pool = Arc::new(pool);
        info!("Proxy pool ready with {} proxies", pool.pool_size());

        let orchestrator = RetryOrchestrator::new(pool, RetryPolicy::from(&config.retry));
        Ok(Self::new(fetcher, FetchMode::Pooled(orchestrator), language))
    }

    pub fn mode(&self) -> &FetchMode {
        &self.mode
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        match &self.mode {
            FetchMode::Direct => None,
            FetchMode::Pooled(orchestrator) => Some(orchestrator.pool()),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.fetcher.source_name()
    }

    /// Fetch and render the transcript of `video_id`
    ///
    /// `strict` disables the translation/substitution fallback.
    #[instrument(skip(self), fields(mode = self.mode.as_str()))]
    pub async fn transcript(
        &self,
        video_id: &str,
        language: Option<&str>,
        format: OutputFormat,
        strict: bool,
    ) -> Result<TranscriptResponse> {
        validate_video_id(video_id)?;
        let preferences = LanguagePreferences::new(language, &self.default_language, !strict);

        let transcript = match &self.mode {
            FetchMode::Direct => {
                self.fetcher
                    .fetch(video_id, &preferences, &Egress::Direct)
                    .await?
            }
            FetchMode::Pooled(orchestrator) => {
                let fetcher = self.fetcher.clone();
                let video_id = video_id.to_string();
                orchestrator
                    .execute(move |proxy| {
                        let fetcher = fetcher.clone();
                        let video_id = video_id.clone();
                        let preferences = preferences.clone();
                        async move {
                            fetcher
                                .fetch(&video_id, &preferences, &Egress::Proxy(proxy))
                                .await
                                .map_err(AttemptFailure::from)
                        }
                    })
                    .await?
            }
        };

        info!(
            "Fetched {} snippets in {}",
            transcript.snippets.len(),
            transcript.language_code
        );

        Ok(TranscriptResponse {
            text: format.render(&transcript.snippets),
            source: self.source_name(),
            language: transcript.language,
            language_code: transcript.language_code,
            is_generated: transcript.is_generated,
            video_id: transcript.video_id,
            format: format.as_str(),
            translated_from: transcript.translated_from,
        })
    }
}

/// Video ids are short URL-safe tokens
pub fn validate_video_id(video_id: &str) -> Result<()> {
    let valid = !video_id.is_empty()
        && video_id.len() <= MAX_VIDEO_ID_LEN
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidRequest(format!(
            "invalid video id: {:?}",
            video_id
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ProxyEndpoint, Transcript, TranscriptSnippet};
    use crate::transcript::FetchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fetcher whose outcome depends on the egress host
    pub(crate) struct FakeFetcher {
        pub calls: Mutex<Vec<Option<String>>>,
        pub script: fn(Option<&str>, &LanguagePreferences) -> std::result::Result<(), FetchError>,
    }

    impl FakeFetcher {
        pub(crate) fn new(
            script: fn(Option<&str>, &LanguagePreferences) -> std::result::Result<(), FetchError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script,
            })
        }
    }

    #[async_trait]
    impl TranscriptFetcher for FakeFetcher {
        async fn fetch(
            &self,
            video_id: &str,
            preferences: &LanguagePreferences,
            egress: &Egress,
        ) -> std::result::Result<Transcript, FetchError> {
            let host = egress.proxy().map(|p| p.host.clone());
            self.calls.lock().push(host.clone());
            (self.script)(host.as_deref(), preferences)?;

            Ok(Transcript {
                video_id: video_id.to_string(),
                language: "English".to_string(),
                language_code: preferences.languages[0].clone(),
                is_generated: false,
                translated_from: None,
                snippets: vec![
                    TranscriptSnippet {
                        text: "Hello".to_string(),
                        start: 0.0,
                        duration: 1.0,
                    },
                    TranscriptSnippet {
                        text: "again".to_string(),
                        start: 75.0,
                        duration: 1.0,
                    },
                ],
            })
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    fn pooled(fetcher: Arc<FakeFetcher>, hosts: &[&str]) -> TranscriptService {
        let endpoints = hosts
            .iter()
            .map(|h| ProxyEndpoint::new(h, 8080, "user", "pw").unwrap())
            .collect();
        let pool = Arc::new(ProxyPool::new(endpoints, Duration::ZERO));
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        TranscriptService::new(
            fetcher,
            FetchMode::Pooled(RetryOrchestrator::new(pool, policy)),
            "en",
        )
    }

    #[test]
    fn test_validate_video_id() {
        assert!(validate_video_id("dQw4w9WgXcQ").is_ok());
        assert!(validate_video_id("a-b_c").is_ok());
        assert!(validate_video_id("").is_err());
        assert!(validate_video_id("../etc/passwd").is_err());
        assert!(validate_video_id(&"a".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_direct_mode_single_attempt() {
        let fetcher = FakeFetcher::new(|_, _| Ok(()));
        let service = TranscriptService::new(fetcher.clone(), FetchMode::Direct, "en");

        let response = service
            .transcript("abc", None, OutputFormat::Text, false)
            .await
            .unwrap();
        assert_eq!(response.text, "0:00 - Hello\n1:15 - again");
        assert_eq!(response.source, "fake");
        assert_eq!(response.format, "text");
        assert_eq!(*fetcher.calls.lock(), vec![None]);
        assert!(service.pool().is_none());
    }

    #[tokio::test]
    async fn test_direct_mode_maps_errors_without_retry() {
        let fetcher = FakeFetcher::new(|_, _| Err(FetchError::RateLimited("429".into())));
        let service = TranscriptService::new(fetcher.clone(), FetchMode::Direct, "en");

        let err = service
            .transcript("abc", None, OutputFormat::Text, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RateLimited { attempts: 1, .. }));
        assert_eq!(fetcher.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pooled_mode_rotates_past_blocked_proxy() {
        let fetcher = FakeFetcher::new(|host, _| match host {
            Some("blocked") => Err(FetchError::RateLimited("429".into())),
            _ => Ok(()),
        });
        let service = pooled(fetcher.clone(), &["blocked", "good"]);

        let response = service
            .transcript("abc", Some("de"), OutputFormat::Srt, false)
            .await
            .unwrap();
        assert_eq!(response.language_code, "de");
        assert!(response.text.starts_with("1\n00:00:00,000 --> 00:00:01,000"));
        assert_eq!(
            fetcher.calls.lock().last().cloned().flatten().as_deref(),
            Some("good")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_request_disables_fallback() {
        let fetcher = FakeFetcher::new(|_, prefs| {
            if prefs.allow_fallback {
                Ok(())
            } else {
                Err(FetchError::LanguageUnavailable("no de".into()))
            }
        });
        let service = pooled(fetcher.clone(), &["a", "b"]);

        let err = service
            .transcript("abc", Some("de"), OutputFormat::Text, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::LanguageUnavailable(_)));
        // Permanent failures are not retried
        assert_eq!(fetcher.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_video_id_makes_no_attempt() {
        let fetcher = FakeFetcher::new(|_, _| Ok(()));
        let service = pooled(fetcher.clone(), &["a"]);

        let err = service
            .transcript("bad id!", None, OutputFormat::Text, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
        assert!(fetcher.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_direct_when_disabled() {
        let fetcher = FakeFetcher::new(|_, _| Ok(()));
        let service = TranscriptService::from_config(&Config::default(), fetcher)
            .await
            .unwrap();
        assert_eq!(service.mode().as_str(), "direct");
    }

    #[tokio::test]
    async fn test_from_config_builds_pool_without_probe() {
        let mut config = Config::default();
        config.proxy.enabled = true;
        config.proxy.hosts = vec!["p1".into(), "p2".into()];
        config.proxy.ports = vec!["8080".into(), "8081".into()];
        config.proxy.usernames = vec!["u".into(), "u".into()];
        config.proxy.password = "pw".into();
        config.healthcheck.enabled = false;

        let fetcher = FakeFetcher::new(|_, _| Ok(()));
        let service = TranscriptService::from_config(&config, fetcher).await.unwrap();
        assert_eq!(service.mode().as_str(), "pool");
        assert_eq!(service.pool().map(|p| p.pool_size()), Some(2));
    }
}
