//! YouTube caption adapter
//!
//! Loads the watch page, reads the caption track list embedded in the
//! player response, picks a track for the requested languages and downloads
//! its timed-text XML. Every failure is classified into a [`FetchError`] from
//! the HTTP status or page structure, never from error message text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use reqwest::header::{ACCEPT_LANGUAGE, COOKIE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{Egress, FetchError, LanguagePreferences, TranscriptFetcher};
use crate::models::{ProxyEndpoint, ProxyId, Transcript, TranscriptSnippet};

const DEFAULT_BASE_URL: &str = "https://www.youtube.com";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
// Skips the EU consent interstitial
const CONSENT_COOKIE: &str = "CONSENT=YES+cb";

static PLAYABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""playabilityStatus"\s*:\s*\{\s*"status"\s*:\s*"([A-Z_]+)""#).unwrap()
});
static TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<text\s+start="([^"]*)"(?:\s+dur="([^"]*)")?[^>]*>(.*?)</text>"#).unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// One caption track advertised by the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub base_url: String,
    pub name: String,
    pub language_code: String,
    pub is_generated: bool,
    pub is_translatable: bool,
}

/// Caption tracks plus the languages they can be translated into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionCatalog {
    pub tracks: Vec<CaptionTrack>,
    /// `(language_code, language_name)` pairs
    pub translation_languages: Vec<(String, String)>,
}

impl CaptionCatalog {
    fn translation_name(&self, code: &str) -> String {
        self.translation_languages
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| code.to_string())
    }
}

/// Track picked for a request, with an optional translation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackChoice<'a> {
    pub track: &'a CaptionTrack,
    pub translate_to: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCaptions {
    player_captions_tracklist_renderer: Option<RawTracklist>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTracklist {
    #[serde(default)]
    caption_tracks: Vec<RawTrack>,
    #[serde(default)]
    translation_languages: Vec<RawTranslationLanguage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrack {
    base_url: String,
    name: Option<RawText>,
    language_code: String,
    kind: Option<String>,
    #[serde(default)]
    is_translatable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranslationLanguage {
    language_code: String,
    language_name: Option<RawText>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawText {
    simple_text: Option<String>,
    #[serde(default)]
    runs: Vec<RawRun>,
}

#[derive(Deserialize)]
struct RawRun {
    text: String,
}

impl RawText {
    fn into_string(self) -> Option<String> {
        self.simple_text
            .or_else(|| self.runs.into_iter().next().map(|run| run.text))
    }
}

/// Extract the caption catalog from a watch page
pub fn parse_caption_catalog(html: &str) -> Result<CaptionCatalog, FetchError> {
    if html.contains("class=\"g-recaptcha\"") {
        return Err(FetchError::RateLimited(
            "upstream answered with a captcha page".into(),
        ));
    }

    let Some((_, rest)) = html.split_once("\"captions\":") else {
        return Err(match PLAYABILITY_RE.captures(html) {
            Some(caps) if &caps[1] != "OK" => {
                FetchError::NotFound(format!("video is unavailable ({})", &caps[1]))
            }
            Some(_) => FetchError::NotFound("transcripts are disabled for this video".into()),
            None => FetchError::Unknown("watch page has no player response".into()),
        });
    };

    let raw: RawCaptions = serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .next()
        .and_then(|value| value.ok())
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(|| FetchError::Unknown("caption metadata is not valid JSON".into()))?;

    let tracklist = raw
        .player_captions_tracklist_renderer
        .filter(|list| !list.caption_tracks.is_empty())
        .ok_or_else(|| FetchError::NotFound("transcripts are disabled for this video".into()))?;

    let tracks = tracklist
        .caption_tracks
        .into_iter()
        .map(|raw| CaptionTrack {
            name: raw
                .name
                .and_then(RawText::into_string)
                .unwrap_or_else(|| raw.language_code.clone()),
            is_generated: raw.kind.as_deref() == Some("asr"),
            base_url: raw.base_url,
            language_code: raw.language_code,
            is_translatable: raw.is_translatable,
        })
        .collect();

    let translation_languages = tracklist
        .translation_languages
        .into_iter()
        .map(|raw| {
            let name = raw
                .language_name
                .and_then(RawText::into_string)
                .unwrap_or_else(|| raw.language_code.clone());
            (raw.language_code, name)
        })
        .collect();

    Ok(CaptionCatalog {
        tracks,
        translation_languages,
    })
}

/// Pick a track for the preferences
///
/// A direct match in preference order wins, manual tracks before generated
/// ones. With fallback allowed, the first track is used instead, translated
/// into the primary language when the track supports it.
pub fn choose_track<'a>(
    tracks: &'a [CaptionTrack],
    preferences: &LanguagePreferences,
) -> Result<TrackChoice<'a>, FetchError> {
    for lang in &preferences.languages {
        let direct = tracks
            .iter()
            .find(|t| !t.is_generated && &t.language_code == lang)
            .or_else(|| tracks.iter().find(|t| &t.language_code == lang));
        if let Some(track) = direct {
            return Ok(TrackChoice {
                track,
                translate_to: None,
            });
        }
    }

    let available = || {
        tracks
            .iter()
            .map(|t| t.language_code.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    if !preferences.allow_fallback {
        return Err(FetchError::LanguageUnavailable(format!(
            "no transcript in [{}]; available: [{}]",
            preferences.languages.join(", "),
            available()
        )));
    }

    let Some(first) = tracks.first() else {
        return Err(FetchError::LanguageUnavailable(
            "no transcripts available for this video".into(),
        ));
    };

    let translate_to = preferences
        .primary()
        .filter(|lang| first.is_translatable && *lang != first.language_code)
        .map(str::to_string);

    Ok(TrackChoice {
        track: first,
        translate_to,
    })
}

/// Parse timed-text XML into snippets, skipping empty lines
pub fn parse_timed_text(xml: &str) -> Vec<TranscriptSnippet> {
    TEXT_RE
        .captures_iter(xml)
        .filter_map(|caps| {
            let start = caps[1].parse::<f64>().ok()?;
            let duration = caps
                .get(2)
                .and_then(|d| d.as_str().parse::<f64>().ok())
                .unwrap_or(0.0);
            // Captions are frequently double-escaped
            let text = unescape_html(&unescape_html(&caps[3]));
            let text = TAG_RE.replace_all(&text, "").trim().to_string();
            (!text.is_empty()).then_some(TranscriptSnippet {
                text,
                start,
                duration,
            })
        })
        .collect()
}

fn unescape_html(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Map a non-success HTTP status to a fetch error
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited("upstream returned 429".into()),
        StatusCode::FORBIDDEN => FetchError::RateLimited("upstream blocked the request (403)".into()),
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            FetchError::NotFound(format!("upstream returned {}", status.as_u16()))
        }
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
            FetchError::Transport("proxy rejected credentials (407)".into())
        }
        s if s.is_server_error() => FetchError::Transport(format!("upstream returned {}", s.as_u16())),
        s => FetchError::Unknown(format!("upstream returned {}", s.as_u16())),
    })
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::Unknown(format!("response decoding failed: {}", err))
    } else if err.is_timeout() {
        FetchError::Transport("request timed out".into())
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// Caption fetcher backed by YouTube's public watch page
pub struct YoutubeFetcher {
    base_url: String,
    timeout: Duration,
    clients: DashMap<Option<ProxyId>, Client>,
}

impl YoutubeFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    /// Point the fetcher at another origin
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            clients: DashMap::new(),
        }
    }

    /// HTTP client for an egress, built once per proxy identity
    fn client_for(&self, egress: &Egress) -> Result<Client, FetchError> {
        let key = egress.proxy().map(ProxyEndpoint::id);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        if let Some(endpoint) = egress.proxy() {
            let proxy = reqwest::Proxy::all(endpoint.url())
                .map_err(|e| FetchError::Unknown(format!("invalid proxy url: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Unknown(format!("client build failed: {}", e)))?;

        self.clients.insert(key, client.clone());
        Ok(client)
    }

    fn watch_url(&self, video_id: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/watch", self.base_url))
            .map_err(|e| FetchError::Unknown(format!("invalid base url: {}", e)))?;
        url.query_pairs_mut().append_pair("v", video_id);
        Ok(url)
    }

    fn timed_text_url(&self, choice: &TrackChoice<'_>) -> Result<Url, FetchError> {
        let base = Url::parse(&self.base_url)
            .and_then(|base| base.join(&choice.track.base_url))
            .map_err(|e| FetchError::Unknown(format!("invalid caption url: {}", e)))?;

        // srv3 switches to a different XML dialect
        let pairs: Vec<(String, String)> = base
            .query_pairs()
            .filter(|(key, _)| key != "fmt" && key != "tlang")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut url = base;
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &pairs {
                query.append_pair(key, value);
            }
            if let Some(lang) = &choice.translate_to {
                query.append_pair("tlang", lang);
            }
        }
        Ok(url)
    }

    async fn get_text(&self, client: &Client, url: Url) -> Result<String, FetchError> {
        let response = client
            .get(url)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(COOKIE, CONSENT_COOKIE)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        response.text().await.map_err(classify_reqwest_error)
    }
}

#[async_trait]
impl TranscriptFetcher for YoutubeFetcher {
    #[instrument(skip(self, preferences, egress), fields(via = ?egress.proxy().map(|p| p.to_string())))]
    async fn fetch(
        &self,
        video_id: &str,
        preferences: &LanguagePreferences,
        egress: &Egress,
    ) -> Result<Transcript, FetchError> {
        let client = self.client_for(egress)?;

        let html = self.get_text(&client, self.watch_url(video_id)?).await?;
        let catalog = parse_caption_catalog(&html)?;
        let choice = choose_track(&catalog.tracks, preferences)?;
        debug!(
            "Using {} track{}",
            choice.track.language_code,
            choice
                .translate_to
                .as_deref()
                .map(|l| format!(" translated to {}", l))
                .unwrap_or_default()
        );

        let xml = self.get_text(&client, self.timed_text_url(&choice)?).await?;
        let snippets = parse_timed_text(&xml);
        if snippets.is_empty() && !xml.contains("<text") {
            return Err(FetchError::Unknown("caption response had no text".into()));
        }

        let (language, language_code, translated_from) = match &choice.translate_to {
            Some(target) => (
                catalog.translation_name(target),
                target.clone(),
                Some(choice.track.language_code.clone()),
            ),
            None => (
                choice.track.name.clone(),
                choice.track.language_code.clone(),
                None,
            ),
        };

        Ok(Transcript {
            video_id: video_id.to_string(),
            language,
            language_code,
            is_generated: choice.track.is_generated,
            translated_from,
            snippets,
        })
    }

    fn source_name(&self) -> &'static str {
        "youtube_transcript_api"
    }
}
