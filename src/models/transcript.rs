use serde::Serialize;

/// One timed caption line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSnippet {
    pub text: String,
    /// Start offset in seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

/// A fetched transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub video_id: String,
    /// Human-readable language name, e.g. "English (auto-generated)"
    pub language: String,
    pub language_code: String,
    pub is_generated: bool,
    /// Set when the track was machine-translated into `language_code`
    pub translated_from: Option<String>,
    pub snippets: Vec<TranscriptSnippet>,
}

/// Body of a successful transcript response
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptResponse {
    pub text: String,
    pub source: &'static str,
    pub language: String,
    pub language_code: String,
    pub is_generated: bool,
    pub video_id: String,
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_from: Option<String>,
}
