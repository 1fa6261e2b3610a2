//! Transcript rendering

use std::fmt::Write as _;

use serde::Serialize;

use crate::models::TranscriptSnippet;

/// Output format of a rendered transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Srt,
    Vtt,
}

impl OutputFormat {
    /// Parse a case-insensitive format name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(OutputFormat::Text),
            "srt" => Some(OutputFormat::Srt),
            "vtt" | "webvtt" => Some(OutputFormat::Vtt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
        }
    }

    pub fn render(&self, snippets: &[TranscriptSnippet]) -> String {
        match self {
            OutputFormat::Text => format_text(snippets),
            OutputFormat::Srt => format_srt(snippets),
            OutputFormat::Vtt => format_vtt(snippets),
        }
    }
}

/// One `m:ss - text` line per snippet
pub fn format_text(snippets: &[TranscriptSnippet]) -> String {
    snippets
        .iter()
        .map(|s| {
            let seconds = s.start.max(0.0) as u64;
            format!("{}:{:02} - {}", seconds / 60, seconds % 60, s.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn format_srt(snippets: &[TranscriptSnippet]) -> String {
    let mut out = String::new();
    for (index, (start, end, text)) in cues(snippets).enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            timestamp(start, ','),
            timestamp(end, ','),
            text
        );
    }
    out.trim_end().to_string()
}

pub fn format_vtt(snippets: &[TranscriptSnippet]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for (start, end, text) in cues(snippets) {
        let _ = write!(
            out,
            "{} --> {}\n{}\n\n",
            timestamp(start, '.'),
            timestamp(end, '.'),
            text
        );
    }
    out.trim_end().to_string()
}

/// Cue timings; a cue never overlaps the start of the next one
fn cues(snippets: &[TranscriptSnippet]) -> impl Iterator<Item = (f64, f64, &str)> {
    snippets.iter().enumerate().map(move |(i, s)| {
        let mut end = s.start + s.duration;
        if let Some(next) = snippets.get(i + 1) {
            if next.start < end {
                end = next.start;
            }
        }
        (s.start, end.max(s.start), s.text.as_str())
    })
}

fn timestamp(seconds: f64, separator: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!(
        "{:02}:{:02}:{:02}{}{:03}",
        hours, minutes, secs, separator, millis
    )
}
