//! Transcript Relay - transcript service over a rotating proxy pool
//!
//! Fetches video transcripts from an upstream that rate-limits by client
//! address, spreading requests over a pool of authenticated proxies.
//!
//! ## Features
//!
//! - Least-recently-used proxy selection with per-proxy spacing
//! - Cooldowns for rate-limited proxies
//! - Bounded retries with exponential backoff across distinct proxies
//! - Startup health probing of the configured pool
//! - Text, SRT and WebVTT output

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod transcript;

pub use config::Config;
pub use error::{RelayError, Result};
