//! HTTP API
//!
//! Health, status and transcript endpoints over Axum.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
