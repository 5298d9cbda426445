//! HTTP API Module
//!
//! Client-facing REST API for file reads, uploads and cluster status.

mod http;

pub use http::{AppState, HttpServer};
