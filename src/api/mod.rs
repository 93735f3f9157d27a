//! HTTP API Module
//!
//! Provides a status API for monitoring a node.

mod http;

pub use http::{AppState, HealthResponse, HttpServer, StatusResponse};
