//! # MistralMux - Anthropic/OpenAI to Mistral Backend Proxy Library
//!
//! This crate provides a protocol-translating reverse proxy that sits between
//! AI coding clients (speaking the Anthropic Messages API or the OpenAI Chat
//! Completions API) and an OpenAI-compatible inference server running a
//! Mistral-family model (Devstral, Codestral). While primarily designed as a
//! binary application, this library exposes its core functionality for
//! programmatic use.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use mistralmux::{Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration from the environment
//!     let config = Config::from_env()?;
//!
//!     // Create the application
//!     let app = create_app(config)?;
//!
//!     // Start server
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3456").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Environment-driven configuration (gateway key, backends, telemetry)
//! - [`types`] - Wire types for both API dialects
//! - [`converter`] - The translation pipeline: requests, responses, streams, tool calls
//! - [`backend`] - Backend client, auth composition, and vision backend selection
//! - [`auth`] - Gateway key validation and JWT-derived user labels
//! - [`metrics`] - Prometheus counters and histograms
//! - [`telemetry`] - Usage ring buffer behind the /stats endpoint
//! - [`tokens`] - BPE token counting
//! - [`server`] - HTTP route handlers and streaming plumbing
//! - [`error`] - Error types and handling

pub mod auth;
pub mod backend;
pub mod config;
pub mod converter;
pub mod error;
pub mod metrics;
pub mod server;
pub mod telemetry;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ValidationIssue, ValidationSeverity};
pub use error::ProxyError;

/// Creates a new MistralMux application with the given configuration.
///
/// This is a convenience function that sets up the full application stack
/// including routing and middleware.
///
/// # Arguments
///
/// * `config` - Application configuration
///
/// # Returns
///
/// Returns an Axum Router that can be served directly.
///
/// # Errors
///
/// Returns a `ProxyError` if state initialization fails.
///
/// # Examples
///
/// ```rust,no_run
/// use mistralmux::{Config, create_app};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env()?;
///     let app = create_app(config)?;
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3456").await?;
///     axum::serve(listener, app).await?;
///     Ok(())
/// }
/// ```
pub fn create_app(config: Config) -> Result<axum::Router, ProxyError> {
    use axum::Router;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let app_state = Arc::new(server::AppState::new(config)?);

    Ok(Router::new()
        .route("/v1/messages", post(server::messages))
        .route("/v1/messages/count_tokens", post(server::count_tokens))
        .route("/v1/chat/completions", post(server::chat_completions))
        .route("/v1/completions", post(server::completions))
        .route("/completions", post(server::completions))
        .route("/v1/models", get(server::models))
        .route("/health", get(server::health))
        .route("/stats", get(server::stats))
        .route("/metrics", get(server::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}
