//!
//! Error handling for the MistralMux translating proxy server.
//!
//! Defines all error types used throughout the application using thiserror
//! for ergonomic error handling. Each variant maps to a specific failure
//! class with its own HTTP status and wire shape (see server::error_response).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error types covering every failure class of the proxy.
///
/// Validation and auth errors are produced before any upstream call; backend
/// errors carry the upstream status and a capped body preview; translation
/// errors surface mid-stream as SSE error events.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Backend error ({status}): {preview}")]
    Backend {
        /** upstream HTTP status code */
        status: u16,
        /** upstream body text, capped at 500 characters */
        preview: String,
    },

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

/* --- start of code -------------------------------------------------------------------------- */

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    ///
    /// Build a backend error from an upstream status and raw body text.
    ///
    /// The body is truncated to 500 characters so that oversized upstream
    /// error pages never balloon log records or client messages.
    ///
    /// # Arguments
    ///  * `status` - upstream HTTP status code
    ///  * `body` - upstream response body text
    ///
    /// # Returns
    ///  * `ProxyError::Backend` with the capped preview
    pub fn backend(status: u16, body: &str) -> Self {
        let preview: String = body.chars().take(500).collect();
        ProxyError::Backend { status, preview }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_preview_is_capped() {
        let long = "x".repeat(2000);
        let err = ProxyError::backend(502, &long);
        match err {
            ProxyError::Backend { status, preview } => {
                assert_eq!(status, 502);
                assert_eq!(preview.len(), 500);
            }
            _ => panic!("expected Backend variant"),
        }
    }

    #[test]
    fn test_backend_preview_respects_char_boundaries() {
        let body = "é".repeat(600);
        let err = ProxyError::backend(500, &body);
        match err {
            ProxyError::Backend { preview, .. } => {
                assert_eq!(preview.chars().count(), 500);
            }
            _ => panic!("expected Backend variant"),
        }
    }
}
