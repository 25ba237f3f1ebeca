//!
//! Configuration management for the MistralMux translating proxy server.
//!
//! Handles loading configuration from environment variables with sensible defaults.
//! The proxy is configured entirely through the environment: the gateway key,
//! the default vLLM backend, and an optional vision backend for image-bearing
//! requests.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;

use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application configuration structure.
///
/// Contains all runtime configuration options loaded from environment variables.
/// Provides methods for loading and validating configuration settings.
#[derive(Debug, Clone)]
pub struct Config {
    /** interface the HTTP server binds to */
    pub host: String,
    /** HTTP server port number */
    pub port: u16,
    /** gateway API key clients must present; None disables the gate (development) */
    pub api_key: Option<String>,
    /** default inference backend (vLLM, OpenAI-compatible) */
    pub backend: BackendConfig,
    /** optional vision backend for image-bearing requests */
    pub vision: Option<BackendConfig>,
    /** telemetry collection settings */
    pub telemetry: TelemetryConfig,
    /** application logging level */
    pub log_level: LogLevel,
}

///
/// A single upstream inference backend.
///
/// Exposes an OpenAI-compatible `/v1/chat/completions` endpoint. The URL is
/// stored without a trailing slash so endpoint paths can be appended directly.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /** base URL of the backend, e.g. http://vllm.ml.svc.cluster.local:8000 */
    pub url: String,
    /** API key for the backend, if it requires one */
    pub api_key: Option<String>,
    /** model identifier served by this backend */
    pub model: String,
}

///
/// Telemetry collection settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /** whether the in-memory usage ring buffer is populated */
    pub enabled: bool,
    /** optional external endpoint each usage record is POSTed to */
    pub endpoint: Option<String>,
}

///
/// Logging level enumeration.
///
/// Defines available log levels with helper methods for level checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

///
/// Configuration validation issue.
///
/// Represents a single validation problem found during configuration check.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Configuration field name
    pub field: String,
    /// Severity of the issue
    pub severity: ValidationSeverity,
    /// Description of the issue
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

///
/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid and will cause failures
    Error,
    /// Warning - configuration may work but has potential issues
    Warning,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Default HTTP server port */
const DEFAULT_PORT: u16 = 3456;

/** Default bind address */
const DEFAULT_HOST: &str = "0.0.0.0";

/** Model name reported when VLLM_MODEL is not set */
const DEFAULT_MODEL: &str = "devstral";

/* --- start of code -------------------------------------------------------------------------- */

impl LogLevel {
    ///
    /// Check if trace-level logging is enabled.
    ///
    /// Returns true for Trace and Debug levels, which enable detailed logging
    /// of translation steps and tool-call handling.
    ///
    /// # Returns
    ///  * `true` if trace logging should be enabled
    ///  * `false` otherwise
    pub fn is_trace_enabled(self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }

    ///
    /// Convert to a tracing::Level for subscriber setup.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    ///
    /// Convert string representation to LogLevel enum.
    ///
    /// Case-insensitive conversion with Info as the default fallback.
    ///
    /// # Arguments
    ///  * `s` - string representation of log level
    ///
    /// # Returns
    ///  * Corresponding LogLevel enum value
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl BackendConfig {
    ///
    /// Build the chat completions URL for this backend.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.url)
    }

    ///
    /// Build the legacy completions URL for this backend.
    pub fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.url)
    }

    ///
    /// Build the models listing URL for this backend (startup probe).
    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.url)
    }
}

impl Config {
    ///
    /// Load configuration from environment variables.
    ///
    /// Reads configuration from environment variables with sensible defaults.
    /// Only `VLLM_URL` is required; the vision backend is configured only when
    /// `VISION_URL` is present.
    ///
    /// # Returns
    ///  * Configuration object with all settings loaded
    ///  * `ProxyError::Config` if required variables are missing or invalid
    pub fn from_env() -> Result<Self> {
        let backend = BackendConfig {
            url: Self::get_backend_url()?,
            api_key: env_opt("VLLM_API_KEY"),
            model: env::var("VLLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        let vision = env_opt("VISION_URL").map(|url| BackendConfig {
            url: url.trim_end_matches('/').to_string(),
            api_key: env_opt("VISION_API_KEY"),
            model: env::var("VISION_MODEL").unwrap_or_else(|_| backend.model.clone()),
        });

        let telemetry = TelemetryConfig {
            enabled: env::var("TELEMETRY_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
            endpoint: env_opt("TELEMETRY_ENDPOINT"),
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: Self::get_port()?,
            api_key: env_opt("API_KEY"),
            backend,
            vision,
            telemetry,
            log_level: Self::get_log_level(),
        })
    }

    ///
    /// Get the default backend base URL from environment.
    ///
    /// # Returns
    ///  * Backend base URL string without trailing slash
    ///  * `ProxyError::Config` if VLLM_URL is not set
    fn get_backend_url() -> Result<String> {
        let url = env::var("VLLM_URL").map_err(|_| {
            ProxyError::Config(
                "VLLM_URL environment variable is not set.\n\
                 \n\
                 To fix this:\n\
                   1. Point VLLM_URL at your OpenAI-compatible inference server\n\
                   2. Set the environment variable:\n\
                      export VLLM_URL=\"http://localhost:8000\"\n\
                   3. Or add it to a .env file:\n\
                      VLLM_URL=\"http://localhost:8000\""
                    .to_string(),
            )
        })?;
        Ok(url.trim().trim_end_matches('/').to_string())
    }

    ///
    /// Get the server port from environment or use default.
    ///
    /// # Returns
    ///  * Port number as u16
    ///  * `ProxyError::Config` if port value is invalid
    fn get_port() -> Result<u16> {
        env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string()).parse::<u16>().map_err(|e| {
            ProxyError::Config(format!(
                "Invalid PORT value: {}\n\
                 \n\
                 PORT must be a number between 1 and 65535.\n\
                    Example: export PORT=3456",
                e
            ))
        })
    }

    ///
    /// Get the log level from environment or use default.
    ///
    /// # Returns
    ///  * LogLevel enum value
    fn get_log_level() -> LogLevel {
        let log_level_str = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        LogLevel::from(log_level_str.as_str())
    }

    ///
    /// Validate configuration and return detailed validation results.
    ///
    /// Checks all configuration values for correctness and provides helpful
    /// suggestions for any issues found.
    ///
    /// # Returns
    ///  * Vector of validation issues (empty if all valid)
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            issues.push(ValidationIssue {
                field: "VLLM_URL".to_string(),
                severity: ValidationSeverity::Error,
                message: format!("VLLM_URL is not an HTTP(S) URL: {}", self.backend.url),
                suggestion: Some("Use a full URL, e.g. http://localhost:8000".to_string()),
            });
        }

        if let Some(ref vision) = self.vision {
            if !vision.url.starts_with("http://") && !vision.url.starts_with("https://") {
                issues.push(ValidationIssue {
                    field: "VISION_URL".to_string(),
                    severity: ValidationSeverity::Error,
                    message: format!("VISION_URL is not an HTTP(S) URL: {}", vision.url),
                    suggestion: Some("Use a full URL, e.g. http://vision:8000".to_string()),
                });
            }
        }

        if self.port == 0 {
            issues.push(ValidationIssue {
                field: "PORT".to_string(),
                severity: ValidationSeverity::Error,
                message: "Port cannot be 0".to_string(),
                suggestion: Some("Use a valid port number between 1 and 65535".to_string()),
            });
        }

        if self.api_key.is_none() {
            issues.push(ValidationIssue {
                field: "API_KEY".to_string(),
                severity: ValidationSeverity::Warning,
                message: "No gateway API key configured; all clients are accepted".to_string(),
                suggestion: Some("Set API_KEY to require authentication".to_string()),
            });
        }

        if self.telemetry.endpoint.is_some() && !self.telemetry.enabled {
            issues.push(ValidationIssue {
                field: "TELEMETRY_ENDPOINT".to_string(),
                severity: ValidationSeverity::Warning,
                message: "TELEMETRY_ENDPOINT is set but TELEMETRY_ENABLED is false".to_string(),
                suggestion: Some("Enable telemetry or remove the endpoint".to_string()),
            });
        }

        issues
    }
}

///
/// Read an environment variable, treating empty or whitespace values as unset.
///
/// # Arguments
///  * `name` - environment variable name
///
/// # Returns
///  * Some(trimmed value) when present and non-empty, None otherwise
fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_minimal_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("VLLM_URL", Some("http://localhost:8000/")),
                ("VLLM_MODEL", Some("devstral-small")),
                ("PORT", None::<&str>),
                ("HOST", None),
                ("API_KEY", None),
                ("VISION_URL", None),
                ("TELEMETRY_ENABLED", None),
                ("LOG_LEVEL", None),
            ],
            f,
        );
    }

    #[test]
    fn test_from_env_defaults() {
        with_minimal_env(|| {
            let config = Config::from_env().unwrap();
            assert_eq!(config.port, 3456);
            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.backend.url, "http://localhost:8000");
            assert_eq!(config.backend.model, "devstral-small");
            assert!(config.vision.is_none());
            assert!(config.api_key.is_none());
            assert!(config.telemetry.enabled);
            assert_eq!(config.log_level, LogLevel::Info);
        });
    }

    #[test]
    fn test_from_env_requires_backend_url() {
        temp_env::with_vars([("VLLM_URL", None::<&str>)], || {
            let result = Config::from_env();
            assert!(matches!(result, Err(ProxyError::Config(_))));
        });
    }

    #[test]
    fn test_vision_backend_inherits_model() {
        temp_env::with_vars(
            [
                ("VLLM_URL", Some("http://localhost:8000")),
                ("VLLM_MODEL", Some("devstral-small")),
                ("VISION_URL", Some("http://vision:8000/")),
                ("VISION_MODEL", None),
            ],
            || {
                let config = Config::from_env().unwrap();
                let vision = config.vision.expect("vision backend configured");
                assert_eq!(vision.url, "http://vision:8000");
                assert_eq!(vision.model, "devstral-small");
            },
        );
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        temp_env::with_vars(
            [("VLLM_URL", Some("http://localhost:8000")), ("PORT", Some("not-a-port"))],
            || {
                assert!(matches!(Config::from_env(), Err(ProxyError::Config(_))));
            },
        );
    }

    #[test]
    fn test_validate_flags_non_http_url() {
        with_minimal_env(|| {
            let mut config = Config::from_env().unwrap();
            config.backend.url = "localhost:8000".to_string();
            let issues = config.validate();
            assert!(
                issues
                    .iter()
                    .any(|i| i.field == "VLLM_URL" && i.severity == ValidationSeverity::Error)
            );
        });
    }

    #[test]
    fn test_backend_urls() {
        let backend = BackendConfig {
            url: "http://localhost:8000".to_string(),
            api_key: None,
            model: "devstral".to_string(),
        };
        assert_eq!(backend.chat_completions_url(), "http://localhost:8000/v1/chat/completions");
        assert_eq!(backend.models_url(), "http://localhost:8000/v1/models");
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("TRACE"), LogLevel::Trace);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("bogus"), LogLevel::Info);
        assert!(LogLevel::Debug.is_trace_enabled());
        assert!(!LogLevel::Info.is_trace_enabled());
    }
}
