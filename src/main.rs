//! # MistralMux - Anthropic/OpenAI to Mistral Backend Proxy Server
//!
//! A protocol-translating reverse proxy between AI coding clients and an
//! OpenAI-compatible inference server running a Mistral-family model
//! (Devstral, Codestral). Built with Rust for type safety, performance,
//! and reliability.
//!
//! ## Features
//!
//! - **Anthropic Messages API**: Drop-in `/v1/messages` endpoint with SSE streaming
//! - **OpenAI-compatible API**: `/v1/chat/completions` with Mistral compatibility fixes
//! - **Tool/Function Calling**: Normalized tool IDs and inline `[TOOL_CALLS]` recovery
//! - **Vision Routing**: Image-bearing requests go to a dedicated vision backend
//! - **Observability**: Prometheus metrics, usage telemetry, structured logging
//!
//! ## Quick Start
//!
//! ```bash
//! export VLLM_URL="http://localhost:8000"
//! export VLLM_MODEL="devstral-small"
//! mistralmux
//! ```
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.
//!
//! Authors: Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp
//!

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;

use tracing::{info, warn};

use mistralmux::backend::BackendClient;
use mistralmux::config::{Config, ValidationSeverity};
use mistralmux::create_app;
use mistralmux::error::{ProxyError, Result};

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point for the MistralMux proxy server.
///
/// Initializes logging, loads configuration from environment variables,
/// probes the configured backends, and starts the HTTP server with proper
/// routing and middleware.
#[tokio::main]
async fn main() {
    // .env is optional; real environment variables win
    if let Err(e) = dotenvy::dotenv() {
        if std::path::Path::new(".env").exists() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }

    if let Some(exit_code) = handle_cli_args() {
        std::process::exit(exit_code);
    }

    if let Err(e) = run().await {
        let error_msg = format!("{}", e);
        eprintln!("Error:");
        for line in error_msg.lines() {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    initialize_logging(&config);
    report_validation(&config)?;

    probe_backends(&config).await;

    let app = create_app(config.clone())?;
    start_server(&config, app).await
}

///
/// Handle command line arguments like --version and --help before config loading.
///
/// Returns Some(exit_code) if the program should exit, None to continue.
fn handle_cli_args() -> Option<i32> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return None;
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("mistralmux {}", VERSION);
            Some(0)
        }
        "--help" | "-h" => {
            print_help();
            Some(0)
        }
        "validate" => Some(run_validate()),
        _ => {
            eprintln!("Error: Unknown option: {}", args[1]);
            eprintln!();
            print_help();
            Some(1)
        }
    }
}

///
/// Print help information for the MistralMux CLI.
fn print_help() {
    println!("MistralMux v{}", VERSION);
    println!("Translating proxy between Anthropic/OpenAI clients and Mistral-family backends");
    println!();
    println!("USAGE:");
    println!("    mistralmux [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    validate            Validate configuration and exit");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print help information");
    println!("    -V, --version       Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    PORT                HTTP server port (default: 3456)");
    println!("    HOST                Bind address (default: 0.0.0.0)");
    println!("    API_KEY             Gateway API key clients must present (optional)");
    println!("    VLLM_URL            OpenAI-compatible backend base URL (required)");
    println!("    VLLM_API_KEY        Backend API key (optional)");
    println!("    VLLM_MODEL          Backend model identifier (default: devstral)");
    println!("    VISION_URL          Vision backend base URL (optional)");
    println!("    VISION_API_KEY      Vision backend API key (optional)");
    println!("    VISION_MODEL        Vision backend model (default: VLLM_MODEL)");
    println!("    TELEMETRY_ENABLED   Keep in-memory usage records (default: true)");
    println!("    TELEMETRY_ENDPOINT  Forward usage records to this URL (optional)");
    println!("    LOG_LEVEL           Log level: trace, debug, info, warn, error (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("    mistralmux                  Start the proxy server");
    println!("    mistralmux validate         Validate configuration and exit");
}

///
/// Run the validate command: load and validate configuration, then exit.
///
/// Returns exit code 0 if valid, 1 if invalid.
fn run_validate() -> i32 {
    match Config::from_env() {
        Ok(config) => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
                return 0;
            }
            let mut has_error = false;
            for issue in &issues {
                let tag = match issue.severity {
                    ValidationSeverity::Error => {
                        has_error = true;
                        "error"
                    }
                    ValidationSeverity::Warning => "warning",
                };
                println!("[{}] {}: {}", tag, issue.field, issue.message);
                if let Some(ref suggestion) = issue.suggestion {
                    println!("        {}", suggestion);
                }
            }
            i32::from(has_error)
        }
        Err(e) => {
            println!("Failed to load configuration:");
            println!("{}", e);
            1
        }
    }
}

///
/// Initialize logging with the configured log level.
///
/// `RUST_LOG` overrides `LOG_LEVEL` when set.
///
/// # Arguments
///  * `config` - application configuration containing log level settings
fn initialize_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.to_tracing_level().to_string().to_lowercase())
    });

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

///
/// Fail startup on configuration errors; surface warnings in the log.
fn report_validation(config: &Config) -> Result<()> {
    let mut errors = Vec::new();
    for issue in config.validate() {
        match issue.severity {
            ValidationSeverity::Error => {
                errors.push(format!("{}: {}", issue.field, issue.message));
            }
            ValidationSeverity::Warning => {
                warn!("{}: {}", issue.field, issue.message);
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(ProxyError::Config(errors.join("\n"))) }
}

///
/// Probe each configured backend's model listing.
///
/// Failures are logged but never abort startup: a backend may simply still
/// be loading its model weights.
async fn probe_backends(config: &Config) {
    let client = match BackendClient::new() {
        Ok(client) => client,
        Err(e) => {
            warn!("Skipping backend probe: {}", e);
            return;
        }
    };

    for (label, target) in [("backend", Some(&config.backend)), ("vision", config.vision.as_ref())]
    {
        let Some(target) = target else { continue };
        match client.probe(target).await {
            Ok(()) => info!("{} {} is reachable (model {})", label, target.url, target.model),
            Err(e) => warn!("{} {} probe failed: {}", label, target.url, e),
        }
    }
}

///
/// Start the HTTP server and log startup information.
///
/// # Arguments
///  * `config` - application configuration
///  * `app` - configured Axum application
///
/// # Returns
///  * `Ok(())` when server shuts down gracefully
///  * `ProxyError::Http` if server binding or startup fails
async fn start_server(config: &Config, app: axum::Router) -> Result<()> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.map_err(|e| {
        let error_msg = format!("Failed to bind to {}: {}", bind_addr, e);

        if e.to_string().to_lowercase().contains("address already in use") {
            ProxyError::Http(format!(
                "{}\n\n\
                 Port {} is already in use. Here are some solutions:\n\n\
                 1. Close the other instance:\n\
                    • Find the process using port {}:\n\
                      lsof -i :{}\n\
                    • Kill the process:\n\
                      kill -9 <PID>\n\n\
                 2. Change the port:\n\
                    export PORT=3457\n\
                    mistralmux",
                error_msg, config.port, config.port, config.port
            ))
        } else {
            ProxyError::Http(format!(
                "{}\n\n\
                 To fix this:\n\
                 • Check if the port is valid (1-65535)\n\
                 • Ensure you have permission to bind to the address\n\
                 • Try a different port: export PORT=3457",
                error_msg
            ))
        }
    })?;

    log_startup_info(config);

    axum::serve(listener, app)
        .await
        .map_err(|e| ProxyError::Http(format!("Server error: {}", e)))?;

    Ok(())
}

///
/// Log startup information and configuration details.
///
/// # Arguments
///  * `config` - application configuration
fn log_startup_info(config: &Config) {
    info!("MistralMux v{} running on {}:{}", VERSION, config.host, config.port);
    info!("Backend: {} (model {})", config.backend.url, config.backend.model);
    if let Some(ref vision) = config.vision {
        info!("Vision backend: {} (model {})", vision.url, vision.model);
    }
    info!("Anthropic endpoint:  http://localhost:{}/v1/messages", config.port);
    info!("OpenAI endpoint:     http://localhost:{}/v1/chat/completions", config.port);

    if config.log_level.is_trace_enabled() {
        info!(
            "[TRACE] Trace logging is ENABLED (LOG_LEVEL={:?}) - tool calls and translations \
             will be logged",
            config.log_level
        );
    }
}
