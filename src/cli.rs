//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Blog backend API - token auth, revocation, rate limiting and audit
#[derive(Parser, Debug)]
#[command(name = "blog-api")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "BLOG_API_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "BLOG_API_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "BLOG_API_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BLOG_API_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "BLOG_API_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the API server (default)
    Serve,

    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}
