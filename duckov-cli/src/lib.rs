//! DuckovNet CLI Library
//!
//! Shared functionality for the DuckovNet command-line tools.

pub mod config;
pub mod stats;

pub use config::{ClientConfig, Config, ConfigError, ServerConfig};
pub use stats::{display_compact_stats, display_session_stats, format_bytes, format_latency};
