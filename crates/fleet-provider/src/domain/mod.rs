//! Domain layer for fleet-provider.
//!
//! Contains pure data types with no I/O dependencies beyond reading the
//! configuration file.

pub mod config;

pub use config::{load_config, render_config, ConfigError, ProviderConfig};
