//! Configuration module for ki-browser-oop.
//!
//! This module provides configuration management for the host, including:
//! - Loading settings from files (TOML/JSON)
//! - Environment variable overrides
//! - Browser-process startup arguments
//! - Validation and defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use ki_browser_oop::config::HostSettings;
//!
//! let settings = HostSettings::from_file("host.toml").unwrap().merge_with_env();
//! settings.validate().unwrap();
//! ```

mod settings;

pub use settings::{ConfigError, HostSettings, ProcessArgs, BROWSER_PROCESS_BINARY};
