//! Host settings and browser-process arguments.
//!
//! Settings are applied in the following order (later sources override earlier):
//! 1. Default values
//! 2. Configuration file (TOML or JSON)
//! 3. Environment variables (`KI_BROWSER_OOP_*`)
//! 4. Builder calls made by the embedding application

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::host::supervisor::LaunchOptions;

/// Name of the browser-process binary shipped with this crate.
pub const BROWSER_PROCESS_BINARY: &str = "ki-browser-host";

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration.
    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Failed to parse JSON configuration.
    #[error("Failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Unsupported file format.
    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Settings for an out-of-process host.
///
/// # Example
///
/// ```rust
/// use ki_browser_oop::config::HostSettings;
///
/// let settings = HostSettings::default()
///     .with_cache_path("/tmp/ki-cache")
///     .with_startup_timeout(10_000);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Browser-process executable. Defaults to `ki-browser-host` next to the current executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_executable: Option<PathBuf>,

    /// Cache directory passed to the browser process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    /// Extra arguments appended to the browser-process command line.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Let the browser process write to the host's stderr.
    #[serde(default = "default_inherit_stderr")]
    pub inherit_stderr: bool,

    /// Log file for the browser process (`--log-file`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Time allowed for the browser process to report `OnContextInitialized`.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Default timeout for request/response commands.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Grace period between `CloseHost` and force-killing the process.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

// Default value functions for serde
fn default_inherit_stderr() -> bool {
    true
}

fn default_startup_timeout_ms() -> u64 {
    30000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            browser_executable: None,
            cache_path: None,
            extra_args: Vec::new(),
            inherit_stderr: default_inherit_stderr(),
            log_file: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl HostSettings {
    /// Creates a new HostSettings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a configuration file.
    ///
    /// Supports both TOML and JSON formats, detected by file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match file_extension(path).as_str() {
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Saves settings to a configuration file, format by extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        let content = match file_extension(path).as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            ext => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Loads settings from `KI_BROWSER_OOP_*` environment variables over defaults.
    pub fn from_env() -> Self {
        Self::default().merge_with_env()
    }

    /// Applies environment variable overrides to current settings.
    pub fn merge_with_env(mut self) -> Self {
        if let Ok(val) = env::var("KI_BROWSER_OOP_EXECUTABLE") {
            self.browser_executable = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_LOG_FILE") {
            self.log_file = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_INHERIT_STDERR") {
            self.inherit_stderr = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_STARTUP_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.startup_timeout_ms = ms;
            }
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.request_timeout_ms = ms;
            }
        }

        if let Ok(val) = env::var("KI_BROWSER_OOP_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.shutdown_timeout_ms = ms;
            }
        }

        self
    }

    /// Validates all settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref executable) = self.browser_executable {
            if executable.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Browser executable path cannot be empty".to_string(),
                ));
            }
        }

        if self.startup_timeout_ms < 100 {
            return Err(ConfigError::ValidationError(
                "Startup timeout must be at least 100ms".to_string(),
            ));
        }
        if self.startup_timeout_ms > 600000 {
            return Err(ConfigError::ValidationError(
                "Startup timeout cannot exceed 600000ms (10 minutes)".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout_ms > 60000 {
            return Err(ConfigError::ValidationError(
                "Shutdown timeout cannot exceed 60000ms".to_string(),
            ));
        }

        if let Some(ref path) = self.cache_path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::ValidationError(format!(
                        "Cache path parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Resolves the executable and command line for the supervisor.
    pub fn launch_options(&self) -> Result<LaunchOptions, ConfigError> {
        let executable = match self.browser_executable {
            Some(ref path) => path.clone(),
            None => default_browser_executable()?,
        };

        let mut extra_args = self.extra_args.clone();
        if let Some(ref log_file) = self.log_file {
            extra_args.push(format!("--log-file={}", log_file.display()));
        }

        Ok(LaunchOptions {
            executable,
            cache_path: self.cache_path.clone(),
            extra_args,
            inherit_stderr: self.inherit_stderr,
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    // Builder-style methods for convenient configuration

    /// Sets the browser-process executable.
    pub fn with_browser_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.browser_executable = Some(path.into());
        self
    }

    /// Sets the cache directory.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Appends an extra command line argument.
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Sets the browser-process log file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// Sets the startup timeout in milliseconds.
    pub fn with_startup_timeout(mut self, timeout_ms: u64) -> Self {
        self.startup_timeout_ms = timeout_ms;
        self
    }

    /// Sets the request timeout in milliseconds.
    pub fn with_request_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Sets the shutdown grace period in milliseconds.
    pub fn with_shutdown_timeout(mut self, timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = timeout_ms;
        self
    }
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// `ki-browser-host` located next to the running executable.
fn default_browser_executable() -> Result<PathBuf, ConfigError> {
    let current = env::current_exe()?;
    let dir = current.parent().ok_or_else(|| {
        ConfigError::ValidationError("Current executable has no parent directory".to_string())
    })?;
    Ok(dir.join(format!("{}{}", BROWSER_PROCESS_BINARY, env::consts::EXE_SUFFIX)))
}

/// Startup arguments of the browser process.
///
/// The host produces them with [`ProcessArgs::to_command_args`]; the
/// `ki-browser-host` binary parses them back with clap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessArgs {
    /// Process id of the host that spawned us.
    pub parent_process_id: Option<u32>,
    /// Cache directory for the browser engine.
    pub cache_path: Option<PathBuf>,
    /// Log file; stderr when absent.
    pub log_file: Option<PathBuf>,
    /// Identity the browser process reports in `OnContextInitialized`.
    pub remote_thread_id: i32,
}

impl Default for ProcessArgs {
    fn default() -> Self {
        Self {
            parent_process_id: None,
            cache_path: None,
            log_file: None,
            remote_thread_id: 1,
        }
    }
}

impl ProcessArgs {
    /// Arguments for spawning a browser process owned by `parent_process_id`.
    pub fn for_parent(parent_process_id: u32, cache_path: Option<PathBuf>) -> Self {
        Self {
            parent_process_id: Some(parent_process_id),
            cache_path,
            ..Self::default()
        }
    }

    /// Renders the arguments in `--name=value` form.
    pub fn to_command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(pid) = self.parent_process_id {
            args.push(format!("--parentProcessId={}", pid));
        }
        if let Some(ref cache_path) = self.cache_path {
            args.push(format!("--cachePath={}", cache_path.display()));
        }
        if let Some(ref log_file) = self.log_file {
            args.push(format!("--log-file={}", log_file.display()));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = HostSettings::default();
        assert!(settings.browser_executable.is_none());
        assert!(settings.inherit_stderr);
        assert_eq!(settings.startup_timeout_ms, 30000);
        assert_eq!(settings.request_timeout_ms, 10000);
        assert_eq!(settings.shutdown_timeout_ms, 5000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let settings = HostSettings::default()
            .with_browser_executable("/opt/ki/ki-browser-host")
            .with_cache_path("cache")
            .with_extra_arg("--remote-thread-id=7")
            .with_log_file("child.log")
            .with_startup_timeout(2000)
            .with_request_timeout(500)
            .with_shutdown_timeout(100);

        assert_eq!(settings.startup_timeout(), Duration::from_millis(2000));
        assert_eq!(settings.request_timeout(), Duration::from_millis(500));
        assert_eq!(settings.shutdown_timeout(), Duration::from_millis(100));

        let launch = settings.launch_options().unwrap();
        assert_eq!(launch.executable, PathBuf::from("/opt/ki/ki-browser-host"));
        assert_eq!(launch.cache_path, Some(PathBuf::from("cache")));
        assert_eq!(
            launch.extra_args,
            vec!["--remote-thread-id=7".to_string(), "--log-file=child.log".to_string()]
        );
    }

    #[test]
    fn test_validation_invalid_timeouts() {
        assert!(HostSettings::default().with_startup_timeout(10).validate().is_err());
        assert!(HostSettings::default().with_request_timeout(0).validate().is_err());
        assert!(HostSettings::default().with_shutdown_timeout(120000).validate().is_err());
    }

    #[test]
    fn test_validation_missing_cache_parent() {
        let settings = HostSettings::default().with_cache_path("/definitely/not/here/cache");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HostSettings::default()
            .with_cache_path(dir.path().join("cache"))
            .with_request_timeout(1234);

        for name in ["host.toml", "host.json"] {
            let path = dir.path().join(name);
            settings.to_file(&path).unwrap();
            let loaded = HostSettings::from_file(&path).unwrap();
            assert_eq!(loaded.request_timeout_ms, 1234);
            assert_eq!(loaded.cache_path, settings.cache_path);
        }

        assert!(matches!(
            HostSettings::from_file(dir.path().join("host.yaml")),
            Err(ConfigError::IoError(_))
        ));
        std::fs::write(dir.path().join("host.yaml"), "x: 1").unwrap();
        assert!(matches!(
            HostSettings::from_file(dir.path().join("host.yaml")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("KI_BROWSER_OOP_REQUEST_TIMEOUT_MS", "2500");
        env::set_var("KI_BROWSER_OOP_INHERIT_STDERR", "false");
        let settings = HostSettings::from_env();
        env::remove_var("KI_BROWSER_OOP_REQUEST_TIMEOUT_MS");
        env::remove_var("KI_BROWSER_OOP_INHERIT_STDERR");

        assert_eq!(settings.request_timeout_ms, 2500);
        assert!(!settings.inherit_stderr);
    }

    #[test]
    fn test_process_args() {
        let args = ProcessArgs::for_parent(4242, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(
            args.to_command_args(),
            vec!["--parentProcessId=4242".to_string(), "--cachePath=/tmp/cache".to_string()]
        );
        assert_eq!(args.remote_thread_id, 1);
    }
}
