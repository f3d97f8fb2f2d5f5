//! xlab configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. built-in defaults
//! 2. a TOML file (`xlab.toml` by default; a missing file is not an error)
//! 3. environment variables prefixed with `XLAB_`, `__` separating nested
//!    keys (`XLAB_TCPIP__ENABLED=false`)
//!
//! ```toml
//! log_level = "debug"
//! log_format = "compact"
//! default_timeout_ms = 5000
//!
//! [visa]
//! enabled = true
//!
//! [tcpip]
//! resources = ["192.168.1.20", "scope.lab:1861"]
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use xlab_core::{Result, XlabError};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "xlab.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// On/off switch of a backend without further settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Raw SCPI socket backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpipConfig {
    pub enabled: bool,
    /// `host[:port]` addresses to list
    pub resources: Vec<String>,
}

impl Default for TcpipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resources: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XlabConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub log_format: LogFormat,
    /// Reply timeout of newly opened interfaces
    pub default_timeout_ms: u64,
    pub visa: BackendConfig,
    pub serial: BackendConfig,
    pub tcpip: TcpipConfig,
}

impl Default for XlabConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            default_timeout_ms: 5000,
            visa: BackendConfig::default(),
            serial: BackendConfig::default(),
            tcpip: TcpipConfig::default(),
        }
    }
}

impl XlabConfig {
    /// Load from `xlab.toml` in the working directory and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Figment::from(Serialized::defaults(XlabConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("XLAB_").split("__"))
            .extract()
            .map_err(|e| XlabError::Config(e.to_string()))
    }

    /// Check values the types cannot express. Log levels are case-insensitive.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(XlabError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.default_timeout_ms == 0 {
            return Err(XlabError::Config(
                "default_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_gives_defaults() {
        let config = XlabConfig::load_from("/nonexistent/xlab.toml").unwrap();
        assert_eq!(config, XlabConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_and_environment_merge() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "xlab.toml",
                r#"
                log_level = "debug"
                log_format = "json"

                [tcpip]
                resources = ["192.168.1.20"]
                "#,
            )?;
            jail.set_env("XLAB_DEFAULT_TIMEOUT_MS", "2000");
            jail.set_env("XLAB_VISA__ENABLED", "false");

            let config = XlabConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.log_format, LogFormat::Json);
            assert_eq!(config.default_timeout(), Duration::from_secs(2));
            assert!(!config.visa.enabled);
            assert!(config.serial.enabled);
            assert_eq!(config.tcpip.resources, vec!["192.168.1.20"]);
            Ok(())
        });
    }

    #[test]
    fn unknown_format_is_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.create_file("xlab.toml", r#"log_format = "xml""#)?;
            assert!(XlabConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn validation() {
        let mut config = XlabConfig {
            log_level: "verbose".into(),
            ..XlabConfig::default()
        };
        assert!(config.validate().is_err());

        config.log_level = "DEBUG".into();
        assert!(config.validate().is_ok());

        config.log_level = "warn".into();
        config.default_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
