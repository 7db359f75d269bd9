//! JSON-backed server configuration, matching SPEC_FULL.md §6 and §4.9.
//!
//! Absent-file and unparsable-file both fall back to in-memory defaults
//! without failing startup; an absent file is additionally (re)written with
//! the defaults, matching the source implementation's "create default
//! config file" behavior.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 10000 }
    }
}

/// Used only by test clients; this server parses and preserves it but never
/// acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    pub host: String,
    pub port: u16,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self { host: "192.168.0.106".to_string(), port: 10000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    pub max_message_size: usize,
    pub read_timeout: f64,
    pub max_name_length: usize,
    pub rate_limit_messages_per_second: usize,
    pub rate_limit_window_seconds: f64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_message_size: 4096,
            read_timeout: 30.0,
            max_name_length: 50,
            rate_limit_messages_per_second: 10,
            rate_limit_window_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_to_file: false,
            log_file: "server.log".to_string(),
        }
    }
}

/// The full configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSection,
    pub client: ClientSection,
    pub limits: LimitsSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Loads configuration from `path`.
    ///
    /// - File exists and parses: returns its contents.
    /// - File exists but fails to parse: logs a warning, returns defaults
    ///   (does not overwrite the malformed file).
    /// - File absent: writes it with defaults, returns defaults.
    ///
    /// # Errors
    ///
    /// Only returns `Err` if neither reading nor writing the file is
    /// possible for reasons other than "file doesn't exist" (e.g. the
    /// parent directory itself is unwritable) -- callers should treat that
    /// as non-fatal and fall back to `AppConfig::default()` directly rather
    /// than failing startup, matching §4.9's "a malformed config does not
    /// stop the server" rule.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => Ok(config),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "config file failed to parse, using defaults");
                    Ok(Self::default())
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                if let Ok(json) = serde_json::to_string_pretty(&config) {
                    if let Err(write_err) = std::fs::write(path, json) {
                        tracing::warn!(error = %write_err, path = %path.display(), "could not create default config file");
                    } else {
                        tracing::info!(path = %path.display(), "created default config file");
                    }
                }
                Ok(config)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.limits.max_message_size, 4096);
        assert_eq!(config.limits.max_name_length, 50);
        assert_eq!(config.limits.rate_limit_messages_per_second, 10);
        assert!((config.limits.rate_limit_window_seconds - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "INFO");
        assert!(!config.logging.log_to_file);
    }

    #[test]
    fn load_or_create_writes_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(!path.exists());

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let written: AppConfig = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, AppConfig::default());
    }

    #[test]
    fn load_or_create_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut custom = AppConfig::default();
        custom.server.port = 9999;
        std::fs::write(&path, serde_json::to_string(&custom).unwrap()).unwrap();

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.server.port, 9999);
    }

    #[test]
    fn load_or_create_falls_back_to_defaults_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{ not valid json").unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
