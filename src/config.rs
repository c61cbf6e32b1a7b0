//! Deployment configuration (SPEC_FULL §2 "Configuration layer"): a
//! layered TOML config mirroring the operator-config approach used
//! throughout this stack (compare the teacher's `StromaConfig`) — typed
//! sub-structs per concern, `serde(default)` for optional sections, and
//! `load`/`save`/`generate_default_toml` helpers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("deployment_secret must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),
}

/// Top-level operator configuration for the vote-core service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteServiceConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub secret_codec: SecretCodecConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection settings (spec §6: "Database connection string").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Secret-ballot codec settings (spec §6: "Deployment secret file path").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretCodecConfig {
    /// Path to the file holding the AES key material. Read once at
    /// start-up; never logged.
    pub deployment_secret_file: Option<PathBuf>,
}

impl Default for SecretCodecConfig {
    fn default() -> Self {
        Self {
            deployment_secret_file: None,
        }
    }
}

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl VoteServiceConfig {
    /// Load from a TOML file. Fails fast if the referenced deployment
    /// secret file is too short to derive a usable AES-256 key, matching
    /// the teacher's early-validation posture for key material.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: VoteServiceConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).expect("config always serializes");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret_path) = &self.secret_codec.deployment_secret_file {
            if let Ok(bytes) = fs::read(secret_path) {
                if bytes.len() < 32 {
                    return Err(ConfigError::SecretTooShort(bytes.len()));
                }
            }
        }
        Ok(())
    }

    /// Render the default config as TOML, for `vote-corectl generate-config`.
    pub fn generate_default_toml() -> String {
        let default = VoteServiceConfig {
            database: DatabaseConfig {
                url: "sqlite://vote-core.db".to_string(),
            },
            secret_codec: SecretCodecConfig::default(),
            logging: LoggingConfig::default(),
        };
        toml::to_string_pretty(&default).expect("default config always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = VoteServiceConfig {
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
            },
            secret_codec: SecretCodecConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.save(&path).unwrap();
        let loaded = VoteServiceConfig::load(&path).unwrap();
        assert_eq!(loaded.database.url, "sqlite::memory:");
    }

    #[test]
    fn rejects_short_deployment_secret() {
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        let mut f = fs::File::create(&secret_path).unwrap();
        f.write_all(b"too short").unwrap();

        let config_path = dir.path().join("config.toml");
        let config = VoteServiceConfig {
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
            },
            secret_codec: SecretCodecConfig {
                deployment_secret_file: Some(secret_path),
            },
            logging: LoggingConfig::default(),
        };
        config.save(&config_path).unwrap();

        let err = VoteServiceConfig::load(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::SecretTooShort(_)));
    }
}
