//! Configuration loader with hot reload support.

use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::types::TalonConfig;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found.
    #[error("config file not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Configuration loader with hot reload support.
///
/// An `ArcSwap` holds the current config so readers never block on a
/// reload, and `reload()` re-reads the original file path.
pub struct ConfigLoader {
    config: ArcSwap<TalonConfig>,
    config_path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader with the default configuration (no file backing).
    pub fn new() -> Self {
        Self {
            config: ArcSwap::from_pointee(TalonConfig::default()),
            config_path: None,
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: TalonConfig = toml::from_str(&content)?;
        Self::validate(&config)?;

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Loads configuration from an in-memory TOML string.
    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let config: TalonConfig = toml::from_str(content)?;
        Self::validate(&config)?;

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            config_path: None,
        })
    }

    /// Returns the current configuration (lock-free read).
    #[inline]
    pub fn get(&self) -> Arc<TalonConfig> {
        self.config.load_full()
    }

    /// Re-reads the backing file and atomically swaps in the new
    /// configuration. Existing readers keep using the old `Arc` until
    /// they next call [`ConfigLoader::get`].
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::Validation("no config file path set".to_string()))?;

        let content = std::fs::read_to_string(path)?;
        let new_config: TalonConfig = toml::from_str(&content)?;
        Self::validate(&new_config)?;

        self.config.store(Arc::new(new_config));
        tracing::info!("configuration reloaded");
        Ok(())
    }

    /// Installs a configuration programmatically (e.g. from a control API).
    pub fn update(&self, new_config: TalonConfig) -> Result<(), ConfigError> {
        Self::validate(&new_config)?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }

    fn validate(config: &TalonConfig) -> Result<(), ConfigError> {
        if config.server.read_buffer_size == 0 {
            return Err(ConfigError::Validation("server.read_buffer_size must be > 0".into()));
        }
        if config.server.write_buffer_size == 0 {
            return Err(ConfigError::Validation("server.write_buffer_size must be > 0".into()));
        }
        if config.client.max_conns_per_host == 0 {
            return Err(ConfigError::Validation("client.max_conns_per_host must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_string_with_defaults() {
        let loader = ConfigLoader::load_str(
            r#"
[server]
listen = "127.0.0.1:8080"
"#,
        )
        .unwrap();
        let config = loader.get();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.client.max_conns_per_host, 512);
    }

    #[test]
    fn rejects_zero_buffer_size() {
        let result = ConfigLoader::load_str(
            r#"
[server]
read_buffer_size = 0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_file_and_reloads_on_change() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten = \"127.0.0.1:9000\"").unwrap();
        let loader = ConfigLoader::load_file(file.path()).unwrap();
        assert_eq!(loader.get().server.listen.port(), 9000);

        let mut file = file.reopen().unwrap();
        use std::io::Seek;
        file.set_len(0).unwrap();
        file.seek(std::io::SeekFrom::Start(0)).unwrap();
        writeln!(file, "[server]\nlisten = \"127.0.0.1:9100\"").unwrap();

        loader.reload().unwrap();
        assert_eq!(loader.get().server.listen.port(), 9100);
    }

    #[test]
    fn load_file_missing_path_errors() {
        let result = ConfigLoader::load_file("/nonexistent/talon.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn update_swaps_config_atomically() {
        let loader = ConfigLoader::new();
        let initial = loader.get();
        assert_eq!(initial.client.max_redirects_count, 16);

        let mut updated = (*initial).clone();
        updated.client.max_redirects_count = 4;
        loader.update(updated).unwrap();

        assert_eq!(loader.get().client.max_redirects_count, 4);
    }
}
