//! Application configuration

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{default_data_dir, SyncConfig};

const CONFIG_FILE_NAME: &str = "ledger.json";
const QUEUE_FILE_NAME: &str = "mutation_queue.redb";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level, used when `RUST_LOG` is not set
	pub log_level: String,

	/// Synchronization engine tuning
	#[serde(default)]
	pub sync: SyncConfig,
}

impl AppConfig {
	pub const fn target_version() -> u32 {
		1
	}

	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory, writing defaults when missing
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)
				.with_context(|| format!("Failed to read config at {}", config_path.display()))?;
			let mut config: Self = serde_json::from_str(&json)
				.with_context(|| format!("Failed to parse config at {}", config_path.display()))?;

			if config.version < Self::target_version() {
				info!(
					"Upgrading config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.version = Self::target_version();
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	#[must_use]
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			sync: SyncConfig::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	#[must_use]
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	/// Location of the durable offline mutation queue
	#[must_use]
	pub fn queue_path(&self) -> PathBuf {
		self.data_dir.join(QUEUE_FILE_NAME)
	}

	pub fn ensure_directories(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		fs::create_dir_all(self.logs_dir())?;
		Ok(())
	}
}

impl Default for AppConfig {
	fn default() -> Self {
		let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
		Self::default_with_dir(data_dir)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creates_default_config_when_missing() {
		let dir = tempfile::tempdir().unwrap();

		let config = AppConfig::load_from(dir.path()).unwrap();
		assert_eq!(config.version, AppConfig::target_version());
		assert_eq!(config.sync.groups.participant_cap, 2);
		assert!(dir.path().join(CONFIG_FILE_NAME).exists());
	}

	#[test]
	fn partial_config_is_completed_with_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let json = serde_json::json!({
			"version": 1,
			"data_dir": dir.path(),
			"log_level": "debug",
			"sync": { "queue": { "retry_ceiling": 3 } }
		});
		fs::write(dir.path().join(CONFIG_FILE_NAME), json.to_string()).unwrap();

		let config = AppConfig::load_from(dir.path()).unwrap();
		assert_eq!(config.log_level, "debug");
		assert_eq!(config.sync.queue.retry_ceiling, 3);
		assert_eq!(config.sync.queue.max_backoff_ms, 60_000);
		assert_eq!(config.sync.projection.window_months, 12);
		assert_eq!(config.queue_path(), dir.path().join(QUEUE_FILE_NAME));
	}

	#[test]
	fn older_versions_are_upgraded_on_load() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = AppConfig::default_with_dir(dir.path().to_path_buf());
		config.version = 0;
		config.save().unwrap();

		let loaded = AppConfig::load_from(dir.path()).unwrap();
		assert_eq!(loaded.version, AppConfig::target_version());
	}
}
