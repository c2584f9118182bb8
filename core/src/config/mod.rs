//! Application configuration management

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Result};

pub mod app_config;
pub mod sync_config;

pub use app_config::AppConfig;
pub use sync_config::{
	ClockConfig, GroupConfig, ListenerConfig, ProjectionConfig, QueueConfig, SyncConfig,
};

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	#[cfg(target_os = "macos")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("SharedLedger");

	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("SharedLedger");

	#[cfg(not(any(target_os = "macos", target_os = "windows")))]
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("shared-ledger");

	fs::create_dir_all(&dir)?;

	Ok(dir)
}
