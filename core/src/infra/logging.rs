use std::{fs, path::Path, sync::Once};

use anyhow::{anyhow, Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "sl_core=info,sl_utils=info";

/// Initialize tracing with stdout output and daily rotated files in `{data_dir}/logs`.
///
/// `RUST_LOG` takes precedence over `level`; later calls are no-ops.
pub fn init_logging(data_dir: &Path, level: &str) -> Result<()> {
	static INIT: Once = Once::new();
	let mut result = Ok(());

	INIT.call_once(|| {
		result = install(data_dir, level);
	});

	result
}

fn install(data_dir: &Path, level: &str) -> Result<()> {
	let logs_dir = data_dir.join("logs");
	fs::create_dir_all(&logs_dir)
		.with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

	let directives = if level.is_empty() || level == "info" {
		DEFAULT_DIRECTIVES.to_string()
	} else {
		format!("sl_core={level},sl_utils={level}")
	};

	let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "sync.log");

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives)))
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_writer(std::io::stdout),
		)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_ansi(false)
				.with_writer(file_appender),
		)
		.try_init()
		.map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}
