use std::{fmt::Display, path::Path};

use thiserror::Error;
use tracing::error;

/// Logs the error of a result we can't do anything else about
pub fn report_error(context: &str, res: &Result<(), impl Display>) {
	if let Err(e) = res {
		error!(%context, "{e:#}");
	}
}

/// I/O error that remembers which path it happened on
#[derive(Error, Debug)]
#[error("file I/O error{}: {source}; path: '{}'", .context.as_ref().map(|ctx| format!(" ({ctx})")).unwrap_or_default(), .path.display())]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub context: Option<String>,
}

impl FileIOError {
	pub fn new(path: impl AsRef<Path>, source: std::io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			context: None,
		}
	}

	pub fn with_context(
		path: impl AsRef<Path>,
		source: std::io::Error,
		context: impl Into<String>,
	) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			context: Some(context.into()),
		}
	}
}
