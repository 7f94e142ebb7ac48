use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("no {0} configured and $XDG_RUNTIME_DIR is not set")]
	NoRuntimeDir(&'static str),

	#[error("invalid log filter {filter:?}: {message}")]
	LogFilter { filter: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
