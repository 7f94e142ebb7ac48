//! Daemon configuration: a JSON file overlaid with command-line flags.
//!
//! ```json
//! {
//!   "socket_path": "/run/user/1000/inport/bus.sock",
//!   "backend_socket_path": "/run/user/1000/inport/backend.sock",
//!   "eis_socket_path": "/run/user/1000/eis-0",
//!   "disable_emulated_input": false,
//!   "log_filter": "inport=debug"
//! }
//! ```
//!
//! Every field is optional. Paths left unset derive from `$XDG_RUNTIME_DIR`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::{ConfigError, Result};

const CONFIG_DIR: &str = "inport";
const CONFIG_FILE: &str = "config.json";
const SOCKET_NAME: &str = "bus.sock";
const BACKEND_SOCKET_NAME: &str = "backend.sock";
const EIS_SOCKET_NAME: &str = "eis-0";

/// Configuration as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub socket_path: Option<PathBuf>,
	pub backend_socket_path: Option<PathBuf>,
	pub eis_socket_path: Option<PathBuf>,
	pub disable_emulated_input: bool,
	pub log_filter: Option<String>,
	#[serde(skip)]
	runtime_dir: Option<PathBuf>,
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
	pub socket_path: PathBuf,
	pub backend_socket_path: PathBuf,
	pub eis_socket_path: PathBuf,
	pub disable_emulated_input: bool,
	pub log_filter: Option<String>,
}

impl Config {
	/// `$XDG_CONFIG_HOME/inport/config.json`.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
	}

	/// Reads `path`; a missing file yields the defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let contents = match std::fs::read_to_string(path) {
			Ok(contents) => contents,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default().with_runtime_dir(dirs::runtime_dir())),
			Err(source) => {
				return Err(ConfigError::Read {
					path: path.to_path_buf(),
					source,
				});
			}
		};
		let config: Config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(config.with_runtime_dir(dirs::runtime_dir()))
	}

	/// Loads the file named by `--config` (or the default one) and applies
	/// the command-line overrides.
	pub fn load_for(cli: &Cli) -> Result<Self> {
		let mut config = match cli.config.clone().or_else(Self::default_path) {
			Some(path) => Self::load(&path)?,
			None => Self::default().with_runtime_dir(dirs::runtime_dir()),
		};
		config.apply(cli);
		Ok(config)
	}

	pub fn with_runtime_dir(mut self, runtime_dir: Option<PathBuf>) -> Self {
		self.runtime_dir = runtime_dir;
		self
	}

	pub fn apply(&mut self, cli: &Cli) {
		if let Some(path) = &cli.socket {
			self.socket_path = Some(path.clone());
		}
		if let Some(path) = &cli.backend_socket {
			self.backend_socket_path = Some(path.clone());
		}
		if let Some(path) = &cli.eis_socket {
			self.eis_socket_path = Some(path.clone());
		}
		if cli.disable_emulated_input {
			self.disable_emulated_input = true;
		}
	}

	pub fn resolve(self) -> Result<Settings> {
		if let Some(filter) = &self.log_filter {
			EnvFilter::try_new(filter).map_err(|err| ConfigError::LogFilter {
				filter: filter.clone(),
				message: err.to_string(),
			})?;
		}

		let runtime_dir = self.runtime_dir.as_deref();
		let under_runtime_dir = |path: Option<PathBuf>, what: &'static str, name: &str| -> Result<PathBuf> {
			match (path, runtime_dir) {
				(Some(path), _) => Ok(path),
				(None, Some(dir)) => Ok(dir.join(name)),
				(None, None) => Err(ConfigError::NoRuntimeDir(what)),
			}
		};

		Ok(Settings {
			socket_path: under_runtime_dir(self.socket_path, "socket_path", &format!("{CONFIG_DIR}/{SOCKET_NAME}"))?,
			backend_socket_path: under_runtime_dir(
				self.backend_socket_path,
				"backend_socket_path",
				&format!("{CONFIG_DIR}/{BACKEND_SOCKET_NAME}"),
			)?,
			eis_socket_path: under_runtime_dir(self.eis_socket_path, "eis_socket_path", EIS_SOCKET_NAME)?,
			disable_emulated_input: self.disable_emulated_input,
			log_filter: self.log_filter,
		})
	}
}

impl Settings {
	/// Writes the settings to stdout as JSON.
	pub fn print(&self) -> anyhow::Result<()> {
		println!("{}", serde_json::to_string_pretty(self)?);
		Ok(())
	}
}
