//! Emulated-input front door.
//!
//! Two single-shot operations that bypass the session machinery:
//! `EmulateInput` answers its request with success right away, and `Connect`
//! hands the caller a socket already registered with the input-emulation
//! (EIS) server. Both are refused while lockdown disables emulated input.
//!
//! # Endpoint Registration
//!
//! The EIS endpoint speaks this broker's own registration line, not the
//! libei wire handshake: right after connecting, the broker writes one JSON
//! line `{"name": "<app id>"}` and hands the socket over. An endpoint that
//! expects the libei handshake needs an adapter in front of it.

use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

use inport_protocol::{INTERFACE_VERSION, Options, ResponseCode};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::bus::BusConnection;
use crate::caller::Caller;
use crate::error::{EiError, PortalError, Result};
use crate::locked::LockedObject;
use crate::request::Request;
use crate::task::spawn_detached;

/// Name announced for callers without an application id.
pub const UNKNOWN_APP_ID: &str = "unknown app id";

/// Desktop lockdown policy.
pub trait Lockdown: Send + Sync {
	fn is_emulated_input_disabled(&self) -> bool;
}

/// Lockdown policy fixed at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLockdown {
	pub disable_emulated_input: bool,
}

impl Lockdown for StaticLockdown {
	fn is_emulated_input_disabled(&self) -> bool {
		self.disable_emulated_input
	}
}

/// Location of the EIS server socket.
#[derive(Debug, Clone)]
pub struct EisEndpoint {
	socket_path: Option<PathBuf>,
}

impl EisEndpoint {
	pub fn at(path: impl Into<PathBuf>) -> Self {
		Self {
			socket_path: Some(path.into()),
		}
	}

	/// `$XDG_RUNTIME_DIR/eis-0`.
	pub fn from_runtime_dir() -> Self {
		Self {
			socket_path: dirs::runtime_dir().map(|dir| dir.join("eis-0")),
		}
	}

	pub fn socket_path(&self) -> Option<&PathBuf> {
		self.socket_path.as_ref()
	}

	/// Connects and writes the `{"name": ...}` registration line.
	pub async fn connect(&self, name: &str) -> Result<OwnedFd, EiError> {
		let path = self.socket_path.as_ref().ok_or(EiError::NoRuntimeDir)?;
		let mut stream = UnixStream::connect(path).await.map_err(|source| EiError::Connect {
			path: path.display().to_string(),
			source,
		})?;

		let mut hello = serde_json::to_vec(&Hello { name }).map_err(|err| EiError::Handshake(err.into()))?;
		hello.push(b'\n');
		stream.write_all(&hello).await.map_err(EiError::Handshake)?;
		stream.flush().await.map_err(EiError::Handshake)?;

		let stream = stream.into_std().map_err(EiError::Handshake)?;
		stream.set_nonblocking(false).map_err(EiError::Handshake)?;
		Ok(OwnedFd::from(stream))
	}
}

#[derive(Serialize)]
struct Hello<'a> {
	name: &'a str,
}

/// The emulated-input interface.
pub struct EmulatedInput {
	lockdown: Arc<dyn Lockdown>,
	endpoint: EisEndpoint,
	connection: Arc<BusConnection>,
}

impl EmulatedInput {
	pub fn new(lockdown: Arc<dyn Lockdown>, endpoint: EisEndpoint, connection: Arc<BusConnection>) -> Self {
		Self {
			lockdown,
			endpoint,
			connection,
		}
	}

	pub fn version(&self) -> u32 {
		INTERFACE_VERSION
	}

	fn check_lockdown(&self) -> Result<()> {
		if self.lockdown.is_emulated_input_disabled() {
			debug!(target = "inport.ei", "Ei access disabled");
			return Err(PortalError::NotAllowed("Ei access disabled".to_string()));
		}
		Ok(())
	}

	/// Exports a request and answers it with success from a background task.
	pub fn emulate_input(&self, caller: &Caller, options: &Options) -> Result<String> {
		self.check_lockdown()?;

		let request = Request::new(caller, options)?;
		request.export_locked(&mut request.lock(), &self.connection)?;
		let handle = request.id().to_string();

		spawn_detached("emulate input response", async move {
			let mut state = request.lock();
			request.respond_locked(&mut state, ResponseCode::Success, Options::new());
		});

		debug!(target = "inport.ei", handle = %handle, app_id = %caller.app_id, "emulate input granted");
		Ok(handle)
	}

	/// Returns a socket registered with the EIS server under the caller's
	/// application id.
	pub async fn connect(&self, caller: &Caller, _options: &Options) -> Result<OwnedFd> {
		self.check_lockdown()?;

		let name = if caller.app_id.is_empty() { UNKNOWN_APP_ID } else { caller.app_id.as_str() };
		let fd = self.endpoint.connect(name).await?;
		debug!(target = "inport.ei", sender = %caller.sender, name, "connected caller to EIS");
		Ok(fd)
	}
}

impl std::fmt::Debug for EmulatedInput {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmulatedInput").field("endpoint", &self.endpoint).finish_non_exhaustive()
	}
}
