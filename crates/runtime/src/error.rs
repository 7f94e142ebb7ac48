//! Error types for the broker runtime.
//!
//! Errors split along the two ways a caller can learn about a failure:
//!
//! * [`PortalError`] is returned synchronously from a call and carries a bus
//!   error name (`PortalError::bus_name`).
//! * Backend-reported failures and cancellations are never errors here; they
//!   travel as `Response` codes on the request path.

use thiserror::Error;

/// Result alias for caller-facing operations.
pub type Result<T, E = PortalError> = std::result::Result<T, E>;

/// Synchronous, caller-visible failure of a broker call.
#[derive(Debug, Error)]
pub enum PortalError {
	/// Policy forbids the operation (lockdown, principal mismatch on policy).
	#[error("{0}")]
	NotAllowed(String),

	/// The referenced session is unknown or owned by another caller.
	#[error("{0}")]
	AccessDenied(String),

	/// The operation is invalid for the current object state.
	#[error("{0}")]
	Failed(String),

	/// An argument (token, option value, barrier) is malformed.
	#[error("{0}")]
	InvalidArgument(String),

	/// The backend could not be reached to start the operation.
	#[error("backend unavailable: {0}")]
	Backend(#[from] BackendError),

	/// The request path is already exported.
	#[error(transparent)]
	Export(#[from] ExportError),

	/// Session construction failed.
	#[error(transparent)]
	Session(#[from] SessionError),

	/// The emulated-input handshake failed.
	#[error("Failed to connect to EIS: {0}")]
	Ei(#[from] EiError),
}

impl PortalError {
	/// Bus error name reported to the caller.
	pub fn bus_name(&self) -> &'static str {
		match self {
			PortalError::NotAllowed(_) => "org.freedesktop.portal.Error.NotAllowed",
			PortalError::AccessDenied(_) => "org.freedesktop.DBus.Error.AccessDenied",
			PortalError::Failed(_) | PortalError::Export(_) => "org.freedesktop.DBus.Error.Failed",
			PortalError::InvalidArgument(_) | PortalError::Session(_) => "org.freedesktop.portal.Error.InvalidArgument",
			PortalError::Backend(_) | PortalError::Ei(_) => "org.freedesktop.portal.Error.Failed",
		}
	}

	pub(crate) fn invalid_session() -> Self {
		PortalError::Failed("Invalid session".to_string())
	}
}

/// Failure talking to the backend process.
#[derive(Debug, Error)]
pub enum BackendError {
	/// Connection dropped before a response arrived.
	#[error("backend connection closed")]
	ChannelClosed,

	/// Transport-level failure (socket, framing).
	#[error("backend transport error: {0}")]
	Transport(String),

	/// Malformed or uncorrelated backend message.
	#[error("backend protocol error: {0}")]
	Protocol(String),

	/// The backend answered the call with an error.
	#[error("backend call failed: {message}")]
	Remote { name: Option<String>, message: String },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Failure exporting an object on the caller bus.
#[derive(Debug, Error)]
pub enum ExportError {
	#[error("object path {0} is already exported")]
	PathInUse(String),
}

/// Failure constructing a session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("invalid session token {0:?}")]
	InvalidToken(String),

	#[error("session handle {0} is already in use")]
	HandleInUse(String),
}

/// Failure of the emulated-input endpoint handshake.
#[derive(Debug, Error)]
pub enum EiError {
	#[error("no runtime directory to locate the EIS socket in")]
	NoRuntimeDir,

	#[error("{path}: {source}")]
	Connect {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("handshake: {0}")]
	Handshake(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bus_names_follow_taxonomy() {
		assert_eq!(PortalError::NotAllowed("x".into()).bus_name(), "org.freedesktop.portal.Error.NotAllowed");
		assert_eq!(PortalError::AccessDenied("x".into()).bus_name(), "org.freedesktop.DBus.Error.AccessDenied");
		assert_eq!(PortalError::invalid_session().bus_name(), "org.freedesktop.DBus.Error.Failed");
		assert_eq!(
			PortalError::from(SessionError::InvalidToken("a/b".into())).bus_name(),
			"org.freedesktop.portal.Error.InvalidArgument"
		);
		assert_eq!(PortalError::from(BackendError::ChannelClosed).bus_name(), "org.freedesktop.portal.Error.Failed");
		assert_eq!(PortalError::from(EiError::NoRuntimeDir).bus_name(), "org.freedesktop.portal.Error.Failed");
	}

	#[test]
	fn ei_failures_are_prefixed() {
		let err = PortalError::from(EiError::Connect {
			path: "/run/user/1000/eis-0".to_string(),
			source: std::io::Error::from(std::io::ErrorKind::NotFound),
		});
		assert!(err.to_string().starts_with("Failed to connect to EIS: /run/user/1000/eis-0"));
	}

	#[test]
	fn invalid_session_message() {
		assert_eq!(PortalError::invalid_session().to_string(), "Invalid session");
	}
}
