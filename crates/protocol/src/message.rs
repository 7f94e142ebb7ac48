//! Caller-facing bus envelope.
//!
//! Callers write one [`ClientMessage`] per line and read [`ServerMessage`]
//! lines back. Every call is answered synchronously by exactly one `Reply`
//! or `Error` carrying the call's `serial`; request-returning calls are
//! answered asynchronously later by a `Response` [`Signal`] on the returned
//! path.
//!
//! ```json
//! {"serial": 3, "method": "GetZones", "session_handle": "/org/...", "options": {}}
//! {"type": "reply", "serial": 3, "handle": "/org/freedesktop/portal/desktop/request/1_7/t3"}
//! {"type": "signal", "path": "/org/.../t3", "member": "Response", "code": 0, "results": {...}}
//! ```

use serde::{Deserialize, Serialize};

use crate::options::Options;
use crate::response::ResponseCode;
use crate::types::Barrier;

/// One call from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
	/// Caller-chosen serial echoed in the synchronous reply.
	pub serial: u32,
	#[serde(flatten)]
	pub call: PortalCall,
}

/// Every method a caller may invoke on the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum PortalCall {
	CreateSession {
		#[serde(default)]
		parent_window: String,
		#[serde(default)]
		options: Options,
	},
	GetZones {
		session_handle: String,
		#[serde(default)]
		options: Options,
	},
	SetPointerBarriers {
		session_handle: String,
		#[serde(default)]
		options: Options,
		barriers: Vec<Barrier>,
		serial: u32,
	},
	Enable {
		session_handle: String,
		#[serde(default)]
		options: Options,
	},
	Disable {
		session_handle: String,
		#[serde(default)]
		options: Options,
	},
	Release {
		session_handle: String,
		#[serde(default)]
		options: Options,
	},
	EmulateInput {
		#[serde(default)]
		options: Options,
	},
	Connect {
		#[serde(default)]
		options: Options,
	},
	/// `Close` on an exported request object.
	Close { handle: String },
	/// `Close` on a session object.
	CloseSession { session_handle: String },
}

impl PortalCall {
	/// Method name as it appears on the wire.
	pub fn method(&self) -> &'static str {
		match self {
			PortalCall::CreateSession { .. } => "CreateSession",
			PortalCall::GetZones { .. } => "GetZones",
			PortalCall::SetPointerBarriers { .. } => "SetPointerBarriers",
			PortalCall::Enable { .. } => "Enable",
			PortalCall::Disable { .. } => "Disable",
			PortalCall::Release { .. } => "Release",
			PortalCall::EmulateInput { .. } => "EmulateInput",
			PortalCall::Connect { .. } => "Connect",
			PortalCall::Close { .. } => "Close",
			PortalCall::CloseSession { .. } => "CloseSession",
		}
	}
}

/// One line from the broker to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	/// Sent once on connect; `sender` is the caller's unique bus name.
	Hello { sender: String },
	/// Synchronous success of call `serial`.
	Reply {
		serial: u32,
		/// Request path for request-returning calls.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		handle: Option<String>,
		/// Index of the descriptor passed alongside this line (`Connect`).
		#[serde(default, skip_serializing_if = "Option::is_none")]
		fd: Option<u32>,
	},
	/// Synchronous failure of call `serial`.
	Error { serial: u32, name: String, message: String },
	/// Asynchronous signal emitted on object `path`.
	Signal {
		path: String,
		#[serde(flatten)]
		signal: Signal,
	},
}

/// Signals a caller can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "member")]
pub enum Signal {
	/// Terminal answer of a request; emitted at most once per request path.
	Response { code: ResponseCode, results: Options },
	/// The session was closed by the broker or the backend.
	Closed {
		#[serde(default)]
		details: Options,
	},
	/// Capture became active.
	Activated {
		#[serde(default)]
		details: Options,
	},
	/// Capture stopped being active.
	Deactivated {
		#[serde(default)]
		details: Options,
	},
	/// The session was disabled by the backend.
	Disabled {
		#[serde(default)]
		details: Options,
	},
	/// The zone set changed; previously queried zones are stale.
	ZonesChanged {
		#[serde(default)]
		details: Options,
	},
}

impl Signal {
	/// Builds a `Response` signal.
	pub fn response(code: ResponseCode, results: Options) -> Self {
		Signal::Response { code, results }
	}

	/// Maps a backend session event name onto a relayable signal.
	pub fn from_session_event(member: &str, details: Options) -> Option<Self> {
		match member {
			"Closed" => Some(Signal::Closed { details }),
			"Activated" => Some(Signal::Activated { details }),
			"Deactivated" => Some(Signal::Deactivated { details }),
			"Disabled" => Some(Signal::Disabled { details }),
			"ZonesChanged" => Some(Signal::ZonesChanged { details }),
			_ => None,
		}
	}
}
