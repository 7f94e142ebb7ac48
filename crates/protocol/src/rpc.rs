//! Backend-facing JSON-RPC envelope.
//!
//! The broker talks to the desktop backend with line-delimited JSON:
//!
//! ```json
//! {"id": 4, "guid": "/org/.../request/1_7/t3", "method": "GetZones", "params": {...}}
//! {"id": 4, "result": {"response": 0, "results": {"serial": 9, "zones": [[1920, 1080, 0, 0]]}}}
//! {"guid": "/org/.../session/1_7/s1", "method": "Disabled", "params": {}}
//! ```
//!
//! Messages with an `id` are responses to broker calls; messages without one
//! are events emitted by backend objects (sessions).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::Options;
use crate::response::ResponseCode;

/// Call sent from the broker to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
	/// Unique id for correlating the response.
	pub id: u32,
	/// Object the call targets: a request path or session handle.
	pub guid: String,
	pub method: String,
	pub params: Value,
}

/// Backend answer to an [`RpcRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
	pub id: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<RpcErrorWrapper>,
}

/// Wrapper for backend error payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorWrapper {
	pub error: RpcErrorPayload,
}

/// Backend error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorPayload {
	pub message: String,
	/// Error name, e.g. `org.freedesktop.DBus.Error.Failed`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Event emitted by a backend object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEvent {
	pub guid: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of backend messages.
///
/// Uses serde's `untagged` to distinguish based on presence of `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
	Response(RpcResponse),
	Event(RpcEvent),
}

/// The `result` body of every request-style backend method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
	pub response: ResponseCode,
	#[serde(default)]
	pub results: Options,
}

impl BackendReply {
	pub fn new(response: ResponseCode, results: Options) -> Self {
		Self { response, results }
	}

	pub fn success(results: Options) -> Self {
		Self::new(ResponseCode::Success, results)
	}

	pub fn failure() -> Self {
		Self::new(ResponseCode::Other, Options::new())
	}
}
