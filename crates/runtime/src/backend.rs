//! Backend collaborator interface.
//!
//! The backend is the desktop-specific process that performs the privileged
//! work. The broker only forwards opaque parameters and receives a
//! [`BackendReply`]: a response code plus a results dictionary.
//!
//! Calls have no timeout (the backend may be waiting on the user) and are
//! never retried.

use std::sync::Arc;

use async_trait::async_trait;
use inport_protocol::rpc::{BackendReply, RpcEvent};
use inport_protocol::{Barrier, Options};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BackendError;
use crate::task::spawn_detached;

/// One request-style backend method, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
	CreateSession {
		handle: String,
		session_handle: String,
		app_id: String,
		parent_window: String,
		options: Options,
	},
	GetZones {
		handle: String,
		session_handle: String,
		app_id: String,
		options: Options,
	},
	SetPointerBarriers {
		handle: String,
		session_handle: String,
		app_id: String,
		options: Options,
		barriers: Vec<Barrier>,
		serial: u32,
	},
	Enable {
		handle: String,
		session_handle: String,
		app_id: String,
		options: Options,
	},
	Disable {
		handle: String,
		session_handle: String,
		app_id: String,
		options: Options,
	},
	Release {
		handle: String,
		session_handle: String,
		app_id: String,
		options: Options,
	},
}

impl BackendCall {
	/// Backend method name.
	pub fn method(&self) -> &'static str {
		match self {
			BackendCall::CreateSession { .. } => "CreateSession",
			BackendCall::GetZones { .. } => "GetZones",
			BackendCall::SetPointerBarriers { .. } => "SetPointerBarriers",
			BackendCall::Enable { .. } => "Enable",
			BackendCall::Disable { .. } => "Disable",
			BackendCall::Release { .. } => "Release",
		}
	}

	/// Request path the call is made on behalf of.
	pub fn handle(&self) -> &str {
		match self {
			BackendCall::CreateSession { handle, .. }
			| BackendCall::GetZones { handle, .. }
			| BackendCall::SetPointerBarriers { handle, .. }
			| BackendCall::Enable { handle, .. }
			| BackendCall::Disable { handle, .. }
			| BackendCall::Release { handle, .. } => handle,
		}
	}

	pub fn session_handle(&self) -> &str {
		match self {
			BackendCall::CreateSession { session_handle, .. }
			| BackendCall::GetZones { session_handle, .. }
			| BackendCall::SetPointerBarriers { session_handle, .. }
			| BackendCall::Enable { session_handle, .. }
			| BackendCall::Disable { session_handle, .. }
			| BackendCall::Release { session_handle, .. } => session_handle,
		}
	}

	/// Options forwarded to the backend (already filtered).
	pub fn options(&self) -> &Options {
		match self {
			BackendCall::CreateSession { options, .. }
			| BackendCall::GetZones { options, .. }
			| BackendCall::SetPointerBarriers { options, .. }
			| BackendCall::Enable { options, .. }
			| BackendCall::Disable { options, .. }
			| BackendCall::Release { options, .. } => options,
		}
	}

	/// JSON-RPC params object.
	pub fn params(&self) -> Value {
		match self {
			BackendCall::CreateSession {
				handle,
				session_handle,
				app_id,
				parent_window,
				options,
			} => json!({
				"handle": handle,
				"session_handle": session_handle,
				"app_id": app_id,
				"parent_window": parent_window,
				"options": options,
			}),
			BackendCall::SetPointerBarriers {
				handle,
				session_handle,
				app_id,
				options,
				barriers,
				serial,
			} => json!({
				"handle": handle,
				"session_handle": session_handle,
				"app_id": app_id,
				"options": options,
				"barriers": barriers,
				"serial": serial,
			}),
			BackendCall::GetZones {
				handle,
				session_handle,
				app_id,
				options,
			}
			| BackendCall::Enable {
				handle,
				session_handle,
				app_id,
				options,
			}
			| BackendCall::Disable {
				handle,
				session_handle,
				app_id,
				options,
			}
			| BackendCall::Release {
				handle,
				session_handle,
				app_id,
				options,
			} => json!({
				"handle": handle,
				"session_handle": session_handle,
				"app_id": app_id,
				"options": options,
			}),
		}
	}
}

/// Event emitted by a backend object (a session handle).
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEvent {
	pub session_handle: String,
	pub member: String,
	pub details: Options,
}

impl From<RpcEvent> for BackendEvent {
	fn from(event: RpcEvent) -> Self {
		let details = match event.params {
			Value::Object(details) => details,
			_ => Options::new(),
		};
		Self {
			session_handle: event.guid,
			member: event.method,
			details,
		}
	}
}

/// Out-of-process backend implementation.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Prepares the backend-side counterpart of the request at `handle`.
	///
	/// Fails when the backend cannot be reached; nothing is exported then.
	fn open_request(&self, handle: &str) -> Result<(), BackendError>;

	/// Performs one request-style call and waits for its reply.
	async fn call(&self, call: BackendCall) -> Result<BackendReply, BackendError>;

	/// Tells the backend the caller cancelled the request at `handle`.
	async fn close_request(&self, handle: &str) -> Result<(), BackendError>;

	/// Tells the backend to release the session at `session_handle`.
	async fn close_session(&self, session_handle: &str) -> Result<(), BackendError>;
}

/// Backend-side pending-call handle held by a request.
#[derive(Clone)]
pub struct ImplRequest {
	backend: Arc<dyn Backend>,
	handle: String,
}

impl ImplRequest {
	/// Opens the backend counterpart of `handle`.
	pub fn open(backend: &Arc<dyn Backend>, handle: &str) -> Result<Self, BackendError> {
		backend.open_request(handle)?;
		Ok(Self {
			backend: Arc::clone(backend),
			handle: handle.to_string(),
		})
	}

	/// Sends the `Close` notification without waiting for it.
	pub fn close(self) {
		spawn_detached("close backend request", async move {
			if let Err(err) = self.backend.close_request(&self.handle).await {
				debug!(target = "inport.backend", handle = %self.handle, error = %err, "backend request close failed");
			}
		});
	}
}

impl std::fmt::Debug for ImplRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ImplRequest").field("handle", &self.handle).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn params_carry_barriers_and_serial() {
		let call = BackendCall::SetPointerBarriers {
			handle: "/r/1".to_string(),
			session_handle: "/s/1".to_string(),
			app_id: "org.example.App".to_string(),
			options: Options::new(),
			barriers: vec![Barrier::new(1, (0, 0, 0, 100))],
			serial: 5,
		};
		let params = call.params();
		assert_eq!(call.method(), "SetPointerBarriers");
		assert_eq!(params["serial"], 5);
		assert_eq!(params["barriers"][0]["barrier_id"], 1);
		assert_eq!(params["barriers"][0]["position"], json!([0, 0, 0, 100]));
	}

	#[test]
	fn rpc_events_map_to_session_events() {
		let event = BackendEvent::from(RpcEvent {
			guid: "/s/1".to_string(),
			method: "Activated".to_string(),
			params: json!({"activation_id": 2}),
		});
		assert_eq!(event.session_handle, "/s/1");
		assert_eq!(event.member, "Activated");
		assert_eq!(event.details["activation_id"], 2);

		let bare = BackendEvent::from(RpcEvent {
			guid: "/s/1".to_string(),
			method: "Closed".to_string(),
			params: Value::Null,
		});
		assert!(bare.details.is_empty());
	}

	#[test]
	fn accessors_cover_every_variant() {
		let call = BackendCall::Release {
			handle: "/r/2".to_string(),
			session_handle: "/s/2".to_string(),
			app_id: String::new(),
			options: Options::new(),
		};
		assert_eq!(call.handle(), "/r/2");
		assert_eq!(call.session_handle(), "/s/2");
		assert!(call.options().is_empty());
		assert_eq!(call.params()["app_id"], "");
	}
}
