//! Input-capture front door.
//!
//! Every call is validated synchronously (caller, session ownership, session
//! kind, state, arguments, options, backend reachability) before a request is
//! exported. Only then is the backend call issued and the request path
//! returned; the outcome arrives later as the request's `Response`.

use std::sync::Arc;

use inport_protocol::{Barrier, INTERFACE_VERSION, OptionKey, Options, Signal};
use tracing::debug;

use crate::backend::{Backend, BackendCall, BackendEvent, ImplRequest};
use crate::barriers::validate_barriers;
use crate::bridge::PendingCall;
use crate::bus::BusConnection;
use crate::caller::Caller;
use crate::error::{PortalError, Result};
use crate::locked::LockedObject;
use crate::options::{
	CREATE_SESSION_OPTIONS, DISABLE_OPTIONS, ENABLE_OPTIONS, GET_ZONES_OPTIONS, RELEASE_OPTIONS, SET_POINTER_BARRIERS_OPTIONS,
	filter_options,
};
use crate::request::{Request, RequestState};
use crate::session::{Session, SessionContext, SessionData, SessionKind, SessionRegistry, SessionState};

/// One input-capture method call.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCaptureCall {
	CreateSession {
		parent_window: String,
		options: Options,
	},
	GetZones {
		session_handle: String,
		options: Options,
	},
	SetPointerBarriers {
		session_handle: String,
		options: Options,
		barriers: Vec<Barrier>,
		serial: u32,
	},
	Enable {
		session_handle: String,
		options: Options,
	},
	Disable {
		session_handle: String,
		options: Options,
	},
	Release {
		session_handle: String,
		options: Options,
	},
}

/// Session-scoped operations and their operation-specific arguments.
enum SessionOp {
	GetZones,
	SetPointerBarriers { barriers: Vec<Barrier>, serial: u32 },
	Enable,
	Disable,
	Release,
}

impl SessionOp {
	fn allowed_options(&self) -> &'static [OptionKey] {
		match self {
			SessionOp::GetZones => GET_ZONES_OPTIONS,
			SessionOp::SetPointerBarriers { .. } => SET_POINTER_BARRIERS_OPTIONS,
			SessionOp::Enable => ENABLE_OPTIONS,
			SessionOp::Disable => DISABLE_OPTIONS,
			SessionOp::Release => RELEASE_OPTIONS,
		}
	}

	/// State table plus argument checks.
	fn check(&self, data: &SessionData) -> Result<()> {
		match self {
			SessionOp::GetZones => data.state().check_open(),
			SessionOp::SetPointerBarriers { barriers, serial } => {
				data.state().check_open()?;
				validate_barriers(barriers, *serial, data.zones_serial())
			}
			SessionOp::Enable | SessionOp::Disable | SessionOp::Release => data.state().check_connected(),
		}
	}

	fn into_backend_call(self, handle: String, session_handle: String, app_id: String, options: Options) -> BackendCall {
		match self {
			SessionOp::GetZones => BackendCall::GetZones {
				handle,
				session_handle,
				app_id,
				options,
			},
			SessionOp::SetPointerBarriers { barriers, serial } => BackendCall::SetPointerBarriers {
				handle,
				session_handle,
				app_id,
				options,
				barriers,
				serial,
			},
			SessionOp::Enable => BackendCall::Enable {
				handle,
				session_handle,
				app_id,
				options,
			},
			SessionOp::Disable => BackendCall::Disable {
				handle,
				session_handle,
				app_id,
				options,
			},
			SessionOp::Release => BackendCall::Release {
				handle,
				session_handle,
				app_id,
				options,
			},
		}
	}
}

/// The input-capture interface.
#[derive(Clone)]
pub struct InputCapture {
	backend: Arc<dyn Backend>,
	connection: Arc<BusConnection>,
	sessions: Arc<SessionRegistry>,
}

impl InputCapture {
	pub fn new(backend: Arc<dyn Backend>, connection: Arc<BusConnection>, sessions: Arc<SessionRegistry>) -> Self {
		Self {
			backend,
			connection,
			sessions,
		}
	}

	pub fn version(&self) -> u32 {
		INTERFACE_VERSION
	}

	/// Handles one call; returns the request path on success.
	pub fn dispatch(&self, caller: &Caller, call: InputCaptureCall) -> Result<String> {
		match call {
			InputCaptureCall::CreateSession { parent_window, options } => self.create_session(caller, parent_window, &options),
			InputCaptureCall::GetZones { session_handle, options } => {
				self.session_call(caller, &session_handle, &options, SessionOp::GetZones)
			}
			InputCaptureCall::SetPointerBarriers {
				session_handle,
				options,
				barriers,
				serial,
			} => self.session_call(caller, &session_handle, &options, SessionOp::SetPointerBarriers { barriers, serial }),
			InputCaptureCall::Enable { session_handle, options } => self.session_call(caller, &session_handle, &options, SessionOp::Enable),
			InputCaptureCall::Disable { session_handle, options } => {
				self.session_call(caller, &session_handle, &options, SessionOp::Disable)
			}
			InputCaptureCall::Release { session_handle, options } => {
				self.session_call(caller, &session_handle, &options, SessionOp::Release)
			}
		}
	}

	fn session_context(&self) -> SessionContext {
		SessionContext {
			backend: Arc::clone(&self.backend),
			registry: Arc::clone(&self.sessions),
			connection: Arc::clone(&self.connection),
		}
	}

	fn create_session(&self, caller: &Caller, parent_window: String, caller_options: &Options) -> Result<String> {
		let request = Request::new(caller, caller_options)?;
		let mut request_state = request.lock();

		let options = filter_options(caller_options, CREATE_SESSION_OPTIONS)?;
		let session = Session::new(caller_options, &request, SessionKind::InputCapture, &self.session_context())?;

		if let Err(err) = self.open_and_export(&request, &mut request_state) {
			session.close(false);
			return Err(err);
		}

		let call = BackendCall::CreateSession {
			handle: request.id().to_string(),
			session_handle: session.id().to_string(),
			app_id: request.app_id().to_string(),
			parent_window,
			options,
		};
		PendingCall::new(Arc::clone(&request), Arc::clone(&session)).issue(&mut request_state, Arc::clone(&self.backend), call);

		debug!(target = "inport.session", request = %request.id(), session = %session.id(), "create session issued");
		Ok(request.id().to_string())
	}

	fn session_call(&self, caller: &Caller, session_handle: &str, caller_options: &Options, op: SessionOp) -> Result<String> {
		let request = Request::new(caller, caller_options)?;
		let mut request_state = request.lock();

		let session = self
			.sessions
			.acquire(session_handle, &request)
			.ok_or_else(|| PortalError::AccessDenied("Invalid session".to_string()))?;
		let data = session.lock();

		if session.kind() != &SessionKind::InputCapture {
			return Err(PortalError::invalid_session());
		}
		op.check(&data)?;
		let options = filter_options(caller_options, op.allowed_options())?;

		self.open_and_export(&request, &mut request_state)?;

		let call = op.into_backend_call(
			request.id().to_string(),
			session.id().to_string(),
			request.app_id().to_string(),
			options,
		);
		debug!(target = "inport.session", request = %request.id(), session = %session.id(), method = call.method(), "session call issued");
		PendingCall::new(Arc::clone(&request), Arc::clone(&session)).issue(&mut request_state, Arc::clone(&self.backend), call);

		Ok(request.id().to_string())
	}

	/// Opens the backend counterpart of `request`, then exports it.
	fn open_and_export(&self, request: &Arc<Request>, request_state: &mut RequestState) -> Result<()> {
		let impl_request = ImplRequest::open(&self.backend, request.id())?;
		if let Err(err) = request.export_locked(request_state, &self.connection) {
			impl_request.close();
			return Err(err.into());
		}
		request_state.set_impl_request(impl_request);
		Ok(())
	}

	/// `Close` on a session object by its owner.
	pub fn close_session(&self, caller: &Caller, session_handle: &str) -> Result<()> {
		let session = self
			.sessions
			.lookup(session_handle)
			.filter(|session| session.sender() == caller.sender)
			.ok_or_else(|| PortalError::AccessDenied("Invalid session".to_string()))?;
		session.close(false);
		Ok(())
	}

	/// Applies a backend-emitted session event.
	pub fn handle_backend_event(&self, event: BackendEvent) {
		let Some(session) = self.sessions.lookup(&event.session_handle) else {
			debug!(target = "inport.session", session = %event.session_handle, member = %event.member, "event for unknown session");
			return;
		};

		if event.member == "Closed" {
			session.close_from_backend();
			return;
		}

		let Some(signal) = Signal::from_session_event(&event.member, event.details) else {
			debug!(target = "inport.session", session = %session.id(), member = %event.member, "ignoring backend event");
			return;
		};

		let mut data = session.lock();
		if data.state() == SessionState::Closed {
			return;
		}
		match signal {
			Signal::Disabled { .. } if data.state() == SessionState::Enabled => data.transition(SessionState::Disabled),
			Signal::ZonesChanged { .. } => data.invalidate_zones(),
			_ => {}
		}
		session.emit(signal);
	}
}

impl std::fmt::Debug for InputCapture {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InputCapture").field("sessions", &self.sessions).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{RecordingSink, ScriptedBackend};
	use serde_json::json;

	fn front_door() -> (InputCapture, Arc<ScriptedBackend>, Arc<RecordingSink>) {
		let backend = Arc::new(ScriptedBackend::new());
		let sink = Arc::new(RecordingSink::default());
		let input_capture = InputCapture::new(
			backend.clone(),
			Arc::new(BusConnection::new(sink.clone())),
			Arc::new(SessionRegistry::new()),
		);
		(input_capture, backend, sink)
	}

	fn options(value: serde_json::Value) -> Options {
		value.as_object().cloned().unwrap()
	}

	#[tokio::test]
	async fn unknown_session_is_access_denied() {
		let (input_capture, backend, _) = front_door();
		let err = input_capture
			.dispatch(
				&Caller::new(":1.1", ""),
				InputCaptureCall::Enable {
					session_handle: "/org/freedesktop/portal/desktop/session/1_1/nope".to_string(),
					options: Options::new(),
				},
			)
			.unwrap_err();
		assert!(matches!(err, PortalError::AccessDenied(_)));
		assert!(backend.calls().is_empty());
		assert_eq!(input_capture.connection.exported_count(), 0);
	}

	#[tokio::test]
	async fn refused_backend_exports_nothing() {
		let (input_capture, backend, _) = front_door();
		backend.refuse_requests();
		let err = input_capture
			.dispatch(
				&Caller::new(":1.1", ""),
				InputCaptureCall::CreateSession {
					parent_window: String::new(),
					options: options(json!({"session_handle_token": "s"})),
				},
			)
			.unwrap_err();
		assert!(matches!(err, PortalError::Backend(_)));
		assert_eq!(input_capture.connection.exported_count(), 0);
		assert_eq!(input_capture.sessions.registered_count(), 0);
	}

	#[tokio::test]
	async fn wrong_session_kind_fails() {
		let (input_capture, _, _) = front_door();
		let caller = Caller::new(":1.1", "");
		let request = Request::new(&caller, &Options::new()).unwrap();
		let other = Session::new(
			&options(json!({"session_handle_token": "cast"})),
			&request,
			SessionKind::Other("screencast".to_string()),
			&input_capture.session_context(),
		)
		.unwrap();
		other.register_locked(&mut other.lock());

		let err = input_capture
			.dispatch(
				&caller,
				InputCaptureCall::GetZones {
					session_handle: other.id().to_string(),
					options: Options::new(),
				},
			)
			.unwrap_err();
		assert!(matches!(err, PortalError::Failed(ref m) if m == "Invalid session"));
	}

	#[tokio::test]
	async fn close_session_requires_owner() {
		let (input_capture, _, _) = front_door();
		let owner = Caller::new(":1.1", "");
		let request = Request::new(&owner, &Options::new()).unwrap();
		let session = Session::new(&Options::new(), &request, SessionKind::InputCapture, &input_capture.session_context()).unwrap();
		session.register_locked(&mut session.lock());

		assert!(input_capture.close_session(&Caller::new(":1.2", ""), session.id()).is_err());
		input_capture.close_session(&owner, session.id()).unwrap();
		assert_eq!(session.state(), SessionState::Closed);
	}
}
