//! Broker entry point: routes every caller method to its front door.

use std::os::fd::OwnedFd;
use std::sync::Arc;

use inport_protocol::PortalCall;
use tracing::debug;

use crate::backend::{Backend, BackendEvent};
use crate::bus::{BusConnection, SignalSink};
use crate::caller::Caller;
use crate::emulated_input::{EisEndpoint, EmulatedInput, Lockdown};
use crate::error::{PortalError, Result};
use crate::input_capture::{InputCapture, InputCaptureCall};
use crate::session::SessionRegistry;

/// Successful synchronous result of a call.
#[derive(Debug)]
pub enum Reply {
	/// Path of the request that will carry the `Response`.
	Handle(String),
	/// Descriptor handed to the caller (`Connect`).
	Fd(OwnedFd),
	/// No return value.
	Done,
}

/// Both interfaces over one bus connection and session registry.
#[derive(Debug)]
pub struct Portal {
	connection: Arc<BusConnection>,
	sessions: Arc<SessionRegistry>,
	input_capture: InputCapture,
	emulated_input: EmulatedInput,
}

impl Portal {
	pub fn new(sink: Arc<dyn SignalSink>, backend: Arc<dyn Backend>, lockdown: Arc<dyn Lockdown>, endpoint: EisEndpoint) -> Self {
		let connection = Arc::new(BusConnection::new(sink));
		let sessions = Arc::new(SessionRegistry::new());
		Self {
			input_capture: InputCapture::new(backend, Arc::clone(&connection), Arc::clone(&sessions)),
			emulated_input: EmulatedInput::new(lockdown, endpoint, Arc::clone(&connection)),
			connection,
			sessions,
		}
	}

	pub fn connection(&self) -> &Arc<BusConnection> {
		&self.connection
	}

	pub fn sessions(&self) -> &Arc<SessionRegistry> {
		&self.sessions
	}

	pub fn input_capture(&self) -> &InputCapture {
		&self.input_capture
	}

	pub fn emulated_input(&self) -> &EmulatedInput {
		&self.emulated_input
	}

	/// Handles one caller method.
	pub async fn handle(&self, caller: &Caller, call: PortalCall) -> Result<Reply> {
		debug!(target = "inport.portal", sender = %caller.sender, method = call.method(), "call");
		let capture = |call| self.input_capture.dispatch(caller, call).map(Reply::Handle);

		match call {
			PortalCall::CreateSession { parent_window, options } => capture(InputCaptureCall::CreateSession { parent_window, options }),
			PortalCall::GetZones { session_handle, options } => capture(InputCaptureCall::GetZones { session_handle, options }),
			PortalCall::SetPointerBarriers {
				session_handle,
				options,
				barriers,
				serial,
			} => capture(InputCaptureCall::SetPointerBarriers {
				session_handle,
				options,
				barriers,
				serial,
			}),
			PortalCall::Enable { session_handle, options } => capture(InputCaptureCall::Enable { session_handle, options }),
			PortalCall::Disable { session_handle, options } => capture(InputCaptureCall::Disable { session_handle, options }),
			PortalCall::Release { session_handle, options } => capture(InputCaptureCall::Release { session_handle, options }),
			PortalCall::EmulateInput { options } => self.emulated_input.emulate_input(caller, &options).map(Reply::Handle),
			PortalCall::Connect { options } => self.emulated_input.connect(caller, &options).await.map(Reply::Fd),
			PortalCall::Close { handle } => self.close_request(caller, &handle).map(|()| Reply::Done),
			PortalCall::CloseSession { session_handle } => self
				.input_capture
				.close_session(caller, &session_handle)
				.map(|()| Reply::Done),
		}
	}

	/// `Close` on a pending request by its owner.
	pub fn close_request(&self, caller: &Caller, handle: &str) -> Result<()> {
		let request = self
			.connection
			.lookup(handle)
			.filter(|request| request.sender() == caller.sender)
			.ok_or_else(|| PortalError::AccessDenied("Invalid request".to_string()))?;
		request.close();
		Ok(())
	}

	pub fn handle_backend_event(&self, event: BackendEvent) {
		self.input_capture.handle_backend_event(event);
	}

	/// Tears down everything `sender` owns after it left the bus.
	pub fn disconnect(&self, sender: &str) {
		let requests = self.connection.exported_by(sender);
		debug!(target = "inport.portal", sender, requests = requests.len(), "caller gone");
		for request in requests {
			request.close();
		}
		self.sessions.close_sender(sender);
	}
}
