//! JSON-RPC connection to the backend.
//!
//! Correlates broker calls with backend responses and forwards backend
//! events:
//!
//! 1. `send_message` allocates an id, parks a oneshot sender under it and
//!    writes the request through the transport.
//! 2. `run` reads inbound messages; a message with an `id` completes the
//!    parked sender, one without is forwarded as an [`RpcEvent`].
//! 3. When the transport ends, every parked call fails with
//!    [`BackendError::ChannelClosed`] and later calls fail immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use inport_protocol::rpc::{RpcErrorPayload, RpcEvent, RpcMessage, RpcRequest};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::error::BackendError;
use crate::transport::{Transport, TransportParts, TransportReceiver};

type Callback = oneshot::Sender<Result<Value, BackendError>>;

/// JSON-RPC connection over a [`TransportParts`].
pub struct Connection {
	last_id: AtomicU32,
	callbacks: Mutex<HashMap<u32, Callback>>,
	sender: tokio::sync::Mutex<Box<dyn Transport>>,
	inbound: Mutex<Option<(Box<dyn TransportReceiver>, mpsc::UnboundedReceiver<Value>)>>,
	events: mpsc::UnboundedSender<RpcEvent>,
	closed: AtomicBool,
}

impl Connection {
	/// Creates a connection and the receiver of backend events.
	pub fn new(parts: TransportParts) -> (Self, mpsc::UnboundedReceiver<RpcEvent>) {
		let (events, events_rx) = mpsc::unbounded_channel();
		let connection = Self {
			last_id: AtomicU32::new(0),
			callbacks: Mutex::new(HashMap::new()),
			sender: tokio::sync::Mutex::new(parts.sender),
			inbound: Mutex::new(Some((parts.receiver, parts.message_rx))),
			events,
			closed: AtomicBool::new(false),
		};
		(connection, events_rx)
	}

	/// `true` once the transport has ended.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a call to `guid` and waits for its result.
	pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value, BackendError> {
		if self.is_closed() {
			return Err(BackendError::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);

		let request = RpcRequest {
			id,
			guid: guid.to_string(),
			method: method.to_string(),
			params,
		};
		trace!(target = "inport.backend", id, guid, method, "sending");

		let sent = match serde_json::to_value(&request) {
			Ok(value) => self.sender.lock().await.send(value).await,
			Err(err) => Err(err.into()),
		};
		if let Err(err) = sent {
			self.callbacks.lock().remove(&id);
			return Err(err);
		}

		rx.await.map_err(|_| BackendError::ChannelClosed)?
	}

	/// Runs the inbound loop until the transport ends. Call once.
	pub async fn run(&self) {
		let Some((receiver, mut message_rx)) = self.inbound.lock().take() else {
			warn!(target = "inport.backend", "connection loop already running");
			return;
		};

		let transport = tokio::spawn(async move {
			if let Err(err) = receiver.run().await {
				error!(target = "inport.backend", error = %err, "backend transport failed");
			}
		});

		while let Some(value) = message_rx.recv().await {
			match serde_json::from_value::<RpcMessage>(value) {
				Ok(message) => {
					if let Err(err) = self.dispatch(message) {
						warn!(target = "inport.backend", error = %err, "dropping backend message");
					}
				}
				Err(err) => warn!(target = "inport.backend", error = %err, "unparseable backend message"),
			}
		}

		self.closed.store(true, Ordering::SeqCst);
		// Dropping the parked senders fails their calls with ChannelClosed.
		self.callbacks.lock().clear();
		debug!(target = "inport.backend", "backend connection closed");
		let _ = transport.await;
	}

	fn dispatch(&self, message: RpcMessage) -> Result<(), BackendError> {
		match message {
			RpcMessage::Response(response) => {
				let callback = self
					.callbacks
					.lock()
					.remove(&response.id)
					.ok_or_else(|| BackendError::Protocol(format!("no pending call with id {}", response.id)))?;

				let result = match response.error {
					Some(wrapper) => Err(remote_error(wrapper.error)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
				Ok(())
			}
			RpcMessage::Event(event) => {
				trace!(target = "inport.backend", guid = %event.guid, method = %event.method, "event");
				self.events.send(event).map_err(|_| BackendError::Protocol("event receiver dropped".to_string()))
			}
		}
	}
}

fn remote_error(payload: RpcErrorPayload) -> BackendError {
	BackendError::Remote {
		name: payload.name,
		message: payload.message,
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("pending", &self.callbacks.lock().len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::fake::FakeTransportBuilder;
	use serde_json::json;
	use std::sync::Arc;

	fn start() -> (Arc<Connection>, mpsc::UnboundedReceiver<RpcEvent>, crate::transport::fake::FakeTransportController) {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let (connection, events) = Connection::new(parts);
		let connection = Arc::new(connection);
		tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});
		(connection, events, controller)
	}

	#[tokio::test]
	async fn responses_correlate_out_of_order() {
		let (connection, _events, controller) = start();

		let first = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.send_message("/r/a", "GetZones", json!({})).await }
		});
		let a = controller.next_sent().await.unwrap();
		let second = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.send_message("/r/b", "Enable", json!({})).await }
		});
		let b = controller.next_sent().await.unwrap();

		assert_eq!(a["guid"], "/r/a");
		assert_eq!(b["method"], "Enable");
		controller.inject_response(b["id"].as_u64().unwrap() as u32, json!({"which": "b"}));
		controller.inject_response(a["id"].as_u64().unwrap() as u32, json!({"which": "a"}));

		assert_eq!(first.await.unwrap().unwrap()["which"], "a");
		assert_eq!(second.await.unwrap().unwrap()["which"], "b");
	}

	#[tokio::test]
	async fn error_responses_become_remote_errors() {
		let (connection, _events, controller) = start();
		let call = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.send_message("/r/a", "Enable", json!({})).await }
		});
		let sent = controller.next_sent().await.unwrap();
		controller.inject_error(sent["id"].as_u64().unwrap() as u32, "org.freedesktop.DBus.Error.Failed", "nope");

		match call.await.unwrap() {
			Err(BackendError::Remote { name, message }) => {
				assert_eq!(name.as_deref(), Some("org.freedesktop.DBus.Error.Failed"));
				assert_eq!(message, "nope");
			}
			other => panic!("expected remote error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn events_are_forwarded() {
		let (_connection, mut events, controller) = start();
		controller.inject_event("/s/1", "Activated", json!({"activation_id": 3}));
		let event = events.recv().await.unwrap();
		assert_eq!(event.guid, "/s/1");
		assert_eq!(event.params["activation_id"], 3);
	}

	#[tokio::test]
	async fn pending_calls_fail_when_transport_ends() {
		let (connection, _events, controller) = start();
		let call = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.send_message("/r/a", "Enable", json!({})).await }
		});
		controller.next_sent().await.unwrap();
		controller.disconnect();

		assert!(matches!(call.await.unwrap(), Err(BackendError::ChannelClosed)));
		assert!(connection.is_closed());
		let late = connection.send_message("/r/b", "Enable", json!({})).await;
		assert!(matches!(late, Err(BackendError::ChannelClosed)));
	}
}
