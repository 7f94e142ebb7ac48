//! Backend transports.
//!
//! A transport is split into a sending half and a receiving half so the
//! connection can write while its read loop runs on another task. Incoming
//! messages are parsed into JSON and forwarded on `message_rx`.
//!
//! * [`UnixTransport`]: line-delimited JSON over a Unix socket.
//! * [`fake::FakeTransportBuilder`]: in-memory transport for tests.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::BackendError;

/// Sending half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;
}

/// Receiving half of a transport; `run` reads until the peer goes away.
pub trait TransportReceiver: Send {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>>;
}

/// Both halves of a transport plus the stream of parsed inbound messages.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Line-delimited JSON over a Unix socket.
pub struct UnixTransport;

impl UnixTransport {
	/// Connects to the backend socket at `path`.
	pub async fn connect(path: impl AsRef<Path>) -> Result<TransportParts, BackendError> {
		let path = path.as_ref();
		let stream = UnixStream::connect(path)
			.await
			.map_err(|err| BackendError::Transport(format!("{}: {err}", path.display())))?;
		Ok(Self::from_stream(stream))
	}

	/// Wraps an already connected stream.
	pub fn from_stream(stream: UnixStream) -> TransportParts {
		let (read, write) = stream.into_split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		TransportParts {
			sender: Box::new(UnixSender { write }),
			receiver: Box::new(UnixReceiver { read, message_tx }),
			message_rx,
		}
	}
}

struct UnixSender {
	write: OwnedWriteHalf,
}

impl Transport for UnixSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
		Box::pin(async move {
			let mut line = serde_json::to_vec(&message)?;
			line.push(b'\n');
			self.write.write_all(&line).await?;
			self.write.flush().await?;
			Ok(())
		})
	}
}

struct UnixReceiver {
	read: OwnedReadHalf,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for UnixReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
		Box::pin(async move {
			let UnixReceiver { read, message_tx } = *self;
			let mut lines = BufReader::new(read).lines();
			while let Some(line) = lines.next_line().await? {
				if line.trim().is_empty() {
					continue;
				}
				match serde_json::from_str::<Value>(&line) {
					Ok(message) => {
						trace!(target = "inport.backend", %message, "received");
						if message_tx.send(message).is_err() {
							break;
						}
					}
					Err(err) => warn!(target = "inport.backend", error = %err, "dropping malformed backend line"),
				}
			}
			Ok(())
		})
	}
}

pub mod fake {
	//! In-memory transport for exercising the JSON-RPC layer without a
	//! backend process.
	//!
	//! ```ignore
	//! let (parts, controller) = FakeTransportBuilder::new().build();
	//! let (connection, _events) = Connection::new(parts);
	//! let connection = Arc::new(connection);
	//! tokio::spawn({
	//! 	let connection = Arc::clone(&connection);
	//! 	async move { connection.run().await }
	//! });
	//!
	//! let reply = connection.send_message("/r/1", "Enable", json!({}));
	//! controller.inject_response(0, json!({"response": 0}));
	//! ```

	use std::future::Future;
	use std::pin::Pin;
	use std::sync::Arc;

	use parking_lot::Mutex;
	use serde_json::{Value, json};
	use tokio::sync::mpsc;

	use super::{Transport, TransportParts, TransportReceiver};
	use crate::error::BackendError;

	/// Builds a fake transport and its controller.
	#[derive(Debug, Default)]
	pub struct FakeTransportBuilder {}

	impl FakeTransportBuilder {
		pub fn new() -> Self {
			Self {}
		}

		pub fn build(self) -> (TransportParts, FakeTransportController) {
			let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
			let (message_tx, message_rx) = mpsc::unbounded_channel();
			let (sent_tx, sent_rx) = mpsc::unbounded_channel();
			let sent = Arc::new(Mutex::new(Vec::new()));

			let parts = TransportParts {
				sender: Box::new(FakeSender {
					sent: Arc::clone(&sent),
					sent_tx,
				}),
				receiver: Box::new(FakeReceiver { inbound_rx, message_tx }),
				message_rx,
			};
			let controller = FakeTransportController {
				inbound_tx,
				sent,
				sent_rx: tokio::sync::Mutex::new(sent_rx),
			};
			(parts, controller)
		}
	}

	/// Injects backend messages and inspects what the broker sent.
	pub struct FakeTransportController {
		inbound_tx: mpsc::UnboundedSender<Value>,
		sent: Arc<Mutex<Vec<Value>>>,
		sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
	}

	impl FakeTransportController {
		/// Injects a raw message as if the backend had written it.
		pub fn inject(&self, message: Value) {
			let _ = self.inbound_tx.send(message);
		}

		pub fn inject_response(&self, id: u32, result: Value) {
			self.inject(json!({"id": id, "result": result}));
		}

		pub fn inject_error(&self, id: u32, name: &str, message: &str) {
			self.inject(json!({"id": id, "error": {"error": {"message": message, "name": name}}}));
		}

		pub fn inject_event(&self, guid: &str, method: &str, params: Value) {
			self.inject(json!({"guid": guid, "method": method, "params": params}));
		}

		/// Takes every message sent so far.
		pub fn take_sent(&self) -> Vec<Value> {
			std::mem::take(&mut *self.sent.lock())
		}

		/// Waits for the next message the broker sends.
		pub async fn next_sent(&self) -> Option<Value> {
			self.sent_rx.lock().await.recv().await
		}

		/// Simulates the backend going away.
		pub fn disconnect(self) {}
	}

	struct FakeSender {
		sent: Arc<Mutex<Vec<Value>>>,
		sent_tx: mpsc::UnboundedSender<Value>,
	}

	impl Transport for FakeSender {
		fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
			self.sent.lock().push(message.clone());
			let _ = self.sent_tx.send(message);
			Box::pin(async { Ok(()) })
		}
	}

	struct FakeReceiver {
		inbound_rx: mpsc::UnboundedReceiver<Value>,
		message_tx: mpsc::UnboundedSender<Value>,
	}

	impl TransportReceiver for FakeReceiver {
		fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
			Box::pin(async move {
				while let Some(message) = self.inbound_rx.recv().await {
					if self.message_tx.send(message).is_err() {
						break;
					}
				}
				Ok(())
			})
		}
	}
}
