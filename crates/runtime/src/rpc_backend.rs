//! [`Backend`] over a JSON-RPC [`Connection`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use inport_protocol::rpc::{BackendReply, RpcEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::backend::{Backend, BackendCall};
use crate::connection::Connection;
use crate::error::BackendError;
use crate::transport::{TransportParts, UnixTransport};

/// Backend reached through a JSON-RPC connection.
#[derive(Debug)]
pub struct RpcBackend {
	connection: Arc<Connection>,
}

impl RpcBackend {
	/// Starts the connection loop on the current runtime.
	///
	/// Returns the backend and the stream of events it emits.
	pub fn start(parts: TransportParts) -> (Arc<Self>, mpsc::UnboundedReceiver<RpcEvent>) {
		let (connection, events) = Connection::new(parts);
		let connection = Arc::new(connection);
		tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});
		(Arc::new(Self { connection }), events)
	}

	/// Connects to the backend socket at `path` and starts it.
	pub async fn connect(path: impl AsRef<Path>) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RpcEvent>), BackendError> {
		let parts = UnixTransport::connect(path.as_ref()).await?;
		info!(target = "inport.backend", path = %path.as_ref().display(), "connected to backend");
		Ok(Self::start(parts))
	}
}

#[async_trait]
impl Backend for RpcBackend {
	fn open_request(&self, _handle: &str) -> Result<(), BackendError> {
		if self.connection.is_closed() {
			return Err(BackendError::ChannelClosed);
		}
		Ok(())
	}

	async fn call(&self, call: BackendCall) -> Result<BackendReply, BackendError> {
		let result = self.connection.send_message(call.handle(), call.method(), call.params()).await?;
		Ok(serde_json::from_value(result)?)
	}

	async fn close_request(&self, handle: &str) -> Result<(), BackendError> {
		self.connection.send_message(handle, "Close", json!({})).await.map(drop)
	}

	async fn close_session(&self, session_handle: &str) -> Result<(), BackendError> {
		self.connection.send_message(session_handle, "Close", json!({})).await.map(drop)
	}
}
