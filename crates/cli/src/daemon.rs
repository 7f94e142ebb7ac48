//! Caller-facing Unix socket server.
//!
//! Each accepted connection is one bus peer with a unique sender name
//! (`:1.N`). Lines are [`ClientMessage`]s; every call gets exactly one
//! `reply` or `error` line, and signals emitted for the sender are written to
//! the same stream, never ahead of the reply to the call that caused them.
//! When the peer hangs up, everything it owns is torn down.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, bail};
use inport::{AppInfoResolver, Backend, Caller, EisEndpoint, Portal, ProcAppResolver, Reply, RpcBackend, SignalSink, StaticLockdown};
use inport_protocol::rpc::RpcEvent;
use inport_protocol::{ClientMessage, ServerMessage, Signal};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::fdpass;

/// Bus error name for lines that are not a valid call.
const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// One line queued for a peer, with the descriptor it carries.
#[derive(Debug)]
pub struct Outgoing {
	pub message: ServerMessage,
	pub fd: Option<OwnedFd>,
}

impl Outgoing {
	fn plain(message: ServerMessage) -> Self {
		Self { message, fd: None }
	}
}

/// Write queue of one peer.
///
/// While a call of the peer is being dispatched, its signals are held back
/// so the reply to the call is always written first.
#[derive(Debug)]
struct PeerQueue {
	tx: mpsc::UnboundedSender<Outgoing>,
	held: Option<Vec<Outgoing>>,
}

/// Routes emitted signals to the connection of their destination.
#[derive(Debug, Default)]
pub struct SignalRouter {
	peers: Mutex<HashMap<String, PeerQueue>>,
}

impl SignalRouter {
	pub fn attach(&self, sender: &str, tx: mpsc::UnboundedSender<Outgoing>) {
		self.peers.lock().insert(sender.to_string(), PeerQueue { tx, held: None });
	}

	pub fn detach(&self, sender: &str) {
		self.peers.lock().remove(sender);
	}

	pub fn peer_count(&self) -> usize {
		self.peers.lock().len()
	}

	/// Holds back signals for `sender` until [`SignalRouter::reply`].
	pub fn hold(&self, sender: &str) {
		if let Some(peer) = self.peers.lock().get_mut(sender) {
			peer.held.get_or_insert_with(Vec::new);
		}
	}

	/// Queues the reply to the call in flight, then the signals held back
	/// while it was dispatched.
	///
	/// Returns `false` once the peer's writer is gone.
	pub fn reply(&self, sender: &str, outgoing: Outgoing) -> bool {
		let mut peers = self.peers.lock();
		let Some(peer) = peers.get_mut(sender) else {
			return false;
		};
		if peer.tx.send(outgoing).is_err() {
			return false;
		}
		for held in peer.held.take().unwrap_or_default() {
			if peer.tx.send(held).is_err() {
				return false;
			}
		}
		true
	}
}

impl SignalSink for SignalRouter {
	fn emit(&self, destination: &str, path: &str, signal: Signal) {
		let mut peers = self.peers.lock();
		let Some(peer) = peers.get_mut(destination) else {
			debug!(target = "inport.daemon", destination, path, "dropping signal for departed peer");
			return;
		};
		let outgoing = Outgoing::plain(ServerMessage::Signal {
			path: path.to_string(),
			signal,
		});
		match &mut peer.held {
			Some(held) => held.push(outgoing),
			None => {
				let _ = peer.tx.send(outgoing);
			}
		}
	}
}

pub struct Daemon {
	listener: UnixListener,
	socket_path: PathBuf,
	portal: Arc<Portal>,
	router: Arc<SignalRouter>,
	resolver: Arc<dyn AppInfoResolver>,
	next_sender: AtomicU64,
}

impl Daemon {
	/// Binds the caller socket and builds the broker around `backend`.
	pub async fn bind(settings: &Settings, backend: Arc<dyn Backend>) -> anyhow::Result<Self> {
		let listener = bind_socket(&settings.socket_path).await?;
		let router = Arc::new(SignalRouter::default());
		let portal = Portal::new(
			router.clone(),
			backend,
			Arc::new(StaticLockdown {
				disable_emulated_input: settings.disable_emulated_input,
			}),
			EisEndpoint::at(&settings.eis_socket_path),
		);

		info!(target = "inport.daemon", socket = %settings.socket_path.display(), "listening");
		Ok(Self {
			listener,
			socket_path: settings.socket_path.clone(),
			portal: Arc::new(portal),
			router,
			resolver: Arc::new(ProcAppResolver::new()),
			next_sender: AtomicU64::new(1),
		})
	}

	pub fn with_resolver(mut self, resolver: Arc<dyn AppInfoResolver>) -> Self {
		self.resolver = resolver;
		self
	}

	pub fn portal(&self) -> &Arc<Portal> {
		&self.portal
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	/// Accepts peers until the listener fails.
	pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
		loop {
			let (stream, _) = self.listener.accept().await.context("Failed to accept caller connection")?;
			let daemon = Arc::clone(&self);
			tokio::spawn(async move { daemon.serve_peer(stream).await });
		}
	}

	async fn serve_peer(&self, stream: UnixStream) {
		let sender = format!(":1.{}", self.next_sender.fetch_add(1, Ordering::Relaxed));
		let pid = stream
			.peer_cred()
			.ok()
			.and_then(|cred| cred.pid())
			.and_then(|pid| u32::try_from(pid).ok());
		let caller = Caller::new(sender.clone(), self.resolver.resolve(&sender, pid));
		info!(target = "inport.daemon", sender = %caller.sender, app_id = %caller.app_id, ?pid, "peer connected");

		let (reader, writer) = stream.into_split();
		let (tx, rx) = mpsc::unbounded_channel();
		self.router.attach(&sender, tx.clone());
		let writer_task = tokio::spawn(write_loop(writer, rx, sender.clone()));
		let _ = tx.send(Outgoing::plain(ServerMessage::Hello { sender: sender.clone() }));

		let mut lines = BufReader::new(reader).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) if line.trim().is_empty() => continue,
				Ok(Some(line)) => {
					self.router.hold(&sender);
					let outgoing = self.handle_line(&caller, &line).await;
					if !self.router.reply(&sender, outgoing) {
						break;
					}
				}
				Ok(None) => break,
				Err(err) => {
					warn!(target = "inport.daemon", sender = %sender, error = %err, "peer read failed");
					break;
				}
			}
		}

		self.router.detach(&sender);
		self.portal.disconnect(&sender);
		drop(tx);
		let _ = writer_task.await;
		info!(target = "inport.daemon", sender = %sender, "peer disconnected");
	}

	async fn handle_line(&self, caller: &Caller, line: &str) -> Outgoing {
		let message: ClientMessage = match serde_json::from_str(line) {
			Ok(message) => message,
			Err(err) => {
				debug!(target = "inport.daemon", sender = %caller.sender, error = %err, "malformed call");
				return Outgoing::plain(ServerMessage::Error {
					serial: serial_hint(line),
					name: INVALID_ARGS.to_string(),
					message: err.to_string(),
				});
			}
		};

		let serial = message.serial;
		match self.portal.handle(caller, message.call).await {
			Ok(Reply::Handle(handle)) => Outgoing::plain(ServerMessage::Reply {
				serial,
				handle: Some(handle),
				fd: None,
			}),
			Ok(Reply::Fd(fd)) => Outgoing {
				message: ServerMessage::Reply {
					serial,
					handle: None,
					fd: Some(0),
				},
				fd: Some(fd),
			},
			Ok(Reply::Done) => Outgoing::plain(ServerMessage::Reply {
				serial,
				handle: None,
				fd: None,
			}),
			Err(err) => {
				debug!(target = "inport.daemon", sender = %caller.sender, serial, error = %err, "call failed");
				Outgoing::plain(ServerMessage::Error {
					serial,
					name: err.bus_name().to_string(),
					message: err.to_string(),
				})
			}
		}
	}
}

/// Best-effort serial of a line that failed to parse as a call.
fn serial_hint(line: &str) -> u32 {
	serde_json::from_str::<serde_json::Value>(line)
		.ok()
		.and_then(|value| value.get("serial").and_then(serde_json::Value::as_u64))
		.and_then(|serial| u32::try_from(serial).ok())
		.unwrap_or(0)
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outgoing>, sender: String) {
	while let Some(outgoing) = rx.recv().await {
		let mut line = match serde_json::to_vec(&outgoing.message) {
			Ok(line) => line,
			Err(err) => {
				warn!(target = "inport.daemon", sender = %sender, error = %err, "failed to encode message");
				continue;
			}
		};
		line.push(b'\n');

		let written = match &outgoing.fd {
			Some(fd) => fdpass::send_with_fd(&mut writer, &line, fd).await,
			None => writer.write_all(&line).await,
		};
		if let Err(err) = written {
			debug!(target = "inport.daemon", sender = %sender, error = %err, "peer write failed");
			break;
		}
	}
}

/// Binds `path`, replacing a stale socket left by a previous run.
async fn bind_socket(path: &Path) -> anyhow::Result<UnixListener> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
	}
	if path.exists() {
		if UnixStream::connect(path).await.is_ok() {
			bail!("another broker is already listening on {}", path.display());
		}
		std::fs::remove_file(path).with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
	}
	UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
}

/// Relays backend events into the broker until the backend goes away.
pub async fn pump_backend_events(portal: Arc<Portal>, mut events: mpsc::UnboundedReceiver<RpcEvent>) {
	while let Some(event) = events.recv().await {
		portal.handle_backend_event(event.into());
	}
	warn!(target = "inport.daemon", "backend connection closed; new requests will fail");
}

/// Connects the backend, binds the caller socket and serves until Ctrl-C.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
	let (backend, events) = RpcBackend::connect(&settings.backend_socket_path)
		.await
		.with_context(|| format!("Failed to connect to backend at {}", settings.backend_socket_path.display()))?;
	let daemon = Arc::new(Daemon::bind(&settings, backend).await?);
	tokio::spawn(pump_backend_events(Arc::clone(daemon.portal()), events));

	let result = tokio::select! {
		result = Arc::clone(&daemon).run() => result,
		signal = tokio::signal::ctrl_c() => {
			signal.context("Failed to listen for shutdown signal")?;
			info!(target = "inport.daemon", "shutting down");
			Ok(())
		}
	};

	if let Err(err) = std::fs::remove_file(daemon.socket_path()) {
		debug!(target = "inport.daemon", error = %err, "socket cleanup failed");
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use inport_protocol::ResponseCode;

	#[test]
	fn serial_hint_reads_serial_from_bad_calls() {
		assert_eq!(serial_hint(r#"{"serial": 12, "method": "Bogus"}"#), 12);
		assert_eq!(serial_hint("not json"), 0);
		assert_eq!(serial_hint(r#"{"serial": -1}"#), 0);
	}

	#[tokio::test]
	async fn router_drops_signals_for_unknown_peers() {
		let router = SignalRouter::default();
		let (tx, mut rx) = mpsc::unbounded_channel();
		router.attach(":1.1", tx);

		router.emit(":1.2", "/p", Signal::Closed { details: Default::default() });
		router.emit(":1.1", "/p", Signal::Closed { details: Default::default() });

		let outgoing = rx.recv().await.unwrap();
		assert!(matches!(outgoing.message, ServerMessage::Signal { ref path, .. } if path == "/p"));
		assert!(rx.try_recv().is_err());

		router.detach(":1.1");
		assert_eq!(router.peer_count(), 0);
	}

	#[tokio::test]
	async fn signals_wait_for_the_reply_of_the_call_in_flight() {
		let router = SignalRouter::default();
		let (tx, mut rx) = mpsc::unbounded_channel();
		router.attach(":1.1", tx);

		router.hold(":1.1");
		router.emit(
			":1.1",
			"/request/t",
			Signal::Response {
				code: ResponseCode::Success,
				results: Default::default(),
			},
		);
		assert!(rx.try_recv().is_err());

		let reply = Outgoing::plain(ServerMessage::Reply {
			serial: 4,
			handle: Some("/request/t".to_string()),
			fd: None,
		});
		assert!(router.reply(":1.1", reply));
		assert!(matches!(rx.try_recv().unwrap().message, ServerMessage::Reply { serial: 4, .. }));
		assert!(matches!(rx.try_recv().unwrap().message, ServerMessage::Signal { ref path, .. } if path == "/request/t"));

		// Released: later signals go straight through.
		router.emit(":1.1", "/p", Signal::Closed { details: Default::default() });
		assert!(matches!(rx.try_recv().unwrap().message, ServerMessage::Signal { ref path, .. } if path == "/p"));
		assert!(!router.reply(":1.9", Outgoing::plain(ServerMessage::Hello { sender: ":1.9".to_string() })));
	}

	#[tokio::test]
	async fn stale_socket_is_replaced() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested/bus.sock");
		drop(bind_socket(&path).await.unwrap());
		assert!(path.exists());
		let _listener = bind_socket(&path).await.unwrap();
	}

	#[tokio::test]
	async fn live_socket_is_not_stolen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bus.sock");
		let _listener = bind_socket(&path).await.unwrap();
		assert!(bind_socket(&path).await.is_err());
	}
}
