//! Object path derivation for requests and sessions.
//!
//! Paths are caller-derived so a caller can subscribe to a request's
//! `Response` before making the call:
//! `<prefix>/<escaped sender>/<token>`, where the sender `:1.42` escapes to
//! `1_42` and the token comes from the caller's options or is generated.

use std::sync::atomic::{AtomicU32, Ordering};

use inport_protocol::{REQUEST_PATH_PREFIX, SESSION_PATH_PREFIX};

static NEXT_TOKEN: AtomicU32 = AtomicU32::new(0);

/// Returns `true` for a non-empty token made of `[A-Za-z0-9_]`.
pub fn is_valid_token(token: &str) -> bool {
	!token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Generates a fresh token with the given prefix.
pub fn generate_token(prefix: &str) -> String {
	let n = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
	format!("{prefix}{n}")
}

/// Escapes a unique bus name into one path element.
pub fn escape_sender(sender: &str) -> String {
	sender.trim_start_matches(':').replace('.', "_")
}

pub fn request_path(sender: &str, token: &str) -> String {
	format!("{REQUEST_PATH_PREFIX}/{}/{token}", escape_sender(sender))
}

pub fn session_handle(sender: &str, token: &str) -> String {
	format!("{SESSION_PATH_PREFIX}/{}/{token}", escape_sender(sender))
}
