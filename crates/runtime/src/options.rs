//! Per-operation option allow-lists.
//!
//! Caller options are never forwarded as-is: only allow-listed keys reach the
//! backend. Unknown keys are dropped silently; an allow-listed key with the
//! wrong value type fails the call.

use inport_protocol::{OptionKey, OptionKind, Options};

use crate::error::{PortalError, Result};

pub const CREATE_SESSION_OPTIONS: &[OptionKey] = &[OptionKey::new("capabilities", OptionKind::U32)];
pub const GET_ZONES_OPTIONS: &[OptionKey] = &[];
pub const SET_POINTER_BARRIERS_OPTIONS: &[OptionKey] = &[];
pub const ENABLE_OPTIONS: &[OptionKey] = &[];
pub const DISABLE_OPTIONS: &[OptionKey] = &[];
pub const RELEASE_OPTIONS: &[OptionKey] = &[
	OptionKey::new("activation_id", OptionKind::U32),
	OptionKey::new("cursor_position", OptionKind::DoublePair),
];

/// Copies the allow-listed entries of `options`.
pub fn filter_options(options: &Options, allowed: &[OptionKey]) -> Result<Options> {
	let mut filtered = Options::new();
	for key in allowed {
		let Some(value) = options.get(key.name) else {
			continue;
		};
		if !key.kind.matches(value) {
			return Err(PortalError::InvalidArgument(format!(
				"Expected type '{}' for option '{}'",
				key.kind.signature(),
				key.name
			)));
		}
		filtered.insert(key.name.to_string(), value.clone());
	}
	Ok(filtered)
}
