//! Option dictionaries (`a{sv}` on the original bus) and their typed keys.

use serde_json::{Map, Value};

/// A caller- or backend-supplied option dictionary.
pub type Options = Map<String, Value>;

/// Option key naming the caller's chosen request token.
pub const HANDLE_TOKEN: &str = "handle_token";

/// Option key naming the caller's chosen session token.
pub const SESSION_HANDLE_TOKEN: &str = "session_handle_token";

/// Expected value type of an allow-listed option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
	/// Unsigned 32-bit integer.
	U32,
	/// Two-element array of numbers (`(dd)`).
	DoublePair,
}

impl OptionKind {
	/// Returns `true` when `value` has this kind.
	pub fn matches(self, value: &Value) -> bool {
		match self {
			OptionKind::U32 => value.as_u64().is_some_and(|v| u32::try_from(v).is_ok()),
			OptionKind::DoublePair => value
				.as_array()
				.is_some_and(|pair| pair.len() == 2 && pair.iter().all(Value::is_number)),
		}
	}

	/// Short type signature used in error messages.
	pub fn signature(self) -> &'static str {
		match self {
			OptionKind::U32 => "u",
			OptionKind::DoublePair => "(dd)",
		}
	}
}

/// One entry of a per-operation option allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionKey {
	pub name: &'static str,
	pub kind: OptionKind,
}

impl OptionKey {
	pub const fn new(name: &'static str, kind: OptionKind) -> Self {
		Self { name, kind }
	}
}

/// Reads a string option, ignoring values of other types.
pub fn lookup_str<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
	options.get(key).and_then(Value::as_str)
}

/// Reads a `u32` option, ignoring values of other types or out of range.
pub fn lookup_u32(options: &Options, key: &str) -> Option<u32> {
	options.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}
