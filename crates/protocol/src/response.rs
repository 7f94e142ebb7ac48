//! Terminal response codes carried by every `Response` signal.

use serde::{Deserialize, Serialize};

/// Outcome code of a request, as delivered in its `Response` signal.
///
/// On the wire this is a bare `u32`: `0` success, `1` cancelled by the user
/// or caller, `2` any other failure. Unknown codes coming from a backend are
/// folded into [`ResponseCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum ResponseCode {
	Success,
	Cancelled,
	Other,
}

impl ResponseCode {
	/// Returns `true` for [`ResponseCode::Success`].
	pub fn is_success(self) -> bool {
		self == ResponseCode::Success
	}
}

impl From<ResponseCode> for u32 {
	fn from(code: ResponseCode) -> Self {
		match code {
			ResponseCode::Success => 0,
			ResponseCode::Cancelled => 1,
			ResponseCode::Other => 2,
		}
	}
}

impl From<u32> for ResponseCode {
	fn from(code: u32) -> Self {
		match code {
			0 => ResponseCode::Success,
			1 => ResponseCode::Cancelled,
			_ => ResponseCode::Other,
		}
	}
}

impl std::fmt::Display for ResponseCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ResponseCode::Success => write!(f, "success"),
			ResponseCode::Cancelled => write!(f, "cancelled"),
			ResponseCode::Other => write!(f, "other"),
		}
	}
}
