//! Payload types shared by the caller-facing and backend-facing channels.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
	/// Input device classes a capture session may grab.
	///
	/// Serialized as the raw bitmask; unknown bits are dropped on decode.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
	#[serde(from = "u32", into = "u32")]
	pub struct Capabilities: u32 {
		const KEYBOARD = 1;
		const POINTER = 2;
		const TOUCHSCREEN = 4;
	}
}

impl From<u32> for Capabilities {
	fn from(bits: u32) -> Self {
		Self::from_bits_truncate(bits)
	}
}

impl From<Capabilities> for u32 {
	fn from(capabilities: Capabilities) -> Self {
		capabilities.bits()
	}
}

/// A region of the desktop that input capture may be triggered from.
///
/// Serialized as the tuple `(width, height, x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32, i32, i32)", into = "(u32, u32, i32, i32)")]
pub struct Zone {
	pub width: u32,
	pub height: u32,
	pub x: i32,
	pub y: i32,
}

impl Zone {
	pub fn new(width: u32, height: u32, x: i32, y: i32) -> Self {
		Self { width, height, x, y }
	}
}

impl From<(u32, u32, i32, i32)> for Zone {
	fn from((width, height, x, y): (u32, u32, i32, i32)) -> Self {
		Self { width, height, x, y }
	}
}

impl From<Zone> for (u32, u32, i32, i32) {
	fn from(zone: Zone) -> Self {
		(zone.width, zone.height, zone.x, zone.y)
	}
}

/// Results of a successful `GetZones` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonesResults {
	pub serial: u32,
	pub zones: Vec<Zone>,
}

/// A pointer barrier line, `position = (x1, y1, x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barrier {
	pub barrier_id: u32,
	pub position: (i32, i32, i32, i32),
}

impl Barrier {
	pub fn new(barrier_id: u32, position: (i32, i32, i32, i32)) -> Self {
		Self { barrier_id, position }
	}

	/// `true` when the barrier is a vertical line (`x1 == x2`, `y1 != y2`).
	pub fn is_vertical(&self) -> bool {
		let (x1, y1, x2, y2) = self.position;
		x1 == x2 && y1 != y2
	}

	/// `true` when the barrier is a horizontal line (`y1 == y2`, `x1 != x2`).
	pub fn is_horizontal(&self) -> bool {
		let (x1, y1, x2, y2) = self.position;
		y1 == y2 && x1 != x2
	}
}

/// Results of a successful `CreateSession` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResults {
	pub capabilities: Capabilities,
	pub session_handle: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn zone_is_a_four_tuple_on_the_wire() {
		let value = serde_json::to_value(Zone::new(1920, 1080, 0, 0)).unwrap();
		assert_eq!(value, json!([1920, 1080, 0, 0]));
	}

	#[test]
	fn capabilities_truncate_unknown_bits() {
		let caps = Capabilities::from_bits_truncate(0xff);
		assert_eq!(caps, Capabilities::KEYBOARD | Capabilities::POINTER | Capabilities::TOUCHSCREEN);
		assert!(caps.contains(Capabilities::POINTER));
	}

	#[test]
	fn capabilities_travel_as_raw_bits() {
		let results = CreateSessionResults {
			capabilities: Capabilities::KEYBOARD | Capabilities::TOUCHSCREEN,
			session_handle: "/s".to_string(),
		};
		let value = serde_json::to_value(&results).unwrap();
		assert_eq!(value, json!({"capabilities": 5, "session_handle": "/s"}));

		let caps: Capabilities = serde_json::from_value(json!(0x13)).unwrap();
		assert_eq!(caps, Capabilities::KEYBOARD | Capabilities::POINTER);
		assert!(serde_json::from_value::<Capabilities>(json!("KEYBOARD")).is_err());
	}

	#[test]
	fn barrier_orientation() {
		assert!(Barrier::new(1, (0, 0, 0, 100)).is_vertical());
		assert!(Barrier::new(2, (0, 0, 100, 0)).is_horizontal());
		let diagonal = Barrier::new(3, (0, 0, 10, 10));
		assert!(!diagonal.is_vertical() && !diagonal.is_horizontal());
		let point = Barrier::new(4, (5, 5, 5, 5));
		assert!(!point.is_vertical() && !point.is_horizontal());
	}
}
