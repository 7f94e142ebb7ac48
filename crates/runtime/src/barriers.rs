//! `SetPointerBarriers` argument validation.

use std::collections::HashSet;

use inport_protocol::Barrier;

use crate::error::{PortalError, Result};

/// Checks a barrier set against the zone serial the session last received.
///
/// Every barrier needs a non-zero id unique within the set and must be a
/// non-degenerate horizontal or vertical line. `serial` must match
/// `zones_serial`; barriers placed against zones the caller never queried
/// or against a superseded zone set are rejected.
pub fn validate_barriers(barriers: &[Barrier], serial: u32, zones_serial: Option<u32>) -> Result<()> {
	match zones_serial {
		None => return Err(invalid("GetZones must be called before SetPointerBarriers".to_string())),
		Some(current) if current != serial => {
			return Err(invalid(format!("Stale zone serial {serial}, current is {current}")));
		}
		Some(_) => {}
	}

	if barriers.is_empty() {
		return Err(invalid("No barriers given".to_string()));
	}

	let mut seen = HashSet::with_capacity(barriers.len());
	for barrier in barriers {
		if barrier.barrier_id == 0 {
			return Err(invalid("Barrier id 0 is reserved".to_string()));
		}
		if !seen.insert(barrier.barrier_id) {
			return Err(invalid(format!("Duplicate barrier id {}", barrier.barrier_id)));
		}
		if !barrier.is_horizontal() && !barrier.is_vertical() {
			return Err(invalid(format!(
				"Barrier {} is not a horizontal or vertical line",
				barrier.barrier_id
			)));
		}
	}
	Ok(())
}

fn invalid(message: String) -> PortalError {
	PortalError::InvalidArgument(message)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn edges() -> Vec<Barrier> {
		vec![Barrier::new(1, (0, 0, 0, 1079)), Barrier::new(2, (0, 1079, 1919, 1079))]
	}

	#[test]
	fn accepts_axis_aligned_barriers_with_current_serial() {
		assert!(validate_barriers(&edges(), 7, Some(7)).is_ok());
	}

	#[test]
	fn rejects_unqueried_or_stale_serial() {
		assert!(validate_barriers(&edges(), 7, None).is_err());
		let err = validate_barriers(&edges(), 6, Some(7)).unwrap_err();
		assert!(err.to_string().contains("Stale"));
	}

	#[test]
	fn rejects_bad_geometry_and_ids() {
		let cases = [
			vec![],
			vec![Barrier::new(0, (0, 0, 0, 10))],
			vec![Barrier::new(1, (0, 0, 0, 10)), Barrier::new(1, (5, 0, 5, 10))],
			vec![Barrier::new(1, (0, 0, 10, 10))],
			vec![Barrier::new(1, (3, 3, 3, 3))],
		];
		for barriers in cases {
			let err = validate_barriers(&barriers, 1, Some(1)).unwrap_err();
			assert!(matches!(err, PortalError::InvalidArgument(_)), "{barriers:?}");
		}
	}
}
