//! Detached task spawning for completions and best-effort notifications.

use std::future::Future;

use tracing::warn;

/// Spawns `fut` on the current tokio runtime without keeping its handle.
///
/// Outside a runtime the work is dropped and logged; this only happens in
/// teardown paths after the runtime is gone.
pub(crate) fn spawn_detached<F>(what: &'static str, fut: F)
where
	F: Future<Output = ()> + Send + 'static,
{
	match tokio::runtime::Handle::try_current() {
		Ok(handle) => {
			handle.spawn(fut);
		}
		Err(_) => warn!(target = "inport.task", what, "no runtime; dropping detached task"),
	}
}
