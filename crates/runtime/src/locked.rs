//! Lock-owning base for requests and sessions.
//!
//! Every [`Request`](crate::request::Request) and
//! [`Session`](crate::session::Session) keeps its mutable fields inside a
//! [`Locked`] cell. Fields are only reachable through the guard, so reads and
//! writes always happen under the object's lock, and the guard releases it on
//! every exit path (early return, `?`, panic unwinding).
//!
//! # Lock Discipline
//!
//! * Locks are not reentrant. Code that already holds a guard passes the
//!   guarded state down (the `*_locked` methods) instead of locking again.
//! * When a request and a session are both held, the request is locked first.
//! * Guards are never held across an `.await`.

use parking_lot::{Mutex, MutexGuard};

/// Scoped guard over a locked object's state.
pub type Guard<'a, T> = MutexGuard<'a, T>;

/// Mutex-protected object state.
#[derive(Debug, Default)]
pub struct Locked<T> {
	state: Mutex<T>,
}

impl<T> Locked<T> {
	pub fn new(state: T) -> Self {
		Self { state: Mutex::new(state) }
	}

	/// Acquires the lock, blocking until it is available.
	pub fn lock(&self) -> Guard<'_, T> {
		self.state.lock()
	}
}

/// Objects whose mutable state lives in a [`Locked`] cell.
pub trait LockedObject {
	type State;

	fn locked(&self) -> &Locked<Self::State>;

	/// Locks this object.
	fn lock(&self) -> Guard<'_, Self::State> {
		self.locked().lock()
	}
}
