use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Who an observable is, independent of the value it holds.
///
/// Each observable owns the only strong reference to its identity, so the
/// identity dies exactly when the observable does. Everything else that
/// wants to point at an observable across threads holds a [`WeakIdentity`].
#[derive(Debug)]
pub struct Identity {
	serial: u64,
	hash: u64,
	type_name: &'static str,
	thread: ThreadId,
}

impl Identity {
	pub(crate) fn new<T: 'static>() -> Arc<Self> {
		let serial = NEXT_SERIAL.fetch_add(1, AtomicOrdering::Relaxed);
		let thread = thread::current().id();
		Arc::new(Identity {
			serial,
			hash: fxhash::hash64(&(serial, thread)),
			type_name: std::any::type_name::<T>(),
			thread,
		})
	}

	/// Process-unique number, never reused.
	#[inline]
	pub fn serial(&self) -> u64 {
		self.serial
	}

	/// Opaque hash shown in diagnostic summaries.
	#[inline]
	pub fn hash(&self) -> u64 {
		self.hash
	}

	/// Name of the observed value type.
	#[inline]
	pub fn type_name(&self) -> &'static str {
		self.type_name
	}

	/// Thread the observable was created on and is confined to.
	#[inline]
	pub fn thread(&self) -> ThreadId {
		self.thread
	}

	pub fn downgrade(this: &Arc<Self>) -> WeakIdentity {
		WeakIdentity {
			serial: this.serial,
			ptr: Arc::downgrade(this),
		}
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.hash)
	}
}

/// Non-owning handle to an [`Identity`].
///
/// Ordered and compared by serial, which stays valid after the target is
/// gone.
#[derive(Clone)]
pub struct WeakIdentity {
	serial: u64,
	ptr: Weak<Identity>,
}

impl WeakIdentity {
	#[inline]
	pub fn serial(&self) -> u64 {
		self.serial
	}

	/// Returns `None` once the observable has been dropped.
	pub fn resolve(&self) -> Option<Arc<Identity>> {
		self.ptr.upgrade()
	}

	pub fn is_gone(&self) -> bool {
		self.ptr.strong_count() == 0
	}
}

impl PartialEq for WeakIdentity {
	fn eq(&self, other: &Self) -> bool {
		self.serial.eq(&other.serial)
	}
}

impl Eq for WeakIdentity {}

impl Ord for WeakIdentity {
	fn cmp(&self, other: &Self) -> Ordering {
		self.serial.cmp(&other.serial)
	}
}

impl PartialOrd for WeakIdentity {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Debug for WeakIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WeakIdentity")
			.field("serial", &self.serial)
			.field("gone", &self.is_gone())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn weak_identity_does_not_keep_target_alive() {
		let identity = Identity::new::<u32>();
		let weak = Identity::downgrade(&identity);

		assert_eq!(weak.resolve().map(|i| i.serial()), Some(identity.serial()));

		drop(identity);
		assert!(weak.is_gone());
		assert!(weak.resolve().is_none());
	}

	#[test]
	fn serials_are_unique() {
		let a = Identity::new::<u32>();
		let b = Identity::new::<u32>();
		assert_ne!(a.serial(), b.serial());
		assert_eq!(a.type_name(), "u32");
	}
}
