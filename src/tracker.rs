//! Per-thread stack of resource scopes.
//!
//! While a [`ThreadScope`] is alive, every resource tracked on its thread is
//! recorded in the innermost scope. When the guard goes away, whether at the
//! end of a block, on early return or during unwinding, each resource that
//! is still recorded has its release callback run exactly once.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::SubscriptionId;

/// Identifies one tracked subscription: the owning observable's serial and
/// the subscription id within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
	pub owner: u64,
	pub id: SubscriptionId,
}

type Release = Box<dyn FnOnce()>;

struct Scope {
	serial: u64,
	resources: IndexMap<ResourceKey, Release, FxBuildHasher>,
}

thread_local! {
	static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
	static NEXT_SCOPE: Cell<u64> = const { Cell::new(1) };
}

/// Guard for one tracking scope on the current thread.
///
/// Scopes nest. The guard is bound to the thread that entered it.
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ThreadScope {
	serial: u64,
	_thread_bound: PhantomData<*const ()>,
}

impl ThreadScope {
	pub fn enter() -> Self {
		let serial = NEXT_SCOPE.with(|next| next.replace(next.get() + 1));
		SCOPES.with(|scopes| {
			scopes.borrow_mut().push(Scope {
				serial,
				resources: IndexMap::default(),
			})
		});

		tracing::trace!(scope = serial, depth = ThreadScope::depth(), "entered thread scope");

		ThreadScope {
			serial,
			_thread_bound: PhantomData,
		}
	}

	/// Exits the scope now. Same as dropping the guard.
	pub fn exit(self) {}

	/// How many scopes are active on this thread.
	pub fn depth() -> usize {
		SCOPES.try_with(|scopes| scopes.borrow().len()).unwrap_or(0)
	}

	/// How many resources are tracked across all scopes of this thread.
	pub fn tracked() -> usize {
		SCOPES
			.try_with(|scopes| scopes.borrow().iter().map(|scope| scope.resources.len()).sum())
			.unwrap_or(0)
	}

	/// Whether `key` is tracked in any scope of this thread.
	pub fn is_tracked(key: &ResourceKey) -> bool {
		SCOPES
			.try_with(|scopes| {
				scopes
					.borrow()
					.iter()
					.any(|scope| scope.resources.contains_key(key))
			})
			.unwrap_or(false)
	}
}

impl Drop for ThreadScope {
	fn drop(&mut self) {
		let resources = SCOPES
			.try_with(|scopes| {
				let mut scopes = scopes.borrow_mut();
				let position = scopes.iter().rposition(|scope| scope.serial == self.serial)?;
				Some(scopes.remove(position).resources)
			})
			.ok()
			.flatten()
			.unwrap_or_default();

		if !resources.is_empty() {
			tracing::debug!(
				scope = self.serial,
				count = resources.len(),
				"releasing resources left in thread scope"
			);
		}

		// The borrow is gone, so release callbacks may use the tracker again.
		for (_, release) in resources {
			release();
		}

		tracing::trace!(scope = self.serial, "exited thread scope");
	}
}

/// Records `key` in the innermost scope of this thread.
///
/// Returns `false`, dropping `release`, if no scope is active.
pub fn track(key: ResourceKey, release: impl FnOnce() + 'static) -> bool {
	let release: Release = Box::new(release);
	let unused = SCOPES.with(|scopes| match scopes.borrow_mut().last_mut() {
		Some(scope) => {
			let previous = scope.resources.insert(key, release);
			debug_assert!(previous.is_none(), "resource {key:?} tracked twice");
			None
		}
		None => Some(release),
	});

	unused.is_none()
}

/// Forgets `key` without running its release callback.
///
/// Returns `false` if no scope of this thread tracks it.
pub fn untrack(key: &ResourceKey) -> bool {
	let removed = SCOPES
		.try_with(|scopes| {
			scopes
				.borrow_mut()
				.iter_mut()
				.rev()
				.find_map(|scope| scope.resources.shift_remove(key))
		})
		.ok()
		.flatten();

	removed.is_some()
}
