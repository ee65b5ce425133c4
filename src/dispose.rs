use std::cell::Cell;

/// Objects with an explicit, one-way teardown.
pub trait Disposable {
	fn is_disposed(&self) -> bool;

	/// Tears the object down. Calling this again is a no-op.
	fn dispose(&self);
}

/// A one-shot disposal latch.
///
/// The first call to [`DisposeFlag::dispose_with`] runs the hook and marks
/// the flag. Every later call returns `false` without running anything.
#[derive(Default)]
pub struct DisposeFlag {
	disposed: Cell<bool>,
}

impl DisposeFlag {
	pub const fn new() -> Self {
		DisposeFlag {
			disposed: Cell::new(false),
		}
	}

	#[inline]
	pub fn is_disposed(&self) -> bool {
		self.disposed.get()
	}

	/// Runs `hook` if the flag has not been tripped yet.
	///
	/// The flag is tripped before `hook` runs, so a nested dispose issued
	/// from inside the hook is already a no-op.
	pub fn dispose_with(&self, hook: impl FnOnce()) -> bool {
		if self.disposed.replace(true) {
			return false;
		}

		hook();
		true
	}
}

impl std::fmt::Debug for DisposeFlag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DisposeFlag")
			.field("disposed", &self.disposed.get())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hook_runs_once() {
		let flag = DisposeFlag::new();
		let calls = Cell::new(0);

		assert!(flag.dispose_with(|| calls.set(calls.get() + 1)));
		assert!(!flag.dispose_with(|| calls.set(calls.get() + 1)));

		assert_eq!(calls.get(), 1);
		assert!(flag.is_disposed());
	}
}
