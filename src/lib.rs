pub mod macros;

mod combinators;
mod dispose;
mod error;
mod identity;
mod observable;
pub mod registry;
mod site;
pub mod tracker;

use std::fmt;

pub use dispose::{DisposeFlag, Disposable};
pub use error::ObservableError;
pub use identity::{Identity, WeakIdentity};
pub use observable::{Callback, Observable, SubscribeOptions, WeakObservable};
pub use registry::{subscription_count, summarize, thread_subscription_count, Summary};
pub use site::SiteInfo;
pub use tracker::ThreadScope;

/// Identifies one subscription within its observable.
///
/// Ids start at 1, increase monotonically per observable and are never
/// reused, even after the subscription is released.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
	pub(crate) const fn from_raw(id: u64) -> Self {
		SubscriptionId(id)
	}

	#[inline]
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Type-erased view of an observable, for leak checks over observables of
/// different value types.
pub trait AnyObservable {
	fn identity(&self) -> &Identity;

	/// Number of live subscriptions.
	fn handler_count(&self) -> usize;

	fn is_disposed(&self) -> bool;

	fn should_have_no_handlers(&self) -> Result<(), ObservableError> {
		match self.handler_count() {
			0 => Ok(()),
			count => Err(ObservableError::UnexpectedHandlers(count)),
		}
	}
}

/// Checks that none of `observables` has a live subscription.
///
/// The error carries the total number of handlers found.
pub fn assert_no_handlers(observables: &[&dyn AnyObservable]) -> Result<(), ObservableError> {
	let leaked: usize = observables.iter().map(|observable| observable.handler_count()).sum();
	if leaked > 0 {
		for observable in observables.iter().filter(|o| o.handler_count() > 0) {
			let identity = observable.identity();
			tracing::warn!(
				observable = identity.serial(),
				type_name = identity.type_name(),
				handlers = observable.handler_count(),
				"observable still has handlers"
			);
		}
		return Err(ObservableError::UnexpectedHandlers(leaked));
	}

	Ok(())
}
