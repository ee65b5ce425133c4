use std::error::Error;
use std::fmt;

use crate::SubscriptionId;

/// Failures reported by [`Observable`](crate::Observable) operations.
///
/// All of these indicate a defect in the calling code. Nothing is retried
/// and nothing is deferred: the failing call returns the error directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservableError {
	/// `set` was called while a notification pass was still running.
	ReentrantMutation,
	/// `unsubscribe` was given an id that is not currently subscribed.
	UnknownSubscription(SubscriptionId),
	/// `should_have_no_handlers` found live subscriptions.
	UnexpectedHandlers(usize),
	/// The observable was already disposed.
	UseAfterDispose,
}

impl fmt::Display for ObservableError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ReentrantMutation => {
				write!(f, "cannot set an observable from its own change handler")
			}
			Self::UnknownSubscription(id) => write!(f, "unknown subscription {id}"),
			Self::UnexpectedHandlers(count) => write!(f, "expected no handlers, found {count}"),
			Self::UseAfterDispose => write!(f, "observable is disposed"),
		}
	}
}

impl Error for ObservableError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_mentions_the_offending_value() {
		let err = ObservableError::UnknownSubscription(SubscriptionId::from_raw(7));
		assert_eq!(err.to_string(), "unknown subscription #7");

		let err = ObservableError::UnexpectedHandlers(3);
		assert_eq!(err.to_string(), "expected no handlers, found 3");
	}
}
