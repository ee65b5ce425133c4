use std::cell::Cell;

use enclose::enclose;

use crate::{Observable, ObservableError, SubscriptionId};

impl<T> Observable<T>
where
	T: 'static,
{
	/// Derives an observable whose value is always `func` of this one.
	///
	/// The result starts from `func` of the current value and is kept up to
	/// date by a subscription on `self`. That subscription holds the derived
	/// observable, so it lives as long as the subscription does.
	#[track_caller]
	pub fn map<R, F>(&self, func: F) -> Result<Observable<R>, ObservableError>
	where
		F: Fn(&T) -> R + 'static,
		R: PartialEq + 'static,
	{
		let derived = Observable::with_value(self.with(&func));
		let source = self.identity().serial();

		self.subscribe(enclose!((derived) move |value: &T| {
			if let Err(error) = derived.set(func(value)) {
				tracing::warn!(%error, source, "could not update derived observable");
			}
		}))?;

		Ok(derived)
	}

	/// Runs `action` the first time this observable is notified.
	#[track_caller]
	pub fn when(&self, action: impl FnOnce() + 'static) -> Result<SubscriptionId, ObservableError> {
		self.when_matches(|_| true, action)
	}

	/// Runs `action` once, on the first value that satisfies `predicate`.
	///
	/// The subscription removes itself before `action` runs. If the current
	/// value already matches, that happens before this call returns, and the
	/// returned id no longer refers to a live subscription.
	#[track_caller]
	pub fn when_matches(
		&self,
		predicate: impl Fn(&T) -> bool + 'static,
		action: impl FnOnce() + 'static,
	) -> Result<SubscriptionId, ObservableError> {
		// Weak, so the subscription does not keep its own source alive.
		let source = self.downgrade();
		let action = Cell::new(Some(action));

		self.subscribe_with_id(move |value, id| {
			if !predicate(value) {
				return;
			}

			if let Some(source) = source.upgrade() {
				if let Err(error) = source.unsubscribe(id) {
					tracing::trace!(%error, "one-shot subscription already released");
				}
			}

			if let Some(action) = action.take() {
				action();
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;
	use std::rc::Rc;

	use crate::{Disposable, Observable};

	#[test]
	fn map_tracks_source() {
		let source = Observable::with_value(0.53_f64);
		let rounded = source.map(|value| value.round() as i64).unwrap();

		assert_eq!(rounded.get(), 1);
		source.set(2.2).unwrap();
		assert_eq!(rounded.get(), 2);
		assert_eq!(source.handler_count(), 1);
	}

	#[test]
	fn map_of_unset_source_is_set() {
		let source = Observable::<u32>::new();
		let doubled = source.map(|value| value * 2).unwrap();

		assert!(doubled.has_been_set());
		assert_eq!(doubled.get(), 0);
	}

	#[test]
	fn when_fires_once_and_unsubscribes() {
		let source = Observable::with_value(1);
		let fired = Rc::new(Cell::new(0));

		source
			.when_matches(|value| *value > 2, {
				let fired = fired.clone();
				move || fired.set(fired.get() + 1)
			})
			.unwrap();
		assert_eq!(source.handler_count(), 1);

		source.set(2).unwrap();
		assert_eq!(fired.get(), 0);

		source.set(3).unwrap();
		source.set(4).unwrap();
		assert_eq!(fired.get(), 1);
		assert!(source.should_have_no_handlers().is_ok());
	}

	#[test]
	fn when_on_matching_current_value_fires_immediately() {
		let source = Observable::with_value("ready");
		let fired = Rc::new(Cell::new(false));

		source
			.when({
				let fired = fired.clone();
				move || fired.set(true)
			})
			.unwrap();

		assert!(fired.get());
		assert_eq!(source.handler_count(), 0);
	}

	#[test]
	fn when_does_not_keep_source_alive() {
		let source = Observable::<i32>::new();
		source.when(|| {}).unwrap();
		let weak = source.downgrade();

		drop(source);
		assert!(weak.upgrade().is_none());
	}

	#[test]
	fn disposed_derived_is_reported_not_fatal() {
		let source = Observable::with_value(1);
		let derived = source.map(|value| value + 1).unwrap();
		derived.dispose();

		source.set(5).unwrap();
		assert_eq!(derived.get(), 2);
	}
}
