use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::dispose::{DisposeFlag, Disposable};
use crate::identity::Identity;
use crate::site::SiteInfo;
use crate::tracker::{self, ResourceKey};
use crate::{registry, AnyObservable, ObservableError, SubscriptionId};

pub type Callback<T> = Rc<dyn Fn(&T, SubscriptionId)>;

/// A value cell that notifies subscribers synchronously when it changes.
///
/// An observable is confined to the thread that created it. Cloning the
/// handle shares the cell; dropping the last handle disposes it.
pub struct Observable<T> {
	body: Rc<ObservableBody<T>>,
}

/// Non-owning handle, see [`Observable::downgrade`].
pub struct WeakObservable<T> {
	body: Weak<ObservableBody<T>>,
}

struct ObservableBody<T> {
	identity: Arc<Identity>,
	value: RefCell<Rc<T>>,
	inner: RefCell<ObservableInner<T>>,
	notifying: Cell<bool>,
	disposed: DisposeFlag,
}

struct ObservableInner<T> {
	subscribers: IndexMap<SubscriptionId, Callback<T>, FxBuildHasher>,
	next_id: u64,
	has_been_set: bool,
}

/// How [`Observable::subscribe_with`] registers a callback.
#[derive(Clone, Copy, Debug)]
pub struct SubscribeOptions {
	call_if_set: bool,
	site: Option<SiteInfo>,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		SubscribeOptions {
			call_if_set: true,
			site: None,
		}
	}
}

impl SubscribeOptions {
	/// Whether a fresh subscriber is called right away with the current
	/// value once the observable has been set. Defaults to `true`.
	pub fn call_if_set(mut self, call_if_set: bool) -> Self {
		self.call_if_set = call_if_set;
		self
	}

	/// Records `site` instead of the caller location.
	pub fn at(mut self, site: SiteInfo) -> Self {
		self.site = Some(site);
		self
	}
}

// Clears the notification flag on every exit path, unwinding included.
struct Notifying<'a> {
	flag: &'a Cell<bool>,
}

impl<'a> Notifying<'a> {
	fn enter(flag: &'a Cell<bool>) -> Self {
		flag.set(true);
		Notifying { flag }
	}
}

impl Drop for Notifying<'_> {
	fn drop(&mut self) {
		self.flag.set(false);
	}
}

impl<T> Clone for Observable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Observable<T>
where
	T: Default + 'static,
{
	fn default() -> Self {
		Observable::new()
	}
}

impl<T> Observable<T>
where
	T: 'static,
{
	/// Creates an observable that has not been set yet.
	///
	/// It holds `T::default()`, but subscribers are not replayed until the
	/// first [`set`](Observable::set).
	pub fn new() -> Self
	where
		T: Default,
	{
		Self::create(T::default(), false)
	}

	/// Creates an observable that counts as already set.
	pub fn with_value(value: T) -> Self {
		Self::create(value, true)
	}

	fn create(value: T, has_been_set: bool) -> Self {
		Observable {
			body: Rc::new(ObservableBody {
				identity: Identity::new::<T>(),
				value: RefCell::new(Rc::new(value)),
				inner: RefCell::new(ObservableInner {
					subscribers: IndexMap::default(),
					next_id: 1,
					has_been_set,
				}),
				notifying: Cell::new(false),
				disposed: DisposeFlag::new(),
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> T
	where
		T: Clone,
	{
		T::clone(&self.body.value.borrow())
	}

	/// Reads the current value without cloning it. `func` may freely use
	/// the observable, including setting it.
	#[inline]
	pub fn with<R>(&self, func: impl FnOnce(&T) -> R) -> R {
		let value = self.body.value.borrow().clone();
		func(&value)
	}

	/// Stores `value` and notifies every current subscriber, in the order
	/// they subscribed.
	///
	/// Setting a value equal to the current one only marks the observable
	/// as set. Subscribers added or removed by a callback take effect from
	/// the next `set` on.
	pub fn set(&self, value: T) -> Result<(), ObservableError>
	where
		T: PartialEq,
	{
		let body = &self.body;
		if body.disposed.is_disposed() {
			return Err(ObservableError::UseAfterDispose);
		}

		body.inner.borrow_mut().has_been_set = true;

		if **body.value.borrow() == value {
			return Ok(());
		}

		if body.notifying.get() {
			return Err(ObservableError::ReentrantMutation);
		}

		let _notifying = Notifying::enter(&body.notifying);

		let current = Rc::new(value);
		let previous = body.value.replace(current.clone());
		std::mem::drop(previous);

		let snapshot: SmallVec<[(SubscriptionId, Callback<T>); 4]> = body
			.inner
			.borrow()
			.subscribers
			.iter()
			.map(|(id, callback)| (*id, callback.clone()))
			.collect();

		tracing::trace!(
			observable = body.identity.serial(),
			subscribers = snapshot.len(),
			"notifying subscribers"
		);

		for (id, callback) in snapshot {
			callback(&current, id);
		}

		Ok(())
	}

	/// Subscribes `callback` and, if the observable has been set, calls it
	/// once with the current value before returning.
	#[track_caller]
	pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Result<SubscriptionId, ObservableError> {
		self.subscribe_with(move |value, _| callback(value), SubscribeOptions::default())
	}

	/// Like [`subscribe`](Observable::subscribe), but the callback also
	/// receives its own subscription id, e.g. to unsubscribe itself.
	#[track_caller]
	pub fn subscribe_with_id(
		&self,
		callback: impl Fn(&T, SubscriptionId) + 'static,
	) -> Result<SubscriptionId, ObservableError> {
		self.subscribe_with(callback, SubscribeOptions::default())
	}

	/// Subscribes `callback`.
	///
	/// The subscription is recorded in the diagnostic registry and in the
	/// innermost [`ThreadScope`](crate::ThreadScope) of this thread, if any.
	/// It lives until it is unsubscribed, its scope exits or the observable
	/// is disposed, whichever happens first.
	#[track_caller]
	pub fn subscribe_with(
		&self,
		callback: impl Fn(&T, SubscriptionId) + 'static,
		options: SubscribeOptions,
	) -> Result<SubscriptionId, ObservableError> {
		let body = &self.body;
		if body.disposed.is_disposed() {
			return Err(ObservableError::UseAfterDispose);
		}

		let site = SiteInfo::capture(options.site);
		let callback: Callback<T> = Rc::new(callback);

		let (id, replay) = {
			let mut inner = body.inner.borrow_mut();
			let id = SubscriptionId::from_raw(inner.next_id);
			inner.next_id += 1;
			inner.subscribers.insert(id, callback.clone());
			(id, options.call_if_set && inner.has_been_set)
		};

		registry::record(id, &body.identity, site);

		let this = Rc::downgrade(body);
		let scoped = tracker::track(body.key(id), move || {
			if let Some(body) = this.upgrade() {
				if body.release(id) {
					tracing::debug!(
						observable = body.identity.serial(),
						subscription = %id,
						"released subscription on scope exit"
					);
				}
			}
		});

		tracing::trace!(
			observable = body.identity.serial(),
			subscription = %id,
			type_name = body.identity.type_name(),
			scoped,
			"subscribed"
		);

		if replay {
			let value = body.value.borrow().clone();
			callback(&value, id);
		}

		Ok(id)
	}

	/// Removes a subscription. Safe to call from inside a callback,
	/// including for the callback's own id.
	pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ObservableError> {
		let body = &self.body;
		if !body.inner.borrow().subscribers.contains_key(&id) {
			return Err(ObservableError::UnknownSubscription(id));
		}

		tracker::untrack(&body.key(id));
		body.release(id);

		tracing::trace!(observable = body.identity.serial(), subscription = %id, "unsubscribed");
		Ok(())
	}

	/// Fails with [`ObservableError::UnexpectedHandlers`] if anything is
	/// still subscribed.
	pub fn should_have_no_handlers(&self) -> Result<(), ObservableError> {
		match self.handler_count() {
			0 => Ok(()),
			count => Err(ObservableError::UnexpectedHandlers(count)),
		}
	}

	pub fn handler_count(&self) -> usize {
		self.body.inner.borrow().subscribers.len()
	}

	pub fn has_been_set(&self) -> bool {
		self.body.inner.borrow().has_been_set
	}

	/// True only while a `set` is dispatching to subscribers.
	pub fn is_notifying(&self) -> bool {
		self.body.notifying.get()
	}

	pub fn identity(&self) -> &Identity {
		&self.body.identity
	}

	pub fn downgrade(&self) -> WeakObservable<T> {
		WeakObservable {
			body: Rc::downgrade(&self.body),
		}
	}
}

impl<T> ObservableBody<T> {
	fn key(&self, id: SubscriptionId) -> ResourceKey {
		ResourceKey {
			owner: self.identity.serial(),
			id,
		}
	}

	/// Drops one subscription from the live mapping and the registry.
	/// Returns `false` if it was already gone.
	fn release(&self, id: SubscriptionId) -> bool {
		// Bind first so the callback is dropped after the borrow ends.
		let removed = self.inner.borrow_mut().subscribers.shift_remove(&id);
		match removed {
			Some(_callback) => {
				registry::remove(id, self.identity.serial());
				true
			}
			None => false,
		}
	}

	fn release_all(&self) {
		let ids: SmallVec<[SubscriptionId; 8]> = self.inner.borrow().subscribers.keys().copied().collect();

		tracing::debug!(
			observable = self.identity.serial(),
			subscriptions = ids.len(),
			"disposing observable"
		);

		for id in ids {
			tracker::untrack(&self.key(id));
			self.release(id);
		}
	}
}

impl<T> Drop for ObservableBody<T> {
	fn drop(&mut self) {
		self.disposed.dispose_with(|| self.release_all());
	}
}

impl<T> Disposable for Observable<T> {
	fn is_disposed(&self) -> bool {
		self.body.disposed.is_disposed()
	}

	/// Releases every remaining subscription. Subscriptions that a scope
	/// exit already released are skipped.
	fn dispose(&self) {
		self.body.disposed.dispose_with(|| self.body.release_all());
	}
}

impl<T: 'static> AnyObservable for Observable<T> {
	fn identity(&self) -> &Identity {
		Observable::identity(self)
	}

	fn handler_count(&self) -> usize {
		Observable::handler_count(self)
	}

	fn is_disposed(&self) -> bool {
		Disposable::is_disposed(self)
	}
}

impl<T> WeakObservable<T> {
	pub fn upgrade(&self) -> Option<Observable<T>> {
		self.body.upgrade().map(|body| Observable { body })
	}
}

impl<T> Clone for WeakObservable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Debug for Observable<T>
where
	T: Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Observable")
			.field("value", &**self.body.value.borrow())
			.field("handlers", &self.handler_count())
			.field("disposed", &self.body.disposed.is_disposed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::cell::{Cell, RefCell};
	use std::rc::Rc;

	use super::*;
	use crate::ThreadScope;

	#[test]
	fn equal_values_are_screened() {
		let observable = Observable::with_value(5);
		let calls = Rc::new(Cell::new(0));

		observable
			.subscribe_with(
				{
					let calls = calls.clone();
					move |_, _| calls.set(calls.get() + 1)
				},
				SubscribeOptions::default().call_if_set(false),
			)
			.unwrap();

		observable.set(5).unwrap();
		assert_eq!(calls.get(), 0);

		observable.set(6).unwrap();
		observable.set(6).unwrap();
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn unset_observable_replays_after_default_set() {
		let observable = Observable::<i32>::new();
		let seen = Rc::new(RefCell::new(Vec::new()));

		observable
			.subscribe({
				let seen = seen.clone();
				move |value| seen.borrow_mut().push(("first", *value))
			})
			.unwrap();
		assert!(seen.borrow().is_empty());
		assert!(!observable.has_been_set());

		observable.set(0).unwrap();
		assert!(observable.has_been_set());
		assert!(seen.borrow().is_empty());

		observable
			.subscribe({
				let seen = seen.clone();
				move |value| seen.borrow_mut().push(("second", *value))
			})
			.unwrap();
		assert_eq!(*seen.borrow(), vec![("second", 0)]);
	}

	#[test]
	fn reentrant_set_is_rejected_and_state_is_kept() {
		let observable = Observable::with_value(1);
		let outcome = Rc::new(RefCell::new(None));

		observable
			.subscribe_with(
				{
					let this = observable.downgrade();
					let outcome = outcome.clone();
					move |_, _| {
						let this = this.upgrade().unwrap();
						assert!(this.is_notifying());
						*outcome.borrow_mut() = Some(this.set(100));
					}
				},
				SubscribeOptions::default().call_if_set(false),
			)
			.unwrap();

		observable.set(2).unwrap();

		assert_eq!(*outcome.borrow(), Some(Err(ObservableError::ReentrantMutation)));
		assert_eq!(observable.get(), 2);
		assert_eq!(observable.handler_count(), 1);
		assert!(!observable.is_notifying());
	}

	#[test]
	fn panicking_callback_clears_notifying_flag() {
		let observable = Observable::with_value(0);
		observable
			.subscribe_with(|value, _| assert!(*value < 10), SubscribeOptions::default().call_if_set(false))
			.unwrap();

		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observable.set(11)));
		assert!(result.is_err());
		assert!(!observable.is_notifying());

		observable.set(3).unwrap();
		assert_eq!(observable.get(), 3);
	}

	#[test]
	fn ids_are_monotonic_and_never_reused() {
		let observable = Observable::<u8>::new();
		let a = observable.subscribe(|_| {}).unwrap();
		let b = observable.subscribe(|_| {}).unwrap();
		observable.unsubscribe(b).unwrap();
		let c = observable.subscribe(|_| {}).unwrap();

		assert_eq!(a.get(), 1);
		assert_eq!(b.get(), 2);
		assert_eq!(c.get(), 3);
	}

	#[test]
	fn unknown_subscription_is_reported() {
		let observable = Observable::<u8>::new();
		let id = observable.subscribe(|_| {}).unwrap();
		observable.unsubscribe(id).unwrap();

		assert_eq!(observable.unsubscribe(id), Err(ObservableError::UnknownSubscription(id)));
	}

	#[test]
	fn disposed_observable_rejects_use() {
		let observable = Observable::with_value(1);
		observable.dispose();

		assert_eq!(observable.set(2), Err(ObservableError::UseAfterDispose));
		assert_eq!(observable.subscribe(|_| {}), Err(ObservableError::UseAfterDispose));
		assert_eq!(observable.get(), 1);
	}

	#[test]
	fn scope_exit_after_dispose_is_harmless() {
		let scope = ThreadScope::enter();
		let observable = Observable::with_value(1);
		observable.subscribe(|_| {}).unwrap();

		observable.dispose();
		assert_eq!(ThreadScope::tracked(), 0);
		drop(scope);

		assert!(observable.should_have_no_handlers().is_ok());
	}

	#[test]
	fn dropping_last_handle_releases_registry_entries() {
		let before = registry::thread_subscription_count();
		{
			let observable = Observable::with_value("a");
			observable.subscribe(|_| {}).unwrap();
			observable.subscribe(|_| {}).unwrap();
			assert_eq!(registry::thread_subscription_count(), before + 2);
		}
		assert_eq!(registry::thread_subscription_count(), before);
	}
}
