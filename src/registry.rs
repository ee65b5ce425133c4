//! Process-wide record of every live subscription.
//!
//! The registry exists for leak hunting. It is created lazily on first use,
//! lives for the rest of the process and may be touched from any thread,
//! while each observable it describes stays confined to its own thread.
//! Entries point at their observable through a [`WeakIdentity`], so
//! keeping diagnostics around never keeps an observable alive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::identity::{Identity, WeakIdentity};
use crate::site::SiteInfo;
use crate::SubscriptionId;

/// Rendered in place of a site when none was captured.
pub const UNKNOWN_SITE: &str = "<unknown site>";

/// Appended to summary lines whose observable no longer exists.
pub const TARGET_GONE: &str = "<target gone>";

static SUBSCRIPTION_COUNT: AtomicUsize = AtomicUsize::new(0);

// Ids are only unique per observable, so the observable serial is part of
// the key. Field order gives the summary order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
	subscription: SubscriptionId,
	observable: u64,
}

#[derive(Clone)]
struct Entry {
	observable: WeakIdentity,
	site: Option<SiteInfo>,
	hash: u64,
	type_name: &'static str,
	thread: ThreadId,
}

#[derive(Default)]
struct Registry {
	entries: BTreeMap<Key, Entry>,
	per_thread: FxHashMap<ThreadId, usize>,
}

fn registry() -> &'static Mutex<Registry> {
	static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
	REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

pub(crate) fn record(id: SubscriptionId, observable: &Arc<Identity>, site: Option<SiteInfo>) {
	let key = Key {
		subscription: id,
		observable: observable.serial(),
	};

	let entry = Entry {
		observable: Identity::downgrade(observable),
		site,
		hash: observable.hash(),
		type_name: observable.type_name(),
		thread: observable.thread(),
	};

	let mut registry = registry().lock();
	if registry.entries.insert(key, entry).is_none() {
		*registry.per_thread.entry(observable.thread()).or_insert(0) += 1;
		SUBSCRIPTION_COUNT.fetch_add(1, Ordering::Relaxed);
	}

	tracing::trace!(observable = key.observable, subscription = %id, "recorded subscription");
}

/// Forgets a subscription. Returns `false` if it was not recorded.
pub(crate) fn remove(id: SubscriptionId, observable: u64) -> bool {
	let key = Key {
		subscription: id,
		observable,
	};

	let mut registry = registry().lock();
	let Some(entry) = registry.entries.remove(&key) else {
		return false;
	};

	if let Some(count) = registry.per_thread.get_mut(&entry.thread) {
		*count -= 1;
		if *count == 0 {
			registry.per_thread.remove(&entry.thread);
		}
	}
	SUBSCRIPTION_COUNT.fetch_sub(1, Ordering::Relaxed);

	tracing::trace!(observable, subscription = %id, "removed subscription");
	true
}

/// Number of live subscriptions across the whole process.
pub fn subscription_count() -> usize {
	SUBSCRIPTION_COUNT.load(Ordering::Relaxed)
}

/// Number of live subscriptions owned by observables of the calling thread.
pub fn thread_subscription_count() -> usize {
	let current = thread::current().id();
	registry()
		.lock()
		.per_thread
		.get(&current)
		.copied()
		.unwrap_or(0)
}

/// Subscription ids currently recorded for `observable`, in id order.
pub fn entries_for(observable: &Identity) -> Vec<SubscriptionId> {
	registry()
		.lock()
		.entries
		.keys()
		.filter(|key| key.observable == observable.serial())
		.map(|key| key.subscription)
		.collect()
}

/// Takes a snapshot of every live subscription.
pub fn summarize() -> Summary {
	let registry = registry().lock();
	let lines = registry
		.entries
		.iter()
		.map(|(key, entry)| SummaryLine {
			subscription: key.subscription,
			entry: entry.clone(),
		})
		.collect();

	Summary { lines }
}

/// A point-in-time copy of the registry.
///
/// Lines are formatted lazily and the summary can be iterated any number
/// of times. Observables that were dropped after an entry was recorded
/// keep their line, suffixed with [`TARGET_GONE`].
pub struct Summary {
	lines: Vec<SummaryLine>,
}

struct SummaryLine {
	subscription: SubscriptionId,
	entry: Entry,
}

impl fmt::Display for SummaryLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let entry = &self.entry;
		write!(
			f,
			"{:016x} => {} ({}) ",
			entry.hash,
			self.subscription.get(),
			entry.type_name
		)?;

		match &entry.site {
			Some(site) => write!(f, "{site}")?,
			None => f.write_str(UNKNOWN_SITE)?,
		}

		if entry.observable.is_gone() {
			write!(f, " {TARGET_GONE}")?;
		}

		Ok(())
	}
}

impl Summary {
	pub fn len(&self) -> usize {
		self.lines.len()
	}

	pub fn is_empty(&self) -> bool {
		self.lines.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
		self.lines.iter().map(|line| line.to_string())
	}

	/// Keeps only lines belonging to observables of the calling thread.
	pub fn for_current_thread(mut self) -> Self {
		let current = thread::current().id();
		self.lines.retain(|line| line.entry.thread == current);
		self
	}
}

impl<'a> IntoIterator for &'a Summary {
	type Item = String;
	type IntoIter = Box<dyn Iterator<Item = String> + 'a>;

	fn into_iter(self) -> Self::IntoIter {
		Box::new(self.iter())
	}
}

impl fmt::Display for Summary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for line in &self.lines {
			writeln!(f, "{line}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for Summary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.iter()).finish()
	}
}
