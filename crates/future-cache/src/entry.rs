use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;

/// A cache key: the identifier of an index plus a key within that index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key<I, K> {
    /// Which index the key lives in.
    pub index: I,
    /// The key within that index.
    pub key: K,
}

impl<I, K> Key<I, K> {
    /// A key addressing `key` within `index`.
    pub fn new(index: I, key: K) -> Self {
        Key { index, key }
    }
}

/// The user-visible result stored in the cache: an object and/or an error,
/// plus the full list of keys under which the entry is reachable.
///
/// The `keys` list is authoritative: eviction and reindexing derive their
/// work from it. An entry with neither object nor error is the sentinel
/// shape used by cancellation. Objects are shared, never deep-copied;
/// cloning an entry clones the `Arc`.
pub struct Entry<I, K, T> {
    /// The cached object, if the factory produced one.
    pub object: Option<Arc<T>>,
    /// The cached (or to-be-delivered) error, if any.
    pub error: Option<CacheError>,
    /// Every key under which this entry is (to be) reachable.
    pub keys: Vec<Key<I, K>>,
}

impl<I, K, T> Entry<I, K, T> {
    /// An entry carrying an object.
    pub fn new(object: impl Into<Arc<T>>, keys: Vec<Key<I, K>>) -> Self {
        Entry {
            object: Some(object.into()),
            error: None,
            keys,
        }
    }

    /// An entry carrying an error. Only permanent errors are retained once
    /// the entry completes; see [`CacheError::permanent`].
    pub fn for_error(error: CacheError, keys: Vec<Key<I, K>>) -> Self {
        Entry {
            object: None,
            error: Some(error),
            keys,
        }
    }

    /// Splits the entry into the result handed back to callers.
    pub fn result(&self) -> Result<Option<Arc<T>>, CacheError> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.object.clone()),
        }
    }

    /// Whether this is the empty sentinel shape.
    pub(crate) fn is_sentinel(&self) -> bool {
        self.object.is_none() && self.error.is_none()
    }
}

impl<I: Clone, K: Clone, T> Clone for Entry<I, K, T> {
    fn clone(&self) -> Self {
        Entry {
            object: self.object.clone(),
            error: self.error.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<I: fmt::Debug, K: fmt::Debug, T> fmt::Debug for Entry<I, K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("object", &self.object.as_ref().map(|_| ".."))
            .field("error", &self.error)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Stream of cookies identifying waiter slots. Cookies are only meaningful
/// within a single slot, but a process-wide counter is the cheapest source.
static WAITER_COOKIE: AtomicU64 = AtomicU64::new(0);

type Waiters<I, K, T> = HashMap<u64, oneshot::Sender<Entry<I, K, T>>>;

enum SlotState<I, K, T> {
    /// A factory (or a prospective completion) is still in flight.
    Pending {
        waiters: Waiters<I, K, T>,
        cancel: CancellationToken,
    },
    /// The slot has resolved to an immutable entry.
    Complete(Arc<Entry<I, K, T>>),
}

/// The internal entry-handle installed into index slots and referenced by
/// futures.
///
/// State transitions (completion) only happen under the cache mutex; the
/// slot's own mutex additionally lets futures read content and withdraw
/// their waiter without touching the cache lock. Lock order is always
/// cache → slot, and the slot lock is never held across an acquisition of
/// the cache lock.
pub(crate) struct Slot<I, K, T> {
    state: Mutex<SlotState<I, K, T>>,
}

pub(crate) type SlotRef<I, K, T> = Arc<Slot<I, K, T>>;

impl<I, K, T> Slot<I, K, T> {
    /// A fresh pending slot plus the cancellation token for its factory.
    pub(crate) fn pending() -> (SlotRef<I, K, T>, CancellationToken) {
        let cancel = CancellationToken::new();
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Pending {
                waiters: HashMap::new(),
                cancel: cancel.clone(),
            }),
        });
        (slot, cancel)
    }

    /// A slot that is complete from the start.
    pub(crate) fn from_entry(content: Arc<Entry<I, K, T>>) -> SlotRef<I, K, T> {
        Arc::new(Slot {
            state: Mutex::new(SlotState::Complete(content)),
        })
    }

    /// The stored entry, if the slot has resolved.
    pub(crate) fn content(&self) -> Option<Arc<Entry<I, K, T>>> {
        match &*self.state.lock() {
            SlotState::Complete(content) => Some(content.clone()),
            SlotState::Pending { .. } => None,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Pending { .. })
    }

    /// Registers a waiter on a pending slot. Returns the cookie identifying
    /// the waiter and the receiving end of its delivery channel, or `None`
    /// if the slot has already resolved.
    pub(crate) fn register_waiter(&self) -> Option<(u64, oneshot::Receiver<Entry<I, K, T>>)> {
        match &mut *self.state.lock() {
            SlotState::Pending { waiters, .. } => {
                let cookie = WAITER_COOKIE.fetch_add(1, Ordering::Relaxed) + 1;
                let (sender, receiver) = oneshot::channel();
                waiters.insert(cookie, sender);
                Some((cookie, receiver))
            }
            SlotState::Complete(_) => None,
        }
    }

    /// Withdraws a previously registered waiter. The entry, its factory and
    /// any other waiters are unaffected.
    pub(crate) fn cancel_waiter(&self, cookie: u64) {
        if let SlotState::Pending { waiters, .. } = &mut *self.state.lock() {
            waiters.remove(&cookie);
        }
    }
}

impl<I: Clone, K: Clone, T> Slot<I, K, T> {
    /// Transitions the slot Pending → Complete, at most once.
    ///
    /// Every currently installed waiter receives one clone of `content` and
    /// its channel is closed; the factory token is canceled. Returns whether
    /// the slot should be dropped from its index, i.e. whether the stored
    /// error is transient. Calls after the first are no-ops.
    pub(crate) fn complete(&self, content: Arc<Entry<I, K, T>>) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            SlotState::Complete(_) => false,
            SlotState::Pending { waiters, cancel } => {
                cancel.cancel();
                let delivered = waiters.len();
                for (_, sender) in waiters.drain() {
                    // The waiter may have gone away; delivery is best-effort.
                    sender.send(content.as_ref().clone()).ok();
                }
                if delivered > 0 {
                    tracing::trace!(waiters = delivered, "delivered entry to waiters");
                }
                let remove = content
                    .error
                    .as_ref()
                    .is_some_and(|error| !error.is_permanent());
                *state = SlotState::Complete(content);
                remove
            }
        }
    }
}
