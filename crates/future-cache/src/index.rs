use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Key, SlotRef};

/// Constructs an object when a lookup misses its index.
///
/// The factory receives the key that triggered it and a cancellation token
/// scoped to the pending entry: the token fires as soon as the entry
/// completes by any other means (including [`FutureCache::clean`] on
/// pending entries), so long-running factories should watch it.
///
/// The returned entry's `keys` decide where the result is installed. An
/// entry carrying an error is retained only if the error is
/// [permanent](crate::CacheError::permanent); otherwise it is delivered to
/// the waiters and the slot is removed. Returning `None` abandons the
/// pending entry: its waiters observe a canceled result.
///
/// [`FutureCache::clean`]: crate::FutureCache::clean
pub type Factory<I, K, T> = Arc<
    dyn Fn(CancellationToken, Key<I, K>) -> BoxFuture<'static, Option<Entry<I, K, T>>>
        + Send
        + Sync,
>;

/// Wraps an async closure as a [`Factory`].
pub fn factory<I, K, T, F, Fut>(f: F) -> Factory<I, K, T>
where
    F: Fn(CancellationToken, Key<I, K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Entry<I, K, T>>> + Send + 'static,
{
    Arc::new(move |token, key| f(token, key).boxed())
}

/// An index declaration passed to [`FutureCache::new`].
///
/// Every index needs both its identifier and a factory; a declaration
/// without a factory is rejected at construction time.
///
/// [`FutureCache::new`]: crate::FutureCache::new
pub struct Index<I, K, T> {
    /// The identifier the index is addressed by.
    pub index: I,
    /// The factory invoked when a key misses this index.
    pub factory: Option<Factory<I, K, T>>,
}

impl<I, K, T> Index<I, K, T> {
    /// Declares `index` with its `factory`.
    pub fn new(index: I, factory: Factory<I, K, T>) -> Self {
        Index {
            index,
            factory: Some(factory),
        }
    }
}

/// One live index: its factory plus the slots keyed within it.
pub(crate) struct IndexTable<I, K, T> {
    pub(crate) factory: Factory<I, K, T>,
    pub(crate) slots: HashMap<K, SlotRef<I, K, T>>,
}

impl<I, K, T> IndexTable<I, K, T> {
    pub(crate) fn new(factory: Factory<I, K, T>) -> Self {
        IndexTable {
            factory,
            slots: HashMap::new(),
        }
    }
}
