use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Key, Slot};
use crate::error::CacheError;
use crate::future::CacheFuture;
use crate::index::{Factory, Index, IndexTable};
use crate::options::{resolve_clean, resolve_lookup, CleanFlag, LookupOption, ResolvedLookup};

/// A thread-safe, multi-index future cache.
///
/// The cache decouples the *request* for a value from the *lookup* of its
/// result: concurrent lookups of the same missing key share a single
/// factory invocation, and every caller receives either the computed value
/// or a cancellation/error. Objects may be reachable under several
/// independent keys, one per index, and index membership can be rewritten
/// atomically with [`reindex`](Self::reindex).
///
/// `FutureCache` is a cheap handle: cloning it shares the underlying cache.
/// Factories are spawned onto the current tokio runtime, so lookups that
/// can miss must happen inside one.
pub struct FutureCache<I, K, T> {
    pub(crate) inner: Arc<Mutex<CacheState<I, K, T>>>,
}

impl<I, K, T> std::fmt::Debug for FutureCache<I, K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureCache").finish_non_exhaustive()
    }
}

impl<I, K, T> Clone for FutureCache<I, K, T> {
    fn clone(&self) -> Self {
        FutureCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct CacheState<I, K, T> {
    pub(crate) indexes: HashMap<I, IndexTable<I, K, T>>,
}

impl<I, K, T> CacheState<I, K, T>
where
    I: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    pub(crate) fn table(&self, index: &I) -> Result<&IndexTable<I, K, T>, CacheError> {
        self.indexes.get(index).ok_or(CacheError::BadIndex)
    }

    fn table_mut(&mut self, index: &I) -> Result<&mut IndexTable<I, K, T>, CacheError> {
        self.indexes.get_mut(index).ok_or(CacheError::BadIndex)
    }

    /// Installs `entry` under every key it names, skipping unknown indexes.
    ///
    /// Keys whose slot already exists are completed with the entry (and
    /// dropped again if the entry failed transiently); missing slots are
    /// filled only when the entry is worth retaining, i.e. it carries no
    /// error or a permanent one.
    pub(crate) fn insert(&mut self, entry: &Arc<Entry<I, K, T>>) {
        let retain = entry.error.as_ref().map_or(true, CacheError::is_permanent);
        let replacement = retain.then(|| Slot::from_entry(entry.clone()));

        for key in &entry.keys {
            let Some(table) = self.indexes.get_mut(&key.index) else {
                continue;
            };
            match table.slots.get(&key.key).cloned() {
                Some(slot) => {
                    if slot.complete(entry.clone()) {
                        table.slots.remove(&key.key);
                    }
                }
                None => {
                    if let Some(replacement) = &replacement {
                        table.slots.insert(key.key.clone(), replacement.clone());
                    }
                }
            }
        }
    }

    /// Removes the completed slots at `keys`. Pending slots are left alone.
    pub(crate) fn evict(&mut self, keys: &[Key<I, K>]) {
        for key in keys {
            let Some(table) = self.indexes.get_mut(&key.index) else {
                continue;
            };
            if table
                .slots
                .get(&key.key)
                .is_some_and(|slot| !slot.is_pending())
            {
                table.slots.remove(&key.key);
            }
        }
    }
}

impl<I, K, T> FutureCache<I, K, T>
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Constructs a cache over the given index declarations.
    ///
    /// At least one index is required, index ids must be unique, and every
    /// index needs a factory.
    pub fn new(indexes: impl IntoIterator<Item = Index<I, K, T>>) -> Result<Self, CacheError> {
        let mut tables = HashMap::new();
        for declaration in indexes {
            if tables.contains_key(&declaration.index) {
                return Err(CacheError::DuplicateOption);
            }
            let factory = declaration.factory.ok_or(CacheError::MissingFactory)?;
            tables.insert(declaration.index, IndexTable::new(factory));
        }
        if tables.is_empty() {
            return Err(CacheError::MissingIndex);
        }

        Ok(FutureCache {
            inner: Arc::new(Mutex::new(CacheState { indexes: tables })),
        })
    }

    /// Looks up an entry and waits for its result.
    ///
    /// On a miss the index's factory is invoked (at most once per missing
    /// key, however many callers race), unless [`LookupOption::SearchCache`]
    /// or a supplied entry says otherwise. A
    /// [`LookupOption::WithContext`] token cancels only this caller's wait.
    ///
    /// Returns `Ok(Some(object))` for a cached object, `Err` for a stored
    /// error or a lookup failure, and `Ok(None)` when the entry carries
    /// neither.
    pub async fn lookup(
        &self,
        opts: impl IntoIterator<Item = LookupOption<I, K, T>>,
    ) -> Result<Option<Arc<T>>, CacheError> {
        let resolved = resolve_lookup(opts)?;
        let context = resolved.context.clone();
        let mut future = self.resolve_future(resolved)?;

        let result = match &context {
            Some(token) => future.wait_with_token(token).await,
            None => future.wait().await,
        };
        // Whatever happened to the wait, this caller's slot must not linger.
        future.cancel();
        result
    }

    /// Looks up an entry and returns a [`CacheFuture`] over it instead of
    /// waiting.
    ///
    /// The same miss handling as [`lookup`](Self::lookup) applies. A
    /// [`LookupOption::WithContext`] token is ignored here; hand it to one
    /// of the future's wait methods instead.
    pub fn lookup_future(
        &self,
        opts: impl IntoIterator<Item = LookupOption<I, K, T>>,
    ) -> Result<CacheFuture<I, K, T>, CacheError> {
        self.resolve_future(resolve_lookup(opts)?)
    }

    fn resolve_future(
        &self,
        resolved: ResolvedLookup<I, K, T>,
    ) -> Result<CacheFuture<I, K, T>, CacheError> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let table = state.table(&resolved.key.index)?;
        if let Some(slot) = table.slots.get(&resolved.key.key) {
            if resolved.search_only && slot.is_pending() {
                return Err(CacheError::NotCached);
            }
            return Ok(CacheFuture::new(slot.clone()));
        }

        if let Some(entry) = resolved.entry {
            // Known miss with a supplied entry: install it instead of
            // running the factory.
            let entry = Arc::new(entry);
            state.insert(&entry);
            let slot = state
                .table(&resolved.key.index)?
                .slots
                .get(&resolved.key.key)
                .cloned()
                .unwrap_or_else(|| Slot::from_entry(entry));
            return Ok(CacheFuture::new(slot));
        }

        if resolved.search_only {
            return Err(CacheError::NotCached);
        }

        // Install the pending slot before the factory task exists; that
        // ordering is what makes the dispatch single-flight.
        let (slot, token) = Slot::pending();
        let table = state.table_mut(&resolved.key.index)?;
        table.slots.insert(resolved.key.key.clone(), slot.clone());
        let factory = table.factory.clone();

        tracing::trace!("lookup miss; spawning factory");
        let cache = self.clone();
        let key = resolved.key;
        tokio::spawn(async move {
            cache.manufacture(token, key, factory).await;
        });

        Ok(CacheFuture::new(slot))
    }

    /// Runs the factory off-lock, then re-enters under the lock to install
    /// whatever it produced.
    async fn manufacture(self, token: CancellationToken, key: Key<I, K>, factory: Factory<I, K, T>) {
        let produced = factory(token, key.clone()).await;

        let entry = match produced {
            Some(entry) => Arc::new(entry),
            None => {
                // A factory that gives up without a result cancels its
                // entry, so waiters are not left hanging.
                tracing::debug!("factory returned no entry; canceling the pending entry");
                Arc::new(Entry::for_error(CacheError::Canceled, vec![key]))
            }
        };

        self.inner.lock().insert(&entry);
    }

    /// Removes an entry from every index it is reachable under.
    ///
    /// The options name the entry as in [`lookup`](Self::lookup); the
    /// matched entry's own key list is the authoritative removal set. An
    /// absent or still-pending slot is a successful no-op.
    pub fn evict(
        &self,
        opts: impl IntoIterator<Item = LookupOption<I, K, T>>,
    ) -> Result<(), CacheError> {
        let resolved = resolve_lookup(opts)?;
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let table = state.table(&resolved.key.index)?;
        let Some(content) = table
            .slots
            .get(&resolved.key.key)
            .and_then(|slot| slot.content())
        else {
            return Ok(());
        };

        state.evict(&content.keys);
        Ok(())
    }

    /// A snapshot of the completed entries in one index.
    ///
    /// Pending entries are skipped; cached errors are included. No ordering
    /// is guaranteed.
    pub fn contents(&self, index: &I) -> Result<Vec<Arc<Entry<I, K, T>>>, CacheError> {
        let guard = self.inner.lock();
        let table = guard.table(index)?;
        Ok(table
            .slots
            .values()
            .filter_map(|slot| slot.content())
            .collect())
    }

    /// Futures over every entry in one index, including pending ones.
    ///
    /// Each future behaves as if obtained from a
    /// [`lookup_future`](Self::lookup_future) hit.
    pub fn contents_future(&self, index: &I) -> Result<Vec<CacheFuture<I, K, T>>, CacheError> {
        let guard = self.inner.lock();
        let table = guard.table(index)?;
        Ok(table
            .slots
            .values()
            .map(|slot| CacheFuture::new(slot.clone()))
            .collect())
    }

    /// Cleans slots out of the cache, selected by `flags`; an empty slice
    /// cleans everything.
    ///
    /// Pending slots are completed with [`CacheError::Canceled`] (fanning
    /// the cancellation out to their waiters) before removal. Clean acts
    /// per-slot and never chases an entry's full key list, so a
    /// multi-indexed entry may stay reachable under its other keys; that is
    /// the documented contract.
    pub fn clean(&self, flags: &[CleanFlag]) {
        let selection = resolve_clean(flags);
        let mut guard = self.inner.lock();

        let mut removed = 0usize;
        for table in guard.indexes.values_mut() {
            table.slots.retain(|_, slot| {
                let keep = match slot.content() {
                    None => {
                        if selection.pending {
                            slot.complete(Arc::new(Entry::for_error(
                                CacheError::Canceled,
                                Vec::new(),
                            )));
                            false
                        } else {
                            true
                        }
                    }
                    Some(content) => {
                        if selection.objects && content.object.is_some() {
                            false
                        } else if selection.errors && content.error.is_some() {
                            false
                        } else {
                            true
                        }
                    }
                };
                if !keep {
                    removed += 1;
                }
                keep
            });
        }

        if removed > 0 {
            tracing::debug!(removed, "cleaned cache slots");
        }
    }
}
