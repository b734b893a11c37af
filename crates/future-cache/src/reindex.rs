use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::cache::{CacheState, FutureCache};
use crate::entry::{Entry, Key, Slot};
use crate::error::CacheError;
use crate::options::{resolve_lookup, LookupOption};

/// How one index moves from the entry's old key to its new one.
struct KeySwap<K> {
    old: K,
    /// `None` once visited means the key did not change.
    new: Option<K>,
    seen: bool,
}

impl<I, K, T> FutureCache<I, K, T>
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Atomically relabels a completed entry so it is reachable under
    /// `new_keys` instead of its current keys.
    ///
    /// The options name the entry as in [`lookup`](Self::lookup); the
    /// entry's own key list supplies the old keys. `new_keys` must cover
    /// exactly the indexes the entry currently lives in, once each
    /// ([`CacheError::IncongruentKeys`] otherwise). Keys that do not change
    /// stay where they are. A pending entry squatting on a new slot is
    /// completed with this entry's content; a completed squatter is evicted
    /// through its own key list.
    ///
    /// The whole operation runs under the cache lock: observers never see a
    /// half-reindexed entry.
    pub fn reindex(
        &self,
        new_keys: Vec<Key<I, K>>,
        opts: impl IntoIterator<Item = LookupOption<I, K, T>>,
    ) -> Result<(), CacheError> {
        let resolved = resolve_lookup(opts)?;
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let table = state.table(&resolved.key.index)?;
        let content = table
            .slots
            .get(&resolved.key.key)
            .and_then(|slot| slot.content())
            .ok_or(CacheError::NotCached)?;

        let mut swaps = fill_key_map(state, &content)?;
        finish_key_map(&mut swaps, &new_keys)?;

        // The relabelled entry: same object/error, new authoritative keys.
        let entry = Arc::new(Entry {
            object: content.object.clone(),
            error: content.error.clone(),
            keys: new_keys,
        });
        remap(state, swaps, entry);

        Ok(())
    }
}

/// Builds the per-index swap map from the entry's current keys, verifying
/// that every named index still points at this entry. Duplicate indexes
/// among the current keys are tolerated; the first wins.
fn fill_key_map<I, K, T>(
    state: &CacheState<I, K, T>,
    content: &Arc<Entry<I, K, T>>,
) -> Result<HashMap<I, KeySwap<K>>, CacheError>
where
    I: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    let mut swaps = HashMap::new();
    for key in &content.keys {
        let table = state.table(&key.index)?;
        if swaps.contains_key(&key.index) {
            continue;
        }

        let points_here = table
            .slots
            .get(&key.key)
            .and_then(|slot| slot.content())
            .is_some_and(|stored| Arc::ptr_eq(&stored, content));
        if !points_here {
            return Err(CacheError::EntryNotFound);
        }

        swaps.insert(
            key.index.clone(),
            KeySwap {
                old: key.key.clone(),
                new: None,
                seen: false,
            },
        );
    }

    Ok(swaps)
}

/// Walks the new keys into the swap map, catching indexes the entry does
/// not live in, duplicates, and indexes left uncovered.
fn finish_key_map<I, K>(
    swaps: &mut HashMap<I, KeySwap<K>>,
    new_keys: &[Key<I, K>],
) -> Result<(), CacheError>
where
    I: Eq + Hash,
    K: Eq + Clone,
{
    for key in new_keys {
        let Some(swap) = swaps.get_mut(&key.index) else {
            return Err(CacheError::IncongruentKeys);
        };
        if swap.seen {
            return Err(CacheError::IncongruentKeys);
        }
        swap.seen = true;
        if swap.old != key.key {
            swap.new = Some(key.key.clone());
        }
    }

    // Every index the entry lives in must be accounted for.
    if swaps.values().any(|swap| !swap.seen) {
        return Err(CacheError::IncongruentKeys);
    }

    Ok(())
}

/// Applies the finalized swap map.
fn remap<I, K, T>(state: &mut CacheState<I, K, T>, swaps: HashMap<I, KeySwap<K>>, entry: Arc<Entry<I, K, T>>)
where
    I: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    let replacement = Slot::from_entry(entry.clone());

    for (index, swap) in swaps {
        match swap.new {
            None => {
                // Key unchanged: swap the slot in place so it serves the
                // entry's updated key list.
                if let Some(table) = state.indexes.get_mut(&index) {
                    table.slots.insert(swap.old, replacement.clone());
                }
            }
            Some(new_key) => {
                let squatter = {
                    let Some(table) = state.indexes.get_mut(&index) else {
                        continue;
                    };
                    table.slots.remove(&swap.old);
                    table.slots.get(&new_key).cloned()
                };

                if let Some(squatter) = squatter {
                    if squatter.is_pending() {
                        // Hand this entry to the squatter's waiters; the
                        // completed squatter keeps serving the new slot.
                        squatter.complete(entry.clone());
                        continue;
                    }
                    if let Some(evictee) = squatter.content() {
                        state.evict(&evictee.keys);
                    }
                }

                if let Some(table) = state.indexes.get_mut(&index) {
                    table.slots.insert(new_key, replacement.clone());
                }
            }
        }
    }
}
