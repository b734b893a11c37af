use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Key};
use crate::error::CacheError;

/// An option for the lookup-shaped operations ([`lookup`], [`lookup_future`],
/// [`evict`], [`reindex`]).
///
/// The set is closed: unknown options are impossible by construction.
/// Options are validated once per call; supplying the same option twice is
/// a [`CacheError::DuplicateOption`].
///
/// [`lookup`]: crate::FutureCache::lookup
/// [`lookup_future`]: crate::FutureCache::lookup_future
/// [`evict`]: crate::FutureCache::evict
/// [`reindex`]: crate::FutureCache::reindex
pub enum LookupOption<I, K, T> {
    /// Sets the primary key.
    ByKey(Key<I, K>),
    /// Supplies a full entry. The primary key is the entry's first key; if
    /// that key misses, the entry is inserted instead of calling the
    /// factory. On a hit the cached version wins and the supplied entry is
    /// dropped.
    ByEntry(Entry<I, K, T>),
    /// Never invoke the factory. An absent or still-pending entry reports
    /// [`CacheError::NotCached`].
    SearchCache,
    /// Token canceling the *wait*. The factory and other waiters are not
    /// affected. Only meaningful for [`lookup`](crate::FutureCache::lookup);
    /// `lookup_future` returns immediately and ignores it.
    WithContext(CancellationToken),
}

/// The consolidated options for one lookup-shaped operation.
pub(crate) struct ResolvedLookup<I, K, T> {
    pub(crate) entry: Option<Entry<I, K, T>>,
    pub(crate) key: Key<I, K>,
    pub(crate) search_only: bool,
    pub(crate) context: Option<CancellationToken>,
}

impl<I: std::fmt::Debug, K: std::fmt::Debug, T> std::fmt::Debug for ResolvedLookup<I, K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedLookup")
            .field("entry", &self.entry)
            .field("key", &self.key)
            .field("search_only", &self.search_only)
            .field("context", &self.context)
            .finish()
    }
}

pub(crate) fn resolve_lookup<I, K, T>(
    opts: impl IntoIterator<Item = LookupOption<I, K, T>>,
) -> Result<ResolvedLookup<I, K, T>, CacheError>
where
    I: Clone,
    K: Clone,
{
    let mut entry = None;
    let mut key = None;
    let mut search_only = false;
    let mut context = None;

    for opt in opts {
        match opt {
            LookupOption::ByKey(k) => {
                if key.is_some() {
                    return Err(CacheError::DuplicateOption);
                }
                key = Some(k);
            }
            LookupOption::ByEntry(e) => {
                if key.is_some() {
                    return Err(CacheError::DuplicateOption);
                }
                key = Some(e.keys.first().cloned().ok_or(CacheError::NoKey)?);
                entry = Some(e);
            }
            LookupOption::SearchCache => search_only = true,
            LookupOption::WithContext(token) => {
                if context.is_some() {
                    return Err(CacheError::DuplicateOption);
                }
                context = Some(token);
            }
        }
    }

    let key = key.ok_or(CacheError::NoKey)?;
    Ok(ResolvedLookup {
        entry,
        key,
        search_only,
        context,
    })
}

/// Selects what [`clean`](crate::FutureCache::clean) removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanFlag {
    /// Complete entries carrying an object.
    Objects,
    /// Complete entries carrying an error.
    Errors,
    /// Pending entries; their factories are canceled and their waiters
    /// observe [`CacheError::Canceled`].
    Pending,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CleanSelection {
    pub(crate) objects: bool,
    pub(crate) errors: bool,
    pub(crate) pending: bool,
}

/// An empty flag set cleans everything.
pub(crate) fn resolve_clean(flags: &[CleanFlag]) -> CleanSelection {
    if flags.is_empty() {
        return CleanSelection {
            objects: true,
            errors: true,
            pending: true,
        };
    }

    let mut selection = CleanSelection {
        objects: false,
        errors: false,
        pending: false,
    };
    for flag in flags {
        match flag {
            CleanFlag::Objects => selection.objects = true,
            CleanFlag::Errors => selection.errors = true,
            CleanFlag::Pending => selection.pending = true,
        }
    }
    selection
}
