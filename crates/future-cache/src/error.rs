use thiserror::Error;

/// An error produced by the cache or stored inside one of its entries.
///
/// All variants are cheap to clone and equality-comparable, so a single
/// result can be fanned out to any number of concurrent waiters and callers
/// can match on the sentinel they care about. Factory failures are carried
/// as rendered strings for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// At least one index must be declared at construction time.
    #[error("at least one index must be provided")]
    MissingIndex,
    /// The same option (or index id) was supplied more than once.
    #[error("duplicate option")]
    DuplicateOption,
    /// An index was declared without a factory.
    #[error("index factory is required")]
    MissingFactory,
    /// No primary key was supplied.
    #[error("no key specified")]
    NoKey,
    /// The named index was not declared at construction time.
    #[error("unknown cache index")]
    BadIndex,
    /// `SearchCache` was given and the entry is absent or still pending,
    /// or a reindex target has not resolved yet.
    #[error("key does not exist in cache")]
    NotCached,
    /// The new key set handed to reindex does not line up with the entry's
    /// current indexes, or names an index twice.
    #[error("old keys are not congruent with new keys")]
    IncongruentKeys,
    /// An index named by the entry no longer refers to it.
    #[error("entry not found with specified key")]
    EntryNotFound,
    /// The future's waiter slot was canceled via [`CacheFuture::cancel`].
    ///
    /// [`CacheFuture::cancel`]: crate::CacheFuture::cancel
    #[error("future has been canceled")]
    FutureCanceled,
    /// The wait was canceled, either through its cancellation token or
    /// because the pending entry itself was cleaned out.
    #[error("operation canceled")]
    Canceled,
    /// A deadline-bound wait ran out of time.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A transient factory failure. Delivered to the waiters that triggered
    /// it, never retained by the cache.
    #[error("{0}")]
    Factory(String),
    /// A permanent factory failure. Retained by the cache until explicitly
    /// cleaned, like a regular object.
    #[error("{0}")]
    Permanent(String),
}

impl CacheError {
    /// A transient factory failure from any displayable error.
    pub fn factory(err: impl ToString) -> Self {
        CacheError::Factory(err.to_string())
    }

    /// Marks a factory failure as permanent, i.e. worth caching instead of
    /// retrying on the next lookup.
    pub fn permanent(err: impl ToString) -> Self {
        CacheError::Permanent(err.to_string())
    }

    /// Whether this error should be retained by the cache.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CacheError::Permanent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_marker() {
        assert!(CacheError::permanent("boom").is_permanent());
        assert!(!CacheError::factory("boom").is_permanent());
        assert!(!CacheError::Canceled.is_permanent());
    }

    #[test]
    fn factory_errors_render_their_source() {
        let err = CacheError::factory(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ));
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(err, CacheError::Factory("disk on fire".into()));
    }
}
