//! An in-memory, thread-safe, multi-index future cache.
//!
//! A [`FutureCache`] decouples the *request* for a value from the *lookup*
//! of its result. Concurrent lookups of the same missing key are coalesced
//! so the index's factory runs at most once per key, and every waiting
//! caller receives either the computed entry or a cancellation/error.
//! Entries may be reachable under several independent keys (one per index),
//! and index membership can be rewritten atomically with
//! [`reindex`](FutureCache::reindex).
//!
//! Factories run on freshly spawned tokio tasks, outside the cache lock, so
//! a slow factory never stalls unrelated lookups. Waiting is cancellable
//! per-caller through a [`CancellationToken`] without affecting the factory
//! or any other waiter.
//!
//! ```
//! use future_cache::{factory, Entry, FutureCache, Index, Key, LookupOption};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! let cache: FutureCache<&str, u32, String> = FutureCache::new([Index::new(
//!     "by-id",
//!     factory(|_token, key| async move {
//!         Some(Entry::new(format!("object-{}", key.key), vec![key]))
//!     }),
//! )])
//! .unwrap();
//!
//! let object = cache
//!     .lookup([LookupOption::ByKey(Key::new("by-id", 7))])
//!     .await
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(object.as_str(), "object-7");
//! # }
//! ```
//!
//! Negative results are not cached unless the factory marks them as
//! [permanent](CacheError::permanent); transient errors are delivered to
//! the waiters that triggered them and the slot is removed again.

#![warn(missing_docs)]

mod cache;
mod entry;
mod error;
mod future;
mod index;
mod options;
mod reindex;

pub use cache::FutureCache;
pub use entry::{Entry, Key};
pub use error::CacheError;
pub use future::{CacheFuture, EntryReceiver};
pub use index::{factory, Factory, Index};
pub use options::{CleanFlag, LookupOption};

pub use tokio_util::sync::CancellationToken;
