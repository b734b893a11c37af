use std::future;
use std::sync::Arc;

use futures::channel::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, SlotRef};
use crate::error::CacheError;

/// The receiving end of a future's delivery channel. Yields exactly one
/// [`Entry`].
pub type EntryReceiver<I, K, T> = oneshot::Receiver<Entry<I, K, T>>;

/// The promise to deliver a cache entry at some later point.
///
/// Returned by [`lookup_future`] and [`contents_future`]. A future holds a
/// reference to its entry and, while the entry is still pending, one waiter
/// slot on it. Waiting, draining the channel and cancellation all operate
/// on that one slot; the entry itself and any other waiters are never
/// affected.
///
/// Mixing [`wait`](Self::wait) and [`channel`](Self::channel) on the same
/// future is unspecified; pick one.
///
/// [`lookup_future`]: crate::FutureCache::lookup_future
/// [`contents_future`]: crate::FutureCache::contents_future
pub struct CacheFuture<I, K, T> {
    slot: SlotRef<I, K, T>,
    receiver: Option<EntryReceiver<I, K, T>>,
    cookie: u64,
    canceled: bool,
}

impl<I, K, T> std::fmt::Debug for CacheFuture<I, K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFuture")
            .field("cookie", &self.cookie)
            .field("canceled", &self.canceled)
            .field("pending", &self.receiver.is_some())
            .finish()
    }
}

impl<I, K, T> CacheFuture<I, K, T> {
    /// Binds a future to a slot, registering a waiter if the slot is still
    /// pending. Must be called with the cache mutex held so registration
    /// cannot race a completion.
    pub(crate) fn new(slot: SlotRef<I, K, T>) -> Self {
        match slot.register_waiter() {
            Some((cookie, receiver)) => CacheFuture {
                slot,
                receiver: Some(receiver),
                cookie,
                canceled: false,
            },
            None => CacheFuture {
                slot,
                receiver: None,
                cookie: 0,
                canceled: false,
            },
        }
    }

    /// Waits for the entry to complete.
    pub async fn wait(&mut self) -> Result<Option<Arc<T>>, CacheError> {
        self.wait_inner(None, None).await
    }

    /// Waits for the entry to complete, unless `token` fires first.
    ///
    /// Cancellation through the token only abandons this wait; the waiter
    /// slot stays installed, so a later wait still observes the result.
    pub async fn wait_with_token(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Option<Arc<T>>, CacheError> {
        self.wait_inner(Some(token), None).await
    }

    /// Waits for the entry to complete, giving up at `deadline` with
    /// [`CacheError::DeadlineExceeded`]. Like a token cancellation, an
    /// expired deadline leaves the waiter slot installed.
    pub async fn wait_until(&mut self, deadline: Instant) -> Result<Option<Arc<T>>, CacheError> {
        self.wait_inner(None, Some(deadline)).await
    }

    async fn wait_inner(
        &mut self,
        token: Option<&CancellationToken>,
        deadline: Option<Instant>,
    ) -> Result<Option<Arc<T>>, CacheError> {
        if self.canceled {
            return Err(CacheError::FutureCanceled);
        }

        if let Some(receiver) = self.receiver.as_mut() {
            let canceled = async {
                match token {
                    Some(token) => token.cancelled().await,
                    None => future::pending().await,
                }
            };
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                delivered = receiver => {
                    self.receiver = None;
                    match delivered {
                        Ok(entry) if !entry.is_sentinel() => return entry.result(),
                        // An empty or dropped delivery falls through to the
                        // stored content.
                        _ => {}
                    }
                }
                _ = canceled => return Err(CacheError::Canceled),
                _ = expired => return Err(CacheError::DeadlineExceeded),
            }
        }

        match self.slot.content() {
            Some(content) => content.result(),
            // A waiterless future over a pending slot; the protocol never
            // produces one, but don't pretend we have a result.
            None => Err(CacheError::NotCached),
        }
    }

    /// Hands out the delivery channel for this future.
    ///
    /// For an already-complete entry a filled one-shot channel is
    /// synthesised. Returns `None` for a canceled future, or when no
    /// delivery can ever arrive on this future again.
    pub fn channel(&mut self) -> Option<EntryReceiver<I, K, T>>
    where
        I: Clone,
        K: Clone,
    {
        if self.canceled {
            return None;
        }
        if let Some(receiver) = self.receiver.take() {
            return Some(receiver);
        }

        let content = self.slot.content()?;
        let (sender, receiver) = oneshot::channel();
        sender.send(content.as_ref().clone()).ok();
        Some(receiver)
    }

    /// Signals that this caller is no longer interested.
    ///
    /// Idempotent. Removes only this future's waiter slot; the entry, its
    /// factory and any other waiters live on. A canceled future's `wait`
    /// reports [`CacheError::FutureCanceled`].
    pub fn cancel(&mut self) {
        if !self.canceled {
            self.slot.cancel_waiter(self.cookie);
            self.receiver = None;
            self.canceled = true;
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::entry::{Key, Slot};

    type TestEntry = Entry<&'static str, u32, String>;

    fn complete_slot(object: &str) -> SlotRef<&'static str, u32, String> {
        Slot::from_entry(Arc::new(TestEntry::new(
            object.to_owned(),
            vec![Key::new("idx", 1)],
        )))
    }

    #[tokio::test]
    async fn wait_reads_completed_content_directly() {
        let mut future = CacheFuture::new(complete_slot("done"));
        assert!(future.receiver.is_none());
        let object = future.wait().await.unwrap().unwrap();
        assert_eq!(object.as_str(), "done");

        // Waiting again keeps returning the same content.
        let object = future.wait().await.unwrap().unwrap();
        assert_eq!(object.as_str(), "done");
    }

    #[tokio::test]
    async fn wait_receives_a_delivery() {
        let (slot, _token) = Slot::pending();
        let mut future = CacheFuture::new(slot.clone());
        slot.complete(Arc::new(TestEntry::new(
            "delivered".to_owned(),
            vec![Key::new("idx", 1)],
        )));
        let object = future.wait().await.unwrap().unwrap();
        assert_eq!(object.as_str(), "delivered");
    }

    #[tokio::test]
    async fn canceled_wait_leaves_the_slot_installed() {
        let (slot, _factory_token) = Slot::pending();
        let mut future = CacheFuture::new(slot.clone());

        let wait_token = CancellationToken::new();
        wait_token.cancel();
        let err = future.wait_with_token(&wait_token).await.unwrap_err();
        assert_eq!(err, CacheError::Canceled);

        // The real result is still observable afterwards.
        slot.complete(Arc::new(TestEntry::new(
            "late".to_owned(),
            vec![Key::new("idx", 1)],
        )));
        let object = future.wait().await.unwrap().unwrap();
        assert_eq!(object.as_str(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_reports_deadline_exceeded() {
        let (slot, _factory_token) = Slot::<&str, u32, String>::pending();
        let mut future = CacheFuture::new(slot.clone());

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = future.wait_until(deadline).await.unwrap_err();
        assert_eq!(err, CacheError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn wait_after_cancel_is_an_error() {
        let mut future = CacheFuture::new(complete_slot("x"));
        future.cancel();
        future.cancel(); // idempotent
        assert!(future.is_canceled());
        assert_eq!(future.wait().await.unwrap_err(), CacheError::FutureCanceled);
    }

    #[tokio::test]
    async fn channel_is_synthesised_for_completed_entries() {
        let mut future = CacheFuture::new(complete_slot("via-channel"));
        let receiver = future.channel().unwrap();
        let entry = receiver.await.unwrap();
        assert_eq!(
            entry.object.as_deref().map(String::as_str),
            Some("via-channel")
        );
    }

    #[tokio::test]
    async fn channel_of_a_canceled_future_is_gone() {
        let mut future = CacheFuture::new(complete_slot("x"));
        future.cancel();
        assert!(future.channel().is_none());
    }

    #[tokio::test]
    async fn channel_delivers_a_pending_completion() {
        let (slot, _token) = Slot::pending();
        let mut future = CacheFuture::new(slot.clone());
        let receiver = future.channel().unwrap();

        slot.complete(Arc::new(TestEntry::new(
            "pushed".to_owned(),
            vec![Key::new("idx", 1)],
        )));
        let entry = receiver.await.unwrap();
        assert_eq!(entry.object.as_deref().map(String::as_str), Some("pushed"));
    }
}
