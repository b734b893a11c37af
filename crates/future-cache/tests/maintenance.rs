mod common;

use future_cache::{
    factory, CacheError, CleanFlag, Entry, FutureCache, Index, Key, LookupOption,
};

type TestCache = FutureCache<&'static str, u32, String>;

fn refusing_index(index: &'static str) -> Index<&'static str, u32, String> {
    Index::new(
        index,
        factory(move |_token, _key| async move { panic!("the {index} factory must not run") }),
    )
}

/// A factory that parks until its entry is completed by other means, then
/// gives up.
fn parked_index(index: &'static str) -> Index<&'static str, u32, String> {
    Index::new(
        index,
        factory(move |token, _key| async move {
            token.cancelled().await;
            None
        }),
    )
}

async fn seed(cache: &TestCache, object: &str, keys: Vec<Key<&'static str, u32>>) {
    cache
        .lookup([LookupOption::ByEntry(Entry::new(object.to_owned(), keys))])
        .await
        .unwrap();
}

async fn seed_error(cache: &TestCache, error: CacheError, keys: Vec<Key<&'static str, u32>>) {
    cache
        .lookup([LookupOption::ByEntry(Entry::for_error(error, keys))])
        .await
        .unwrap_err();
}

async fn assert_not_cached(cache: &TestCache, index: &'static str, key: u32) {
    let err = cache
        .lookup([
            LookupOption::ByKey(Key::new(index, key)),
            LookupOption::SearchCache,
        ])
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::NotCached);
}

#[tokio::test]
async fn evict_removes_an_entry_from_every_index() {
    common::setup();

    let cache = TestCache::new([refusing_index("a"), refusing_index("b")]).unwrap();
    seed(&cache, "O", vec![Key::new("a", 1), Key::new("b", 2)]).await;

    cache
        .evict([LookupOption::ByKey(Key::new("b", 2))])
        .unwrap();

    assert_not_cached(&cache, "a", 1).await;
    assert_not_cached(&cache, "b", 2).await;
}

#[tokio::test]
async fn evicting_nothing_is_fine() {
    common::setup();

    let cache = TestCache::new([refusing_index("a")]).unwrap();
    cache
        .evict([LookupOption::ByKey(Key::new("a", 1))])
        .unwrap();

    let err = cache
        .evict([LookupOption::ByKey(Key::new("nope", 1))])
        .unwrap_err();
    assert_eq!(err, CacheError::BadIndex);
}

#[tokio::test]
async fn evicting_a_pending_entry_leaves_it_alone() {
    common::setup();

    let cache = TestCache::new([parked_index("a")]).unwrap();
    let _future = cache
        .lookup_future([LookupOption::ByKey(Key::new("a", 1))])
        .unwrap();

    cache
        .evict([LookupOption::ByKey(Key::new("a", 1))])
        .unwrap();

    // The pending slot is still there.
    assert_eq!(cache.contents_future(&"a").unwrap().len(), 1);
    assert!(cache.contents(&"a").unwrap().is_empty());
}

#[tokio::test]
async fn contents_snapshots_completed_entries() {
    common::setup();

    let cache = TestCache::new([parked_index("a")]).unwrap();
    seed(&cache, "one", vec![Key::new("a", 1)]).await;
    seed_error(
        &cache,
        CacheError::permanent("broken"),
        vec![Key::new("a", 2)],
    )
    .await;
    let _pending = cache
        .lookup_future([LookupOption::ByKey(Key::new("a", 3))])
        .unwrap();

    // Pending entries are skipped; cached errors are included.
    let mut snapshot = cache.contents(&"a").unwrap();
    snapshot.sort_by_key(|entry| entry.keys[0].key);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].object.as_deref().map(String::as_str), Some("one"));
    assert_eq!(
        snapshot[1].error,
        Some(CacheError::Permanent("broken".into()))
    );

    let err = cache.contents(&"nope").unwrap_err();
    assert_eq!(err, CacheError::BadIndex);
}

#[tokio::test]
async fn contents_future_covers_pending_entries_too() {
    common::setup();

    let release = std::sync::Arc::new(tokio::sync::Notify::new());
    let released = release.clone();
    let cache = TestCache::new([Index::new(
        "a",
        factory(move |_token, key| {
            let release = released.clone();
            async move {
                release.notified().await;
                Some(Entry::new("later".to_owned(), vec![key]))
            }
        }),
    )])
    .unwrap();
    seed(&cache, "done", vec![Key::new("a", 1)]).await;
    let _pending = cache
        .lookup_future([LookupOption::ByKey(Key::new("a", 2))])
        .unwrap();

    let futures = cache.contents_future(&"a").unwrap();
    assert_eq!(futures.len(), 2);

    // Completing the pending entry resolves the matching future.
    release.notify_one();
    let mut seen = Vec::new();
    for mut future in futures {
        seen.push(future.wait().await.unwrap().unwrap().as_str().to_owned());
    }
    seen.sort();
    assert_eq!(seen, ["done", "later"]);

    let err = cache.contents_future(&"nope").unwrap_err();
    assert_eq!(err, CacheError::BadIndex);
}

#[tokio::test]
async fn clean_pending_cancels_waiters_and_drops_the_slots() {
    common::setup();

    let cache = TestCache::new([parked_index("a")]).unwrap();
    let mut future = cache
        .lookup_future([LookupOption::ByKey(Key::new("a", 1))])
        .unwrap();

    cache.clean(&[CleanFlag::Pending]);

    let err = future.wait().await.unwrap_err();
    assert_eq!(err, CacheError::Canceled);
    assert_not_cached(&cache, "a", 1).await;
}

#[tokio::test]
async fn clean_pending_spares_completed_entries() {
    common::setup();

    let cache = TestCache::new([parked_index("a")]).unwrap();
    seed(&cache, "kept", vec![Key::new("a", 1)]).await;
    let _pending = cache
        .lookup_future([LookupOption::ByKey(Key::new("a", 2))])
        .unwrap();

    cache.clean(&[CleanFlag::Pending]);

    assert_eq!(cache.contents(&"a").unwrap().len(), 1);
    assert_eq!(cache.contents_future(&"a").unwrap().len(), 1);
}

#[tokio::test]
async fn clean_objects_spares_cached_errors() {
    common::setup();

    let cache = TestCache::new([refusing_index("a")]).unwrap();
    seed(&cache, "object", vec![Key::new("a", 1)]).await;
    seed_error(
        &cache,
        CacheError::permanent("broken"),
        vec![Key::new("a", 2)],
    )
    .await;

    cache.clean(&[CleanFlag::Objects]);

    assert_not_cached(&cache, "a", 1).await;
    let err = cache
        .lookup([
            LookupOption::ByKey(Key::new("a", 2)),
            LookupOption::SearchCache,
        ])
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::Permanent("broken".into()));
}

#[tokio::test]
async fn clean_errors_spares_cached_objects() {
    common::setup();

    let cache = TestCache::new([refusing_index("a")]).unwrap();
    seed(&cache, "object", vec![Key::new("a", 1)]).await;
    seed_error(
        &cache,
        CacheError::permanent("broken"),
        vec![Key::new("a", 2)],
    )
    .await;

    cache.clean(&[CleanFlag::Errors]);

    assert_not_cached(&cache, "a", 2).await;
    assert_eq!(cache.contents(&"a").unwrap().len(), 1);
}

#[tokio::test]
async fn clean_without_flags_clears_everything() {
    common::setup();

    let cache = TestCache::new([refusing_index("a"), parked_index("b")]).unwrap();
    seed(&cache, "object", vec![Key::new("a", 1)]).await;
    seed_error(
        &cache,
        CacheError::permanent("broken"),
        vec![Key::new("a", 2)],
    )
    .await;
    let mut pending = cache
        .lookup_future([LookupOption::ByKey(Key::new("b", 3))])
        .unwrap();

    cache.clean(&[]);

    assert!(cache.contents(&"a").unwrap().is_empty());
    assert!(cache.contents_future(&"a").unwrap().is_empty());
    assert!(cache.contents_future(&"b").unwrap().is_empty());
    assert_eq!(pending.wait().await.unwrap_err(), CacheError::Canceled);
}

#[tokio::test]
async fn clean_acts_per_slot_not_per_entry() {
    common::setup();

    // A multi-indexed entry whose slots disagree: one index was already
    // evicted slot-by-slot. Clean never chases the entry's key list, so the
    // other slot goes away only because clean visits every index anyway.
    let cache = TestCache::new([refusing_index("a"), refusing_index("b")]).unwrap();
    seed(&cache, "O", vec![Key::new("a", 1), Key::new("b", 2)]).await;

    cache.clean(&[CleanFlag::Objects]);

    assert_not_cached(&cache, "a", 1).await;
    assert_not_cached(&cache, "b", 2).await;
}
