use kennel::cache::{CacheKey, DiskCache, TtlCache};
use kennel::model::CostSummary;
use std::time::Duration;

#[test]
fn ttl_cache_serves_fresh_entries() {
    let cache = TtlCache::new(Duration::from_secs(60), 4);
    cache.put("op-1".to_string(), 1);
    assert_eq!(cache.get(&"op-1".to_string()), Some(1));
    assert_eq!(cache.get(&"op-2".to_string()), None);
}

#[test]
fn ttl_cache_expires_entries() {
    let cache = TtlCache::new(Duration::from_millis(20), 4);
    cache.put("op-1".to_string(), 1);
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.get(&"op-1".to_string()), None);
    assert!(cache.is_empty());
}

#[test]
fn ttl_cache_evicts_oldest_when_full() {
    let cache = TtlCache::new(Duration::from_secs(60), 2);
    cache.put("a", 1);
    std::thread::sleep(Duration::from_millis(2));
    cache.put("b", 2);
    cache.put("c", 3);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"a"), None);
    assert_eq!(cache.get(&"c"), Some(3));

    cache.invalidate(&"c");
    assert_eq!(cache.get(&"c"), None);
}

#[test]
fn cache_keys_flatten_paths() {
    let key = CacheKey::new("submission-json", ["my/bucket", "sub1"]);
    assert_eq!(key.to_string(), "submission-json.my_bucket.sub1");
    assert_eq!(CacheKey::submission("my/bucket", "sub1"), key);
    assert_ne!(CacheKey::cost("my/bucket", "sub1"), key);
}

#[tokio::test]
async fn disk_cache_round_trips_values() {
    let cache = DiskCache::in_memory(30).await.unwrap();
    let key = CacheKey::cost("bucket", "sub1");
    assert_eq!(cache.get(&key).await.unwrap(), None);

    let summary = CostSummary {
        clock_h: 1.0,
        cpu_h: 1.5,
        est_cost: 0.2575,
    };
    cache.put_json(&key, &summary).await.unwrap();
    assert_eq!(cache.get_json::<CostSummary>(&key).await.unwrap(), Some(summary));

    // Overwrite in place.
    cache.put(&key, b"{}").await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(b"{}".to_vec()));
}

#[tokio::test]
async fn unreadable_entries_are_misses() {
    let cache = DiskCache::in_memory(30).await.unwrap();
    let key = CacheKey::cost("bucket", "sub1");
    cache.put(&key, b"not json").await.unwrap();
    assert_eq!(cache.get_json::<CostSummary>(&key).await.unwrap(), None);
}

#[tokio::test]
async fn expired_entries_are_ignored_and_pruned() {
    let cache = DiskCache::in_memory(0).await.unwrap();
    let key = CacheKey::submission("bucket", "sub1");
    cache.put(&key, b"{}").await.unwrap();

    assert_eq!(cache.get(&key).await.unwrap(), None);
    assert_eq!(cache.prune().await.unwrap(), 1);
    assert_eq!(cache.prune().await.unwrap(), 0);
}

#[tokio::test]
async fn purge_removes_everything() {
    let cache = DiskCache::in_memory(30).await.unwrap();
    cache
        .put(&CacheKey::submission("bucket", "a"), b"1")
        .await
        .unwrap();
    cache.put(&CacheKey::cost("bucket", "a"), b"2").await.unwrap();

    assert_eq!(cache.prune().await.unwrap(), 0);
    assert_eq!(cache.purge().await.unwrap(), 2);
    assert_eq!(cache.get(&CacheKey::cost("bucket", "a")).await.unwrap(), None);
}
