use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::db::{OrderRepository, RepositoryError};
use crate::domain::order::Order;

// ============================================================================
// Order Cache
// ============================================================================
//
// In-process map from order_uid to the full aggregate. Unbounded, no
// eviction: it holds every order persisted or restored during the lifetime
// of the process.
//
// Many concurrent readers, exclusive writers. Readers get clones, never
// references into the map.
//
// ============================================================================

#[derive(Default)]
pub struct OrderCache {
    orders: RwLock<HashMap<String, Order>>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `order.order_uid`
    pub async fn set(&self, order: Order) {
        let mut orders = self.orders.write().await;
        orders.insert(order.order_uid.clone(), order);
    }

    pub async fn get(&self, order_uid: &str) -> Option<Order> {
        self.orders.read().await.get(order_uid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Load every stored order into the cache, overwriting existing entries.
    ///
    /// The storage read happens before the write lock is taken; the whole
    /// batch is then applied under a single lock. Running it twice leaves the
    /// cache unchanged.
    pub async fn restore_from_source(
        &self,
        source: &dyn OrderRepository,
    ) -> Result<usize, RepositoryError> {
        let stored = source.get_all().await?;
        let restored = stored.len();

        let mut orders = self.orders.write().await;
        for order in stored {
            orders.insert(order.order_uid.clone(), order);
        }
        let total = orders.len();
        drop(orders);

        tracing::info!(restored, total, "📦 Order cache restored from storage");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryOrderRepository;
    use crate::domain::order::fixtures;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = OrderCache::new();
        assert!(cache.is_empty().await);
        assert!(cache.get("missing").await.is_none());

        cache.set(fixtures::order("uid-1", "TRACK-1")).await;

        let hit = cache.get("uid-1").await.unwrap();
        assert_eq!(hit, fixtures::order("uid-1", "TRACK-1"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites_same_key() {
        let cache = OrderCache::new();
        cache.set(fixtures::order("uid-1", "TRACK-1")).await;

        let mut updated = fixtures::order("uid-1", "TRACK-1");
        updated.locale = "ru".to_string();
        cache.set(updated).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("uid-1").await.unwrap().locale, "ru");
    }

    #[tokio::test]
    async fn test_returned_order_is_a_copy() {
        let cache = OrderCache::new();
        cache.set(fixtures::order("uid-1", "TRACK-1")).await;

        let mut copy = cache.get("uid-1").await.unwrap();
        copy.items.clear();

        assert_eq!(cache.get("uid-1").await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(OrderCache::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let uid = format!("uid-{}", i);
                cache.set(fixtures::order(&uid, &format!("TRACK-{}", i))).await;
                for _ in 0..10 {
                    assert_eq!(cache.get(&uid).await.unwrap().order_uid, uid);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 16);
    }

    #[tokio::test]
    async fn test_restore_from_source() {
        let repo = InMemoryOrderRepository::new();
        repo.insert_raw(fixtures::order("uid-1", "TRACK-1"));
        repo.insert_raw(fixtures::order("uid-2", "TRACK-2"));

        let cache = OrderCache::new();
        let restored = cache.restore_from_source(&repo).await.unwrap();

        assert_eq!(restored, 2);
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("uid-2").await.unwrap().track_number, "TRACK-2");
    }

    #[tokio::test]
    async fn test_repeated_restore_yields_identical_content() {
        let repo = InMemoryOrderRepository::new();
        let mut offset_order = fixtures::order("uid-1", "TRACK-1");
        offset_order.date_created = "2021-11-26T06:22:19+03:00".to_string();
        repo.insert_raw(offset_order);
        repo.insert_raw(fixtures::order("uid-2", "TRACK-2"));
        let uids = ["uid-1", "uid-2"];

        let cache = OrderCache::new();
        cache.restore_from_source(&repo).await.unwrap();
        let mut first = Vec::new();
        for uid in uids {
            first.push(cache.get(uid).await.unwrap());
        }

        assert_eq!(cache.restore_from_source(&repo).await.unwrap(), 2);
        assert_eq!(cache.len().await, 2);
        for (uid, expected) in uids.iter().zip(&first) {
            assert_eq!(&cache.get(uid).await.unwrap(), expected);
        }
        assert_eq!(first[0].date_created, "2021-11-26T06:22:19+03:00");
    }

    #[tokio::test]
    async fn test_restore_failure_leaves_cache_untouched() {
        let repo = InMemoryOrderRepository::new();
        repo.insert_raw(fixtures::order("uid-1", "TRACK-1"));
        repo.fail_transiently(1);

        let cache = OrderCache::new();
        cache.set(fixtures::order("uid-9", "TRACK-9")).await;

        let result = cache.restore_from_source(&repo).await;

        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("uid-1").await.is_none());
    }
}
