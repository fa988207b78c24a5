use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::OrderCache;
use crate::db::{OrderRepository, RepositoryError};
use crate::domain::order::{validate, Order, OrderError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryPolicy, RetryResult};

// ============================================================================
// Order Service
// ============================================================================
//
// Single entry point for the ingestion loop and the read endpoint.
//
// save: validate -> repository (bounded retry on transient errors) -> cache
// get:  cache -> repository on miss -> optional backfill
//
// The cache is written only after the repository committed, so it never
// holds an order that is not durably stored.
//
// ============================================================================

pub struct OrderService {
    cache: Arc<OrderCache>,
    repository: Arc<dyn OrderRepository>,
    metrics: Arc<Metrics>,
    retry_policy: RetryPolicy,
    backfill_on_miss: bool,
}

impl OrderService {
    pub fn new(
        cache: Arc<OrderCache>,
        repository: Arc<dyn OrderRepository>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            repository,
            metrics,
            retry_policy: RetryPolicy::default(),
            backfill_on_miss: true,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_backfill_on_miss(mut self, backfill_on_miss: bool) -> Self {
        self.backfill_on_miss = backfill_on_miss;
        self
    }

    pub fn cache(&self) -> &Arc<OrderCache> {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn OrderRepository> {
        &self.repository
    }

    /// Validate, persist and cache one order
    pub async fn save(&self, order: Order) -> Result<(), OrderError> {
        if let Err(errors) = validate(&order) {
            tracing::warn!(
                order_uid = %order.order_uid,
                violations = errors.len(),
                errors = %errors,
                "Order rejected by validation"
            );
            return Err(errors.into());
        }

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let repository = &self.repository;
        let (order_ref, attempts_ref) = (&order, &attempts);

        let result = retry_on_transient(&self.retry_policy, move |attempt| {
            attempts_ref.store(attempt, Ordering::Relaxed);
            repository.save(order_ref)
        })
        .await;

        self.metrics
            .record_persist(started.elapsed().as_secs_f64(), attempts.load(Ordering::Relaxed));

        match result {
            RetryResult::Success(()) => {}
            RetryResult::Failed { error, attempts } => {
                tracing::error!(
                    order_uid = %order.order_uid,
                    attempts,
                    error = %error,
                    "Order not persisted, storage still unavailable"
                );
                return Err(error.into());
            }
            RetryResult::PermanentFailure(error) => {
                tracing::error!(
                    order_uid = %order.order_uid,
                    track_number = %order.track_number,
                    error = %error,
                    "Order not persisted"
                );
                return Err(error.into());
            }
        }

        let order_uid = order.order_uid.clone();
        self.cache.set(order).await;
        self.metrics.set_cache_size(self.cache.len().await);

        tracing::debug!(order_uid = %order_uid, "Order cached");
        Ok(())
    }

    /// Cache-aside lookup; `Ok(None)` when the order exists nowhere
    pub async fn get(&self, order_uid: &str) -> Result<Option<Order>, OrderError> {
        if let Some(order) = self.cache.get(order_uid).await {
            self.metrics.record_cache_lookup(true);
            tracing::debug!(order_uid, "Cache hit");
            return Ok(Some(order));
        }

        self.metrics.record_cache_lookup(false);
        tracing::debug!(order_uid, "Cache miss, querying storage");

        let order = self.repository.get_by_id(order_uid).await?;

        if let Some(order) = &order {
            if self.backfill_on_miss {
                self.cache.set(order.clone()).await;
                self.metrics.set_cache_size(self.cache.len().await);
                tracing::debug!(order_uid, "Cache backfilled from storage");
            }
        }

        Ok(order)
    }

    /// Rebuild the cache from storage and compare its size with the row count
    pub async fn restore_cache(&self) -> Result<usize, RepositoryError> {
        let restored = self.cache.restore_from_source(self.repository.as_ref()).await?;
        let cached = self.cache.len().await;
        self.metrics.set_cache_size(cached);

        let stored = self.repository.count().await?;
        if stored != cached as i64 {
            tracing::warn!(stored, cached, "Cache size differs from stored order count");
        }

        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryOrderRepository;
    use crate::domain::order::{fixtures, Rule};
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn service(repo: Arc<InMemoryOrderRepository>) -> OrderService {
        OrderService::new(
            Arc::new(OrderCache::new()),
            repo,
            Arc::new(Metrics::new().unwrap()),
        )
        .with_retry_policy(fast_retry(3))
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());

        let mut order = fixtures::order("a1", "t1");
        order.items.push(fixtures::item("t1", 2));
        order.items.push(fixtures::item("t1", 3));

        service.save(order.clone()).await.unwrap();

        assert_eq!(service.get("a1").await.unwrap(), Some(order.clone()));
        assert_eq!(repo.get_by_id("a1").await.unwrap(), Some(order));
    }

    #[tokio::test]
    async fn test_validation_failure_is_neither_persisted_nor_cached() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());

        let mut order = fixtures::order("a1", "t1");
        order.items[0].price = -1;

        let err = service.save(order).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(repo.save_calls(), 0);
        assert!(service.cache().is_empty().await);
        assert_eq!(service.get("a1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_item_insert_leaves_no_rows() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.fail_item_insert(true);
        let service = service(repo.clone());

        let err = service.save(fixtures::order("a1", "t1")).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::Persistence(RepositoryError::Constraint(_))
        ));
        assert_eq!(repo.row_counts(), (0, 0, 0, 0));
        assert!(service.cache().get("a1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_track_number_keeps_first_order() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());

        let first = fixtures::order("a1", "t1");
        service.save(first.clone()).await.unwrap();

        let err = service.save(fixtures::order("a2", "t1")).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::Persistence(RepositoryError::Conflict(_))
        ));
        assert_eq!(repo.row_counts(), (1, 1, 1, 1));
        assert_eq!(service.get("a1").await.unwrap(), Some(first));
        assert_eq!(service.get("a2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());

        service.save(fixtures::order("a1", "t1")).await.unwrap();
        let _ = service.save(fixtures::order("a1", "t2")).await;

        assert_eq!(repo.save_calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.fail_transiently(2);
        let service = service(repo.clone());

        service.save(fixtures::order("a1", "t1")).await.unwrap();

        assert_eq!(repo.save_calls(), 3);
        assert!(service.cache().get("a1").await.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.fail_transiently(5);
        let service = service(repo.clone());

        let err = service.save(fixtures::order("a1", "t1")).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::Persistence(RepositoryError::Unavailable(_))
        ));
        assert_eq!(repo.save_calls(), 3);
        assert!(service.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_rejected_resubmission_keeps_original() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());

        let original = fixtures::order("a1", "t1");
        service.save(original.clone()).await.unwrap();

        let mut resubmitted = fixtures::order("a1", "t1");
        resubmitted.items.clear();

        let err = service.save(resubmitted).await.unwrap_err();
        match err {
            OrderError::Validation(errors) => assert!(errors.contains("items", Rule::NonEmpty)),
            other => panic!("expected validation error, got {:?}", other),
        }

        assert_eq!(service.get("a1").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_read_miss_backfills_cache() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.insert_raw(fixtures::order("a1", "t1"));
        let service = service(repo.clone());

        assert!(service.cache().get("a1").await.is_none());
        assert!(service.get("a1").await.unwrap().is_some());
        assert!(service.cache().get("a1").await.is_some());
    }

    #[tokio::test]
    async fn test_read_miss_without_backfill() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.insert_raw(fixtures::order("a1", "t1"));
        let service = service(repo.clone()).with_backfill_on_miss(false);

        assert!(service.get("a1").await.unwrap().is_some());
        assert!(service.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_storage_failure_on_read_is_an_error() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let service = service(repo.clone());
        repo.fail_transiently(1);

        let err = service.get("a1").await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::Persistence(RepositoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_cache_matches_row_count() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        for i in 0..5 {
            repo.insert_raw(fixtures::order(&format!("a{}", i), &format!("t{}", i)));
        }
        let service = service(repo.clone());

        assert_eq!(service.restore_cache().await.unwrap(), 5);
        assert_eq!(service.cache().len().await as i64, repo.count().await.unwrap());

        assert_eq!(service.restore_cache().await.unwrap(), 5);
        assert_eq!(service.cache().len().await, 5);
    }

    #[tokio::test]
    async fn test_restart_restores_orders_as_saved() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let before_restart = service(repo.clone());

        let mut saved = Vec::new();
        for (i, date_created) in ["2021-11-26T06:22:19+03:00", "2021-11-26T06:22:19.5Z"]
            .iter()
            .enumerate()
        {
            let mut order = fixtures::order(&format!("a{}", i), &format!("t{}", i));
            order.date_created = date_created.to_string();
            before_restart.save(order.clone()).await.unwrap();
            saved.push(order);
        }

        let after_restart = service(repo.clone());
        after_restart.restore_cache().await.unwrap();
        for order in &saved {
            assert_eq!(after_restart.cache().get(&order.order_uid).await.as_ref(), Some(order));
            assert_eq!(
                before_restart.get(&order.order_uid).await.unwrap(),
                after_restart.get(&order.order_uid).await.unwrap()
            );
        }

        after_restart.restore_cache().await.unwrap();
        assert_eq!(after_restart.cache().len().await, saved.len());
        for order in &saved {
            assert_eq!(after_restart.cache().get(&order.order_uid).await.as_ref(), Some(order));
        }
    }
}
