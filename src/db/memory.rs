use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::repository::{OrderRepository, RepositoryError};
use crate::domain::order::Order;

// ============================================================================
// In-Memory Order Repository (tests only)
// ============================================================================
//
// Mirrors the uniqueness rules of the SQL schema. Every check runs before
// any row is counted, so a failing save leaves nothing behind. Faults can be
// injected to exercise retry and rollback paths.
//
// ============================================================================

#[derive(Default)]
struct State {
    orders: HashMap<String, Order>,
    /// Insertion order, used by get_all
    order_uids: Vec<String>,
    deliveries: usize,
    payments: usize,
    items: usize,
    fail_item_insert: bool,
    transient_failures: u32,
    save_calls: u32,
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    state: Mutex<State>,
}

/// Row counts per table: (deliveries, payments, orders, items)
pub type RowCounts = (usize, usize, usize, usize);

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the item insert of every following save, as a failing CHECK would
    pub fn fail_item_insert(&self, fail: bool) {
        self.state.lock().unwrap().fail_item_insert = fail;
    }

    /// Report the database as unavailable for the next `n` calls
    pub fn fail_transiently(&self, n: u32) {
        self.state.lock().unwrap().transient_failures = n;
    }

    pub fn save_calls(&self) -> u32 {
        self.state.lock().unwrap().save_calls
    }

    pub fn row_counts(&self) -> RowCounts {
        let state = self.state.lock().unwrap();
        (state.deliveries, state.payments, state.orders.len(), state.items)
    }

    /// Insert bypassing every check, as if written by another process
    pub fn insert_raw(&self, order: Order) {
        let mut state = self.state.lock().unwrap();
        state.deliveries += 1;
        state.payments += 1;
        state.items += order.items.len();
        state.order_uids.push(order.order_uid.clone());
        state.orders.insert(order.order_uid.clone(), order);
    }

    fn take_transient_failure(state: &mut State) -> Result<(), RepositoryError> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RepositoryError::Unavailable("connection reset by peer".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.save_calls += 1;
        Self::take_transient_failure(&mut state)?;

        if state.orders.contains_key(&order.order_uid) {
            return Err(RepositoryError::Conflict(format!(
                "duplicate key value violates unique constraint \"orders_pkey\": {}",
                order.order_uid
            )));
        }
        if state
            .orders
            .values()
            .any(|existing| existing.track_number == order.track_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "duplicate key value violates unique constraint \"orders_track_number_key\": {}",
                order.track_number
            )));
        }
        if state.fail_item_insert && !order.items.is_empty() {
            return Err(RepositoryError::Constraint(
                "new row for relation \"items\" violates check constraint \"items_price_check\""
                    .into(),
            ));
        }

        state.deliveries += 1;
        state.payments += 1;
        state.items += order.items.len();
        state.order_uids.push(order.order_uid.clone());
        state.orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        Self::take_transient_failure(&mut state)?;
        Ok(state.orders.get(order_uid).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        Self::take_transient_failure(&mut state)?;
        Ok(state
            .order_uids
            .iter()
            .filter_map(|uid| state.orders.get(uid).cloned())
            .collect())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.state.lock().unwrap().orders.len() as i64)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        Self::take_transient_failure(&mut state)
    }
}
