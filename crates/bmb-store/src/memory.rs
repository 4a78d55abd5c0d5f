//! Deterministic in-memory order store.
//!
//! `BTreeMap` keyed by order id gives stable listing order; the single mutex
//! is the store's serialization point, held only across the verify+mutate of
//! a compare-and-set (never across an external call).

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use bmb_orders::{legal_transition, Actor, NewOrder, Order, OrderState, TransitionEvent};

use crate::{AssigneePatch, OrderPatch, OrderStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    orders: BTreeMap<Uuid, Order>,
    events: Vec<TransitionEvent>,
}

/// In-memory [`OrderStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Inner>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a panic mid-mutation in another thread;
        // the data is still structurally valid (mutations are single writes).
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError> {
        self.lock()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::NotFound(order_id))
    }

    async fn create(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        if new_order.items.is_empty() {
            return Err(StoreError::EmptyOrder);
        }
        if let Some(item) = new_order.items.iter().find(|i| i.qty == 0) {
            return Err(StoreError::ZeroQuantityItem(item.item_id));
        }

        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            customer_id: new_order.customer_id,
            items: new_order.items,
            delivery_address: new_order.delivery_address,
            delivery_phone: new_order.delivery_phone,
            state: OrderState::Created,
            assignee: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut inner = self.lock();
        inner.events.push(TransitionEvent {
            order_id: order.order_id,
            from: OrderState::Created,
            to: OrderState::Created,
            actor: Actor::Customer(order.customer_id),
            at: now,
            version: 1,
        });
        inner.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn compare_and_transition(
        &self,
        order_id: Uuid,
        expected_version: i64,
        expected_state: OrderState,
        new_state: OrderState,
        patch: OrderPatch,
        actor: Actor,
    ) -> Result<Order, StoreError> {
        debug_assert!(
            legal_transition(expected_state, new_state),
            "caller requested an illegal transition {expected_state} -> {new_state}"
        );

        let mut inner = self.lock();
        let order = inner
            .orders
            .get(&order_id)
            .ok_or(StoreError::NotFound(order_id))?;

        if order.version != expected_version || order.state != expected_state {
            return Err(StoreError::Conflict {
                order_id,
                expected_version,
                expected_state,
                actual_version: order.version,
                actual_state: order.state,
            });
        }

        let now = Utc::now();
        let mut updated = order.clone();
        updated.state = new_state;
        match patch.assignee {
            AssigneePatch::Keep => {}
            AssigneePatch::Set(tm) => updated.assignee = Some(tm),
            AssigneePatch::Clear => updated.assignee = None,
        }
        updated.version += 1;
        updated.updated_at = now;

        debug_assert!(
            updated.assignment_invariant_holds(),
            "assignment invariant violated by {expected_state} -> {new_state} with {patch:?}"
        );

        inner.events.push(TransitionEvent {
            order_id,
            from: expected_state,
            to: new_state,
            actor,
            at: now,
            version: updated.version,
        });
        inner.orders.insert(order_id, updated.clone());
        Ok(updated)
    }

    async fn list_claimable(&self) -> Result<Vec<Order>, StoreError> {
        let inner = self.lock();
        let mut pool: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.state == OrderState::Created)
            .cloned()
            .collect();
        pool.sort_by_key(|o| o.created_at);
        Ok(pool)
    }

    async fn list_assigned(&self, team_member: Uuid) -> Result<Vec<Order>, StoreError> {
        let inner = self.lock();
        let mut assigned: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| !o.state.is_terminal() && o.assignee == Some(team_member))
            .cloned()
            .collect();
        assigned.sort_by_key(|o| o.created_at);
        Ok(assigned)
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<TransitionEvent>, StoreError> {
        let inner = self.lock();
        if !inner.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound(order_id));
        }
        Ok(inner
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
