//! bmb-store
//!
//! The Order Store contract: the single mutation path for order records.
//!
//! # Contract
//!
//! Every lifecycle transition goes through [`OrderStore::compare_and_transition`],
//! an atomic compare-and-set keyed on `(version, state)`. No direct field
//! writes exist anywhere else, so every transition is observed atomically by
//! all readers, and for a given order id transitions are totally ordered by
//! the version counter. Two callers racing with the same expected version
//! cannot both succeed.
//!
//! Concurrency control is optimistic and lives entirely in the store; no
//! component of the workflow holds an in-process lock across a store call.
//! This keeps the design correct under any number of concurrent
//! request-handling processes.
//!
//! [`MemoryOrderStore`] is the deterministic in-memory implementation used by
//! tests and single-process deployments; `bmb-db` provides the PostgreSQL
//! implementation for everything else.

use async_trait::async_trait;
use uuid::Uuid;

use bmb_orders::{Actor, NewOrder, Order, OrderState, TransitionEvent};

mod memory;

pub use memory::MemoryOrderStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the store contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No order exists with the given id.
    NotFound(Uuid),
    /// The stored `(version, state)` did not match the caller's expectation:
    /// the order was concurrently modified. The caller should refetch and
    /// decide whether the operation still applies.
    Conflict {
        order_id: Uuid,
        expected_version: i64,
        expected_state: OrderState,
        actual_version: i64,
        actual_state: OrderState,
    },
    /// An order must contain at least one line item.
    EmptyOrder,
    /// Every line item must carry a quantity of at least one.
    ZeroQuantityItem(Uuid),
    /// Infrastructure failure in the persistence substrate (connection loss,
    /// constraint violation, ...). Not a workflow outcome.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "order {id} not found"),
            StoreError::Conflict {
                order_id,
                expected_version,
                expected_state,
                actual_version,
                actual_state,
            } => write!(
                f,
                "order {order_id} concurrently modified: expected v{expected_version}/{expected_state}, found v{actual_version}/{actual_state}"
            ),
            StoreError::EmptyOrder => write!(f, "order must contain at least one line item"),
            StoreError::ZeroQuantityItem(item_id) => {
                write!(f, "line item {item_id} has zero quantity")
            }
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// What to do with the `assignee` field during a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneePatch {
    Keep,
    Set(Uuid),
    Clear,
}

/// The mutation applied alongside a compare-and-set transition.
///
/// Deliberately a closed data type rather than a closure: both store
/// implementations (in-memory and SQL) must be able to apply it, and the
/// state machine only ever needs to touch the assignee. Timestamps and the
/// version counter are owned by the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPatch {
    pub assignee: AssigneePatch,
}

impl OrderPatch {
    /// Transition with no field changes beyond state/version/timestamp.
    pub fn none() -> Self {
        Self {
            assignee: AssigneePatch::Keep,
        }
    }

    /// Attach a team member (claim).
    pub fn assign(team_member: Uuid) -> Self {
        Self {
            assignee: AssigneePatch::Set(team_member),
        }
    }

    /// Detach the team member (reject, cancel of an assigned order).
    pub fn clear_assignee() -> Self {
        Self {
            assignee: AssigneePatch::Clear,
        }
    }
}

// ---------------------------------------------------------------------------
// OrderStore trait
// ---------------------------------------------------------------------------

/// Persistence contract for order records.
///
/// Implementations must be object-safe (`Arc<dyn OrderStore>`) and
/// `Send + Sync` so they can be shared across concurrent request handlers.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order by id.
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError>;

    /// Persist a new order in state `Created` at version 1.
    ///
    /// Rejects an empty item list with [`StoreError::EmptyOrder`] and any
    /// zero-quantity line item with [`StoreError::ZeroQuantityItem`].
    async fn create(&self, new_order: NewOrder) -> Result<Order, StoreError>;

    /// Atomic compare-and-set transition.
    ///
    /// Verifies that the stored record still carries `expected_version` and
    /// `expected_state`; if so, applies `patch`, moves to `new_state`, bumps
    /// the version, stamps `updated_at`, appends a [`TransitionEvent`] with
    /// `actor`, and returns the updated order. Returns
    /// [`StoreError::Conflict`] on any mismatch with **no** mutation.
    async fn compare_and_transition(
        &self,
        order_id: Uuid,
        expected_version: i64,
        expected_state: OrderState,
        new_state: OrderState,
        patch: OrderPatch,
        actor: Actor,
    ) -> Result<Order, StoreError>;

    /// Orders currently in the claim pool (state `Created`), oldest first.
    async fn list_claimable(&self) -> Result<Vec<Order>, StoreError>;

    /// Non-terminal orders currently assigned to `team_member`, oldest first.
    async fn list_assigned(&self, team_member: Uuid) -> Result<Vec<Order>, StoreError>;

    /// Full transition history of an order, in application order.
    async fn history(&self, order_id: Uuid) -> Result<Vec<TransitionEvent>, StoreError>;
}
