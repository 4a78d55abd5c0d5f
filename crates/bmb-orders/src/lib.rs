//! bmb-orders
//!
//! Shared data model for the order lifecycle workflow: the `Order` record,
//! its state enum, and the transition-legality table. This crate owns no
//! behaviour beyond pure data and pure predicates — persistence lives in
//! `bmb-store` / `bmb-db`, orchestration in `bmb-workflow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod ist;
mod state;

pub use state::{legal_transition, OrderState, ParseStateError};

// ---------------------------------------------------------------------------
// Line items
// ---------------------------------------------------------------------------

/// One ordered menu item. The item list is fixed at creation time and
/// immutable once the order leaves `Created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: Uuid,
    pub qty: u32,
}

impl LineItem {
    pub fn new(item_id: Uuid, qty: u32) -> Self {
        debug_assert!(qty > 0, "LineItem.qty must be > 0");
        Self { item_id, qty }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A customer order tracked through the delivery workflow.
///
/// # Invariants
///
/// - `assignee` is `Some` if and only if `state` is one of
///   `Assigned | Accepted | InProgress`.
/// - `version` starts at 1 and increments by exactly 1 on every successful
///   transition; it never changes on a failed one.
/// - `items` are immutable after creation.
///
/// Orders are never physically deleted; terminal orders are retained for
/// history and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<LineItem>,
    pub delivery_address: String,
    pub delivery_phone: String,
    pub state: OrderState,
    /// Team member currently responsible for delivery, when one is.
    pub assignee: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent successful transition.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency sequence number.
    pub version: i64,
}

impl Order {
    /// True when the assignment invariant holds for this record.
    pub fn assignment_invariant_holds(&self) -> bool {
        let must_have_assignee = matches!(
            self.state,
            OrderState::Assigned | OrderState::Accepted | OrderState::InProgress
        );
        self.assignee.is_some() == must_have_assignee
    }
}

/// Input for order placement. Validated and turned into an [`Order`] by the
/// store's `create` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub items: Vec<LineItem>,
    pub delivery_address: String,
    pub delivery_phone: String,
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Who performed a transition. Authentication and role checks belong to the
/// API layer; this core only records the identity against the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum Actor {
    Customer(Uuid),
    TeamMember(Uuid),
    Admin(Uuid),
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Actor::Customer(id) | Actor::TeamMember(id) | Actor::Admin(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Actor::Customer(_) => "CUSTOMER",
            Actor::TeamMember(_) => "TEAM_MEMBER",
            Actor::Admin(_) => "ADMIN",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

// ---------------------------------------------------------------------------
// Transition events
// ---------------------------------------------------------------------------

/// Append-only history entry written by the store on every successful
/// transition (including creation, recorded as `from == to == Created`
/// with the placing customer as actor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub order_id: Uuid,
    pub from: OrderState,
    pub to: OrderState,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    /// Order version after this transition was applied.
    pub version: i64,
}
