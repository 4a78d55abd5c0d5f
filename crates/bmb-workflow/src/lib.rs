//! bmb-workflow
//!
//! The order lifecycle workflow: assignment arbitration, the end-to-end
//! state machine, and OTP-gated delivery confirmation.
//!
//! # Architecture
//!
//! [`LifecycleService`] is the single operation surface exposed to the API
//! layer. Every transition it performs is exactly one call into the Order
//! Store's compare-and-set primitive, so concurrent conflicting operations
//! are serialized by the order's version counter and the loser receives a
//! typed [`WorkflowError::Conflict`].
//!
//! Claiming an unassigned order goes through the [`ClaimArbiter`], which
//! resolves races between team members with a bounded retry loop; see
//! [`ClaimArbiter::claim`] for the exact semantics.
//!
//! Out-of-band delivery of the confirmation code happens through the
//! [`Notifier`] seam, fire-and-forget, strictly after the state transition
//! has committed — a slow or failing SMS gateway can never stall the state
//! machine.

use bmb_orders::OrderState;
use bmb_otp::OtpError;
use bmb_store::StoreError;
use uuid::Uuid;

mod arbiter;
mod lifecycle;
mod notify;

pub use arbiter::{ClaimArbiter, CLAIM_ATTEMPTS};
pub use lifecycle::LifecycleService;
pub use notify::{Notifier, NullNotifier, RecordingNotifier, SentSms};

// ---------------------------------------------------------------------------
// WorkflowError
// ---------------------------------------------------------------------------

/// Every way a workflow operation can fail. Returned unchanged to the
/// caller; nothing is swallowed or silently retried (beyond the arbiter's
/// bounded claim retry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Unknown order id. 404-equivalent.
    NotFound(Uuid),
    /// The order was concurrently modified; refetch and retry the logical
    /// operation if it still applies.
    Conflict(Uuid),
    /// The claim retry bound was exhausted without a decisive outcome.
    Contention(Uuid),
    /// The operation is not defined from the order's current state. Not
    /// retryable.
    InvalidState {
        op: &'static str,
        state: OrderState,
    },
    /// The acting team member is not the order's assignee.
    Forbidden { op: &'static str },
    /// Another team member won the assignment race; look for other work.
    AlreadyClaimed { order_id: Uuid, assignee: Uuid },
    /// An order must contain at least one line item.
    EmptyOrder,
    /// Every line item must carry a quantity of at least one.
    ZeroQuantityItem(Uuid),
    /// Delivery-confirmation code failure; the order stays in progress.
    Otp(OtpError),
    /// Infrastructure failure in the persistence substrate.
    Store(String),
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::NotFound(id) => write!(f, "order {id} not found"),
            WorkflowError::Conflict(id) => {
                write!(f, "order {id} state changed, refresh and retry")
            }
            WorkflowError::Contention(id) => {
                write!(f, "order {id} under heavy contention, try again later")
            }
            WorkflowError::InvalidState { op, state } => {
                write!(f, "cannot {op} an order in state {state}")
            }
            WorkflowError::Forbidden { op } => {
                write!(f, "only the assigned team member may {op} this order")
            }
            WorkflowError::AlreadyClaimed { order_id, .. } => {
                write!(f, "order {order_id} was claimed by another team member")
            }
            WorkflowError::EmptyOrder => write!(f, "order must contain at least one line item"),
            WorkflowError::ZeroQuantityItem(item_id) => {
                write!(f, "line item {item_id} has zero quantity")
            }
            WorkflowError::Otp(e) => write!(f, "delivery confirmation failed: {e}"),
            WorkflowError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkflowError::Otp(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            StoreError::Conflict { order_id, .. } => WorkflowError::Conflict(order_id),
            StoreError::EmptyOrder => WorkflowError::EmptyOrder,
            StoreError::ZeroQuantityItem(item_id) => WorkflowError::ZeroQuantityItem(item_id),
            StoreError::Backend(msg) => WorkflowError::Store(msg),
        }
    }
}

impl From<OtpError> for WorkflowError {
    fn from(e: OtpError) -> Self {
        WorkflowError::Otp(e)
    }
}
