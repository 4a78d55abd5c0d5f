//! Assignment arbitration.
//!
//! Resolves concurrent claims by multiple team members for the same
//! unassigned order to exactly one winner. The store's compare-and-set is
//! the deciding mechanism: the first claim to land with a matching version
//! wins; everyone else observes a conflict.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use bmb_orders::{Actor, Order, OrderState};
use bmb_store::{OrderPatch, OrderStore, StoreError};

use crate::WorkflowError;

/// Maximum compare-and-set attempts per claim. A conflict whose re-read
/// still shows the order unassigned (a transient race) is retried; beyond
/// this bound the claim fails with [`WorkflowError::Contention`] rather
/// than spinning, keeping worst-case latency bounded and testable.
pub const CLAIM_ATTEMPTS: usize = 3;

/// Decides which team member may take ownership of an unassigned order.
pub struct ClaimArbiter {
    store: Arc<dyn OrderStore>,
}

impl ClaimArbiter {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Attempt to claim `order_id` for `team_member`.
    ///
    /// # Semantics
    ///
    /// - Order already held by a *different* team member (any of
    ///   `Assigned | Accepted | InProgress`): [`WorkflowError::AlreadyClaimed`]
    ///   — the caller lost the race and should look for other work.
    /// - Order in any other non-`Created` state (terminal, or already held
    ///   by the caller): [`WorkflowError::InvalidState`].
    /// - Order in `Created`: compare-and-set `Created → Assigned`. On
    ///   conflict, re-read and re-classify; if the order is still
    ///   unassigned, retry up to [`CLAIM_ATTEMPTS`] total attempts, then
    ///   fail with [`WorkflowError::Contention`].
    pub async fn claim(
        &self,
        order_id: Uuid,
        team_member: Uuid,
    ) -> Result<Order, WorkflowError> {
        let mut order = self.store.get(order_id).await?;

        for attempt in 1..=CLAIM_ATTEMPTS {
            classify_claimable(&order, team_member)?;

            match self
                .store
                .compare_and_transition(
                    order_id,
                    order.version,
                    OrderState::Created,
                    OrderState::Assigned,
                    OrderPatch::assign(team_member),
                    Actor::TeamMember(team_member),
                )
                .await
            {
                Ok(updated) => {
                    info!(
                        order_id = %order_id,
                        team_member = %team_member,
                        version = updated.version,
                        "order claimed"
                    );
                    return Ok(updated);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(
                        order_id = %order_id,
                        team_member = %team_member,
                        attempt,
                        "claim lost a compare-and-set; re-reading"
                    );
                    order = self.store.get(order_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Still unassigned after the retry bound — repeated transient
        // conflicts. Classify once more so a late winner surfaces as
        // AlreadyClaimed rather than Contention.
        classify_claimable(&order, team_member)?;
        Err(WorkflowError::Contention(order_id))
    }
}

/// Ok(()) when the order is open for claiming by `team_member`.
fn classify_claimable(order: &Order, team_member: Uuid) -> Result<(), WorkflowError> {
    if order.state == OrderState::Created {
        return Ok(());
    }
    match order.assignee {
        Some(winner) if winner != team_member => Err(WorkflowError::AlreadyClaimed {
            order_id: order.order_id,
            assignee: winner,
        }),
        _ => Err(WorkflowError::InvalidState {
            op: "claim",
            state: order.state,
        }),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
