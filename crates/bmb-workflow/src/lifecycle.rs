//! The order lifecycle controller.
//!
//! Exposes the workflow's public operations. Each transition:
//!
//! 1. reads the order fresh and evaluates the guards (state, assignee),
//! 2. performs exactly one compare-and-set with the `(from, to)` pair of
//!    the state table,
//! 3. runs side effects (OTP issue, SMS) strictly *after* the transition
//!    committed, outside any store critical section.
//!
//! Guard failures never mutate anything; a compare-and-set conflict is
//! surfaced unchanged as [`WorkflowError::Conflict`].

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use bmb_orders::{ist, Actor, LineItem, NewOrder, Order, OrderState, TransitionEvent};
use bmb_otp::{OtpEngine, OtpPurpose};
use bmb_store::{OrderPatch, OrderStore};

use crate::arbiter::ClaimArbiter;
use crate::notify::Notifier;
use crate::WorkflowError;

/// Orchestrates the end-to-end order state machine.
///
/// Cheap to clone per request; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn OrderStore>,
    otp: Arc<OtpEngine>,
    notifier: Arc<dyn Notifier>,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        otp: Arc<OtpEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            otp,
            notifier,
        }
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place a new order. Enters the claim pool in `Created` at version 1.
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        items: Vec<LineItem>,
        delivery_address: String,
        delivery_phone: String,
    ) -> Result<Order, WorkflowError> {
        let order = self
            .store
            .create(NewOrder {
                customer_id,
                items,
                delivery_address,
                delivery_phone,
            })
            .await?;
        info!(
            order_id = %order.order_id,
            customer_id = %customer_id,
            placed_at_ist = %ist::format_ist(order.created_at),
            "order placed"
        );
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Claim an unassigned order for `team_member`. `Created → Assigned`,
    /// arbitrated (see [`ClaimArbiter::claim`]).
    pub async fn claim(&self, order_id: Uuid, team_member: Uuid) -> Result<Order, WorkflowError> {
        ClaimArbiter::new(self.store.clone())
            .claim(order_id, team_member)
            .await
    }

    /// Commit to the delivery. `Assigned → Accepted`, assignee only.
    pub async fn accept(&self, order_id: Uuid, team_member: Uuid) -> Result<Order, WorkflowError> {
        let order = self.guarded(order_id, "accept", OrderState::Assigned, team_member).await?;
        let updated = self
            .store
            .compare_and_transition(
                order_id,
                order.version,
                OrderState::Assigned,
                OrderState::Accepted,
                OrderPatch::none(),
                Actor::TeamMember(team_member),
            )
            .await?;
        info!(order_id = %order_id, team_member = %team_member, "order accepted");
        Ok(updated)
    }

    /// Decline the delivery. `Assigned → Created`: the assignee is cleared
    /// and the order re-enters the claim pool. Any team member — including
    /// the rejecter — may claim it again.
    pub async fn reject(&self, order_id: Uuid, team_member: Uuid) -> Result<Order, WorkflowError> {
        let order = self.guarded(order_id, "reject", OrderState::Assigned, team_member).await?;
        let updated = self
            .store
            .compare_and_transition(
                order_id,
                order.version,
                OrderState::Assigned,
                OrderState::Created,
                OrderPatch::clear_assignee(),
                Actor::TeamMember(team_member),
            )
            .await?;
        info!(order_id = %order_id, team_member = %team_member, "order rejected, re-queued");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Begin the delivery run. `Accepted → InProgress`, assignee only.
    ///
    /// Once the transition has committed, a delivery-confirmation code is
    /// issued and sent to the customer's phone fire-and-forget; notification
    /// failure is logged and never affects order state.
    pub async fn start_delivery(
        &self,
        order_id: Uuid,
        team_member: Uuid,
    ) -> Result<Order, WorkflowError> {
        let order = self
            .guarded(order_id, "start delivery for", OrderState::Accepted, team_member)
            .await?;
        let updated = self
            .store
            .compare_and_transition(
                order_id,
                order.version,
                OrderState::Accepted,
                OrderState::InProgress,
                OrderPatch::none(),
                Actor::TeamMember(team_member),
            )
            .await?;

        let code = self.otp.issue(order_id, OtpPurpose::DeliveryConfirmation);
        info!(order_id = %order_id, team_member = %team_member, "delivery started, confirmation code issued");

        let notifier = self.notifier.clone();
        let phone = updated.delivery_phone.clone();
        let body = format!(
            "Your BMB delivery confirmation code is {code}. \
             Share it with your delivery partner on hand-over. \
             It expires in {} minutes.",
            self.otp.config().ttl.num_minutes()
        );
        tokio::spawn(async move {
            if let Err(e) = notifier.send_sms(&phone, &body).await {
                warn!(order_id = %order_id, error = %e, "confirmation SMS failed");
            }
        });

        Ok(updated)
    }

    /// Complete the delivery. Validates the submitted code against the
    /// outstanding delivery-confirmation OTP; only on success does the order
    /// move `InProgress → Delivered`. On any OTP failure the order remains
    /// `InProgress` and the failure is surfaced for user-facing messaging.
    pub async fn confirm_delivery(
        &self,
        order_id: Uuid,
        team_member: Uuid,
        code: &str,
    ) -> Result<Order, WorkflowError> {
        let order = self
            .guarded(order_id, "confirm delivery for", OrderState::InProgress, team_member)
            .await?;

        self.otp
            .validate(order_id, OtpPurpose::DeliveryConfirmation, code)?;

        let updated = self
            .store
            .compare_and_transition(
                order_id,
                order.version,
                OrderState::InProgress,
                OrderState::Delivered,
                // Delivered is terminal: nobody is responsible any more.
                // The delivering member stays on record in the history.
                OrderPatch::clear_assignee(),
                Actor::TeamMember(team_member),
            )
            .await?;
        info!(order_id = %order_id, team_member = %team_member, "delivery confirmed");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel an order that no team member has committed to yet.
    ///
    /// Permitted from `Created` and `Assigned` only. Once accepted, the
    /// state machine deliberately offers no cancel edge; disputes go to the
    /// out-of-band refund process. Authorization of `actor` is the API
    /// layer's concern; the identity is recorded against the transition.
    pub async fn cancel(&self, order_id: Uuid, actor: Actor) -> Result<Order, WorkflowError> {
        let order = self.store.get(order_id).await?;
        let patch = match order.state {
            OrderState::Created => OrderPatch::none(),
            OrderState::Assigned => OrderPatch::clear_assignee(),
            state => return Err(WorkflowError::InvalidState { op: "cancel", state }),
        };
        let updated = self
            .store
            .compare_and_transition(
                order_id,
                order.version,
                order.state,
                OrderState::Cancelled,
                patch,
                actor,
            )
            .await?;
        info!(order_id = %order_id, actor = %actor, "order cancelled");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, order_id: Uuid) -> Result<Order, WorkflowError> {
        Ok(self.store.get(order_id).await?)
    }

    /// Orders waiting in the claim pool, oldest first.
    pub async fn claim_pool(&self) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.store.list_claimable().await?)
    }

    /// Open deliveries of one team member, oldest first.
    pub async fn assigned_to(&self, team_member: Uuid) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.store.list_assigned(team_member).await?)
    }

    /// Full transition history of an order.
    pub async fn history(&self, order_id: Uuid) -> Result<Vec<TransitionEvent>, WorkflowError> {
        Ok(self.store.history(order_id).await?)
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    /// Fresh read + the two guards shared by every assignee-only operation:
    /// the order must be in `expected` state, and the caller must be its
    /// assignee. Decided before the compare-and-set; mutates nothing.
    async fn guarded(
        &self,
        order_id: Uuid,
        op: &'static str,
        expected: OrderState,
        team_member: Uuid,
    ) -> Result<Order, WorkflowError> {
        let order = self.store.get(order_id).await?;
        if order.state != expected {
            return Err(WorkflowError::InvalidState {
                op,
                state: order.state,
            });
        }
        if order.assignee != Some(team_member) {
            return Err(WorkflowError::Forbidden { op });
        }
        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use bmb_otp::{OtpConfig, OtpError};
    use bmb_store::MemoryOrderStore;

    fn service_with_codes(codes: Vec<u32>) -> LifecycleService {
        LifecycleService::new(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(OtpEngine::with_scripted_codes(OtpConfig::default(), codes)),
            Arc::new(NullNotifier),
        )
    }

    async fn placed(svc: &LifecycleService) -> Order {
        svc.create_order(
            Uuid::new_v4(),
            vec![LineItem::new(Uuid::new_v4(), 1)],
            "221B Residency Road, Bengaluru".to_string(),
            "+919876543210".to_string(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn accept_by_non_assignee_is_forbidden() {
        let svc = service_with_codes(vec![]);
        let order = placed(&svc).await;
        let tm = Uuid::new_v4();
        svc.claim(order.order_id, tm).await.unwrap();

        let err = svc.accept(order.order_id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err, WorkflowError::Forbidden { op: "accept" });

        // Guard failure left the order untouched.
        let reread = svc.get(order.order_id).await.unwrap();
        assert_eq!(reread.state, OrderState::Assigned);
        assert_eq!(reread.version, 2);
    }

    #[tokio::test]
    async fn accept_from_created_is_invalid_state() {
        let svc = service_with_codes(vec![]);
        let order = placed(&svc).await;
        let err = svc.accept(order.order_id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidState {
                op: "accept",
                state: OrderState::Created
            }
        );
    }

    #[tokio::test]
    async fn wrong_code_leaves_order_in_progress() {
        let svc = service_with_codes(vec![654321]);
        let order = placed(&svc).await;
        let tm = Uuid::new_v4();
        svc.claim(order.order_id, tm).await.unwrap();
        svc.accept(order.order_id, tm).await.unwrap();
        svc.start_delivery(order.order_id, tm).await.unwrap();

        let err = svc
            .confirm_delivery(order.order_id, tm, "111111")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Otp(OtpError::InvalidCode { attempts_left: 4 })
        );

        let reread = svc.get(order.order_id).await.unwrap();
        assert_eq!(reread.state, OrderState::InProgress);
        assert_eq!(reread.version, 4, "failed confirmation must not bump the version");
    }

    #[tokio::test]
    async fn confirm_before_start_is_invalid_state() {
        let svc = service_with_codes(vec![654321]);
        let order = placed(&svc).await;
        let tm = Uuid::new_v4();
        svc.claim(order.order_id, tm).await.unwrap();
        svc.accept(order.order_id, tm).await.unwrap();

        let err = svc
            .confirm_delivery(order.order_id, tm, "654321")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidState {
                op: "confirm delivery for",
                state: OrderState::Accepted
            }
        );
    }

    #[tokio::test]
    async fn delivered_order_has_no_assignee_but_full_history() {
        let svc = service_with_codes(vec![424242]);
        let order = placed(&svc).await;
        let tm = Uuid::new_v4();
        svc.claim(order.order_id, tm).await.unwrap();
        svc.accept(order.order_id, tm).await.unwrap();
        svc.start_delivery(order.order_id, tm).await.unwrap();
        let done = svc
            .confirm_delivery(order.order_id, tm, "424242")
            .await
            .unwrap();

        assert_eq!(done.state, OrderState::Delivered);
        assert_eq!(done.assignee, None);
        assert!(done.assignment_invariant_holds());

        let history = svc.history(order.order_id).await.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history
            .iter()
            .skip(1)
            .all(|e| e.actor == Actor::TeamMember(tm)));
    }
}
