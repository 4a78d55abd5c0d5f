//! Scenario: cancellation is only possible before a team member commits.
//!
//! # Invariant under test
//! `Created` and `Assigned` orders can be cancelled (clearing the assignee
//! where one exists); from `Accepted` onwards the cancel edge does not
//! exist and the attempt fails without touching the order.

use std::sync::Arc;

use uuid::Uuid;

use bmb_orders::{Actor, LineItem, OrderState};
use bmb_otp::{OtpConfig, OtpEngine};
use bmb_store::MemoryOrderStore;
use bmb_workflow::{LifecycleService, NullNotifier, WorkflowError};

fn service() -> LifecycleService {
    LifecycleService::new(
        Arc::new(MemoryOrderStore::new()),
        Arc::new(OtpEngine::with_scripted_codes(
            OtpConfig::default(),
            vec![135790],
        )),
        Arc::new(NullNotifier),
    )
}

async fn placed(svc: &LifecycleService) -> (Uuid, Uuid) {
    let customer = Uuid::new_v4();
    let order = svc
        .create_order(
            customer,
            vec![LineItem::new(Uuid::new_v4(), 1)],
            "30 HSR Layout Sector 2, Bengaluru".to_string(),
            "+919870001122".to_string(),
        )
        .await
        .unwrap();
    (order.order_id, customer)
}

#[tokio::test]
async fn customer_cancels_unclaimed_order() {
    let svc = service();
    let (order_id, customer) = placed(&svc).await;

    let cancelled = svc
        .cancel(order_id, Actor::Customer(customer))
        .await
        .unwrap();
    assert_eq!(cancelled.state, OrderState::Cancelled);
    assert_eq!(cancelled.version, 2);
    assert!(cancelled.state.is_terminal());

    // Gone from the claim pool.
    assert!(svc.claim_pool().await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_cancels_assigned_order_clearing_the_assignee() {
    let svc = service();
    let (order_id, _) = placed(&svc).await;
    let tm = Uuid::new_v4();
    svc.claim(order_id, tm).await.unwrap();

    let cancelled = svc
        .cancel(order_id, Actor::Admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(cancelled.state, OrderState::Cancelled);
    assert_eq!(cancelled.assignee, None);
    assert!(cancelled.assignment_invariant_holds());
    assert!(svc.assigned_to(tm).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_after_accept_is_refused() {
    let svc = service();
    let (order_id, customer) = placed(&svc).await;
    let tm = Uuid::new_v4();
    svc.claim(order_id, tm).await.unwrap();
    svc.accept(order_id, tm).await.unwrap();

    let err = svc
        .cancel(order_id, Actor::Customer(customer))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::InvalidState {
            op: "cancel",
            state: OrderState::Accepted
        }
    );
    let order = svc.get(order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Accepted);
    assert_eq!(order.version, 3);
}

#[tokio::test]
async fn cancel_during_delivery_is_refused() {
    let svc = service();
    let (order_id, customer) = placed(&svc).await;
    let tm = Uuid::new_v4();
    svc.claim(order_id, tm).await.unwrap();
    svc.accept(order_id, tm).await.unwrap();
    svc.start_delivery(order_id, tm).await.unwrap();

    let err = svc
        .cancel(order_id, Actor::Customer(customer))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::InvalidState {
            op: "cancel",
            state: OrderState::InProgress
        }
    );
}

#[tokio::test]
async fn cancel_of_terminal_order_is_refused() {
    let svc = service();
    let (order_id, customer) = placed(&svc).await;
    svc.cancel(order_id, Actor::Customer(customer)).await.unwrap();

    let err = svc
        .cancel(order_id, Actor::Customer(customer))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::InvalidState {
            op: "cancel",
            state: OrderState::Cancelled
        }
    );
}
