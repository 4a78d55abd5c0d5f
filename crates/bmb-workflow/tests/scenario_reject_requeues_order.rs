//! Scenario: a rejected order re-enters the claim pool.
//!
//! # Invariant under test
//! `Assigned → Created` on reject clears the assignee, bumps the version,
//! and makes the order claimable again — by anyone, including the member
//! who rejected it.

use std::sync::Arc;

use uuid::Uuid;

use bmb_orders::{LineItem, OrderState};
use bmb_otp::{OtpConfig, OtpEngine};
use bmb_store::MemoryOrderStore;
use bmb_workflow::{LifecycleService, NullNotifier, WorkflowError};

fn service() -> LifecycleService {
    LifecycleService::new(
        Arc::new(MemoryOrderStore::new()),
        Arc::new(OtpEngine::with_scripted_codes(OtpConfig::default(), vec![])),
        Arc::new(NullNotifier),
    )
}

async fn placed(svc: &LifecycleService) -> Uuid {
    svc.create_order(
        Uuid::new_v4(),
        vec![LineItem::new(Uuid::new_v4(), 3)],
        "12 Indiranagar 100 Feet Road, Bengaluru".to_string(),
        "+919811223344".to_string(),
    )
    .await
    .unwrap()
    .order_id
}

#[tokio::test]
async fn reject_then_reclaim_by_other_member() {
    let svc = service();
    let order_id = placed(&svc).await;
    let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());

    svc.claim(order_id, t1).await.unwrap();
    let rejected = svc.reject(order_id, t1).await.unwrap();
    assert_eq!(rejected.state, OrderState::Created);
    assert_eq!(rejected.assignee, None);
    assert_eq!(rejected.version, 3);

    // Back in the pool.
    let pool = svc.claim_pool().await.unwrap();
    assert!(pool.iter().any(|o| o.order_id == order_id));
    assert!(svc.assigned_to(t1).await.unwrap().is_empty());

    let reclaimed = svc.claim(order_id, t2).await.unwrap();
    assert_eq!(reclaimed.assignee, Some(t2));
    assert_eq!(reclaimed.version, 4);
}

#[tokio::test]
async fn rejecter_remains_eligible_to_reclaim() {
    let svc = service();
    let order_id = placed(&svc).await;
    let t1 = Uuid::new_v4();

    svc.claim(order_id, t1).await.unwrap();
    svc.reject(order_id, t1).await.unwrap();

    let reclaimed = svc.claim(order_id, t1).await.unwrap();
    assert_eq!(reclaimed.state, OrderState::Assigned);
    assert_eq!(reclaimed.assignee, Some(t1));
}

#[tokio::test]
async fn reject_by_non_assignee_is_forbidden() {
    let svc = service();
    let order_id = placed(&svc).await;
    let t1 = Uuid::new_v4();

    svc.claim(order_id, t1).await.unwrap();
    let err = svc.reject(order_id, Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err, WorkflowError::Forbidden { op: "reject" });

    let order = svc.get(order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Assigned);
    assert_eq!(order.assignee, Some(t1));
}
