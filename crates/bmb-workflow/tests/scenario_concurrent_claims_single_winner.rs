//! Scenario: concurrent claims for the same order produce exactly one winner.
//!
//! # Invariant under test
//! The store's compare-and-set is the sole arbiter: when several team
//! members race for a `Created` order, exactly one ends up assigned and
//! every loser receives a typed refusal, never a partial assignment.

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
        vec![LineItem::new(Uuid::new_v4(), 1)],
        "88 Koramangala 4th Block, Bengaluru".to_string(),
        "+919900112233".to_string(),
    )
    .await
    .unwrap()
    .order_id
}

#[tokio::test]
async fn second_claim_loses_to_the_first() {
    let svc = service();
    let order_id = placed(&svc).await;
    let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());

    let won = svc.claim(order_id, t1).await.unwrap();
    assert_eq!(won.state, OrderState::Assigned);
    assert_eq!(won.assignee, Some(t1));

    let err = svc.claim(order_id, t2).await.unwrap_err();
    assert_eq!(
        err,
        WorkflowError::AlreadyClaimed {
            order_id,
            assignee: t1
        }
    );

    let order = svc.get(order_id).await.unwrap();
    assert_eq!(order.assignee, Some(t1), "loser must not overwrite the winner");
    assert_eq!(order.version, 2);
}

#[tokio::test]
async fn many_racing_claims_yield_exactly_one_winner() {
    let svc = Arc::new(service());
    let order_id = placed(&svc).await;

    let members: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let mut handles = Vec::new();
    for tm in &members {
        let svc = svc.clone();
        let tm = *tm;
        handles.push(tokio::spawn(
            async move { (tm, svc.claim(order_id, tm).await) },
        ));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (tm, outcome) = handle.await.unwrap();
        match outcome {
            Ok(order) => {
                assert_eq!(order.state, OrderState::Assigned);
                assert_eq!(order.assignee, Some(tm));
                winners.push(tm);
            }
            Err(
                WorkflowError::AlreadyClaimed { .. }
                | WorkflowError::InvalidState { .. }
                | WorkflowError::Conflict(_)
                | WorkflowError::Contention(_),
            ) => {}
            Err(other) => panic!("unexpected claim failure: {other}"),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one claim must win");
    let order = svc.get(order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Assigned);
    assert_eq!(order.assignee, Some(winners[0]));
    assert_eq!(order.version, 2, "only the winning transition may bump the version");
}
