//! Scenario: brute-forcing the confirmation code locks the record.
//!
//! # Invariant under test
//! Five consecutive wrong submissions lock the code; the sixth attempt
//! fails even when correct, and the order never leaves `InProgress` or
//! bumps its version along the way.

use std::sync::Arc;

use uuid::Uuid;

use bmb_orders::{LineItem, OrderState};
use bmb_otp::{OtpConfig, OtpEngine, OtpError};
use bmb_store::MemoryOrderStore;
use bmb_workflow::{LifecycleService, NullNotifier, WorkflowError};

#[tokio::test]
async fn five_wrong_codes_lock_out_the_correct_sixth() {
    let svc = LifecycleService::new(
        Arc::new(MemoryOrderStore::new()),
        Arc::new(OtpEngine::with_scripted_codes(
            OtpConfig::default(),
            vec![483920],
        )),
        Arc::new(NullNotifier),
    );
    let tm = Uuid::new_v4();

    let order = svc
        .create_order(
            Uuid::new_v4(),
            vec![LineItem::new(Uuid::new_v4(), 1)],
            "5 Jayanagar 4th Block, Bengaluru".to_string(),
            "+919845012345".to_string(),
        )
        .await
        .unwrap();
    svc.claim(order.order_id, tm).await.unwrap();
    svc.accept(order.order_id, tm).await.unwrap();
    let in_progress = svc.start_delivery(order.order_id, tm).await.unwrap();
    assert_eq!(in_progress.version, 4);

    for n in 1..=5u32 {
        let err = svc
            .confirm_delivery(order.order_id, tm, "000000")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Otp(OtpError::InvalidCode {
                attempts_left: 5 - n
            })
        );
    }

    // Sixth attempt with the *correct* code: locked out.
    let err = svc
        .confirm_delivery(order.order_id, tm, "483920")
        .await
        .unwrap_err();
    assert_eq!(err, WorkflowError::Otp(OtpError::LockedOut));

    // The order never moved and never changed version.
    let reread = svc.get(order.order_id).await.unwrap();
    assert_eq!(reread.state, OrderState::InProgress);
    assert_eq!(reread.assignee, Some(tm));
    assert_eq!(reread.version, 4);
}
