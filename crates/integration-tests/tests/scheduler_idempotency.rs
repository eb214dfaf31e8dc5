//! Idempotency and skip semantics of the reminder scheduler.
//!
//! The ledger is the single source of idempotency truth: any number of
//! passes over the same state send each `(tier, cart)` pair at most once,
//! failures leave no ledger row and retry naturally, and skips (consent,
//! conversion, emptiness) never burn a cart's reminders.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use rust_decimal::dec;

use winback_core::{CurrencyCode, OwnerId, ProductRef, ReminderType, SessionKey};
use winback_engine::clock::Clock;
use winback_engine::db::{
    CartRepository, Conversion, ConversionTarget, EventLedger, RepositoryError,
};
use winback_engine::models::{CartSync, LineItem};
use winback_integration_tests::TestEngine;

#[tokio::test]
async fn repeated_ticks_send_each_tier_once() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(90));
    for _ in 0..5 {
        engine.scheduler.run_tick().await.unwrap();
    }

    assert_eq!(engine.transport.sent().len(), 1);
    assert_eq!(engine.ledger.all().len(), 1);
}

#[tokio::test]
async fn reminder_cap_bounds_total_sends() {
    // Two tiers configured but at most one reminder per cart
    let engine = TestEngine::with_schedule(&[60, 1440], 1);
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::days(3));
    engine.scheduler.run_tick().await.unwrap();
    engine.scheduler.run_tick().await.unwrap();

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reminder_type, ReminderType::tier(1));
}

#[tokio::test]
async fn converted_carts_never_get_reminders() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    let outcome = engine
        .carts
        .mark_converted(&ConversionTarget::CartId(cart.id), "order-77")
        .await
        .unwrap();
    assert!(matches!(outcome, Conversion::Converted(_)));

    engine.clock.advance(TimeDelta::days(7));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert!(engine.transport.sent().is_empty());

    // Replayed conversion signals acknowledge without error
    let outcome = engine
        .carts
        .mark_converted(&ConversionTarget::CartId(cart.id), "order-77")
        .await
        .unwrap();
    assert!(matches!(outcome, Conversion::AlreadyConverted(_)));
}

#[tokio::test]
async fn empty_carts_are_never_candidates() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine.sync_cart("sess-1", Some("cust-1"), &[]).await;

    engine.clock.advance(TimeDelta::days(30));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert!(engine.transport.sent().is_empty());
}

#[tokio::test]
async fn consent_skip_leaves_the_cart_eligible() {
    let engine = TestEngine::standard();
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    // No consent on file: silent skip, no ledger row
    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.skipped_consent, 1);
    assert_eq!(summary.sent, 0);
    assert!(engine.ledger.all().is_empty());

    // Consent granted later: the same tier still goes out
    engine.grant_consent("cust-1", "shopper@example.com");
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);
}

#[tokio::test]
async fn anonymous_carts_are_skipped_silently() {
    let engine = TestEngine::standard();
    engine
        .sync_cart("sess-1", None, &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.skipped_consent, 1);
    assert!(engine.transport.sent().is_empty());
}

#[tokio::test]
async fn failed_dispatch_leaves_no_ledger_row_and_retries() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.transport.set_failing(true);
    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.sent, 0);
    assert!(engine.ledger.all().is_empty());

    // Transport recovers: the next pass delivers the same tier
    engine.transport.set_failing(false);
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(engine.ledger.all().len(), 1);
}

#[tokio::test]
async fn consent_outage_is_isolated_per_cart() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.consent.set_failing(true);
    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(engine.ledger.all().is_empty());

    engine.consent.set_failing(false);
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);
}

#[tokio::test]
async fn one_bad_cart_does_not_block_the_others() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "one@example.com");
    engine.grant_consent("cust-2", "two@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;
    engine
        .sync_cart("sess-2", Some("cust-2"), &[("sku-b", 1, dec!(20.00))])
        .await;
    // Third cart has an owner nobody knows about
    engine
        .sync_cart("sess-3", Some("cust-unknown"), &[("sku-c", 1, dec!(5.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.skipped_consent, 1);

    let mut recipients: Vec<String> = engine
        .transport
        .sent()
        .iter()
        .map(|m| m.recipient.to_string())
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["one@example.com", "two@example.com"]);
}

#[tokio::test]
async fn late_ledger_rows_suppress_resends() {
    // Simulates a concurrent instance having recorded tier 1 already
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    let event = winback_engine::models::NewEmailEvent {
        reminder_type: ReminderType::tier(1),
        cart_id: cart.id,
        recipient: "shopper@example.com".parse().unwrap(),
        sent_at: engine.clock.now(),
    };
    engine.ledger.record(event).await.unwrap();

    engine.clock.advance(TimeDelta::minutes(90));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 0);
    assert!(engine.transport.sent().is_empty());
}

#[tokio::test]
async fn a_cart_past_several_tiers_catches_up_in_one_pass() {
    // Scheduler was down long enough for both thresholds to pass; a single
    // pass walks the ladder in ascending order and sends both tiers.
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::days(2));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 2);

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].reminder_type, ReminderType::tier(1));
    assert_eq!(sent[1].reminder_type, ReminderType::tier(2));
    assert!(sent[1].final_reminder);

    // The ladder is exhausted; later passes send nothing more
    engine.clock.advance(TimeDelta::days(1));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 0);
    assert_eq!(engine.transport.sent().len(), 2);
}

#[tokio::test]
async fn background_loop_runs_passes_until_stopped() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;
    engine.clock.advance(TimeDelta::minutes(90));

    let handle = Arc::new(engine.scheduler).start(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await;

    // Many loop iterations ran; the ledger kept it to one send
    assert_eq!(engine.transport.sent().len(), 1);
    assert_eq!(engine.ledger.all().len(), 1);
}

#[tokio::test]
async fn sync_against_a_converted_cart_is_rejected() {
    let engine = TestEngine::standard();
    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;
    engine
        .carts
        .mark_converted(&ConversionTarget::CartId(cart.id), "order-9")
        .await
        .unwrap();

    let err = engine
        .carts
        .upsert_sync(
            CartSync {
                session_key: SessionKey::from("sess-1"),
                owner_id: Some(OwnerId::from("cust-1")),
                currency: CurrencyCode::USD,
                line_items: vec![LineItem {
                    product: ProductRef::from("sku-b"),
                    variant: None,
                    quantity: 1,
                    unit_price: dec!(5.00),
                }],
            },
            engine.clock.now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));

    // The converted cart is untouched
    let stored = engine.carts.snapshot(cart.id).unwrap();
    assert_eq!(stored.line_items.len(), 1);
    assert_eq!(stored.line_items[0].product.as_str(), "sku-a");
}
