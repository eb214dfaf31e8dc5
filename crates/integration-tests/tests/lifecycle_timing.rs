//! End-to-end timing of the lifecycle and reminder ladder.
//!
//! Walks one cart through the reference timeline: active under 30 minutes
//! of inactivity, stale at 30, abandoned at 60, first reminder due at 60
//! minutes, second at 24 hours, with the scheduler re-deriving everything
//! from storage on each pass.

use chrono::TimeDelta;
use rust_decimal::dec;

use winback_core::{LifecycleState, ReminderType};
use winback_engine::clock::Clock;
use winback_engine::db::EventLedger;
use winback_engine::lifecycle::{LifecycleThresholds, classify};
use winback_integration_tests::TestEngine;

#[tokio::test]
async fn cart_walks_the_reference_timeline() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");

    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-tea", 2, dec!(11.99))])
        .await;
    let thresholds =
        LifecycleThresholds::new(TimeDelta::minutes(30), TimeDelta::minutes(60)).unwrap();

    // 29 minutes in: active, nothing due
    engine.clock.advance(TimeDelta::minutes(29));
    assert_eq!(
        classify(&cart, engine.clock.now(), &thresholds),
        LifecycleState::Active
    );
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert_eq!(summary.sent, 0);

    // 45 minutes in: stale, but the first tier is not due until 60
    engine.clock.advance(TimeDelta::minutes(16));
    assert_eq!(
        classify(&cart, engine.clock.now(), &thresholds),
        LifecycleState::Stale
    );
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 0);

    // 65 minutes in: abandoned, tier 1 goes out
    engine.clock.advance(TimeDelta::minutes(20));
    assert_eq!(
        classify(&cart, engine.clock.now(), &thresholds),
        LifecycleState::Abandoned
    );
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reminder_type, ReminderType::tier(1));
    assert_eq!(sent[0].recipient.as_str(), "shopper@example.com");
    assert!(!sent[0].final_reminder);
    assert_eq!(sent[0].item_count, 1);
    assert_eq!(sent[0].total, "USD 23.98");

    // 70 minutes in: tier 1 already recorded, tier 2 not yet due
    engine.clock.advance(TimeDelta::minutes(5));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 0);
    assert_eq!(engine.transport.sent().len(), 1);

    // Just past 24 hours: tier 2 goes out and is marked final
    engine.clock.advance(TimeDelta::minutes(1375));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].reminder_type, ReminderType::tier(2));
    assert!(sent[1].final_reminder);

    // The audit trail holds both sends in order
    let events = engine.ledger.events_for_cart(cart.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].reminder_type, ReminderType::tier(1));
    assert_eq!(events[1].reminder_type, ReminderType::tier(2));
}

#[tokio::test]
async fn activity_resets_the_reminder_clock() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");

    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-tea", 1, dec!(5.00))])
        .await;

    // 50 minutes of inactivity, then the shopper touches the cart again
    engine.clock.advance(TimeDelta::minutes(50));
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-tea", 2, dec!(5.00))])
        .await;

    // 30 more minutes: 80 minutes since creation, but only 30 since the
    // last activity, so nothing is due
    engine.clock.advance(TimeDelta::minutes(30));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 0);

    // The hour mark from the new activity point does trigger
    engine.clock.advance(TimeDelta::minutes(31));
    let summary = engine.scheduler.run_tick().await.unwrap();
    assert_eq!(summary.sent, 1);
}
