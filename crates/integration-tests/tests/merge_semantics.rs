//! Identity linkage and merge semantics.
//!
//! The owner's cart always survives a merge; quantities sum per
//! `(product, variant)`; every merged line is re-priced at the current
//! catalog price; merging counts as activity; the retired guest cart never
//! re-enters scheduling.

use chrono::TimeDelta;
use rust_decimal::dec;

use winback_core::OwnerId;
use winback_engine::clock::Clock;
use winback_engine::db::CartRepository;
use winback_engine::services::merge::{LinkOutcome, MergeError};
use winback_integration_tests::TestEngine;

#[tokio::test]
async fn merge_sums_quantities_and_reprices() {
    let engine = TestEngine::standard();

    // Owner already has a cart with one sku-x at an old price
    let owned = engine
        .sync_cart("sess-owner", Some("cust-1"), &[("sku-x", 1, dec!(10.00))])
        .await;
    // Guest session gathered more of the same plus something new
    let guest = engine
        .sync_cart(
            "sess-guest",
            None,
            &[("sku-x", 2, dec!(10.00)), ("sku-y", 3, dec!(5.00))],
        )
        .await;

    // Catalog prices have moved since either cart was synced
    engine.pricing.set_price("sku-x", dec!(12.00));
    engine.pricing.set_price("sku-y", dec!(4.00));

    engine.clock.advance(TimeDelta::minutes(45));
    let outcome = engine
        .merge
        .link_identity(&guest.session_key, &OwnerId::from("cust-1"))
        .await
        .unwrap();

    let LinkOutcome::Merged { cart, retired } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(cart.id, owned.id, "the owner cart must survive");
    assert_eq!(retired, guest.id);

    assert_eq!(cart.line_items.len(), 2);
    assert_eq!(cart.line_items[0].product.as_str(), "sku-x");
    assert_eq!(cart.line_items[0].quantity, 3);
    assert_eq!(cart.line_items[0].unit_price, dec!(12.00));
    assert_eq!(cart.line_items[1].product.as_str(), "sku-y");
    assert_eq!(cart.line_items[1].quantity, 3);
    assert_eq!(cart.line_items[1].unit_price, dec!(4.00));
    assert_eq!(cart.total_amount, dec!(48.00));

    // Merging is activity: the 45 minutes of idleness are wiped out
    assert_eq!(cart.last_activity_at, engine.clock.now());

    // The guest cart is retired, not deleted, and never a candidate again
    let guest_now = engine.carts.snapshot(guest.id).unwrap();
    assert_eq!(guest_now.merged_into, Some(owned.id));

    engine.clock.advance(TimeDelta::days(7));
    let candidates = engine
        .carts
        .find_reminder_candidates(engine.clock.now())
        .await
        .unwrap();
    assert!(candidates.iter().all(|c| c.id != guest.id));
}

#[tokio::test]
async fn guest_cart_is_claimed_when_owner_has_none() {
    let engine = TestEngine::standard();
    let guest = engine
        .sync_cart("sess-guest", None, &[("sku-x", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(50));
    let outcome = engine
        .merge
        .link_identity(&guest.session_key, &OwnerId::from("cust-1"))
        .await
        .unwrap();

    let LinkOutcome::Claimed(cart) = outcome else {
        panic!("expected a claim, got {outcome:?}");
    };
    assert_eq!(cart.id, guest.id);
    assert_eq!(cart.owner_id, Some(OwnerId::from("cust-1")));
    assert_eq!(cart.last_activity_at, engine.clock.now());
}

#[tokio::test]
async fn relinking_the_same_identity_is_a_noop() {
    let engine = TestEngine::standard();
    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-x", 1, dec!(10.00))])
        .await;

    let before = engine.carts.snapshot(cart.id).unwrap();
    let outcome = engine
        .merge
        .link_identity(&cart.session_key, &OwnerId::from("cust-1"))
        .await
        .unwrap();

    assert!(matches!(outcome, LinkOutcome::AlreadyLinked(_)));
    let after = engine.carts.snapshot(cart.id).unwrap();
    assert_eq!(after.last_activity_at, before.last_activity_at);
}

#[tokio::test]
async fn linking_an_unknown_session_reports_no_guest_cart() {
    let engine = TestEngine::standard();
    let owned = engine
        .sync_cart("sess-owner", Some("cust-1"), &[("sku-x", 1, dec!(10.00))])
        .await;

    let outcome = engine
        .merge
        .link_identity(&"sess-nowhere".into(), &OwnerId::from("cust-1"))
        .await
        .unwrap();

    let LinkOutcome::NoGuestCart(existing) = outcome else {
        panic!("expected no guest cart, got {outcome:?}");
    };
    assert_eq!(existing.map(|c| c.id), Some(owned.id));
}

#[tokio::test]
async fn pricing_outage_aborts_the_merge_untouched() {
    let engine = TestEngine::standard();
    let owned = engine
        .sync_cart("sess-owner", Some("cust-1"), &[("sku-x", 1, dec!(10.00))])
        .await;
    let guest = engine
        .sync_cart("sess-guest", None, &[("sku-y", 2, dec!(5.00))])
        .await;

    engine.pricing.set_failing(true);
    let err = engine
        .merge
        .link_identity(&guest.session_key, &OwnerId::from("cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::Pricing(_)));

    // Neither cart changed
    let owned_now = engine.carts.snapshot(owned.id).unwrap();
    assert_eq!(owned_now.line_items.len(), 1);
    assert_eq!(owned_now.line_items[0].quantity, 1);
    let guest_now = engine.carts.snapshot(guest.id).unwrap();
    assert_eq!(guest_now.merged_into, None);
}
