//! Recovery token flow, from reminder dispatch to link resolution.

use chrono::TimeDelta;
use rust_decimal::dec;

use winback_engine::clock::Clock;
use winback_engine::services::recovery::RecoveryTokenError;
use winback_integration_tests::TestEngine;

#[tokio::test]
async fn reminder_links_resolve_to_the_session() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    let cart = engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(90));
    engine.scheduler.run_tick().await.unwrap();

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 1);
    let token = sent[0]
        .recovery_url
        .strip_prefix("https://shop.test/recovery/")
        .expect("recovery URL should carry the token path");

    let claims = engine.signer.verify(token, engine.clock.now()).unwrap();
    assert_eq!(claims.session_key, cart.session_key);
}

#[tokio::test]
async fn reminder_links_expire_after_their_ttl() {
    let engine = TestEngine::standard();
    engine.grant_consent("cust-1", "shopper@example.com");
    engine
        .sync_cart("sess-1", Some("cust-1"), &[("sku-a", 1, dec!(10.00))])
        .await;

    engine.clock.advance(TimeDelta::minutes(90));
    engine.scheduler.run_tick().await.unwrap();
    let sent = engine.transport.sent();
    let token = sent[0]
        .recovery_url
        .strip_prefix("https://shop.test/recovery/")
        .unwrap();

    // Tokens are issued with a 72 hour TTL
    engine.clock.advance(TimeDelta::hours(73));
    assert_eq!(
        engine.signer.verify(token, engine.clock.now()).unwrap_err(),
        RecoveryTokenError::Expired
    );
}

#[tokio::test]
async fn expiry_is_reported_regardless_of_cart_existence() {
    // A token for a session that never had a cart still reports Expired,
    // not anything that would leak whether the cart exists
    let engine = TestEngine::standard();
    let token = engine
        .signer
        .issue(&"sess-ghost".into(), engine.clock.now() + TimeDelta::hours(1));

    engine.clock.advance(TimeDelta::hours(2));
    assert_eq!(
        engine.signer.verify(&token, engine.clock.now()).unwrap_err(),
        RecoveryTokenError::Expired
    );
}

#[tokio::test]
async fn tampered_tokens_are_invalid() {
    let engine = TestEngine::standard();
    let token = engine
        .signer
        .issue(&"sess-1".into(), engine.clock.now() + TimeDelta::hours(1));

    let mut tampered = token.clone();
    tampered.push('A');
    assert_eq!(
        engine
            .signer
            .verify(&tampered, engine.clock.now())
            .unwrap_err(),
        RecoveryTokenError::Invalid
    );
}
