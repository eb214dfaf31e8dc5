//! Integration test harness for the winback engine.
//!
//! Provides in-memory doubles for every external seam - clock, cart store,
//! event ledger, consent provider, pricing provider, and notification
//! transport - so the scheduler, merge service, and token flow can be
//! exercised end to end without Postgres, SMTP, or collaborator APIs.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p winback-integration-tests
//! ```

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;

use winback_core::{CartId, Email, EmailEventId, OwnerId, ReminderType, SessionKey};
use winback_engine::clock::Clock;
use winback_engine::db::{
    CartRepository, Conversion, ConversionTarget, EventLedger, LedgerInsert, RepositoryError,
};
use winback_engine::models::{Cart, CartSync, EmailEvent, LineItem, NewEmailEvent, total_of};
use winback_engine::services::providers::{ConsentProvider, PricingProvider, ProviderError};
use winback_engine::services::transport::{
    NotificationTransport, ReminderMessage, TransportError,
};

/// A clock the test moves by hand.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    /// A fixed, readable epoch for test scenarios.
    #[must_use]
    pub fn at_origin() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.0.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.0.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// In-memory cart store mirroring the Postgres repository semantics.
#[derive(Default)]
pub struct InMemoryCartStore {
    state: Mutex<CartStoreState>,
}

#[derive(Default)]
struct CartStoreState {
    carts: Vec<Cart>,
    next_id: i32,
}

impl CartStoreState {
    fn allocate_id(&mut self) -> CartId {
        self.next_id += 1;
        CartId::new(self.next_id)
    }
}

impl InMemoryCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct snapshot of a cart for assertions.
    #[must_use]
    pub fn snapshot(&self, cart_id: CartId) -> Option<Cart> {
        self.state
            .lock()
            .unwrap()
            .carts
            .iter()
            .find(|c| c.id == cart_id)
            .cloned()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartStore {
    async fn upsert_sync(
        &self,
        sync: CartSync,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        for line in &sync.line_items {
            line.validate()
                .map_err(|e| RepositoryError::Conflict(format!("invalid line item: {e}")))?;
        }

        let mut state = self.state.lock().unwrap();

        if let Some(cart) = state
            .carts
            .iter_mut()
            .find(|c| c.session_key == sync.session_key)
        {
            if cart.converted {
                return Err(RepositoryError::Conflict(
                    "cart is converted and immutable".to_string(),
                ));
            }
            if cart.currency != sync.currency && !cart.line_items.is_empty() {
                return Err(RepositoryError::Conflict(
                    "currency change on a non-empty cart".to_string(),
                ));
            }
            cart.line_items = sync.line_items;
            cart.total_amount = total_of(&cart.line_items);
            cart.currency = sync.currency;
            if sync.owner_id.is_some() {
                cart.owner_id = sync.owner_id;
            }
            cart.last_activity_at = now;
            cart.updated_at = now;
            return Ok(cart.clone());
        }

        let id = state.allocate_id();
        let cart = Cart {
            id,
            session_key: sync.session_key,
            owner_id: sync.owner_id,
            total_amount: total_of(&sync.line_items),
            line_items: sync.line_items,
            currency: sync.currency,
            last_activity_at: now,
            converted: false,
            conversion_ref: None,
            merged_into: None,
            created_at: now,
            updated_at: now,
        };
        state.carts.push(cart.clone());
        Ok(cart)
    }

    async fn get_by_session_key(
        &self,
        session_key: &SessionKey,
    ) -> Result<Option<Cart>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .carts
            .iter()
            .find(|c| &c.session_key == session_key)
            .cloned())
    }

    async fn get_live_by_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<Cart>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .carts
            .iter()
            .find(|c| c.owner_id.as_ref() == Some(owner_id) && c.is_live())
            .cloned())
    }

    async fn find_reminder_candidates(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<Cart>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .carts
            .iter()
            .filter(|c| c.is_live() && !c.is_empty() && c.last_activity_at <= idle_since)
            .cloned()
            .collect())
    }

    async fn mark_converted(
        &self,
        target: &ConversionTarget,
        order_ref: &str,
    ) -> Result<Conversion, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let cart = state
            .carts
            .iter_mut()
            .find(|c| match target {
                ConversionTarget::SessionKey(key) => &c.session_key == key,
                ConversionTarget::CartId(id) => c.id == *id,
            })
            .ok_or(RepositoryError::NotFound)?;

        if cart.converted {
            return Ok(Conversion::AlreadyConverted(cart.clone()));
        }
        cart.converted = true;
        cart.conversion_ref = Some(order_ref.to_string());
        Ok(Conversion::Converted(cart.clone()))
    }

    async fn assign_owner(
        &self,
        cart_id: CartId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let cart = state
            .carts
            .iter_mut()
            .find(|c| c.id == cart_id)
            .ok_or(RepositoryError::NotFound)?;
        cart.owner_id = Some(owner_id.clone());
        cart.last_activity_at = now;
        cart.updated_at = now;
        Ok(cart.clone())
    }

    async fn replace_lines(
        &self,
        cart_id: CartId,
        line_items: Vec<LineItem>,
        total_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let cart = state
            .carts
            .iter_mut()
            .find(|c| c.id == cart_id)
            .ok_or(RepositoryError::NotFound)?;
        cart.line_items = line_items;
        cart.total_amount = total_amount;
        cart.last_activity_at = now;
        cart.updated_at = now;
        Ok(cart.clone())
    }

    async fn retire_merged(
        &self,
        cart_id: CartId,
        merged_into: CartId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let cart = state
            .carts
            .iter_mut()
            .find(|c| c.id == cart_id)
            .ok_or(RepositoryError::NotFound)?;
        cart.merged_into = Some(merged_into);
        Ok(())
    }
}

/// In-memory ledger enforcing the `(reminder_type, cart_id)` uniqueness.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    events: Vec<EmailEvent>,
    next_id: i32,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<EmailEvent> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl EventLedger for InMemoryLedger {
    async fn record(&self, event: NewEmailEvent) -> Result<LedgerInsert, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state
            .events
            .iter()
            .any(|e| e.reminder_type == event.reminder_type && e.cart_id == event.cart_id);
        if duplicate {
            return Ok(LedgerInsert::AlreadySent);
        }

        state.next_id += 1;
        let stored = EmailEvent {
            id: EmailEventId::new(state.next_id),
            reminder_type: event.reminder_type,
            cart_id: event.cart_id,
            recipient: event.recipient,
            sent_at: event.sent_at,
        };
        state.events.push(stored.clone());
        Ok(LedgerInsert::Recorded(stored))
    }

    async fn has_sent(
        &self,
        reminder_type: ReminderType,
        cart_id: CartId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .any(|e| e.reminder_type == reminder_type && e.cart_id == cart_id))
    }

    async fn sent_count(&self, cart_id: CartId) -> Result<u64, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.cart_id == cart_id)
            .count() as u64)
    }

    async fn events_for_cart(&self, cart_id: CartId) -> Result<Vec<EmailEvent>, RepositoryError> {
        let mut events: Vec<EmailEvent> = self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.cart_id == cart_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sent_at);
        Ok(events)
    }
}

/// Consent provider backed by a fixed map.
#[derive(Default)]
pub struct StaticConsent {
    recipients: Mutex<HashMap<OwnerId, Email>>,
    fail: AtomicBool,
}

impl StaticConsent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant consent for an owner with the given recipient address.
    pub fn grant(&self, owner_id: &OwnerId, email: Email) {
        self.recipients
            .lock()
            .unwrap()
            .insert(owner_id.clone(), email);
    }

    /// Withdraw consent for an owner.
    pub fn withdraw(&self, owner_id: &OwnerId) {
        self.recipients.lock().unwrap().remove(owner_id);
    }

    /// Make every lookup fail, simulating an identity-service outage.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConsentProvider for StaticConsent {
    async fn reminder_recipient(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<Email>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                message: "identity service down".to_string(),
            });
        }
        Ok(self.recipients.lock().unwrap().get(owner_id).cloned())
    }
}

/// Pricing provider backed by a fixed price list.
pub struct StaticPricing {
    prices: Mutex<HashMap<String, Decimal>>,
    default_price: Decimal,
    fail: AtomicBool,
}

impl StaticPricing {
    #[must_use]
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            default_price,
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_price(&self, product: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .insert(product.to_string(), price);
    }

    /// Make every lookup fail, simulating a catalog outage.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PricingProvider for StaticPricing {
    async fn unit_price(
        &self,
        product: &winback_core::ProductRef,
        _variant: Option<&winback_core::VariantRef>,
    ) -> Result<Decimal, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                message: "catalog down".to_string(),
            });
        }
        Ok(self
            .prices
            .lock()
            .unwrap()
            .get(product.as_str())
            .copied()
            .unwrap_or(self.default_price))
    }
}

/// Transport that records messages instead of delivering them.
#[derive(Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<ReminderMessage>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages confirmed so far.
    #[must_use]
    pub fn sent(&self) -> Vec<ReminderMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Make every send fail without confirmation.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, message: &ReminderMessage) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidAddress(
                "transport rigged to fail".to_string(),
            ));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// =============================================================================
// Test Engine
// =============================================================================

use std::sync::Arc;

use secrecy::SecretString;

use winback_engine::lifecycle::LifecycleThresholds;
use winback_engine::services::dispatcher::ReminderDispatcher;
use winback_engine::services::merge::CartMergeService;
use winback_engine::services::recovery::RecoveryTokenSigner;
use winback_engine::services::scheduler::{ReminderSchedule, ReminderScheduler};

/// Signing secret used across the harness; high-entropy so it would also
/// pass config validation.
pub const TEST_SECRET: &str = "k9#mP2$vL8@qR5!wX3^zA7&bN4*cD6(e";

/// Fully wired engine over in-memory doubles.
pub struct TestEngine {
    pub clock: Arc<ManualClock>,
    pub carts: Arc<InMemoryCartStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub consent: Arc<StaticConsent>,
    pub pricing: Arc<StaticPricing>,
    pub transport: Arc<RecordingTransport>,
    pub signer: RecoveryTokenSigner,
    pub scheduler: ReminderScheduler,
    pub merge: CartMergeService,
}

impl TestEngine {
    /// Build an engine with 30/60 minute lifecycle thresholds and the given
    /// reminder ladder (thresholds in minutes) and per-cart cap.
    #[must_use]
    pub fn with_schedule(tier_minutes: &[i64], max_reminders: u32) -> Self {
        let clock = Arc::new(ManualClock::at_origin());
        let carts = Arc::new(InMemoryCartStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let consent = Arc::new(StaticConsent::new());
        let pricing = Arc::new(StaticPricing::new(Decimal::new(999, 2)));
        let transport = Arc::new(RecordingTransport::new());

        let signer = RecoveryTokenSigner::new(SecretString::from(TEST_SECRET));
        let dispatcher = Arc::new(ReminderDispatcher::new(
            transport.clone(),
            signer.clone(),
            clock.clone(),
            "https://shop.test",
            TimeDelta::hours(72),
            std::time::Duration::from_secs(5),
        ));

        let thresholds =
            LifecycleThresholds::new(TimeDelta::minutes(30), TimeDelta::minutes(60)).unwrap();
        let schedule = ReminderSchedule::new(
            tier_minutes.iter().map(|m| TimeDelta::minutes(*m)).collect(),
            max_reminders,
        )
        .unwrap();

        let scheduler = ReminderScheduler::new(
            carts.clone(),
            ledger.clone(),
            consent.clone(),
            dispatcher,
            clock.clone(),
            schedule,
            thresholds,
            4,
        );
        let merge = CartMergeService::new(carts.clone(), pricing.clone(), clock.clone());

        Self {
            clock,
            carts,
            ledger,
            consent,
            pricing,
            transport,
            signer,
            scheduler,
            merge,
        }
    }

    /// The standard two-tier ladder: first reminder after an hour, second
    /// after a day, at most two reminders per cart.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_schedule(&[60, 1440], 2)
    }

    /// Sync a cart with one line per `(product, quantity, unit_price)`
    /// triple, owned by `owner` when given.
    pub async fn sync_cart(
        &self,
        session_key: &str,
        owner: Option<&str>,
        lines: &[(&str, u32, Decimal)],
    ) -> Cart {
        let sync = CartSync {
            session_key: SessionKey::from(session_key),
            owner_id: owner.map(OwnerId::from),
            currency: winback_core::CurrencyCode::USD,
            line_items: lines
                .iter()
                .map(|(product, quantity, unit_price)| LineItem {
                    product: winback_core::ProductRef::from(*product),
                    variant: None,
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect(),
        };
        self.carts.upsert_sync(sync, self.clock.now()).await.unwrap()
    }

    /// Grant consent for `owner` delivering to `email`.
    pub fn grant_consent(&self, owner: &str, email: &str) {
        self.consent
            .grant(&OwnerId::from(owner), email.parse().unwrap());
    }
}
