//! Reminder scheduling.
//!
//! The scheduler is stateless between passes: every tick re-derives what to
//! do from the cart store and the event ledger. Crashing mid-pass loses
//! nothing; the next tick picks up exactly where the ledger says things
//! stand. Per-cart failures are isolated - one broken cart or one transport
//! hiccup never stops the rest of the pass.

use std::sync::Arc;

use chrono::TimeDelta;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use winback_core::{LifecycleState, ReminderType};

use crate::clock::Clock;
use crate::db::{CartRepository, EventLedger, LedgerInsert, RepositoryError};
use crate::lifecycle::{LifecycleThresholds, classify};
use crate::models::{Cart, NewEmailEvent};
use crate::services::dispatcher::ReminderDispatcher;
use crate::services::providers::ConsentProvider;

/// One escalation step: the tier to send once a cart has been idle for at
/// least `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderTier {
    pub reminder_type: ReminderType,
    pub threshold: TimeDelta,
}

/// Why a reminder schedule was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// A positive reminder cap needs at least one tier to send.
    #[error("reminder schedule is empty but max_reminders is {0}")]
    Empty(u32),

    /// Tier thresholds must be positive.
    #[error("tier {0} threshold is not positive")]
    NonPositive(u32),

    /// Tier thresholds must strictly ascend.
    #[error("tier {0} threshold does not ascend past the previous tier")]
    NonAscending(u32),
}

/// The validated escalation ladder plus the per-cart reminder cap.
#[derive(Debug, Clone)]
pub struct ReminderSchedule {
    tiers: Vec<ReminderTier>,
    max_reminders: u32,
}

impl ReminderSchedule {
    /// Build a schedule from ascending idle thresholds. Tier ordinals are
    /// assigned from position, first tier is tier 1.
    ///
    /// # Errors
    ///
    /// Rejects an empty ladder when `max_reminders` is positive, and any
    /// ladder whose thresholds are not positive and strictly ascending.
    pub fn new(thresholds: Vec<TimeDelta>, max_reminders: u32) -> Result<Self, ScheduleError> {
        if thresholds.is_empty() && max_reminders > 0 {
            return Err(ScheduleError::Empty(max_reminders));
        }

        let mut tiers = Vec::with_capacity(thresholds.len());
        let mut previous: Option<TimeDelta> = None;
        for (i, threshold) in thresholds.into_iter().enumerate() {
            let ordinal = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
            if threshold <= TimeDelta::zero() {
                return Err(ScheduleError::NonPositive(ordinal));
            }
            if previous.is_some_and(|p| threshold <= p) {
                return Err(ScheduleError::NonAscending(ordinal));
            }
            previous = Some(threshold);
            tiers.push(ReminderTier {
                reminder_type: ReminderType::tier(i16::try_from(ordinal).unwrap_or(i16::MAX)),
                threshold,
            });
        }

        Ok(Self {
            tiers,
            max_reminders,
        })
    }

    #[must_use]
    pub fn tiers(&self) -> &[ReminderTier] {
        &self.tiers
    }

    #[must_use]
    pub const fn max_reminders(&self) -> u32 {
        self.max_reminders
    }

    /// Whether this tier is the last rung of the ladder.
    #[must_use]
    pub fn is_final(&self, reminder_type: ReminderType) -> bool {
        self.tiers
            .last()
            .is_some_and(|t| t.reminder_type == reminder_type)
    }
}

/// Counters from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Carts returned by the candidate scan.
    pub candidates: u64,
    /// Reminders confirmed sent and recorded.
    pub sent: u64,
    /// Carts skipped for missing or withdrawn consent.
    pub skipped_consent: u64,
    /// Tier sends skipped because the ledger already held the pair.
    pub skipped_already_sent: u64,
    /// Dispatch or per-cart lookup failures; retried naturally next tick.
    pub failed: u64,
}

impl TickSummary {
    fn absorb(mut self, other: Self) -> Self {
        self.sent += other.sent;
        self.skipped_consent += other.skipped_consent;
        self.skipped_already_sent += other.skipped_already_sent;
        self.failed += other.failed;
        self
    }
}

/// Drives reminder passes over the cart store.
pub struct ReminderScheduler {
    carts: Arc<dyn CartRepository>,
    ledger: Arc<dyn EventLedger>,
    consent: Arc<dyn ConsentProvider>,
    dispatcher: Arc<ReminderDispatcher>,
    clock: Arc<dyn Clock>,
    schedule: ReminderSchedule,
    thresholds: LifecycleThresholds,
    concurrency: usize,
}

impl ReminderScheduler {
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        ledger: Arc<dyn EventLedger>,
        consent: Arc<dyn ConsentProvider>,
        dispatcher: Arc<ReminderDispatcher>,
        clock: Arc<dyn Clock>,
        schedule: ReminderSchedule,
        thresholds: LifecycleThresholds,
        concurrency: usize,
    ) -> Self {
        Self {
            carts,
            ledger,
            consent,
            dispatcher,
            clock,
            schedule,
            thresholds,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one full pass: scan candidates, then walk each cart up the tier
    /// ladder, sending whatever is due and unsent.
    ///
    /// # Errors
    ///
    /// Only the candidate scan itself can fail the pass; everything after
    /// is per-cart and isolated into [`TickSummary::failed`].
    pub async fn run_tick(&self) -> Result<TickSummary, RepositoryError> {
        let Some(first_tier) = self.schedule.tiers().first() else {
            return Ok(TickSummary::default());
        };

        let now = self.clock.now();
        let candidates = self
            .carts
            .find_reminder_candidates(now - first_tier.threshold)
            .await?;

        let candidate_count = candidates.len() as u64;
        let mut summary = futures::stream::iter(candidates)
            .map(|cart| async move { self.process_cart(&cart).await })
            .buffer_unordered(self.concurrency)
            .fold(TickSummary::default(), |acc, per_cart| async move {
                acc.absorb(per_cart)
            })
            .await;
        summary.candidates = candidate_count;

        info!(
            candidates = summary.candidates,
            sent = summary.sent,
            skipped_consent = summary.skipped_consent,
            skipped_already_sent = summary.skipped_already_sent,
            failed = summary.failed,
            "Reminder pass complete"
        );

        Ok(summary)
    }

    async fn process_cart(&self, cart: &Cart) -> TickSummary {
        let mut summary = TickSummary::default();
        // Re-read the clock per cart; a long pass must not dispatch from a
        // stale notion of now.
        let now = self.clock.now();

        // The classifier is the authority on eligibility. The SQL scan is a
        // pre-filter; anything that slipped through gets rejected here.
        let state = classify(cart, now, &self.thresholds);
        if !matches!(state, LifecycleState::Stale | LifecycleState::Abandoned) {
            debug!(cart_id = %cart.id, %state, "Candidate no longer eligible");
            return summary;
        }

        let Some(owner_id) = cart.owner_id.as_ref() else {
            // Anonymous cart: nobody to ask for consent, nobody to mail
            debug!(cart_id = %cart.id, "Skipping reminder, cart has no identity");
            summary.skipped_consent += 1;
            return summary;
        };

        let recipient = match self.consent.reminder_recipient(owner_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                info!(cart_id = %cart.id, "Skipping reminder, consent absent");
                summary.skipped_consent += 1;
                return summary;
            }
            Err(e) => {
                warn!(cart_id = %cart.id, error = %e, "Consent lookup failed");
                summary.failed += 1;
                return summary;
            }
        };

        let mut sent_total = match self.ledger.sent_count(cart.id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(cart_id = %cart.id, error = %e, "Ledger count failed");
                summary.failed += 1;
                return summary;
            }
        };

        let age = cart.age(now);
        for tier in self.schedule.tiers() {
            if age < tier.threshold {
                break;
            }
            if sent_total >= u64::from(self.schedule.max_reminders()) {
                debug!(cart_id = %cart.id, "Reminder cap reached");
                break;
            }

            match self.ledger.has_sent(tier.reminder_type, cart.id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        cart_id = %cart.id,
                        reminder_type = %tier.reminder_type,
                        error = %e,
                        "Ledger lookup failed"
                    );
                    summary.failed += 1;
                    continue;
                }
            }

            let final_reminder = self.schedule.is_final(tier.reminder_type);
            match self
                .dispatcher
                .dispatch(cart, tier.reminder_type, final_reminder, &recipient, now)
                .await
            {
                Ok(receipt) => {
                    let event = NewEmailEvent {
                        reminder_type: tier.reminder_type,
                        cart_id: cart.id,
                        recipient: receipt.recipient,
                        sent_at: receipt.sent_at,
                    };
                    match self.ledger.record(event).await {
                        Ok(LedgerInsert::Recorded(_)) => {
                            info!(
                                cart_id = %cart.id,
                                reminder_type = %tier.reminder_type,
                                "Reminder sent"
                            );
                            summary.sent += 1;
                            sent_total += 1;
                        }
                        Ok(LedgerInsert::AlreadySent) => {
                            // Lost a race with a concurrent pass; the
                            // recipient may see a duplicate this once, but
                            // the ledger stays consistent.
                            warn!(
                                cart_id = %cart.id,
                                reminder_type = %tier.reminder_type,
                                "Concurrent pass recorded this reminder first"
                            );
                            summary.skipped_already_sent += 1;
                            sent_total += 1;
                        }
                        Err(e) => {
                            error!(
                                cart_id = %cart.id,
                                reminder_type = %tier.reminder_type,
                                error = %e,
                                "Sent reminder but failed to record it"
                            );
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    // No ledger row was written, so the next pass retries
                    warn!(
                        cart_id = %cart.id,
                        reminder_type = %tier.reminder_type,
                        error = %e,
                        "Reminder dispatch failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Spawn the periodic tick loop. The first pass runs immediately.
    #[must_use]
    pub fn start(self: Arc<Self>, interval: std::time::Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = interval.as_secs(), "Reminder scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_tick().await {
                            error!(error = %e, "Reminder pass failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reminder scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for the in-flight pass to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
