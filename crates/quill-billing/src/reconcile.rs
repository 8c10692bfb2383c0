//! Payment Reconciler
//!
//! Maps verified payment events onto account mutations. Each event id is
//! applied at most once: a redelivered event is acknowledged as a duplicate,
//! and an event whose application failed is forgotten so the provider's retry
//! can apply it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::account::{Account, AccountStore, Balance, Identity, Tier};
use crate::checkout::metadata;
use crate::error::{BillingError, Result, poisoned};

/// A verified payment notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentEvent {
    /// Provider event id, the dedup key
    pub event_id: String,
    pub target: Identity,
    pub mode: PaymentMode,
    pub subscription_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentMode {
    /// Plan start or monthly renewal: sets the tier, replaces the balance
    Subscription { plan: Tier, monthly_credits: Balance },

    /// One-time purchase: adds to the balance
    Payment { total_credits: u64 },

    /// Subscription ended: back to pay-per-request
    Cancellation,
}

impl PaymentMode {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription { .. } => "subscription",
            Self::Payment { .. } => "payment",
            Self::Cancellation => "cancellation",
        }
    }
}

/// Result of reconciling one event
#[derive(Clone, Debug)]
pub enum ReconcileOutcome {
    Applied(Account),

    /// Event id already applied
    Duplicate,

    /// Not applicable (e.g. target never seen); logged and acknowledged
    Dropped { reason: String },
}

/// Processed and in-flight event ids.
///
/// `done` is never pruned: it lives as long as the process, like the
/// in-memory account store it guards.
#[derive(Default)]
struct EventLedger {
    done: HashSet<String>,
    in_flight: HashSet<String>,
}

pub struct PaymentReconciler {
    accounts: AccountStore,
    ledger: Mutex<EventLedger>,
}

impl PaymentReconciler {
    pub fn new(accounts: AccountStore) -> Self {
        Self {
            accounts,
            ledger: Mutex::new(EventLedger::default()),
        }
    }

    /// Apply `event` exactly once.
    ///
    /// `Err` only for failures worth a provider retry (storage, concurrent
    /// delivery). Unknown targets come back as `Dropped`.
    pub fn reconcile(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        {
            let mut ledger = self.ledger.lock().map_err(poisoned)?;
            if ledger.done.contains(&event.event_id) {
                tracing::info!(event_id = %event.event_id, "Duplicate payment event ignored");
                return Ok(ReconcileOutcome::Duplicate);
            }
            if !ledger.in_flight.insert(event.event_id.clone()) {
                return Err(BillingError::EventInProgress(event.event_id.clone()));
            }
        }

        let result = self.apply(event);

        let mut ledger = self.ledger.lock().map_err(poisoned)?;
        ledger.in_flight.remove(&event.event_id);
        if result.is_ok() {
            ledger.done.insert(event.event_id.clone());
        }
        drop(ledger);

        match &result {
            Ok(ReconcileOutcome::Applied(account)) => tracing::info!(
                event_id = %event.event_id,
                identity = %account.identity,
                mode = event.mode.as_str(),
                tier = %account.tier,
                credits = %account.credits,
                "Reconciled payment event"
            ),
            Ok(ReconcileOutcome::Dropped { reason }) => tracing::warn!(
                event_id = %event.event_id,
                identity = %event.target,
                reason = %reason,
                "Dropped payment event"
            ),
            Ok(ReconcileOutcome::Duplicate) => {}
            Err(e) => tracing::error!(
                event_id = %event.event_id,
                identity = %event.target,
                error = %e,
                "Failed to reconcile payment event"
            ),
        }
        result
    }

    fn apply(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        let result = match event.mode {
            PaymentMode::Subscription { plan, monthly_credits } => self.accounts.apply_subscription(
                &event.target,
                plan,
                Some(monthly_credits),
                event.subscription_id.as_deref(),
            ),
            PaymentMode::Payment { total_credits } => {
                let (_, created) = self.accounts.repository().get_or_insert(Account::new(
                    event.target.clone(),
                    Balance::Limited(0),
                    Tier::Credits,
                ))?;
                if created {
                    tracing::warn!(identity = %event.target, "Payment for unseen identity, created account");
                }
                self.accounts.credit(&event.target, total_credits)
            }
            PaymentMode::Cancellation => self.accounts.cancel_subscription(&event.target),
        };

        match result {
            Ok(account) => Ok(ReconcileOutcome::Applied(account)),
            Err(BillingError::UnknownIdentity(identity)) => Ok(ReconcileOutcome::Dropped {
                reason: format!("unknown identity {identity}"),
            }),
            Err(e) => Err(e),
        }
    }

    /// Number of event ids applied so far
    pub fn processed(&self) -> Result<usize> {
        Ok(self.ledger.lock().map_err(poisoned)?.done.len())
    }
}

/// Build a payment event from checkout session metadata
pub fn payment_event_from_metadata(
    event_id: &str,
    meta: &HashMap<String, String>,
    subscription_id: Option<String>,
) -> Result<PaymentEvent> {
    let field = |key: &str| {
        meta.get(key)
            .map(String::as_str)
            .ok_or_else(|| BillingError::WebhookParse(format!("metadata missing `{key}`")))
    };
    let number = |key: &str| -> Result<i64> {
        field(key)?
            .parse()
            .map_err(|_| BillingError::WebhookParse(format!("metadata `{key}` is not an integer")))
    };

    let target = Identity::new(field(metadata::IDENTITY)?);
    let mode = match field(metadata::MODE)? {
        metadata::MODE_SUBSCRIPTION => {
            let plan: Tier = field(metadata::PLAN)?.parse()?;
            let monthly_credits = if meta.contains_key(metadata::MONTHLY_CREDITS) {
                Balance::try_from(number(metadata::MONTHLY_CREDITS)?)
                    .map_err(BillingError::WebhookParse)?
            } else {
                plan.monthly_allotment().unwrap_or_default()
            };
            PaymentMode::Subscription { plan, monthly_credits }
        }
        metadata::MODE_PAYMENT => {
            let total = number(metadata::TOTAL_CREDITS)?;
            let total_credits = u64::try_from(total).map_err(|_| {
                BillingError::WebhookParse(format!("negative credit purchase: {total}"))
            })?;
            PaymentMode::Payment { total_credits }
        }
        other => {
            return Err(BillingError::WebhookParse(format!("unknown checkout mode `{other}`")));
        }
    };

    Ok(PaymentEvent {
        event_id: event_id.to_string(),
        target,
        mode,
        subscription_id,
    })
}
