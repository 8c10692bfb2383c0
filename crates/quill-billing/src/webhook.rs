//! Stripe Webhook Handling
//!
//! Verifies and parses Stripe events, then feeds them to the reconciler.

use std::sync::Arc;
use stripe::{Event, EventObject, EventType, InvoiceBillingReason, Webhook};

use crate::account::AccountStore;
use crate::error::{BillingError, Result};
use crate::reconcile::{
    PaymentEvent, PaymentMode, PaymentReconciler, ReconcileOutcome, payment_event_from_metadata,
};

/// Parsed webhook event
#[derive(Clone, Debug)]
pub enum WebhookEvent {
    /// Checkout completed: subscription start or credit pack purchase
    CheckoutCompleted {
        session_id: String,
        payment: PaymentEvent,
    },

    /// Subscription renewed for another cycle
    InvoicePaid {
        event_id: String,
        subscription_id: String,
    },

    /// Subscription cancelled
    SubscriptionCancelled {
        event_id: String,
        subscription_id: String,
    },

    /// Unhandled event type
    Other { event_type: String },
}

/// Webhook handler
pub struct WebhookHandler {
    accounts: AccountStore,
    reconciler: Arc<PaymentReconciler>,
}

impl WebhookHandler {
    pub fn new(accounts: AccountStore, reconciler: Arc<PaymentReconciler>) -> Self {
        Self {
            accounts,
            reconciler,
        }
    }

    /// Verify webhook signature and parse event
    pub fn parse_event(&self, payload: &str, signature: &str, secret: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, secret)
            .map_err(|e| BillingError::WebhookSignature(e.to_string()))
    }

    /// Process a verified webhook event
    pub fn handle(&self, event: &Event) -> Result<ReconcileOutcome> {
        tracing::info!(event_id = %event.id, event_type = ?event.type_, "Processing Stripe webhook");

        let parsed = Self::parse_webhook_event(event)?;
        self.dispatch(parsed)
    }

    /// Apply a parsed event
    pub fn dispatch(&self, event: WebhookEvent) -> Result<ReconcileOutcome> {
        match event {
            WebhookEvent::CheckoutCompleted { session_id, payment } => {
                tracing::debug!(session_id = %session_id, identity = %payment.target, "Checkout completed");
                self.reconciler.reconcile(&payment)
            }

            WebhookEvent::InvoicePaid {
                event_id,
                subscription_id,
            } => {
                let Some(account) = self.accounts.find_by_subscription(&subscription_id)? else {
                    return Ok(ReconcileOutcome::Dropped {
                        reason: format!("no account for subscription {subscription_id}"),
                    });
                };
                let Some(monthly_credits) = account.tier.monthly_allotment() else {
                    return Ok(ReconcileOutcome::Dropped {
                        reason: format!("{} is not on a subscription plan", account.identity),
                    });
                };

                self.reconciler.reconcile(&PaymentEvent {
                    event_id,
                    target: account.identity,
                    mode: PaymentMode::Subscription {
                        plan: account.tier,
                        monthly_credits,
                    },
                    subscription_id: Some(subscription_id),
                })
            }

            WebhookEvent::SubscriptionCancelled {
                event_id,
                subscription_id,
            } => {
                let Some(account) = self.accounts.find_by_subscription(&subscription_id)? else {
                    return Ok(ReconcileOutcome::Dropped {
                        reason: format!("no account for subscription {subscription_id}"),
                    });
                };

                self.reconciler.reconcile(&PaymentEvent {
                    event_id,
                    target: account.identity,
                    mode: PaymentMode::Cancellation,
                    subscription_id: Some(subscription_id),
                })
            }

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                Ok(ReconcileOutcome::Dropped {
                    reason: format!("unhandled event type {event_type}"),
                })
            }
        }
    }

    /// Parse Stripe event into our event type
    fn parse_webhook_event(event: &Event) -> Result<WebhookEvent> {
        let event_id = event.id.to_string();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                let EventObject::CheckoutSession(session) = &event.data.object else {
                    return Err(BillingError::WebhookParse("Invalid checkout session data".into()));
                };
                let metadata = session.metadata.clone().unwrap_or_default();
                let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());

                Ok(WebhookEvent::CheckoutCompleted {
                    session_id: session.id.to_string(),
                    payment: payment_event_from_metadata(&event_id, &metadata, subscription_id)?,
                })
            }

            EventType::InvoicePaid => {
                let EventObject::Invoice(invoice) = &event.data.object else {
                    return Err(BillingError::WebhookParse("Invalid invoice data".into()));
                };
                // The first invoice is covered by checkout.session.completed
                let renewal = matches!(
                    invoice.billing_reason,
                    Some(InvoiceBillingReason::SubscriptionCycle)
                );
                match invoice.subscription.as_ref() {
                    Some(sub) if renewal => Ok(WebhookEvent::InvoicePaid {
                        event_id,
                        subscription_id: sub.id().to_string(),
                    }),
                    _ => Ok(WebhookEvent::Other {
                        event_type: format!("{:?}", event.type_),
                    }),
                }
            }

            EventType::CustomerSubscriptionDeleted => {
                let EventObject::Subscription(sub) = &event.data.object else {
                    return Err(BillingError::WebhookParse("Invalid subscription data".into()));
                };
                Ok(WebhookEvent::SubscriptionCancelled {
                    event_id,
                    subscription_id: sub.id.to_string(),
                })
            }

            _ => Ok(WebhookEvent::Other {
                event_type: format!("{:?}", event.type_),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Balance, Identity, Tier};

    fn handler() -> (AccountStore, WebhookHandler) {
        let accounts = AccountStore::in_memory();
        let reconciler = Arc::new(PaymentReconciler::new(accounts.clone()));
        (accounts.clone(), WebhookHandler::new(accounts, reconciler))
    }

    fn subscribed(accounts: &AccountStore, tier: Tier) -> Identity {
        let identity = Identity::new("writer@example.com");
        accounts
            .get_or_create(identity.clone(), Balance::Limited(0), Tier::Credits)
            .unwrap();
        accounts
            .apply_subscription(&identity, tier, tier.monthly_allotment(), Some("sub_1"))
            .unwrap();
        identity
    }

    #[test]
    fn test_bad_signature_rejected() {
        let (_, handler) = handler();
        let result = handler.parse_event(r#"{"id":"evt_1"}"#, "t=1,v1=deadbeef", "whsec_test");
        assert!(matches!(result, Err(BillingError::WebhookSignature(_))));
    }

    #[test]
    fn test_invoice_paid_refreshes_allotment() {
        let (accounts, handler) = handler();
        let identity = subscribed(&accounts, Tier::Starter);
        accounts.refresh_allotment(&identity, Balance::Limited(3)).unwrap();

        let outcome = handler
            .dispatch(WebhookEvent::InvoicePaid {
                event_id: "evt_renew".into(),
                subscription_id: "sub_1".into(),
            })
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(accounts.require(&identity).unwrap().credits, Balance::Limited(1_000));
    }

    #[test]
    fn test_subscription_cancelled_downgrades() {
        let (accounts, handler) = handler();
        let identity = subscribed(&accounts, Tier::Pro);

        handler
            .dispatch(WebhookEvent::SubscriptionCancelled {
                event_id: "evt_cancel".into(),
                subscription_id: "sub_1".into(),
            })
            .unwrap();

        let account = accounts.require(&identity).unwrap();
        assert_eq!(account.tier, Tier::Credits);
        assert!(account.subscription_id.is_none());
    }

    #[test]
    fn test_unknown_subscription_dropped() {
        let (_, handler) = handler();
        let outcome = handler
            .dispatch(WebhookEvent::InvoicePaid {
                event_id: "evt_1".into(),
                subscription_id: "sub_missing".into(),
            })
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Dropped { .. }));
    }

    #[test]
    fn test_checkout_completed_tops_up() {
        let (accounts, handler) = handler();
        let identity = Identity::new("writer@example.com");
        accounts
            .get_or_create(identity.clone(), Balance::Limited(50), Tier::Credits)
            .unwrap();

        let payment = PaymentEvent {
            event_id: "evt_pack".into(),
            target: identity.clone(),
            mode: PaymentMode::Payment { total_credits: 150 },
            subscription_id: None,
        };
        handler
            .dispatch(WebhookEvent::CheckoutCompleted {
                session_id: "cs_1".into(),
                payment,
            })
            .unwrap();

        assert_eq!(accounts.require(&identity).unwrap().credits, Balance::Limited(200));
    }
}
