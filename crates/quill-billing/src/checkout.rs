//! Stripe Checkout Integration
//!
//! Hosted checkout for subscription plans and one-time credit packs. The
//! session metadata carries everything the reconciler needs, so the webhook
//! never has to call back into Stripe.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, Currency,
};

use crate::account::{Identity, Tier};
use crate::error::{BillingError, Result};

/// Session metadata keys
pub mod metadata {
    pub const IDENTITY: &str = "identity";
    pub const MODE: &str = "mode";
    pub const PLAN: &str = "plan";
    pub const MONTHLY_CREDITS: &str = "monthly_credits";
    pub const TOTAL_CREDITS: &str = "total_credits";

    pub const MODE_SUBSCRIPTION: &str = "subscription";
    pub const MODE_PAYMENT: &str = "payment";
}

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    webhook_secret: String,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(&secret_key, &webhook_secret))
    }

    /// Get the webhook secret
    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Create a hosted checkout session for `identity`.
    ///
    /// Returns a URL to redirect the user to Stripe's hosted checkout page.
    pub async fn create_checkout_session(
        &self,
        identity: &Identity,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession> {
        let pricing = request.product.pricing()?;
        let metadata = checkout_metadata(identity, request.product)?;

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.client_reference_id = Some(identity.as_str());
        params.customer_email = request
            .customer_email
            .as_deref()
            .or_else(|| identity.as_str().contains('@').then_some(identity.as_str()));
        params.mode = Some(match request.product {
            Product::Subscription { .. } => CheckoutSessionMode::Subscription,
            Product::CreditPack { .. } => CheckoutSessionMode::Payment,
        });
        params.metadata = Some(metadata);

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(pricing.cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: pricing.name.clone(),
                    description: Some(pricing.description.clone()),
                    ..Default::default()
                }),
                recurring: pricing.recurring.then_some(
                    CreateCheckoutSessionLineItemsPriceDataRecurring {
                        interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                        interval_count: Some(1),
                    },
                ),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = StripeCheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| BillingError::Stripe(e.to_string()))?;

        let checkout_url = session
            .url
            .ok_or_else(|| BillingError::Stripe("No checkout URL returned".into()))?;

        tracing::info!(
            session_id = %session.id,
            identity = %identity,
            product = %pricing.name,
            "Created checkout session"
        );

        Ok(CheckoutSession {
            id: session.id.to_string(),
            checkout_url,
            product: request.product,
        })
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient").finish_non_exhaustive()
    }
}

/// What is being bought
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Product {
    /// Monthly plan; refreshes the balance every cycle
    Subscription { plan: Tier },

    /// One-time top-up
    CreditPack { pack: CreditPack },
}

/// One-time credit packs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditPack {
    Small,
    Medium,
    Large,
}

impl CreditPack {
    pub const fn credits(self) -> u64 {
        match self {
            Self::Small => 100,
            Self::Medium => 500,
            Self::Large => 2_000,
        }
    }
}

/// Request to create a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub product: Product,

    /// URL to redirect after successful payment
    pub success_url: String,

    /// URL to redirect if checkout is cancelled
    pub cancel_url: String,

    /// Receipt address when the identity is not an email
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Stripe session ID
    pub id: String,

    /// URL to redirect user to
    pub checkout_url: String,

    pub product: Product,
}

/// Pricing information
#[derive(Clone, Debug)]
pub struct ProductPricing {
    pub name: String,
    pub description: String,
    pub cents: i64,
    pub recurring: bool,
}

impl Product {
    /// Get pricing for this product
    pub fn pricing(self) -> Result<ProductPricing> {
        let pricing = match self {
            Self::Subscription { plan: Tier::Starter } => ProductPricing {
                name: "Quill Starter".into(),
                description: "1,000 AI credits every month".into(),
                cents: 999,
                recurring: true,
            },
            Self::Subscription { plan: Tier::Pro } => ProductPricing {
                name: "Quill Pro".into(),
                description: "5,000 AI credits every month".into(),
                cents: 1999,
                recurring: true,
            },
            Self::Subscription { plan: Tier::Unlimited } => ProductPricing {
                name: "Quill Unlimited".into(),
                description: "Unlimited AI requests".into(),
                cents: 4999,
                recurring: true,
            },
            Self::Subscription { plan: Tier::Credits } => {
                return Err(BillingError::Invalid(
                    "the credits tier is pay-as-you-go; buy a credit pack instead".into(),
                ));
            }
            Self::CreditPack { pack } => ProductPricing {
                name: format!("{} Quill credits", pack.credits()),
                description: "One-time credit top-up".into(),
                cents: match pack {
                    CreditPack::Small => 499,
                    CreditPack::Medium => 1999,
                    CreditPack::Large => 5999,
                },
                recurring: false,
            },
        };
        Ok(pricing)
    }
}

/// Session metadata consumed by the payment reconciler
pub fn checkout_metadata(identity: &Identity, product: Product) -> Result<HashMap<String, String>> {
    let mut meta = HashMap::new();
    meta.insert(metadata::IDENTITY.to_string(), identity.to_string());

    match product {
        Product::Subscription { plan } => {
            let allotment = plan.monthly_allotment().ok_or_else(|| {
                BillingError::Invalid(format!("{plan} is not a subscription plan"))
            })?;
            meta.insert(metadata::MODE.to_string(), metadata::MODE_SUBSCRIPTION.to_string());
            meta.insert(metadata::PLAN.to_string(), plan.to_string());
            meta.insert(
                metadata::MONTHLY_CREDITS.to_string(),
                i64::from(allotment).to_string(),
            );
        }
        Product::CreditPack { pack } => {
            meta.insert(metadata::MODE.to_string(), metadata::MODE_PAYMENT.to_string());
            meta.insert(metadata::TOTAL_CREDITS.to_string(), pack.credits().to_string());
        }
    }
    Ok(meta)
}
