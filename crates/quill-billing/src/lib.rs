//! # quill-billing
//!
//! Accounts, license activation, credit metering and payment reconciliation
//! for the Quill API.
//!
//! ## Request metering
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Credential │──▶│  UsageMeter  │──▶│ LLM provider │──▶│ Permit       │
//! │  verify    │   │  authorize   │   │  (external)  │   │  settle      │
//! └────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                        │ hold                 │ failure
//!                        ▼                      ▼
//!                  balance reserved      permit dropped, hold released
//! ```
//!
//! ## Payments
//!
//! Stripe Checkout (hosted) creates the session; the webhook delivers
//! `checkout.session.completed`, `invoice.paid` and
//! `customer.subscription.deleted`, which [`PaymentReconciler`] applies to the
//! account store exactly once per event id.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quill_billing::{Billing, BillingConfig, CredentialCodec};
//!
//! let billing = Billing::in_memory(CredentialCodec::random(ttl)?, BillingConfig::default());
//! let grant = billing.activate_license("QUILL-AAAAA-BBBBB-CCCCC", "mac-1")?;
//!
//! let account = billing.authenticate(&grant.grant.token)?;
//! let permit = billing.authorize(&account.identity, 1)?;
//! // ... call the provider ...
//! permit.settle()?;
//! ```

mod account;
mod checkout;
mod credential;
mod error;
mod license;
mod meter;
mod password;
mod reconcile;
mod service;
mod webhook;

pub use account::{
    Account, AccountRepository, AccountStore, Balance, Identity, MemoryAccountRepository, Tier,
    UNLIMITED_SENTINEL,
};
pub use checkout::{
    CheckoutRequest, CheckoutSession, CreditPack, Product, ProductPricing, StripeClient,
    checkout_metadata,
};
pub use credential::{CredentialCodec, IssuedToken, MIN_TTL_DAYS};
pub use error::{BillingError, Result};
pub use license::{
    ActivationResult, License, LicenseKey, LicenseRegistry, LicenseRepository,
    MemoryLicenseRepository,
};
pub use meter::{DEFAULT_COST, Permit, UsageMeter};
pub use password::MIN_PASSWORD_LEN;
pub use reconcile::{
    PaymentEvent, PaymentMode, PaymentReconciler, ReconcileOutcome, payment_event_from_metadata,
};
pub use service::{AuthGrant, Billing, BillingConfig, LicenseGrant, SeedData, SeedUser};
pub use webhook::{WebhookEvent, WebhookHandler};
