//! Application State

use std::sync::Arc;

use quill_billing::{Billing, StripeClient};
use quill_core::WritingAssistant;

use crate::admission::Admission;
use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Writing assistant (provider + tool registry)
    pub assistant: WritingAssistant,

    /// Accounts, licenses, metering and reconciliation
    pub billing: Billing,

    /// Authenticate → meter → provider → settle pipeline
    pub admission: Admission,

    /// Stripe client (None if not configured)
    pub stripe: Option<Arc<StripeClient>>,

    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        assistant: WritingAssistant,
        billing: Billing,
        stripe: Option<StripeClient>,
        config: ServerConfig,
    ) -> Self {
        Self {
            admission: Admission::new(billing.clone(), assistant.clone()),
            assistant,
            billing,
            stripe: stripe.map(Arc::new),
            config: Arc::new(config),
        }
    }
}
