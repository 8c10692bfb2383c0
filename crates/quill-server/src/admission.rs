//! Request admission
//!
//! One tool invocation moves through
//! `Unauthenticated → Authenticated → CreditChecked → ProviderCalled → Settled`.
//! The provider call and the settlement run together on a spawned task: once
//! the provider has been called the debit happens even if the client has gone
//! away, and a failed call drops the permit without charging.

use thiserror::Error;
use uuid::Uuid;

use quill_billing::{Account, Billing, BillingError, DEFAULT_COST};
use quill_core::{Completion, QuillError, ToolRequest, WritingAssistant};

/// Terminal failure of an admission
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Missing, invalid or expired credential
    #[error("unauthorized: {0}")]
    Unauthorized(BillingError),

    /// Credits exhausted
    #[error("payment required: {0}")]
    PaymentRequired(BillingError),

    /// Request rejected before any provider call
    #[error("invalid request: {0}")]
    Invalid(QuillError),

    /// Provider call failed; nothing was charged
    #[error("provider failure: {0}")]
    Provider(QuillError),

    /// Account store failure
    #[error(transparent)]
    Billing(BillingError),

    /// The provider task panicked or was cancelled by the runtime
    #[error("request task aborted: {0}")]
    Aborted(String),
}

/// A completed and charged request
#[derive(Debug)]
pub struct Settled {
    pub request_id: Uuid,
    pub completion: Completion,
    /// Account state after the debit
    pub account: Account,
}

#[derive(Clone)]
pub struct Admission {
    billing: Billing,
    assistant: WritingAssistant,
}

impl Admission {
    pub fn new(billing: Billing, assistant: WritingAssistant) -> Self {
        Self { billing, assistant }
    }

    /// Resolve a bearer token to its account
    pub fn authenticate(&self, token: Option<&str>) -> Result<Account, AdmissionError> {
        let token = token.ok_or_else(|| {
            AdmissionError::Unauthorized(BillingError::Unauthorized("missing bearer token".into()))
        })?;

        self.billing.authenticate(token).map_err(|e| match e {
            BillingError::Storage(_) => AdmissionError::Billing(e),
            e => AdmissionError::Unauthorized(e),
        })
    }

    /// Run one tool invocation for the holder of `token`
    pub async fn run(&self, token: Option<&str>, request: ToolRequest) -> Result<Settled, AdmissionError> {
        let request_id = Uuid::new_v4();

        let account = self.authenticate(token)?;
        let identity = account.identity;

        let prepared = self.assistant.prepare(&request).map_err(AdmissionError::Invalid)?;

        let permit = self
            .billing
            .authorize(&identity, DEFAULT_COST)
            .map_err(|e| match e {
                BillingError::InsufficientCredits { .. } => AdmissionError::PaymentRequired(e),
                BillingError::UnknownIdentity(_) => AdmissionError::Unauthorized(e),
                e => AdmissionError::Billing(e),
            })?;

        tracing::info!(
            request_id = %request_id,
            identity = %identity,
            tool = %request.tool,
            model = %prepared.model,
            cost = permit.units(),
            "Request admitted"
        );

        let assistant = self.assistant.clone();
        let task = tokio::spawn(async move {
            let completion = match assistant.complete(&prepared).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        identity = %permit.identity(),
                        error = %e,
                        "Provider call failed, nothing charged"
                    );
                    if let Err(release_err) = permit.release() {
                        tracing::error!(request_id = %request_id, error = %release_err, "Failed to release credit hold");
                    }
                    return Err(AdmissionError::Provider(e));
                }
            };

            let account = permit.settle().map_err(AdmissionError::Billing)?;
            tracing::info!(
                request_id = %request_id,
                identity = %account.identity,
                credits = %account.credits,
                "Request settled"
            );
            Ok(Settled {
                request_id,
                completion,
                account,
            })
        });

        task.await.map_err(|e| AdmissionError::Aborted(e.to_string()))?
    }
}
