//! Usage Meter
//!
//! Per-request admission and debit. `authorize` reserves the request's cost
//! against the balance under the account lock and hands back a [`Permit`];
//! the permit is settled (debited) only after the provider call succeeds.
//! Dropping an unsettled permit releases the hold, so a failed call never
//! touches the balance and concurrent requests can never be admitted past
//! exhaustion.

use std::sync::Arc;

use crate::account::{Account, AccountRepository, Balance, Identity};
use crate::error::{BillingError, Result};

/// Units charged for one tool invocation
pub const DEFAULT_COST: u64 = 1;

#[derive(Clone)]
pub struct UsageMeter {
    repo: Arc<dyn AccountRepository>,
}

impl UsageMeter {
    pub fn new(repo: Arc<dyn AccountRepository>) -> Self {
        Self { repo }
    }

    /// Admit a request costing `cost` units.
    ///
    /// Metered accounts hold `cost` units until the permit is settled or
    /// dropped. Flat-rate tiers and unlimited balances always permit.
    pub fn authorize(&self, identity: &Identity, cost: u64) -> Result<Permit> {
        let mut held = 0;
        self.repo
            .update(identity, &mut |account| {
                held = 0;
                if !account.tier.is_metered() {
                    return Ok(());
                }
                match account.available() {
                    Balance::Unlimited => Ok(()),
                    Balance::Limited(n) if n == 0 || n < cost => {
                        Err(BillingError::InsufficientCredits {
                            identity: account.identity.to_string(),
                        })
                    }
                    Balance::Limited(_) => {
                        account.reserved += cost;
                        held = cost;
                        Ok(())
                    }
                }
            })
            .inspect_err(|e| {
                if matches!(e, BillingError::InsufficientCredits { .. }) {
                    tracing::info!(identity = %identity, cost, "Request denied: credits exhausted");
                }
            })?
            .ok_or_else(|| BillingError::UnknownIdentity(identity.to_string()))?;

        Ok(Permit {
            repo: Arc::clone(&self.repo),
            identity: identity.clone(),
            units: cost,
            held,
            settled: false,
        })
    }

    /// Debit `units` outside the permit flow. No-op for non-metered tiers;
    /// floors at zero.
    pub fn debit(&self, identity: &Identity, units: u64) -> Result<Account> {
        self.repo
            .update(identity, &mut |account| {
                if account.tier.is_metered() {
                    account.credits = account.credits.debit(units);
                }
                Ok(())
            })?
            .ok_or_else(|| BillingError::UnknownIdentity(identity.to_string()))
    }
}

/// Admission granted by [`UsageMeter::authorize`]
#[must_use = "dropping a permit releases its hold without debiting"]
pub struct Permit {
    repo: Arc<dyn AccountRepository>,
    identity: Identity,
    units: u64,
    held: u64,
    settled: bool,
}

impl Permit {
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Units this request will be charged on settlement
    pub const fn units(&self) -> u64 {
        self.units
    }

    /// Charge the request. Call only after the provider call succeeded.
    pub fn settle(mut self) -> Result<Account> {
        self.settled = true;
        let (held, units) = (self.held, self.units);

        let account = self
            .repo
            .update(&self.identity, &mut |account| {
                account.reserved = account.reserved.saturating_sub(held);
                if account.tier.is_metered() {
                    account.credits = account.credits.debit(units);
                }
                Ok(())
            })?
            .ok_or_else(|| BillingError::UnknownIdentity(self.identity.to_string()))?;

        tracing::debug!(identity = %self.identity, units, credits = %account.credits, "Settled request");
        Ok(account)
    }

    /// Give the hold back without charging
    pub fn release(mut self) -> Result<()> {
        self.settled = true;
        self.release_hold()
    }

    fn release_hold(&self) -> Result<()> {
        if self.held == 0 {
            return Ok(());
        }
        let held = self.held;
        self.repo.update(&self.identity, &mut |account| {
            account.reserved = account.reserved.saturating_sub(held);
            Ok(())
        })?;
        Ok(())
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.release_hold() {
            tracing::error!(identity = %self.identity, error = %e, "Failed to release credit hold");
        }
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("identity", &self.identity)
            .field("units", &self.units)
            .field("held", &self.held)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}
