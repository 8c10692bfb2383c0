//! Billing service object
//!
//! Owns the account store, license registry, usage meter, reconciler and
//! credential codec, and exposes the authentication flows that create
//! accounts: password registration, desktop auto-auth and license activation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::account::{
    Account, AccountRepository, AccountStore, Balance, Identity, MemoryAccountRepository, Tier,
};
use crate::credential::CredentialCodec;
use crate::error::{BillingError, Result};
use crate::license::{
    License, LicenseKey, LicenseRegistry, LicenseRepository, MemoryLicenseRepository,
};
use crate::meter::{Permit, UsageMeter};
use crate::reconcile::PaymentReconciler;
use crate::webhook::WebhookHandler;

/// Initial balances for self-service accounts
#[derive(Clone, Copy, Debug)]
pub struct BillingConfig {
    /// Credits granted on password registration
    pub signup_credits: u64,

    /// Credits granted to a new desktop install
    pub desktop_trial_credits: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            signup_credits: 50,
            desktop_trial_credits: 25,
        }
    }
}

/// Token plus the account it authenticates
#[derive(Clone, Debug, Serialize)]
pub struct AuthGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}

/// Result of a license activation
#[derive(Clone, Debug, Serialize)]
pub struct LicenseGrant {
    #[serde(flatten)]
    pub grant: AuthGrant,
    pub license_key: String,
    pub first_activation: bool,
}

/// Demo password account
#[derive(Clone, Debug)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
    pub credits: Balance,
    pub tier: Tier,
}

/// Data loaded at startup
#[derive(Clone, Debug, Default)]
pub struct SeedData {
    pub licenses: Vec<License>,
    pub users: Vec<SeedUser>,
}

impl SeedData {
    /// Demo licenses (one metered, one unlimited) and a demo login
    pub fn demo() -> Self {
        Self {
            licenses: vec![
                License::new(
                    LicenseKey::from_string("QUILL-DEMO0-AAAAA-00001"),
                    Tier::Credits,
                    Balance::Limited(500),
                ),
                License::new(
                    LicenseKey::from_string("QUILL-DEMO0-UNLTD-00002"),
                    Tier::Unlimited,
                    Balance::Unlimited,
                ),
            ],
            users: vec![SeedUser {
                email: "demo@quill.app".into(),
                password: "quill-demo".into(),
                credits: Balance::Limited(100),
                tier: Tier::Credits,
            }],
        }
    }
}

#[derive(Clone)]
pub struct Billing {
    accounts: AccountStore,
    licenses: LicenseRegistry,
    meter: UsageMeter,
    reconciler: Arc<PaymentReconciler>,
    codec: CredentialCodec,
    config: BillingConfig,
}

impl Billing {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        licenses: Arc<dyn LicenseRepository>,
        codec: CredentialCodec,
        config: BillingConfig,
    ) -> Self {
        let meter = UsageMeter::new(Arc::clone(&accounts));
        let accounts = AccountStore::new(accounts);
        Self {
            reconciler: Arc::new(PaymentReconciler::new(accounts.clone())),
            licenses: LicenseRegistry::new(licenses),
            accounts,
            meter,
            codec,
            config,
        }
    }

    /// Process-local stores
    pub fn in_memory(codec: CredentialCodec, config: BillingConfig) -> Self {
        Self::new(
            Arc::new(MemoryAccountRepository::new()),
            Arc::new(MemoryLicenseRepository::new()),
            codec,
            config,
        )
    }

    /// Load licenses and demo users; existing entries are left alone
    pub fn seed(&self, data: &SeedData) -> Result<()> {
        for license in &data.licenses {
            if self.licenses.provision(license.clone())? {
                tracing::info!(license_key = %license.key, tier = %license.tier, "Seeded license");
            }
        }

        for user in &data.users {
            let account = match self.accounts.register(&user.email, &user.password, user.credits) {
                Ok(account) => account,
                Err(BillingError::AccountExists(_)) => continue,
                Err(e) => return Err(e),
            };
            if user.tier != Tier::Credits {
                self.accounts.set_tier(&account.identity, user.tier)?;
            }
            tracing::info!(identity = %account.identity, "Seeded demo account");
        }
        Ok(())
    }

    pub const fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub const fn licenses(&self) -> &LicenseRegistry {
        &self.licenses
    }

    pub const fn meter(&self) -> &UsageMeter {
        &self.meter
    }

    pub const fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    pub fn reconciler(&self) -> Arc<PaymentReconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn webhook_handler(&self) -> WebhookHandler {
        WebhookHandler::new(self.accounts.clone(), self.reconciler())
    }

    fn grant(&self, account: Account) -> Result<AuthGrant> {
        let issued = self.codec.issue(&account.identity)?;
        Ok(AuthGrant {
            token: issued.token,
            expires_at: issued.expires_at,
            account,
        })
    }

    /// Create a password account with the signup allowance
    pub fn register(&self, email: &str, password: &str) -> Result<AuthGrant> {
        let account = self.accounts.register(
            email,
            password,
            Balance::Limited(self.config.signup_credits),
        )?;
        self.grant(account)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthGrant> {
        let account = self.accounts.login(email, password)?;
        tracing::info!(identity = %account.identity, "Password login");
        self.grant(account)
    }

    /// Silent desktop sign-in.
    ///
    /// A machine with an activated license gets the license account back;
    /// otherwise it gets its own trial account.
    pub fn desktop_login(&self, machine_id: &str) -> Result<AuthGrant> {
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Err(BillingError::Invalid("machine_id must not be empty".into()));
        }

        if let Some(license) = self.licenses.lookup_by_machine(machine_id)? {
            let account = self.license_account(&license, machine_id)?;
            tracing::info!(identity = %account.identity, "Desktop re-auth via bound license");
            return self.grant(account);
        }

        let account = self.accounts.get_or_create_with(
            Account::new(
                Identity::desktop(machine_id),
                Balance::Limited(self.config.desktop_trial_credits),
                Tier::Credits,
            )
            .with_machine(machine_id),
        )?;
        self.grant(account)
    }

    /// Bind a license to a machine and sign in as its account
    pub fn activate_license(&self, key: &str, machine_id: &str) -> Result<LicenseGrant> {
        let activation = self.licenses.activate(key, machine_id)?;
        let account = self.license_account(&activation.license, machine_id.trim())?;

        Ok(LicenseGrant {
            grant: self.grant(account)?,
            license_key: activation.license.key.to_string(),
            first_activation: activation.first_activation,
        })
    }

    /// Account derived from a license; created with the license's allotment
    fn license_account(&self, license: &License, machine_id: &str) -> Result<Account> {
        self.accounts.get_or_create_with(
            Account::new(Identity::for_license(&license.key), license.credits, license.tier)
                .with_machine(machine_id),
        )
    }

    /// Verify a bearer token and load its account
    pub fn authenticate(&self, token: &str) -> Result<Account> {
        let identity = self.codec.verify(token)?;
        self.accounts.get(&identity)?.ok_or_else(|| {
            tracing::warn!(identity = %identity, "Valid token for unknown account");
            BillingError::Unauthorized("account no longer exists".into())
        })
    }

    /// Admit one request for `identity`
    pub fn authorize(&self, identity: &Identity, cost: u64) -> Result<Permit> {
        self.meter.authorize(identity, cost)
    }

    /// Create an unactivated license
    pub fn generate_license(&self, tier: Tier, credits: Balance) -> Result<License> {
        self.licenses.generate(tier, credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn billing() -> Billing {
        let codec = CredentialCodec::new(b"test-secret".to_vec(), Duration::days(30)).unwrap();
        let billing = Billing::in_memory(codec, BillingConfig::default());
        billing.seed(&SeedData::demo()).unwrap();
        billing
    }

    #[test]
    fn test_register_then_authenticate() {
        let billing = billing();
        let grant = billing.register("new@example.com", "long password").unwrap();
        assert_eq!(grant.account.credits, Balance::Limited(50));

        let account = billing.authenticate(&grant.token).unwrap();
        assert_eq!(account.identity.as_str(), "new@example.com");

        let again = billing.login("new@example.com", "long password").unwrap();
        assert_eq!(again.account.identity, account.identity);
    }

    #[test]
    fn test_seeded_demo_login() {
        let billing = billing();
        let grant = billing.login("demo@quill.app", "quill-demo").unwrap();
        assert_eq!(grant.account.credits, Balance::Limited(100));

        // Reseeding leaves state alone
        billing.seed(&SeedData::demo()).unwrap();
        assert_eq!(billing.licenses().count().unwrap(), 2);
    }

    #[test]
    fn test_license_activation_resolves_same_account() {
        let billing = billing();

        let first = billing.activate_license("QUILL-DEMO0-AAAAA-00001", "mac-1").unwrap();
        assert!(first.first_activation);
        assert_eq!(first.grant.account.credits, Balance::Limited(500));
        assert_eq!(first.grant.account.machine_id.as_deref(), Some("mac-1"));

        let permit = billing.authorize(&first.grant.account.identity, 1).unwrap();
        permit.settle().unwrap();

        let second = billing.activate_license("quill-demo0-aaaaa-00001", "mac-1").unwrap();
        assert!(!second.first_activation);
        assert_eq!(second.grant.account.identity, first.grant.account.identity);
        assert_eq!(second.grant.account.credits, Balance::Limited(499));

        assert!(matches!(
            billing.activate_license("QUILL-DEMO0-AAAAA-00001", "mac-2"),
            Err(BillingError::AlreadyBoundElsewhere { .. })
        ));
    }

    #[test]
    fn test_desktop_login_prefers_bound_license() {
        let billing = billing();

        let trial = billing.desktop_login("mac-9").unwrap();
        assert_eq!(trial.account.identity.as_str(), "desktop:mac-9");
        assert_eq!(trial.account.credits, Balance::Limited(25));

        billing.activate_license("QUILL-DEMO0-UNLTD-00002", "mac-9").unwrap();
        let relogin = billing.desktop_login("mac-9").unwrap();
        assert_eq!(
            relogin.account.identity.as_str(),
            "license:QUILL-DEMO0-UNLTD-00002"
        );
        assert_eq!(relogin.account.credits, Balance::Unlimited);
    }

    #[test]
    fn test_token_for_missing_account_unauthorized() {
        let billing = billing();
        let token = billing
            .codec()
            .issue(&Identity::new("ghost@example.com"))
            .unwrap()
            .token;
        assert!(matches!(
            billing.authenticate(&token),
            Err(BillingError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_generated_license_activates() {
        let billing = billing();
        let license = billing.generate_license(Tier::Pro, Balance::Limited(5_000)).unwrap();

        let grant = billing.activate_license(license.key.as_str(), "mac-3").unwrap();
        assert_eq!(grant.grant.account.tier, Tier::Pro);
    }
}
