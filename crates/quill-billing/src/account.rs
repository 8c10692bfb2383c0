//! Account Store
//!
//! Identity → account record (credit balance, tier). Every mutation runs under
//! the record's own lock through [`AccountRepository::update`], so concurrent
//! handlers never interleave a read-modify-write on the same account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{BillingError, Result, poisoned};
use crate::license::LicenseKey;
use crate::password;

/// Wire value of an unlimited balance
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Account identity (email, `desktop:<machine>` or `license:<key>`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Normalized email identity
    pub fn email(email: &str) -> Result<Self> {
        let email = email.trim().to_lowercase();
        let valid = email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            return Err(BillingError::Invalid(format!("not an email address: {email}")));
        }
        Ok(Self(email))
    }

    /// Identity of the account behind a license; stable across logins
    pub fn for_license(key: &LicenseKey) -> Self {
        Self(format!("license:{key}"))
    }

    /// Auto-provisioned identity of a desktop install
    pub fn desktop(machine_id: &str) -> Self {
        Self(format!("desktop:{}", machine_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription tiers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Pay-per-request against the credit balance
    #[default]
    Credits,
    Starter,
    Pro,
    Unlimited,
}

impl Tier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credits => "credits",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Unlimited => "unlimited",
        }
    }

    /// Only the `credits` tier is charged per request
    pub const fn is_metered(self) -> bool {
        matches!(self, Self::Credits)
    }

    /// Balance granted by each monthly subscription cycle
    pub const fn monthly_allotment(self) -> Option<Balance> {
        match self {
            Self::Credits => None,
            Self::Starter => Some(Balance::Limited(1_000)),
            Self::Pro => Some(Balance::Limited(5_000)),
            Self::Unlimited => Some(Balance::Unlimited),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "credits" => Ok(Self::Credits),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "unlimited" => Ok(Self::Unlimited),
            other => Err(BillingError::Invalid(format!("unknown tier: {other}"))),
        }
    }
}

/// Credit balance. Serialized as an integer with `-1` meaning unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Balance {
    Limited(u64),
    Unlimited,
}

impl Balance {
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Remove `units`, flooring at zero; unlimited is untouched
    #[must_use]
    pub const fn debit(self, units: u64) -> Self {
        match self {
            Self::Limited(n) => Self::Limited(n.saturating_sub(units)),
            Self::Unlimited => Self::Unlimited,
        }
    }

    /// Add `units`; unlimited is untouched
    #[must_use]
    pub const fn top_up(self, units: u64) -> Self {
        match self {
            Self::Limited(n) => Self::Limited(n.saturating_add(units)),
            Self::Unlimited => Self::Unlimited,
        }
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::Limited(0)
    }
}

impl TryFrom<i64> for Balance {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            UNLIMITED_SENTINEL => Ok(Self::Unlimited),
            n if n >= 0 => Ok(Self::Limited(n.unsigned_abs())),
            n => Err(format!("negative credit balance: {n}")),
        }
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        match balance {
            Balance::Unlimited => UNLIMITED_SENTINEL,
            Balance::Limited(n) => Self::try_from(n).unwrap_or(Self::MAX),
        }
    }
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// An account record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub identity: Identity,

    /// Credit balance
    pub credits: Balance,

    pub tier: Tier,

    /// Machine binding (license-derived and desktop accounts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    /// Stripe subscription feeding this account's monthly allotment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,

    /// Argon2 PHC string for password accounts
    #[serde(skip)]
    pub(crate) password_hash: Option<String>,

    /// Units held by in-flight requests
    #[serde(skip)]
    pub(crate) reserved: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(identity: Identity, credits: Balance, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            identity,
            credits,
            tier,
            machine_id: None,
            subscription_id: None,
            password_hash: None,
            reserved: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    /// Balance not already held by in-flight requests
    pub const fn available(&self) -> Balance {
        match self.credits {
            Balance::Limited(n) => Balance::Limited(n.saturating_sub(self.reserved)),
            Balance::Unlimited => Balance::Unlimited,
        }
    }

    /// Units currently held by in-flight requests
    pub const fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Account storage trait
///
/// `update` is the only mutation path for existing records: implementations
/// must run the closure while holding an exclusive per-identity lock and only
/// persist the result when the closure returns `Ok`.
pub trait AccountRepository: Send + Sync {
    /// Get account by identity
    fn get(&self, identity: &Identity) -> Result<Option<Account>>;

    /// Insert `account` unless its identity exists. Returns the stored record
    /// and whether it was created.
    fn get_or_insert(&self, account: Account) -> Result<(Account, bool)>;

    /// Mutate a record under its lock. `Ok(None)` when the identity is unknown.
    fn update(
        &self,
        identity: &Identity,
        f: &mut dyn FnMut(&mut Account) -> Result<()>,
    ) -> Result<Option<Account>>;

    /// Get account by Stripe subscription ID
    fn find_by_subscription(&self, subscription_id: &str) -> Result<Option<Account>>;

    /// Number of stored accounts
    fn count(&self) -> Result<usize>;
}

/// In-memory account repository with one mutex per account
#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: RwLock<HashMap<Identity, Arc<Mutex<Account>>>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &Identity) -> Result<Option<Arc<Mutex<Account>>>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(identity).cloned())
    }
}

impl AccountRepository for MemoryAccountRepository {
    fn get(&self, identity: &Identity) -> Result<Option<Account>> {
        match self.slot(identity)? {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn get_or_insert(&self, account: Account) -> Result<(Account, bool)> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        if let Some(existing) = accounts.get(&account.identity) {
            let existing = existing.lock().map_err(poisoned)?.clone();
            return Ok((existing, false));
        }

        accounts.insert(account.identity.clone(), Arc::new(Mutex::new(account.clone())));
        Ok((account, true))
    }

    fn update(
        &self,
        identity: &Identity,
        f: &mut dyn FnMut(&mut Account) -> Result<()>,
    ) -> Result<Option<Account>> {
        let Some(slot) = self.slot(identity)? else {
            return Ok(None);
        };

        let mut guard = slot.lock().map_err(poisoned)?;
        let mut draft = guard.clone();
        f(&mut draft)?;
        draft.touch();
        *guard = draft;
        Ok(Some(guard.clone()))
    }

    fn find_by_subscription(&self, subscription_id: &str) -> Result<Option<Account>> {
        let slots: Vec<_> = self.accounts.read().map_err(poisoned)?.values().cloned().collect();

        for slot in slots {
            let account = slot.lock().map_err(poisoned)?;
            if account.subscription_id.as_deref() == Some(subscription_id) {
                return Ok(Some(account.clone()));
            }
        }
        Ok(None)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.accounts.read().map_err(poisoned)?.len())
    }
}

/// Account operations used by authentication and reconciliation
#[derive(Clone)]
pub struct AccountStore {
    repo: Arc<dyn AccountRepository>,
}

impl AccountStore {
    pub fn new(repo: Arc<dyn AccountRepository>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAccountRepository::new()))
    }

    pub(crate) fn repository(&self) -> Arc<dyn AccountRepository> {
        Arc::clone(&self.repo)
    }

    pub fn get(&self, identity: &Identity) -> Result<Option<Account>> {
        self.repo.get(identity)
    }

    /// Get an account or fail with `UnknownIdentity`
    pub fn require(&self, identity: &Identity) -> Result<Account> {
        self.repo
            .get(identity)?
            .ok_or_else(|| BillingError::UnknownIdentity(identity.to_string()))
    }

    /// Return the existing account or create it with the given initial state
    pub fn get_or_create(&self, identity: Identity, initial: Balance, tier: Tier) -> Result<Account> {
        self.get_or_create_with(Account::new(identity, initial, tier))
    }

    /// Like [`Self::get_or_create`] with a fully prepared template record
    pub fn get_or_create_with(&self, template: Account) -> Result<Account> {
        let (account, created) = self.repo.get_or_insert(template)?;
        if created {
            tracing::info!(
                identity = %account.identity,
                credits = %account.credits,
                tier = %account.tier,
                "Created account"
            );
        }
        Ok(account)
    }

    /// Password registration
    pub fn register(&self, email: &str, password: &str, initial: Balance) -> Result<Account> {
        let identity = Identity::email(email)?;
        let hash = password::hash_password(password)?;

        let mut template = Account::new(identity.clone(), initial, Tier::Credits);
        template.password_hash = Some(hash);

        let (account, created) = self.repo.get_or_insert(template)?;
        if !created {
            return Err(BillingError::AccountExists(identity.to_string()));
        }

        tracing::info!(identity = %account.identity, credits = %account.credits, "Registered account");
        Ok(account)
    }

    /// Password login
    pub fn login(&self, email: &str, password: &str) -> Result<Account> {
        let identity = Identity::email(email).map_err(|_| BillingError::InvalidCredentials)?;
        let account = self.repo.get(&identity)?.ok_or(BillingError::InvalidCredentials)?;

        match account.password_hash.as_deref() {
            Some(hash) if password::verify_password(password, hash) => Ok(account),
            _ => Err(BillingError::InvalidCredentials),
        }
    }

    /// Mutate an existing account or fail with `UnknownIdentity`
    fn mutate(
        &self,
        identity: &Identity,
        f: &mut dyn FnMut(&mut Account) -> Result<()>,
    ) -> Result<Account> {
        self.repo
            .update(identity, f)?
            .ok_or_else(|| BillingError::UnknownIdentity(identity.to_string()))
    }

    /// One-time top-up: adds to the existing balance
    pub fn credit(&self, identity: &Identity, units: u64) -> Result<Account> {
        self.mutate(identity, &mut |account| {
            account.credits = account.credits.top_up(units);
            Ok(())
        })
    }

    /// Monthly refresh: replaces the balance
    pub fn refresh_allotment(&self, identity: &Identity, allotment: Balance) -> Result<Account> {
        self.mutate(identity, &mut |account| {
            account.credits = allotment;
            Ok(())
        })
    }

    pub fn set_tier(&self, identity: &Identity, tier: Tier) -> Result<Account> {
        self.mutate(identity, &mut |account| {
            account.tier = tier;
            Ok(())
        })
    }

    /// Apply a subscription plan atomically: tier plus optional allotment
    pub fn apply_subscription(
        &self,
        identity: &Identity,
        plan: Tier,
        allotment: Option<Balance>,
        subscription_id: Option<&str>,
    ) -> Result<Account> {
        self.mutate(identity, &mut |account| {
            account.tier = plan;
            match allotment {
                Some(Balance::Limited(0)) | None => {}
                Some(balance) => account.credits = balance,
            }
            if let Some(id) = subscription_id {
                account.subscription_id = Some(id.to_string());
            }
            Ok(())
        })
    }

    /// Drop back to pay-per-request after a subscription ends.
    ///
    /// What is left of a limited allotment stays on the account as ordinary
    /// credits: that month was paid for. An unlimited balance has no such
    /// remainder and drops to zero.
    pub fn cancel_subscription(&self, identity: &Identity) -> Result<Account> {
        self.mutate(identity, &mut |account| {
            account.tier = Tier::Credits;
            account.subscription_id = None;
            if account.credits.is_unlimited() {
                account.credits = Balance::Limited(0);
            }
            Ok(())
        })
    }

    pub fn find_by_subscription(&self, subscription_id: &str) -> Result<Option<Account>> {
        self.repo.find_by_subscription(subscription_id)
    }

    pub fn count(&self) -> Result<usize> {
        self.repo.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(identity: &str, credits: Balance, tier: Tier) -> (AccountStore, Identity) {
        let store = AccountStore::in_memory();
        let identity = Identity::new(identity);
        store.get_or_create(identity.clone(), credits, tier).unwrap();
        (store, identity)
    }

    #[test]
    fn test_balance_wire_format() {
        assert_eq!(serde_json::to_string(&Balance::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Balance::Limited(42)).unwrap(), "42");
        assert_eq!(serde_json::from_str::<Balance>("-1").unwrap(), Balance::Unlimited);
        assert!(serde_json::from_str::<Balance>("-5").is_err());
    }

    #[test]
    fn test_unlimited_never_decremented() {
        assert_eq!(Balance::Unlimited.debit(10), Balance::Unlimited);
        assert_eq!(Balance::Limited(3).debit(10), Balance::Limited(0));
    }

    #[test]
    fn test_get_or_create_keeps_existing() {
        let (store, identity) = store_with("a@example.com", Balance::Limited(10), Tier::Credits);

        let again = store
            .get_or_create(identity, Balance::Limited(999), Tier::Pro)
            .unwrap();
        assert_eq!(again.credits, Balance::Limited(10));
        assert_eq!(again.tier, Tier::Credits);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_credit_adds_refresh_replaces() {
        let (store, identity) = store_with("a@example.com", Balance::Limited(50), Tier::Credits);

        let account = store.credit(&identity, 150).unwrap();
        assert_eq!(account.credits, Balance::Limited(200));

        let account = store.refresh_allotment(&identity, Balance::Limited(5_000)).unwrap();
        assert_eq!(account.credits, Balance::Limited(5_000));
    }

    #[test]
    fn test_mutating_unknown_identity() {
        let store = AccountStore::in_memory();
        let err = store.credit(&Identity::new("ghost"), 10).unwrap_err();
        assert!(matches!(err, BillingError::UnknownIdentity(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_failed_update_is_not_persisted() {
        let repo = MemoryAccountRepository::new();
        let identity = Identity::new("a@example.com");
        repo.get_or_insert(Account::new(identity.clone(), Balance::Limited(5), Tier::Credits))
            .unwrap();

        let result = repo.update(&identity, &mut |account| {
            account.credits = Balance::Limited(0);
            Err(BillingError::Invalid("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(repo.get(&identity).unwrap().unwrap().credits, Balance::Limited(5));
    }

    #[test]
    fn test_register_and_login() {
        let store = AccountStore::in_memory();
        let account = store
            .register("Writer@Example.com", "correct horse", Balance::Limited(50))
            .unwrap();
        assert_eq!(account.identity.as_str(), "writer@example.com");
        assert!(account.has_password());

        assert!(store.login("writer@example.com", "correct horse").is_ok());
        assert!(matches!(
            store.login("writer@example.com", "wrong password"),
            Err(BillingError::InvalidCredentials)
        ));
        assert!(matches!(
            store.register("writer@example.com", "another pass", Balance::Limited(50)),
            Err(BillingError::AccountExists(_))
        ));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let store = AccountStore::in_memory();
        let account = store
            .register("a@example.com", "long enough", Balance::Limited(1))
            .unwrap();
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn test_subscription_lifecycle() {
        let (store, identity) = store_with("a@example.com", Balance::Limited(7), Tier::Credits);

        let account = store
            .apply_subscription(&identity, Tier::Unlimited, Some(Balance::Unlimited), Some("sub_1"))
            .unwrap();
        assert_eq!(account.credits, Balance::Unlimited);
        assert_eq!(
            store.find_by_subscription("sub_1").unwrap().unwrap().identity,
            identity
        );

        let account = store.cancel_subscription(&identity).unwrap();
        assert_eq!(account.tier, Tier::Credits);
        assert_eq!(account.credits, Balance::Limited(0));
        assert!(store.find_by_subscription("sub_1").unwrap().is_none());
    }

    #[test]
    fn test_cancellation_keeps_paid_remainder() {
        let (store, identity) = store_with("b@example.com", Balance::Limited(0), Tier::Credits);
        store
            .apply_subscription(&identity, Tier::Pro, Some(Balance::Limited(5_000)), Some("sub_2"))
            .unwrap();
        store
            .mutate(&identity, &mut |account| {
                account.credits = account.credits.debit(4_200);
                Ok(())
            })
            .unwrap();

        let account = store.cancel_subscription(&identity).unwrap();
        assert_eq!(account.tier, Tier::Credits);
        assert_eq!(account.credits, Balance::Limited(800));
        assert!(account.tier.is_metered());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Pro".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("team".parse::<Tier>().is_err());
        assert_eq!(Tier::Pro.monthly_allotment(), Some(Balance::Limited(5_000)));
    }
}
