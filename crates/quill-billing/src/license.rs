//! License Registry
//!
//! Offline license keys, each bindable to exactly one machine. Activation is
//! the only state transition (`activated: false → true`, once) and runs under
//! the license's own lock so two machines racing for the same key cannot both
//! win.

use chrono::{DateTime, Utc};
use rand::{Rng, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::account::{Balance, Tier};
use crate::error::{BillingError, Result, poisoned};

/// Fixed first group of every key
pub const PRODUCT_TAG: &str = "QUILL";

const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GROUP_LEN: usize = 5;
const RANDOM_GROUPS: usize = 3;
const MAX_GENERATE_ATTEMPTS: usize = 8;

/// License key (formatted: QUILL-XXXXX-XXXXX-XXXXX)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Generate a new license key.
    ///
    /// Each random group draws 5 symbols from a 36-symbol alphabet with the OS
    /// CSPRNG (~25.8 bits per group, ~77.5 bits per key).
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let mut key = String::with_capacity(PRODUCT_TAG.len() + RANDOM_GROUPS * (GROUP_LEN + 1));
        key.push_str(PRODUCT_TAG);

        for _ in 0..RANDOM_GROUPS {
            key.push('-');
            for _ in 0..GROUP_LEN {
                let idx = rng.gen_range(0..KEY_ALPHABET.len());
                key.push(char::from(KEY_ALPHABET[idx]));
            }
        }

        Self(key)
    }

    /// Parse from user input (trimmed, uppercased)
    pub fn from_string(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_uppercase())
    }

    /// Whether the key has the `QUILL-XXXXX-XXXXX-XXXXX` shape
    pub fn is_well_formed(&self) -> bool {
        let groups: Vec<&str> = self.0.split('-').collect();
        groups.len() == RANDOM_GROUPS + 1
            && groups[0] == PRODUCT_TAG
            && groups[1..].iter().all(|g| {
                g.len() == GROUP_LEN && g.bytes().all(|b| KEY_ALPHABET.contains(&b))
            })
    }

    /// Get the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A license record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct License {
    /// License key
    pub key: LicenseKey,

    /// Tier granted to the license account
    pub tier: Tier,

    /// Credits granted to the license account
    pub credits: Balance,

    /// Machine the license is bound to (set on first activation)
    pub machine_id: Option<String>,

    /// Whether license has been activated
    pub activated: bool,

    /// First activation timestamp
    pub activated_at: Option<DateTime<Utc>>,

    /// Purchase (creation) timestamp
    pub purchased_at: DateTime<Utc>,
}

impl License {
    /// Create an unactivated license
    pub fn new(key: LicenseKey, tier: Tier, credits: Balance) -> Self {
        Self {
            key,
            tier,
            credits,
            machine_id: None,
            activated: false,
            activated_at: None,
            purchased_at: Utc::now(),
        }
    }

    /// Bind to `machine_id`. Returns `true` on first activation, `false` when
    /// already bound to the same machine.
    fn bind(&mut self, machine_id: &str) -> Result<bool> {
        if self.activated {
            return if self.machine_id.as_deref() == Some(machine_id) {
                Ok(false)
            } else {
                Err(BillingError::AlreadyBoundElsewhere {
                    key: self.key.to_string(),
                })
            };
        }

        self.machine_id = Some(machine_id.to_string());
        self.activated = true;
        self.activated_at = Some(Utc::now());
        Ok(true)
    }
}

/// Outcome of a successful activation
#[derive(Clone, Debug)]
pub struct ActivationResult {
    pub license: License,

    /// `false` for a repeat activation from the bound machine
    pub first_activation: bool,
}

/// License storage trait
pub trait LicenseRepository: Send + Sync {
    /// Insert a new license; `false` if the key already exists
    fn insert(&self, license: License) -> Result<bool>;

    /// Get license by key
    fn get(&self, key: &LicenseKey) -> Result<Option<License>>;

    /// Mutate a license under its lock; `Ok(None)` when the key is unknown.
    /// Changes are persisted only when the closure returns `Ok`.
    fn update(
        &self,
        key: &LicenseKey,
        f: &mut dyn FnMut(&mut License) -> Result<()>,
    ) -> Result<Option<License>>;

    /// Activated license bound to `machine_id`, most recent activation first
    fn find_by_machine(&self, machine_id: &str) -> Result<Option<License>>;

    /// Number of stored licenses
    fn count(&self) -> Result<usize>;
}

/// In-memory license store with one mutex per license
#[derive(Default)]
pub struct MemoryLicenseRepository {
    licenses: RwLock<HashMap<LicenseKey, Arc<Mutex<License>>>>,
}

impl MemoryLicenseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LicenseRepository for MemoryLicenseRepository {
    fn insert(&self, license: License) -> Result<bool> {
        let mut licenses = self.licenses.write().map_err(poisoned)?;
        if licenses.contains_key(&license.key) {
            return Ok(false);
        }
        licenses.insert(license.key.clone(), Arc::new(Mutex::new(license)));
        Ok(true)
    }

    fn get(&self, key: &LicenseKey) -> Result<Option<License>> {
        let slot = self.licenses.read().map_err(poisoned)?.get(key).cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn update(
        &self,
        key: &LicenseKey,
        f: &mut dyn FnMut(&mut License) -> Result<()>,
    ) -> Result<Option<License>> {
        let Some(slot) = self.licenses.read().map_err(poisoned)?.get(key).cloned() else {
            return Ok(None);
        };

        let mut guard = slot.lock().map_err(poisoned)?;
        let mut draft = guard.clone();
        f(&mut draft)?;
        *guard = draft;
        Ok(Some(guard.clone()))
    }

    fn find_by_machine(&self, machine_id: &str) -> Result<Option<License>> {
        let slots: Vec<_> = self.licenses.read().map_err(poisoned)?.values().cloned().collect();

        let mut found: Option<License> = None;
        for slot in slots {
            let license = slot.lock().map_err(poisoned)?;
            if license.activated && license.machine_id.as_deref() == Some(machine_id) {
                let newer = found
                    .as_ref()
                    .is_none_or(|f| license.activated_at > f.activated_at);
                if newer {
                    found = Some(license.clone());
                }
            }
        }
        Ok(found)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.licenses.read().map_err(poisoned)?.len())
    }
}

/// License operations
#[derive(Clone)]
pub struct LicenseRegistry {
    repo: Arc<dyn LicenseRepository>,
}

impl LicenseRegistry {
    pub fn new(repo: Arc<dyn LicenseRepository>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLicenseRepository::new()))
    }

    /// Activate `key` on `machine_id`.
    ///
    /// Idempotent for the bound machine; `AlreadyBoundElsewhere` for any other.
    pub fn activate(&self, key: &str, machine_id: &str) -> Result<ActivationResult> {
        let key = LicenseKey::from_string(key);
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Err(BillingError::Invalid("machine_id must not be empty".into()));
        }
        if !key.is_well_formed() {
            return Err(BillingError::UnknownLicense(key.to_string()));
        }

        let mut first_activation = false;
        let license = self
            .repo
            .update(&key, &mut |license| {
                first_activation = license.bind(machine_id)?;
                Ok(())
            })
            .inspect_err(|e| {
                if matches!(e, BillingError::AlreadyBoundElsewhere { .. }) {
                    tracing::warn!(license_key = %key, machine_id = %machine_id, "Activation from second machine rejected");
                }
            })?
            .ok_or_else(|| BillingError::UnknownLicense(key.to_string()))?;

        if first_activation {
            tracing::info!(license_key = %license.key, machine_id = %machine_id, "Activated license");
        }

        Ok(ActivationResult {
            license,
            first_activation,
        })
    }

    /// Activated license bound to `machine_id`, if any
    pub fn lookup_by_machine(&self, machine_id: &str) -> Result<Option<License>> {
        self.repo.find_by_machine(machine_id.trim())
    }

    /// Create a new unactivated license with a fresh key
    pub fn generate(&self, tier: Tier, credits: Balance) -> Result<License> {
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let license = License::new(LicenseKey::generate(), tier, credits);
            if self.repo.insert(license.clone())? {
                tracing::info!(license_key = %license.key, tier = %tier, credits = %credits, "Generated license");
                return Ok(license);
            }
            tracing::warn!("License key collision, regenerating");
        }
        Err(BillingError::Storage("could not allocate a unique license key".into()))
    }

    /// Store a pre-provisioned license (seeding, imports)
    pub fn provision(&self, license: License) -> Result<bool> {
        if !license.key.is_well_formed() {
            return Err(BillingError::Invalid(format!("malformed license key {}", license.key)));
        }
        self.repo.insert(license)
    }

    pub fn get(&self, key: &str) -> Result<Option<License>> {
        self.repo.get(&LicenseKey::from_string(key))
    }

    pub fn count(&self) -> Result<usize> {
        self.repo.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry_with(key: &str) -> LicenseRegistry {
        let registry = LicenseRegistry::in_memory();
        registry
            .provision(License::new(
                LicenseKey::from_string(key),
                Tier::Credits,
                Balance::Limited(500),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_license_key_generation() {
        let key = LicenseKey::generate();
        assert_eq!(key.as_str().len(), 23); // QUILL-XXXXX-XXXXX-XXXXX
        assert!(key.as_str().starts_with("QUILL-"));
        assert!(key.is_well_formed());
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let keys: HashSet<_> = (0..2_000).map(|_| LicenseKey::generate()).collect();
        assert_eq!(keys.len(), 2_000);
    }

    #[test]
    fn test_key_normalization() {
        let key = LicenseKey::from_string("  quill-aaaaa-bbbbb-ccccc ");
        assert_eq!(key.as_str(), "QUILL-AAAAA-BBBBB-CCCCC");
        assert!(key.is_well_formed());
        assert!(!LicenseKey::from_string("TABU-AAAA-BBBB-CCCC").is_well_formed());
    }

    #[test]
    fn test_activation_lifecycle() {
        let registry = registry_with("QUILL-AAAAA-BBBBB-CCCCC");

        let first = registry.activate("QUILL-AAAAA-BBBBB-CCCCC", "mac-1").unwrap();
        assert!(first.first_activation);
        assert!(first.license.activated);
        assert_eq!(first.license.machine_id.as_deref(), Some("mac-1"));

        let again = registry.activate("quill-aaaaa-bbbbb-ccccc", "mac-1").unwrap();
        assert!(!again.first_activation);
        assert_eq!(again.license.activated_at, first.license.activated_at);

        let err = registry.activate("QUILL-AAAAA-BBBBB-CCCCC", "mac-2").unwrap_err();
        assert!(matches!(err, BillingError::AlreadyBoundElsewhere { .. }));

        let stored = registry.get("QUILL-AAAAA-BBBBB-CCCCC").unwrap().unwrap();
        assert_eq!(stored.machine_id.as_deref(), Some("mac-1"));
    }

    #[test]
    fn test_unknown_license() {
        let registry = LicenseRegistry::in_memory();
        assert!(matches!(
            registry.activate("QUILL-ZZZZZ-ZZZZZ-ZZZZZ", "mac-1"),
            Err(BillingError::UnknownLicense(_))
        ));
    }

    #[test]
    fn test_malformed_keys_rejected() {
        let registry = LicenseRegistry::in_memory();
        assert!(matches!(
            registry.activate("TABU-AAAA-BBBB-CCCC", "mac-1"),
            Err(BillingError::UnknownLicense(_))
        ));

        let bogus = License::new(LicenseKey::from_string("QUILL-short"), Tier::Credits, Balance::Limited(1));
        assert!(matches!(registry.provision(bogus), Err(BillingError::Invalid(_))));
        assert_eq!(registry.count().unwrap(), 0);
    }

    #[test]
    fn test_lookup_by_machine() {
        let registry = registry_with("QUILL-AAAAA-BBBBB-CCCCC");
        assert!(registry.lookup_by_machine("mac-1").unwrap().is_none());

        registry.activate("QUILL-AAAAA-BBBBB-CCCCC", "mac-1").unwrap();
        let found = registry.lookup_by_machine("mac-1").unwrap().unwrap();
        assert_eq!(found.key.as_str(), "QUILL-AAAAA-BBBBB-CCCCC");
        assert!(registry.lookup_by_machine("mac-2").unwrap().is_none());
    }

    #[test]
    fn test_generate_creates_unactivated() {
        let registry = LicenseRegistry::in_memory();
        let license = registry.generate(Tier::Pro, Balance::Limited(5_000)).unwrap();

        assert!(!license.activated);
        assert!(license.machine_id.is_none());
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_activation_single_winner() {
        let registry = registry_with("QUILL-AAAAA-BBBBB-CCCCC");

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = registry.clone();
                    s.spawn(move || registry.activate("QUILL-AAAAA-BBBBB-CCCCC", &format!("mac-{i}")))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| {
            matches!(e, BillingError::AlreadyBoundElsewhere { .. })
        }));
    }
}
