//! Server configuration from the environment

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use quill_core::assistant::DEFAULT_MODEL;

/// Deployment environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => bail!("unknown QUILL_ENV `{other}`"),
        }
    }
}

/// Which completion provider to run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    Echo,
    Ollama,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Echo => "echo",
            Self::Ollama => "ollama",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "echo" => Ok(Self::Echo),
            "ollama" => Ok(Self::Ollama),
            other => bail!("unknown QUILL_PROVIDER `{other}`"),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub environment: Environment,

    /// HMAC key for bearer tokens; random per process when unset
    pub token_secret: Option<String>,
    pub token_ttl_days: i64,

    pub provider: ProviderKind,
    pub default_model: String,
    /// Models a client may name per request. Every request costs the same, so
    /// this never grows past what the flat price covers.
    pub allowed_models: Vec<String>,
    pub provider_timeout: Duration,

    pub signup_credits: u64,
    pub desktop_trial_credits: u64,

    /// Bearer for admin endpoints; admin routes refuse everything when unset
    pub admin_token: Option<String>,
    pub seed_demo: bool,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| -> anyhow::Result<Option<u64>> {
            var(key)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{key} must be an integer")))
                .transpose()
        };

        let environment = var("QUILL_ENV")
            .map(|v| v.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Development);

        let provider = match var("QUILL_PROVIDER") {
            Some(v) => v.parse()?,
            None if var("ANTHROPIC_API_KEY").is_some() => ProviderKind::Anthropic,
            None => ProviderKind::Echo,
        };

        let token_ttl_days = i64::try_from(parsed("QUILL_TOKEN_TTL_DAYS")?.unwrap_or(30))
            .context("QUILL_TOKEN_TTL_DAYS out of range")?;

        let default_model = var("QUILL_DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        let allowed_models = match var("QUILL_ALLOWED_MODELS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
            None => vec![default_model.clone()],
        };
        if !allowed_models.contains(&default_model) {
            bail!("QUILL_ALLOWED_MODELS must include the default model `{default_model}`");
        }

        let seed_demo = match var("QUILL_SEED_DEMO") {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            None => environment != Environment::Production,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            environment,
            token_secret: var("QUILL_TOKEN_SECRET"),
            token_ttl_days,
            provider,
            default_model,
            allowed_models,
            provider_timeout: Duration::from_secs(parsed("QUILL_PROVIDER_TIMEOUT_SECS")?.unwrap_or(60)),
            signup_credits: parsed("QUILL_SIGNUP_CREDITS")?.unwrap_or(50),
            desktop_trial_credits: parsed("QUILL_DESKTOP_TRIAL_CREDITS")?.unwrap_or(25),
            admin_token: var("QUILL_ADMIN_TOKEN"),
            seed_demo,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("environment", &self.environment)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_days", &self.token_ttl_days)
            .field("provider", &self.provider)
            .field("default_model", &self.default_model)
            .field("allowed_models", &self.allowed_models)
            .field("provider_timeout", &self.provider_timeout)
            .field("signup_credits", &self.signup_credits)
            .field("desktop_trial_credits", &self.desktop_trial_credits)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("seed_demo", &self.seed_demo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.provider, ProviderKind::Echo);
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.provider_timeout, Duration::from_secs(60));
        assert_eq!(config.signup_credits, 50);
        assert!(config.seed_demo);
        assert!(!config.is_production());
    }

    #[test]
    fn test_allowed_models() {
        let defaults = config(&[]).unwrap();
        assert_eq!(defaults.allowed_models, vec![DEFAULT_MODEL.to_string()]);

        let listed = config(&[(
            "QUILL_ALLOWED_MODELS",
            "claude-3-5-haiku-20241022, claude-3-haiku-20240307",
        )])
        .unwrap();
        assert_eq!(listed.allowed_models.len(), 2);

        assert!(config(&[("QUILL_ALLOWED_MODELS", "claude-3-haiku-20240307")]).is_err());
    }

    #[test]
    fn test_api_key_selects_anthropic() {
        let config = config(&[("ANTHROPIC_API_KEY", "sk-ant-test")]).unwrap();
        assert_eq!(config.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn test_production_disables_demo_seed() {
        let config = config(&[("QUILL_ENV", "production")]).unwrap();
        assert!(config.is_production());
        assert!(!config.seed_demo);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[("QUILL_SIGNUP_CREDITS", "lots")]).is_err());
        assert!(config(&[("QUILL_PROVIDER", "gpt")]).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config(&[("QUILL_TOKEN_SECRET", "s3cret"), ("QUILL_ADMIN_TOKEN", "adm1n")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("adm1n"));
    }
}
