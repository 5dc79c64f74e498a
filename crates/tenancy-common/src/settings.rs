//! Process settings
//!
//! Loaded from a TOML file, then overridden from the environment so secrets
//! can be provisioned without touching the file.

use crate::error::{TenancyError, TenancyResult};
use crate::model::TenantConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Master secret
pub const ENV_MASTER_KEY: &str = "TENANCY_MASTER_KEY";
/// Platform store URL
pub const ENV_PLATFORM_DATABASE_URL: &str = "TENANCY_PLATFORM_DATABASE_URL";
/// `development` or `production`
pub const ENV_ENVIRONMENT: &str = "TENANCY_ENVIRONMENT";

/// Root settings document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deployment environment
    pub environment: Environment,
    /// Operator-supplied master secret for the secret cipher
    #[serde(skip_serializing)]
    pub master_key: Option<String>,
    /// Platform store
    pub platform: PlatformSettings,
    /// Tenant config cache
    pub cache: CacheSettings,
    /// Tenant resolver
    pub resolver: ResolverSettings,
    /// Connection pool manager
    pub pool: PoolSettings,
    /// Configuration served for unknown tenants in development only
    pub dev_fallback: Option<TenantConfig>,
}

impl Settings {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let settings = Self::from_toml_str(&content)?.with_env_overrides(|k| std::env::var(k).ok());
        tracing::debug!(path = %path.display(), environment = ?settings.environment, "settings loaded");
        Ok(settings)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> TenancyResult<Self> {
        toml::from_str(content).map_err(|e| TenancyError::InvalidConfig(e.to_string()))
    }

    /// Overlay values from an environment lookup
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_MASTER_KEY).filter(|v| !v.is_empty()) {
            self.master_key = Some(key);
        }
        if let Some(url) = lookup(ENV_PLATFORM_DATABASE_URL).filter(|v| !v.is_empty()) {
            self.platform.database_url = url;
        }
        match lookup(ENV_ENVIRONMENT).as_deref().map(str::trim) {
            Some("development") | Some("dev") => self.environment = Environment::Development,
            Some("production") | Some("prod") => self.environment = Environment::Production,
            Some(other) => tracing::warn!(value = other, "ignoring unknown {ENV_ENVIRONMENT}"),
            None => {}
        }
        self
    }

    /// Startup validation
    pub fn validate(&self) -> TenancyResult<()> {
        if self.master_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(TenancyError::ConfigurationMissing(format!(
                "master key not set (config `master_key` or {ENV_MASTER_KEY})"
            )));
        }
        if self.pool.mode == DeploymentModeSetting::Shared && self.pool.shared.is_none() {
            return Err(TenancyError::InvalidConfig(
                "pool.mode = \"shared\" requires a [pool.shared] section".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(TenancyError::InvalidConfig("cache.ttl_secs must be positive".into()));
        }
        let durations = [
            ("pool.sweep_interval_secs", self.pool.sweep_interval_secs),
            ("pool.connect_timeout_secs", self.pool.connect_timeout_secs),
            ("platform.lookup_timeout_secs", self.platform.lookup_timeout_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(TenancyError::InvalidConfig(format!("{name} must be positive")));
        }
        Ok(())
    }

    /// The development fallback, honored only outside production
    pub fn effective_fallback(&self) -> Option<&TenantConfig> {
        match self.environment {
            Environment::Development => self.dev_fallback.as_ref(),
            Environment::Production => None,
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development; enables the fallback tenant
    Development,
    /// Production
    #[default]
    Production,
}

/// Platform store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Platform database URL
    #[serde(skip_serializing)]
    pub database_url: String,
    /// Bound on one tenant lookup
    pub lookup_timeout_secs: u64,
    /// Platform pool size
    pub max_connections: u32,
}

impl PlatformSettings {
    /// Lookup bound as a duration
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/platform".into(),
            lookup_timeout_secs: 3,
            max_connections: 10,
        }
    }
}

/// Tenant config cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry time-to-live
    pub ttl_secs: u64,
    /// Maximum cached tenants
    pub max_capacity: u64,
}

impl CacheSettings {
    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_capacity: 10_000,
        }
    }
}

/// Tenant resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Header carrying an explicit tenant slug
    pub header: String,
    /// Platform root domain, e.g. `platform.example.com`
    pub root_domain: Option<String>,
    /// Leftmost labels that never name a tenant
    pub reserved_labels: Vec<String>,
    /// Loopback/development hosts whose subdomains name tenants
    pub dev_hosts: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            header: "x-tenant-slug".into(),
            root_domain: None,
            reserved_labels: ["www", "api", "admin", "app", "static", "media", "mail", "cdn", "platform"]
                .into_iter()
                .map(String::from)
                .collect(),
            dev_hosts: ["localhost", "127.0.0.1", "::1"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// How tenant databases are laid out
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentModeSetting {
    /// One database per tenant, one pooled connection per target
    #[default]
    PerTenant,
    /// Every tenant shares a single database
    Shared,
}

/// Connection pool manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Shared or per-tenant databases
    pub mode: DeploymentModeSetting,
    /// Close handles unused this long
    pub idle_timeout_secs: u64,
    /// Idle sweep period
    pub sweep_interval_secs: u64,
    /// Bound on connect and on the liveness probe
    pub connect_timeout_secs: u64,
    /// Connections per tenant target
    pub max_connections_per_target: u32,
    /// Target for shared mode
    pub shared: Option<SharedDatabaseSettings>,
}

impl PoolSettings {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep period as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Connect bound as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            mode: DeploymentModeSetting::PerTenant,
            idle_timeout_secs: 600,
            sweep_interval_secs: 120,
            connect_timeout_secs: 5,
            max_connections_per_target: 5,
            shared: None,
        }
    }
}

/// The single database used in shared mode
#[derive(Clone, Serialize, Deserialize)]
pub struct SharedDatabaseSettings {
    /// Database host
    pub host: String,
    /// Database port
    #[serde(default = "default_pg_port")]
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login role
    pub username: String,
    /// Password
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl std::fmt::Debug for SharedDatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn default_pg_port() -> u16 {
    5432
}
