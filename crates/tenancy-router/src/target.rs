//! Connection target derivation
//!
//! Pure mapping from a tenant config to the pool key and the parameters
//! needed to open a connection. Kept apart from the pool so routing rules can
//! be tested without any I/O.

use std::fmt;
use tenancy_common::{
    DeploymentModeSetting, PoolSettings, SharedDatabaseSettings, TenancyError, TenancyResult,
    TenantConfig,
};

/// Pool key
///
/// Collapses to one value in shared mode, one per `(host, port, database)` in
/// per-tenant mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionTargetKey {
    /// The single shared-mode database
    Shared,
    /// A per-tenant database
    Dedicated {
        /// Database host
        host: String,
        /// Database port
        port: u16,
        /// Database name
        database: String,
    },
}

impl ConnectionTargetKey {
    /// Whether this is the shared-mode key
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared)
    }
}

impl fmt::Display for ConnectionTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Dedicated { host, port, database } => write!(f, "{host}:{port}/{database}"),
        }
    }
}

/// Connection-establishment parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login role
    pub username: String,
    /// Decrypted password
    pub password: String,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl From<&SharedDatabaseSettings> for ConnectParams {
    fn from(s: &SharedDatabaseSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            database: s.database.clone(),
            username: s.username.clone(),
            password: s.password.clone(),
        }
    }
}

/// A derived target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Pool key
    pub key: ConnectionTargetKey,
    /// How to open a connection to it
    pub params: ConnectParams,
}

/// Database layout of the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Each tenant config names its own database
    DatabasePerTenant,
    /// Every tenant uses this one database
    SharedDatabase(ConnectParams),
}

impl DeploymentMode {
    /// Mode from `[pool]` settings; shared mode needs `[pool.shared]`
    pub fn from_settings(settings: &PoolSettings) -> TenancyResult<Self> {
        match settings.mode {
            DeploymentModeSetting::PerTenant => Ok(Self::DatabasePerTenant),
            DeploymentModeSetting::Shared => settings
                .shared
                .as_ref()
                .map(|shared| Self::SharedDatabase(shared.into()))
                .ok_or_else(|| {
                    TenancyError::InvalidConfig("shared mode without [pool.shared]".into())
                }),
        }
    }

    /// Pool key and connect parameters for a tenant
    pub fn derive(&self, config: &TenantConfig) -> Target {
        match self {
            Self::SharedDatabase(params) => Target {
                key: ConnectionTargetKey::Shared,
                params: params.clone(),
            },
            Self::DatabasePerTenant => {
                let db = &config.database;
                let host = db.host.trim().to_ascii_lowercase();
                Target {
                    key: ConnectionTargetKey::Dedicated {
                        host: host.clone(),
                        port: db.port,
                        database: db.database.clone(),
                    },
                    params: ConnectParams {
                        host,
                        port: db.port,
                        database: db.database.clone(),
                        username: db.username.clone(),
                        password: db.password.clone(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::sample_config;

    fn shared() -> ConnectParams {
        ConnectParams {
            host: "shared-db".into(),
            port: 5432,
            database: "app".into(),
            username: "app".into(),
            password: "s3cret-pw".into(),
        }
    }

    #[test]
    fn test_per_tenant_keys_differ() {
        let mode = DeploymentMode::DatabasePerTenant;
        let a = mode.derive(&sample_config("acme"));
        let b = mode.derive(&sample_config("globex"));

        assert_ne!(a.key, b.key);
        assert_eq!(a.key.to_string(), "db.internal:5432/tenant_acme");
        assert_eq!(a.params.password, "acme-db-pw");
    }

    #[test]
    fn test_same_target_same_key() {
        let mode = DeploymentMode::DatabasePerTenant;
        let mut other = sample_config("acme");
        other.database.host = "DB.Internal ".into();
        other.slug = tenancy_common::TenantSlug::new("acme-eu").unwrap();
        assert_eq!(mode.derive(&sample_config("acme")).key, mode.derive(&other).key);
    }

    #[test]
    fn test_shared_mode_collapses_keys() {
        let mode = DeploymentMode::SharedDatabase(shared());
        let a = mode.derive(&sample_config("acme"));
        let b = mode.derive(&sample_config("globex"));

        assert_eq!(a.key, ConnectionTargetKey::Shared);
        assert_eq!(a, b);
        assert_eq!(a.params, shared());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = PoolSettings::default();
        assert_eq!(
            DeploymentMode::from_settings(&settings).unwrap(),
            DeploymentMode::DatabasePerTenant
        );
        settings.mode = DeploymentModeSetting::Shared;
        assert!(DeploymentMode::from_settings(&settings).is_err());
    }

    #[test]
    fn test_params_debug_hides_password() {
        assert!(!format!("{:?}", shared()).contains("s3cret"));
    }
}
