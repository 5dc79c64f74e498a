//! Tenant Directory
//!
//! Point lookups against the platform store. Secrets come back as ciphertext
//! and are opened here; nothing is cached at this level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenancy_common::{
    Branding, DatabaseTarget, MailTarget, PlanTier, PlatformSettings, ResourceLimits, Subscription,
    SubscriptionStatus, TenancyError, TenancyResult, TenantConfig, TenantSlug,
};
use tenancy_vault::{CipherError, SecretCipher};

/// Target label used in errors and logs for the platform store
pub const PLATFORM_TARGET: &str = "platform";

const SELECT_ACTIVE_BY_SLUG: &str = r#"
    SELECT id, slug, name, is_active, logo_url, primary_color, features,
           db_host, db_port, db_name, db_user, db_password_enc,
           mail_host, mail_port, mail_user, mail_password_enc, mail_from,
           mail_gateway_url, mail_gateway_key_enc,
           plan, subscription_status, subscription_expires_at,
           max_users, max_records, max_storage_mb
      FROM tenants
     WHERE slug = $1 AND is_active = TRUE
"#;

/// Platform store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or connection failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Any other backend failure
    #[error("store error: {0}")]
    Backend(String),
}

/// Storage shape of a tenant, secrets still encrypted
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TenantRow {
    /// Platform primary key
    pub id: i64,
    /// Unique tenant slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// Soft-delete flag
    pub is_active: bool,
    /// Branding logo
    pub logo_url: Option<String>,
    /// Branding color
    pub primary_color: Option<String>,
    /// Enabled feature flags
    pub features: Vec<String>,
    /// Tenant database host
    pub db_host: String,
    /// Tenant database port
    pub db_port: i32,
    /// Tenant database name
    pub db_name: String,
    /// Tenant database user
    pub db_user: String,
    /// Encrypted database password
    pub db_password_enc: String,
    /// SMTP host
    pub mail_host: Option<String>,
    /// SMTP port
    pub mail_port: Option<i32>,
    /// SMTP user
    pub mail_user: Option<String>,
    /// Encrypted SMTP password
    pub mail_password_enc: Option<String>,
    /// Sender address
    pub mail_from: Option<String>,
    /// HTTP mail gateway endpoint
    pub mail_gateway_url: Option<String>,
    /// Encrypted gateway API key
    pub mail_gateway_key_enc: Option<String>,
    /// Plan tier
    pub plan: String,
    /// Subscription status
    pub subscription_status: String,
    /// Subscription expiry
    pub subscription_expires_at: Option<DateTime<Utc>>,
    /// User quota
    pub max_users: i32,
    /// Record quota
    pub max_records: i64,
    /// Storage quota in MiB
    pub max_storage_mb: i64,
}

impl TenantRow {
    /// Build the storage shape of a config, encrypting every secret.
    ///
    /// This is the provisioning direction; the directory only ever decodes.
    pub fn encode(config: &TenantConfig, cipher: &SecretCipher) -> Result<Self, CipherError> {
        let mail = &config.mail;
        let has_mail = !mail.host.is_empty() || mail.uses_gateway();
        Ok(Self {
            id: config.id,
            slug: config.slug.to_string(),
            name: config.name.clone(),
            is_active: config.is_active,
            logo_url: config.branding.logo_url.clone(),
            primary_color: Some(config.branding.primary_color.clone()),
            features: config.features.iter().cloned().collect(),
            db_host: config.database.host.clone(),
            db_port: i32::from(config.database.port),
            db_name: config.database.database.clone(),
            db_user: config.database.username.clone(),
            db_password_enc: cipher.encrypt(&config.database.password)?,
            mail_host: has_mail.then(|| mail.host.clone()),
            mail_port: has_mail.then(|| i32::from(mail.port)),
            mail_user: has_mail.then(|| mail.username.clone()),
            mail_password_enc: cipher.encrypt_optional(Some(mail.password.as_str()))?,
            mail_from: has_mail.then(|| mail.from_address.clone()),
            mail_gateway_url: mail.gateway_url.clone(),
            mail_gateway_key_enc: cipher.encrypt_optional(mail.gateway_api_key.as_deref())?,
            plan: config.subscription.plan.as_str().to_string(),
            subscription_status: config.subscription.status.as_str().to_string(),
            subscription_expires_at: config.subscription.expires_at,
            max_users: i32::try_from(config.limits.max_users).unwrap_or(i32::MAX),
            max_records: i64::try_from(config.limits.max_records).unwrap_or(i64::MAX),
            max_storage_mb: i64::try_from(config.limits.max_storage_mb).unwrap_or(i64::MAX),
        })
    }
}

/// Read path against the platform store
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fetch the active row for a slug
    async fn fetch_active(&self, slug: &TenantSlug) -> Result<Option<TenantRow>, StoreError>;
}

/// Postgres-backed platform store
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using platform settings
    pub async fn connect(settings: &PlatformSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.lookup_timeout())
            .connect(&settings.database_url)
            .await?;
        tracing::info!(max_connections = settings.max_connections, "connected to platform store");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn fetch_active(&self, slug: &TenantSlug) -> Result<Option<TenantRow>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(SELECT_ACTIVE_BY_SLUG)
            .bind(slug.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// In-memory platform store (for testing and development)
#[derive(Default)]
pub struct InMemoryTenantStore {
    rows: RwLock<HashMap<String, TenantRow>>,
    lookups: AtomicUsize,
    delay: RwLock<Option<Duration>>,
    hold: RwLock<Option<Duration>>,
}

impl InMemoryTenantStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn upsert(&self, row: TenantRow) {
        self.rows.write().insert(row.slug.clone(), row);
    }

    /// Remove a row
    pub fn remove(&self, slug: &str) -> Option<TenantRow> {
        self.rows.write().remove(slug)
    }

    /// Mutate a stored row in place
    pub fn update<F: FnOnce(&mut TenantRow)>(&self, slug: &str, f: F) -> bool {
        match self.rows.write().get_mut(slug) {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }

    /// Make every lookup sleep first
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Make every lookup read its row, then sleep before returning it
    pub fn set_hold(&self, hold: Option<Duration>) {
        *self.hold.write() = hold;
    }

    /// Number of lookups served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn fetch_active(&self, slug: &TenantSlug) -> Result<Option<TenantRow>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let row = self
            .rows
            .read()
            .get(slug.as_str())
            .filter(|row| row.is_active)
            .cloned();
        let hold = *self.hold.read();
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }
        Ok(row)
    }
}

/// Tenant directory: store lookup + secret decryption
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    cipher: SecretCipher,
    lookup_timeout: Duration,
}

impl TenantDirectory {
    /// Directory over `store`, bounding each lookup by `lookup_timeout`
    pub fn new(store: Arc<dyn TenantStore>, cipher: SecretCipher, lookup_timeout: Duration) -> Self {
        Self {
            store,
            cipher,
            lookup_timeout,
        }
    }

    /// Load the active config for a slug with secrets decrypted.
    pub async fn fetch_by_slug(&self, slug: &TenantSlug) -> TenancyResult<TenantConfig> {
        let lookup = tokio::time::timeout(self.lookup_timeout, self.store.fetch_active(slug)).await;
        let row = match lookup {
            Ok(Ok(Some(row))) => row,
            Ok(Ok(None)) => {
                tracing::debug!(slug = %slug, "no active tenant row");
                return Err(TenancyError::not_found(slug.as_str()));
            }
            Ok(Err(e)) => {
                tracing::warn!(slug = %slug, error = %e, "platform store lookup failed");
                return Err(TenancyError::unavailable(PLATFORM_TARGET, e));
            }
            Err(_) => {
                tracing::warn!(slug = %slug, timeout = ?self.lookup_timeout, "platform store lookup timed out");
                return Err(TenancyError::unavailable(
                    PLATFORM_TARGET,
                    format!("lookup timed out after {:?}", self.lookup_timeout),
                ));
            }
        };
        self.decode(slug, row)
    }

    fn decode(&self, slug: &TenantSlug, row: TenantRow) -> TenancyResult<TenantConfig> {
        let open = |field: &'static str, blob: Option<&str>| -> TenancyResult<Option<String>> {
            self.cipher.decrypt_optional(blob).map_err(|e| match e {
                CipherError::MasterKeyMissing => TenancyError::from(CipherError::MasterKeyMissing),
                other => {
                    tracing::error!(
                        slug = %slug,
                        field,
                        error = %other,
                        "secret decryption failed: corrupted row or master key mismatch"
                    );
                    TenancyError::SecretDecryption {
                        slug: slug.to_string(),
                        field,
                        detail: other.to_string(),
                    }
                }
            })
        };

        let db_password = open("db_password", Some(&row.db_password_enc))?.unwrap_or_default();
        let mail_password = open("mail_password", row.mail_password_enc.as_deref())?.unwrap_or_default();
        let gateway_api_key = open("mail_gateway_key", row.mail_gateway_key_enc.as_deref())?;

        let status = SubscriptionStatus::parse(&row.subscription_status).unwrap_or_else(|| {
            tracing::warn!(slug = %slug, status = %row.subscription_status, "unknown subscription status, treating as suspended");
            SubscriptionStatus::Suspended
        });

        let db_port = port(slug, "db_port", row.db_port)?;
        let mail_port = row.mail_port.map(|p| port(slug, "mail_port", p)).transpose()?.unwrap_or(0);

        Ok(TenantConfig {
            id: row.id,
            slug: slug.clone(),
            name: row.name,
            is_active: row.is_active,
            branding: Branding {
                logo_url: row.logo_url,
                primary_color: row.primary_color.unwrap_or_else(|| Branding::default().primary_color),
            },
            features: row.features.into_iter().collect(),
            database: DatabaseTarget {
                host: row.db_host,
                port: db_port,
                database: row.db_name,
                username: row.db_user,
                password: db_password,
            },
            mail: MailTarget {
                host: row.mail_host.unwrap_or_default(),
                port: mail_port,
                username: row.mail_user.unwrap_or_default(),
                password: mail_password,
                from_address: row.mail_from.unwrap_or_default(),
                gateway_url: row.mail_gateway_url,
                gateway_api_key,
            },
            subscription: Subscription {
                plan: PlanTier::parse(&row.plan),
                status,
                expires_at: row.subscription_expires_at,
            },
            limits: ResourceLimits {
                max_users: u32::try_from(row.max_users).unwrap_or(0),
                max_records: u64::try_from(row.max_records).unwrap_or(0),
                max_storage_mb: u64::try_from(row.max_storage_mb).unwrap_or(0),
            },
        })
    }
}

fn port(slug: &TenantSlug, field: &str, raw: i32) -> TenancyResult<u16> {
    u16::try_from(raw).map_err(|_| {
        TenancyError::InvalidConfig(format!("tenant {slug}: {field} {raw} is out of range"))
    })
}
