//! Tenant Data Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const REDACTED: &str = "<redacted>";

/// Maximum length of a DNS label, and therefore of a host-derived slug
pub const MAX_LABEL_LEN: usize = 63;

/// URL-safe identifier naming a tenant
///
/// Immutable once assigned; the primary lookup key for the directory, the
/// config cache and the logs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantSlug(String);

impl TenantSlug {
    /// Trim and wrap a caller-supplied identifier verbatim.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SlugError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(SlugError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Validate a DNS label as a slug: lowercase `[a-z0-9-]`, no leading or
    /// trailing hyphen, at most 63 bytes.
    pub fn parse_label(label: &str) -> Result<Self, SlugError> {
        if label.is_empty() {
            return Err(SlugError::Empty);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(SlugError::TooLong(label.len()));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(SlugError::InvalidLabel(label.to_string()));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(SlugError::InvalidLabel(label.to_string()));
        }
        Ok(Self(label.to_string()))
    }

    /// Borrow as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantSlug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantSlug> for String {
    fn from(slug: TenantSlug) -> Self {
        slug.0
    }
}

/// Slug validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlugError {
    /// Blank after trimming
    #[error("slug is empty")]
    Empty,
    /// Over 63 bytes
    #[error("slug is {0} bytes, longer than a DNS label")]
    TooLong(usize),
    /// Not a lowercase DNS label
    #[error("not a valid slug label: {0}")]
    InvalidLabel(String),
}

/// Full per-tenant record, with secrets decrypted
///
/// Plaintext secrets are skipped on serialization and redacted in `Debug`, so
/// a loaded config cannot be written back to storage or to logs in the clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    /// Numeric platform id
    pub id: i64,
    /// Lookup key
    pub slug: TenantSlug,
    /// Display name
    pub name: String,
    /// Row-level active flag
    pub is_active: bool,
    /// Branding
    #[serde(default)]
    pub branding: Branding,
    /// Enabled feature flags
    #[serde(default)]
    pub features: BTreeSet<String>,
    /// Tenant application database
    pub database: DatabaseTarget,
    /// Outbound mail
    #[serde(default)]
    pub mail: MailTarget,
    /// Subscription state
    pub subscription: Subscription,
    /// Limits enforced by other layers
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl TenantConfig {
    /// Check if a feature flag is enabled
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Connection target for a tenant database
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login role
    pub username: String,
    /// Decrypted password, never serialized
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Outbound mail credentials
///
/// Gateway mode sends through an HTTP mail API instead of SMTP.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailTarget {
    /// SMTP host
    pub host: String,
    /// SMTP port
    pub port: u16,
    /// SMTP user
    pub username: String,
    /// Decrypted SMTP password, never serialized
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Sender address
    pub from_address: String,
    /// HTTP mail gateway endpoint
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Decrypted gateway API key, never serialized
    #[serde(skip_serializing, default)]
    pub gateway_api_key: Option<String>,
}

impl MailTarget {
    /// Whether mail goes through an HTTP gateway rather than SMTP
    pub fn uses_gateway(&self) -> bool {
        self.gateway_url.is_some()
    }
}

impl fmt::Debug for MailTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("from_address", &self.from_address)
            .field("gateway_url", &self.gateway_url)
            .field("gateway_api_key", &self.gateway_api_key.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Subscription state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    /// Plan tier
    pub plan: PlanTier,
    /// Billing state
    pub status: SubscriptionStatus,
    /// End of the paid period, if bounded
    pub expires_at: Option<DateTime<Utc>>,
}

/// Plan tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier
    Free,
    /// Starter tier
    Starter,
    /// Professional tier
    Professional,
    /// Enterprise tier
    Enterprise,
}

impl PlanTier {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse the storage representation; unknown plans degrade to `Free`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starter" | "basic" => Self::Starter,
            "professional" | "pro" => Self::Professional,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Paid and current
    Active,
    /// Suspended by an operator
    Suspended,
    /// In trial
    Trial,
    /// Cancelled by the customer
    Cancelled,
}

impl SubscriptionStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Trial => "trial",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "trial" => Some(Self::Trial),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Resource limits, consumed by other layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// User quota
    pub max_users: u32,
    /// Record quota
    pub max_records: u64,
    /// Storage quota in MiB
    pub max_storage_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_users: 5,
            max_records: 10_000,
            max_storage_mb: 1024,
        }
    }
}

/// Branding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branding {
    /// Logo URL
    pub logo_url: Option<String>,
    /// Primary brand color
    pub primary_color: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            logo_url: None,
            primary_color: "#0066cc".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TenantConfig {
        TenantConfig {
            id: 7,
            slug: TenantSlug::new("acme").unwrap(),
            name: "Acme Corp".into(),
            is_active: true,
            branding: Branding::default(),
            features: ["documents".to_string()].into_iter().collect(),
            database: DatabaseTarget {
                host: "db.internal".into(),
                port: 5432,
                database: "acme".into(),
                username: "acme_app".into(),
                password: "hunter2".into(),
            },
            mail: MailTarget {
                password: "smtp-secret".into(),
                gateway_api_key: Some("gw-secret".into()),
                ..MailTarget::default()
            },
            subscription: Subscription {
                plan: PlanTier::Professional,
                status: SubscriptionStatus::Active,
                expires_at: None,
            },
            limits: ResourceLimits::default(),
        }
    }

    #[test]
    fn test_slug_trims_header_values() {
        assert_eq!(TenantSlug::new("  acme \t").unwrap().as_str(), "acme");
        assert_eq!(TenantSlug::new("   "), Err(SlugError::Empty));
    }

    #[test]
    fn test_slug_label_rules() {
        assert!(TenantSlug::parse_label("acme-2").is_ok());
        assert!(TenantSlug::parse_label("-acme").is_err());
        assert!(TenantSlug::parse_label("Acme").is_err());
        assert!(TenantSlug::parse_label("ac_me").is_err());
        assert_eq!(
            TenantSlug::parse_label(&"a".repeat(64)),
            Err(SlugError::TooLong(64))
        );
    }

    #[test]
    fn test_secrets_never_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("smtp-secret"));
        assert!(!json.contains("gw-secret"));
        assert!(json.contains("db.internal"));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("gw-secret"));
        assert!(debug.contains(REDACTED));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(SubscriptionStatus::parse("Trial"), Some(SubscriptionStatus::Trial));
        assert_eq!(SubscriptionStatus::parse("canceled"), Some(SubscriptionStatus::Cancelled));
        assert_eq!(SubscriptionStatus::parse("bogus"), None);
        assert_eq!(PlanTier::parse("pro"), PlanTier::Professional);
        assert!(sample().has_feature("documents"));
    }
}
