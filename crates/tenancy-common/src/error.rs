//! Error taxonomy for tenant routing

use std::fmt;
use thiserror::Error;

/// Why the activity gate refused a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactiveReason {
    /// The tenant row's active flag is cleared
    Disabled,
    /// Subscription status is `suspended`
    Suspended,
    /// Subscription status is `cancelled`
    Cancelled,
    /// Subscription expiry lies in the past
    Expired,
}

impl fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Tenancy error type
///
/// Every variant is scoped to the single tenant being resolved. The type is
/// `Clone` so one coalesced directory load can report the same failure to all
/// of its waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    /// No active platform row for this slug
    #[error("tenant not found: {slug}")]
    TenantNotFound {
        /// Requested slug
        slug: String,
    },

    /// Row exists but the activity gate rejected it
    #[error("tenant {slug} is inactive: {reason}")]
    TenantInactive {
        /// Requested slug
        slug: String,
        /// Gate verdict
        reason: InactiveReason,
    },

    /// A stored secret failed authenticated decryption
    #[error("failed to decrypt {field} for tenant {slug}: {detail}")]
    SecretDecryption {
        /// Requested slug
        slug: String,
        /// Column that failed
        field: &'static str,
        /// Cipher failure description
        detail: String,
    },

    /// Network/auth failure or timeout reaching a database
    #[error("{target} unavailable: {reason}")]
    ConnectionUnavailable {
        /// `platform` or the tenant connection target
        target: String,
        /// Driver or timeout description
        reason: String,
    },

    /// Master secret absent
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Settings could not be parsed or are inconsistent
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl TenancyError {
    /// Shorthand for [`TenancyError::TenantNotFound`]
    pub fn not_found(slug: impl Into<String>) -> Self {
        Self::TenantNotFound { slug: slug.into() }
    }

    /// Shorthand for [`TenancyError::ConnectionUnavailable`]
    pub fn unavailable(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ConnectionUnavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a caller-side retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }
}

/// Result type for tenancy operations
pub type TenancyResult<T> = Result<T, TenancyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TenancyError::TenantInactive {
            slug: "acme".into(),
            reason: InactiveReason::Suspended,
        };
        assert_eq!(err.to_string(), "tenant acme is inactive: suspended");

        let err = TenancyError::unavailable("db.internal:5432/acme", "timed out");
        assert_eq!(err.to_string(), "db.internal:5432/acme unavailable: timed out");
        assert!(err.is_retryable());
        assert!(!TenancyError::not_found("acme").is_retryable());
    }
}
