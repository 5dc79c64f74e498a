//! Activity gate
//!
//! Re-evaluated on every request; the config is cached, the verdict is not.

use chrono::{DateTime, Utc};
use tenancy_common::{InactiveReason, SubscriptionStatus, TenancyError, TenantConfig};

/// Verdict for `config` at `now`
pub fn check_at(config: &TenantConfig, now: DateTime<Utc>) -> Result<(), InactiveReason> {
    if !config.is_active {
        return Err(InactiveReason::Disabled);
    }
    match config.subscription.status {
        SubscriptionStatus::Suspended => return Err(InactiveReason::Suspended),
        SubscriptionStatus::Cancelled => return Err(InactiveReason::Cancelled),
        SubscriptionStatus::Active | SubscriptionStatus::Trial => {}
    }
    match config.subscription.expires_at {
        Some(expires_at) if expires_at <= now => Err(InactiveReason::Expired),
        _ => Ok(()),
    }
}

/// Verdict for `config` now
pub fn check(config: &TenantConfig) -> Result<(), InactiveReason> {
    check_at(config, Utc::now())
}

/// Whether `config` may be served at `now`
pub fn is_active_at(config: &TenantConfig, now: DateTime<Utc>) -> bool {
    check_at(config, now).is_ok()
}

/// Whether `config` may be served now
pub fn is_active(config: &TenantConfig) -> bool {
    is_active_at(config, Utc::now())
}

/// Gate a config, mapping a rejection to [`TenancyError::TenantInactive`]
pub fn ensure_active(config: &TenantConfig) -> Result<(), TenancyError> {
    check(config).map_err(|reason| {
        tracing::info!(slug = %config.slug, %reason, "tenant refused by activity gate");
        TenancyError::TenantInactive {
            slug: config.slug.to_string(),
            reason,
        }
    })
}
