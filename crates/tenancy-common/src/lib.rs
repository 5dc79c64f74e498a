//! Tenancy Common - shared types for tenant-aware database routing
//!
//! This crate provides the pieces every other tenancy crate agrees on:
//! - The tenant data model ([`TenantConfig`], [`TenantSlug`])
//! - The error taxonomy ([`TenancyError`])
//! - Process settings loaded from TOML + environment ([`Settings`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod settings;

pub use error::{InactiveReason, TenancyError, TenancyResult};
pub use model::{
    Branding, DatabaseTarget, MailTarget, PlanTier, ResourceLimits, SlugError, Subscription,
    SubscriptionStatus, TenantConfig, TenantSlug,
};
pub use settings::{
    CacheSettings, DeploymentModeSetting, Environment, PlatformSettings, PoolSettings,
    ResolverSettings, Settings, SharedDatabaseSettings,
};
