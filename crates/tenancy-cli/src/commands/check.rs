//! End-to-end tenant check against the live platform store

use crate::output::OutputFormat;
use anyhow::Context;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tenancy_common::{Settings, TenantConfig, TenantSlug};
use tenancy_router::{PgConnector, PgTenantStore, TenantRouter};

/// What `check` reports. Never carries secrets.
#[derive(Debug, Serialize)]
struct TenantSummary {
    slug: String,
    name: String,
    plan: &'static str,
    status: &'static str,
    expires_at: Option<String>,
    features: Vec<String>,
    mail: &'static str,
    target: String,
    fallback: bool,
}

impl TenantSummary {
    fn new(config: &TenantConfig, target: String, fallback: bool) -> Self {
        let mail = if config.mail.uses_gateway() {
            "gateway"
        } else if config.mail.host.is_empty() {
            "none"
        } else {
            "smtp"
        };
        Self {
            slug: config.slug.to_string(),
            name: config.name.clone(),
            plan: config.subscription.plan.as_str(),
            status: config.subscription.status.as_str(),
            expires_at: config.subscription.expires_at.map(|t| t.to_rfc3339()),
            features: config.features.iter().cloned().collect(),
            mail,
            target,
            fallback,
        }
    }
}

impl fmt::Display for TenantSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tenant:   {} ({})", self.slug, self.name)?;
        writeln!(f, "plan:     {} / {}", self.plan, self.status)?;
        if let Some(expires_at) = &self.expires_at {
            writeln!(f, "expires:  {expires_at}")?;
        }
        writeln!(f, "features: {}", self.features.join(", "))?;
        writeln!(f, "mail:     {}", self.mail)?;
        write!(f, "database: {} (connected)", self.target)?;
        if self.fallback {
            write!(f, "\nnote:     served from development fallback")?;
        }
        Ok(())
    }
}

pub async fn handle(settings: &Settings, slug: &str, format: OutputFormat) -> anyhow::Result<()> {
    let slug = TenantSlug::new(slug).context("invalid tenant slug")?;

    let store = PgTenantStore::connect(&settings.platform)
        .await
        .context("connecting to platform store")?;
    let router = TenantRouter::from_settings(
        settings,
        Arc::new(store),
        PgConnector::from_settings(&settings.pool),
    )?;

    let result = router.load(&slug).await;
    router.pool().shutdown().await;
    let routed = result?;

    format.print(&TenantSummary::new(
        &routed.config,
        routed.target.to_string(),
        routed.fallback,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tenancy_common::{
        Branding, DatabaseTarget, MailTarget, PlanTier, ResourceLimits, Subscription,
        SubscriptionStatus,
    };

    fn config() -> TenantConfig {
        TenantConfig {
            id: 1,
            slug: TenantSlug::new("acme").unwrap(),
            name: "Acme".into(),
            is_active: true,
            branding: Branding::default(),
            features: BTreeSet::from(["billing".to_string()]),
            database: DatabaseTarget {
                host: "db.internal".into(),
                port: 5432,
                database: "tenant_acme".into(),
                username: "acme".into(),
                password: "do-not-print".into(),
            },
            mail: MailTarget {
                password: "also-secret".into(),
                ..MailTarget::default()
            },
            subscription: Subscription {
                plan: PlanTier::Enterprise,
                status: SubscriptionStatus::Trial,
                expires_at: None,
            },
            limits: ResourceLimits::default(),
        }
    }

    #[test]
    fn test_summary_has_no_secrets() {
        let summary = TenantSummary::new(&config(), "db.internal:5432/tenant_acme".into(), false);
        let text = OutputFormat::Text.render(&summary).unwrap();
        let json = OutputFormat::Json.render(&summary).unwrap();

        for out in [&text, &json] {
            assert!(!out.contains("do-not-print"));
            assert!(!out.contains("also-secret"));
        }
        assert!(text.contains("enterprise / trial"));
        assert_eq!(summary.mail, "none");
    }
}
