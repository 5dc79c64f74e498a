//! Tenant router
//!
//! Composes resolver, config cache, activity gate and pool manager into the
//! per-request path, plus the invalidation hooks admin edits call.

use crate::cache::TenantConfigCache;
use crate::directory::{TenantDirectory, TenantStore};
use crate::gate;
use crate::pool::{ConnectionPoolManager, Connector, PoolConfig};
use crate::resolver::{Resolution, TenantRequest, TenantResolver};
use crate::target::{ConnectionTargetKey, DeploymentMode};
use std::fmt;
use std::sync::Arc;
use tenancy_common::{Settings, TenancyError, TenancyResult, TenantConfig, TenantSlug};
use tenancy_vault::SecretCipher;
use tokio::task::JoinHandle;

/// A request routed to its tenant
pub struct RoutedTenant<H> {
    /// Slug the config was requested under
    pub slug: TenantSlug,
    /// Loaded config, secrets decrypted
    pub config: Arc<TenantConfig>,
    /// Pool key the handle was acquired for
    pub target: ConnectionTargetKey,
    /// Live database handle
    pub handle: Arc<H>,
    /// Served from the development fallback
    pub fallback: bool,
}

impl<H> fmt::Debug for RoutedTenant<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedTenant")
            .field("slug", &self.slug)
            .field("target", &self.target)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

/// Per-request tenant routing
pub struct TenantRouter<C: Connector> {
    resolver: TenantResolver,
    cache: TenantConfigCache,
    mode: DeploymentMode,
    pool: Arc<ConnectionPoolManager<C>>,
    fallback: Option<Arc<TenantConfig>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<C: Connector> TenantRouter<C> {
    /// Assemble a router from already-built parts.
    ///
    /// No idle sweep runs for a router built this way; call
    /// [`ConnectionPoolManager::spawn_sweeper`] on the pool if one is wanted.
    pub fn new(
        resolver: TenantResolver,
        cache: TenantConfigCache,
        mode: DeploymentMode,
        pool: Arc<ConnectionPoolManager<C>>,
        fallback: Option<TenantConfig>,
    ) -> Self {
        Self {
            resolver,
            cache,
            mode,
            pool,
            fallback: fallback.map(Arc::new),
            sweeper: None,
        }
    }

    /// Build the full stack from settings.
    ///
    /// Fails fast when the master key is missing or does not round-trip, or
    /// when the settings are inconsistent. When called inside a Tokio runtime
    /// the pool's idle sweep is started and runs until the router is dropped.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn TenantStore>,
        connector: C,
    ) -> TenancyResult<Self> {
        settings.validate()?;

        let cipher = SecretCipher::from_settings(settings);
        cipher.ensure_configured()?;

        let directory = Arc::new(TenantDirectory::new(
            store,
            cipher,
            settings.platform.lookup_timeout(),
        ));
        let cache = TenantConfigCache::new(directory, &settings.cache);
        let mode = DeploymentMode::from_settings(&settings.pool)?;
        let pool = Arc::new(ConnectionPoolManager::new(
            connector,
            PoolConfig::from(&settings.pool),
        ));

        let fallback = settings.effective_fallback().cloned();
        if let Some(fallback) = &fallback {
            tracing::warn!(slug = %fallback.slug, "development fallback tenant enabled");
        }

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(pool.spawn_sweeper()),
            Err(_) => {
                tracing::warn!("no async runtime, idle connection sweep not started");
                None
            }
        };

        tracing::info!(
            environment = ?settings.environment,
            mode = ?settings.pool.mode,
            cache_ttl = ?settings.cache.ttl(),
            sweep_interval = ?settings.pool.sweep_interval(),
            "tenant router ready"
        );
        let mut router = Self::new(
            TenantResolver::new(&settings.resolver),
            cache,
            mode,
            pool,
            fallback,
        );
        router.sweeper = sweeper;
        Ok(router)
    }

    /// Route a request. `Ok(None)` means the request names no tenant.
    pub async fn route<R>(&self, request: &R) -> TenancyResult<Option<RoutedTenant<C::Handle>>>
    where
        R: TenantRequest + ?Sized,
    {
        match self.resolver.resolve(request) {
            Resolution::FromHeader(slug) | Resolution::FromHost(slug) => {
                self.load(&slug).await.map(Some)
            }
            Resolution::None => Ok(None),
        }
    }

    /// Config, gate and connection for a known slug
    pub async fn load(&self, slug: &TenantSlug) -> TenancyResult<RoutedTenant<C::Handle>> {
        let (config, fallback) = match self.cache.get(slug).await {
            Ok(config) => (config, false),
            Err(err @ TenancyError::TenantNotFound { .. }) => match &self.fallback {
                Some(config) => {
                    tracing::debug!(slug = %slug, fallback = %config.slug, "unknown tenant served from development fallback");
                    (Arc::clone(config), true)
                }
                None => return Err(err),
            },
            Err(e) => return Err(e),
        };

        gate::ensure_active(&config)?;

        let target = self.mode.derive(&config);
        let handle = self.pool.acquire(&target).await?;
        Ok(RoutedTenant {
            slug: slug.clone(),
            config,
            target: target.key,
            handle,
            fallback,
        })
    }

    /// Admin edit hook: drop the cached config and, when the connection
    /// target moved, the pooled connection to the old target.
    ///
    /// The old connection stays open while another cached tenant still maps
    /// to it; the idle sweep reclaims it once nobody does.
    pub async fn tenant_changed(&self, slug: &TenantSlug, target_changed: bool) {
        let previous = self.cache.peek(slug).await;
        self.cache.invalidate(Some(slug)).await;

        if !target_changed {
            return;
        }
        match previous {
            Some(entry) => {
                let old = self.mode.derive(&entry.config).key;
                if old.is_shared() {
                    return;
                }
                let still_used = self
                    .cache
                    .configs()
                    .iter()
                    .any(|config| config.slug != *slug && self.mode.derive(config).key == old);
                if still_used {
                    tracing::info!(slug = %slug, target = %old, "old target shared with other tenants, left to idle sweep");
                    return;
                }
                self.pool.evict(&old).await;
                tracing::info!(slug = %slug, target = %old, "tenant connection target changed");
            }
            None => {
                tracing::debug!(slug = %slug, "target changed for uncached tenant, idle sweep will reclaim");
            }
        }
    }

    /// Drop every cached config
    pub async fn invalidate_all(&self) {
        self.cache.invalidate(None).await;
    }

    /// Request-to-slug resolver
    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Tenant config cache
    pub fn cache(&self) -> &TenantConfigCache {
        &self.cache
    }

    /// Connection pool manager
    pub fn pool(&self) -> &Arc<ConnectionPoolManager<C>> {
        &self.pool
    }

    /// Shared or per-tenant target derivation
    pub fn mode(&self) -> &DeploymentMode {
        &self.mode
    }
}

impl<C: Connector> Drop for TenantRouter<C> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::{sample_config, MASTER};
    use crate::directory::{InMemoryTenantStore, TenantRow};
    use crate::pool::ConnectError;
    use crate::target::ConnectParams;
    use async_trait::async_trait;
    use std::time::Duration;
    use tenancy_common::{Environment, InactiveReason, SubscriptionStatus};

    /// Hands back its connect parameters as the handle
    struct EchoConnector;

    #[async_trait]
    impl Connector for EchoConnector {
        type Handle = ConnectParams;

        async fn connect(&self, params: &ConnectParams) -> Result<ConnectParams, ConnectError> {
            Ok(params.clone())
        }

        async fn probe(&self, _handle: &ConnectParams) -> Result<(), ConnectError> {
            Ok(())
        }

        async fn close(&self, _handle: &ConnectParams) {}
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.master_key = Some(MASTER.into());
        settings.resolver.root_domain = Some("platform.example.com".into());
        settings
    }

    fn store_with(slugs: &[&str]) -> Arc<InMemoryTenantStore> {
        let store = Arc::new(InMemoryTenantStore::new());
        let cipher = SecretCipher::new(Some(MASTER));
        for slug in slugs {
            store.upsert(TenantRow::encode(&sample_config(slug), &cipher).unwrap());
        }
        store
    }

    fn router(settings: &Settings, store: Arc<InMemoryTenantStore>) -> TenantRouter<EchoConnector> {
        TenantRouter::from_settings(settings, store, EchoConnector).unwrap()
    }

    fn slug(s: &str) -> TenantSlug {
        TenantSlug::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_load_returns_handle_for_tenant_target() {
        let router = router(&settings(), store_with(&["acme"]));
        let routed = router.load(&slug("acme")).await.unwrap();

        assert_eq!(routed.target.to_string(), "db.internal:5432/tenant_acme");
        assert_eq!(routed.handle.password, "acme-db-pw");
        assert!(!routed.fallback);
    }

    #[tokio::test]
    async fn test_missing_master_key_refuses_to_start() {
        let mut settings = settings();
        settings.master_key = None;
        let result = TenantRouter::from_settings(&settings, store_with(&[]), EchoConnector);
        assert!(matches!(result, Err(TenancyError::ConfigurationMissing(_))));
    }

    #[tokio::test]
    async fn test_inactive_tenant_never_reaches_pool() {
        let store = store_with(&["acme"]);
        store.update("acme", |row| {
            row.subscription_status = SubscriptionStatus::Suspended.as_str().into()
        });
        let router = router(&settings(), store);

        let err = router.load(&slug("acme")).await.unwrap_err();
        assert_eq!(
            err,
            TenancyError::TenantInactive {
                slug: "acme".into(),
                reason: InactiveReason::Suspended,
            }
        );
        assert_eq!(router.pool().stats().live, 0);
    }

    #[tokio::test]
    async fn test_fallback_only_in_development() {
        let mut settings = settings();
        settings.dev_fallback = Some(sample_config("demo"));

        let prod = router(&settings, store_with(&[]));
        assert_eq!(
            prod.load(&slug("ghost")).await.unwrap_err(),
            TenancyError::not_found("ghost")
        );

        settings.environment = Environment::Development;
        let dev = router(&settings, store_with(&[]));
        let routed = dev.load(&slug("ghost")).await.unwrap();
        assert!(routed.fallback);
        assert_eq!(routed.slug.as_str(), "ghost");
        assert_eq!(routed.config.slug.as_str(), "demo");
    }

    #[tokio::test]
    async fn test_tenant_changed_evicts_old_target() {
        let store = store_with(&["acme"]);
        let router = router(&settings(), store.clone());
        let before = router.load(&slug("acme")).await.unwrap();

        store.update("acme", |row| row.db_host = "db-2.internal".into());
        router.tenant_changed(&slug("acme"), true).await;

        assert!(!router.pool().contains(&before.target));
        let after = router.load(&slug("acme")).await.unwrap();
        assert_eq!(after.target.to_string(), "db-2.internal:5432/tenant_acme");
        assert_eq!(router.pool().stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_tenant_changed_keeps_target_other_tenants_use() {
        let store = store_with(&["acme", "globex"]);
        store.update("globex", |row| row.db_name = "tenant_acme".into());
        let router = router(&settings(), store.clone());

        let acme = router.load(&slug("acme")).await.unwrap();
        let globex = router.load(&slug("globex")).await.unwrap();
        assert!(Arc::ptr_eq(&acme.handle, &globex.handle));

        store.update("acme", |row| row.db_host = "db-2.internal".into());
        router.tenant_changed(&slug("acme"), true).await;

        assert!(router.pool().contains(&globex.target));
        assert_eq!(router.pool().stats().evicted, 0);
        let again = router.load(&slug("globex")).await.unwrap();
        assert!(Arc::ptr_eq(&globex.handle, &again.handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_sweeps_idle_connections() {
        let mut settings = settings();
        settings.pool.idle_timeout_secs = 120;
        settings.pool.sweep_interval_secs = 60;
        let router = router(&settings, store_with(&["acme"]));

        let routed = router.load(&slug("acme")).await.unwrap();
        assert!(router.pool().contains(&routed.target));

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(!router.pool().contains(&routed.target));
        assert_eq!(router.pool().stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_tenant_changed_without_target_move_keeps_connection() {
        let store = store_with(&["acme"]);
        let router = router(&settings(), store.clone());
        let before = router.load(&slug("acme")).await.unwrap();

        store.update("acme", |row| row.name = "Acme Renamed".into());
        router.tenant_changed(&slug("acme"), false).await;

        let after = router.load(&slug("acme")).await.unwrap();
        assert_eq!(after.config.name, "Acme Renamed");
        assert!(Arc::ptr_eq(&before.handle, &after.handle));
    }
}
