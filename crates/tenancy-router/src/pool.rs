//! Connection pool manager
//!
//! One live handle per [`ConnectionTargetKey`], created lazily, probed before
//! it is shared, and closed by a background sweep once idle.
//!
//! ```text
//! acquire(target)
//!   → slot exists and is ready          → touch, return handle
//!   → slot exists, another caller is connecting → wait for that attempt's
//!     outcome, success or failure
//!   → no slot → insert slot, connect + probe (bounded) → publish outcome,
//!     remove slot on failure
//! ```

use crate::target::{ConnectParams, ConnectionTargetKey, Target};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tenancy_common::{PoolSettings, TenancyError, TenancyResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Failure opening or probing a connection
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

impl From<sqlx::Error> for ConnectError {
    fn from(err: sqlx::Error) -> Self {
        Self(err.to_string())
    }
}

/// Opens, probes and closes database handles - injected for testability
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Live handle shared by every request for one target
    type Handle: Send + Sync + 'static;

    /// Open a handle. May defer network I/O to `probe`.
    async fn connect(&self, params: &ConnectParams) -> Result<Self::Handle, ConnectError>;

    /// Minimal round-trip proving the handle works
    async fn probe(&self, handle: &Self::Handle) -> Result<(), ConnectError>;

    /// Release the handle's resources
    async fn close(&self, handle: &Self::Handle);
}

/// Postgres connector: each target gets a small `sqlx` pool
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    /// Connector opening pools of at most `max_connections`, waiting up to
    /// `acquire_timeout` for a free connection
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            max_connections,
            acquire_timeout,
        }
    }

    /// Connector sized from the `[pool]` settings
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::new(settings.max_connections_per_target, settings.connect_timeout())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgPool;

    async fn connect(&self, params: &ConnectParams) -> Result<PgPool, ConnectError> {
        let opts = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.username)
            .password(&params.password);

        Ok(PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy_with(opts))
    }

    async fn probe(&self, handle: &PgPool) -> Result<(), ConnectError> {
        sqlx::query("SELECT 1").execute(handle).await?;
        Ok(())
    }

    async fn close(&self, handle: &PgPool) {
        handle.close().await;
    }
}

/// Pool manager timing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Handles unused for this long are closed by the sweep
    pub idle_timeout: Duration,
    /// Period of the background sweep
    pub sweep_interval: Duration,
    /// Bound on connect, and separately on the probe
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            sweep_interval: settings.sweep_interval(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Initialised handles in the pool
    pub live: usize,
    /// Targets with a connection attempt in flight
    pub pending: usize,
    /// Handles ever created
    pub created: u64,
    /// Handles closed by sweep, eviction or shutdown
    pub evicted: u64,
}

enum SlotState<H> {
    Connecting,
    Ready(Arc<H>),
    Failed(TenancyError),
}

struct PoolSlot<H> {
    state: watch::Sender<SlotState<H>>,
    last_used: Mutex<Instant>,
}

impl<H> PoolSlot<H> {
    fn new() -> Self {
        let (state, _) = watch::channel(SlotState::Connecting);
        Self {
            state,
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    fn ready(&self) -> Option<Arc<H>> {
        match &*self.state.borrow() {
            SlotState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    fn is_ready(&self) -> bool {
        matches!(&*self.state.borrow(), SlotState::Ready(_))
    }

    /// Wait for the attempt in flight to settle and take its outcome
    async fn outcome(&self, key: &ConnectionTargetKey) -> TenancyResult<Arc<H>> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| !matches!(state, SlotState::Connecting))
            .await
            .map_err(|_| TenancyError::unavailable(key.to_string(), "connection attempt dropped"))?;
        match &*settled {
            SlotState::Ready(handle) => Ok(Arc::clone(handle)),
            SlotState::Failed(err) => Err(err.clone()),
            SlotState::Connecting => Err(TenancyError::unavailable(
                key.to_string(),
                "connection attempt dropped",
            )),
        }
    }
}

/// The caller that inserted a slot owns its connection attempt. Whatever
/// happens to that caller, waiters are released: a dropped attempt publishes
/// a failure and clears the slot.
struct Attempt<'a, H> {
    slots: &'a DashMap<ConnectionTargetKey, Arc<PoolSlot<H>>>,
    key: &'a ConnectionTargetKey,
    slot: Arc<PoolSlot<H>>,
    settled: bool,
}

impl<H> Attempt<'_, H> {
    fn settle(mut self, result: &TenancyResult<Arc<H>>) {
        self.settled = true;
        match result {
            Ok(handle) => {
                self.slot.touch();
                self.slot.state.send_replace(SlotState::Ready(Arc::clone(handle)));
            }
            Err(err) => self.fail(err.clone()),
        }
    }

    fn fail(&self, err: TenancyError) {
        // Remove before publishing so a caller arriving after the failure
        // starts a fresh attempt instead of inheriting this one.
        self.slots
            .remove_if(self.key, |_, s| Arc::ptr_eq(s, &self.slot));
        self.slot.state.send_replace(SlotState::Failed(err));
    }
}

impl<H> Drop for Attempt<'_, H> {
    fn drop(&mut self) {
        if !self.settled {
            self.fail(TenancyError::unavailable(
                self.key.to_string(),
                "connection attempt cancelled",
            ));
        }
    }
}

/// Tenant connection pool manager
pub struct ConnectionPoolManager<C: Connector> {
    connector: C,
    config: PoolConfig,
    slots: DashMap<ConnectionTargetKey, Arc<PoolSlot<C::Handle>>>,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl<C: Connector> ConnectionPoolManager<C> {
    /// Empty pool; nothing connects until the first `acquire`
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            slots: DashMap::new(),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Return the live handle for `target`, creating it on first use.
    ///
    /// Concurrent first calls for one target share a single connection
    /// attempt and all receive its outcome, so a dead target costs one
    /// bounded attempt however many requests are queued on it. A failed
    /// attempt leaves nothing behind and the next call retries from scratch.
    pub async fn acquire(&self, target: &Target) -> TenancyResult<Arc<C::Handle>> {
        let key = &target.key;
        // Touch under the shard lock so a concurrent sweep cannot see a stale
        // timestamp for a slot that is about to be returned.
        let (slot, owner) = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().touch();
                (Arc::clone(entry.get()), false)
            }
            Entry::Vacant(entry) => {
                let slot = Arc::new(PoolSlot::new());
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if !owner {
            if let Some(handle) = slot.ready() {
                return Ok(handle);
            }
            let handle = slot.outcome(key).await?;
            slot.touch();
            return Ok(handle);
        }

        let attempt = Attempt {
            slots: &self.slots,
            key,
            slot,
            settled: false,
        };
        let result = self.establish(target).await;
        attempt.settle(&result);
        result
    }

    async fn establish(&self, target: &Target) -> TenancyResult<Arc<C::Handle>> {
        let key = &target.key;
        let timeout = self.config.connect_timeout;

        let handle = match tokio::time::timeout(timeout, self.connector.connect(&target.params)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::warn!(target = %key, error = %e, "tenant database connect failed");
                return Err(TenancyError::unavailable(key.to_string(), e));
            }
            Err(_) => {
                tracing::warn!(target = %key, ?timeout, "tenant database connect timed out");
                return Err(TenancyError::unavailable(
                    key.to_string(),
                    format!("connect timed out after {timeout:?}"),
                ));
            }
        };

        let probe = tokio::time::timeout(timeout, self.connector.probe(&handle)).await;
        let failure = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("liveness probe timed out after {timeout:?}")),
        };
        if let Some(reason) = failure {
            self.connector.close(&handle).await;
            tracing::warn!(target = %key, %reason, "tenant database liveness probe failed");
            return Err(TenancyError::unavailable(key.to_string(), reason));
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target = %key, "tenant database connection established");
        Ok(Arc::new(handle))
    }

    /// One sweep cycle: close handles idle beyond the threshold.
    ///
    /// The shared-mode handle and in-flight attempts are never swept.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let is_idle = |key: &ConnectionTargetKey, slot: &PoolSlot<C::Handle>| {
            !key.is_shared() && slot.is_ready() && slot.idle_for(now) >= idle_timeout
        };

        let candidates: Vec<ConnectionTargetKey> = self
            .slots
            .iter()
            .filter(|entry| is_idle(entry.key(), &**entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            if let Some((key, slot)) = self.slots.remove_if(&key, |k, s| is_idle(k, &**s)) {
                if let Some(handle) = slot.ready() {
                    self.connector.close(&handle).await;
                }
                tracing::debug!(target = %key, "closed idle tenant connection");
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::info!(evicted, remaining = self.slots.len(), "idle sweep closed tenant connections");
        }
        evicted
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `sweep_interval` until the
    /// manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    tracing::debug!("pool manager dropped, sweeper exiting");
                    break;
                };
                manager.sweep_idle().await;
            }
        })
    }

    /// Close and forget the handle for `key`
    pub async fn evict(&self, key: &ConnectionTargetKey) -> bool {
        let Some((key, slot)) = self.slots.remove(key) else {
            return false;
        };
        if let Some(handle) = slot.ready() {
            self.connector.close(&handle).await;
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(target = %key, "tenant connection evicted");
        true
    }

    /// Close every handle
    pub async fn shutdown(&self) {
        let keys: Vec<ConnectionTargetKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            self.evict(key).await;
        }
        tracing::info!(closed = keys.len(), "connection pool shut down");
    }

    /// Whether an initialised handle exists for `key`
    pub fn contains(&self, key: &ConnectionTargetKey) -> bool {
        self.slots
            .get(key)
            .map_or(false, |slot| slot.is_ready())
    }

    /// Live and pending slots plus lifetime counters
    pub fn stats(&self) -> PoolStats {
        let (live, pending) = self.slots.iter().fold((0, 0), |(live, pending), entry| {
            if entry.value().is_ready() {
                (live + 1, pending)
            } else {
                (live, pending + 1)
            }
        });
        PoolStats {
            live,
            pending,
            created: self.created.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Timing this manager was built with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}
