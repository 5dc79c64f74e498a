//! Tenant Router - per-request tenant resolution and database routing
//!
//! # Architecture
//!
//! ```text
//!  inbound request
//!        │
//!  ┌─────▼──────┐  header → host → none
//!  │  Resolver  │────────────────────────────► Resolution::None (platform traffic)
//!  └─────┬──────┘
//!        │ slug
//!  ┌─────▼──────┐  miss   ┌───────────┐  decrypt  ┌──────────────┐
//!  │Config Cache│────────►│ Directory │──────────►│ SecretCipher │
//!  └─────┬──────┘         └───────────┘           └──────────────┘
//!        │ TenantConfig
//!  ┌─────▼──────┐
//!  │Activity    │──── reject ───────────────────► TenantInactive
//!  │Gate        │
//!  └─────┬──────┘
//!  ┌─────▼──────┐  key = target(config)
//!  │Connection  │◄──── idle sweep (background)
//!  │Pool Manager│
//!  └─────┬──────┘
//!        ▼
//!   database handle
//! ```
//!
//! Invalidation runs the other way: an admin edit evicts the cache entry and,
//! when the connection target moved, the pooled connection.

#![warn(missing_docs)]

pub mod cache;
pub mod directory;
pub mod gate;
pub mod pool;
pub mod resolver;
pub mod router;
pub mod target;

pub use cache::{CachedConfigEntry, TenantConfigCache};
pub use directory::{InMemoryTenantStore, PgTenantStore, StoreError, TenantDirectory, TenantRow, TenantStore};
pub use pool::{ConnectError, ConnectionPoolManager, Connector, PgConnector, PoolConfig, PoolStats};
pub use resolver::{RequestParts, Resolution, TenantRequest, TenantResolver};
pub use router::{RoutedTenant, TenantRouter};
pub use target::{ConnectParams, ConnectionTargetKey, DeploymentMode, Target};
