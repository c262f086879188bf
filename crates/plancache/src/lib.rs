//! # plancache
//!
//! Concurrency-safe prepared statement plan cache bound to a single database
//! connection.
//!
//! Repeated executions of the same statement should not pay for parsing and
//! planning on the server each time. A [`PlanCache`] remembers the prepared
//! handle for every statement identifier it has seen and hands the same
//! handle back on later calls.
//!
//! ## Features
//!
//! - **Sharded map**: cache hits only take a shard read lock
//! - **Single-flight preparation**: concurrent first callers for an
//!   identifier share one prepare call
//! - **Explicit lifecycle**: every stored handle is closed exactly once, on
//!   invalidation or on [`PlanCache::close_all`]
//! - **Cancellation**: dropping a call, a prepare timeout, or a
//!   `CancellationToken` never leaves partial state behind
//!
//! The cache does not parse SQL, cache results, or evict entries on its own.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plancache::{PlanCache, PlanCacheConfig};
//!
//! let cache = PlanCache::with_config(
//!     PlanCacheConfig::new().prepare_timeout(Duration::from_secs(5)),
//! )?
//! .with_connection(Arc::new(connection));
//!
//! let stmt = cache
//!     .prepare_or_fetch("users.by_id", "SELECT * FROM users WHERE id = $1")
//!     .await?;
//! // Execute `stmt` with the driver's own API...
//!
//! // Schema changed: force the next call to prepare again
//! cache.invalidate_statement("users.by_id").await?;
//!
//! // Shutdown
//! cache.close_all().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod prepared;
pub mod stats;

pub use cache::PlanCache;
pub use config::PlanCacheConfig;
pub use connection::{Connection, Statement};
pub use error::Error;
pub use prepared::Prepared;
pub use stats::CacheStats;
pub use tokio_util::sync::CancellationToken;
