//! Handles returned from the plan cache.

use std::ops::Deref;
use std::sync::Arc;

use crate::connection::Statement;

/// A prepared statement handed out by [`PlanCache::prepare_or_fetch`].
///
/// [`PlanCache::prepare_or_fetch`]: crate::PlanCache::prepare_or_fetch
#[derive(Debug)]
pub enum Prepared<S> {
    /// Shared handle owned by the cache.
    ///
    /// The cache closes it on invalidation or drain. Callers must not close
    /// it themselves.
    Cached(Arc<S>),
    /// Handle prepared while caching was disabled.
    ///
    /// The caller owns it and should [`release`](Prepared::release) it.
    Transient(S),
}

impl<S> Prepared<S> {
    /// Check if this handle is owned by the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// Get the shared handle if this statement is cached.
    #[must_use]
    pub fn shared(&self) -> Option<&Arc<S>> {
        match self {
            Self::Cached(stmt) => Some(stmt),
            Self::Transient(_) => None,
        }
    }
}

impl<S: Statement> Prepared<S> {
    /// Release the handle.
    ///
    /// Closes a transient handle. Cached handles are left to the cache and
    /// this is a no-op for them.
    pub async fn release(self) -> Result<(), S::Error> {
        match self {
            Self::Cached(_) => Ok(()),
            Self::Transient(stmt) => stmt.close().await,
        }
    }
}

impl<S> Deref for Prepared<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match self {
            Self::Cached(stmt) => stmt,
            Self::Transient(stmt) => stmt,
        }
    }
}

