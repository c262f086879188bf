//! Plan cache configuration.

use std::time::Duration;

/// Configuration for a [`PlanCache`](crate::PlanCache).
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PlanCacheConfig {
    /// Whether prepared statements are stored and reused.
    ///
    /// When `false`, every prepare goes straight to the connection and the
    /// resulting handle is handed to the caller uncached.
    pub enabled: bool,

    /// Upper bound on a single prepare call against the connection.
    ///
    /// `None` means the prepare call is only bounded by the caller.
    pub prepare_timeout: Option<Duration>,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prepare_timeout: None,
        }
    }
}

impl PlanCacheConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new configuration with caching disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Enable or disable statement caching.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the prepare timeout.
    #[must_use]
    pub fn prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = Some(timeout);
        self
    }

    /// Remove the prepare timeout.
    #[must_use]
    pub fn no_prepare_timeout(mut self) -> Self {
        self.prepare_timeout = None;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.prepare_timeout == Some(Duration::ZERO) {
            return Err("prepare_timeout must be greater than 0".into());
        }
        Ok(())
    }
}
