//! Plan cache error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during plan cache operations.
///
/// The type parameter is the error type of the bound
/// [`Connection`](crate::Connection). Failures reported by the connection or
/// by a statement handle are carried unmodified.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    /// An empty statement identifier was supplied.
    #[error("statement identifier is required")]
    IdentifierRequired,

    /// No connection has been bound to the cache.
    #[error("no connection bound to plan cache")]
    NotBound,

    /// A connection was bound while statements are still cached.
    #[error("cannot rebind connection while {live} statement(s) are cached")]
    Rebind {
        /// Number of live or in-flight entries at the time of the call.
        live: usize,
    },

    /// The connection rejected the statement.
    #[error("statement preparation failed")]
    Prepare(#[source] E),

    /// The connection rejected the statement while this call was waiting on
    /// another caller's prepare of the same identifier.
    ///
    /// Only the preparing caller receives the connection's error value;
    /// waiters get its message.
    #[error("concurrent preparation of statement {id:?} failed: {message}")]
    ConcurrentPrepare {
        /// Identifier of the statement.
        id: String,
        /// Message of the connection's error.
        message: String,
    },

    /// Preparing the statement exceeded the configured timeout.
    #[error("statement preparation timed out after {0:?}")]
    PrepareTimeout(Duration),

    /// Preparation was cancelled by the caller.
    #[error("statement preparation cancelled")]
    Cancelled,

    /// Closing a prepared statement failed.
    #[error("failed to close statement {id:?}")]
    Close {
        /// Identifier of the statement that failed to close.
        id: String,
        /// Underlying close failure.
        #[source]
        source: E,
    },

    /// One or more statements failed to close while draining the cache.
    #[error("{failed} statement(s) failed to close, first was {id:?}")]
    Drain {
        /// Number of statements whose close failed.
        failed: usize,
        /// Identifier of the first statement that failed to close.
        id: String,
        /// First close failure encountered.
        #[source]
        source: E,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl<E> Error<E>
where
    E: std::error::Error + 'static,
{
    /// Check if this error means the statement was not prepared.
    ///
    /// Covers connection rejections, timeouts and cancellation. None of
    /// these leave an entry in the cache, so the caller may retry.
    #[must_use]
    pub fn is_preparation_failure(&self) -> bool {
        matches!(
            self,
            Self::Prepare(_)
                | Self::ConcurrentPrepare { .. }
                | Self::PrepareTimeout(_)
                | Self::Cancelled
        )
    }

    /// Check if this error came from closing one or more statements.
    #[must_use]
    pub fn is_close_failure(&self) -> bool {
        matches!(self, Self::Close { .. } | Self::Drain { .. })
    }

    /// Take the underlying collaborator error, if there is one.
    #[must_use]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Prepare(source) | Self::Close { source, .. } | Self::Drain { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
