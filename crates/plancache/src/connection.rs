//! Collaborator traits for the database connection and its statements.
//!
//! The plan cache does not talk to a database itself. It needs exactly two
//! things from the driver it is bound to:
//!
//! - a [`Connection`] that can prepare statement text into a handle
//! - a [`Statement`] handle that can be closed to release the server-side plan
//!
//! Executing a prepared statement is the caller's business; the concrete
//! handle type exposes whatever execution API its driver offers.

use async_trait::async_trait;

/// A database connection that prepared statements are created against.
///
/// Uses `#[async_trait]` so that `dyn Connection` remains usable.
///
/// # Cancellation
///
/// The future returned by [`prepare`](Connection::prepare) may be dropped at
/// any await point when the caller cancels or a timeout elapses.
/// Implementations must not leave a half-registered plan behind in that case.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Prepared statement handle produced by this connection.
    type Statement: Statement<Error = Self::Error>;

    /// Error returned by prepare and close operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prepare `sql` against this connection.
    async fn prepare(&self, sql: &str) -> Result<Self::Statement, Self::Error>;
}

/// A prepared statement handle that must be explicitly released.
#[async_trait]
pub trait Statement: Send + Sync + 'static {
    /// Error returned when closing fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Release the server-side plan held by this handle.
    ///
    /// The plan cache calls this exactly once for every handle it stores.
    async fn close(&self) -> Result<(), Self::Error>;
}

