//! In-memory connection for exercising the plan cache without a database.
//!
//! [`MockConnection`] hands out [`MockStatement`] handles and records every
//! prepare and close, so tests can assert that no handle is leaked or closed
//! twice. Failures and latency are scripted per statement text.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plancache::{Connection, Statement};
use thiserror::Error;

/// Result type for mock operations.
pub type Result<T> = std::result::Result<T, MockError>;

/// Errors produced by the mock connection and its statements.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// The statement text was scripted to be rejected.
    #[error("statement rejected: {sql}")]
    Rejected {
        /// Rejected statement text.
        sql: String,
    },

    /// Closing the handle was scripted to fail.
    #[error("close failed for handle {handle}")]
    CloseFailed {
        /// Handle whose close failed.
        handle: u64,
    },

    /// The handle was executed after it was closed.
    #[error("statement handle {handle} is closed")]
    StatementClosed {
        /// Closed handle.
        handle: u64,
    },
}

/// Something that happened on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A handle was created.
    Prepared {
        /// New handle.
        handle: u64,
        /// Statement text it was prepared from.
        sql: String,
    },
    /// A prepare call was rejected.
    Rejected {
        /// Rejected statement text.
        sql: String,
    },
    /// `close` was called on a handle, whether or not it succeeded.
    Closed {
        /// Closed handle.
        handle: u64,
    },
}

#[derive(Debug)]
struct HandleRecord {
    handle: u64,
    sql: String,
    fail_close: bool,
    closes: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: AtomicU64,
    prepare_calls: AtomicUsize,
    rejected: Mutex<HashSet<String>>,
    reject_all: AtomicBool,
    close_failures: Mutex<HashSet<String>>,
    prepare_delay: Mutex<Option<Duration>>,
    handles: Mutex<Vec<Arc<HandleRecord>>>,
    events: Mutex<Vec<MockEvent>>,
}

impl MockState {
    fn record(&self, event: MockEvent) {
        self.events.lock().push(event);
    }
}

/// Builder for [`MockConnection`].
#[derive(Debug, Default)]
pub struct MockConnectionBuilder {
    rejected: HashSet<String>,
    close_failures: HashSet<String>,
    prepare_delay: Option<Duration>,
}

impl MockConnectionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every prepare of `sql`.
    pub fn with_rejected(mut self, sql: impl Into<String>) -> Self {
        self.rejected.insert(sql.into());
        self
    }

    /// Make closing any handle prepared from `sql` fail.
    ///
    /// The close is still recorded.
    pub fn with_close_failure(mut self, sql: impl Into<String>) -> Self {
        self.close_failures.insert(sql.into());
        self
    }

    /// Sleep for `delay` inside every prepare call.
    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = Some(delay);
        self
    }

    /// Build the connection.
    pub fn build(self) -> MockConnection {
        let state = MockState {
            rejected: Mutex::new(self.rejected),
            close_failures: Mutex::new(self.close_failures),
            prepare_delay: Mutex::new(self.prepare_delay),
            ..MockState::default()
        };
        MockConnection {
            state: Arc::new(state),
        }
    }
}

/// A scriptable connection that records every prepare and close.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    /// Create a connection that accepts every statement immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for the mock connection.
    pub fn builder() -> MockConnectionBuilder {
        MockConnectionBuilder::new()
    }

    /// Reject (or stop rejecting) every statement.
    pub fn set_reject_all(&self, reject: bool) {
        self.state.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Change the delay applied inside every prepare call.
    pub fn set_prepare_delay(&self, delay: Option<Duration>) {
        *self.state.prepare_delay.lock() = delay;
    }

    /// Number of times `prepare` was called, including failed and
    /// cancelled calls.
    pub fn prepare_calls(&self) -> usize {
        self.state.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of handles successfully created.
    pub fn handles_created(&self) -> usize {
        self.state.handles.lock().len()
    }

    /// Number of created handles that have never been closed.
    pub fn open_handles(&self) -> usize {
        self.state
            .handles
            .lock()
            .iter()
            .filter(|record| record.closes.load(Ordering::SeqCst) == 0)
            .count()
    }

    /// Close count for every created handle, in creation order.
    pub fn close_counts(&self) -> Vec<(u64, usize)> {
        self.state
            .handles
            .lock()
            .iter()
            .map(|record| (record.handle, record.closes.load(Ordering::SeqCst)))
            .collect()
    }

    /// Check that every handle ever created was closed exactly once.
    pub fn all_closed_exactly_once(&self) -> bool {
        self.close_counts().iter().all(|(_, closes)| *closes == 1)
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.events.lock().clone()
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("prepare_calls", &self.prepare_calls())
            .field("handles_created", &self.handles_created())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Statement = MockStatement;
    type Error = MockError;

    async fn prepare(&self, sql: &str) -> Result<MockStatement> {
        self.state.prepare_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.prepare_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self.state.reject_all.load(Ordering::SeqCst)
            || self.state.rejected.lock().contains(sql);
        if rejected {
            tracing::trace!(sql, "mock connection rejected statement");
            self.state.record(MockEvent::Rejected {
                sql: sql.to_owned(),
            });
            return Err(MockError::Rejected {
                sql: sql.to_owned(),
            });
        }

        let handle = self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Arc::new(HandleRecord {
            handle,
            sql: sql.to_owned(),
            fail_close: self.state.close_failures.lock().contains(sql),
            closes: AtomicUsize::new(0),
        });
        self.state.handles.lock().push(Arc::clone(&record));
        self.state.record(MockEvent::Prepared {
            handle,
            sql: sql.to_owned(),
        });
        tracing::trace!(sql, handle, "mock connection prepared statement");

        Ok(MockStatement {
            record,
            state: Arc::clone(&self.state),
        })
    }
}

/// Handle returned by [`MockConnection`].
pub struct MockStatement {
    record: Arc<HandleRecord>,
    state: Arc<MockState>,
}

impl MockStatement {
    /// Server-side handle number, unique per connection.
    pub fn handle(&self) -> u64 {
        self.record.handle
    }

    /// Statement text this handle was prepared from.
    pub fn sql(&self) -> &str {
        &self.record.sql
    }

    /// Number of times `close` has been called on this handle.
    pub fn close_count(&self) -> usize {
        self.record.closes.load(Ordering::SeqCst)
    }

    /// Check if this handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Execute the statement, returning a fake affected-row count.
    pub async fn execute(&self) -> Result<u64> {
        if self.is_closed() {
            return Err(MockError::StatementClosed {
                handle: self.handle(),
            });
        }
        Ok(1)
    }
}

impl fmt::Debug for MockStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockStatement")
            .field("handle", &self.record.handle)
            .field("sql", &self.record.sql)
            .field("closes", &self.close_count())
            .finish()
    }
}

#[async_trait]
impl Statement for MockStatement {
    type Error = MockError;

    async fn close(&self) -> Result<()> {
        self.record.closes.fetch_add(1, Ordering::SeqCst);
        self.state.record(MockEvent::Closed {
            handle: self.record.handle,
        });

        if self.record.fail_close {
            return Err(MockError::CloseFailed {
                handle: self.record.handle,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_records_handles() {
        let conn = MockConnection::new();

        let a = conn.prepare("SELECT 1").await.unwrap();
        let b = conn.prepare("SELECT 2").await.unwrap();

        assert_ne!(a.handle(), b.handle());
        assert_eq!(a.sql(), "SELECT 1");
        assert_eq!(conn.prepare_calls(), 2);
        assert_eq!(conn.handles_created(), 2);
        assert_eq!(conn.open_handles(), 2);
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let conn = MockConnection::builder().with_rejected("SELEC 1").build();

        let err = conn.prepare("SELEC 1").await.unwrap_err();
        assert_eq!(
            err,
            MockError::Rejected {
                sql: "SELEC 1".into()
            }
        );
        assert_eq!(conn.prepare_calls(), 1);
        assert_eq!(conn.handles_created(), 0);

        conn.set_reject_all(true);
        assert!(conn.prepare("SELECT 1").await.is_err());
        conn.set_reject_all(false);
        assert!(conn.prepare("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_counted_even_when_it_fails() {
        let conn = MockConnection::builder()
            .with_close_failure("SELECT 1")
            .build();

        let stmt = conn.prepare("SELECT 1").await.unwrap();
        let err = stmt.close().await.unwrap_err();

        assert_eq!(err, MockError::CloseFailed { handle: 1 });
        assert!(stmt.is_closed());
        assert!(conn.all_closed_exactly_once());
    }

    #[tokio::test]
    async fn test_execute_after_close_fails() {
        let conn = MockConnection::new();
        let stmt = conn.prepare("SELECT 1").await.unwrap();

        assert_eq!(stmt.execute().await.unwrap(), 1);
        stmt.close().await.unwrap();
        assert_eq!(
            stmt.execute().await.unwrap_err(),
            MockError::StatementClosed { handle: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_delay() {
        let conn = MockConnection::builder()
            .with_prepare_delay(Duration::from_secs(2))
            .build();

        let start = tokio::time::Instant::now();
        conn.prepare("SELECT 1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_event_log() {
        let conn = MockConnection::builder().with_rejected("bad").build();

        let stmt = conn.prepare("good").await.unwrap();
        let _ = conn.prepare("bad").await;
        stmt.close().await.unwrap();

        assert_eq!(
            conn.events(),
            vec![
                MockEvent::Prepared {
                    handle: 1,
                    sql: "good".into()
                },
                MockEvent::Rejected { sql: "bad".into() },
                MockEvent::Closed { handle: 1 },
            ]
        );
    }
}
