//! Prepared statement plan cache.
//!
//! A [`PlanCache`] maps caller-chosen statement identifiers to statements
//! prepared against a single bound [`Connection`]. It is meant to be shared
//! (typically behind an `Arc`) by every task that talks to that connection.
//!
//! ## Lifecycle
//!
//! 1. The first `prepare_or_fetch` for an identifier installs a placeholder
//!    and asks the connection to prepare the statement text
//! 2. Concurrent callers for the same identifier wait on the placeholder
//!    instead of preparing a second copy
//! 3. On success the placeholder is replaced with the handle; later calls
//!    get the same `Arc` back without touching the connection
//! 4. On failure, timeout or cancellation the placeholder is removed and
//!    nothing is cached. Callers already waiting on a failed or timed out
//!    prepare get the failure back; they do not prepare again. Callers
//!    waiting on a cancelled prepare take it over
//! 5. `invalidate_statement` and `close_all` take the handle out of the map
//!    and close it; the next call for that identifier prepares again
//!
//! Entries never expire on their own.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::PlanCacheConfig;
use crate::connection::{Connection, Statement};
use crate::error::Error;
use crate::prepared::Prepared;
use crate::stats::{CacheStats, Counters};

type Entries<S> = DashMap<String, Slot<S>>;

/// Why an in-flight prepare produced no statement, as seen by its waiters.
#[derive(Debug, Clone)]
enum Failure {
    NotBound,
    TimedOut(Duration),
    Rejected(Arc<str>),
}

impl Failure {
    fn of<E: std::error::Error + 'static>(err: &Error<E>) -> Option<Self> {
        match err {
            Error::NotBound => Some(Self::NotBound),
            Error::PrepareTimeout(limit) => Some(Self::TimedOut(*limit)),
            Error::Prepare(source) => Some(Self::Rejected(source.to_string().into())),
            _ => None,
        }
    }

    fn into_error<E: std::error::Error + 'static>(self, id: &str) -> Error<E> {
        match self {
            Self::NotBound => Error::NotBound,
            Self::TimedOut(limit) => Error::PrepareTimeout(limit),
            Self::Rejected(message) => Error::ConcurrentPrepare {
                id: id.to_owned(),
                message: message.to_string(),
            },
        }
    }
}

/// State of one identifier in the map.
enum Slot<S> {
    /// A caller is preparing this statement. The channel carries its failure,
    /// if any, and closes when that caller's [`PendingSlot`] is dropped.
    Preparing {
        ticket: u64,
        done: watch::Receiver<Option<Failure>>,
    },
    /// Prepared and owned by the cache.
    Ready(Arc<S>),
}

impl<S> Slot<S> {
    fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

enum Claim<'a, S> {
    Hit(Arc<S>),
    Wait(watch::Receiver<Option<Failure>>),
    Owner(PendingSlot<'a, S>),
}

impl<S> Claim<'_, S> {
    fn observe(slot: &Slot<S>) -> Self {
        match slot {
            Slot::Ready(stmt) => Self::Hit(Arc::clone(stmt)),
            Slot::Preparing { done, .. } => Self::Wait(done.clone()),
        }
    }
}

/// Placeholder ownership for an in-flight prepare.
///
/// Dropping it without calling [`fulfil`](PendingSlot::fulfil) removes the
/// placeholder, then drops the sender so that waiters wake. Waiters that find
/// no failure published take the prepare over.
struct PendingSlot<'a, S> {
    entries: &'a Entries<S>,
    id: String,
    ticket: u64,
    armed: bool,
    done: watch::Sender<Option<Failure>>,
}

impl<S> PendingSlot<'_, S> {
    fn fulfil(mut self, stmt: Arc<S>) {
        self.entries.insert(self.id.clone(), Slot::Ready(stmt));
        self.armed = false;
    }

    /// Publish a failure to current waiters. Must happen before the
    /// placeholder is removed.
    fn fail(self, failure: Failure) {
        self.done.send_replace(Some(failure));
    }
}

impl<S> Drop for PendingSlot<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            let ticket = self.ticket;
            self.entries.remove_if(&self.id, |_, slot| {
                matches!(slot, Slot::Preparing { ticket: t, .. } if *t == ticket)
            });
        }
    }
}

/// Cache of prepared statements bound to one connection.
///
/// All operations take `&self` and are safe to call from many tasks at once.
/// Lookups on a warm cache only take a shard read lock.
///
/// The cache owns every handle it stores and closes each exactly once, on
/// [`invalidate_statement`](PlanCache::invalidate_statement) or
/// [`close_all`](PlanCache::close_all). It never opens or closes the
/// connection itself.
pub struct PlanCache<C: Connection> {
    connection: RwLock<Option<Arc<C>>>,
    enabled: AtomicBool,
    prepare_timeout: Option<Duration>,
    entries: Entries<C::Statement>,
    next_ticket: AtomicU64,
    counters: Counters,
}

impl<C: Connection> PlanCache<C> {
    /// Create an empty, enabled cache with no connection bound.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(PlanCacheConfig::default())
    }

    /// Create an empty cache from a configuration.
    pub fn with_config(config: PlanCacheConfig) -> Result<Self, Error<C::Error>> {
        config.validate().map_err(Error::Config)?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: PlanCacheConfig) -> Self {
        Self {
            connection: RwLock::new(None),
            enabled: AtomicBool::new(config.enabled),
            prepare_timeout: config.prepare_timeout,
            entries: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Bind the connection at construction time.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<C>) -> Self {
        *self.connection.get_mut() = Some(connection);
        self
    }

    /// Set whether caching is enabled at construction time.
    #[must_use]
    pub fn with_enabled(self, enabled: bool) -> Self {
        self.set_enabled(enabled);
        self
    }

    /// Bind the cache to a connection.
    ///
    /// Rebinding is only allowed while the cache holds no entries, since
    /// cached handles belong to the connection that prepared them. Binding
    /// the connection that is already bound is always accepted.
    pub fn bind_connection(&self, connection: Arc<C>) -> Result<(), Error<C::Error>> {
        let mut current = self.connection.write();
        if current
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, &connection))
        {
            return Ok(());
        }

        let live = self.entries.len();
        if live > 0 {
            return Err(Error::Rebind { live });
        }

        *current = Some(connection);
        tracing::debug!("plan cache bound to connection");
        Ok(())
    }

    /// Get the bound connection.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<C>> {
        self.connection.read().clone()
    }

    /// Enable or disable caching.
    ///
    /// While disabled, [`prepare_or_fetch`](PlanCache::prepare_or_fetch)
    /// always prepares a fresh, uncached statement. Existing entries are
    /// kept and served again once caching is re-enabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Check if caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Check if `id` has a live prepared statement.
    ///
    /// Statements that are still being prepared are not reported.
    #[must_use]
    pub fn has_statement(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|slot| slot.is_ready())
    }

    /// Get the number of live prepared statements.
    ///
    /// Walks every shard, so prefer [`has_statement`](PlanCache::has_statement)
    /// on hot paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_ready()).count()
    }

    /// Check if the cache holds no live prepared statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the identifiers of all live prepared statements, in no particular order.
    #[must_use]
    pub fn statement_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.is_ready())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get a snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Reset cache statistics.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Return the cached statement for `id`, or prepare `sql` and cache it.
    ///
    /// A cached statement is returned as is; `sql` is not compared against
    /// the text it was prepared from. If another task is already preparing
    /// `id`, this waits for it rather than preparing a second copy.
    ///
    /// Dropping the returned future cancels the prepare and leaves nothing
    /// behind in the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::IdentifierRequired`] if `id` is empty
    /// - [`Error::NotBound`] if no connection is bound
    /// - [`Error::Prepare`] with the connection's error if preparation fails
    /// - [`Error::PrepareTimeout`] if the configured prepare timeout elapses
    /// - [`Error::ConcurrentPrepare`] if this call waited on another caller's
    ///   prepare of `id` and the connection rejected it
    pub async fn prepare_or_fetch(
        &self,
        id: &str,
        sql: &str,
    ) -> Result<Prepared<C::Statement>, Error<C::Error>> {
        if id.is_empty() {
            return Err(Error::IdentifierRequired);
        }

        if !self.is_enabled() {
            let stmt = self.prepare_statement(sql).await?;
            self.counters.bypassed();
            tracing::trace!(statement_id = id, "plan cache disabled, statement not cached");
            return Ok(Prepared::Transient(stmt));
        }

        let mut waited = false;
        loop {
            let mut done = match self.claim(id) {
                Claim::Hit(stmt) => {
                    if !waited {
                        self.counters.hit();
                        tracing::trace!(statement_id = id, "plan cache hit");
                    }
                    return Ok(Prepared::Cached(stmt));
                }
                Claim::Owner(pending) => {
                    if !waited {
                        self.counters.miss();
                    }
                    tracing::trace!(statement_id = id, "plan cache miss");
                    return self.fill(pending, sql).await.map(Prepared::Cached);
                }
                Claim::Wait(done) => done,
            };

            if !waited {
                self.counters.miss();
                waited = true;
            }
            tracing::trace!(statement_id = id, "waiting for in-flight prepare");
            // Resolves on a published failure or when the preparer's sender drops.
            let _ = done.changed().await;
            let failure = done.borrow().clone();
            if let Some(failure) = failure {
                tracing::debug!(statement_id = id, "in-flight prepare failed");
                return Err(failure.into_error(id));
            }
        }
    }

    /// Like [`prepare_or_fetch`](PlanCache::prepare_or_fetch), but gives up
    /// with [`Error::Cancelled`] once `cancel` fires.
    pub async fn prepare_or_fetch_until(
        &self,
        cancel: &CancellationToken,
        id: &str,
        sql: &str,
    ) -> Result<Prepared<C::Statement>, Error<C::Error>> {
        if id.is_empty() {
            return Err(Error::IdentifierRequired);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(statement_id = id, "statement preparation cancelled");
                Err(Error::Cancelled)
            }
            result = self.prepare_or_fetch(id, sql) => result,
        }
    }

    /// Remove `id` from the cache and close its statement.
    ///
    /// Absent identifiers, and identifiers still being prepared, are left
    /// alone and reported as success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Close`] if closing the statement fails. The entry is
    /// removed either way.
    pub async fn invalidate_statement(&self, id: &str) -> Result<(), Error<C::Error>> {
        let Some((id, Slot::Ready(stmt))) = self.entries.remove_if(id, |_, slot| slot.is_ready())
        else {
            return Ok(());
        };

        tracing::debug!(statement_id = %id, "invalidating prepared statement");
        match self.close_handle(&id, &stmt).await {
            Ok(()) => Ok(()),
            Err(source) => Err(Error::Close { id, source }),
        }
    }

    /// Close every live statement and empty the cache.
    ///
    /// Keeps going when a close fails, so every statement gets exactly one
    /// close attempt. Statements still being prepared are left to their
    /// preparer. The cache stays usable afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Drain`] with the first failure and the total number of
    /// failed closes.
    pub async fn close_all(&self) -> Result<(), Error<C::Error>> {
        let ids: Vec<String> = self.statement_ids();

        let mut closed = 0usize;
        let mut failed = 0usize;
        let mut first = None;
        for id in ids {
            let Some((id, Slot::Ready(stmt))) = self.entries.remove_if(&id, |_, slot| slot.is_ready())
            else {
                continue;
            };

            match self.close_handle(&id, &stmt).await {
                Ok(()) => closed += 1,
                Err(source) => {
                    failed += 1;
                    if first.is_none() {
                        first = Some((id, source));
                    }
                }
            }
        }

        tracing::debug!(closed, failed, "drained plan cache");
        match first {
            Some((id, source)) => Err(Error::Drain { failed, id, source }),
            None => Ok(()),
        }
    }

    fn claim(&self, id: &str) -> Claim<'_, C::Statement> {
        if let Some(slot) = self.entries.get(id) {
            return Claim::observe(&slot);
        }

        match self.entries.entry(id.to_owned()) {
            Entry::Occupied(entry) => Claim::observe(entry.get()),
            Entry::Vacant(entry) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                entry.insert(Slot::Preparing { ticket, done: rx });
                Claim::Owner(PendingSlot {
                    entries: &self.entries,
                    id: id.to_owned(),
                    ticket,
                    armed: true,
                    done: tx,
                })
            }
        }
    }

    async fn fill(
        &self,
        pending: PendingSlot<'_, C::Statement>,
        sql: &str,
    ) -> Result<Arc<C::Statement>, Error<C::Error>> {
        let stmt = match self.prepare_statement(sql).await {
            Ok(stmt) => Arc::new(stmt),
            Err(err) => {
                if let Some(failure) = Failure::of(&err) {
                    pending.fail(failure);
                }
                return Err(err);
            }
        };
        self.counters.prepared();
        tracing::debug!(statement_id = %pending.id, "caching prepared statement");
        pending.fulfil(Arc::clone(&stmt));
        Ok(stmt)
    }

    async fn prepare_statement(&self, sql: &str) -> Result<C::Statement, Error<C::Error>> {
        let connection = self.connection().ok_or(Error::NotBound)?;

        let result = match self.prepare_timeout {
            Some(limit) => match tokio::time::timeout(limit, connection.prepare(sql)).await {
                Ok(result) => result,
                Err(_) => {
                    self.counters.prepare_failed();
                    return Err(Error::PrepareTimeout(limit));
                }
            },
            None => connection.prepare(sql).await,
        };

        result.map_err(|source| {
            self.counters.prepare_failed();
            Error::Prepare(source)
        })
    }

    async fn close_handle(&self, id: &str, stmt: &C::Statement) -> Result<(), C::Error> {
        self.counters.closed();
        let result = stmt.close().await;
        if result.is_err() {
            tracing::debug!(statement_id = id, "prepared statement close failed");
        }
        result
    }
}

impl<C: Connection> Default for PlanCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Drop for PlanCache<C> {
    fn drop(&mut self) {
        let live = self.len();
        if live > 0 {
            tracing::warn!(live, "plan cache dropped with unclosed prepared statements");
        }
    }
}

impl<C: Connection> fmt::Debug for PlanCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache")
            .field("bound", &self.connection.read().is_some())
            .field("enabled", &self.is_enabled())
            .field("prepare_timeout", &self.prepare_timeout)
            .field("len", &self.len())
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio_test::{assert_pending, assert_ready, task};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct TestError(&'static str);

    #[derive(Debug)]
    struct TestStatement {
        sql: String,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl Statement for TestStatement {
        type Error = TestError;

        async fn close(&self) -> Result<(), TestError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestConnection {
        prepares: AtomicUsize,
        reject: AtomicBool,
        gate: Option<Semaphore>,
    }

    impl TestConnection {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn open_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }

        fn prepares(&self) -> usize {
            self.prepares.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connection for TestConnection {
        type Statement = TestStatement;
        type Error = TestError;

        async fn prepare(&self, sql: &str) -> Result<TestStatement, TestError> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.expect("gate closed");
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(TestError("syntax error"));
            }
            Ok(TestStatement {
                sql: sql.to_owned(),
                closes: AtomicUsize::new(0),
            })
        }
    }

    fn bound(connection: &Arc<TestConnection>) -> PlanCache<TestConnection> {
        PlanCache::new().with_connection(Arc::clone(connection))
    }

    #[tokio::test]
    async fn test_empty_identifier_is_rejected() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn);

        let err = cache.prepare_or_fetch("", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::IdentifierRequired));
        assert_eq!(conn.prepares(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unbound_cache_reports_not_bound() {
        let cache = PlanCache::<TestConnection>::new();

        let err = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::NotBound));
        assert!(!cache.has_statement("q"));
    }

    #[tokio::test]
    async fn test_second_call_returns_same_handle() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn);

        let first = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        let second = cache.prepare_or_fetch("q", "SELECT 2").await.unwrap();

        assert!(Arc::ptr_eq(first.shared().unwrap(), second.shared().unwrap()));
        assert_eq!(second.sql, "SELECT 1");
        assert_eq!(conn.prepares(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.prepares, 1);
    }

    #[tokio::test]
    async fn test_failed_prepare_is_not_cached() {
        let conn = Arc::new(TestConnection::default());
        conn.reject.store(true, Ordering::SeqCst);
        let cache = bound(&conn);

        let err = cache.prepare_or_fetch("q", "SELEC 1").await.unwrap_err();
        assert!(err.is_preparation_failure());
        assert_eq!(err.into_source().unwrap().0, "syntax error");
        assert!(!cache.has_statement("q"));
        assert!(cache.entries.is_empty());
        assert_eq!(cache.stats().prepare_failures, 1);

        conn.reject.store(false, Ordering::SeqCst);
        cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        assert!(cache.has_statement("q"));
        assert_eq!(conn.prepares(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_closes_and_forces_reprepare() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn);

        let stmt = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        cache.invalidate_statement("q").await.unwrap();

        assert!(!cache.has_statement("q"));
        assert_eq!(stmt.closes.load(Ordering::SeqCst), 1);

        let again = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        assert!(!Arc::ptr_eq(stmt.shared().unwrap(), again.shared().unwrap()));
        assert_eq!(conn.prepares(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_absent_is_noop() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn);
        cache.prepare_or_fetch("kept", "SELECT 1").await.unwrap();

        tokio_test::assert_ok!(cache.invalidate_statement("missing").await);
        assert_eq!(cache.statement_ids(), vec!["kept".to_string()]);
        assert_eq!(cache.stats().closes, 0);
    }

    #[tokio::test]
    async fn test_close_all_closes_every_handle_once() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn);

        let mut handles = Vec::new();
        for id in ["a", "b", "c"] {
            handles.push(cache.prepare_or_fetch(id, "SELECT 1").await.unwrap());
        }

        cache.close_all().await.unwrap();
        assert!(cache.is_empty());
        for handle in &handles {
            assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
        }

        // A second drain has nothing left to close.
        cache.close_all().await.unwrap();
        for handle in &handles {
            assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
        }
        assert_eq!(cache.stats().closes, 3);
    }

    #[tokio::test]
    async fn test_rebind_rules() {
        let first = Arc::new(TestConnection::default());
        let second = Arc::new(TestConnection::default());
        let cache = bound(&first);

        cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();

        cache.bind_connection(Arc::clone(&first)).unwrap();
        let err = cache.bind_connection(Arc::clone(&second)).unwrap_err();
        assert!(matches!(err, Error::Rebind { live: 1 }));

        cache.close_all().await.unwrap();
        cache.bind_connection(Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&cache.connection().unwrap(), &second));
    }

    #[tokio::test]
    async fn test_disabled_cache_bypasses_storage() {
        let conn = Arc::new(TestConnection::default());
        let cache = bound(&conn).with_enabled(false);
        assert!(!cache.is_enabled());

        let a = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        let b = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        assert!(!a.is_cached());
        assert!(!b.is_cached());
        assert!(!cache.has_statement("q"));
        assert_eq!(conn.prepares(), 2);
        assert_eq!(cache.stats().bypassed, 2);

        a.release().await.unwrap();
        b.release().await.unwrap();

        cache.set_enabled(true);
        let c = cache.prepare_or_fetch("q", "SELECT 1").await.unwrap();
        assert!(c.is_cached());
        assert!(cache.has_statement("q"));
    }

    #[test]
    fn test_concurrent_first_callers_share_one_prepare() {
        let conn = Arc::new(TestConnection::gated());
        let cache = bound(&conn);

        let mut first = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));
        let mut second = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));

        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_eq!(conn.prepares(), 1);
        assert!(!cache.has_statement("q"));

        conn.open_gate();
        let first = assert_ready!(first.poll()).unwrap();
        assert!(second.is_woken());
        let second = assert_ready!(second.poll()).unwrap();

        assert!(Arc::ptr_eq(first.shared().unwrap(), second.shared().unwrap()));
        assert_eq!(conn.prepares(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dropped_prepare_leaves_no_entry() {
        let conn = Arc::new(TestConnection::gated());
        let cache = bound(&conn);

        let mut first = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));
        assert_pending!(first.poll());
        assert_eq!(cache.entries.len(), 1);

        drop(first);
        assert!(cache.entries.is_empty());
        assert!(!cache.has_statement("q"));
    }

    #[test]
    fn test_waiter_takes_over_after_owner_is_dropped() {
        let conn = Arc::new(TestConnection::gated());
        let cache = bound(&conn);

        let mut owner = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));
        let mut waiter = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));
        assert_pending!(owner.poll());
        assert_pending!(waiter.poll());

        drop(owner);
        assert!(waiter.is_woken());
        assert_pending!(waiter.poll());
        assert_eq!(conn.prepares(), 2);

        conn.open_gate();
        let stmt = assert_ready!(waiter.poll()).unwrap();
        assert!(stmt.is_cached());
        assert!(cache.has_statement("q"));
    }

    #[test]
    fn test_waiter_shares_owner_failure_without_preparing() {
        let conn = Arc::new(TestConnection::gated());
        let cache = bound(&conn);

        let mut owner = task::spawn(cache.prepare_or_fetch("q", "SELEC 1"));
        let mut waiter = task::spawn(cache.prepare_or_fetch("q", "SELEC 1"));
        assert_pending!(owner.poll());
        assert_pending!(waiter.poll());

        conn.reject.store(true, Ordering::SeqCst);
        conn.open_gate();
        let err = assert_ready!(owner.poll()).unwrap_err();
        assert!(matches!(err, Error::Prepare(TestError("syntax error"))));

        assert!(waiter.is_woken());
        let err = assert_ready!(waiter.poll()).unwrap_err();
        match err {
            Error::ConcurrentPrepare { id, message } => {
                assert_eq!(id, "q");
                assert_eq!(message, "syntax error");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(conn.prepares(), 1);
        assert!(cache.entries.is_empty());
        assert_eq!(cache.stats().prepare_failures, 1);
    }

    #[test]
    fn test_invalidate_leaves_in_flight_prepare_alone() {
        let conn = Arc::new(TestConnection::gated());
        let cache = bound(&conn);

        let mut owner = task::spawn(cache.prepare_or_fetch("q", "SELECT 1"));
        assert_pending!(owner.poll());

        tokio_test::block_on(cache.invalidate_statement("q")).unwrap();
        assert_eq!(cache.entries.len(), 1);

        conn.open_gate();
        assert_ready!(owner.poll()).unwrap();
        assert!(cache.has_statement("q"));
    }

    #[test]
    fn test_debug_output() {
        let cache = PlanCache::<TestConnection>::new();
        let debug = format!("{cache:?}");
        assert!(debug.contains("PlanCache"));
        assert!(debug.contains("bound: false"));
        assert!(debug.contains("enabled: true"));
    }
}
