//! # plancache-testing
//!
//! Test infrastructure for plancache development.
//!
//! This crate provides an in-memory [`MockConnection`] that implements the
//! plancache collaborator traits, so cache behavior can be tested without a
//! database.
//!
//! ## Features
//!
//! - Per-handle close counting to detect leaks and double closes
//! - Scripted prepare rejections and close failures
//! - Configurable prepare latency for race and timeout tests
//! - Event log of every prepare and close
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plancache::PlanCache;
//! use plancache_testing::MockConnection;
//!
//! #[tokio::test]
//! async fn test_with_mock_connection() {
//!     let conn = MockConnection::builder().with_rejected("SELEC 1").build();
//!     let cache = PlanCache::new().with_connection(Arc::new(conn.clone()));
//!
//!     cache.prepare_or_fetch("one", "SELECT 1").await.unwrap();
//!     cache.close_all().await.unwrap();
//!
//!     assert!(conn.all_closed_exactly_once());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_connection;

pub use fixtures::StatementFixture;
pub use mock_connection::{
    MockConnection, MockConnectionBuilder, MockError, MockEvent, MockStatement,
};
