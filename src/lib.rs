//! # sqlx-thread-transaction
//!
//! Thread-bound, reentrant transaction management for SQLx, with generic repositories.
//!
//! ## Features
//!
//! - **Thread-Bound Context**: Each thread has at most one active transaction context
//! - **Reentrant Units of Work**: Nested calls on the same thread join the outer transaction
//! - **Automatic Rollback**: Any error in a unit of work rolls the whole transaction back
//! - **Post-Commit / Post-Rollback Actions**: Deferred callbacks run once the outcome is known
//! - **Lifecycle Hooks**: Observe begin, commit, rollback and cleanup of every transaction
//! - **Generic Repositories**: CRUD and criteria queries for any [`Entity`]
//! - **Multiple Databases**: SQLite, PostgreSQL and MySQL through the SQLx `Any` driver
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx-thread-transaction = { version = "0.1", features = ["sqlite"] }
//! ```
//!
//! ## Examples
//!
//! ### Basic Unit of Work
//!
//! ```rust,no_run
//! use sqlx_thread_transaction::{DatabaseService, DatabaseServiceConfiguration, Value};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = DatabaseService::new(DatabaseServiceConfiguration::new("sqlite://app.db?mode=rwc"))?;
//! service.initialize(&[])?;
//!
//! service.run_in_thread_transaction(|session| {
//!     session.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("Alice")])?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Nested Units of Work
//!
//! A unit of work started while another one is running on the same thread
//! uses the same connection and transaction. Only the outermost call commits.
//!
//! ```rust,no_run
//! use sqlx_thread_transaction::{DatabaseService, Value};
//!
//! # fn example(service: &DatabaseService) -> Result<(), Box<dyn std::error::Error>> {
//! service.run_in_thread_transaction(|session| {
//!     session.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("David")])?;
//!
//!     // Joins the outer transaction; an error here rolls back both inserts
//!     service.run_in_thread_transaction(|nested| {
//!         assert!(nested.same_session(session));
//!         nested.execute("INSERT INTO audit_log (action) VALUES (?)", &[Value::from("User created")])?;
//!         Ok(())
//!     })
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Post-Commit Actions
//!
//! ```rust,no_run
//! use sqlx_thread_transaction::context;
//! # use sqlx_thread_transaction::DatabaseService;
//!
//! # fn example(service: &DatabaseService) -> Result<(), Box<dyn std::error::Error>> {
//! service.run_in_thread_transaction(|_session| {
//!     context::add_post_commit_action(|| {
//!         println!("mail sent only once the order is stored");
//!         Ok(())
//!     })?;
//!     context::add_post_rollback_action(|| {
//!         println!("order discarded");
//!         Ok(())
//!     })
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The outermost unit of work reports a failure as [`Error::TransactionFailed`],
//! which carries the context id and the original error:
//!
//! ```rust,no_run
//! use sqlx_thread_transaction::{DatabaseService, Error};
//!
//! # fn example(service: &DatabaseService) {
//! let result: sqlx_thread_transaction::Result<()> =
//!     service.run_in_thread_transaction(|_session| Err(Error::custom("insufficient funds")));
//!
//! if let Err(Error::TransactionFailed { id, source }) = result {
//!     eprintln!("transaction {} rolled back: {}", id, source);
//! }
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **DatabaseService**: Owns the pool and a small I/O runtime; every call blocks the caller
//! 2. **TransactionContext**: Registered per thread by the outermost unit of work
//! 3. **Session**: One pooled connection shared by all nested units of work on the thread
//! 4. **Cleanup**: The context is cleared and the connection released on every exit path
//!
//! ## Limitations
//!
//! - Blocking API; do not call it from inside an asynchronous runtime
//! - Nested units of work do not create savepoints
//! - A session never leaves the thread that opened it

mod executor;

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod hooks;
pub mod repository;
pub mod service;
pub mod session;

#[cfg(feature = "anyhow")]
mod anyhow_compat;

pub use config::{DatabaseServiceConfiguration, Dialect, SchemaAction};
pub use context::{ContextId, TransactionContext};
pub use entity::{Column, ColumnType, Entity, EntityDescriptor, EntityId, Value};
pub use error::{ActionPhase, BoxError, Error, Result};
pub use hooks::{Hook, HookPoint, TransactionHooks};
pub use repository::{Comparison, Filter, Repository};
pub use service::DatabaseService;
pub use session::{ConnectionFuture, Session};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::config::{DatabaseServiceConfiguration, SchemaAction};
    pub use crate::context::{self, TransactionContext};
    pub use crate::entity::{Column, Entity, EntityId, Value};
    pub use crate::error::{Error, Result};
    pub use crate::repository::{Filter, Repository};
    pub use crate::service::DatabaseService;
    pub use crate::session::Session;
}
