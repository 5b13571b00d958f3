use crate::config::Dialect;
use crate::entity::{bind_value, Value};
use crate::error::{Error, Result};
use sqlx::any::{AnyQueryResult, AnyRow};
use sqlx::AnyConnection;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Executor, Row};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::ops::DerefMut;
use std::pin::Pin;
use std::rc::Rc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Future returned by the closures given to [`Session::with_connection`].
pub type ConnectionFuture<'c, T> = Pin<Box<dyn Future<Output = crate::Result<T>> + 'c>>;

/// Blocking handle to one pooled connection, owned by the thread that opened it.
///
/// A session is handed to every unit of work. Cloning is cheap and every clone
/// refers to the same connection; nested units of work on the same thread
/// receive a clone of the outermost session. The handle is neither `Send` nor
/// `Sync`, so it cannot be used from another thread.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_thread_transaction::{DatabaseService, DatabaseServiceConfiguration, Value};
///
/// # fn example() -> sqlx_thread_transaction::Result<()> {
/// let service = DatabaseService::new(DatabaseServiceConfiguration::new("sqlite://app.db"))?;
/// service.initialize(&[])?;
///
/// service.run_in_thread_transaction(|session| {
///     session.execute(
///         "INSERT INTO users (name) VALUES (?)",
///         &[Value::from("Alice")],
///     )?;
///     Ok(())
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    runtime: Handle,
    dialect: Dialect,
    log_sql: bool,
    state: RefCell<SessionState>,
}

enum SessionState {
    Open {
        conn: PoolConnection<Any>,
        in_transaction: bool,
    },
    Released,
}

impl Session {
    /// Acquires a connection from `pool`, blocking the calling thread.
    pub(crate) fn open(pool: &AnyPool, runtime: Handle, dialect: Dialect, log_sql: bool) -> Result<Self> {
        let conn = runtime.block_on(pool.acquire())?;
        Ok(Self {
            inner: Rc::new(SessionInner {
                runtime,
                dialect,
                log_sql,
                state: RefCell::new(SessionState::Open {
                    conn,
                    in_transaction: false,
                }),
            }),
        })
    }

    /// Dialect of the underlying connection.
    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    /// Whether the connection has not been released yet.
    pub fn is_open(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map(|state| matches!(*state, SessionState::Open { .. }))
            .unwrap_or(true)
    }

    /// Whether a transaction is open on the connection.
    pub fn in_transaction(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map(|state| {
                matches!(
                    *state,
                    SessionState::Open {
                        in_transaction: true,
                        ..
                    }
                )
            })
            .unwrap_or(false)
    }

    /// Whether two handles refer to the same connection.
    pub fn same_session(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs SQLx code against the underlying connection and blocks until it completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] after release and [`Error::SessionBusy`]
    /// when called from inside another `with_connection` on the same session.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sqlx_thread_transaction::Session;
    /// # fn example(session: &Session) -> sqlx_thread_transaction::Result<()> {
    /// let affected = session.with_connection(|conn| {
    ///     Box::pin(async move {
    ///         let result = sqlx::query("DELETE FROM sessions WHERE expired = 1")
    ///             .execute(conn)
    ///             .await?;
    ///         Ok(result.rows_affected())
    ///     })
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> ConnectionFuture<'c, T>,
    {
        let mut state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| Error::SessionBusy)?;
        match &mut *state {
            SessionState::Open { conn, .. } => self.inner.runtime.block_on(f(conn.deref_mut())),
            SessionState::Released => Err(Error::SessionClosed),
        }
    }

    /// Executes a statement, binding `params` in order.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<AnyQueryResult> {
        self.log_statement(sql);
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.with_connection(move |conn| {
            Box::pin(async move {
                let mut query = sqlx::query(&sql);
                for value in &params {
                    query = bind_value(query, value, None);
                }
                Ok(query.execute(conn).await?)
            })
        })
    }

    /// Fetches every row of a query.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<AnyRow>> {
        self.log_statement(sql);
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.with_connection(move |conn| {
            Box::pin(async move {
                let mut query = sqlx::query(&sql);
                for value in &params {
                    query = bind_value(query, value, None);
                }
                Ok(query.fetch_all(conn).await?)
            })
        })
    }

    /// Fetches at most one row.
    pub fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<AnyRow>> {
        self.log_statement(sql);
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.with_connection(move |conn| {
            Box::pin(async move {
                let mut query = sqlx::query(&sql);
                for value in &params {
                    query = bind_value(query, value, None);
                }
                Ok(query.fetch_optional(conn).await?)
            })
        })
    }

    /// Fetches exactly one row; `sqlx::Error::RowNotFound` otherwise.
    pub fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<AnyRow> {
        self.fetch_optional(sql, params)?
            .ok_or(Error::Database(sqlx::Error::RowNotFound))
    }

    /// Fetches the first column of the single row of a query.
    pub fn fetch_scalar<T>(&self, sql: &str, params: &[Value]) -> Result<T>
    where
        T: for<'r> sqlx::Decode<'r, Any> + sqlx::Type<Any>,
    {
        let row = self.fetch_one(sql, params)?;
        Ok(row.try_get::<T, _>(0)?)
    }

    pub(crate) fn begin(&self) -> Result<()> {
        self.run_control(self.inner.dialect.begin_statement())?;
        self.set_in_transaction(true);
        Ok(())
    }

    pub(crate) fn commit(&self) -> Result<()> {
        self.run_control("COMMIT")?;
        self.set_in_transaction(false);
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.run_control("ROLLBACK")?;
        self.set_in_transaction(false);
        Ok(())
    }

    /// Returns the connection to the pool. Later use fails with `SessionClosed`.
    pub(crate) fn release(&self) {
        self.inner.release();
    }

    // Control statements go through the simple query protocol.
    fn run_control(&self, statement: &'static str) -> Result<()> {
        self.log_statement(statement);
        self.with_connection(move |conn| {
            Box::pin(async move {
                conn.execute(statement).await?;
                Ok(())
            })
        })
    }

    fn set_in_transaction(&self, value: bool) {
        if let Ok(mut state) = self.inner.state.try_borrow_mut() {
            if let SessionState::Open { in_transaction, .. } = &mut *state {
                *in_transaction = value;
            }
        }
    }

    pub(crate) fn log_statement(&self, sql: &str) {
        if self.inner.log_sql {
            info!(sql, "Executing statement");
        }
    }
}

impl SessionInner {
    fn release(&self) {
        let previous = match self.state.try_borrow_mut() {
            Ok(mut state) => std::mem::replace(&mut *state, SessionState::Released),
            Err(_) => return,
        };
        if let SessionState::Open {
            conn,
            in_transaction,
        } = previous
        {
            // Returning a connection to the pool spawns onto the runtime.
            let _guard = self.runtime.enter();
            if in_transaction {
                warn!("Releasing a connection with an open transaction; closing it");
                drop(conn.detach());
            } else {
                drop(conn);
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.inner.dialect)
            .field("open", &self.is_open())
            .finish()
    }
}
