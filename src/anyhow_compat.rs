use crate::context::ContextId;
use crate::executor::UnitFailure;
use crate::service::DatabaseService;
use crate::session::Session;

impl UnitFailure for anyhow::Error {
    fn into_transaction_failure(self, id: ContextId) -> Self {
        self.context(format!("Transaction with ID {} failed", id))
    }
}

impl DatabaseService {
    /// Executes a unit of work within the calling thread's transaction, using
    /// `anyhow::Error` for error handling.
    ///
    /// Same lifecycle as [`DatabaseService::run_in_thread_transaction`]. The
    /// outermost call adds a "Transaction with ID .. failed" context to the
    /// error; the original error stays reachable with `downcast_ref`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx_thread_transaction::{DatabaseService, Value};
    ///
    /// # fn example(service: &DatabaseService) -> anyhow::Result<()> {
    /// service.run_in_thread_transaction_anyhow(|session| {
    ///     let name = std::env::var("USER_NAME")?;
    ///     session.execute("INSERT INTO users (name) VALUES (?)", &[Value::from(name)])?;
    ///     Ok(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn run_in_thread_transaction_anyhow<F, T>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Session) -> anyhow::Result<T>,
    {
        self.run_framed(work)
    }
}
