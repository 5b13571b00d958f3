use crate::context::{self, ContextId, TransactionContext};
use crate::error::{Error, Result};
use crate::hooks::HookPoint;
use crate::service::DatabaseService;
use crate::session::Session;
use std::fmt;
use std::rc::Rc;
use tracing::{error, warn};

/// Error type a unit of work may fail with.
///
/// The runner converts its own failures through `From<Error>` and wraps the
/// cause of a rollback with `into_transaction_failure`.
pub(crate) trait UnitFailure: From<Error> + fmt::Display {
    fn into_transaction_failure(self, id: ContextId) -> Self;
}

impl UnitFailure for Error {
    fn into_transaction_failure(self, id: ContextId) -> Self {
        Error::TransactionFailed {
            id,
            source: Box::new(self),
        }
    }
}

impl DatabaseService {
    /// Executes a unit of work within the calling thread's transaction.
    ///
    /// When the thread has no active context, this call owns the transaction:
    /// - Acquires a connection and registers a new context
    /// - Begins a transaction
    /// - Executes the provided function
    /// - Commits on success, then runs the post-commit actions
    /// - Rolls back on error, runs the post-rollback actions and returns
    ///   [`Error::TransactionFailed`] carrying the original error
    /// - Always clears the context and releases the connection
    ///
    /// When a context is already active, the function runs directly against
    /// the existing session: no new transaction, no hooks, and its error is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before `initialize` or after `shutdown`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx_thread_transaction::{DatabaseService, Value};
    ///
    /// # fn example(service: &DatabaseService) -> sqlx_thread_transaction::Result<()> {
    /// let user_id = service.run_in_thread_transaction(|session| {
    ///     let result = session.execute(
    ///         "INSERT INTO users (name) VALUES (?)",
    ///         &[Value::from("Bob")],
    ///     )?;
    ///
    ///     // Joins the same transaction
    ///     service.run_in_thread_transaction(|nested| {
    ///         nested.execute(
    ///             "INSERT INTO audit_log (action) VALUES (?)",
    ///             &[Value::from("User created")],
    ///         )
    ///     })?;
    ///
    ///     Ok(result.last_insert_id())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn run_in_thread_transaction<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        self.run_framed(work)
    }

    /// Variant of [`DatabaseService::run_in_thread_transaction`] for units of work without a result.
    pub fn run_in_thread_transaction_empty<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        self.run_framed(work)
    }

    pub(crate) fn run_framed<F, T, E>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Session) -> std::result::Result<T, E>,
        E: UnitFailure,
    {
        if let Some(ctx) = context::try_current() {
            self.log_if_enabled(format_args!(
                "Running unit of work in current transaction context (ID {})",
                ctx.id()
            ));
            let session = ctx.session().clone();
            drop(ctx);
            return work(&session);
        }

        let session = self.open_session()?;
        let ctx = context::initialize_current(session.clone())?;
        let _scope = ContextScope {
            service: self,
            context: Rc::clone(&ctx),
            session: session.clone(),
        };
        self.log_if_enabled(format_args!(
            "Initialized new transaction context (ID {}); Begin transaction",
            ctx.id()
        ));

        match self.run_to_commit(&ctx, &session, work) {
            Ok(value) => {
                self.log_if_enabled(format_args!(
                    "Running post-commit actions in transaction context (ID {})",
                    ctx.id()
                ));
                ctx.run_post_commit_actions()?;
                Ok(value)
            }
            Err(cause) => {
                self.roll_back(&ctx, &cause);
                Err(cause.into_transaction_failure(ctx.id()))
            }
        }
    }

    fn run_to_commit<F, T, E>(
        &self,
        ctx: &TransactionContext,
        session: &Session,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&Session) -> std::result::Result<T, E>,
        E: UnitFailure,
    {
        let hooks = self.hooks();
        hooks.run(HookPoint::BeforeBegin, ctx)?;
        ctx.begin_transaction()?;
        hooks.run(HookPoint::AfterBegin, ctx)?;

        let value = work(session)?;

        self.log_if_enabled(format_args!(
            "Committing transaction in transaction context (ID {})",
            ctx.id()
        ));
        hooks.run(HookPoint::BeforeCommit, ctx)?;
        ctx.commit()?;
        hooks.run(HookPoint::AfterCommit, ctx)?;
        Ok(value)
    }

    // Failures here are logged; the caller always receives the original cause.
    fn roll_back<E: fmt::Display>(&self, ctx: &TransactionContext, cause: &E) {
        if self.config().log_errors {
            error!(context_id = %ctx.id(), error = %cause, "Rolling back transaction due to error");
        }
        let hooks = self.hooks();
        if let Err(e) = hooks.run(HookPoint::BeforeRollback, ctx) {
            warn!(context_id = %ctx.id(), error = %e, "Hook failed during rollback");
        }
        // Nothing to undo if begin never succeeded or commit already went through.
        if ctx.is_transaction_active() {
            if let Err(e) = ctx.rollback() {
                error!(context_id = %ctx.id(), error = %e, "Rollback failed");
            }
        }
        if let Err(e) = hooks.run(HookPoint::AfterRollback, ctx) {
            warn!(context_id = %ctx.id(), error = %e, "Hook failed during rollback");
        }
        self.log_if_enabled(format_args!(
            "Running post-rollback actions in transaction context (ID {})",
            ctx.id()
        ));
        if let Err(e) = ctx.run_post_rollback_actions() {
            warn!(context_id = %ctx.id(), error = %e, "Post-rollback actions failed");
        }
    }
}

/// Finally-block of an outermost unit of work, run on every exit path including panics.
struct ContextScope<'s> {
    service: &'s DatabaseService,
    context: Rc<TransactionContext>,
    session: Session,
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        let id = self.context.id();
        if let Err(e) = self
            .service
            .hooks()
            .run(HookPoint::AfterTransactionProcessing, &self.context)
        {
            warn!(context_id = %id, error = %e, "after_transaction_processing hook failed");
        }
        context::clear();
        self.session.release();
        self.service.log_if_enabled(format_args!(
            "Cleared transaction context (ID {})",
            id
        ));
    }
}
