use crate::error::{ActionPhase, BoxError, Error, Result};
use crate::session::Session;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Deferred callback run after the transaction's outcome is known.
pub type Action = Box<dyn FnOnce() -> std::result::Result<(), BoxError>>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Rc<TransactionContext>>> = const { RefCell::new(None) };
}

/// Identity of a transaction context, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        ContextId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    NotBegun,
    Active,
    Committed,
    RolledBack,
}

/// The transactional state of one outermost unit of work on one thread.
///
/// A context is registered for the calling thread when an outermost unit of
/// work starts and removed when it finishes. Every nested unit of work on the
/// same thread sees the same context, hence the same session and transaction.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_thread_transaction::context;
/// # use sqlx_thread_transaction::DatabaseService;
///
/// # fn example(service: &DatabaseService) -> sqlx_thread_transaction::Result<()> {
/// service.run_in_thread_transaction(|_session| {
///     context::add_post_commit_action(|| {
///         println!("order placed");
///         Ok(())
///     })?;
///     Ok(())
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct TransactionContext {
    id: ContextId,
    session: Session,
    transaction: RefCell<TransactionState>,
    post_commit_actions: RefCell<Vec<Action>>,
    post_rollback_actions: RefCell<Vec<Action>>,
}

impl TransactionContext {
    /// Identity of this context, also carried by `TransactionFailed`.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The session every nested unit of work on this thread shares.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether a transaction has been begun and not yet finished.
    pub fn is_transaction_active(&self) -> bool {
        *self.transaction.borrow() == TransactionState::Active
    }

    /// Begins the transaction unless it is already active.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConsumed` once the transaction was committed or rolled back.
    pub fn begin_transaction(&self) -> Result<()> {
        let state = *self.transaction.borrow();
        match state {
            TransactionState::NotBegun => {
                self.session.begin()?;
                *self.transaction.borrow_mut() = TransactionState::Active;
                Ok(())
            }
            TransactionState::Active => Ok(()),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(Error::AlreadyConsumed)
            }
        }
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveTransaction` if none was begun and `AlreadyConsumed` if
    /// it already finished. A failed commit leaves the transaction active so it
    /// can still be rolled back.
    pub fn commit(&self) -> Result<()> {
        self.finish(TransactionState::Committed)
    }

    /// Rolls the transaction back. Same errors as [`TransactionContext::commit`].
    pub fn rollback(&self) -> Result<()> {
        self.finish(TransactionState::RolledBack)
    }

    fn finish(&self, outcome: TransactionState) -> Result<()> {
        let state = *self.transaction.borrow();
        match state {
            TransactionState::NotBegun => Err(Error::NoActiveTransaction(self.id)),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(Error::AlreadyConsumed)
            }
            TransactionState::Active => {
                if outcome == TransactionState::Committed {
                    self.session.commit()?;
                } else {
                    self.session.rollback()?;
                }
                *self.transaction.borrow_mut() = outcome;
                Ok(())
            }
        }
    }

    /// Queues `action` to run after a successful commit.
    ///
    /// Actions are dropped unrun when the transaction rolls back.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sqlx_thread_transaction::{context, DatabaseService};
    /// # fn example(service: &DatabaseService) -> sqlx_thread_transaction::Result<()> {
    /// service.run_in_thread_transaction_empty(|_session| {
    ///     context::current()?.add_post_commit_action(|| {
    ///         println!("order stored");
    ///         Ok(())
    ///     });
    ///     Ok(())
    /// })
    /// # }
    /// ```
    pub fn add_post_commit_action<F>(&self, action: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
    {
        self.post_commit_actions.borrow_mut().push(Box::new(action));
    }

    /// Queues `action` to run after a rollback. Dropped unrun on commit.
    pub fn add_post_rollback_action<F>(&self, action: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
    {
        self.post_rollback_actions.borrow_mut().push(Box::new(action));
    }

    /// Runs the queued post-commit actions once, in insertion order, and empties the queue.
    ///
    /// Every action runs even when an earlier one fails. Failures are logged;
    /// the first one is returned as `ActionFailed`.
    pub fn run_post_commit_actions(&self) -> Result<()> {
        self.run_actions(ActionPhase::PostCommit, &self.post_commit_actions)
    }

    /// Runs the queued post-rollback actions. Same policy as
    /// [`TransactionContext::run_post_commit_actions`].
    pub fn run_post_rollback_actions(&self) -> Result<()> {
        self.run_actions(ActionPhase::PostRollback, &self.post_rollback_actions)
    }

    fn run_actions(&self, phase: ActionPhase, queue: &RefCell<Vec<Action>>) -> Result<()> {
        // Taken up front so actions may queue further actions without a borrow conflict.
        let actions = std::mem::take(&mut *queue.borrow_mut());
        let mut first_failure = None;
        let mut failed = 0;
        for action in actions {
            if let Err(e) = action() {
                error!(context_id = %self.id, %phase, error = %e, "Transaction action failed");
                failed += 1;
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(source) => Err(Error::ActionFailed {
                id: self.id,
                phase,
                failed,
                source,
            }),
            None => Ok(()),
        }
    }

    /// Number of queued (post-commit, post-rollback) actions.
    pub fn pending_actions(&self) -> (usize, usize) {
        (
            self.post_commit_actions.borrow().len(),
            self.post_rollback_actions.borrow().len(),
        )
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (post_commit, post_rollback) = self.pending_actions();
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("transaction", &*self.transaction.borrow())
            .field("post_commit_actions", &post_commit)
            .field("post_rollback_actions", &post_rollback)
            .finish()
    }
}

/// Whether the calling thread has an active context.
pub fn has_current() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// The calling thread's active context.
///
/// # Errors
///
/// Returns `NoActiveContext` outside a managed transaction.
pub fn current() -> Result<Rc<TransactionContext>> {
    try_current().ok_or(Error::NoActiveContext)
}

pub(crate) fn try_current() -> Option<Rc<TransactionContext>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Registers a new context bound to `session` for the calling thread.
///
/// # Errors
///
/// Returns `ContextAlreadyActive` if the thread already has a context.
pub fn initialize_current(session: Session) -> Result<Rc<TransactionContext>> {
    CURRENT.with(|current| {
        let mut slot = current.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Err(Error::ContextAlreadyActive(existing.id));
        }
        let context = Rc::new(TransactionContext {
            id: ContextId::next(),
            session,
            transaction: RefCell::new(TransactionState::NotBegun),
            post_commit_actions: RefCell::new(Vec::new()),
            post_rollback_actions: RefCell::new(Vec::new()),
        });
        *slot = Some(Rc::clone(&context));
        Ok(context)
    })
}

/// Deregisters the calling thread's context. Idempotent.
pub fn clear() {
    // Dropped outside the borrow: the context may own the last session handle.
    let previous = CURRENT.with(|current| current.borrow_mut().take());
    drop(previous);
}

/// Begins the current context's transaction; see [`TransactionContext::begin_transaction`].
pub fn begin_transaction() -> Result<()> {
    current()?.begin_transaction()
}

/// Commits the current context's transaction; see [`TransactionContext::commit`].
pub fn commit() -> Result<()> {
    current()?.commit()
}

/// Rolls back the current context's transaction; see [`TransactionContext::rollback`].
pub fn rollback() -> Result<()> {
    current()?.rollback()
}

/// Queues `action` to run after the current transaction commits.
///
/// # Errors
///
/// Returns `NoActiveContext` outside a managed transaction.
pub fn add_post_commit_action<F>(action: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
{
    current()?.add_post_commit_action(action);
    Ok(())
}

/// Queues `action` to run after the current transaction rolls back.
///
/// # Errors
///
/// Returns `NoActiveContext` outside a managed transaction.
pub fn add_post_rollback_action<F>(action: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
{
    current()?.add_post_rollback_action(action);
    Ok(())
}
