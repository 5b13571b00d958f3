//! Lifecycle hooks around the phases of an outermost transaction.

use crate::context::TransactionContext;
use crate::error::{BoxError, Error, Result};
use std::fmt;
use std::sync::Arc;

/// A hook callback. It sees the transaction context of the running unit of work.
pub type Hook =
    Arc<dyn Fn(&TransactionContext) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Phase a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeBegin,
    AfterBegin,
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
    AfterTransactionProcessing,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::BeforeBegin => "before_begin",
            HookPoint::AfterBegin => "after_begin",
            HookPoint::BeforeCommit => "before_commit",
            HookPoint::AfterCommit => "after_commit",
            HookPoint::BeforeRollback => "before_rollback",
            HookPoint::AfterRollback => "after_rollback",
            HookPoint::AfterTransactionProcessing => "after_transaction_processing",
        };
        f.write_str(name)
    }
}

/// Optional callbacks invoked by the runner. Unset hooks are no-ops.
///
/// # Examples
///
/// ```rust
/// use sqlx_thread_transaction::TransactionHooks;
///
/// let hooks = TransactionHooks::new()
///     .after_commit(|ctx| {
///         println!("committed {}", ctx.id());
///         Ok(())
///     });
/// ```
#[derive(Clone, Default)]
pub struct TransactionHooks {
    before_begin: Option<Hook>,
    after_begin: Option<Hook>,
    before_commit: Option<Hook>,
    after_commit: Option<Hook>,
    before_rollback: Option<Hook>,
    after_rollback: Option<Hook>,
    after_transaction_processing: Option<Hook>,
}

macro_rules! hook_setter {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub fn $name<F>(mut self, hook: F) -> Self
        where
            F: Fn(&TransactionContext) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
        {
            self.$name = Some(Arc::new(hook));
            self
        }
    };
}

impl TransactionHooks {
    /// Hooks with every phase unset.
    pub fn new() -> Self {
        Self::default()
    }

    hook_setter!(
        /// Runs before `BEGIN`. A failure skips the unit of work and rolls back.
        before_begin
    );
    hook_setter!(
        /// Runs once the transaction is open, before the unit of work.
        after_begin
    );
    hook_setter!(
        /// Runs after the unit of work succeeded. A failure rolls back instead of committing.
        before_commit
    );
    hook_setter!(
        /// Runs after `COMMIT`. A failure is reported, but the data stays committed.
        after_commit
    );
    hook_setter!(
        /// Runs before `ROLLBACK`. Failures are logged.
        before_rollback
    );
    hook_setter!(
        /// Runs after `ROLLBACK`. Failures are logged.
        after_rollback
    );
    hook_setter!(
        /// Runs last on every exit path, panics included, before the context is
        /// cleared. Failures are logged.
        after_transaction_processing
    );

    fn get(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::BeforeBegin => self.before_begin.as_ref(),
            HookPoint::AfterBegin => self.after_begin.as_ref(),
            HookPoint::BeforeCommit => self.before_commit.as_ref(),
            HookPoint::AfterCommit => self.after_commit.as_ref(),
            HookPoint::BeforeRollback => self.before_rollback.as_ref(),
            HookPoint::AfterRollback => self.after_rollback.as_ref(),
            HookPoint::AfterTransactionProcessing => self.after_transaction_processing.as_ref(),
        }
    }

    /// Runs the hook attached to `point`, if any.
    pub(crate) fn run(&self, point: HookPoint, ctx: &TransactionContext) -> Result<()> {
        match self.get(point) {
            Some(hook) => hook(ctx).map_err(|source| Error::Hook { point, source }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for TransactionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |hook: &Option<Hook>| hook.is_some();
        f.debug_struct("TransactionHooks")
            .field("before_begin", &set(&self.before_begin))
            .field("after_begin", &set(&self.after_begin))
            .field("before_commit", &set(&self.before_commit))
            .field("after_commit", &set(&self.after_commit))
            .field("before_rollback", &set(&self.before_rollback))
            .field("after_rollback", &set(&self.after_rollback))
            .field(
                "after_transaction_processing",
                &set(&self.after_transaction_processing),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_lists_configured_hooks() {
        let hooks = TransactionHooks::new().before_commit(|_| Ok(()));
        let debug = format!("{:?}", hooks);
        assert!(debug.contains("before_commit: true"));
        assert!(debug.contains("after_commit: false"));
    }

    #[test]
    fn test_hook_point_names() {
        assert_eq!(
            HookPoint::AfterTransactionProcessing.to_string(),
            "after_transaction_processing"
        );
        assert_eq!(HookPoint::BeforeRollback.to_string(), "before_rollback");
    }
}
