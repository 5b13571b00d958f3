use crate::context::ContextId;
use crate::hooks::HookPoint;
use std::fmt;

/// Boxed error used for application failures, hook failures and callback failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which callback queue an action belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    PostCommit,
    PostRollback,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPhase::PostCommit => f.write_str("post-commit"),
            ActionPhase::PostRollback => f.write_str("post-rollback"),
        }
    }
}

/// Error types for transaction management
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error from SQLx's migrator
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The service could not be initialized; it must not be used afterwards
    #[error("Cannot initialize database service: {reason}")]
    InitializationFailed {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A configuration option is missing or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An entity descriptor does not describe a persistable table
    #[error("Entity {entity} is not a valid persistable entity: {reason}")]
    InvalidEntity { entity: &'static str, reason: String },

    /// The service was never initialized or has been shut down
    #[error("Database service is not ready")]
    NotReady,

    /// A context operation was used outside a managed transaction
    #[error("No transaction context found for the current thread")]
    NoActiveContext,

    /// Commit or rollback was requested before a transaction was begun
    #[error("No transaction found in context {0}")]
    NoActiveTransaction(ContextId),

    /// A second context was about to be registered on the same thread
    #[error("Transaction context {0} is already active on the current thread")]
    ContextAlreadyActive(ContextId),

    /// Transaction has already been consumed (committed or rolled back)
    #[error("Transaction has already been consumed")]
    AlreadyConsumed,

    /// The outermost unit of work failed and its transaction was rolled back
    #[error("Transaction with ID {id} failed: {source}")]
    TransactionFailed {
        id: ContextId,
        #[source]
        source: Box<Error>,
    },

    /// A lifecycle hook returned an error
    #[error("Transaction hook {point} failed: {source}")]
    Hook {
        point: HookPoint,
        #[source]
        source: BoxError,
    },

    /// One or more queued callbacks failed; `source` is the first failure
    #[error("{failed} {phase} action(s) failed in context {id}: {source}")]
    ActionFailed {
        id: ContextId,
        phase: ActionPhase,
        failed: usize,
        #[source]
        source: BoxError,
    },

    /// The session's connection has already been released
    #[error("Session has already been released")]
    SessionClosed,

    /// The session is already running a statement on this thread
    #[error("Session is busy with another statement")]
    SessionBusy,

    /// An update matched no row
    #[error("No row in {table} with id {id}")]
    EntityNotFound { table: &'static str, id: i64 },

    /// The operation needs a persisted entity but the id is absent
    #[error("Entity of table {0} has no id")]
    MissingId(&'static str),

    /// A filter or aggregate named a column the entity does not have
    #[error("Unknown column {column} for table {table}")]
    UnknownColumn { table: &'static str, column: String },

    /// Application failure raised from a unit of work
    #[error(transparent)]
    Custom(BoxError),
}

impl Error {
    /// Wraps an application error so it can be returned from a unit of work.
    pub fn custom<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Custom(error.into())
    }

    /// For `TransactionFailed`, the error that caused the rollback.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Error::TransactionFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The context id carried by `TransactionFailed`.
    pub fn transaction_id(&self) -> Option<ContextId> {
        match self {
            Error::TransactionFailed { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Looks for an application error of type `E`, unwrapping `TransactionFailed`.
    pub fn downcast_custom<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            Error::TransactionFailed { source, .. } => source.downcast_custom(),
            _ => None,
        }
    }

    pub(crate) fn initialization<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::InitializationFailed {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }
}

/// Result type alias for transaction operations
pub type Result<T> = std::result::Result<T, Error>;
