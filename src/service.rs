use crate::config::{redact_url, DatabaseServiceConfiguration, Dialect, SchemaAction};
use crate::entity::{Entity, EntityDescriptor};
use crate::error::{Error, Result};
use crate::hooks::TransactionHooks;
use crate::session::Session;
use parking_lot::RwLock;
use sqlx::any::AnyPoolOptions;
use sqlx::migrate::Migrator;
use sqlx::{AnyPool, Executor};
use std::path::Path;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

struct Engine {
    pool: AnyPool,
    dialect: Dialect,
    entities: Vec<EntityDescriptor>,
}

/// Owns the connection pool and runs units of work in thread-bound transactions.
///
/// The service is `Send + Sync`; share it between worker threads with an `Arc`.
/// All operations block the calling thread and must not be called from inside
/// an asynchronous runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_thread_transaction::{DatabaseService, DatabaseServiceConfiguration, SchemaAction};
///
/// # fn example() -> sqlx_thread_transaction::Result<()> {
/// let mut config = DatabaseServiceConfiguration::new("sqlite://app.db?mode=rwc");
/// config.schema_action = SchemaAction::Update;
///
/// let service = DatabaseService::new(config)?;
/// service.initialize(&[])?;
/// assert!(service.is_ready());
///
/// service.shutdown();
/// assert!(!service.is_ready());
/// # Ok(())
/// # }
/// ```
pub struct DatabaseService {
    config: DatabaseServiceConfiguration,
    hooks: TransactionHooks,
    runtime: Runtime,
    engine: RwLock<Option<Engine>>,
}

impl DatabaseService {
    /// Creates an uninitialized service.
    ///
    /// # Errors
    ///
    /// Returns `InitializationFailed` when the I/O runtime cannot be started.
    pub fn new(config: DatabaseServiceConfiguration) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sqlx-thread-transaction")
            .enable_all()
            .build()
            .map_err(|e| Error::initialization("cannot start the I/O runtime", e))?;
        Ok(Self {
            config,
            hooks: TransactionHooks::default(),
            runtime,
            engine: RwLock::new(None),
        })
    }

    /// Replaces the lifecycle hooks.
    pub fn with_hooks(mut self, hooks: TransactionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &DatabaseServiceConfiguration {
        &self.config
    }

    pub(crate) fn hooks(&self) -> &TransactionHooks {
        &self.hooks
    }

    /// Connects the pool, registers `entities` and applies the schema action.
    ///
    /// # Errors
    ///
    /// Returns `InitializationFailed` wrapping the cause when the configuration
    /// or an entity is invalid, the pool cannot connect, the schema action
    /// fails, or the service is already initialized.
    pub fn initialize(&self, entities: &[EntityDescriptor]) -> Result<()> {
        info!("Initializing database service...");
        let mut engine = self.engine.write();
        if engine.is_some() {
            return Err(Error::InitializationFailed {
                reason: "service is already initialized".to_string(),
                source: None,
            });
        }

        self.config
            .validate()
            .map_err(|e| Error::initialization("invalid configuration", e))?;
        for entity in entities {
            entity
                .validate()
                .map_err(|e| Error::initialization("invalid entity", e))?;
            self.log_if_enabled(format_args!(
                "Registering entity {} (table {})",
                entity.type_name, entity.table
            ));
        }

        let dialect = self
            .config
            .effective_dialect()
            .map_err(|e| Error::initialization("invalid configuration", e))?;
        if !self.config.use_unicode {
            warn!("use_unicode = false has no effect: SQLx always exchanges UTF-8 text");
        }
        let url = self
            .config
            .connect_url()
            .map_err(|e| Error::initialization("invalid configuration", e))?;

        sqlx::any::install_default_drivers();
        let options = AnyPoolOptions::new()
            .min_connections(self.config.min_idle_connections)
            .max_connections(self.config.max_connections);
        let pool = self
            .runtime
            .block_on(options.connect(&url))
            .map_err(|e| {
                Error::initialization(format!("cannot connect to {}", redact_url(&url)), e)
            })?;

        let new_engine = Engine {
            pool,
            dialect,
            entities: entities.to_vec(),
        };
        if let Err(e) = self.apply_schema_action(&new_engine, self.config.schema_action) {
            self.runtime.block_on(new_engine.pool.close());
            return Err(Error::initialization("schema action failed", e));
        }

        *engine = Some(new_engine);
        info!(dialect = %dialect, "Database service successfully initialized");
        Ok(())
    }

    fn apply_schema_action(&self, engine: &Engine, action: SchemaAction) -> Result<()> {
        let statements: Vec<String> = match action {
            SchemaAction::None => return Ok(()),
            SchemaAction::Validate => {
                for entity in &engine.entities {
                    let check = entity.existence_check_sql();
                    self.runtime
                        .block_on(engine.pool.execute(check.as_str()))
                        .map_err(|e| Error::InitializationFailed {
                            reason: format!("table {} failed validation", entity.table),
                            source: Some(e.into()),
                        })?;
                }
                return Ok(());
            }
            SchemaAction::Update => engine
                .entities
                .iter()
                .map(|e| e.create_table_sql(engine.dialect))
                .collect(),
            SchemaAction::Create | SchemaAction::CreateDrop => engine
                .entities
                .iter()
                .rev()
                .map(EntityDescriptor::drop_table_sql)
                .chain(
                    engine
                        .entities
                        .iter()
                        .map(|e| e.create_table_sql(engine.dialect)),
                )
                .collect(),
        };

        for statement in &statements {
            self.log_if_enabled(format_args!("Schema: {}", statement));
            self.runtime
                .block_on(engine.pool.execute(statement.as_str()))?;
        }
        Ok(())
    }

    /// Runs the SQLx migrations found in `migration_changelog_path`.
    ///
    /// Migrations manage their own transactions and run outside any unit of work.
    pub fn run_migrations(&self) -> Result<()> {
        let pool = self.pool()?;
        let path = Path::new(&self.config.migration_changelog_path);
        info!(path = %path.display(), "Running migrations...");
        self.runtime.block_on(async {
            let migrator = Migrator::new(path).await?;
            migrator.run(&pool).await?;
            Ok::<_, Error>(())
        })?;
        info!("Migrations applied");
        Ok(())
    }

    /// Closes the pool. Idempotent.
    pub fn shutdown(&self) {
        let Some(engine) = self.engine.write().take() else {
            return;
        };
        if self.config.schema_action == SchemaAction::CreateDrop {
            for entity in engine.entities.iter().rev() {
                let statement = entity.drop_table_sql();
                if let Err(e) = self.runtime.block_on(engine.pool.execute(statement.as_str())) {
                    warn!(table = entity.table, error = %e, "Cannot drop table on shutdown");
                }
            }
        }
        self.runtime.block_on(engine.pool.close());
        info!("Database service connection pool closed");
    }

    /// Whether the pool is initialized and open.
    pub fn is_ready(&self) -> bool {
        self.engine
            .read()
            .as_ref()
            .is_some_and(|engine| !engine.pool.is_closed())
    }

    /// Dialect of the initialized pool.
    pub fn dialect(&self) -> Result<Dialect> {
        self.engine
            .read()
            .as_ref()
            .map(|engine| engine.dialect)
            .ok_or(Error::NotReady)
    }

    /// Registered entity descriptors.
    pub fn entities(&self) -> Vec<EntityDescriptor> {
        self.engine
            .read()
            .as_ref()
            .map(|engine| engine.entities.clone())
            .unwrap_or_default()
    }

    /// Descriptor of `E` if it was passed to [`initialize`](Self::initialize).
    pub(crate) fn registered_entity<E: Entity>(&self) -> Result<EntityDescriptor> {
        let engine = self.engine.read();
        let engine = engine.as_ref().ok_or(Error::NotReady)?;
        if !engine.entities.iter().any(|e| e.table == E::TABLE) {
            return Err(Error::InvalidEntity {
                entity: std::any::type_name::<E>(),
                reason: format!("table {} is not registered with the service", E::TABLE),
            });
        }
        Ok(E::descriptor())
    }

    fn pool(&self) -> Result<AnyPool> {
        match self.engine.read().as_ref() {
            Some(engine) if !engine.pool.is_closed() => Ok(engine.pool.clone()),
            _ => Err(Error::NotReady),
        }
    }

    /// Acquires a connection into a new session for the calling thread.
    pub(crate) fn open_session(&self) -> Result<Session> {
        let (pool, dialect) = {
            let engine = self.engine.read();
            match engine.as_ref() {
                Some(engine) if !engine.pool.is_closed() => (engine.pool.clone(), engine.dialect),
                _ => return Err(Error::NotReady),
            }
        };
        Session::open(
            &pool,
            self.runtime.handle().clone(),
            dialect,
            self.config.debug_sql,
        )
    }

    pub(crate) fn log_if_enabled(&self, message: std::fmt::Arguments<'_>) {
        if self.config.debug_sql {
            info!("{}", message);
        }
    }
}

impl Drop for DatabaseService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("ready", &self.is_ready())
            .finish()
    }
}
