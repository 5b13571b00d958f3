//! Generic CRUD over one entity type.
//!
//! Every operation runs through [`DatabaseService::run_in_thread_transaction`],
//! so called inside a unit of work it joins that transaction, and called on
//! its own it runs in a transaction of its own.

use crate::config::Dialect;
use crate::entity::{bind_value, ColumnType, Entity, EntityDescriptor, EntityId, Value};
use crate::error::{Error, Result};
use crate::service::DatabaseService;
use crate::session::Session;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Like => "LIKE",
        }
    }
}

/// Criteria restricting the rows a query sees.
///
/// # Examples
///
/// ```rust
/// use sqlx_thread_transaction::Filter;
///
/// let filter = Filter::eq("name", "Acme").or(Filter::gt("revenue", 1_000.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Compare {
        column: String,
        op: Comparison,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Filter::All
    }

    /// Compares `column` with `value` using `op`.
    ///
    /// Comparing with [`Value::Null`] through `Eq` or `Ne` renders `IS NULL` /
    /// `IS NOT NULL`.
    pub fn compare(column: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Eq, value)
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Ne, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Ge, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparison::Le, value)
    }

    /// SQL `LIKE` with `%` and `_` wildcards.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(column, Comparison::Like, Value::Text(pattern.into()))
    }

    /// Matches rows where `column` is NULL.
    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    /// Matches rows where `column` is not NULL.
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::IsNotNull(column.into())
    }

    /// Both filters must match. Chained calls flatten into one group.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    /// Either filter must match. Chained calls flatten into one group.
    ///
    /// An empty `Or` group matches nothing.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    /// Negates the filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Renders the filter as a `WHERE` condition, appending bound values to `params`.
    pub(crate) fn render(
        &self,
        entity: &EntityDescriptor,
        dialect: Dialect,
        params: &mut Vec<(Value, Option<ColumnType>)>,
    ) -> Result<String> {
        let checked = |column: &str| -> Result<String> {
            if entity.has_field(column) {
                Ok(column.to_string())
            } else {
                Err(Error::UnknownColumn {
                    table: entity.table,
                    column: column.to_string(),
                })
            }
        };

        Ok(match self {
            Filter::All => "1 = 1".to_string(),
            Filter::Compare { column, op, value } => {
                let column = checked(column)?;
                match (op, value) {
                    (Comparison::Eq, Value::Null) => format!("{} IS NULL", column),
                    (Comparison::Ne, Value::Null) => format!("{} IS NOT NULL", column),
                    _ => {
                        let hint = entity.column(&column).map(|c| c.column_type);
                        params.push((value.clone(), hint));
                        format!("{} {} {}", column, op.sql(), dialect.placeholder(params.len()))
                    }
                }
            }
            Filter::IsNull(column) => format!("{} IS NULL", checked(column)?),
            Filter::IsNotNull(column) => format!("{} IS NOT NULL", checked(column)?),
            Filter::And(parts) if parts.is_empty() => "1 = 1".to_string(),
            Filter::Or(parts) if parts.is_empty() => "1 = 0".to_string(),
            Filter::And(parts) => join(parts, " AND ", entity, dialect, params)?,
            Filter::Or(parts) => join(parts, " OR ", entity, dialect, params)?,
            Filter::Not(inner) => format!("NOT ({})", inner.render(entity, dialect, params)?),
        })
    }
}

fn join(
    parts: &[Filter],
    separator: &str,
    entity: &EntityDescriptor,
    dialect: Dialect,
    params: &mut Vec<(Value, Option<ColumnType>)>,
) -> Result<String> {
    let rendered = parts
        .iter()
        .map(|part| part.render(entity, dialect, params).map(|sql| format!("({})", sql)))
        .collect::<Result<Vec<_>>>()?;
    Ok(rendered.join(separator))
}

/// Repository handling database operations for one entity type.
///
/// # Examples
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use sqlx_thread_transaction::{DatabaseService, Entity, Filter, Repository};
/// # fn example<Company: Entity>(service: Arc<DatabaseService>, company: Company) -> sqlx_thread_transaction::Result<()> {
/// let companies = Repository::<Company>::new(service);
///
/// let saved = companies.save(company)?;
/// let found = companies.find_by_id(saved.id().unwrap())?;
/// let acme = companies.find_by_criteria(Filter::eq("name", "Acme"))?;
/// # Ok(())
/// # }
/// ```
pub struct Repository<E: Entity> {
    service: Arc<DatabaseService>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &E::TABLE)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    /// Creates a repository over `service`.
    ///
    /// `E` must be among the entities passed to [`DatabaseService::initialize`];
    /// otherwise every operation fails with [`Error::InvalidEntity`].
    pub fn new(service: Arc<DatabaseService>) -> Self {
        Self {
            service,
            _marker: PhantomData,
        }
    }

    /// The service the repository runs its units of work on.
    pub fn service(&self) -> &Arc<DatabaseService> {
        &self.service
    }

    fn entity(&self) -> Result<EntityDescriptor> {
        self.service.registered_entity::<E>()
    }

    /// Finds every row of the table.
    pub fn find_all(&self) -> Result<Vec<E>> {
        self.find_by_criteria(Filter::All)
    }

    /// Finds an entity by its id.
    pub fn find_by_id(&self, id: EntityId) -> Result<Option<E>> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = {}",
                entity.select_list(),
                entity.table,
                entity.id_column,
                session.dialect().placeholder(1)
            );
            session
                .fetch_optional(&sql, &[Value::Integer(id)])?
                .map(|row| E::from_row(&row))
                .transpose()
        })
    }

    /// Finds every entity matching `filter`.
    pub fn find_by_criteria(&self, filter: Filter) -> Result<Vec<E>> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let mut params = Vec::new();
            let condition = filter.render(&entity, session.dialect(), &mut params)?;
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {}",
                entity.select_list(),
                entity.table,
                condition,
                entity.id_column
            );
            fetch_rows(session, sql, params)?
                .iter()
                .map(E::from_row)
                .collect()
        })
    }

    /// Finds one page of the entities matching `filter`, ordered by id.
    pub fn find_by_criteria_paged(
        &self,
        page_index: u32,
        page_size: u32,
        filter: Filter,
    ) -> Result<Vec<E>> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let mut params = Vec::new();
            let condition = filter.render(&entity, session.dialect(), &mut params)?;
            // Clamped to the largest offset SQL accepts.
            let offset = i64::try_from(u64::from(page_index) * u64::from(page_size))
                .unwrap_or(i64::MAX);
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                entity.select_list(),
                entity.table,
                condition,
                entity.id_column,
                page_size,
                offset
            );
            fetch_rows(session, sql, params)?
                .iter()
                .map(E::from_row)
                .collect()
        })
    }

    /// Counts the entities matching `filter`.
    pub fn count_by_criteria(&self, filter: Filter) -> Result<i64> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let mut params = Vec::new();
            let condition = filter.render(&entity, session.dialect(), &mut params)?;
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", entity.table, condition);
            let row = fetch_one_row(session, sql, params)?;
            Ok(row.try_get::<i64, _>(0)?)
        })
    }

    /// Sums `field` over the entities matching `filter`; 0.0 when none match.
    pub fn sum_by_criteria(&self, filter: Filter, field: &str) -> Result<f64> {
        self.aggregate("SUM", filter, field)
    }

    /// Maximum of `field` over the entities matching `filter`; 0.0 when none match.
    pub fn max_by_criteria(&self, filter: Filter, field: &str) -> Result<f64> {
        self.aggregate("MAX", filter, field)
    }

    fn aggregate(&self, function: &str, filter: Filter, field: &str) -> Result<f64> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let field = checked_field(&entity, field)?;
            let mut params = Vec::new();
            let condition = filter.render(&entity, session.dialect(), &mut params)?;
            let sql = format!(
                "SELECT CAST({}({}) AS {}) FROM {} WHERE {}",
                function,
                field,
                session.dialect().double_type(),
                entity.table,
                condition
            );
            let row = fetch_one_row(session, sql, params)?;
            Ok(row.try_get::<Option<f64>, _>(0)?.unwrap_or(0.0))
        })
    }

    /// Values of the integer column `field` for the entities matching `filter`,
    /// ordered by id. NULLs are kept as `None`.
    pub fn long_values_by_criteria(
        &self,
        filter: Filter,
        field: &str,
    ) -> Result<Vec<Option<i64>>> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let field = checked_field(&entity, field)?;
            let mut params = Vec::new();
            let condition = filter.render(&entity, session.dialect(), &mut params)?;
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {}",
                field, entity.table, condition, entity.id_column
            );
            fetch_rows(session, sql, params)?
                .iter()
                .map(|row| Ok(row.try_get::<Option<i64>, _>(0)?))
                .collect()
        })
    }

    /// Inserts the entity when it has no id, updates it otherwise.
    pub fn save(&self, entity: E) -> Result<E> {
        if entity.has_id() {
            self.update(entity)
        } else {
            self.insert(entity)
        }
    }

    /// Saves every entity in one transaction.
    pub fn save_all(&self, entities: Vec<E>) -> Result<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        self.service.run_in_thread_transaction(|_| {
            entities.into_iter().map(|entity| self.save(entity)).collect()
        })
    }

    /// Inserts the entity and assigns its generated id.
    pub fn insert(&self, mut entity: E) -> Result<E> {
        self.service.run_in_thread_transaction(|session| {
            let id = insert_row(session, &self.entity()?, entity.values())?;
            entity.set_id(id);
            Ok(entity)
        })
    }

    /// Inserts every entity in one transaction.
    pub fn insert_all(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.service.run_in_thread_transaction(|_| {
            entities.into_iter().map(|entity| self.insert(entity)).collect()
        })
    }

    /// Writes every column of an existing entity.
    ///
    /// # Errors
    ///
    /// `MissingId` without an id, `EntityNotFound` when no row has that id.
    pub fn update(&self, entity: E) -> Result<E> {
        let id = entity.id().ok_or(Error::MissingId(E::TABLE))?;
        self.service.run_in_thread_transaction(|session| {
            let descriptor = self.entity()?;
            let dialect = session.dialect();
            let assignments = descriptor
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = {}", c.name, dialect.placeholder(i + 1)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = {}",
                descriptor.table,
                assignments,
                descriptor.id_column,
                dialect.placeholder(descriptor.columns.len() + 1)
            );
            let mut params = typed_values(&descriptor, entity.values());
            params.push((Value::Integer(id), Some(ColumnType::Integer)));
            let affected = execute_typed(session, sql, params)?;
            if affected == 0 {
                return Err(Error::EntityNotFound {
                    table: descriptor.table,
                    id,
                });
            }
            Ok(entity)
        })
    }

    /// Updates every entity in one transaction.
    pub fn update_all(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.service.run_in_thread_transaction(|_| {
            entities.into_iter().map(|entity| self.update(entity)).collect()
        })
    }

    /// Deletes the row of a persisted entity.
    pub fn delete(&self, entity: &E) -> Result<()> {
        let id = entity.id().ok_or(Error::MissingId(E::TABLE))?;
        self.delete_by_id(id)
    }

    /// Deletes every entity in one transaction.
    pub fn delete_all(&self, entities: &[E]) -> Result<()> {
        self.service.run_in_thread_transaction(|_| {
            entities.iter().try_for_each(|entity| self.delete(entity))
        })
    }

    /// Deletes the row with `id`, if any.
    pub fn delete_by_id(&self, id: EntityId) -> Result<()> {
        self.service.run_in_thread_transaction(|session| {
            let entity = self.entity()?;
            let sql = format!(
                "DELETE FROM {} WHERE {} = {}",
                entity.table,
                entity.id_column,
                session.dialect().placeholder(1)
            );
            session.execute(&sql, &[Value::Integer(id)])?;
            Ok(())
        })
    }
}

fn checked_field(entity: &EntityDescriptor, field: &str) -> Result<String> {
    if entity.has_field(field) {
        Ok(field.to_string())
    } else {
        Err(Error::UnknownColumn {
            table: entity.table,
            column: field.to_string(),
        })
    }
}

fn typed_values(entity: &EntityDescriptor, values: Vec<Value>) -> Vec<(Value, Option<ColumnType>)> {
    values
        .into_iter()
        .zip(entity.columns.iter().map(|c| Some(c.column_type)))
        .collect()
}

fn insert_row(session: &Session, entity: &EntityDescriptor, values: Vec<Value>) -> Result<EntityId> {
    if values.len() != entity.columns.len() {
        return Err(Error::InvalidEntity {
            entity: entity.type_name,
            reason: format!(
                "{} values for {} columns",
                values.len(),
                entity.columns.len()
            ),
        });
    }
    let dialect = session.dialect();
    let columns = entity
        .columns
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=entity.columns.len())
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity.table, columns, placeholders
    );
    let params = typed_values(entity, values);

    if dialect.supports_returning() {
        sql.push_str(&format!(" RETURNING {}", entity.id_column));
        let row = fetch_one_row(session, sql, params)?;
        return Ok(row.try_get::<i64, _>(0)?);
    }

    session.log_statement(&sql);
    session.with_connection(move |conn| {
        Box::pin(async move {
            let mut query = sqlx::query(&sql);
            for (value, hint) in &params {
                query = bind_value(query, value, *hint);
            }
            let result = query.execute(conn).await?;
            result
                .last_insert_id()
                .ok_or_else(|| {
                    Error::Database(sqlx::Error::Protocol(
                        "driver did not report the generated id".to_string(),
                    ))
                })
        })
    })
}

fn execute_typed(
    session: &Session,
    sql: String,
    params: Vec<(Value, Option<ColumnType>)>,
) -> Result<u64> {
    session.log_statement(&sql);
    session.with_connection(move |conn| {
        Box::pin(async move {
            let mut query = sqlx::query(&sql);
            for (value, hint) in &params {
                query = bind_value(query, value, *hint);
            }
            Ok(query.execute(conn).await?.rows_affected())
        })
    })
}

fn fetch_rows(
    session: &Session,
    sql: String,
    params: Vec<(Value, Option<ColumnType>)>,
) -> Result<Vec<AnyRow>> {
    session.log_statement(&sql);
    session.with_connection(move |conn| {
        Box::pin(async move {
            let mut query = sqlx::query(&sql);
            for (value, hint) in &params {
                query = bind_value(query, value, *hint);
            }
            Ok(query.fetch_all(conn).await?)
        })
    })
}

fn fetch_one_row(
    session: &Session,
    sql: String,
    params: Vec<(Value, Option<ColumnType>)>,
) -> Result<AnyRow> {
    session.log_statement(&sql);
    session.with_connection(move |conn| {
        Box::pin(async move {
            let mut query = sqlx::query(&sql);
            for (value, hint) in &params {
                query = bind_value(query, value, *hint);
            }
            Ok(query.fetch_one(conn).await?)
        })
    })
}
