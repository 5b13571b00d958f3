//! Entity mapping: how a Rust type maps onto one table.

use crate::config::Dialect;
use crate::error::{Error, Result};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::Any;
use std::collections::HashSet;

/// Generated primary key of every entity.
pub type EntityId = i64;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql_type(self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Integer, Dialect::Sqlite) => "INTEGER",
            (ColumnType::Integer, _) => "BIGINT",
            (ColumnType::Real, dialect) => dialect.double_type(),
            (ColumnType::Text, Dialect::MySql) => "VARCHAR(512)",
            (ColumnType::Text, _) => "TEXT",
        }
    }
}

/// A non-key column of an entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Binds `value`, typing a null after `hint` when known.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
    hint: Option<ColumnType>,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Integer(v) => query.bind(*v),
        Value::Real(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Null => match hint {
            Some(ColumnType::Text) => query.bind(None::<String>),
            Some(ColumnType::Real) => query.bind(None::<f64>),
            Some(ColumnType::Integer) | None => query.bind(None::<i64>),
        },
    }
}

/// A Rust type stored as one row of one table.
///
/// # Examples
///
/// ```rust
/// use sqlx::any::AnyRow;
/// use sqlx::Row;
/// use sqlx_thread_transaction::{Column, Entity, EntityId, Value};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Company {
///     id: Option<EntityId>,
///     name: String,
/// }
///
/// impl Entity for Company {
///     const TABLE: &'static str = "company";
///     const COLUMNS: &'static [Column] = &[Column::text("name")];
///
///     fn id(&self) -> Option<EntityId> {
///         self.id
///     }
///
///     fn set_id(&mut self, id: EntityId) {
///         self.id = Some(id);
///     }
///
///     fn values(&self) -> Vec<Value> {
///         vec![Value::from(self.name.as_str())]
///     }
///
///     fn from_row(row: &AnyRow) -> sqlx_thread_transaction::Result<Self> {
///         Ok(Self {
///             id: Some(row.try_get("id")?),
///             name: row.try_get("name")?,
///         })
///     }
/// }
/// ```
pub trait Entity: Sized + 'static {
    /// Table holding the entity.
    const TABLE: &'static str;
    /// Generated primary key column.
    const ID_COLUMN: &'static str = "id";
    /// Non-key columns, in the order of [`Entity::values`].
    const COLUMNS: &'static [Column];

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: EntityId);

    /// Column values in the order of [`Entity::COLUMNS`].
    fn values(&self) -> Vec<Value>;

    fn from_row(row: &AnyRow) -> Result<Self>;

    /// Whether `save` should update rather than insert.
    fn has_id(&self) -> bool {
        self.id().is_some()
    }

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            type_name: std::any::type_name::<Self>(),
            table: Self::TABLE,
            id_column: Self::ID_COLUMN,
            columns: Self::COLUMNS,
        }
    }
}

/// Runtime description of an entity, registered with the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub type_name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [Column],
}

impl EntityDescriptor {
    /// Checks that the descriptor maps onto a table.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidEntity {
            entity: self.type_name,
            reason,
        };

        if !is_identifier(self.table) {
            return Err(invalid(format!("'{}' is not a valid table name", self.table)));
        }
        if !is_identifier(self.id_column) {
            return Err(invalid(format!(
                "'{}' is not a valid id column name",
                self.id_column
            )));
        }
        if self.columns.is_empty() {
            return Err(invalid("no columns declared".to_string()));
        }

        let mut seen = HashSet::new();
        seen.insert(self.id_column.to_ascii_lowercase());
        for column in self.columns {
            if !is_identifier(column.name) {
                return Err(invalid(format!(
                    "'{}' is not a valid column name",
                    column.name
                )));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(invalid(format!("column '{}' declared twice", column.name)));
            }
        }
        Ok(())
    }

    /// The column named `name`, if the entity has one.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether `name` is the id or a declared column.
    pub fn has_field(&self, name: &str) -> bool {
        self.id_column.eq_ignore_ascii_case(name) || self.column(name).is_some()
    }

    /// `id, col1, col2, ...`
    pub(crate) fn select_list(&self) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns.iter().map(|c| c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn create_table_sql(&self, dialect: Dialect) -> String {
        let id = match dialect {
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.id_column),
            Dialect::Postgres => format!("{} BIGSERIAL PRIMARY KEY", self.id_column),
            Dialect::MySql => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", self.id_column),
        };
        let mut definitions = vec![id];
        for column in self.columns {
            let null = if column.nullable { "" } else { " NOT NULL" };
            definitions.push(format!(
                "{} {}{}",
                column.name,
                column.column_type.sql_type(dialect),
                null
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            definitions.join(", ")
        )
    }

    pub(crate) fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table)
    }

    pub(crate) fn existence_check_sql(&self) -> String {
        format!("SELECT {} FROM {} WHERE 1 = 0", self.select_list(), self.table)
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPANY: EntityDescriptor = EntityDescriptor {
        type_name: "Company",
        table: "company",
        id_column: "id",
        columns: &[Column::text("name"), Column::real("revenue").nullable()],
    };

    #[test]
    fn test_valid_descriptor() {
        assert!(COMPANY.validate().is_ok());
        assert!(COMPANY.has_field("ID"));
        assert!(COMPANY.has_field("revenue"));
        assert!(!COMPANY.has_field("owner"));
        assert_eq!(COMPANY.select_list(), "id, name, revenue");
    }

    #[test]
    fn test_invalid_descriptors() {
        let bad_table = EntityDescriptor {
            table: "company; DROP TABLE x",
            ..COMPANY
        };
        assert!(matches!(
            bad_table.validate(),
            Err(Error::InvalidEntity { entity: "Company", .. })
        ));

        let no_columns = EntityDescriptor {
            columns: &[],
            ..COMPANY
        };
        assert!(no_columns.validate().is_err());

        let duplicate = EntityDescriptor {
            columns: const { &[Column::text("name"), Column::text("NAME")] },
            ..COMPANY
        };
        assert!(duplicate.validate().is_err());

        let repeats_id = EntityDescriptor {
            columns: const { &[Column::integer("id")] },
            ..COMPANY
        };
        assert!(repeats_id.validate().is_err());
    }

    #[test]
    fn test_create_table_per_dialect() {
        assert_eq!(
            COMPANY.create_table_sql(Dialect::Sqlite),
            "CREATE TABLE IF NOT EXISTS company (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, revenue REAL)"
        );
        assert_eq!(
            COMPANY.create_table_sql(Dialect::Postgres),
            "CREATE TABLE IF NOT EXISTS company (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, revenue DOUBLE PRECISION)"
        );
        assert!(COMPANY
            .create_table_sql(Dialect::MySql)
            .contains("name VARCHAR(512) NOT NULL"));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(3), Value::Integer(3));
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("employee_2"));
        assert!(is_identifier("_hidden"));
        assert!(!is_identifier("2nd"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
