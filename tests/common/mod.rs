#![allow(dead_code)]

use sqlx::any::AnyRow;
use sqlx::Row;
use sqlx_thread_transaction::{
    Column, DatabaseService, DatabaseServiceConfiguration, Entity, EntityId, Result, SchemaAction,
    TransactionHooks, Value,
};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: Option<EntityId>,
    pub name: String,
    pub revenue: Option<f64>,
}

impl Company {
    pub fn new(name: &str, revenue: Option<f64>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            revenue,
        }
    }
}

impl Entity for Company {
    const TABLE: &'static str = "company";
    const COLUMNS: &'static [Column] = &[Column::text("name"), Column::real("revenue").nullable()];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(self.name.as_str()), Value::from(self.revenue)]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: Some(row.try_get("id")?),
            name: row.try_get("name")?,
            revenue: row.try_get("revenue")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub id: Option<EntityId>,
    pub name: String,
    pub company_id: Option<EntityId>,
    pub salary: f64,
}

impl Employee {
    pub fn new(name: &str, company_id: Option<EntityId>, salary: f64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            company_id,
            salary,
        }
    }
}

impl Entity for Employee {
    const TABLE: &'static str = "employee";
    const COLUMNS: &'static [Column] = &[
        Column::text("name"),
        Column::integer("company_id").nullable(),
        Column::real("salary"),
    ];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.name.as_str()),
            Value::from(self.company_id),
            Value::from(self.salary),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: Some(row.try_get("id")?),
            name: row.try_get("name")?,
            company_id: row.try_get("company_id")?,
            salary: row.try_get("salary")?,
        })
    }
}

/// A service over a SQLite file that lives as long as the returned directory.
pub struct TestDb {
    pub service: Arc<DatabaseService>,
    pub dir: TempDir,
}

impl TestDb {
    pub fn url(&self) -> String {
        sqlite_url(&self.dir)
    }
}

pub fn sqlite_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display())
}

pub fn config(dir: &TempDir) -> DatabaseServiceConfiguration {
    let mut config = DatabaseServiceConfiguration::new(sqlite_url(dir));
    config.schema_action = SchemaAction::Create;
    config.max_connections = 4;
    config
}

pub fn setup() -> TestDb {
    setup_with_hooks(TransactionHooks::default())
}

pub fn setup_with_hooks(hooks: TransactionHooks) -> TestDb {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().expect("temp dir");
    let service = DatabaseService::new(config(&dir))
        .expect("service")
        .with_hooks(hooks);
    service
        .initialize(&[Company::descriptor(), Employee::descriptor()])
        .expect("initialize");
    TestDb {
        service: Arc::new(service),
        dir,
    }
}

pub fn count(service: &DatabaseService, table: &str) -> i64 {
    service
        .run_in_thread_transaction(|session| {
            session.fetch_scalar::<i64>(&format!("SELECT COUNT(*) FROM {}", table), &[])
        })
        .expect("count")
}
