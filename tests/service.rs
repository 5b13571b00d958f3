mod common;

use common::{config, count, setup, Company, Employee};
use sqlx_thread_transaction::{
    DatabaseService, DatabaseServiceConfiguration, Dialect, Entity, Error, Filter, Repository,
    SchemaAction, Value,
};
use std::sync::Arc;

fn service_with(dir: &tempfile::TempDir, action: SchemaAction) -> DatabaseService {
    let mut config = config(dir);
    config.schema_action = action;
    DatabaseService::new(config).unwrap()
}

#[test]
fn test_initialize_registers_entities() {
    let db = setup();

    assert!(db.service.is_ready());
    assert_eq!(db.service.dialect().unwrap(), Dialect::Sqlite);
    let tables: Vec<_> = db.service.entities().iter().map(|e| e.table).collect();
    assert_eq!(tables, vec!["company", "employee"]);
}

#[test]
fn test_initialize_twice_fails() {
    let db = setup();
    let err = db.service.initialize(&[]).unwrap_err();
    assert!(matches!(err, Error::InitializationFailed { .. }));
    assert!(db.service.is_ready());
}

#[test]
fn test_repository_requires_registered_entity() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(service_with(&dir, SchemaAction::Create));
    service.initialize(&[Company::descriptor()]).unwrap();

    let employees = Repository::<Employee>::new(Arc::clone(&service));
    for err in [
        employees.find_all().unwrap_err(),
        employees.count_by_criteria(Filter::all()).unwrap_err(),
        employees
            .save(Employee::new("Ann", None, 1_000.0))
            .unwrap_err(),
    ] {
        assert!(
            matches!(err.cause(), Some(Error::InvalidEntity { .. })),
            "unexpected error: {err}"
        );
    }

    let companies = Repository::<Company>::new(Arc::clone(&service));
    assert!(companies.find_all().unwrap().is_empty());
}

#[test]
fn test_validate_requires_existing_tables() {
    let dir = tempfile::tempdir().unwrap();

    let validating = service_with(&dir, SchemaAction::Validate);
    let err = validating.initialize(&[Company::descriptor()]).unwrap_err();
    assert!(matches!(err, Error::InitializationFailed { .. }));
    assert!(!validating.is_ready());

    let updating = service_with(&dir, SchemaAction::Update);
    updating.initialize(&[Company::descriptor()]).unwrap();
    updating.shutdown();

    let validating = service_with(&dir, SchemaAction::Validate);
    validating.initialize(&[Company::descriptor()]).unwrap();
    assert!(validating.is_ready());
}

#[test]
fn test_update_keeps_existing_rows() {
    let dir = tempfile::tempdir().unwrap();

    let first = service_with(&dir, SchemaAction::Update);
    first.initialize(&[Company::descriptor()]).unwrap();
    first
        .run_in_thread_transaction(|session| {
            session.execute(
                "INSERT INTO company (name) VALUES (?)",
                &[Value::from("Acme")],
            )
        })
        .unwrap();
    first.shutdown();

    let second = service_with(&dir, SchemaAction::Update);
    second.initialize(&[Company::descriptor()]).unwrap();
    assert_eq!(count(&second, "company"), 1);
}

#[test]
fn test_create_drop_removes_tables_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();

    let service = service_with(&dir, SchemaAction::CreateDrop);
    service
        .initialize(&[Company::descriptor(), Employee::descriptor()])
        .unwrap();
    assert_eq!(count(&service, "employee"), 0);
    service.shutdown();
    service.shutdown();

    let validating = service_with(&dir, SchemaAction::Validate);
    assert!(validating.initialize(&[Company::descriptor()]).is_err());
}

#[test]
fn test_run_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("1_create_note.sql"),
        "CREATE TABLE note (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
    )
    .unwrap();

    let mut config = config(&dir);
    config.schema_action = SchemaAction::None;
    config.migration_changelog_path = migrations.display().to_string();
    let service = DatabaseService::new(config).unwrap();
    service.initialize(&[]).unwrap();

    service.run_migrations().unwrap();
    // Already applied migrations are skipped
    service.run_migrations().unwrap();

    service
        .run_in_thread_transaction(|session| {
            session.execute("INSERT INTO note (body) VALUES (?)", &[Value::from("hello")])
        })
        .unwrap();
    assert_eq!(count(&service, "note"), 1);
}

#[test]
fn test_configuration_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.toml");
    std::fs::write(
        &path,
        r#"
url = "sqlite://app.db"
debug_sql = true
max_connections = 3
schema_action = "create_drop"
"#,
    )
    .unwrap();

    let config = DatabaseServiceConfiguration::load(&path).unwrap();
    assert_eq!(config.url, "sqlite://app.db");
    assert!(config.debug_sql);
    assert_eq!(config.max_connections, 3);
    assert_eq!(config.schema_action, SchemaAction::CreateDrop);
    assert_eq!(config.min_idle_connections, 1);
    assert!(config.validate().is_ok());

    assert!(matches!(
        DatabaseServiceConfiguration::load(dir.path().join("missing.toml")),
        Err(Error::InvalidConfiguration(_))
    ));
}
