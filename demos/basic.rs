use sqlx::any::AnyRow;
use sqlx::Row;
use sqlx_thread_transaction::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct User {
    id: Option<EntityId>,
    name: String,
    email: String,
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [Column] = &[Column::text("name"), Column::text("email")];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(self.name.as_str()), Value::from(self.email.as_str())]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: Some(row.try_get("id")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        })
    }
}

fn user(name: &str) -> User {
    User {
        id: None,
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Reads DATABASE_URL and friends, loading .env first
    let mut config = DatabaseServiceConfiguration::from_env()
        .unwrap_or_else(|_| DatabaseServiceConfiguration::new("sqlite://demo.db?mode=rwc"));
    config.schema_action = SchemaAction::CreateDrop;

    let service = Arc::new(DatabaseService::new(config)?);
    service.initialize(&[User::descriptor()])?;
    let users = Repository::<User>::new(Arc::clone(&service));

    println!("=== Basic Transaction Example ===\n");

    // Example 1: Simple insert
    println!("1. Creating a user...");
    let alice = users.save(user("Alice"))?;
    println!("   ✓ User created with ID {:?}\n", alice.id);

    // Example 2: Several operations in one transaction
    println!("2. Creating two users in one unit of work...");
    let ids = service.run_in_thread_transaction(|_session| {
        let bob = users.save(user("Bob"))?;
        let carol = users.save(user("Carol"))?;
        context::add_post_commit_action(|| {
            println!("   Post-commit: both users are visible now");
            Ok(())
        })?;
        Ok((bob.id, carol.id))
    })?;
    println!("   ✓ Users created with IDs {:?}\n", ids);

    // Example 3: Error handling and automatic rollback
    println!("3. Testing automatic rollback on error...");
    let result: Result<()> = service.run_in_thread_transaction(|session| {
        users.save(user("Charlie"))?;
        context::add_post_rollback_action(|| {
            println!("   Post-rollback: Charlie was discarded");
            Ok(())
        })?;
        // This will cause an error
        session.execute("SELECT * FROM non_existent_table", &[])?;
        Ok(())
    });

    match result {
        Ok(_) => println!("   ✗ Should have failed!"),
        Err(e) => println!("   ✓ Transaction rolled back: {}\n", e),
    }

    // Example 4: Returning values from transactions
    println!("4. Returning values from transaction...");
    let (count, named_c) = service.run_in_thread_transaction(|_session| {
        let count = users.count_by_criteria(Filter::all())?;
        let named_c = users.find_by_criteria(Filter::like("name", "C%"))?;
        Ok((count, named_c.len()))
    })?;
    println!("   Users: {}, named C*: {}\n", count, named_c);

    println!("=== All examples completed successfully ===");

    service.shutdown();
    Ok(())
}
