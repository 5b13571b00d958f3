use sqlx_thread_transaction::prelude::*;
use sqlx_thread_transaction::TransactionHooks;

fn count(session: &Session, table: &str) -> Result<i64> {
    session.fetch_scalar(&format!("SELECT COUNT(*) FROM {}", table), &[])
}

fn create_user(service: &DatabaseService, name: &str) -> Result<i64> {
    // Joins the caller's transaction when there is one
    service.run_in_thread_transaction(|session| {
        let sql = format!(
            "INSERT INTO users (name) VALUES ({})",
            session.dialect().placeholder(1)
        );
        session.execute(&sql, &[Value::from(name)])?;
        count(session, "users")
    })
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = DatabaseServiceConfiguration::from_env()
        .unwrap_or_else(|_| DatabaseServiceConfiguration::new("sqlite://nested.db?mode=rwc"));

    let hooks = TransactionHooks::new()
        .after_begin(|ctx| {
            println!("   [hook] transaction {} began", ctx.id());
            Ok(())
        })
        .after_commit(|ctx| {
            println!("   [hook] transaction {} committed", ctx.id());
            Ok(())
        })
        .after_rollback(|ctx| {
            println!("   [hook] transaction {} rolled back", ctx.id());
            Ok(())
        });

    let service = DatabaseService::new(config)?.with_hooks(hooks);
    service.initialize(&[])?;
    service.run_in_thread_transaction(|session| {
        session.execute("DROP TABLE IF EXISTS users", &[])?;
        session.execute("CREATE TABLE users (name VARCHAR(64) NOT NULL)", &[])?;
        Ok(())
    })?;

    println!("=== Nested Unit of Work Example ===\n");

    // Example 1: Nested units of work share one transaction
    println!("1. Nested unit of work - both succeed...");
    service.run_in_thread_transaction(|session| {
        create_user(&service, "David")?;
        println!("   Outer: created David");

        service.run_in_thread_transaction(|nested| {
            assert!(nested.same_session(session));
            create_user(&service, "Eve")?;
            println!("   Nested: created Eve on the same connection");
            Ok(())
        })?;

        println!("   ✓ Both inserts commit together\n");
        Ok(())
    })?;

    // Example 2: A failing nested unit of work rolls back everything
    println!("2. Nested unit of work fails...");
    let result: Result<()> = service.run_in_thread_transaction(|_session| {
        create_user(&service, "Frank")?;
        println!("   Outer: created Frank");

        service.run_in_thread_transaction(|_nested| {
            Err(Error::custom("audit log unavailable"))
        })
    });
    match result {
        Ok(_) => println!("   ✗ Should have failed!"),
        Err(e) => println!("   ✓ Whole transaction rolled back: {}\n", e),
    }

    // Example 3: The nested error can be handled by the outer unit of work
    println!("3. Outer unit of work recovers from a nested error...");
    service.run_in_thread_transaction(|_session| {
        create_user(&service, "Grace")?;
        if let Err(e) = service.run_in_thread_transaction(|_nested| -> Result<()> {
            Err(Error::custom("optional step failed"))
        }) {
            println!("   Nested failed ({}), continuing without savepoint", e);
        }
        Ok(())
    })?;

    let total = service.run_in_thread_transaction(|session| count(session, "users"))?;
    println!("   ✓ Users stored: {} (David, Eve, Grace)\n", total);

    println!("=== All examples completed successfully ===");

    service.shutdown();
    Ok(())
}
