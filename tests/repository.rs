mod common;

use common::{setup, Company, Employee};
use sqlx_thread_transaction::{Error, Filter, Repository};
use std::sync::Arc;

#[test]
fn test_company_lifecycle() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));

    // Create
    let created = companies.save(Company::new("Acme", Some(1_500.0))).unwrap();
    let id = created.id.unwrap();
    assert_eq!(companies.find_by_id(id).unwrap(), Some(created.clone()));

    // Update
    let mut found = companies.find_by_id(id).unwrap().unwrap();
    found.name = "Acme Corp".to_string();
    companies.save(found).unwrap();
    assert_eq!(companies.find_by_id(id).unwrap().unwrap().name, "Acme Corp");

    // Rolled-back update
    let result: sqlx_thread_transaction::Result<()> =
        db.service.run_in_thread_transaction(|_session| {
            let mut found = companies.find_by_id(id)?.unwrap();
            found.name = "Never Stored".to_string();
            companies.save(found)?;
            Err(Error::custom("abort"))
        });
    assert!(result.is_err());
    assert_eq!(companies.find_by_id(id).unwrap().unwrap().name, "Acme Corp");

    // Delete
    let current = companies.find_by_id(id).unwrap().unwrap();
    companies.delete(&current).unwrap();
    assert_eq!(companies.find_by_id(id).unwrap(), None);

    // Bulk, one outermost transaction each
    for i in 0..10 {
        companies
            .save(Company::new(&format!("Company {}", i), None))
            .unwrap();
    }
    assert_eq!(companies.find_all().unwrap().len(), 10);
}

#[test]
fn test_batch_operations_share_one_transaction() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));

    let saved = companies
        .save_all(vec![
            Company::new("A", Some(1.0)),
            Company::new("B", Some(2.0)),
            Company::new("C", None),
        ])
        .unwrap();
    assert!(saved.iter().all(|c| c.id.is_some()));

    let renamed: Vec<_> = saved
        .into_iter()
        .map(|mut c| {
            c.name.push('!');
            c
        })
        .collect();
    companies.update_all(renamed.clone()).unwrap();
    assert_eq!(companies.find_all().unwrap(), renamed);

    // A missing row fails the whole batch
    let mut ghost = Company::new("Ghost", None);
    ghost.id = Some(9_999);
    let mut batch = renamed.clone();
    batch[0].name = "Changed".to_string();
    batch.push(ghost);
    let err = companies.update_all(batch).unwrap_err();
    assert!(matches!(
        err.cause(),
        Some(Error::EntityNotFound {
            table: "company",
            id: 9_999
        })
    ));
    assert_eq!(companies.find_all().unwrap(), renamed);

    companies.delete_all(&renamed[..2]).unwrap();
    assert_eq!(companies.find_all().unwrap().len(), 1);

    let inserted = companies
        .insert_all(vec![Company::new("D", None), Company::new("E", None)])
        .unwrap();
    assert_eq!(inserted.len(), 2);
    companies.delete_by_id(inserted[0].id.unwrap()).unwrap();
    assert_eq!(companies.find_all().unwrap().len(), 2);
}

#[test]
fn test_entities_without_id() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));
    let unsaved = Company::new("Draft", None);

    assert!(matches!(
        companies.delete(&unsaved),
        Err(Error::MissingId("company"))
    ));
    assert!(matches!(
        companies.update(unsaved),
        Err(Error::MissingId("company"))
    ));
    assert_eq!(companies.find_by_id(12_345).unwrap(), None);
}

#[test]
fn test_criteria_queries() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));
    let employees = Repository::<Employee>::new(Arc::clone(&db.service));

    let acme = companies.save(Company::new("Acme", None)).unwrap();
    let acme_id = acme.id;
    employees
        .save_all(vec![
            Employee::new("Ann", acme_id, 3_000.0),
            Employee::new("Bob", acme_id, 2_500.5),
            Employee::new("Cid", acme_id, 4_000.0),
            Employee::new("Dee", None, 1_000.0),
        ])
        .unwrap();

    let at_acme = Filter::eq("company_id", acme_id);
    assert_eq!(employees.count_by_criteria(at_acme.clone()).unwrap(), 3);
    assert_eq!(employees.count_by_criteria(Filter::all()).unwrap(), 4);
    assert_eq!(
        employees
            .count_by_criteria(Filter::is_null("company_id"))
            .unwrap(),
        1
    );

    let sum = employees.sum_by_criteria(at_acme.clone(), "salary").unwrap();
    assert!((sum - 9_500.5).abs() < 1e-9);
    let max = employees.max_by_criteria(at_acme.clone(), "salary").unwrap();
    assert!((max - 4_000.0).abs() < 1e-9);

    // Aggregates over no rows
    let nobody = Filter::gt("salary", 1_000_000.0);
    assert_eq!(employees.sum_by_criteria(nobody.clone(), "salary").unwrap(), 0.0);
    assert_eq!(employees.max_by_criteria(nobody, "salary").unwrap(), 0.0);

    let well_paid = employees
        .find_by_criteria(at_acme.clone().and(Filter::ge("salary", 3_000.0)))
        .unwrap();
    let names: Vec<_> = well_paid.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Ann", "Cid"]);

    let not_b = employees
        .find_by_criteria(Filter::like("name", "B%").not())
        .unwrap();
    assert_eq!(not_b.len(), 3);

    let either = employees
        .find_by_criteria(Filter::eq("name", "Ann").or(Filter::lt("salary", 2_000.0)))
        .unwrap();
    assert_eq!(either.len(), 2);

    let ids = employees
        .long_values_by_criteria(at_acme, "company_id")
        .unwrap();
    assert_eq!(ids, vec![acme_id; 3]);

    // NULLs come back as None
    let all_ids = employees
        .long_values_by_criteria(Filter::all(), "company_id")
        .unwrap();
    assert_eq!(all_ids, vec![acme_id, acme_id, acme_id, None]);
}

#[test]
fn test_empty_groups() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));
    companies.save(Company::new("Acme", None)).unwrap();

    assert_eq!(companies.count_by_criteria(Filter::And(vec![])).unwrap(), 1);
    assert_eq!(companies.count_by_criteria(Filter::Or(vec![])).unwrap(), 0);
    assert!(companies
        .find_by_criteria(Filter::Or(vec![]))
        .unwrap()
        .is_empty());
    assert_eq!(
        companies
            .count_by_criteria(Filter::Or(vec![]).not())
            .unwrap(),
        1
    );
}

#[test]
fn test_paged_queries() {
    let db = setup();
    let employees = Repository::<Employee>::new(Arc::clone(&db.service));
    employees
        .insert_all(
            (0..7)
                .map(|i| Employee::new(&format!("E{}", i), None, f64::from(i)))
                .collect(),
        )
        .unwrap();

    let page = |index| {
        employees
            .find_by_criteria_paged(index, 3, Filter::all())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect::<Vec<_>>()
    };
    assert_eq!(page(0), vec!["E0", "E1", "E2"]);
    assert_eq!(page(2), vec!["E6"]);
    assert!(page(3).is_empty());

    // Offsets beyond any table size select nothing
    assert!(employees
        .find_by_criteria_paged(u32::MAX, u32::MAX, Filter::all())
        .unwrap()
        .is_empty());
    assert!(employees
        .find_by_criteria_paged(u32::MAX, 1, Filter::all())
        .unwrap()
        .is_empty());
}

#[test]
fn test_unknown_columns_are_rejected() {
    let db = setup();
    let employees = Repository::<Employee>::new(Arc::clone(&db.service));

    let err = employees
        .find_by_criteria(Filter::eq("password", "x"))
        .unwrap_err();
    assert!(matches!(
        err.cause(),
        Some(Error::UnknownColumn {
            table: "employee",
            ..
        })
    ));
    assert!(employees
        .sum_by_criteria(Filter::all(), "salary) FROM employee; --")
        .is_err());
}

#[test]
fn test_repository_joins_running_transaction() {
    let db = setup();
    let companies = Repository::<Company>::new(Arc::clone(&db.service));
    let employees = Repository::<Employee>::new(Arc::clone(&db.service));

    let result: sqlx_thread_transaction::Result<()> =
        db.service.run_in_thread_transaction(|_session| {
            let company = companies.save(Company::new("Startup", None))?;
            employees.save(Employee::new("Founder", company.id, 0.0))?;
            assert_eq!(employees.count_by_criteria(Filter::all())?, 1);
            Err(Error::custom("funding fell through"))
        });

    assert!(result.is_err());
    assert!(companies.find_all().unwrap().is_empty());
    assert!(employees.find_all().unwrap().is_empty());
}
