use sqlx::Row;

fn database_url() -> Option<String> {
    dotenvy::dotenv().ok();

    std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

#[tokio::test]
async fn migrations_apply_and_tables_exist() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping migrations smoke test");
        return Ok(());
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;

    let migrations_dir =
        std::env::var("MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir)).await?;
    migrator.run(&pool).await?;

    for table in ["exam_definitions", "exam_attempts", "attempt_answers"] {
        let row = sqlx::query("SELECT to_regclass($1)::text").bind(table).fetch_one(&pool).await?;
        let regclass: Option<String> = row.try_get(0)?;
        assert!(regclass.is_some(), "expected table {table} to exist after migrations");
    }

    for index in ["exam_attempts_one_active_idx", "exam_attempts_due_idx"] {
        let row = sqlx::query("SELECT to_regclass($1)::text").bind(index).fetch_one(&pool).await?;
        let regclass: Option<String> = row.try_get(0)?;
        assert!(regclass.is_some(), "expected index {index} to exist after migrations");
    }

    Ok(())
}

#[tokio::test]
async fn second_in_progress_attempt_is_rejected() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping one-active-attempt check");
        return Ok(());
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;
    let migrations_dir =
        std::env::var("MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir)).await?;
    migrator.run(&pool).await?;

    let mut tx = pool.begin().await?;
    let insert = "INSERT INTO exam_attempts \
         (id, exam_id, learner_id, exam_snapshot, status, start_time, end_time, \
          created_at, updated_at) \
         VALUES ($1, 'smoke-exam', 'smoke-learner', '{}'::jsonb, 'in_progress', \
                 now(), now() + interval '1 hour', now(), now())";

    sqlx::query(insert).bind(uuid::Uuid::new_v4().to_string()).execute(&mut *tx).await?;
    let duplicate =
        sqlx::query(insert).bind(uuid::Uuid::new_v4().to_string()).execute(&mut *tx).await;
    tx.rollback().await?;

    let err = duplicate.expect_err("second in-progress attempt must violate the unique index");
    let constraint = err.as_database_error().and_then(|db| db.constraint().map(str::to_string));
    assert_eq!(constraint.as_deref(), Some("exam_attempts_one_active_idx"));

    Ok(())
}
