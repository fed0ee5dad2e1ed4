//! SQLite pool and schema bootstrap
//!
//! The schema ships as one embedded file and every statement in it is
//! `IF NOT EXISTS`, so applying it on startup is idempotent and a
//! statement failure is a real error, not something to skip past.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

/// Open the pool, creating the database file (and its directory) on
/// first run
pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
}

/// Apply the embedded schema statement by statement
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in split_statements(SCHEMA) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

/// Open the pool and apply the schema
pub async fn init_database(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_path).await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

/// Split a schema file into executable statements. Semicolons inside
/// string literals or parenthesized bodies (CHECK constraints, column
/// lists) do not terminate a statement.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let line = strip_line_comment(line);
        if line.trim().is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if statement_complete(&current) {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    let last = current.trim();
    if !last.is_empty() {
        statements.push(last.trim_end_matches(';').trim().to_string());
    }

    statements
}

/// A statement is complete when it ends with a semicolon at paren
/// depth zero, outside any string literal
fn statement_complete(sql: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut complete = false;

    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            ';' if !in_string && depth == 0 => complete = true,
            c if !c.is_whitespace() => complete = false,
            _ => {}
        }
    }
    complete
}

/// Drop a `--` comment, unless the dashes sit inside a string literal
fn strip_line_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b'-' if !in_string && bytes.get(i + 1) == Some(&b'-') => return &line[..i],
            _ => {}
        }
    }
    line
}
