use std::{str::FromStr, time::Duration};

use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use uuid::Uuid;

use crate::{config::Config, error::AppError};

pub async fn connect_and_bootstrap(config: &Config) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(AppError::internal)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    bootstrap_schema(&pool).await?;

    Ok(pool)
}

const SCHEMA_BOOTSTRAP_SQL: &[&str] = &[
    "PRAGMA foreign_keys = ON;",

    // Users are provisioned by the external identity tooling; the service only
    // reads them. No cascade from core tables back onto users.
    "CREATE TABLE IF NOT EXISTS users (
      id TEXT PRIMARY KEY,
      username TEXT NOT NULL UNIQUE,
      first_name TEXT NOT NULL DEFAULT '',
      last_name TEXT NOT NULL DEFAULT '',
      email TEXT NOT NULL DEFAULT '',
      phone_number TEXT NOT NULL DEFAULT '',
      role TEXT NOT NULL,
      designation TEXT NOT NULL DEFAULT '',
      department_id TEXT,
      department_unit_id TEXT,
      is_active INTEGER NOT NULL DEFAULT 1,
      created_at DATETIME NOT NULL,
      updated_at DATETIME NOT NULL
    );",

    "CREATE TABLE IF NOT EXISTS delegations (
      id TEXT PRIMARY KEY,
      delegated_by TEXT NOT NULL,
      delegated_to TEXT NOT NULL,
      reason TEXT NOT NULL,
      expires_at DATETIME,
      is_active INTEGER NOT NULL DEFAULT 1,
      delegated_at DATETIME NOT NULL,
      revoked_at DATETIME,
      UNIQUE(delegated_by, delegated_to),
      FOREIGN KEY(delegated_by) REFERENCES users(id),
      FOREIGN KEY(delegated_to) REFERENCES users(id)
    );",

    "CREATE TABLE IF NOT EXISTS action_logs (
      id TEXT PRIMARY KEY,
      title TEXT NOT NULL,
      description TEXT NOT NULL DEFAULT '',
      department_id TEXT,
      created_by TEXT NOT NULL,
      status TEXT NOT NULL DEFAULT 'open',
      priority TEXT NOT NULL DEFAULT 'Medium',
      due_date DATETIME,
      team_leader TEXT,
      approved_by TEXT,
      approved_at DATETIME,
      rejection_reason TEXT,
      closure_approval_stage TEXT NOT NULL DEFAULT 'none',
      closure_requested_by TEXT,
      created_at DATETIME NOT NULL,
      updated_at DATETIME NOT NULL,
      FOREIGN KEY(created_by) REFERENCES users(id)
    );",

    // position preserves assignment order; position 0 is the first assignee,
    // whose unit gates the unit_head approval stage.
    "CREATE TABLE IF NOT EXISTS action_log_assignees (
      action_log_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      position INTEGER NOT NULL,
      PRIMARY KEY(action_log_id, user_id),
      FOREIGN KEY(action_log_id) REFERENCES action_logs(id) ON DELETE CASCADE,
      FOREIGN KEY(user_id) REFERENCES users(id)
    );",

    // Append-only; the oldest row per log is the original assignment.
    "CREATE TABLE IF NOT EXISTS assignment_history (
      id TEXT PRIMARY KEY,
      action_log_id TEXT NOT NULL,
      assigned_by TEXT NOT NULL,
      assigned_at DATETIME NOT NULL,
      comment TEXT,
      FOREIGN KEY(action_log_id) REFERENCES action_logs(id) ON DELETE CASCADE,
      FOREIGN KEY(assigned_by) REFERENCES users(id)
    );",

    "CREATE TABLE IF NOT EXISTS assignment_history_assignees (
      history_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      position INTEGER NOT NULL,
      PRIMARY KEY(history_id, user_id),
      FOREIGN KEY(history_id) REFERENCES assignment_history(id) ON DELETE CASCADE,
      FOREIGN KEY(user_id) REFERENCES users(id)
    );",

    "CREATE TABLE IF NOT EXISTS comments (
      id TEXT PRIMARY KEY,
      action_log_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      body TEXT NOT NULL,
      status TEXT,
      is_approved INTEGER NOT NULL DEFAULT 0,
      is_viewed INTEGER NOT NULL DEFAULT 0,
      parent_id TEXT,
      created_at DATETIME NOT NULL,
      updated_at DATETIME NOT NULL,
      FOREIGN KEY(action_log_id) REFERENCES action_logs(id) ON DELETE CASCADE,
      FOREIGN KEY(user_id) REFERENCES users(id),
      FOREIGN KEY(parent_id) REFERENCES comments(id)
    );",

    "CREATE TABLE IF NOT EXISTS notifications (
      id TEXT PRIMARY KEY,
      user_id TEXT NOT NULL,
      action_log_id TEXT NOT NULL,
      comment_id TEXT,
      is_read INTEGER NOT NULL DEFAULT 0,
      created_at DATETIME NOT NULL,
      FOREIGN KEY(user_id) REFERENCES users(id),
      FOREIGN KEY(action_log_id) REFERENCES action_logs(id) ON DELETE CASCADE,
      FOREIGN KEY(comment_id) REFERENCES comments(id) ON DELETE CASCADE
    );",

    "CREATE INDEX IF NOT EXISTS idx_delegations_by
      ON delegations(delegated_by, is_active, expires_at);",
    "CREATE INDEX IF NOT EXISTS idx_delegations_to
      ON delegations(delegated_to, is_active, expires_at);",
    "CREATE INDEX IF NOT EXISTS idx_action_logs_stage
      ON action_logs(closure_approval_stage, status);",
    "CREATE INDEX IF NOT EXISTS idx_assignment_history_log
      ON assignment_history(action_log_id, assigned_at);",
    "CREATE INDEX IF NOT EXISTS idx_comments_log
      ON comments(action_log_id, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_notifications_user
      ON notifications(user_id, action_log_id, is_read);",
];

async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), AppError> {
    for statement in SCHEMA_BOOTSTRAP_SQL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn fetch_user(pool: &SqlitePool, user_id: &str) -> Result<Option<crate::models::User>, AppError> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| crate::models::User::from_row(&row)).transpose()
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

pub fn utc_now() -> chrono::DateTime<Utc> {
    Utc::now()
}
