use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

/// Open (creating if needed) the dashboard database.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            email TEXT,
            is_admin BOOLEAN DEFAULT FALSE,
            is_active BOOLEAN DEFAULT TRUE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            last_login TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT UNIQUE NOT NULL,
            app_type TEXT NOT NULL,
            port INTEGER NOT NULL,
            status TEXT DEFAULT 'unknown',
            directory_path TEXT NOT NULL,
            git_url TEXT,
            ssl_enabled BOOLEAN DEFAULT FALSE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS system_usage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id INTEGER,
            cpu_load REAL,
            memory_used_mb REAL,
            disk_used_percent REAL,
            timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (app_id) REFERENCES applications (id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS system_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id INTEGER,
            level TEXT,
            message TEXT,
            details TEXT,
            timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (app_id) REFERENCES applications (id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS configuration (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT UNIQUE NOT NULL,
            value TEXT,
            description TEXT,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            session_token TEXT UNIQUE NOT NULL,
            expires_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Refresh the local cache row for an application so usage and log rows
/// have a stable id to reference. The JSON registry stays authoritative.
pub async fn upsert_application(
    pool: &SqlitePool,
    domain: &str,
    app_type: &str,
    port: u16,
    status: &str,
    directory: &str,
    git_url: Option<&str>,
    ssl: bool,
) -> Result<i64> {
    sqlx::query(
        "INSERT INTO applications (domain, app_type, port, status, directory_path, git_url, ssl_enabled)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(domain) DO UPDATE SET
            app_type = excluded.app_type,
            port = excluded.port,
            status = excluded.status,
            directory_path = excluded.directory_path,
            git_url = excluded.git_url,
            ssl_enabled = excluded.ssl_enabled,
            updated_at = CURRENT_TIMESTAMP",
    )
    .bind(domain)
    .bind(app_type)
    .bind(port)
    .bind(status)
    .bind(directory)
    .bind(git_url)
    .bind(ssl)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id FROM applications WHERE domain = ?")
        .bind(domain)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("id"))
}

pub async fn delete_application(pool: &SqlitePool, domain: &str) -> Result<()> {
    sqlx::query("DELETE FROM applications WHERE domain = ?")
        .bind(domain)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_usage_sample(
    pool: &SqlitePool,
    cpu_load: f64,
    memory_used_mb: f64,
    disk_used_percent: f64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO system_usage (cpu_load, memory_used_mb, disk_used_percent) VALUES (?, ?, ?)",
    )
    .bind(cpu_load)
    .bind(memory_used_mb)
    .bind(disk_used_percent)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_log(
    pool: &SqlitePool,
    level: &str,
    message: &str,
    details: Option<&str>,
) -> Result<()> {
    sqlx::query("INSERT INTO system_logs (level, message, details) VALUES (?, ?, ?)")
        .bind(level)
        .bind(message)
        .bind(details)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn recent_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<serde_json::Value>> {
    let rows = sqlx::query(
        "SELECT level, message, details, timestamp FROM system_logs
         ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "level": row.get::<Option<String>, _>("level"),
                "message": row.get::<Option<String>, _>("message"),
                "details": row.get::<Option<String>, _>("details"),
                "timestamp": row.get::<Option<String>, _>("timestamp"),
            })
        })
        .collect())
}

pub async fn get_configuration(pool: &SqlitePool) -> Result<Vec<serde_json::Value>> {
    let rows = sqlx::query("SELECT key, value, description FROM configuration ORDER BY key")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "key": row.get::<String, _>("key"),
                "value": row.get::<Option<String>, _>("value"),
                "description": row.get::<Option<String>, _>("description"),
            })
        })
        .collect())
}

pub async fn set_configuration(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO configuration (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
