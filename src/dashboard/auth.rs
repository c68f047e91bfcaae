use anyhow::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::info;

const SESSION_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// Salted SHA-256, stored as `salt$hexdigest`.
pub fn hash_password(password: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{}${}", salt, digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, hash)) => digest(salt, password) == hash,
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// First-run bootstrap: when the users table is empty, create an admin
/// account with a random password and print it once.
pub async fn ensure_admin(pool: &SqlitePool) -> Result<()> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM users")
        .fetch_one(pool)
        .await?
        .get("n");
    if count > 0 {
        return Ok(());
    }

    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    sqlx::query("INSERT INTO users (username, password_hash, is_admin) VALUES ('admin', ?, TRUE)")
        .bind(hash_password(&password))
        .execute(pool)
        .await?;

    info!("created dashboard admin user");
    println!("Dashboard admin account created. Username: admin, password: {}", password);
    Ok(())
}

/// Verify credentials and open a session. Returns the session token.
pub async fn login(pool: &SqlitePool, username: &str, password: &str) -> Result<Option<String>> {
    let row = sqlx::query(
        "SELECT id, password_hash FROM users WHERE username = ? AND is_active = TRUE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let stored: String = row.get("password_hash");
    if !verify_password(password, &stored) {
        return Ok(None);
    }

    let user_id: i64 = row.get("id");
    let token = generate_token();
    let expires = chrono::Local::now() + chrono::Duration::hours(SESSION_HOURS);

    sqlx::query("INSERT INTO user_sessions (user_id, session_token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&token)
        .bind(expires.to_rfc3339())
        .execute(pool)
        .await?;
    sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(Some(token))
}

/// Resolve a session token to its user, if the session is still valid.
pub async fn authenticate(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT u.id, u.username, u.is_admin, s.expires_at
         FROM user_sessions s JOIN users u ON u.id = s.user_id
         WHERE s.session_token = ? AND u.is_active = TRUE",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let expires_at: String = row.get("expires_at");
    if let Ok(expiry) = chrono::DateTime::parse_from_rfc3339(&expires_at) {
        if expiry < chrono::Local::now().fixed_offset() {
            revoke(pool, token).await?;
            return Ok(None);
        }
    }

    Ok(Some(User {
        id: row.get("id"),
        username: row.get("username"),
        is_admin: row.get("is_admin"),
    }))
}

pub async fn revoke(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM user_sessions WHERE session_token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn cleanup_expired(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(chrono::Local::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let stored = hash_password("hunter2");
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
    }

    #[test]
    fn same_password_hashes_differently() {
        assert_ne!(hash_password("secret"), hash_password("secret"));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("anything", "no-dollar-sign"));
        assert!(!verify_password("anything", ""));
    }
}
