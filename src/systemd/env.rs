use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{AppRecord, AppType};

/// Environment file the unit points at: FastAPI convention is `.env`,
/// the Node family uses `.env.production`.
pub fn env_file_name(app_type: AppType) -> &'static str {
    match app_type {
        AppType::Fastapi => ".env",
        _ => ".env.production",
    }
}

/// Baseline variables the unit expects, independent of what the app ships.
pub fn default_env(record: &AppRecord, app_dir: &Path) -> BTreeMap<String, String> {
    match record.app_type {
        AppType::Fastapi => BTreeMap::from([
            ("PYTHONPATH".to_string(), app_dir.display().to_string()),
            ("PORT".to_string(), record.port.to_string()),
            ("HOST".to_string(), "0.0.0.0".to_string()),
            ("ENVIRONMENT".to_string(), "production".to_string()),
        ]),
        _ => BTreeMap::from([
            ("NODE_ENV".to_string(), "production".to_string()),
            ("PORT".to_string(), record.port.to_string()),
            ("HOSTNAME".to_string(), "localhost".to_string()),
        ]),
    }
}

/// Variables written first, in this order, so the generated file reads the
/// same way across apps. Everything else follows under its own section.
fn system_keys(app_type: AppType) -> &'static [&'static str] {
    match app_type {
        AppType::Fastapi => &["PYTHONPATH", "PORT", "HOST", "ENVIRONMENT"],
        _ => &["NODE_ENV", "PORT", "HOSTNAME"],
    }
}

pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Write the unit's environment file.
///
/// A `.env` shipped with a FastAPI source is respected as-is, except that a
/// `PORT=` line is appended when entirely absent. For everything else,
/// pre-existing variables are preserved at the highest priority over
/// record-level variables, which in turn override the per-type defaults;
/// `PORT` is always forced to the record's port.
pub fn write_env_file(
    record: &AppRecord,
    app_dir: &Path,
    extra: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    let env_file = app_dir.join(env_file_name(record.app_type));

    if record.app_type == AppType::Fastapi && env_file.exists() {
        let content = fs::read_to_string(&env_file)
            .with_context(|| format!("Failed to read {}", env_file.display()))?;
        if !content.contains("PORT=") {
            let mut updated = content;
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&format!("PORT={}\n", record.port));
            fs::write(&env_file, updated)
                .with_context(|| format!("Failed to update {}", env_file.display()))?;
        }
        return Ok(env_file);
    }

    let existing = if env_file.exists() {
        parse_dotenv(&fs::read_to_string(&env_file)?)
    } else {
        BTreeMap::new()
    };

    let mut merged = default_env(record, app_dir);
    merged.extend(extra.clone());
    merged.extend(record.env_vars.clone());
    merged.extend(existing);
    merged.insert("PORT".to_string(), record.port.to_string());

    let mut content = String::from("# Environment for this application, managed by deckhand.\n\n");
    let system = system_keys(record.app_type);
    for key in system {
        if let Some(value) = merged.get(*key) {
            content.push_str(&format!("{}={}\n", key, value));
        }
    }

    let custom: Vec<_> = merged
        .iter()
        .filter(|(key, _)| !system.contains(&key.as_str()))
        .collect();
    if !custom.is_empty() {
        content.push_str("\n# Application specific variables\n");
        for (key, value) in custom {
            content.push_str(&format!("{}={}\n", key, value));
        }
    }

    fs::write(&env_file, content)
        .with_context(|| format!("Failed to write {}", env_file.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&env_file, fs::Permissions::from_mode(0o600));
    }

    Ok(env_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppStatus;
    use tempfile::TempDir;

    fn record(app_type: AppType) -> AppRecord {
        AppRecord {
            domain: "demo.example.com".to_string(),
            port: 3000,
            app_type,
            source: "/tmp/demo".to_string(),
            branch: "main".to_string(),
            ssl: false,
            created: "2025-01-01T00:00:00+00:00".to_string(),
            last_updated: "2025-01-01T00:00:00+00:00".to_string(),
            status: AppStatus::Pending,
            build_command: String::new(),
            start_command: String::new(),
            env_vars: BTreeMap::new(),
        }
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        let parsed = parse_dotenv("# comment\n\nA=1\n  B = two \nnot-a-pair\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "two");
    }

    #[test]
    fn fastapi_env_respected_with_port_appended() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "SECRET=abc\n").unwrap();

        let path = write_env_file(&record(AppType::Fastapi), dir.path(), &BTreeMap::new()).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("SECRET=abc"));
        assert!(content.contains("PORT=3000"));
    }

    #[test]
    fn fastapi_env_with_port_left_untouched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "PORT=9999\nSECRET=abc\n").unwrap();

        write_env_file(&record(AppType::Fastapi), dir.path(), &BTreeMap::new()).unwrap();

        let content = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(content, "PORT=9999\nSECRET=abc\n");
    }

    #[test]
    fn node_env_preserves_existing_variables() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".env.production"),
            "# old file\nDATABASE_URL=postgres://prod\nNODE_ENV=staging\n",
        )
        .unwrap();

        write_env_file(&record(AppType::Nextjs), dir.path(), &BTreeMap::new()).unwrap();

        let content = fs::read_to_string(dir.path().join(".env.production")).unwrap();
        // Existing values win over defaults, PORT is forced.
        assert!(content.contains("NODE_ENV=staging"));
        assert!(content.contains("DATABASE_URL=postgres://prod"));
        assert!(content.contains("PORT=3000"));
        assert!(content.contains("HOSTNAME=localhost"));
    }

    #[test]
    fn fresh_node_env_gets_defaults_and_record_vars() {
        let dir = TempDir::new().unwrap();
        let mut record = record(AppType::Nodejs);
        record.env_vars.insert("API_KEY".to_string(), "xyz".to_string());

        write_env_file(&record, dir.path(), &BTreeMap::new()).unwrap();

        let content = fs::read_to_string(dir.path().join(".env.production")).unwrap();
        assert!(content.contains("NODE_ENV=production"));
        assert!(content.contains("PORT=3000"));
        assert!(content.contains("API_KEY=xyz"));
        let node_env_pos = content.find("NODE_ENV").unwrap();
        let api_key_pos = content.find("API_KEY").unwrap();
        assert!(node_env_pos < api_key_pos);
    }
}
