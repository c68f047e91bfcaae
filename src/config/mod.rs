use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod validate;

/// The closed set of application types deckhand knows how to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum AppType {
    Nextjs,
    Fastapi,
    Nodejs,
    Static,
}

impl AppType {
    pub const ALL: [AppType; 4] = [
        AppType::Nextjs,
        AppType::Fastapi,
        AppType::Nodejs,
        AppType::Static,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Nextjs => "nextjs",
            AppType::Fastapi => "fastapi",
            AppType::Nodejs => "nodejs",
            AppType::Static => "static",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AppType::Nextjs => "Next.js application",
            AppType::Fastapi => "FastAPI application",
            AppType::Nodejs => "Node.js application",
            AppType::Static => "Static site",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Active,
    Failed,
    Unknown,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppStatus::Pending => "pending",
            AppStatus::Active => "active",
            AppStatus::Failed => "failed",
            AppStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn default_status() -> AppStatus {
    AppStatus::Unknown
}

/// One managed application. `domain` doubles as the registry key.
///
/// The first seven fields are required on disk; a stored record missing any
/// of them is treated as corrupt and dropped during load. The rest carry
/// defaults so older registry files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub domain: String,
    pub port: u16,
    pub app_type: AppType,
    pub source: String,
    pub branch: String,
    pub ssl: bool,
    pub created: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_status")]
    pub status: AppStatus,
    #[serde(default)]
    pub build_command: String,
    #[serde(default)]
    pub start_command: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl AppRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        domain: String,
        port: u16,
        app_type: AppType,
        source: String,
        branch: String,
        ssl: bool,
        build_command: String,
        start_command: String,
        env_vars: BTreeMap<String, String>,
    ) -> Self {
        let now = chrono::Local::now().to_rfc3339();
        Self {
            domain,
            port,
            app_type,
            source,
            branch,
            ssl,
            created: now.clone(),
            last_updated: now,
            status: AppStatus::Pending,
            build_command,
            start_command,
            env_vars,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = chrono::Local::now().to_rfc3339();
    }

    pub fn set_active(&mut self) {
        self.status = AppStatus::Active;
        self.touch();
    }

    pub fn set_failed(&mut self) {
        self.status = AppStatus::Failed;
        self.touch();
    }

    /// Whether the source is a git remote (as opposed to a local path).
    pub fn is_git_source(&self) -> bool {
        self.source.starts_with("http") || self.source.starts_with("git@")
    }
}

/// Global knobs stored alongside the app records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_true")]
    pub default_ssl: bool,
    #[serde(default = "default_true")]
    pub auto_backup: bool,
    #[serde(default = "default_retention_days")]
    pub backup_retention_days: u32,
    #[serde(default = "default_max_backups")]
    pub max_backups_per_app: usize,
    #[serde(default = "default_worker_processes")]
    pub nginx_worker_processes: String,
    #[serde(default = "default_worker_connections")]
    pub nginx_worker_connections: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_backups() -> usize {
    5
}

fn default_worker_processes() -> String {
    "auto".to_string()
}

fn default_worker_connections() -> u32 {
    1024
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_ssl: true,
            auto_backup: true,
            backup_retention_days: default_retention_days(),
            max_backups_per_app: default_max_backups(),
            nginx_worker_processes: default_worker_processes(),
            nginx_worker_connections: default_worker_connections(),
            log_level: default_log_level(),
        }
    }
}

/// Filesystem layout. Fixed at process start, never persisted.
#[derive(Debug, Clone)]
pub struct SystemPaths {
    pub apps_dir: PathBuf,
    pub nginx_sites: PathBuf,
    pub nginx_enabled: PathBuf,
    pub nginx_conf_d: PathBuf,
    pub systemd_dir: PathBuf,
    pub log_dir: PathBuf,
    pub registry_file: PathBuf,
    pub backup_dir: PathBuf,
    pub maintenance_root: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("/var/www/apps"),
            nginx_sites: PathBuf::from("/etc/nginx/sites-available"),
            nginx_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            nginx_conf_d: PathBuf::from("/etc/nginx/conf.d"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            log_dir: PathBuf::from("/var/log/apps"),
            registry_file: PathBuf::from("/etc/deckhand/config.json"),
            backup_dir: PathBuf::from("/var/backups/deckhand"),
            maintenance_root: PathBuf::from("/var/www/maintenance"),
        }
    }
}

impl SystemPaths {
    pub fn app_dir(&self, domain: &str) -> PathBuf {
        self.apps_dir.join(domain)
    }

    /// Staging directory used while fetching/building a fresh deploy.
    pub fn temp_dir(&self, domain: &str) -> PathBuf {
        self.apps_dir.join(format!("{}_temp", domain))
    }

    /// Directory-level backup of an app taken before a mutating operation.
    pub fn app_backup_dir(&self, domain: &str) -> PathBuf {
        self.apps_dir.join(format!("{}_backup", domain))
    }

    /// Working copy used by `update` so the live app keeps running.
    pub fn update_dir(&self, domain: &str) -> PathBuf {
        self.apps_dir.join(format!("{}_update", domain))
    }

    pub fn unit_file(&self, domain: &str) -> PathBuf {
        self.systemd_dir.join(format!("{}.service", domain))
    }

    pub fn site_file(&self, domain: &str) -> PathBuf {
        self.nginx_sites.join(domain)
    }

    pub fn enabled_link(&self, domain: &str) -> PathBuf {
        self.nginx_enabled.join(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_apply_on_deserialize() {
        let json = r#"{
            "domain": "demo.example.com",
            "port": 3000,
            "app_type": "static",
            "source": "/tmp/demo",
            "branch": "main",
            "ssl": false,
            "created": "2025-01-01T00:00:00+00:00"
        }"#;

        let record: AppRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, AppStatus::Unknown);
        assert!(record.build_command.is_empty());
        assert!(record.start_command.is_empty());
        assert!(record.env_vars.is_empty());
    }

    #[test]
    fn record_missing_required_field_fails() {
        let json = r#"{
            "domain": "demo.example.com",
            "port": 3000,
            "app_type": "static",
            "source": "/tmp/demo",
            "ssl": false,
            "created": "2025-01-01T00:00:00+00:00"
        }"#;

        assert!(serde_json::from_str::<AppRecord>(json).is_err());
    }

    #[test]
    fn new_record_starts_pending() {
        let record = AppRecord::new(
            "demo.example.com".into(),
            3000,
            AppType::Nextjs,
            "https://github.com/acme/demo.git".into(),
            "main".into(),
            true,
            String::new(),
            String::new(),
            BTreeMap::new(),
        );
        assert_eq!(record.status, AppStatus::Pending);
        assert_eq!(record.created, record.last_updated);
        assert!(record.is_git_source());
    }

    #[test]
    fn global_config_fills_missing_fields() {
        let config: GlobalConfig = serde_json::from_str(r#"{"default_ssl": false}"#).unwrap();
        assert!(!config.default_ssl);
        assert_eq!(config.max_backups_per_app, 5);
        assert_eq!(config.nginx_worker_processes, "auto");
    }
}
