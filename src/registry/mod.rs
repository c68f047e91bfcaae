use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::{AppRecord, GlobalConfig};

/// On-disk document version. Bumped when the schema changes shape.
const DOCUMENT_VERSION: &str = "4.0";

/// Fields a stored app entry must carry to be considered intact.
const REQUIRED_FIELDS: [&str; 7] = [
    "domain", "port", "app_type", "source", "branch", "ssl", "created",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: String,
    pub apps: BTreeMap<String, AppRecord>,
    pub global: GlobalConfig,
    pub created_at: String,
    pub last_modified: String,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        let now = chrono::Local::now().to_rfc3339();
        Self {
            version: DOCUMENT_VERSION.to_string(),
            apps: BTreeMap::new(),
            global: GlobalConfig::default(),
            created_at: now.clone(),
            last_modified: now,
        }
    }
}

/// JSON-backed application registry.
///
/// Loads self-heal: entries missing required fields are dropped with a
/// warning, an unparsable file yields an empty document, and legacy field
/// names are migrated in place. Every save first copies the previous file
/// into the backup directory.
#[derive(Debug, Clone)]
pub struct Store {
    registry_file: PathBuf,
    backup_dir: PathBuf,
}

impl Store {
    pub fn new(registry_file: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            registry_file,
            backup_dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.registry_file
    }

    pub fn load(&self) -> RegistryDocument {
        if !self.registry_file.exists() {
            return RegistryDocument::default();
        }

        let content = match fs::read_to_string(&self.registry_file) {
            Ok(content) => content,
            Err(err) => {
                warn!("failed to read registry file, starting empty: {}", err);
                return RegistryDocument::default();
            }
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!("registry file is not valid JSON, starting empty: {}", err);
                return RegistryDocument::default();
            }
        };

        migrate(value)
    }

    pub fn save(&self, doc: &mut RegistryDocument) -> Result<()> {
        doc.last_modified = chrono::Local::now().to_rfc3339();

        if let Some(parent) = self.registry_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Keep the previous file around before overwriting it.
        if self.registry_file.exists() {
            fs::create_dir_all(&self.backup_dir)
                .with_context(|| format!("Failed to create {}", self.backup_dir.display()))?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            let backup = self.backup_dir.join(format!("config-{}.json", stamp));
            fs::copy(&self.registry_file, &backup)
                .with_context(|| format!("Failed to back up registry to {}", backup.display()))?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&self.registry_file, content)
            .with_context(|| format!("Failed to write {}", self.registry_file.display()))?;

        restrict_permissions(&self.registry_file);

        Ok(())
    }

    pub fn add_app(&self, record: AppRecord) -> Result<()> {
        let mut doc = self.load();
        doc.apps.insert(record.domain.clone(), record);
        self.save(&mut doc)
    }

    pub fn remove_app(&self, domain: &str) -> Result<()> {
        let mut doc = self.load();
        if doc.apps.remove(domain).is_some() {
            self.save(&mut doc)?;
        }
        Ok(())
    }

    pub fn update_app(&self, record: AppRecord) -> Result<()> {
        let mut doc = self.load();
        if doc.apps.contains_key(&record.domain) {
            doc.apps.insert(record.domain.clone(), record);
            self.save(&mut doc)?;
        }
        Ok(())
    }

    pub fn get_app(&self, domain: &str) -> Result<AppRecord> {
        self.load()
            .apps
            .remove(domain)
            .with_context(|| format!("Application {} not found", domain))
    }

    pub fn get_all_apps(&self) -> BTreeMap<String, AppRecord> {
        self.load().apps
    }

    pub fn app_exists(&self, domain: &str) -> bool {
        self.load().apps.contains_key(domain)
    }

    pub fn is_port_in_use(&self, port: u16, exclude_domain: Option<&str>) -> bool {
        self.load()
            .apps
            .iter()
            .any(|(domain, record)| Some(domain.as_str()) != exclude_domain && record.port == port)
    }

    pub fn global_config(&self) -> GlobalConfig {
        self.load().global
    }

    pub fn update_global_config(&self, global: GlobalConfig) -> Result<()> {
        let mut doc = self.load();
        doc.global = global;
        self.save(&mut doc)
    }

    /// Write the whole document to a user-chosen file.
    pub fn export(&self, path: &Path) -> Result<()> {
        let doc = self.load();
        let content = serde_json::to_string_pretty(&doc)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Replace the registry with a previously exported document, filling in
    /// any missing top-level keys and running the usual migration.
    pub fn import(&self, path: &Path) -> Result<RegistryDocument> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;

        let mut doc = migrate(value);
        self.save(&mut doc)?;
        Ok(doc)
    }

    /// Repair a registry file in place: drop entries missing required
    /// fields, refresh metadata, and regenerate the file entirely when the
    /// JSON itself cannot be parsed. Returns (kept, dropped) entry counts.
    pub fn repair_file(path: &Path) -> Result<(usize, usize)> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let backup = path.with_extension(format!("backup-{}.json", stamp));
        fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up {} before repair", path.display()))?;

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!("registry JSON unparsable ({}), regenerating from scratch", err);
                let doc = RegistryDocument::default();
                fs::write(path, serde_json::to_string_pretty(&doc)?)?;
                return Ok((0, 0));
            }
        };

        let before = value
            .get("apps")
            .and_then(Value::as_object)
            .map(|apps| apps.len())
            .unwrap_or(0);

        let doc = migrate(value);
        let kept = doc.apps.len();

        let mut doc = doc;
        doc.last_modified = chrono::Local::now().to_rfc3339();
        fs::write(path, serde_json::to_string_pretty(&doc)?)?;

        Ok((kept, before - kept))
    }
}

/// Bring a raw JSON document up to the current shape. Missing top-level
/// keys are synthesized, legacy `type` is renamed to `app_type`, per-entry
/// defaults are filled, and anything still malformed is dropped.
fn migrate(value: Value) -> RegistryDocument {
    let mut root = match value {
        Value::Object(map) => map,
        _ => {
            warn!("registry root is not an object, starting empty");
            return RegistryDocument::default();
        }
    };

    let global = root
        .remove("global")
        .and_then(|v| serde_json::from_value::<GlobalConfig>(v).ok())
        .unwrap_or_default();

    let raw_apps = match root.remove("apps") {
        Some(Value::Object(map)) => map,
        _ => Default::default(),
    };

    let mut apps = BTreeMap::new();
    for (domain, entry) in raw_apps {
        let Value::Object(mut fields) = entry else {
            warn!("dropping invalid registry entry for {}", domain);
            continue;
        };
        if fields.is_empty() {
            warn!("dropping empty registry entry for {}", domain);
            continue;
        }

        fields
            .entry("domain")
            .or_insert_with(|| Value::String(domain.clone()));

        if let Some(legacy) = fields.remove("type") {
            fields.entry("app_type").or_insert(legacy);
        }

        if !fields.contains_key("last_updated") {
            let created = fields.get("created").cloned().unwrap_or(Value::Null);
            fields.insert("last_updated".to_string(), created);
        }
        fields
            .entry("status")
            .or_insert_with(|| Value::String("unknown".to_string()));
        fields
            .entry("build_command")
            .or_insert_with(|| Value::String(String::new()));
        fields
            .entry("start_command")
            .or_insert_with(|| Value::String(String::new()));
        fields
            .entry("env_vars")
            .or_insert_with(|| Value::Object(Default::default()));

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .filter(|field| {
                fields
                    .get(**field)
                    .map(|v| v.is_null())
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        if !missing.is_empty() {
            warn!(
                "dropping corrupt registry entry for {} (missing: {})",
                domain,
                missing.join(", ")
            );
            continue;
        }

        match serde_json::from_value::<AppRecord>(Value::Object(fields)) {
            Ok(record) => {
                apps.insert(domain, record);
            }
            Err(err) => {
                warn!("dropping corrupt registry entry for {}: {}", domain, err);
            }
        }
    }

    let now = chrono::Local::now().to_rfc3339();
    RegistryDocument {
        version: root
            .remove("version")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| DOCUMENT_VERSION.to_string()),
        apps,
        global,
        created_at: root
            .remove("created_at")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| now.clone()),
        last_modified: now,
    }
}

/// Registry contents include env vars, so lock the file down after write.
/// Ownership change only works as root and is best-effort everywhere else.
fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        let _ = std::os::unix::fs::chown(path, Some(0), Some(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppStatus, AppType};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        Store::new(
            dir.path().join("config.json"),
            dir.path().join("backups"),
        )
    }

    fn sample_record(domain: &str, port: u16) -> AppRecord {
        AppRecord::new(
            domain.to_string(),
            port,
            AppType::Nextjs,
            "https://github.com/acme/demo.git".to_string(),
            "main".to_string(),
            true,
            String::new(),
            String::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn missing_file_loads_default_document() {
        let dir = TempDir::new().unwrap();
        let doc = store(&dir).load();
        assert!(doc.apps.is_empty());
        assert!(doc.global.default_ssl);
    }

    #[test]
    fn add_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add_app(sample_record("demo.example.com", 3000)).unwrap();

        let record = store.get_app("demo.example.com").unwrap();
        assert_eq!(record.port, 3000);
        assert!(store.app_exists("demo.example.com"));
        assert!(!store.app_exists("other.example.com"));
    }

    #[test]
    fn port_conflict_detection_honors_exclude() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add_app(sample_record("a.example.com", 3000)).unwrap();

        assert!(store.is_port_in_use(3000, None));
        assert!(!store.is_port_in_use(3001, None));
        assert!(!store.is_port_in_use(3000, Some("a.example.com")));
    }

    #[test]
    fn save_backs_up_previous_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add_app(sample_record("a.example.com", 3000)).unwrap();
        store.add_app(sample_record("b.example.com", 3001)).unwrap();

        let backups: Vec<_> = fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .collect();
        assert!(!backups.is_empty());
    }

    #[test]
    fn corrupt_entry_is_dropped_others_survive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let json = r#"{
            "apps": {
                "good.example.com": {
                    "domain": "good.example.com", "port": 3000,
                    "app_type": "static", "source": "/tmp/demo",
                    "branch": "main", "ssl": false,
                    "created": "2025-01-01T00:00:00+00:00"
                },
                "broken.example.com": {
                    "domain": "broken.example.com", "port": 3001,
                    "app_type": "static", "source": "/tmp/other",
                    "ssl": false,
                    "created": "2025-01-01T00:00:00+00:00"
                }
            }
        }"#;
        fs::write(store.path(), json).unwrap();

        let doc = store.load();
        assert_eq!(doc.apps.len(), 1);
        assert!(doc.apps.contains_key("good.example.com"));
    }

    #[test]
    fn unparsable_json_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        let doc = store.load();
        assert!(doc.apps.is_empty());
    }

    #[test]
    fn migration_fills_legacy_fields() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let json = r#"{
            "apps": {
                "old.example.com": {
                    "port": 4000, "type": "fastapi",
                    "source": "https://github.com/acme/api.git",
                    "branch": "main", "ssl": true,
                    "created": "2024-06-01T00:00:00+00:00"
                }
            }
        }"#;
        fs::write(store.path(), json).unwrap();

        let record = store.get_app("old.example.com").unwrap();
        assert_eq!(record.app_type, AppType::Fastapi);
        assert_eq!(record.domain, "old.example.com");
        assert_eq!(record.last_updated, "2024-06-01T00:00:00+00:00");
        assert_eq!(record.status, AppStatus::Unknown);
        assert!(record.env_vars.is_empty());
    }

    #[test]
    fn export_import_roundtrip() {
        let dir = TempDir::new().unwrap();
        let source = store(&dir);
        source.add_app(sample_record("a.example.com", 3000)).unwrap();
        source.add_app(sample_record("b.example.com", 3001)).unwrap();

        let export_path = dir.path().join("export.json");
        source.export(&export_path).unwrap();

        let other_dir = TempDir::new().unwrap();
        let target = store(&other_dir);
        target.import(&export_path).unwrap();

        let original = source.get_all_apps();
        let imported = target.get_all_apps();
        assert_eq!(original.len(), imported.len());
        for (domain, record) in original {
            let mirror = &imported[&domain];
            assert_eq!(record.port, mirror.port);
            assert_eq!(record.app_type, mirror.app_type);
        }
    }

    #[test]
    fn repair_drops_invalid_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let json = r#"{
            "apps": {
                "good.example.com": {
                    "domain": "good.example.com", "port": 3000,
                    "app_type": "static", "source": "/tmp/demo",
                    "branch": "main", "ssl": false,
                    "created": "2025-01-01T00:00:00+00:00"
                },
                "bad.example.com": {"port": 9999}
            }
        }"#;
        fs::write(&path, json).unwrap();

        let (kept, dropped) = Store::repair_file(&path).unwrap();
        assert_eq!((kept, dropped), (1, 1));

        let repaired: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(repaired["version"], DOCUMENT_VERSION);
        assert!(repaired["apps"].get("bad.example.com").is_none());
    }

    #[test]
    fn repair_regenerates_unparsable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "garbage{{{").unwrap();

        Store::repair_file(&path).unwrap();

        let repaired: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(repaired["apps"].as_object().unwrap().is_empty());
    }
}
