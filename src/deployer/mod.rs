use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AppRecord, AppType};
use crate::exec::Executor;
use crate::output::Reporter;

mod fastapi;
mod nextjs;
mod nodejs;
mod static_site;

pub use fastapi::FastapiDeployer;
pub use nextjs::NextjsDeployer;
pub use nodejs::NodejsDeployer;
pub use static_site::StaticDeployer;

/// Per-type deployment strategy: structure validation, dependency install,
/// build, and the defaults the rest of the pipeline falls back to.
#[async_trait]
pub trait Deployer: Send + Sync {
    fn app_type(&self) -> AppType;

    fn required_files(&self) -> &'static [&'static str];

    fn optional_files(&self) -> &'static [&'static str];

    /// Check required files are present and sanity-check their content.
    async fn validate_structure(&self, app_dir: &Path) -> Result<()>;

    async fn install_dependencies(&self, app_dir: &Path, record: &AppRecord) -> Result<()>;

    async fn build(&self, app_dir: &Path, record: &AppRecord) -> Result<()>;

    fn default_start_command(&self, record: &AppRecord) -> String;

    fn default_build_command(&self, record: &AppRecord) -> String;

    fn default_env(&self, record: &AppRecord, app_dir: &Path) -> BTreeMap<String, String>;

    /// Verify the toolchain this deployer shells out to is installed.
    async fn check_requirements(&self) -> Result<()> {
        Ok(())
    }

    /// Write the app-level `.env`. A file shipped with the source is kept
    /// as-is; only a `PORT=` line is appended when absent. Otherwise a
    /// fresh file is synthesized from the deployer's default set.
    fn write_env_file(&self, app_dir: &Path, record: &AppRecord) -> Result<()> {
        let env_file = app_dir.join(".env");

        if env_file.exists() {
            let content = std::fs::read_to_string(&env_file)?;
            if !content.contains("PORT=") {
                let mut updated = content;
                if !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(&format!("PORT={}\n", record.port));
                std::fs::write(&env_file, updated)?;
            }
            return Ok(());
        }

        let mut content = String::new();
        for (key, value) in self.default_env(record, app_dir) {
            content.push_str(&format!("{}={}\n", key, value));
        }
        for (key, value) in &record.env_vars {
            content.push_str(&format!("{}={}\n", key, value));
        }
        std::fs::write(&env_file, content)?;
        Ok(())
    }
}

/// Build the deployer for a given (already validated) application type.
pub fn create(
    app_type: AppType,
    apps_dir: PathBuf,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
) -> Box<dyn Deployer> {
    match app_type {
        AppType::Nextjs => Box::new(NextjsDeployer::new(apps_dir, exec, reporter)),
        AppType::Fastapi => Box::new(FastapiDeployer::new(apps_dir, exec, reporter)),
        AppType::Nodejs => Box::new(NodejsDeployer::new(apps_dir, exec, reporter)),
        AppType::Static => Box::new(StaticDeployer::new(apps_dir, exec, reporter)),
    }
}

/// Guess the application type from directory contents.
///
/// Precedence: a Next.js config file or dependency wins, then a FastAPI
/// signature in `main.py`, then package.json heuristics, then a bare
/// `index.html`. Static is the ultimate fallback.
pub fn detect_type(dir: &Path) -> AppType {
    if dir.join("next.config.js").exists() || dir.join("next.config.mjs").exists() {
        return AppType::Nextjs;
    }

    if let Ok(main) = std::fs::read_to_string(dir.join("main.py")) {
        if main.to_lowercase().contains("fastapi") {
            return AppType::Fastapi;
        }
    }

    if let Ok(manifest) = std::fs::read_to_string(dir.join("package.json")) {
        if let Ok(package) = serde_json::from_str::<serde_json::Value>(&manifest) {
            let has_dep = |name: &str| {
                package
                    .get("dependencies")
                    .and_then(|deps| deps.get(name))
                    .is_some()
            };
            let has_script = |name: &str| {
                package
                    .get("scripts")
                    .and_then(|scripts| scripts.get(name))
                    .is_some()
            };

            if has_dep("next") {
                return AppType::Nextjs;
            }
            if has_script("start") {
                return AppType::Nodejs;
            }
            if has_script("build") {
                return AppType::Static;
            }
            return AppType::Nodejs;
        }
    }

    AppType::Static
}

/// Read and parse `package.json`, if present.
pub(crate) fn read_package_json(app_dir: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(app_dir.join("package.json")).ok()?;
    serde_json::from_str(&content).ok()
}

/// Pick the Node package manager: yarn when a yarn lockfile is present.
pub(crate) fn node_package_manager(app_dir: &Path) -> &'static str {
    if app_dir.join("yarn.lock").exists() {
        "yarn"
    } else {
        "npm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn bare_index_html_is_static() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Static);
    }

    #[test]
    fn next_dependency_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"next": "14.0.0", "react": "18.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Nextjs);
    }

    #[test]
    fn next_config_file_wins_over_everything() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("next.config.js"), "module.exports = {}").unwrap();
        fs::write(dir.path().join("main.py"), "from fastapi import FastAPI").unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Nextjs);
    }

    #[test]
    fn fastapi_signature_without_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("main.py"),
            "from fastapi import FastAPI\napp = FastAPI()\n",
        )
        .unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Fastapi);
    }

    #[test]
    fn start_script_means_nodejs() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"start": "node server.js"}}"#,
        )
        .unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Nodejs);
    }

    #[test]
    fn build_only_script_means_static() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"build": "webpack"}}"#,
        )
        .unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Static);
    }

    #[test]
    fn manifest_without_scripts_defaults_to_nodejs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "thing"}"#).unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Nodejs);
    }

    #[test]
    fn empty_directory_falls_back_to_static() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_type(dir.path()), AppType::Static);
    }

    #[test]
    fn package_manager_prefers_yarn_lockfile() {
        let dir = TempDir::new().unwrap();
        assert_eq!(node_package_manager(dir.path()), "npm");
        fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(node_package_manager(dir.path()), "yarn");
    }
}
