use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{node_package_manager, read_package_json, Deployer};
use crate::config::{AppRecord, AppType};
use crate::exec::Executor;
use crate::output::Reporter;

const COMMON_ENTRY_FILES: [&str; 3] = ["server.js", "index.js", "app.js"];

pub struct NodejsDeployer {
    apps_dir: PathBuf,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl NodejsDeployer {
    pub fn new(apps_dir: PathBuf, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            apps_dir,
            exec,
            reporter,
        }
    }

    /// The file node should run when package.json declares no start script.
    fn entry_file(app_dir: &Path, package: &serde_json::Value) -> Option<String> {
        let declared = package
            .get("main")
            .and_then(|v| v.as_str())
            .unwrap_or("index.js");
        if app_dir.join(declared).exists() {
            return Some(declared.to_string());
        }
        COMMON_ENTRY_FILES
            .iter()
            .find(|file| app_dir.join(file).exists())
            .map(|file| file.to_string())
    }
}

#[async_trait]
impl Deployer for NodejsDeployer {
    fn app_type(&self) -> AppType {
        AppType::Nodejs
    }

    fn required_files(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn optional_files(&self) -> &'static [&'static str] {
        &[
            "package-lock.json",
            "yarn.lock",
            ".env",
            "server.js",
            "index.js",
            "app.js",
        ]
    }

    async fn validate_structure(&self, app_dir: &Path) -> Result<()> {
        let package = read_package_json(app_dir).context("package.json missing or invalid")?;

        if package.get("name").and_then(|v| v.as_str()).is_none() {
            bail!("package.json has no 'name' field");
        }
        if package.get("version").is_none() {
            self.reporter.warning("package.json has no 'version' field");
        }

        let has_start = package
            .get("scripts")
            .and_then(|s| s.get("start"))
            .is_some();

        if !has_start && Self::entry_file(app_dir, &package).is_none() {
            bail!("No start script and no entry file (server.js, index.js, app.js) found");
        }

        if package.get("dependencies").is_none() && package.get("devDependencies").is_none() {
            self.reporter.warning("package.json declares no dependencies");
        }

        self.reporter.success("Node.js structure looks valid");
        Ok(())
    }

    async fn install_dependencies(&self, app_dir: &Path, _record: &AppRecord) -> Result<()> {
        let manager = node_package_manager(app_dir);
        self.reporter
            .info(&format!("Installing dependencies with {}...", manager));

        let node_modules = app_dir.join("node_modules");
        if node_modules.exists() {
            std::fs::remove_dir_all(&node_modules)?;
        }

        let install = match manager {
            "yarn" => format!("cd {} && yarn install --production", app_dir.display()),
            _ => format!("cd {} && npm install --production", app_dir.display()),
        };
        self.exec
            .run(&install)
            .await
            .with_context(|| format!("Failed to install dependencies with {}", manager))?;

        if !node_modules.exists() {
            bail!("node_modules was not created by the install");
        }

        self.reporter.success("Node.js dependencies installed");
        Ok(())
    }

    async fn build(&self, app_dir: &Path, record: &AppRecord) -> Result<()> {
        let package = read_package_json(app_dir).context("package.json missing or invalid")?;

        let has_build = package
            .get("scripts")
            .and_then(|s| s.get("build"))
            .is_some();

        if has_build || !record.build_command.is_empty() {
            let build_cmd = if record.build_command.is_empty() {
                match node_package_manager(app_dir) {
                    "yarn" => "yarn build".to_string(),
                    _ => "npm run build".to_string(),
                }
            } else {
                record.build_command.clone()
            };
            self.reporter.info(&format!("Running build: {}", build_cmd));
            self.exec
                .run(&format!("cd {} && {}", app_dir.display(), build_cmd))
                .await
                .context("Build script failed")?;
        } else {
            self.reporter.info("No build script declared, skipping");
        }

        if let Some(entry) = Self::entry_file(app_dir, &package) {
            self.exec
                .run(&format!("cd {} && node --check {}", app_dir.display(), entry))
                .await
                .with_context(|| format!("Syntax error in {}", entry))?;
        }

        Ok(())
    }

    fn default_start_command(&self, record: &AppRecord) -> String {
        let app_dir = self.apps_dir.join(&record.domain);
        if let Some(package) = read_package_json(&app_dir) {
            if package
                .get("scripts")
                .and_then(|s| s.get("start"))
                .is_some()
            {
                return "npm start".to_string();
            }
            if let Some(entry) = Self::entry_file(&app_dir, &package) {
                return format!("node {}", entry);
            }
        }
        "node index.js".to_string()
    }

    fn default_build_command(&self, record: &AppRecord) -> String {
        match node_package_manager(&self.apps_dir.join(&record.domain)) {
            "yarn" => "yarn build".to_string(),
            _ => "npm run build".to_string(),
        }
    }

    fn default_env(&self, record: &AppRecord, _app_dir: &Path) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("NODE_ENV".to_string(), "production".to_string()),
            ("PORT".to_string(), record.port.to_string()),
            ("HOST".to_string(), "0.0.0.0".to_string()),
        ])
    }

    async fn check_requirements(&self) -> Result<()> {
        for binary in ["node", "npm"] {
            if !self.exec.command_exists(binary) {
                bail!("Missing required command: {}", binary);
            }
        }
        Ok(())
    }
}
