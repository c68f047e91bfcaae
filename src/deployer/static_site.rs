use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{node_package_manager, read_package_json, Deployer};
use crate::config::{AppRecord, AppType};
use crate::exec::Executor;
use crate::output::Reporter;

/// Static sites are served by nginx directly; the only work here is an
/// optional build-tool pass when the source ships a package manifest.
pub struct StaticDeployer {
    #[allow(dead_code)]
    apps_dir: PathBuf,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl StaticDeployer {
    pub fn new(apps_dir: PathBuf, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            apps_dir,
            exec,
            reporter,
        }
    }
}

#[async_trait]
impl Deployer for StaticDeployer {
    fn app_type(&self) -> AppType {
        AppType::Static
    }

    fn required_files(&self) -> &'static [&'static str] {
        &["index.html"]
    }

    fn optional_files(&self) -> &'static [&'static str] {
        &[
            "package.json",
            "gulpfile.js",
            "webpack.config.js",
            "index.css",
            "styles.css",
            "main.css",
        ]
    }

    async fn validate_structure(&self, app_dir: &Path) -> Result<()> {
        let index = app_dir.join("index.html");
        if !index.exists() {
            bail!("index.html not found");
        }

        let content = std::fs::read_to_string(&index)?.to_lowercase();
        if !content.contains("<html") {
            self.reporter
                .warning("index.html does not look like an HTML document");
        }
        if !content.contains("<title>") {
            self.reporter.warning("index.html has no <title> tag");
        }

        self.reporter.success("Static site structure looks valid");
        Ok(())
    }

    async fn install_dependencies(&self, app_dir: &Path, _record: &AppRecord) -> Result<()> {
        // A manifest here means build tooling, not runtime dependencies.
        if !app_dir.join("package.json").exists() {
            self.reporter.info("Pure static site, nothing to install");
            return Ok(());
        }

        let manager = node_package_manager(app_dir);
        self.reporter
            .info(&format!("Installing build tools with {}...", manager));

        let node_modules = app_dir.join("node_modules");
        if node_modules.exists() {
            std::fs::remove_dir_all(&node_modules)?;
        }

        self.exec
            .run(&format!("cd {} && {} install", app_dir.display(), manager))
            .await
            .with_context(|| format!("Failed to install build tools with {}", manager))?;

        Ok(())
    }

    async fn build(&self, app_dir: &Path, record: &AppRecord) -> Result<()> {
        let Some(package) = read_package_json(app_dir) else {
            return Ok(());
        };

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
        }

        Ok(())
    }

    fn default_start_command(&self, _record: &AppRecord) -> String {
        // Served by nginx; there is no process to run.
        String::new()
    }

    fn default_build_command(&self, _record: &AppRecord) -> String {
        String::new()
    }

    fn default_env(&self, record: &AppRecord, _app_dir: &Path) -> BTreeMap<String, String> {
        BTreeMap::from([("PORT".to_string(), record.port.to_string())])
    }
}
