use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{node_package_manager, read_package_json, Deployer};
use crate::config::{AppRecord, AppType};
use crate::exec::Executor;
use crate::output::Reporter;

pub struct NextjsDeployer {
    apps_dir: PathBuf,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl NextjsDeployer {
    pub fn new(apps_dir: PathBuf, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            apps_dir,
            exec,
            reporter,
        }
    }
}

#[async_trait]
impl Deployer for NextjsDeployer {
    fn app_type(&self) -> AppType {
        AppType::Nextjs
    }

    fn required_files(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn optional_files(&self) -> &'static [&'static str] {
        &[
            ".env.local",
            ".env.production",
            "next.config.js",
            "tailwind.config.js",
        ]
    }

    async fn validate_structure(&self, app_dir: &Path) -> Result<()> {
        let package = read_package_json(app_dir).context("package.json missing or invalid")?;

        let empty = serde_json::Map::new();
        let deps = package
            .get("dependencies")
            .and_then(|v| v.as_object())
            .unwrap_or(&empty);
        let dev_deps = package
            .get("devDependencies")
            .and_then(|v| v.as_object())
            .unwrap_or(&empty);

        if !deps.contains_key("next") && !dev_deps.contains_key("next") {
            bail!("next not found in dependencies");
        }
        if !deps.contains_key("react") && !dev_deps.contains_key("react") {
            bail!("react not found in dependencies");
        }

        let scripts = package.get("scripts").and_then(|v| v.as_object());
        if scripts.map_or(true, |s| !s.contains_key("build")) {
            self.reporter
                .warning("No 'build' script in package.json, will use 'next build'");
        }
        if scripts.map_or(true, |s| !s.contains_key("start")) {
            self.reporter
                .warning("No 'start' script in package.json, will use 'next start'");
        }

        // pages/ for classic projects, app/ since Next 13, src/ for either.
        let has_source_dir = ["pages", "src", "app"]
            .iter()
            .any(|dir| app_dir.join(dir).is_dir());
        if !has_source_dir {
            bail!("No Next.js source directory found (expected pages/, src/, or app/)");
        }

        self.reporter.success("Next.js structure looks valid");
        Ok(())
    }

    async fn install_dependencies(&self, app_dir: &Path, _record: &AppRecord) -> Result<()> {
        self.reporter.info("Installing Node.js dependencies...");

        // Wipe and reinstall so stale modules never leak into the build.
        let node_modules = app_dir.join("node_modules");
        if node_modules.exists() {
            std::fs::remove_dir_all(&node_modules)?;
        }
        let lockfile = app_dir.join("package-lock.json");
        if lockfile.exists() && node_package_manager(app_dir) == "npm" {
            std::fs::remove_file(&lockfile)?;
        }

        let install = match node_package_manager(app_dir) {
            "yarn" => format!("cd {} && yarn install", app_dir.display()),
            _ => format!("cd {} && npm install --production=false", app_dir.display()),
        };
        self.exec
            .run(&install)
            .await
            .context("Failed to install Node.js dependencies")?;

        if !node_modules.exists() {
            bail!("node_modules was not created by the install");
        }

        self.reporter.success("Node.js dependencies installed");
        Ok(())
    }

    async fn build(&self, app_dir: &Path, record: &AppRecord) -> Result<()> {
        // The package-manager choice must look at the tree being built,
        // which during a deploy is the staging directory.
        let build_cmd = if record.build_command.is_empty() {
            match node_package_manager(app_dir) {
                "yarn" => "yarn build".to_string(),
                _ => "npm run build".to_string(),
            }
        } else {
            record.build_command.clone()
        };

        self.reporter
            .info(&format!("Building Next.js application: {}", build_cmd));

        self.exec
            .run(&format!("cd {} && {}", app_dir.display(), build_cmd))
            .await
            .context("Next.js build failed")?;

        let next_dir = app_dir.join(".next");
        if !next_dir.exists() {
            bail!("Build did not produce a .next directory");
        }
        if !next_dir.join("build-manifest.json").exists() {
            self.reporter
                .warning("build-manifest.json not found, but .next exists");
        }

        self.reporter.success("Next.js application built");
        Ok(())
    }

    fn default_start_command(&self, record: &AppRecord) -> String {
        format!("./node_modules/.bin/next start --port {}", record.port)
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
            ("HOSTNAME".to_string(), "localhost".to_string()),
            ("NEXT_TELEMETRY_DISABLED".to_string(), "1".to_string()),
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
