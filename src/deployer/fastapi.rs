use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::Deployer;
use crate::config::{AppRecord, AppType};
use crate::exec::Executor;
use crate::output::Reporter;

/// Installed when the source ships no requirements.txt: the framework, an
/// ASGI server, form parsing, and dotenv loading.
const BASE_DEPENDENCIES: [&str; 4] = [
    "fastapi",
    "uvicorn[standard]",
    "python-multipart",
    "python-dotenv",
];

pub struct FastapiDeployer {
    apps_dir: PathBuf,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl FastapiDeployer {
    pub fn new(apps_dir: PathBuf, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            apps_dir,
            exec,
            reporter,
        }
    }

    /// Uvicorn must exist even when requirements.txt forgot to list it;
    /// the generated start command depends on it.
    async fn ensure_uvicorn(&self, app_dir: &Path) -> Result<()> {
        let listing = self
            .exec
            .run_unchecked(&format!("cd {} && .venv/bin/pip list", app_dir.display()))
            .await;

        match listing {
            Some(list) if list.to_lowercase().contains("uvicorn") => Ok(()),
            _ => {
                self.reporter.info("Uvicorn missing, installing...");
                self.exec
                    .run(&format!(
                        "cd {} && .venv/bin/pip install 'uvicorn[standard]'",
                        app_dir.display()
                    ))
                    .await
                    .context("Failed to install uvicorn")?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Deployer for FastapiDeployer {
    fn app_type(&self) -> AppType {
        AppType::Fastapi
    }

    fn required_files(&self) -> &'static [&'static str] {
        &["main.py"]
    }

    fn optional_files(&self) -> &'static [&'static str] {
        &[
            "requirements.txt",
            ".env",
            "pyproject.toml",
            "setup.py",
            "alembic.ini",
        ]
    }

    async fn validate_structure(&self, app_dir: &Path) -> Result<()> {
        let main_file = app_dir.join("main.py");
        if !main_file.exists() {
            bail!("main.py not found");
        }

        let main_content = std::fs::read_to_string(&main_file)?;
        if !main_content.contains("from fastapi import") && !main_content.contains("import fastapi")
        {
            self.reporter
                .warning("main.py does not look like a FastAPI application");
        }
        if !main_content.contains("app = ") && !main_content.contains("application = ") {
            self.reporter
                .warning("No application variable found in main.py");
        }

        let requirements = app_dir.join("requirements.txt");
        if requirements.exists() {
            let content = std::fs::read_to_string(&requirements)?.to_lowercase();
            if !content.contains("fastapi") {
                self.reporter
                    .warning("fastapi not listed in requirements.txt, will be installed anyway");
            }
            if !content.contains("uvicorn") {
                self.reporter
                    .warning("uvicorn not listed in requirements.txt, will be installed anyway");
            }
        } else {
            self.reporter
                .info("No requirements.txt, base dependencies will be installed");
        }

        self.reporter.success("FastAPI structure looks valid");
        Ok(())
    }

    async fn install_dependencies(&self, app_dir: &Path, _record: &AppRecord) -> Result<()> {
        self.reporter.info("Setting up Python virtual environment...");

        let venv = app_dir.join(".venv");
        if venv.exists() {
            std::fs::remove_dir_all(&venv)?;
        }

        self.exec
            .run(&format!("cd {} && python3 -m venv .venv", app_dir.display()))
            .await
            .context("Failed to create virtual environment")?;

        if self
            .exec
            .run_unchecked(&format!(
                "cd {} && .venv/bin/pip install --upgrade pip",
                app_dir.display()
            ))
            .await
            .is_none()
        {
            self.reporter.warning("pip upgrade failed, continuing...");
        }

        if app_dir.join("requirements.txt").exists() {
            self.reporter
                .info("Installing dependencies from requirements.txt...");
            self.exec
                .run(&format!(
                    "cd {} && .venv/bin/pip install -r requirements.txt",
                    app_dir.display()
                ))
                .await
                .context("Failed to install requirements.txt dependencies")?;
        } else {
            self.reporter.info("Installing base dependencies...");
            for dep in BASE_DEPENDENCIES {
                self.exec
                    .run(&format!(
                        "cd {} && .venv/bin/pip install '{}'",
                        app_dir.display(),
                        dep
                    ))
                    .await
                    .with_context(|| format!("Failed to install {}", dep))?;
            }
        }

        self.ensure_uvicorn(app_dir).await?;

        self.exec
            .run_unchecked(&format!("chmod +x {}/.venv/bin/*", app_dir.display()))
            .await;

        self.reporter.success("Python environment ready");
        Ok(())
    }

    async fn build(&self, app_dir: &Path, _record: &AppRecord) -> Result<()> {
        // No real build step; byte-compile the entry file as a syntax check.
        if !app_dir.join(".venv").exists() {
            bail!("Virtual environment not found");
        }

        self.exec
            .run(&format!(
                "cd {} && .venv/bin/python -m py_compile main.py",
                app_dir.display()
            ))
            .await
            .context("main.py has syntax errors")?;

        self.reporter.success("FastAPI application prepared");
        Ok(())
    }

    fn default_start_command(&self, record: &AppRecord) -> String {
        format!(
            ".venv/bin/python -m uvicorn main:app --host 0.0.0.0 --port {} --workers 1",
            record.port
        )
    }

    fn default_build_command(&self, _record: &AppRecord) -> String {
        String::new()
    }

    fn default_env(&self, record: &AppRecord, app_dir: &Path) -> BTreeMap<String, String> {
        let app_dir = if app_dir.as_os_str().is_empty() {
            self.apps_dir.join(&record.domain)
        } else {
            app_dir.to_path_buf()
        };
        BTreeMap::from([
            ("PYTHONPATH".to_string(), app_dir.display().to_string()),
            ("PORT".to_string(), record.port.to_string()),
            ("HOST".to_string(), "0.0.0.0".to_string()),
            ("ENVIRONMENT".to_string(), "production".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ])
    }

    async fn check_requirements(&self) -> Result<()> {
        for binary in ["python3", "pip3"] {
            if !self.exec.command_exists(binary) {
                bail!("Missing required command: {}", binary);
            }
        }
        Ok(())
    }
}
