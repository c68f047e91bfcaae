use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::{AppRecord, AppType, SystemPaths};
use crate::deployer::{self, Deployer};
use crate::exec::Executor;
use crate::nginx::NginxService;
use crate::output::Reporter;
use crate::registry::Store;
use crate::source::SourceFetcher;
use crate::systemd::SystemdService;

/// Binaries a deploy shells out to, checked up front.
const REQUIRED_COMMANDS: [&str; 5] = ["nginx", "systemctl", "node", "npm", "git"];

/// Everything an operation needs, wired once per CLI invocation.
pub struct Services {
    pub paths: SystemPaths,
    pub exec: Arc<Executor>,
    pub reporter: Arc<dyn Reporter>,
    pub store: Store,
    pub nginx: NginxService,
    pub systemd: SystemdService,
    pub fetcher: SourceFetcher,
}

impl Services {
    pub fn new(paths: SystemPaths, reporter: Arc<dyn Reporter>) -> Self {
        let exec = Arc::new(Executor::new());
        let store = Store::new(paths.registry_file.clone(), paths.backup_dir.clone());
        let nginx = NginxService::new(paths.clone(), exec.clone(), reporter.clone());
        let systemd = SystemdService::new(paths.clone(), exec.clone(), reporter.clone());
        let fetcher = SourceFetcher::new(exec.clone(), reporter.clone());

        Self {
            paths,
            exec,
            reporter,
            store,
            nginx,
            systemd,
            fetcher,
        }
    }

    pub fn deployer_for(&self, app_type: AppType) -> Box<dyn Deployer> {
        deployer::create(
            app_type,
            self.paths.apps_dir.clone(),
            self.exec.clone(),
            self.reporter.clone(),
        )
    }

    /// The command systemd will run: the record's override, or the
    /// deployer's per-type default.
    pub fn start_command_for(&self, record: &AppRecord) -> String {
        if !record.start_command.is_empty() {
            return record.start_command.clone();
        }
        self.deployer_for(record.app_type)
            .default_start_command(record)
    }

    /// A static app with no start command has no process to supervise;
    /// nginx serves the directory.
    pub fn needs_service(&self, record: &AppRecord) -> bool {
        record.app_type != AppType::Static || !record.start_command.is_empty()
    }

    pub async fn check_prerequisites(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_COMMANDS
            .iter()
            .filter(|cmd| !self.exec.command_exists(cmd))
            .copied()
            .collect();

        if !missing.is_empty() {
            self.reporter
                .error(&format!("Missing required commands: {}", missing.join(", ")));
            self.reporter.info(
                "Install them with: sudo apt update && sudo apt install -y nginx nodejs npm git",
            );
            bail!("System prerequisites not met");
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.paths.apps_dir,
            &self.paths.log_dir,
            &self.paths.backup_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        if let Some(parent) = self.paths.registry_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    /// HTTP status probe against the app's internal port after a short
    /// settle. 2xx/3xx counts as reachable.
    pub async fn test_connectivity(&self, port: u16) -> bool {
        tokio::time::sleep(Duration::from_secs(3)).await;

        let probe = format!(
            "curl -s -o /dev/null -w '%{{http_code}}' http://localhost:{}",
            port
        );
        match self.exec.run_unchecked(&probe).await {
            Some(code) if code.starts_with('2') || code.starts_with('3') => {
                self.reporter.success("Application responds");
                true
            }
            Some(code) => {
                self.reporter
                    .warning(&format!("Application not responding (status {})", code));
                false
            }
            None => {
                self.reporter.warning("Connectivity probe failed");
                false
            }
        }
    }

    /// Provision a certificate through certbot's nginx integration.
    pub async fn setup_ssl(&self, domain: &str, email: Option<&str>) -> Result<()> {
        let email = email
            .map(String::from)
            .unwrap_or_else(|| format!("admin@{}", domain));

        if !self.exec.command_exists("certbot") {
            self.reporter.info("Installing certbot...");
            self.exec.run_privileged("apt update").await?;
            self.exec
                .run_privileged("apt install -y certbot python3-certbot-nginx")
                .await
                .context("Failed to install certbot")?;
        }

        let cmd = format!(
            "certbot --nginx -d {} --non-interactive --agree-tos --email {} --redirect",
            domain, email
        );
        match self.exec.run_privileged_unchecked(&cmd).await {
            Some(output) if output.contains("Congratulations") => {
                self.reporter
                    .success(&format!("SSL certificate issued for {}", domain));
                Ok(())
            }
            Some(output) => bail!(
                "certbot did not complete: {}",
                super::stderr_tail(&output)
            ),
            None => bail!("certbot failed for {}", domain),
        }
    }
}
