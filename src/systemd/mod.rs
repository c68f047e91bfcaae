use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use minijinja::Environment;

use crate::config::{AppRecord, AppType, SystemPaths};
use crate::exec::Executor;
use crate::output::Reporter;

pub mod env;
pub mod readiness;

use readiness::{PhraseHeuristic, Readiness, ReadinessSignal};

const UNIT_TEMPLATE: &str = include_str!("../../templates/app.service.j2");

/// Settle time between `systemctl start` and the first state check.
const START_SETTLE: Duration = Duration::from_secs(5);

/// Creates, starts, and verifies per-domain systemd units.
pub struct SystemdService {
    paths: SystemPaths,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
    readiness: Box<dyn ReadinessSignal>,
}

impl SystemdService {
    pub fn new(paths: SystemPaths, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            paths,
            exec,
            reporter,
            readiness: Box::new(PhraseHeuristic::default()),
        }
    }

    pub fn render_unit(&self, record: &AppRecord, start_command: &str) -> Result<String> {
        let app_dir = self.paths.app_dir(&record.domain);
        let env_file = app_dir.join(env::env_file_name(record.app_type));

        let path_extra = match record.app_type {
            AppType::Fastapi => app_dir.join(".venv/bin"),
            _ => app_dir.join("node_modules/.bin"),
        };

        let mut jinja = Environment::new();
        jinja
            .add_template("unit", UNIT_TEMPLATE)
            .context("Failed to load service unit template")?;
        let tmpl = jinja.get_template("unit").unwrap();

        tmpl.render(minijinja::context! {
            domain => &record.domain,
            type_label => record.app_type.label(),
            app_dir => app_dir.display().to_string(),
            env_file => env_file.display().to_string(),
            environment => env::default_env(record, &app_dir),
            path_extra => path_extra.display().to_string(),
            start_command => start_command,
            log_dir => self.paths.log_dir.display().to_string(),
        })
        .context("Failed to render service unit template")
    }

    /// Write the environment file and the unit, then register it with the
    /// daemon. The unit is not started here.
    pub async fn create_service(
        &self,
        record: &AppRecord,
        start_command: &str,
        extra_env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let app_dir = self.paths.app_dir(&record.domain);

        env::write_env_file(record, &app_dir, extra_env)
            .context("Failed to write environment file")?;

        self.make_binaries_executable(record, &app_dir).await;

        let rendered = self.render_unit(record, start_command)?;
        let unit_file = self.paths.unit_file(&record.domain);
        fs::write(&unit_file, rendered)
            .with_context(|| format!("Failed to write {}", unit_file.display()))?;

        self.exec
            .run_privileged_unchecked(&format!("chmod 644 {}", unit_file.display()))
            .await;
        self.exec
            .run_privileged("systemctl daemon-reload")
            .await
            .context("systemctl daemon-reload failed")?;

        if let Some(status) = self
            .exec
            .run_privileged_unchecked(&format!("systemctl status {}.service", record.domain))
            .await
        {
            if status.contains("could not be found") {
                bail!("Unit {}.service was not registered", record.domain);
            }
        }

        self.reporter
            .success(&format!("systemd unit created for {}", record.domain));
        Ok(())
    }

    pub async fn start_service(&self, domain: &str) -> Result<()> {
        self.exec
            .run_privileged_unchecked(&format!("systemctl enable {}.service", domain))
            .await;
        self.exec
            .run_privileged(&format!("systemctl start {}.service", domain))
            .await
            .with_context(|| format!("Failed to start {}.service", domain))?;
        Ok(())
    }

    pub async fn stop_service(&self, domain: &str) -> bool {
        self.exec
            .run_privileged_unchecked(&format!("systemctl stop {}.service", domain))
            .await
            .is_some()
    }

    pub async fn restart_service(&self, domain: &str) -> bool {
        self.exec
            .run_privileged_unchecked(&format!("systemctl restart {}.service", domain))
            .await
            .is_some()
    }

    /// Stop, disable, delete the unit file, and reload the daemon.
    pub async fn remove_service(&self, domain: &str) -> Result<()> {
        self.stop_service(domain).await;
        self.exec
            .run_privileged_unchecked(&format!("systemctl disable {}.service", domain))
            .await;

        let unit_file = self.paths.unit_file(domain);
        if unit_file.exists() {
            fs::remove_file(&unit_file)
                .with_context(|| format!("Failed to remove {}", unit_file.display()))?;
        }

        self.exec
            .run_privileged_unchecked("systemctl daemon-reload")
            .await;
        Ok(())
    }

    pub async fn is_active(&self, domain: &str) -> bool {
        self.exec
            .run_privileged_unchecked(&format!("systemctl is-active {}.service", domain))
            .await
            .as_deref()
            == Some("active")
    }

    pub async fn status_string(&self, domain: &str) -> String {
        match self
            .exec
            .run_privileged_unchecked(&format!("systemctl is-active {}.service", domain))
            .await
            .as_deref()
        {
            Some("active") => "active".to_string(),
            Some("inactive") => "inactive".to_string(),
            Some("failed") => "failed".to_string(),
            Some(other) if !other.is_empty() => other.to_string(),
            _ => "unknown".to_string(),
        }
    }

    pub fn unit_exists(&self, domain: &str) -> bool {
        self.paths.unit_file(domain).exists()
    }

    pub async fn recent_logs(&self, domain: &str) -> Option<String> {
        self.exec
            .run_privileged_unchecked(&format!(
                "journalctl -u {}.service --since \"1 minute ago\" --no-pager",
                domain
            ))
            .await
    }

    pub async fn tail_logs(&self, domain: &str, lines: usize, follow: bool) -> Result<()> {
        let cmd = if follow {
            format!("journalctl -u {}.service -f", domain)
        } else {
            format!("journalctl -u {}.service -n {} --no-pager", domain, lines)
        };
        self.exec
            .run_privileged_streaming(&cmd)
            .await
            .context("Failed to read service logs")?;
        Ok(())
    }

    /// Start the unit and decide whether it actually came up: settle, check
    /// `is-active`, then classify the last minute of journal output.
    /// `Unconfirmed` is treated as started.
    pub async fn start_and_verify(&self, domain: &str) -> Result<()> {
        self.start_service(domain).await?;

        tokio::time::sleep(START_SETTLE).await;

        if !self.is_active(domain).await {
            let tail = self
                .recent_logs(domain)
                .await
                .map(|logs| tail_of(&logs, 500))
                .unwrap_or_default();
            bail!("Service {} is not active after start\n{}", domain, tail);
        }

        if let Some(logs) = self.recent_logs(domain).await {
            match self.readiness.classify(&logs) {
                Readiness::Ready => {
                    self.reporter.success("Service is up and healthy");
                }
                Readiness::Failed { matched } => {
                    bail!(
                        "Service {} logged errors during startup ({})\n{}",
                        domain,
                        matched,
                        tail_of(&logs, 500)
                    );
                }
                Readiness::Unconfirmed => {
                    self.reporter
                        .info("Service started (no readiness signal in logs yet)");
                }
            }
        } else {
            self.reporter.info("Service started (logs unavailable)");
        }

        Ok(())
    }

    async fn make_binaries_executable(&self, record: &AppRecord, app_dir: &PathBuf) {
        let bin_dir = match record.app_type {
            AppType::Fastapi => app_dir.join(".venv/bin"),
            AppType::Static => return,
            _ => app_dir.join("node_modules/.bin"),
        };
        if bin_dir.exists() {
            self.exec
                .run_privileged_unchecked(&format!("chmod -R +x {}", bin_dir.display()))
                .await;
        }
    }
}

fn tail_of(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let start = text.len() - max;
    // Avoid splitting a UTF-8 sequence.
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(start);
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppStatus;
    use crate::output::Plain;

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

    fn service() -> SystemdService {
        SystemdService::new(
            SystemPaths::default(),
            Arc::new(Executor::new()),
            Arc::new(Plain),
        )
    }

    #[test]
    fn unit_renders_sandbox_and_restart_policy() {
        let rendered = service()
            .render_unit(&record(AppType::Nextjs), "npm start")
            .unwrap();

        assert!(rendered.contains("Description=demo.example.com Next.js application"));
        assert!(rendered.contains("WorkingDirectory=/var/www/apps/demo.example.com"));
        assert!(rendered.contains("EnvironmentFile=/var/www/apps/demo.example.com/.env.production"));
        assert!(rendered.contains("ExecStart=/bin/bash -c 'cd /var/www/apps/demo.example.com && npm start'"));
        assert!(rendered.contains("ExecStartPre=/bin/sleep 5"));
        assert!(rendered.contains("Restart=always"));
        assert!(rendered.contains("StartLimitBurst=3"));
        assert!(rendered.contains("ProtectSystem=strict"));
        assert!(rendered.contains("ReadWritePaths=/var/www/apps/demo.example.com"));
        assert!(rendered.contains("ReadWritePaths=/var/log/apps"));
        assert!(rendered.contains("SyslogIdentifier=demo.example.com"));
        assert!(rendered.contains("node_modules/.bin"));
    }

    #[test]
    fn fastapi_unit_uses_venv_and_dotenv() {
        let rendered = service()
            .render_unit(
                &record(AppType::Fastapi),
                ".venv/bin/python -m uvicorn main:app --host 0.0.0.0 --port 3000 --workers 1",
            )
            .unwrap();

        assert!(rendered.contains("EnvironmentFile=/var/www/apps/demo.example.com/.env"));
        assert!(!rendered.contains(".env.production"));
        assert!(rendered.contains(".venv/bin"));
        assert!(rendered.contains("Environment=PYTHONPATH=/var/www/apps/demo.example.com"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "aé".repeat(400);
        let tail = tail_of(&text, 500);
        assert!(tail.len() <= 500);
        assert!(tail.ends_with('é'));
    }
}
