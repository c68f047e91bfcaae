use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::Environment;

use crate::config::{AppRecord, AppType, SystemPaths};
use crate::exec::Executor;
use crate::output::Reporter;

const SITE_TEMPLATE: &str = include_str!("../../templates/nginx-site.conf.j2");
const MAINTENANCE_TEMPLATE: &str = include_str!("../../templates/nginx-maintenance.conf.j2");
const MAINTENANCE_PAGE: &str = include_str!("../../templates/maintenance.html");

/// Drop-in declaring the shared rate-limit zone every generated vhost
/// references. Written to conf.d/ so nginx.conf itself is never edited.
const RATE_LIMIT_ZONE: &str = "# Managed by deckhand\n\
limit_req_zone $binary_remote_addr zone=deckhand_global:10m rate=50r/s;\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderMode {
    Maintenance,
    Updating,
}

impl PlaceholderMode {
    fn label(&self) -> &'static str {
        match self {
            PlaceholderMode::Maintenance => "Maintenance mode",
            PlaceholderMode::Updating => "Updating",
        }
    }
}

/// Generates, enables, and removes per-domain virtual hosts.
///
/// Configs are always rendered fresh from the record; a previous file is
/// only ever kept as a `.bak` for atomic restore, never parsed or patched.
pub struct NginxService {
    paths: SystemPaths,
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl NginxService {
    pub fn new(paths: SystemPaths, exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            paths,
            exec,
            reporter,
        }
    }

    pub fn render_site(&self, record: &AppRecord) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("site", SITE_TEMPLATE)
            .context("Failed to load nginx site template")?;
        let tmpl = env.get_template("site").unwrap();

        let burst = match record.app_type {
            AppType::Fastapi => 100,
            _ => 50,
        };

        tmpl.render(minijinja::context! {
            domain => &record.domain,
            port => record.port,
            app_type => record.app_type.as_str(),
            type_label => record.app_type.label(),
            app_dir => self.paths.app_dir(&record.domain).display().to_string(),
            burst => burst,
        })
        .context("Failed to render nginx site template")
    }

    pub fn render_placeholder(&self, record: &AppRecord, mode: PlaceholderMode) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("placeholder", MAINTENANCE_TEMPLATE)
            .context("Failed to load nginx maintenance template")?;
        let tmpl = env.get_template("placeholder").unwrap();

        tmpl.render(minijinja::context! {
            domain => &record.domain,
            mode_label => mode.label(),
            maintenance_root => self.paths.maintenance_root.display().to_string(),
            ssl => record.ssl,
        })
        .context("Failed to render nginx maintenance template")
    }

    /// Write the vhost for a record, enable it, and validate the result.
    /// Validation problems are warnings: the site file still lands so the
    /// operator can inspect it, and the app keeps serving on its raw port.
    pub async fn create_config(&self, record: &AppRecord) -> Result<()> {
        let rendered = self.render_site(record)?;
        let site_file = self.paths.site_file(&record.domain);
        let staged = self.paths.nginx_sites.join(format!("{}.temp", record.domain));

        fs::create_dir_all(&self.paths.nginx_sites)
            .with_context(|| format!("Failed to create {}", self.paths.nginx_sites.display()))?;
        fs::write(&staged, &rendered)
            .with_context(|| format!("Failed to write {}", staged.display()))?;

        fs::rename(&staged, &site_file)
            .with_context(|| format!("Failed to move config into {}", site_file.display()))?;

        self.enable_site(&record.domain)?;

        if self.test_config().await {
            self.reporter
                .success(&format!("nginx config created for {}", record.domain));
        } else {
            self.reporter
                .warning(&format!("nginx config for {} created with warnings", record.domain));
        }
        Ok(())
    }

    pub fn remove_config(&self, domain: &str) -> Result<()> {
        let enabled = self.paths.enabled_link(domain);
        if enabled.symlink_metadata().is_ok() {
            fs::remove_file(&enabled)
                .with_context(|| format!("Failed to remove {}", enabled.display()))?;
        }

        for path in [
            self.paths.site_file(domain),
            self.paths.nginx_sites.join(format!("{}.bak", domain)),
        ] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    pub async fn reload(&self) -> bool {
        self.exec
            .run_privileged_unchecked("systemctl reload nginx")
            .await
            .is_some()
    }

    pub async fn test_config(&self) -> bool {
        match self.exec.run_privileged_unchecked("nginx -t 2>&1").await {
            Some(output) => nginx_test_passed(&output),
            None => false,
        }
    }

    /// Swap the live vhost for a static placeholder page, keeping the
    /// previous file as `<domain>.bak` for [`Self::restore_config`].
    pub async fn enable_placeholder(
        &self,
        record: &AppRecord,
        mode: PlaceholderMode,
    ) -> Result<()> {
        fs::create_dir_all(&self.paths.maintenance_root).with_context(|| {
            format!("Failed to create {}", self.paths.maintenance_root.display())
        })?;
        fs::write(self.paths.maintenance_root.join("index.html"), MAINTENANCE_PAGE)
            .context("Failed to write maintenance page")?;

        let rendered = self.render_placeholder(record, mode)?;
        let site_file = self.paths.site_file(&record.domain);
        let backup = self.paths.nginx_sites.join(format!("{}.bak", record.domain));
        let staged = self.paths.nginx_sites.join(format!("{}.temp", record.domain));

        fs::write(&staged, &rendered)
            .with_context(|| format!("Failed to write {}", staged.display()))?;

        if site_file.exists() {
            fs::copy(&site_file, &backup)
                .with_context(|| format!("Failed to back up {}", site_file.display()))?;
        }
        fs::rename(&staged, &site_file)
            .with_context(|| format!("Failed to move config into {}", site_file.display()))?;

        self.enable_site(&record.domain)?;
        self.reload().await;

        self.reporter
            .success(&format!("{} enabled for {}", mode.label(), record.domain));
        Ok(())
    }

    /// Restore the vhost saved by [`Self::enable_placeholder`], or rebuild
    /// it from the record when no backup exists.
    pub async fn restore_config(&self, record: &AppRecord) -> Result<()> {
        let site_file = self.paths.site_file(&record.domain);
        let backup = self.paths.nginx_sites.join(format!("{}.bak", record.domain));

        if backup.exists() {
            fs::rename(&backup, &site_file)
                .with_context(|| format!("Failed to restore {}", site_file.display()))?;
            self.reload().await;
        } else {
            self.create_config(record).await?;
            self.reload().await;
        }
        Ok(())
    }

    /// Make sure the shared `limit_req_zone` drop-in exists.
    pub fn ensure_rate_limit_zone(&self) -> Result<bool> {
        let zone_file = self.paths.nginx_conf_d.join("deckhand.conf");
        if zone_file.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&self.paths.nginx_conf_d)
            .with_context(|| format!("Failed to create {}", self.paths.nginx_conf_d.display()))?;
        fs::write(&zone_file, RATE_LIMIT_ZONE)
            .with_context(|| format!("Failed to write {}", zone_file.display()))?;
        Ok(true)
    }

    /// Drop symlinks in sites-enabled whose target no longer exists.
    pub fn cleanup_orphaned_links(&self) -> Result<usize> {
        let mut removed = 0;
        if !self.paths.nginx_enabled.exists() {
            return Ok(0);
        }
        for entry in fs::read_dir(&self.paths.nginx_enabled)? {
            let path = entry?.path();
            if path.symlink_metadata()?.file_type().is_symlink() && fs::metadata(&path).is_err() {
                self.reporter
                    .info(&format!("Removing orphaned link {}", path.display()));
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn config_exists(&self, domain: &str) -> bool {
        self.paths.site_file(domain).exists()
    }

    fn enable_site(&self, domain: &str) -> Result<()> {
        fs::create_dir_all(&self.paths.nginx_enabled)
            .with_context(|| format!("Failed to create {}", self.paths.nginx_enabled.display()))?;

        let link = self.paths.enabled_link(domain);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(self.paths.site_file(domain), &link)
            .with_context(|| format!("Failed to enable site {}", domain))?;

        Ok(())
    }
}

/// `nginx -t` has no structured output; both marker lines must appear.
fn nginx_test_passed(output: &str) -> bool {
    output.contains("syntax is ok") && output.contains("test is successful")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppStatus;
    use crate::output::Plain;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(app_type: AppType, ssl: bool) -> AppRecord {
        AppRecord {
            domain: "demo.example.com".to_string(),
            port: 3000,
            app_type,
            source: "/tmp/demo".to_string(),
            branch: "main".to_string(),
            ssl,
            created: "2025-01-01T00:00:00+00:00".to_string(),
            last_updated: "2025-01-01T00:00:00+00:00".to_string(),
            status: AppStatus::Active,
            build_command: String::new(),
            start_command: String::new(),
            env_vars: BTreeMap::new(),
        }
    }

    fn service(dir: &TempDir) -> NginxService {
        let mut paths = SystemPaths::default();
        paths.apps_dir = dir.path().join("apps");
        paths.nginx_sites = dir.path().join("sites-available");
        paths.nginx_enabled = dir.path().join("sites-enabled");
        paths.maintenance_root = dir.path().join("maintenance");
        NginxService::new(paths, Arc::new(Executor::new()), Arc::new(Plain))
    }

    #[test]
    fn proxied_site_renders_proxy_pass() {
        let dir = TempDir::new().unwrap();
        let rendered = service(&dir).render_site(&record(AppType::Nextjs, false)).unwrap();

        assert!(rendered.contains("server_name demo.example.com;"));
        assert!(rendered.contains("proxy_pass http://localhost:3000;"));
        assert!(rendered.contains("proxy_buffer_size 128k;"));
        assert!(rendered.contains("X-Frame-Options \"SAMEORIGIN\""));
        assert!(!rendered.contains("try_files $uri"));
    }

    #[test]
    fn fastapi_site_gets_docs_locations_and_api_tuning() {
        let dir = TempDir::new().unwrap();
        let rendered = service(&dir).render_site(&record(AppType::Fastapi, false)).unwrap();

        assert!(rendered.contains("location /docs"));
        assert!(rendered.contains("location /redoc"));
        assert!(rendered.contains("proxy_buffer_size 64k;"));
        assert!(rendered.contains("proxy_connect_timeout 30s;"));
        assert!(rendered.contains("X-Frame-Options \"DENY\""));
        assert!(rendered.contains("burst=100"));
    }

    #[test]
    fn static_site_serves_files_directly() {
        let dir = TempDir::new().unwrap();
        let rendered = service(&dir).render_site(&record(AppType::Static, false)).unwrap();

        assert!(rendered.contains("try_files $uri $uri/ =404;"));
        assert!(rendered.contains("index index.html index.htm;"));
        assert!(!rendered.contains("proxy_pass"));
    }

    #[test]
    fn placeholder_preserves_tls_block_only_when_ssl() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let plain = service
            .render_placeholder(&record(AppType::Nextjs, false), PlaceholderMode::Maintenance)
            .unwrap();
        assert!(!plain.contains("listen 443"));

        let tls = service
            .render_placeholder(&record(AppType::Nextjs, true), PlaceholderMode::Updating)
            .unwrap();
        assert!(tls.contains("listen 443 ssl;"));
        assert!(tls.contains("/etc/letsencrypt/live/demo.example.com/fullchain.pem"));
    }

    #[test]
    fn nginx_test_output_parsing() {
        assert!(nginx_test_passed(
            "nginx: the configuration file /etc/nginx/nginx.conf syntax is ok\n\
             nginx: configuration file /etc/nginx/nginx.conf test is successful"
        ));
        assert!(!nginx_test_passed(
            "nginx: [emerg] unknown directive \"porxy_pass\""
        ));
        assert!(!nginx_test_passed(""));
    }

    #[test]
    fn rate_limit_zone_written_once() {
        let dir = TempDir::new().unwrap();
        let mut paths = SystemPaths::default();
        paths.nginx_conf_d = dir.path().join("conf.d");
        let service = NginxService::new(paths, Arc::new(Executor::new()), Arc::new(Plain));

        assert!(service.ensure_rate_limit_zone().unwrap());
        assert!(!service.ensure_rate_limit_zone().unwrap());

        let content = std::fs::read_to_string(dir.path().join("conf.d/deckhand.conf")).unwrap();
        assert!(content.contains("zone=deckhand_global:10m"));
    }
}
