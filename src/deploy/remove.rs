use std::fs;

use anyhow::{Context, Result};

use crate::output::Reporter;
use super::context::Services;

const TOTAL_STEPS: usize = 6;

/// Tear an application down: service, vhost, certificate, directory, and
/// finally the registry entry. The entry is only erased once the
/// filesystem and service cleanup went through.
pub async fn run(services: &Services, domain: &str, backup: bool) -> Result<()> {
    let record = services.store.get_app(domain)?;

    services
        .reporter
        .header(&format!("Removing {}", domain));

    if backup {
        services.reporter.step(1, TOTAL_STEPS, "Creating backup");
        if let Err(err) = backup_app(services, domain).await {
            services
                .reporter
                .warning(&format!("Backup failed, continuing: {}", err));
        }
    } else {
        services.reporter.step(1, TOTAL_STEPS, "Skipping backup");
    }

    services.reporter.step(2, TOTAL_STEPS, "Stopping service");
    services.systemd.stop_service(domain).await;

    services.reporter.step(3, TOTAL_STEPS, "Removing service unit");
    services
        .systemd
        .remove_service(domain)
        .await
        .context("Failed to remove service unit")?;

    services
        .reporter
        .step(4, TOTAL_STEPS, "Removing nginx configuration");
    services
        .nginx
        .remove_config(domain)
        .context("Failed to remove nginx configuration")?;

    services
        .reporter
        .step(5, TOTAL_STEPS, "Revoking SSL certificate");
    services
        .exec
        .run_privileged_unchecked(&format!("certbot delete --cert-name {}", domain))
        .await;

    services
        .reporter
        .step(6, TOTAL_STEPS, "Removing application directory");
    let app_dir = services.paths.app_dir(domain);
    if app_dir.exists() {
        fs::remove_dir_all(&app_dir)
            .with_context(|| format!("Failed to remove {}", app_dir.display()))?;
    }
    // Stale staging/backup copies go with it.
    for dir in [
        services.paths.temp_dir(domain),
        services.paths.update_dir(domain),
        services.paths.app_backup_dir(domain),
    ] {
        if dir.exists() {
            let _ = fs::remove_dir_all(&dir);
        }
    }

    services.nginx.reload().await;

    services
        .store
        .remove_app(domain)
        .context("Failed to erase registry entry")?;

    services
        .reporter
        .success(&format!("Application {} removed ({})", domain, record.app_type));
    Ok(())
}

/// Archive the app directory as a timestamped tarball, trimming old
/// archives down to the configured per-app maximum.
async fn backup_app(services: &Services, domain: &str) -> Result<()> {
    let app_dir = services.paths.app_dir(domain);
    if !app_dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(&services.paths.backup_dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let archive = services
        .paths
        .backup_dir
        .join(format!("{}-{}.tar.gz", domain, stamp));

    services
        .exec
        .run_privileged(&format!(
            "tar -czf {} -C {} {}",
            archive.display(),
            app_dir.parent().unwrap().display(),
            domain
        ))
        .await
        .context("tar failed")?;

    services
        .reporter
        .success(&format!("Backup created: {}", archive.display()));

    prune_backups(services, domain)?;
    Ok(())
}

fn prune_backups(services: &Services, domain: &str) -> Result<()> {
    let keep = services.store.global_config().max_backups_per_app;
    let prefix = format!("{}-", domain);

    let mut archives: Vec<_> = fs::read_dir(&services.paths.backup_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(&prefix) && name.ends_with(".tar.gz"))
                .unwrap_or(false)
        })
        .collect();

    // Names embed the timestamp, so lexical order is chronological.
    archives.sort();
    while archives.len() > keep {
        let oldest = archives.remove(0);
        let _ = fs::remove_file(&oldest);
    }
    Ok(())
}
