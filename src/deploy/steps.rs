use std::fs;

use anyhow::{bail, Context, Result};

use crate::config::{validate, AppRecord};
use crate::output::Reporter;
use crate::source::copy_dir_recursive;

use super::context::Services;

pub const TOTAL_STEPS: usize = 12;

/// Step 1: reject bad input before anything touches the filesystem.
pub fn validate_inputs(services: &Services, record: &AppRecord) -> Result<()> {
    services
        .reporter
        .step(1, TOTAL_STEPS, "Validating parameters");

    validate::validate_domain(&record.domain)?;
    validate::validate_port(record.port)?;
    validate::validate_branch(&record.branch)?;

    if services.store.app_exists(&record.domain) {
        bail!("Application {} already exists", record.domain);
    }
    if services.store.is_port_in_use(record.port, None) {
        bail!("Port {} is already in use by another application", record.port);
    }

    Ok(())
}

/// Step 2: if the target directory already exists this is an update in
/// place, so keep a copy that a failed deploy can restore.
pub fn backup_existing(services: &Services, record: &AppRecord) -> Result<bool> {
    services
        .reporter
        .step(2, TOTAL_STEPS, "Backing up existing directory");

    let app_dir = services.paths.app_dir(&record.domain);
    if !app_dir.exists() {
        services.reporter.info("No existing directory, fresh deploy");
        return Ok(false);
    }

    let backup_dir = services.paths.app_backup_dir(&record.domain);
    if backup_dir.exists() {
        fs::remove_dir_all(&backup_dir)?;
    }
    copy_dir_recursive(&app_dir, &backup_dir)
        .with_context(|| format!("Failed to back up {}", app_dir.display()))?;

    services
        .reporter
        .success(&format!("Backup created at {}", backup_dir.display()));
    Ok(true)
}

/// Step 3: materialize the source into the staging directory. Returns the
/// branch actually used.
pub async fn fetch_source(services: &Services, record: &AppRecord) -> Result<String> {
    services.reporter.step(3, TOTAL_STEPS, "Fetching source");

    let temp_dir = services.paths.temp_dir(&record.domain);
    if temp_dir.exists() {
        fs::remove_dir_all(&temp_dir)?;
    }

    services
        .fetcher
        .fetch(&record.source, &record.branch, &temp_dir)
        .await
}

/// Step 4: per-type structure validation against the staged tree.
pub async fn validate_structure(services: &Services, record: &AppRecord) -> Result<()> {
    services
        .reporter
        .step(4, TOTAL_STEPS, "Validating application structure");

    let deployer = services.deployer_for(record.app_type);
    deployer.check_requirements().await?;
    deployer
        .validate_structure(&services.paths.temp_dir(&record.domain))
        .await
}

/// Step 5.
pub async fn install_dependencies(services: &Services, record: &AppRecord) -> Result<()> {
    services
        .reporter
        .step(5, TOTAL_STEPS, "Installing dependencies");

    let spinner = services.reporter.spinner("Installing...");
    let result = services
        .deployer_for(record.app_type)
        .install_dependencies(&services.paths.temp_dir(&record.domain), record)
        .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    result
}

/// Step 6: build in staging, then move the tree into its final location.
pub async fn build_and_finalize(services: &Services, record: &AppRecord) -> Result<()> {
    services.reporter.step(6, TOTAL_STEPS, "Building application");

    let temp_dir = services.paths.temp_dir(&record.domain);
    let spinner = services.reporter.spinner("Building...");
    let result = services
        .deployer_for(record.app_type)
        .build(&temp_dir, record)
        .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    result?;

    let app_dir = services.paths.app_dir(&record.domain);
    if app_dir.exists() {
        fs::remove_dir_all(&app_dir)?;
    }
    fs::rename(&temp_dir, &app_dir)
        .with_context(|| format!("Failed to move build into {}", app_dir.display()))?;

    if app_dir.join(".git").exists() {
        services.fetcher.mark_git_safe(&app_dir).await;
    }
    set_permissions(services, record).await;

    Ok(())
}

/// Step 7: non-fatal, the app can still run without a managed env file.
pub async fn write_env_file(services: &Services, record: &AppRecord) {
    services
        .reporter
        .step(7, TOTAL_STEPS, "Writing environment file");

    let app_dir = services.paths.app_dir(&record.domain);
    if let Err(err) = services
        .deployer_for(record.app_type)
        .write_env_file(&app_dir, record)
    {
        services
            .reporter
            .warning(&format!("Could not write environment file: {}", err));
    }
}

/// Step 8: non-fatal, without a vhost the app still answers on its port.
pub async fn write_nginx_config(services: &Services, record: &AppRecord) {
    services
        .reporter
        .step(8, TOTAL_STEPS, "Writing nginx configuration");

    if let Err(err) = services.nginx.create_config(record).await {
        services
            .reporter
            .warning(&format!("nginx configuration failed: {}", err));
    }
}

/// Step 9: fatal. Create the unit and verify the service comes up.
pub async fn start_service(services: &Services, record: &AppRecord) -> Result<()> {
    services
        .reporter
        .step(9, TOTAL_STEPS, "Creating and starting service");

    if !services.needs_service(record) {
        services
            .reporter
            .info("Static site, no service unit required");
        return Ok(());
    }

    let start_command = services.start_command_for(record);
    services
        .systemd
        .create_service(record, &start_command, &record.env_vars)
        .await?;
    services.systemd.start_and_verify(&record.domain).await
}

/// Step 10.
pub async fn reload_nginx(services: &Services) {
    services.reporter.step(10, TOTAL_STEPS, "Reloading nginx");
    if !services.nginx.reload().await {
        services.reporter.warning("nginx reload failed");
    }
}

/// Step 11: non-fatal, result is informational.
pub async fn probe_connectivity(services: &Services, record: &AppRecord) {
    services
        .reporter
        .step(11, TOTAL_STEPS, "Verifying connectivity");

    if !services.needs_service(record) {
        services.reporter.info("Static site, skipping port probe");
        return;
    }
    services.test_connectivity(record.port).await;
}

/// Step 12: non-fatal. On failure the app stays HTTP-only and the
/// record's ssl flag is cleared.
pub async fn provision_tls(services: &Services, record: &mut AppRecord) {
    if !record.ssl {
        services.reporter.step(12, TOTAL_STEPS, "Skipping SSL");
        return;
    }

    services.reporter.step(12, TOTAL_STEPS, "Provisioning SSL");
    if let Err(err) = services.setup_ssl(&record.domain, None).await {
        services.reporter.warning(&format!(
            "SSL not configured, application available over HTTP only: {}",
            err
        ));
        record.ssl = false;
    }
}

/// Undo a failed deploy: remove whatever was partially created and put the
/// previous directory back if one was saved. The registry was never
/// touched, so there is nothing to erase there.
pub async fn cleanup_failed(services: &Services, record: &AppRecord, had_backup: bool) {
    services.reporter.info("Cleaning up failed deployment...");

    if services.needs_service(record) {
        let _ = services.systemd.remove_service(&record.domain).await;
    }
    if let Err(err) = services.nginx.remove_config(&record.domain) {
        services
            .reporter
            .warning(&format!("Could not remove nginx config: {}", err));
    }

    let app_dir = services.paths.app_dir(&record.domain);
    let temp_dir = services.paths.temp_dir(&record.domain);
    for dir in [&app_dir, &temp_dir] {
        if dir.exists() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    let backup_dir = services.paths.app_backup_dir(&record.domain);
    if had_backup && backup_dir.exists() {
        services.reporter.info("Restoring previous version...");
        match copy_dir_recursive(&backup_dir, &app_dir) {
            Ok(()) => {
                let _ = fs::remove_dir_all(&backup_dir);
                set_permissions(services, record).await;
                services.reporter.warning("Previous version restored");
            }
            Err(err) => services
                .reporter
                .error(&format!("Restore from backup failed: {}", err)),
        }
    }

    services.nginx.reload().await;
    services.reporter.info("Cleanup complete");
}

/// Hand the tree to the service user and make dependency-manager binaries
/// runnable. Only the directories that need it, not a recursive sweep of
/// node_modules.
pub async fn set_permissions(services: &Services, record: &AppRecord) {
    let app_dir = services.paths.app_dir(&record.domain);

    services
        .exec
        .run_privileged_unchecked(&format!("chown www-data:www-data {}", app_dir.display()))
        .await;

    for dir in ["public", "static", ".next", "dist", "build", "out"] {
        let path = app_dir.join(dir);
        if path.exists() {
            services
                .exec
                .run_privileged_unchecked(&format!(
                    "chown -R www-data:www-data {}",
                    path.display()
                ))
                .await;
        }
    }

    for bin_dir in ["node_modules/.bin", ".venv/bin"] {
        let path = app_dir.join(bin_dir);
        if path.exists() {
            services
                .exec
                .run_privileged_unchecked(&format!("chmod -R +x {}", path.display()))
                .await;
        }
    }
}
