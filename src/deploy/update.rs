use std::fs;

use anyhow::{bail, Context, Result};

use crate::config::{AppRecord, AppType};
use crate::output::Reporter;
use crate::source::copy_dir_recursive;

use super::context::Services;

const TOTAL_STEPS: usize = 6;

/// Update a deployed application from its git remote.
///
/// The work happens in a side copy while the live app keeps serving; the
/// directories are swapped only once the new version built. A failed
/// restart swaps the old version back in and leaves it running.
pub async fn run(services: &Services, domain: &str) -> Result<()> {
    let mut record = services.store.get_app(domain)?;

    if !record.is_git_source() {
        bail!("Only applications deployed from a git repository can be updated");
    }

    let app_dir = services.paths.app_dir(domain);
    if !app_dir.exists() {
        bail!("Application directory does not exist: {}", app_dir.display());
    }

    services
        .reporter
        .header(&format!("Updating {}", domain));

    services.reporter.step(1, TOTAL_STEPS, "Stopping service");
    if services.needs_service(&record) {
        services.systemd.stop_service(domain).await;
    }

    services
        .reporter
        .step(2, TOTAL_STEPS, "Creating working copy");
    let update_dir = services.paths.update_dir(domain);
    if update_dir.exists() {
        fs::remove_dir_all(&update_dir)?;
    }
    copy_dir_recursive(&app_dir, &update_dir)
        .with_context(|| format!("Failed to copy {} for update", app_dir.display()))?;

    let outcome = update_in_place(services, &mut record).await;

    match outcome {
        Ok(()) => {
            record.touch();
            services.store.update_app(record)?;
            services
                .reporter
                .success(&format!("Application {} updated", domain));
            Ok(())
        }
        Err(err) => {
            // The live directory still holds the previous version unless
            // the swap already happened; restore handles both cases.
            restore_previous(services, &record).await;
            if update_dir.exists() {
                let _ = fs::remove_dir_all(&update_dir);
            }
            Err(err).context(format!("Update of {} failed, previous version kept", domain))
        }
    }
}

async fn update_in_place(services: &Services, record: &mut AppRecord) -> Result<()> {
    let domain = record.domain.clone();
    let app_dir = services.paths.app_dir(&domain);
    let update_dir = services.paths.update_dir(&domain);
    let backup_dir = services.paths.app_backup_dir(&domain);

    services
        .reporter
        .step(3, TOTAL_STEPS, "Updating code from repository");
    services
        .exec
        .run_privileged_unchecked(&format!("chown root:root {}", update_dir.display()))
        .await;
    let used_branch = services.fetcher.update(&update_dir, &record.branch).await?;
    record.branch = used_branch;

    services.reporter.step(4, TOTAL_STEPS, "Rebuilding application");
    services
        .exec
        .run_privileged_unchecked(&format!("chown www-data:www-data {}", update_dir.display()))
        .await;
    rebuild(services, record, &update_dir).await?;

    services
        .reporter
        .step(5, TOTAL_STEPS, "Swapping in new version");
    if backup_dir.exists() {
        fs::remove_dir_all(&backup_dir)?;
    }
    fs::rename(&app_dir, &backup_dir).context("Failed to move current version aside")?;
    if let Err(err) = fs::rename(&update_dir, &app_dir) {
        // Put the old version straight back before surfacing the error.
        let _ = fs::rename(&backup_dir, &app_dir);
        return Err(err).context("Failed to move new version into place");
    }
    super::steps::set_permissions(services, record).await;

    services
        .reporter
        .step(6, TOTAL_STEPS, "Restarting service");
    if services.needs_service(record) {
        let start_command = services.start_command_for(record);
        services
            .systemd
            .create_service(record, &start_command, &record.env_vars)
            .await?;
        services.systemd.restart_service(&domain).await;
        services.systemd.start_and_verify(&domain).await?;
    } else {
        services.nginx.reload().await;
    }

    Ok(())
}

/// Reinstall dependencies only when they are missing; always re-run the
/// build step.
async fn rebuild(
    services: &Services,
    record: &AppRecord,
    dir: &std::path::Path,
) -> Result<()> {
    let deployer = services.deployer_for(record.app_type);

    let deps_present = match record.app_type {
        AppType::Fastapi => dir.join(".venv").exists(),
        AppType::Static => true,
        _ => dir.join("node_modules").exists(),
    };

    if !deps_present {
        services
            .reporter
            .info("Dependencies missing, reinstalling...");
        deployer.install_dependencies(dir, record).await?;
    }

    deployer.build(dir, record).await
}

async fn restore_previous(services: &Services, record: &AppRecord) {
    let domain = &record.domain;
    let app_dir = services.paths.app_dir(domain);
    let backup_dir = services.paths.app_backup_dir(domain);

    if backup_dir.exists() {
        services.reporter.warning("Restoring previous version...");
        if app_dir.exists() {
            let _ = fs::remove_dir_all(&app_dir);
        }
        if fs::rename(&backup_dir, &app_dir).is_err() {
            services
                .reporter
                .error("Could not restore the previous version");
            return;
        }
    }

    // Whatever version is in place now, try to keep it serving.
    if services.needs_service(record) {
        let _ = services.systemd.start_service(domain).await;
    }
}
