pub mod context;
pub mod diagnose;
pub mod remove;
pub mod repair;
pub mod steps;
pub mod update;

use std::fs;

use anyhow::{Context, Result};

use crate::config::AppRecord;
use crate::output::Reporter;

use context::Services;

/// Run the full add pipeline for a new application.
///
/// Fatal steps abort and roll back; non-fatal steps degrade with a warning.
/// The registry is only written after everything else succeeded, so a
/// failed deploy never leaves a half-registered app behind.
pub async fn run(services: &Services, mut record: AppRecord) -> Result<()> {
    services.reporter.header(&format!(
        "Deploying {} ({} on port {})",
        record.domain, record.app_type, record.port
    ));

    steps::validate_inputs(services, &record)?;

    let had_backup = match steps::backup_existing(services, &record) {
        Ok(had_backup) => had_backup,
        Err(err) => {
            services
                .reporter
                .warning(&format!("Backup failed, continuing: {}", err));
            false
        }
    };

    let outcome = run_fatal_steps(services, &mut record).await;
    if let Err(err) = outcome {
        steps::cleanup_failed(services, &record, had_backup).await;
        return Err(err).context("Deploy failed");
    }

    steps::reload_nginx(services).await;
    steps::probe_connectivity(services, &record).await;
    steps::provision_tls(services, &mut record).await;

    record.set_active();
    services
        .store
        .add_app(record.clone())
        .context("Failed to record application in registry")?;

    // The pre-deploy copy is only needed while a failure can still occur.
    let backup_dir = services.paths.app_backup_dir(&record.domain);
    if backup_dir.exists() {
        let _ = fs::remove_dir_all(&backup_dir);
    }

    println!();
    services
        .reporter
        .success(&format!("Application {} deployed!", record.domain));
    services
        .reporter
        .info(&format!("HTTP:     http://{}", record.domain));
    if record.ssl {
        services
            .reporter
            .info(&format!("HTTPS:    https://{}", record.domain));
    }
    services
        .reporter
        .info(&format!("Port:     {}", record.port));
    services.reporter.info(&format!(
        "Directory: {}",
        services.paths.app_dir(&record.domain).display()
    ));
    if services.needs_service(&record) {
        services
            .reporter
            .info(&format!("Service:  {}.service", record.domain));
    }

    Ok(())
}

async fn run_fatal_steps(services: &Services, record: &mut AppRecord) -> Result<()> {
    let used_branch = steps::fetch_source(services, record).await?;
    record.branch = used_branch;

    steps::validate_structure(services, record).await?;
    steps::install_dependencies(services, record).await?;
    steps::build_and_finalize(services, record).await?;
    steps::write_env_file(services, record).await;
    steps::write_nginx_config(services, record).await;
    steps::start_service(services, record).await?;
    Ok(())
}

/// Restart a managed application and re-verify it comes up.
pub async fn restart(services: &Services, domain: &str) -> Result<()> {
    let record = services.store.get_app(domain)?;

    if !services.needs_service(&record) {
        services
            .reporter
            .info("Static site, nothing to restart; reloading nginx");
        services.nginx.reload().await;
        return Ok(());
    }

    services.reporter.step(1, 2, "Restarting service");
    if !services.systemd.restart_service(domain).await {
        anyhow::bail!("Failed to restart {}.service", domain);
    }

    services.reporter.step(2, 2, "Verifying service state");
    services.systemd.start_and_verify(domain).await?;

    services
        .reporter
        .success(&format!("Application {} restarted", domain));
    Ok(())
}

/// Last chunk of command output for error messages.
pub(crate) fn stderr_tail(output: &str) -> String {
    const MAX: usize = 400;
    let trimmed = output.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let start = trimmed.len() - MAX;
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(start);
    format!("...{}", &trimmed[start..])
}
