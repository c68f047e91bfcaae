use anyhow::{Context, Result};

use crate::config::AppType;

use crate::output::Reporter;
use super::context::Services;

const TOTAL_STEPS: usize = 4;

/// Put a broken application back together without refetching its source:
/// reinstall what is missing, recreate the unit, and bring it back up.
pub async fn run(services: &Services, domain: &str) -> Result<()> {
    let record = services.store.get_app(domain)?;
    let app_dir = services.paths.app_dir(domain);

    services
        .reporter
        .header(&format!("Repairing {}", domain));

    services.reporter.step(1, TOTAL_STEPS, "Stopping service");
    services.systemd.stop_service(domain).await;

    services.reporter.step(2, TOTAL_STEPS, "Repairing application");
    match record.app_type {
        AppType::Fastapi => {
            if !app_dir.join(".venv").exists() {
                services.reporter.info("Recreating virtual environment...");
                services
                    .exec
                    .run(&format!("cd {} && python3 -m venv .venv", app_dir.display()))
                    .await
                    .context("Failed to recreate virtual environment")?;
            }
            if app_dir.join("requirements.txt").exists() {
                services.reporter.info("Reinstalling dependencies...");
                services
                    .exec
                    .run(&format!(
                        "cd {} && .venv/bin/pip install -r requirements.txt",
                        app_dir.display()
                    ))
                    .await
                    .context("Failed to reinstall dependencies")?;
            }
            services
                .exec
                .run_unchecked(&format!(
                    "cd {} && .venv/bin/pip install 'uvicorn[standard]'",
                    app_dir.display()
                ))
                .await;
            services
                .exec
                .run_unchecked(&format!("chmod -R +x {}/.venv/bin", app_dir.display()))
                .await;
        }
        AppType::Static => {
            services.reporter.info("Static site, nothing to repair");
        }
        _ => {
            services.reporter.info("Reinstalling dependencies...");
            services
                .exec
                .run(&format!(
                    "cd {} && rm -rf node_modules package-lock.json && npm install",
                    app_dir.display()
                ))
                .await
                .context("Failed to reinstall dependencies")?;

            if record.app_type == AppType::Nextjs {
                services.reporter.info("Rebuilding application...");
                let build_cmd = if record.build_command.is_empty() {
                    "npm run build".to_string()
                } else {
                    record.build_command.clone()
                };
                services
                    .exec
                    .run(&format!("cd {} && {}", app_dir.display(), build_cmd))
                    .await
                    .context("Rebuild failed")?;
            }
        }
    }

    services.reporter.step(3, TOTAL_STEPS, "Recreating service unit");
    if services.needs_service(&record) {
        let start_command = services.start_command_for(&record);
        services
            .systemd
            .create_service(&record, &start_command, &record.env_vars)
            .await?;
    }

    services.reporter.step(4, TOTAL_STEPS, "Restarting service");
    if services.needs_service(&record) {
        services.systemd.start_and_verify(domain).await?;
    } else {
        services.nginx.reload().await;
    }

    services
        .reporter
        .success(&format!("Application {} repaired", domain));
    Ok(())
}
