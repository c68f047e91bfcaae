use anyhow::Result;

use crate::deploy::context::Services;
use crate::output::Reporter;

pub async fn run(services: &Services, domain: &str, lines: usize, follow: bool) -> Result<()> {
    if !services.store.app_exists(domain) {
        anyhow::bail!("Application {} not found", domain);
    }

    services.reporter.header(&format!("Logs for {}", domain));
    services.systemd.tail_logs(domain, lines, follow).await?;

    if follow {
        return Ok(());
    }

    // nginx writes per-domain access/error logs alongside the journal.
    let access_log = services.paths.log_dir.join(format!("{}-access.log", domain));
    if access_log.exists() {
        services.reporter.header("nginx access log (last 20 lines)");
        services
            .exec
            .run_streaming(&format!("tail -n 20 {}", access_log.display()))
            .await?;
    }

    let error_log = services.paths.log_dir.join(format!("{}-error.log", domain));
    let has_errors = error_log
        .metadata()
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    if has_errors {
        services.reporter.header("nginx error log (last 20 lines)");
        services
            .exec
            .run_streaming(&format!("tail -n 20 {}", error_log.display()))
            .await?;
    }

    Ok(())
}
