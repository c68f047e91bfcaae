use std::path::PathBuf;

use anyhow::Result;

use crate::deploy::context::Services;
use crate::output::Reporter;
use crate::registry::Store;

/// Repair the registry file and clean up common nginx problems.
pub async fn run(services: &Services, file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| services.paths.registry_file.clone());

    services.reporter.header("Repairing configuration");

    if path.exists() {
        let (kept, dropped) = Store::repair_file(&path)?;
        if dropped > 0 {
            services.reporter.warning(&format!(
                "Dropped {} corrupt registry entr{}",
                dropped,
                if dropped == 1 { "y" } else { "ies" }
            ));
        }
        services.reporter.success(&format!(
            "Registry repaired: {} valid application(s)",
            kept
        ));
    } else {
        services
            .reporter
            .info(&format!("No registry file at {}", path.display()));
    }

    if services.nginx.ensure_rate_limit_zone()? {
        services.reporter.success("Rate-limit zone drop-in created");
    }

    let removed = services.nginx.cleanup_orphaned_links()?;
    if removed > 0 {
        services
            .reporter
            .success(&format!("Removed {} orphaned site link(s)", removed));
    }

    if services.nginx.test_config().await {
        services.reporter.success("nginx configuration is valid");
    } else {
        services
            .reporter
            .warning("nginx configuration still has problems, run: sudo nginx -t");
    }

    Ok(())
}
