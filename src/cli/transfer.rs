use std::path::Path;

use anyhow::Result;
use dialoguer::Confirm;

use crate::deploy::context::Services;
use crate::output::Reporter;

pub fn export(services: &Services, file: &Path) -> Result<()> {
    services.store.export(file)?;
    services
        .reporter
        .success(&format!("Registry exported to {}", file.display()));
    Ok(())
}

pub fn import(services: &Services, file: &Path, assume_yes: bool) -> Result<()> {
    if !services.store.get_all_apps().is_empty() && !assume_yes {
        let confirmed = Confirm::new()
            .with_prompt("The registry is not empty and will be replaced. Continue?")
            .default(false)
            .interact()?;
        if !confirmed {
            services.reporter.info("Aborted");
            return Ok(());
        }
    }

    let doc = services.store.import(file)?;
    services.reporter.success(&format!(
        "Registry imported from {} ({} applications)",
        file.display(),
        doc.apps.len()
    ));
    Ok(())
}
