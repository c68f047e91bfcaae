use anyhow::Result;
use dialoguer::Confirm;

use crate::deploy::{self, context::Services};
use crate::output::Reporter;

pub async fn run(services: &Services, domain: &str, backup: bool, assume_yes: bool) -> Result<()> {
    if !services.store.app_exists(domain) {
        anyhow::bail!("Application {} not found", domain);
    }

    if !assume_yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {} and all its artifacts?", domain))
            .default(false)
            .interact()?;
        if !confirmed {
            services.reporter.info("Aborted");
            return Ok(());
        }
    }

    deploy::remove::run(services, domain, backup).await
}
