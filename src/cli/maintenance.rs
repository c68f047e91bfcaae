use anyhow::Result;

use crate::deploy::context::Services;
use crate::nginx::PlaceholderMode;
use crate::output::Reporter;

pub async fn run(services: &Services, domain: &str, enable: bool, disable: bool) -> Result<()> {
    let record = services.store.get_app(domain)?;

    if enable == disable {
        anyhow::bail!("Pass exactly one of --enable or --disable");
    }

    if enable {
        services
            .nginx
            .enable_placeholder(&record, PlaceholderMode::Maintenance)
            .await?;
    } else {
        services.nginx.restore_config(&record).await?;
        services
            .reporter
            .success(&format!("Maintenance mode disabled for {}", domain));
    }

    Ok(())
}
