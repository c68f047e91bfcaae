use std::collections::BTreeMap;

use anyhow::Result;

use crate::config::{validate, AppRecord, AppType};
use crate::deploy::{self, context::Services};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    services: &Services,
    domain: String,
    source: String,
    port: u16,
    app_type: AppType,
    branch: String,
    ssl: bool,
    build_command: Option<String>,
    start_command: Option<String>,
    env: Vec<String>,
) -> Result<()> {
    let mut env_vars = BTreeMap::new();
    for pair in env {
        let (key, value) = validate::parse_env_pair(&pair)?;
        env_vars.insert(key, value);
    }

    services.check_prerequisites().await?;
    services.ensure_directories()?;

    let record = AppRecord::new(
        domain,
        port,
        app_type,
        source,
        branch,
        ssl,
        build_command.unwrap_or_default(),
        start_command.unwrap_or_default(),
        env_vars,
    );

    deploy::run(services, record).await
}
