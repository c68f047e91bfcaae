use std::path::Path;

use anyhow::Result;

use crate::config::AppType;
use crate::deploy::context::Services;
use crate::deployer;
use crate::output::Reporter;

pub fn types(services: &Services) -> Result<()> {
    services.reporter.header("Supported application types");

    for app_type in AppType::ALL {
        let deployer = services.deployer_for(app_type);
        println!("{:<8} {}", app_type, app_type.label());
        println!("         required: {}", deployer.required_files().join(", "));
        println!("         optional: {}", deployer.optional_files().join(", "));
    }

    Ok(())
}

pub fn detect(services: &Services, directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        anyhow::bail!("Not a directory: {}", directory.display());
    }

    let detected = deployer::detect_type(directory);
    services.reporter.success(&format!(
        "{} looks like: {} ({})",
        directory.display(),
        detected,
        detected.label()
    ));
    Ok(())
}
