use anyhow::Result;
use console::style;

use crate::deploy::context::Services;
use crate::output::Reporter;

pub async fn run(services: &Services, detailed: bool) -> Result<()> {
    let apps = services.store.get_all_apps();

    if apps.is_empty() {
        services.reporter.info("No applications deployed");
        return Ok(());
    }

    services.reporter.header("Deployed applications");
    println!(
        "{:<32} {:<8} {:<7} {:<10} {:<4}",
        style("DOMAIN").bold(),
        style("TYPE").bold(),
        style("PORT").bold(),
        style("STATUS").bold(),
        style("SSL").bold()
    );

    for (domain, record) in &apps {
        let status = if services.needs_service(record) {
            services.systemd.status_string(domain).await
        } else {
            "static".to_string()
        };

        let status_styled = match status.as_str() {
            "active" => style(status.clone()).green(),
            "failed" => style(status.clone()).red(),
            "inactive" => style(status.clone()).yellow(),
            _ => style(status.clone()).dim(),
        };

        println!(
            "{:<32} {:<8} {:<7} {:<10} {:<4}",
            domain,
            record.app_type,
            record.port,
            status_styled,
            if record.ssl { "yes" } else { "no" }
        );

        if detailed {
            println!("    source:  {}", record.source);
            println!("    branch:  {}", record.branch);
            println!("    created: {}", record.created);
            println!("    updated: {}", record.last_updated);
            if !record.build_command.is_empty() {
                println!("    build:   {}", record.build_command);
            }
            if !record.start_command.is_empty() {
                println!("    start:   {}", record.start_command);
            }
        }
    }

    Ok(())
}
