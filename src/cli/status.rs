use anyhow::Result;

use crate::deploy::context::Services;
use crate::output::Reporter;

pub async fn run(services: &Services, domain: Option<&str>) -> Result<()> {
    match domain {
        Some(domain) => app_status(services, domain).await,
        None => system_status(services).await,
    }
}

async fn app_status(services: &Services, domain: &str) -> Result<()> {
    let record = services.store.get_app(domain)?;

    services.reporter.header(&format!("Status of {}", domain));
    println!("Type:    {}", record.app_type);
    println!("Port:    {}", record.port);
    println!("Branch:  {}", record.branch);
    println!("SSL:     {}", if record.ssl { "configured" } else { "not configured" });

    if services.needs_service(&record) {
        println!(
            "Service: {}",
            services.systemd.status_string(domain).await
        );
        let reachable = services.test_connectivity(record.port).await;
        println!(
            "Connectivity: {}",
            if reachable { "responding" } else { "not responding" }
        );
    } else {
        println!("Service: not required (static site)");
    }

    Ok(())
}

async fn system_status(services: &Services) -> Result<()> {
    services.reporter.header("System status");

    let nginx_active = services
        .exec
        .run_privileged_unchecked("systemctl is-active nginx")
        .await
        .as_deref()
        == Some("active");
    println!("nginx:        {}", if nginx_active { "active" } else { "inactive" });
    println!(
        "nginx config: {}",
        if services.nginx.test_config().await {
            "valid"
        } else {
            "errors"
        }
    );

    let apps = services.store.get_all_apps();
    println!("Applications: {}", apps.len());

    let mut active = 0;
    for (domain, record) in &apps {
        if !services.needs_service(record) || services.systemd.is_active(domain).await {
            active += 1;
        }
    }
    println!("Active:       {}/{}", active, apps.len());

    Ok(())
}
