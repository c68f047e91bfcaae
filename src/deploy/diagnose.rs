use anyhow::Result;

use crate::output::Reporter;
use super::context::Services;

/// Read-only checks against one application. Returns human-readable issue
/// descriptions; empty means healthy.
pub async fn app(services: &Services, domain: &str) -> Result<Vec<String>> {
    let record = services.store.get_app(domain)?;
    let mut issues = Vec::new();

    if services.needs_service(&record) {
        if services.systemd.is_active(domain).await {
            services.reporter.success("Service is active");
        } else {
            issues.push(format!("Service {}.service is not active", domain));
        }

        let listening = services
            .exec
            .run_privileged_unchecked(&format!("netstat -tlnp | grep :{}", record.port))
            .await
            .map(|out| !out.is_empty())
            .unwrap_or(false);
        if listening {
            services
                .reporter
                .success(&format!("Port {} is listening", record.port));
        } else {
            issues.push(format!("Port {} is not listening", record.port));
        }
    }

    if services.nginx.config_exists(domain) {
        services.reporter.success("nginx configuration exists");
        if !services.nginx.test_config().await {
            issues.push("nginx configuration has errors".to_string());
        }
    } else {
        issues.push(format!("nginx configuration missing for {}", domain));
    }

    if services.needs_service(&record) && !services.test_connectivity(record.port).await {
        issues.push(format!(
            "Application does not respond on port {}",
            record.port
        ));
    }

    Ok(issues)
}

/// Read-only checks against the host itself plus every registered app.
pub async fn system(services: &Services) -> Vec<String> {
    let mut issues = Vec::new();

    let nginx_active = services
        .exec
        .run_privileged_unchecked("systemctl is-active nginx")
        .await
        .as_deref()
        == Some("active");
    if nginx_active {
        services.reporter.success("nginx is active");
    } else {
        issues.push("nginx is not active".to_string());
    }

    if services.nginx.test_config().await {
        services.reporter.success("nginx configuration is valid");
    } else {
        issues.push("nginx configuration has errors".to_string());
    }

    if let Some(usage) = services
        .exec
        .run_unchecked("df / | awk 'NR==2{print $5}' | sed 's/%//'")
        .await
    {
        match usage.trim().parse::<u32>() {
            Ok(percent) if percent > 90 => {
                issues.push(format!("Low disk space: {}% used", percent));
            }
            Ok(percent) => {
                services
                    .reporter
                    .success(&format!("Disk usage OK: {}% used", percent));
            }
            Err(_) => {}
        }
    }

    for (domain, record) in services.store.get_all_apps() {
        if services.needs_service(&record) && !services.systemd.is_active(&domain).await {
            issues.push(format!("Application {} is not active", domain));
        }
    }

    issues
}
