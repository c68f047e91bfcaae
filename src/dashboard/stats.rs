use std::fs;

use serde_json::json;

use crate::exec::Executor;

/// One metrics sample: load, memory, disk, uptime. Reads /proc where
/// possible and shells out only for disk usage.
pub async fn sample(exec: &Executor) -> serde_json::Value {
    let load = fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let (mem_total_mb, mem_available_mb) = meminfo().unwrap_or((0.0, 0.0));

    let disk_used_percent = exec
        .run_unchecked("df / | awk 'NR==2{print $5}' | sed 's/%//'")
        .await
        .and_then(|out| out.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let uptime_secs = fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    json!({
        "cpu_load": load,
        "memory_total_mb": mem_total_mb,
        "memory_used_mb": (mem_total_mb - mem_available_mb).max(0.0),
        "disk_used_percent": disk_used_percent,
        "uptime_seconds": uptime_secs,
        "sampled_at": chrono::Local::now().to_rfc3339(),
    })
}

fn meminfo() -> Option<(f64, f64)> {
    let content = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let kb = |line: &str| {
            line.split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<f64>().ok())
        };
        if line.starts_with("MemTotal:") {
            total = kb(line);
        } else if line.starts_with("MemAvailable:") {
            available = kb(line);
        }
    }

    Some((total? / 1024.0, available? / 1024.0))
}
