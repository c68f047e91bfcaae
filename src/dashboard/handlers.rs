use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::config::{validate, AppRecord};

use super::{auth, db, stats, AppState};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn internal(err: anyhow::Error) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<auth::User, ApiError> {
    let token =
        session_token(headers).ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Not logged in"))?;
    auth::authenticate(&state.pool, &token)
        .await
        .map_err(internal)?
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Session expired"))
}

// ---- auth ----

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let token = auth::login(&state.pool, &body.username, &body.password)
        .await
        .map_err(internal)?
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Invalid credentials"))?;

    let _ = db::insert_log(
        &state.pool,
        "info",
        &format!("user {} logged in", body.username),
        None,
    )
    .await;

    let cookie = format!("session={}; HttpOnly; Path=/; SameSite=Strict", token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        auth::revoke(&state.pool, &token).await.map_err(internal)?;
    }
    let cookie = "session=deleted; HttpOnly; Path=/; Max-Age=0";
    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "is_admin": user.is_admin,
    })))
}

// ---- applications ----

fn record_json(record: &AppRecord) -> serde_json::Value {
    json!({
        "domain": record.domain,
        "port": record.port,
        "app_type": record.app_type,
        "source": record.source,
        "branch": record.branch,
        "ssl": record.ssl,
        "status": record.status,
        "created": record.created,
        "last_updated": record.last_updated,
    })
}

pub async fn list_applications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;

    let apps = state.services.store.get_all_apps();
    let mut items = Vec::with_capacity(apps.len());
    for record in apps.values() {
        // Live service state beats the stored status.
        let status = if state.services.needs_service(record) {
            state.services.systemd.status_string(&record.domain).await
        } else {
            record.status.to_string()
        };
        let mut item = record_json(record);
        item["service_status"] = json!(status);
        items.push(item);
    }

    Ok(Json(json!({ "applications": items })))
}

#[derive(Deserialize)]
pub struct CreateApplication {
    pub domain: String,
    pub port: u16,
    pub app_type: crate::config::AppType,
    pub source: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub ssl: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

pub async fn create_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateApplication>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;

    validate::validate_domain(&body.domain)
        .and_then(|_| validate::validate_port(body.port))
        .and_then(|_| validate::validate_branch(&body.branch))
        .map_err(|err| error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let store = &state.services.store;
    if store.app_exists(&body.domain) {
        return Err(error(StatusCode::CONFLICT, "Application already exists"));
    }
    if store.is_port_in_use(body.port, None) {
        return Err(error(StatusCode::CONFLICT, "Port already in use"));
    }

    let record = AppRecord::new(
        body.domain.clone(),
        body.port,
        body.app_type,
        body.source,
        body.branch,
        body.ssl,
        String::new(),
        String::new(),
        BTreeMap::new(),
    );
    store.add_app(record.clone()).map_err(internal)?;
    sync_cache_row(&state, &record).await;

    let _ = db::insert_log(
        &state.pool,
        "info",
        &format!("application {} registered", record.domain),
        None,
    )
    .await;

    Ok(Json(record_json(&record)))
}

pub async fn get_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;

    let record = state
        .services
        .store
        .get_app(&domain)
        .map_err(|err| error(StatusCode::NOT_FOUND, err.to_string()))?;
    Ok(Json(record_json(&record)))
}

#[derive(Deserialize)]
pub struct UpdateApplication {
    pub branch: Option<String>,
    pub ssl: Option<bool>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
}

pub async fn update_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
    Json(body): Json<UpdateApplication>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;

    let store = &state.services.store;
    let mut record = store
        .get_app(&domain)
        .map_err(|err| error(StatusCode::NOT_FOUND, err.to_string()))?;

    if let Some(branch) = body.branch {
        validate::validate_branch(&branch)
            .map_err(|err| error(StatusCode::BAD_REQUEST, err.to_string()))?;
        record.branch = branch;
    }
    if let Some(ssl) = body.ssl {
        record.ssl = ssl;
    }
    if let Some(build_command) = body.build_command {
        record.build_command = build_command;
    }
    if let Some(start_command) = body.start_command {
        record.start_command = start_command;
    }

    record.touch();
    store.update_app(record.clone()).map_err(internal)?;
    sync_cache_row(&state, &record).await;

    Ok(Json(record_json(&record)))
}

pub async fn delete_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;

    if !state.services.store.app_exists(&domain) {
        return Err(error(StatusCode::NOT_FOUND, "Application not found"));
    }

    crate::deploy::remove::run(&state.services, &domain, true)
        .await
        .map_err(internal)?;
    db::delete_application(&state.pool, &domain)
        .await
        .map_err(internal)?;

    let _ = db::insert_log(
        &state.pool,
        "warning",
        &format!("application {} removed", domain),
        None,
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

pub async fn start_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    ensure_known(&state, &domain)?;

    state
        .services
        .systemd
        .start_service(&domain)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn stop_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    ensure_known(&state, &domain)?;

    if !state.services.systemd.stop_service(&domain).await {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Stop failed"));
    }
    Ok(Json(json!({ "ok": true })))
}

pub async fn restart_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    ensure_known(&state, &domain)?;

    if !state.services.systemd.restart_service(&domain).await {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Restart failed"));
    }
    Ok(Json(json!({ "ok": true })))
}

fn ensure_known(state: &AppState, domain: &str) -> Result<(), ApiError> {
    if state.services.store.app_exists(domain) {
        Ok(())
    } else {
        Err(error(StatusCode::NOT_FOUND, "Application not found"))
    }
}

async fn sync_cache_row(state: &AppState, record: &AppRecord) {
    let directory = state.services.paths.app_dir(&record.domain);
    let git_url = record.is_git_source().then_some(record.source.as_str());
    let _ = db::upsert_application(
        &state.pool,
        &record.domain,
        record.app_type.as_str(),
        record.port,
        &record.status.to_string(),
        &directory.display().to_string(),
        git_url,
        record.ssl,
    )
    .await;
}

// ---- system ----

pub async fn system_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    Ok(Json(stats::sample(&state.services.exec).await))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    100
}

pub async fn system_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    let logs = db::recent_logs(&state.pool, query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "logs": logs })))
}

pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    let entries = db::get_configuration(&state.pool)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "config": entries })))
}

#[derive(Deserialize)]
pub struct SetConfig {
    pub key: String,
    pub value: String,
}

pub async fn set_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SetConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_user(&state, &headers).await?;
    db::set_configuration(&state.pool, &body.key, &body.value)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "ok": true })))
}

// ---- pages ----

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{title} · deckhand</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 0; color: #2d3440; }}
    nav {{ background: #1f2733; padding: 0.75rem 1.5rem; }}
    nav a {{ color: #cbd5e1; margin-right: 1.25rem; text-decoration: none; }}
    nav a:hover {{ color: #fff; }}
    main {{ padding: 1.5rem; max-width: 64rem; margin: 0 auto; }}
    table {{ border-collapse: collapse; width: 100%; }}
    th, td {{ text-align: left; padding: 0.4rem 0.75rem; border-bottom: 1px solid #e2e8f0; }}
    pre {{ background: #f1f5f9; padding: 0.75rem; overflow: auto; }}
  </style>
</head>
<body>
  <nav>
    <a href="/">Overview</a>
    <a href="/domains">Domains</a>
    <a href="/monitoring">Monitoring</a>
    <a href="/settings">Settings</a>
    <a href="/login">Login</a>
  </nav>
  <main>{body}</main>
</body>
</html>"#
    ))
}

pub async fn index_page() -> Html<String> {
    page(
        "Overview",
        r#"<h1>deckhand</h1>
<p>Applications managed on this host.</p>
<pre id="out">loading...</pre>
<script>
fetch('/api/v1/applications').then(r => r.json())
  .then(data => document.getElementById('out').textContent = JSON.stringify(data, null, 2))
  .catch(() => document.getElementById('out').textContent = 'Log in first.');
</script>"#,
    )
}

pub async fn login_page() -> Html<String> {
    page(
        "Login",
        r#"<h1>Login</h1>
<form onsubmit="return login(event)">
  <p><input id="username" placeholder="Username" autofocus></p>
  <p><input id="password" type="password" placeholder="Password"></p>
  <p><button>Sign in</button> <span id="msg"></span></p>
</form>
<script>
function login(ev) {
  ev.preventDefault();
  fetch('/api/v1/auth/login', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify({
      username: document.getElementById('username').value,
      password: document.getElementById('password').value
    })
  }).then(r => {
    document.getElementById('msg').textContent = r.ok ? 'Logged in' : 'Invalid credentials';
    if (r.ok) location.href = '/';
  });
  return false;
}
</script>"#,
    )
}

pub async fn domains_page() -> Html<String> {
    page(
        "Domains",
        r#"<h1>Domains</h1>
<table id="apps"><tr><th>Domain</th><th>Type</th><th>Port</th><th>Status</th><th>SSL</th></tr></table>
<script>
fetch('/api/v1/applications').then(r => r.json()).then(data => {
  const table = document.getElementById('apps');
  (data.applications || []).forEach(app => {
    const row = table.insertRow();
    [app.domain, app.app_type, app.port, app.service_status, app.ssl ? 'yes' : 'no']
      .forEach(v => row.insertCell().textContent = v);
  });
});
</script>"#,
    )
}

pub async fn monitoring_page() -> Html<String> {
    page(
        "Monitoring",
        r#"<h1>Monitoring</h1>
<pre id="metrics">waiting for samples...</pre>
<script>
const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '/ws/monitoring');
ws.onmessage = ev => document.getElementById('metrics').textContent = ev.data;
</script>"#,
    )
}

pub async fn settings_page() -> Html<String> {
    page(
        "Settings",
        r#"<h1>Settings</h1>
<pre id="out">loading...</pre>
<script>
fetch('/api/v1/config').then(r => r.json())
  .then(data => document.getElementById('out').textContent = JSON.stringify(data, null, 2))
  .catch(() => document.getElementById('out').textContent = 'Log in first.');
</script>"#,
    )
}
