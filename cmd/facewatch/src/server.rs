//! HTTP admin API.
//!
//! API endpoints:
//! - GET /                - Identity management page
//! - GET /api/identities  - {named, generated} listing JSON
//! - POST /api/rename     - {old_id, new_id}
//! - POST /api/delete     - {ids}
//! - POST /api/merge      - {ids, new_id}
//! - GET /faces/<label>.jpg - Face crops

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
};
use giztoy_faceid::{Admin, AdminResponse, DeleteRequest, MergeRequest, RenameRequest};
use tower_http::services::ServeDir;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    admin: Admin,
}

/// Builds the admin router.
pub fn router(admin: Admin, faces_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/identities", get(list_identities))
        .route("/api/rename", post(rename))
        .route("/api/delete", post(delete))
        .route("/api/merge", post(merge))
        .nest_service("/faces", ServeDir::new(faces_dir))
        .with_state(AppState { admin })
}

/// Serves the admin API on `addr` until the process exits.
pub async fn serve(addr: &str, admin: Admin, faces_dir: &Path) -> Result<()> {
    let app = router(admin, faces_dir);
    let addr = parse_addr(addr)?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "admin server started");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Parse address string to SocketAddr. ":5000" binds all interfaces.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    Ok(addr.parse()?)
}

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn list_identities(State(state): State<AppState>) -> impl IntoResponse {
    let admin = state.admin.clone();
    match tokio::task::spawn_blocking(move || admin.list_identities()).await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => {
            warn!(error = %e, "listing task failed");
            Json(AdminResponse::failed("internal error")).into_response()
        }
    }
}

/// Registry operations block on the store lock and file I/O.
async fn run_admin<F>(state: AppState, op: F) -> Json<AdminResponse>
where
    F: FnOnce(&Admin) -> AdminResponse + Send + 'static,
{
    let admin = state.admin;
    let resp = tokio::task::spawn_blocking(move || op(&admin))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "admin task failed");
            AdminResponse::failed("internal error")
        });
    Json(resp)
}

async fn rename(State(state): State<AppState>, Json(req): Json<RenameRequest>) -> Json<AdminResponse> {
    run_admin(state, move |admin| admin.rename(&req)).await
}

async fn delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> Json<AdminResponse> {
    run_admin(state, move |admin| admin.delete(&req)).await
}

async fn merge(State(state): State<AppState>, Json(req): Json<MergeRequest>) -> Json<AdminResponse> {
    run_admin(state, move |admin| admin.merge(&req)).await
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Faces</title>
    <style>
        :root { --bg: #0d1117; --text: #c9d1d9; --text-muted: #8b949e; --blue: #58a6ff; }
        body { font-family: -apple-system, sans-serif; background: var(--bg); color: var(--text); padding: 2rem; }
        .grid { display: flex; flex-wrap: wrap; gap: 1rem; }
        .card { border: 1px solid #30363d; border-radius: 6px; padding: .5rem; width: 140px; text-align: center; font-size: .8rem; word-break: break-all; }
        .card img { width: 120px; height: 120px; object-fit: cover; }
        .muted { color: var(--text-muted); }
        button { margin-right: .5rem; }
    </style>
</head>
<body>
    <h1>Faces</h1>
    <p>
        <button onclick="renameSelected()">Rename</button>
        <button onclick="mergeSelected()">Merge</button>
        <button onclick="deleteSelected()">Delete</button>
    </p>
    <h2>Known</h2><div id="named" class="grid"></div>
    <h2>Unknown</h2><div id="generated" class="grid"></div>
<script>
function selected() {
    return Array.from(document.querySelectorAll('.pick:checked')).map(cb => cb.dataset.id);
}
async function post(path, body) {
    const res = await fetch(path, { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify(body) });
    const out = await res.json();
    if (!out.success) alert(out.message || 'failed');
    load();
}
function renameSelected() {
    const ids = selected();
    if (ids.length !== 1) return alert('Select exactly one identity.');
    const name = prompt('New name');
    if (name) post('/api/rename', { old_id: ids[0], new_id: name });
}
function mergeSelected() {
    const ids = selected();
    if (ids.length < 2) return alert('Select at least two identities.');
    const name = prompt('Merged name');
    if (name) post('/api/merge', { ids, new_id: name });
}
function deleteSelected() {
    const ids = selected();
    if (ids.length && confirm('Delete ' + ids.length + ' identities?')) post('/api/delete', { ids });
}
function card(item) {
    const div = document.createElement('div');
    div.className = 'card';
    const img = item.face ? '<img src="/faces/' + encodeURIComponent(item.face) + '">' : '<div class="muted">no image</div>';
    const seen = item.last_seen ? new Date(item.last_seen).toLocaleString() : 'never';
    div.innerHTML = img + '<div></div><div class="muted">' + seen + '</div>';
    div.children[1].textContent = item.id;
    const cb = document.createElement('input');
    cb.type = 'checkbox'; cb.className = 'pick'; cb.dataset.id = item.id;
    div.prepend(cb);
    return div;
}
async function load() {
    const data = await (await fetch('/api/identities')).json();
    for (const kind of ['named', 'generated']) {
        const el = document.getElementById(kind);
        el.replaceChildren(...data[kind].map(card));
    }
}
load();
</script>
</body>
</html>
"##;
