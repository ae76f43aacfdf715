use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::confluence::ConfluenceClient;
use crate::events::EventBus;
use crate::provisioning::{AccessRequest, SpaceRequest, WorkflowRunner};
use crate::scanner;
use crate::store::RequestStore;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub runner: WorkflowRunner,
    pub store: Arc<RequestStore>,
    pub bus: EventBus,
    pub client: Arc<ConfluenceClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/requests", post(create_access_request).get(list_requests))
        .route("/api/space-requests", post(create_space_request))
        .route("/api/stats", get(stats))
        .route("/ws", get(ws_handler))
        .route("/webhook/page-created", post(handle_page_event))
        .route("/webhook/page-updated", post(handle_page_event))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the process is terminated.
pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Quartermaster API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Accept an access request. The payload is validated for required fields
/// here; the record is created as `pending` and reconciliation is handed to
/// a worker task, so this handler never waits on Confluence.
async fn create_access_request(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let request: AccessRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Missing fields: {e}") })),
            );
        }
    };
    match state.runner.submit_access(&request).await {
        Ok(record) => (
            StatusCode::CREATED,
            Json(serde_json::to_value(&record).unwrap_or_default()),
        ),
        Err(e) => {
            error!(error = %e, "Could not persist access request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn create_space_request(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let request: SpaceRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Missing fields: {e}") })),
            );
        }
    };
    match state.runner.submit_space_creation(&request).await {
        Ok(record) => (
            StatusCode::CREATED,
            Json(serde_json::to_value(&record).unwrap_or_default()),
        ),
        Err(e) => {
            error!(error = %e, "Could not persist space request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn list_requests(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list().await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::to_value(&records).unwrap_or_default()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::to_value(&stats).unwrap_or_default()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Real-time channel: forwards every request event to the socket as JSON.
/// Best-effort only - a client that connects late or lags simply misses
/// events and has to poll `/api/requests` for current state.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_events(socket, state))
}

async fn forward_events(mut socket: WebSocket, state: AppState) {
    let mut events = state.bus.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "WebSocket observer lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {} // nothing to read from observers
                _ => break,
            },
        }
    }
}

/// Page-event webhook: fetch the page, scan its body, and write back a
/// masked revision when secrets are found.
async fn handle_page_event(
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> impl IntoResponse {
    let Some(page_id) = extract_page_id(&event) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "no id" })));
    };

    let page = match state.client.get_page(&page_id).await {
        Ok(page) => page,
        Err(e) => {
            error!(page_id = %page_id, error = %e, "Could not fetch page for scanning");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let findings = scanner::scan(&page.body.storage.value);
    if findings.is_empty() {
        return (StatusCode::OK, Json(json!({ "status": "clean" })));
    }

    let masked = scanner::mask(&page.body.storage.value, &findings);
    if let Err(e) = state
        .client
        .update_page_body(
            &page.id,
            &page.title,
            &masked,
            page.version.number + 1,
            "Auto-masked secrets",
        )
        .await
    {
        error!(page_id = %page_id, error = %e, "Could not write masked page");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        );
    }

    info!(page_id = %page_id, count = findings.len(), "Masked secrets on page");
    (
        StatusCode::OK,
        Json(json!({ "status": "masked", "count": findings.len() })),
    )
}

/// The platform sends several event shapes; take the page id from whichever
/// of them is present.
fn extract_page_id(event: &Value) -> Option<String> {
    [
        event.pointer("/page/id"),
        event.pointer("/content/id"),
        event.get("id"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_is_taken_from_any_known_shape() {
        assert_eq!(
            extract_page_id(&json!({ "page": { "id": "123" } })).as_deref(),
            Some("123")
        );
        assert_eq!(
            extract_page_id(&json!({ "content": { "id": 456 } })).as_deref(),
            Some("456")
        );
        assert_eq!(
            extract_page_id(&json!({ "id": "789" })).as_deref(),
            Some("789")
        );
        assert_eq!(extract_page_id(&json!({ "other": true })), None);
    }
}
