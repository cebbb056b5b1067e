//! REST surface of the bridge.
//!
//! The server owns an explicit router built here; routes, middleware and
//! state are wired in one place. The health endpoint stays outside the
//! secured stack so orchestrator probes work without credentials.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tether_client::{BridgeClient, ClientError};
use tether_shared::AuditLogger;
use tether_store::{Database, WebhookConfig, WebhookLog, WebhookTrigger};
use tether_webhook::{WebhookError, WebhookManager};

use crate::config::BridgeConfig;
use crate::error::ApiError;
use crate::middleware::{
    auth_middleware, client_context_middleware, rate_limit_middleware,
    security_headers_middleware, ClientInfo,
};
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<BridgeClient>,
    pub store: Arc<Database>,
    pub webhooks: Arc<WebhookManager>,
    pub audit: Arc<AuditLogger>,
    pub config: Arc<BridgeConfig>,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let open = Router::new().route("/api/health", get(health));

    let secured = Router::new()
        .route("/api/status", get(connection_status))
        .route("/api/sync-status", get(sync_status))
        .route("/api/send", post(send_message))
        .route("/api/reaction", post(send_reaction))
        .route("/api/edit", post(edit_message))
        .route("/api/delete", post(delete_message))
        .route("/api/read", post(mark_read))
        .route("/api/poll", post(create_poll))
        .route("/api/history", post(request_history))
        .route("/api/presence", post(set_presence))
        .route("/api/typing", post(send_typing))
        .route("/api/blocklist", post(update_blocklist))
        .route("/api/newsletter/follow", post(follow_newsletter))
        .route("/api/group/create", post(create_group))
        .route("/api/group/participants", post(update_group_participants))
        .route("/api/group/leave", post(leave_group))
        .route("/api/group/update", post(update_group))
        .route("/api/pair/phone", post(pair_phone))
        .route("/api/pair/status", get(pair_status))
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/api/webhooks/{id}",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/api/webhooks/{id}/test", post(test_webhook))
        .route("/api/webhooks/{id}/logs", get(webhook_logs))
        .route("/api/webhooks/{id}/enable", post(enable_webhook))
        .route("/api/webhook-logs", get(all_webhook_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(open)
        .merge(secured)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
        .layer(middleware::from_fn(client_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &BridgeConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .max_age(Duration::from_secs(86400))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "starting REST API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

// --- health & status -----------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    connected: bool,
    linked: bool,
    uptime_secs: i64,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = state.client.is_connected();
    let snapshot = state.client.connection_snapshot();

    let body = HealthResponse {
        connected,
        linked: state.client.device_id().is_some(),
        uptime_secs: (Utc::now() - snapshot.started_at).num_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct ConnectionStatusResponse {
    success: bool,
    connected: bool,
    linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,
    uptime_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_connected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disconnected_for_secs: Option<i64>,
    auto_reconnect_errors: u32,
}

async fn connection_status(State(state): State<AppState>) -> Json<ConnectionStatusResponse> {
    let snapshot = state.client.connection_snapshot();
    let now = Utc::now();

    Json(ConnectionStatusResponse {
        success: true,
        connected: state.client.is_connected(),
        linked: state.client.device_id().is_some(),
        device: state.client.device_id().map(|d| d.to_string()),
        uptime_secs: (now - snapshot.started_at).num_seconds(),
        last_connected: snapshot.last_connected_at.map(|t| t.to_rfc3339()),
        disconnected_for_secs: snapshot
            .disconnected_at
            .map(|t| (now - t).num_seconds()),
        auto_reconnect_errors: snapshot.auto_reconnect_errors,
    })
}

#[derive(Serialize)]
struct SyncStatusResponse {
    success: bool,
    message_count: i64,
    chat_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_message_time: Option<String>,
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncStatusResponse>, ApiError> {
    Ok(Json(SyncStatusResponse {
        success: true,
        message_count: state.store.count_messages()?,
        chat_count: state.store.count_chats()?,
        latest_message_time: state
            .store
            .latest_message_timestamp()?
            .map(|t| t.to_rfc3339()),
    }))
}

// --- messaging -----------------------------------------------------------

#[derive(Deserialize)]
struct SendRequest {
    #[serde(default)]
    recipient: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    media_path: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
    message_id: String,
    timestamp: String,
    recipient: String,
}

async fn send_message(
    State(state): State<AppState>,
    Extension(client_info): Extension<ClientInfo>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    if req.recipient.is_empty() {
        return Err(ApiError::BadRequest("recipient is required".into()));
    }
    let media_path = req.media_path.as_deref().filter(|p| !p.is_empty());
    if req.message.is_empty() && media_path.is_none() {
        return Err(ApiError::BadRequest(
            "message or media_path is required".into(),
        ));
    }

    let outcome = state
        .client
        .send_message(&state.store, &req.recipient, &req.message, media_path)
        .await
        .map_err(|e| {
            if let ClientError::MediaPath(_) = &e {
                state
                    .audit
                    .path_traversal_blocked(&client_info.ip, media_path.unwrap_or_default());
            }
            ApiError::from(e)
        })?;

    state.audit.message_sent(
        &outcome.recipient.to_string(),
        if media_path.is_some() { "media" } else { "text" },
    );

    Ok(Json(SendResponse {
        success: true,
        message_id: outcome.message_id,
        timestamp: outcome.timestamp.to_rfc3339(),
        recipient: outcome.recipient.to_string(),
    }))
}

#[derive(Deserialize)]
struct ReactionRequest {
    chat: String,
    message_id: String,
    #[serde(default)]
    emoji: String,
}

async fn send_reaction(
    State(state): State<AppState>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .send_reaction(&req.chat, &req.message_id, &req.emoji)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct EditRequest {
    chat: String,
    message_id: String,
    new_content: String,
}

async fn edit_message(
    State(state): State<AppState>,
    Json(req): Json<EditRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .edit_message(&req.chat, &req.message_id, &req.new_content)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct DeleteRequest {
    chat: String,
    message_id: String,
    #[serde(default)]
    sender: Option<String>,
}

async fn delete_message(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .revoke_message(&req.chat, &req.message_id, req.sender.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct ReadRequest {
    chat: String,
    message_ids: Vec<String>,
    #[serde(default)]
    sender: Option<String>,
}

async fn mark_read(
    State(state): State<AppState>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.message_ids.is_empty() {
        return Err(ApiError::BadRequest("message_ids is required".into()));
    }
    state
        .client
        .mark_read(&req.chat, &req.message_ids, req.sender.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct PollRequest {
    chat: String,
    question: String,
    options: Vec<String>,
    #[serde(default)]
    multi_select: bool,
}

async fn create_poll(
    State(state): State<AppState>,
    Json(req): Json<PollRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let outcome = state
        .client
        .create_poll(&req.chat, &req.question, req.options, req.multi_select)
        .await?;
    Ok(Json(SendResponse {
        success: true,
        message_id: outcome.message_id,
        timestamp: outcome.timestamp.to_rfc3339(),
        recipient: outcome.recipient.to_string(),
    }))
}

#[derive(Deserialize)]
struct HistoryRequest {
    chat: String,
    oldest_message_id: String,
    #[serde(default)]
    oldest_from_me: bool,
    oldest_timestamp_ms: i64,
    #[serde(default)]
    oldest_sender: Option<String>,
    #[serde(default)]
    count: usize,
}

async fn request_history(
    State(state): State<AppState>,
    Json(req): Json<HistoryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .request_chat_history(
            &req.chat,
            &req.oldest_message_id,
            req.oldest_from_me,
            req.oldest_timestamp_ms,
            req.oldest_sender.as_deref(),
            req.count,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "History request sent. Messages arrive via history sync.",
    })))
}

#[derive(Deserialize)]
struct PresenceRequest {
    presence: String,
}

async fn set_presence(
    State(state): State<AppState>,
    Json(req): Json<PresenceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client.set_presence(&req.presence).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct TypingRequest {
    chat: String,
    state: String,
}

async fn send_typing(
    State(state): State<AppState>,
    Json(req): Json<TypingRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client.set_chat_state(&req.chat, &req.state).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct BlocklistRequest {
    user: String,
    action: String,
}

async fn update_blocklist(
    State(state): State<AppState>,
    Json(req): Json<BlocklistRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client.update_blocklist(&req.user, &req.action).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct NewsletterRequest {
    address: String,
}

async fn follow_newsletter(
    State(state): State<AppState>,
    Json(req): Json<NewsletterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client.follow_newsletter(&req.address).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// --- groups --------------------------------------------------------------

#[derive(Deserialize)]
struct GroupCreateRequest {
    name: String,
    participants: Vec<String>,
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<GroupCreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state.client.create_group(&req.name, &req.participants).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": { "address": info.address.to_string(), "name": info.name },
    })))
}

#[derive(Deserialize)]
struct GroupParticipantsRequest {
    group: String,
    participants: Vec<String>,
    change: String,
}

async fn update_group_participants(
    State(state): State<AppState>,
    Json(req): Json<GroupParticipantsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .update_group_participants(&req.group, &req.participants, &req.change)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct GroupLeaveRequest {
    group: String,
}

async fn leave_group(
    State(state): State<AppState>,
    Json(req): Json<GroupLeaveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client.leave_group(&req.group).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct GroupUpdateRequest {
    group: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

async fn update_group(
    State(state): State<AppState>,
    Json(req): Json<GroupUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .client
        .update_group(&req.group, req.name.as_deref(), req.topic.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// --- pairing -------------------------------------------------------------

#[derive(Deserialize)]
struct PairPhoneRequest {
    phone_number: String,
}

async fn pair_phone(
    State(state): State<AppState>,
    Json(req): Json<PairPhoneRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.phone_number.is_empty() {
        return Err(ApiError::BadRequest("phone_number is required".into()));
    }
    let (code, expires_in) = state.client.pair_with_phone(&req.phone_number).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "code": code,
        "expires_in": expires_in,
    })))
}

async fn pair_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.client.pairing_status().await;
    Json(serde_json::json!({
        "success": true,
        "in_progress": status.in_progress,
        "code": status.code,
        "expires_in": status.expires_in_secs,
        "complete": status.complete,
        "error": status.error,
    }))
}

// --- webhooks ------------------------------------------------------------

#[derive(Deserialize)]
struct WebhookConfigBody {
    name: String,
    target_url: String,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    triggers: Vec<WebhookTrigger>,
}

fn default_true() -> bool {
    true
}

impl WebhookConfigBody {
    fn into_config(self, id: i64) -> WebhookConfig {
        let now = Utc::now();
        WebhookConfig {
            id,
            name: self.name,
            target_url: self.target_url,
            secret: self.secret.filter(|s| !s.is_empty()),
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
            triggers: self.triggers,
        }
    }
}

/// Public view of a config: the secret never round-trips, only its shape.
#[derive(Serialize)]
struct WebhookConfigView {
    id: i64,
    name: String,
    target_url: String,
    has_secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_hint: Option<String>,
    enabled: bool,
    created_at: String,
    updated_at: String,
    triggers: Vec<WebhookTrigger>,
}

impl From<&WebhookConfig> for WebhookConfigView {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            target_url: config.target_url.clone(),
            has_secret: config.secret.as_deref().is_some_and(|s| !s.is_empty()),
            secret_hint: config.secret_hint(),
            enabled: config.enabled,
            created_at: config.created_at.to_rfc3339(),
            updated_at: config.updated_at.to_rfc3339(),
            triggers: config.triggers.clone(),
        }
    }
}

#[derive(Serialize)]
struct WebhookListResponse {
    success: bool,
    data: Vec<WebhookConfigView>,
}

async fn list_webhooks(State(state): State<AppState>) -> Json<WebhookListResponse> {
    let data = state.webhooks.configs().iter().map(WebhookConfigView::from).collect();
    Json(WebhookListResponse {
        success: true,
        data,
    })
}

async fn create_webhook(
    State(state): State<AppState>,
    Extension(client_info): Extension<ClientInfo>,
    Json(body): Json<WebhookConfigBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut config = body.into_config(0);

    state.webhooks.validate(&config).await.map_err(|e| {
        if let WebhookError::SsrfBlocked(_) = &e {
            state.audit.ssrf_blocked(&client_info.ip, &config.target_url);
        }
        ApiError::from(e)
    })?;

    state.store.store_webhook_config(&mut config)?;
    state.webhooks.load()?;
    state
        .audit
        .webhook_created(&client_info.ip, config.id, &config.target_url);

    Ok(Json(serde_json::json!({
        "success": true,
        "data": WebhookConfigView::from(&config),
    })))
}

async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state.store.get_webhook_config(id)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": WebhookConfigView::from(&config),
    })))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(client_info): Extension<ClientInfo>,
    Json(body): Json<WebhookConfigBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut config = body.into_config(id);

    state.webhooks.validate(&config).await.map_err(|e| {
        if let WebhookError::SsrfBlocked(_) = &e {
            state.audit.ssrf_blocked(&client_info.ip, &config.target_url);
        }
        ApiError::from(e)
    })?;

    state.store.update_webhook_config(&mut config)?;
    state.webhooks.load()?;

    let config = state.store.get_webhook_config(id)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": WebhookConfigView::from(&config),
    })))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(client_info): Extension<ClientInfo>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_webhook_config(id)?;
    state.webhooks.load()?;
    state.audit.webhook_deleted(&client_info.ip, id);

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Webhook deleted",
    })))
}

async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state.store.get_webhook_config(id)?;
    let outcome = state
        .webhooks
        .test(&config)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "status": outcome.status,
        "response_body": outcome.body,
    })))
}

#[derive(Serialize)]
struct WebhookLogsResponse {
    success: bool,
    data: Vec<WebhookLog>,
}

async fn webhook_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<WebhookLogsResponse>, ApiError> {
    // Existence check so an unknown id is a 404, not an empty list.
    state.store.get_webhook_config(id)?;
    let data = state.store.get_webhook_logs(id, 100)?;
    Ok(Json(WebhookLogsResponse {
        success: true,
        data,
    }))
}

async fn all_webhook_logs(
    State(state): State<AppState>,
) -> Result<Json<WebhookLogsResponse>, ApiError> {
    let data = state.store.get_webhook_logs(0, 100)?;
    Ok(Json(WebhookLogsResponse {
        success: true,
        data,
    }))
}

#[derive(Deserialize)]
struct EnableRequest {
    enabled: bool,
}

async fn enable_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<EnableRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut config = state.store.get_webhook_config(id)?;
    config.enabled = req.enabled;
    state.store.update_webhook_config(&mut config)?;
    state.webhooks.load()?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": WebhookConfigView::from(&config),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tether_client::platform::Platform;
    use tether_client::{ChannelPlatform, ClientOptions};
    use tower::ServiceExt;

    const API_KEY: &str = "test-api-key";

    async fn test_state(connected: bool, skip_ssrf: bool) -> (AppState, Arc<ChannelPlatform>) {
        let platform = Arc::new(ChannelPlatform::with_device(
            tether_shared::ChatAddress::individual("me"),
        ));
        if connected {
            platform.connect().await.unwrap();
        }
        let store = Arc::new(Database::open_in_memory().unwrap());
        let webhooks = Arc::new(
            WebhookManager::new(
                store.clone(),
                "http://localhost:8080/api/download".into(),
                skip_ssrf,
            )
            .unwrap(),
        );
        webhooks.load().unwrap();

        let state = AppState {
            client: Arc::new(BridgeClient::new(
                platform.clone(),
                ClientOptions::default(),
            )),
            store,
            webhooks,
            audit: Arc::new(AuditLogger::new()),
            config: Arc::new(BridgeConfig {
                api_key: Some(API_KEY.to_string()),
                ..Default::default()
            }),
            rate_limiter: RateLimiter::default(),
        };
        (state, platform)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", API_KEY)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reflects_connection_without_auth() {
        let (state, platform) = test_state(false, true).await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        platform.connect().await.unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["connected"], true);
        assert_eq!(json["linked"], true);
    }

    #[tokio::test]
    async fn auth_is_enforced_constant_time() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state);

        // Missing key.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Wrong key.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .header("x-api-key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Right key.
        let response = app
            .oneshot(request("GET", "/api/status", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["connected"], true);
        assert_eq!(json["device"], "me@individual");
    }

    #[tokio::test]
    async fn send_validates_input() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/send",
                Some(serde_json::json!({ "message": "hi" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/send",
                Some(serde_json::json!({ "recipient": "111@individual" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                "POST",
                "/api/send",
                Some(serde_json::json!({
                    "recipient": "111@individual",
                    "message": "hello",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert!(!json["message_id"].as_str().unwrap().is_empty());
        assert_eq!(json["recipient"], "111@individual");
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let (state, _platform) = test_state(false, true).await;
        let app = build_router(state);

        let response = app
            .oneshot(request(
                "POST",
                "/api/send",
                Some(serde_json::json!({
                    "recipient": "111@individual",
                    "message": "hello",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn webhook_crud_round_trip() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state.clone());

        // Create.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/webhooks",
                Some(serde_json::json!({
                    "name": "ops-hook",
                    "target_url": "https://example.com/hook",
                    "secret": "super-secret-token",
                    "triggers": [
                        { "trigger_type": "keyword", "trigger_value": "urgent", "match_type": "contains" }
                    ],
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let id = json["data"]["id"].as_i64().unwrap();
        assert!(id > 0);
        // The secret never round-trips.
        assert!(json["data"].get("secret").is_none());
        assert_eq!(json["data"]["has_secret"], true);
        assert_eq!(json["data"]["secret_hint"], "supe****oken");

        // List.
        let response = app
            .clone()
            .oneshot(request("GET", "/api/webhooks", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        // Update replaces the trigger set.
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/webhooks/{id}"),
                Some(serde_json::json!({
                    "name": "ops-hook-v2",
                    "target_url": "https://example.com/hook2",
                    "triggers": [
                        { "trigger_type": "all", "match_type": "exact" },
                        { "trigger_type": "media_kind", "trigger_value": "image", "match_type": "exact" }
                    ],
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["name"], "ops-hook-v2");
        assert_eq!(json["data"]["triggers"].as_array().unwrap().len(), 2);

        // Disable.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/webhooks/{id}/enable"),
                Some(serde_json::json!({ "enabled": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.webhooks.configs()[0].enabled);

        // Delete, then the id is gone.
        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/api/webhooks/{id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", &format!("/api/webhooks/{id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ssrf_blocked_create_writes_nothing() {
        let (state, _platform) = test_state(true, false).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(request(
                "POST",
                "/api/webhooks",
                Some(serde_json::json!({
                    "name": "metadata-probe",
                    "target_url": "http://169.254.169.254/x",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_webhook_configs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected_at_create() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(request(
                "POST",
                "/api/webhooks",
                Some(serde_json::json!({
                    "name": "bad-regex",
                    "target_url": "https://example.com/hook",
                    "triggers": [
                        { "trigger_type": "keyword", "trigger_value": "[unclosed", "match_type": "regex" }
                    ],
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_webhook_configs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let (mut state, _platform) = test_state(true, true).await;
        state.rate_limiter = RateLimiter::new(2, Duration::from_secs(60));
        let app = build_router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("GET", "/api/status", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request("GET", "/api/status", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Retry-After").unwrap(),
            &HeaderValue::from_static("60")
        );
    }

    #[tokio::test]
    async fn security_headers_are_present() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state);

        let response = app
            .oneshot(request("GET", "/api/status", None))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("X-Content-Type-Options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("X-Frame-Options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn pairing_endpoints_drive_the_state_machine() {
        let platform = Arc::new(ChannelPlatform::new());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let webhooks = Arc::new(
            WebhookManager::new(store.clone(), "http://localhost/dl".into(), true).unwrap(),
        );
        let state = AppState {
            client: Arc::new(BridgeClient::new(
                platform.clone(),
                ClientOptions::default(),
            )),
            store,
            webhooks,
            audit: Arc::new(AuditLogger::new()),
            config: Arc::new(BridgeConfig {
                api_key: Some(API_KEY.to_string()),
                ..Default::default()
            }),
            rate_limiter: RateLimiter::default(),
        };
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/pair/phone",
                Some(serde_json::json!({ "phone_number": "15551234567" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["expires_in"], 160);
        let code = json["code"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", "/api/pair/status", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["in_progress"], true);
        assert_eq!(json["code"], code.as_str());

        // Starting again while in progress is a client error.
        let response = app
            .oneshot(request(
                "POST",
                "/api/pair/phone",
                Some(serde_json::json!({ "phone_number": "15551234567" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_status_reports_counts() {
        let (state, _platform) = test_state(true, true).await;
        let app = build_router(state.clone());

        state
            .store
            .store_chat("111@individual", "Alice", Utc::now())
            .unwrap();
        state
            .store
            .store_message(&tether_store::StoredMessage {
                id: "m1".into(),
                chat_address: "111@individual".into(),
                sender: tether_store::MessageSender::known("111@individual"),
                content: "hello".into(),
                timestamp: Utc::now(),
                ..Default::default()
            })
            .unwrap();

        let response = app
            .oneshot(request("GET", "/api/sync-status", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["message_count"], 1);
        assert_eq!(json["chat_count"], 1);
        assert!(json["latest_message_time"].is_string());
    }
}
