//! Request middleware: client identification, API-key auth, rate
//! limiting and security headers.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::api::AppState;

/// Client identity attached to every request before auth runs.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip(req: &Request<Body>) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return connect_info.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Attach [`ClientInfo`] to the request extensions.
pub async fn client_context_middleware(mut req: Request<Body>, next: Next) -> Response {
    let info = ClientInfo {
        ip: extract_client_ip(&req),
        user_agent: req
            .headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };
    req.extensions_mut().insert(info);
    next.run(req).await
}

/// Constant-time `X-API-Key` check. Skipped entirely when the deployment
/// disabled auth.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(req).await;
    };

    let client = req.extensions().get::<ClientInfo>().cloned().unwrap_or(ClientInfo {
        ip: "unknown".into(),
        user_agent: String::new(),
    });

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();
    let ok = provided_bytes.len() == expected_bytes.len()
        && provided_bytes.ct_eq(expected_bytes).unwrap_u8() == 1;

    if !ok {
        state
            .audit
            .auth_failure(&client.ip, &client.user_agent, "invalid API key");
        return crate::error::ApiError::Unauthorized.into_response();
    }

    state.audit.auth_success(&client.ip, req.uri().path());
    next.run(req).await
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ClientInfo>()
        .map(|c| c.ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.check(&ip).await {
        state.audit.rate_limit_exceeded(&ip);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from_static("60"));
        return response;
    }

    next.run(req).await
}

pub async fn security_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}
