use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::{Router, middleware};
use bytes::Bytes;
use http_body_util::Full;
use portal_auth::http_error::format_http_error;
use portal_auth::{ApiClient, DispatchError, HttpError, TokenProvider, route_guard};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::compose::Portal;

/// Headers carried across the proxy. Credentials and hop-by-hop headers are
/// never forwarded.
static FORWARDED_REQUEST_HEADERS: [HeaderName; 2] = [ACCEPT, CONTENT_TYPE];
static FORWARDED_RESPONSE_HEADERS: [HeaderName; 2] = [CONTENT_TYPE, LOCATION];

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn TokenProvider>,
    client: ApiClient,
    max_body_size: usize,
}

/// `GET /health` plus the guarded pass-through under the API prefix.
pub fn router(portal: Portal, api_prefix: &str) -> Router {
    let state = AppState {
        provider: portal.provider,
        client: portal.client,
        max_body_size: portal.max_body_size,
    };

    let api = Router::new().route("/{*path}", any(proxy));
    let prefix = api_prefix.trim_end_matches('/');
    let routes = Router::new().route("/health", get(health));
    let routes = if prefix.is_empty() {
        routes.merge(api)
    } else {
        routes.nest(prefix, api)
    };

    routes
        .with_state(state)
        .layer(middleware::from_fn_with_state(portal.guard, route_guard))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "token_valid": state.provider.is_valid(),
    }))
}

async fn proxy(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let target = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let url = match state.client.url(&target) {
        Ok(url) => url,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format_http_error(&e, "proxy")),
    };

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    let mut outbound = http::Request::builder()
        .method(parts.method.clone())
        .uri(url.as_str());
    if let Some(headers) = outbound.headers_mut() {
        copy_headers(&parts.headers, headers, &FORWARDED_REQUEST_HEADERS);
    }
    let outbound = match outbound.body(Full::new(body)) {
        Ok(req) => req,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format_http_error(&HttpError::RequestBuild(e), "proxy"),
            );
        }
    };

    match state.client.execute(outbound).await {
        Ok(response) => forward_response(response),
        Err(err) => dispatch_error_response(&err, &parts.method, url.path()),
    }
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, names: &[HeaderName]) {
    for name in names {
        if let Some(value) = from.get(name) {
            to.insert(name.clone(), value.clone());
        }
    }
}

fn forward_response(response: http::Response<Bytes>) -> Response {
    let (parts, body) = response.into_parts();
    let mut out = Response::new(Body::from(body));
    *out.status_mut() = parts.status;
    copy_headers(&parts.headers, out.headers_mut(), &FORWARDED_RESPONSE_HEADERS);
    out
}

/// Map a terminal dispatch failure onto the inbound response.
fn dispatch_error_response(err: &DispatchError, method: &http::Method, path: &str) -> Response {
    let (status, message) = match err {
        DispatchError::Unauthenticated { reason, .. } => (StatusCode::UNAUTHORIZED, reason.clone()),
        DispatchError::Http(e @ HttpError::Timeout(_)) => {
            (StatusCode::GATEWAY_TIMEOUT, format_http_error(e, "backend"))
        }
        DispatchError::Http(e) => (StatusCode::BAD_GATEWAY, format_http_error(e, "backend")),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    };
    tracing::warn!(%method, path, %status, error = %message, "backend dispatch failed");
    error_response(status, &message)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": message,
            "status": status.as_u16(),
        })),
    )
        .into_response()
}
