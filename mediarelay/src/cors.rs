//! CORS headers for browser clients served from another origin.
//!
//! The relay echoes the requesting origin instead of answering `*`, which is what browsers
//! require for credentialed requests. The origin comes from `Origin`, or from the origin part of
//! `Referer` when a client omits `Origin`. Requests from origins outside the allow-list get no
//! CORS headers at all and are left for the browser to block.
//!
//! `tower_http::cors::CorsLayer` only looks at `Origin`, so it cannot express the `Referer`
//! fallback. Keep this middleware rather than swapping the layer in.
//!
//! Preflight `OPTIONS` requests are answered by [`preflight`] with `204 No Content`; the
//! middleware decorates that response like any other.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use url::Url;

use crate::AppState;
use crate::config::CorsConfig;

/// Origin of the request, normalized to `scheme://host[:port]`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return Some(origin.trim_end_matches('/').to_string());
    }

    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok())?;
    let origin = Url::parse(referer).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Add CORS headers for `origin` if the configuration allows it.
pub fn apply_cors_headers(headers: &mut HeaderMap, config: &CorsConfig, origin: Option<&str>) {
    let Some(origin) = origin else {
        return;
    };
    if !config.allowed_origins.iter().any(|allowed| allowed.matches(origin)) {
        tracing::debug!(origin = %origin, "Origin not allowed, omitting CORS headers");
        return;
    }
    let Ok(origin_value) = HeaderValue::from_str(origin) else {
        return;
    };

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
    headers.append(header::VARY, HeaderValue::from_static("Origin"));

    if let Ok(methods) = HeaderValue::from_str(&config.allowed_methods.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
    }
    if let Ok(allowed_headers) = HeaderValue::from_str(&config.allowed_headers.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed_headers);
    }
    if config.allow_credentials {
        headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }
    if let Some(max_age) = config.max_age {
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
    }
}

/// Middleware decorating every relay response with CORS headers.
pub async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request_origin(request.headers());
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), &state.config.cors, origin.as_deref());
    response
}

/// Answer a preflight request. No body is read.
pub async fn preflight() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
