//! Request middleware: per-request log context and the HMAC gate.

use crate::auth::{self, AuthDecision, AuthError};
use crate::gateway::server::GatewayState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt;
use std::net::SocketAddr;

/// Identifiers attached to every log line for a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub ms_request_id: String,
    pub remote_addr: String,
    pub uri: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: "-".to_string(),
            ms_request_id: "-".to_string(),
            remote_addr: "-".to_string(),
            uri: "-".to_string(),
        }
    }
}

fn header_or_dash(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("-")
        .to_string()
}

impl RequestContext {
    pub fn from_request(req: &Request) -> Self {
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.to_string())
            .unwrap_or_else(|| "-".to_string());
        Self {
            request_id: header_or_dash(req.headers(), "x-request-id"),
            ms_request_id: header_or_dash(req.headers(), "x-ms-request-id"),
            remote_addr,
            uri: req.uri().to_string(),
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[requestID={} msRequestID={} remoteAddr={} requestURI={}]",
            self.request_id, self.ms_request_id, self.remote_addr, self.uri
        )
    }
}

/// Capture request identifiers into a `RequestContext` extension for handlers to log with.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::from_request(&req);
    log::debug!("{} {} request", ctx, req.method());
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Verify `Authorization: HMAC <digest>` over the raw body, then hand the same bytes on.
pub async fn require_hmac(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    if !req.headers().contains_key(AUTHORIZATION) {
        log::info!("{} no auth header set from client", ctx);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.settings.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            log::warn!("{} failed to read body from client: {}", ctx, e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match auth::authenticate(&parts.headers, &bytes, &state.settings.secret) {
        Ok(AuthDecision::Authorized) => {
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        Ok(AuthDecision::Unauthorized(reason)) => {
            log::info!(
                "{} attempted unauthorized access to protected endpoint ({:?})",
                ctx,
                reason
            );
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e @ AuthError::BadDigestEncoding) => {
            log::info!("{} rejected request: {}", ctx, e);
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(e @ AuthError::BadSecretEncoding) => {
            log::error!("{} failed to verify MAC: {}", ctx, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
