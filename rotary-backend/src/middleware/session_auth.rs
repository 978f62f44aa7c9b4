//! Request authentication
//!
//! Controllers call these helpers at the top of each handler. A request is
//! either a user holding a full session (`Authorization: Bearer <token>`) or
//! the operator presenting `X-API-Key: <ROOT_API_KEY>`.

use actix_web::{HttpRequest, HttpResponse};

use crate::auth::constant_time_eq;
use crate::models::Session;
use crate::AppState;

pub const ROOT_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub enum AuthContext {
    Root,
    User(Session),
}

fn unauthorized(message: &str) -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "success": false,
        "error": message
    }))
}

pub fn extract_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_root_request(state: &AppState, req: &HttpRequest) -> bool {
    let Some(expected) = state.config.root_api_key.as_deref() else {
        return false;
    };
    req.headers()
        .get(ROOT_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|presented| constant_time_eq(presented.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

/// Root key or a full (non MFA-pending) session
pub fn authenticate(state: &AppState, req: &HttpRequest) -> Result<AuthContext, HttpResponse> {
    if is_root_request(state, req) {
        return Ok(AuthContext::Root);
    }

    let token = extract_token(req).ok_or_else(|| unauthorized("No authorization token provided"))?;
    match state.db.validate_session(&token) {
        Ok(Some(session)) => Ok(AuthContext::User(session)),
        Ok(None) => Err(unauthorized("Invalid or expired session")),
        Err(e) => {
            log::error!("Session validation error: {}", e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "error": "Internal server error"
            })))
        }
    }
}

/// A signed-in user; the root key does not act as a user
pub fn require_user(state: &AppState, req: &HttpRequest) -> Result<Session, HttpResponse> {
    match authenticate(state, req)? {
        AuthContext::User(session) => Ok(session),
        AuthContext::Root => Err(unauthorized("This endpoint requires a user session")),
    }
}

/// Catalog writes
pub fn require_root(state: &AppState, req: &HttpRequest) -> Result<(), HttpResponse> {
    if state.config.root_api_key.is_none() {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "success": false,
            "error": "ROOT_API_KEY is not configured"
        })));
    }
    if is_root_request(state, req) {
        Ok(())
    } else {
        Err(HttpResponse::Forbidden().json(serde_json::json!({
            "success": false,
            "error": "Root API key required"
        })))
    }
}
