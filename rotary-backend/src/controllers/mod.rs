pub mod abilities;
pub mod auth;
pub mod extensions;
pub mod health;
pub mod mfa;
pub mod provider_instances;
pub mod providers;
pub mod rotations;
pub mod users;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::{constraint_kind, ConstraintKind};

/// `{"success": true, "<key>": value}`
pub(crate) fn ok<T: Serialize>(key: &str, value: T) -> HttpResponse {
    ok_with(StatusCode::OK, key, value)
}

pub(crate) fn created<T: Serialize>(key: &str, value: T) -> HttpResponse {
    ok_with(StatusCode::CREATED, key, value)
}

fn ok_with<T: Serialize>(status: StatusCode, key: &str, value: T) -> HttpResponse {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    match serde_json::to_value(value) {
        Ok(v) => {
            body.insert(key.to_string(), v);
            HttpResponse::build(status).json(Value::Object(body))
        }
        Err(e) => {
            log::error!("Failed to serialize response: {}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// `{"success": false, "error": message}`
pub(crate) fn error(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "success": false,
        "error": message.into()
    }))
}

pub(crate) fn not_found(what: &str) -> HttpResponse {
    error(StatusCode::NOT_FOUND, format!("{} not found", what))
}

/// Constraint violations become 409/400, anything else a logged 500
pub(crate) fn db_error(action: &str, e: rusqlite::Error) -> HttpResponse {
    match constraint_kind(&e) {
        Some(ConstraintKind::Unique) => error(StatusCode::CONFLICT, format!("Failed to {}: already exists", action)),
        Some(ConstraintKind::ForeignKey) => {
            error(StatusCode::BAD_REQUEST, format!("Failed to {}: referenced record does not exist", action))
        }
        None => {
            log::error!("Failed to {}: {}", action, e);
            error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", action))
        }
    }
}

/// Names are identifiers: lowercase letters, digits, '_' and '-'
pub(crate) fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name() {
        assert!(valid_name("email-default"));
        assert!(valid_name("send_email"));
        assert!(!valid_name(""));
        assert!(!valid_name("Send Email"));
    }
}
