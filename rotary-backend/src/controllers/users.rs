use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

use super::{created, db_error, error, not_found, ok};
use crate::auth::hash_password;
use crate::hooks::{HookEvent, HookPoint, HookTiming};
use crate::middleware::session_auth::{require_root, require_user};
use crate::models::{CreateUserRequest, UpdateUserRequest, User};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
        .is_match(email)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/v1/user")
            .route(web::post().to(register))
            .route(web::get().to(get_self))
            .route(web::put().to(update_self))
            .route(web::delete().to(delete_self)),
    )
    .service(web::resource("/v1/users").route(web::get().to(list_users)));
}

fn user_payload(user: &User) -> serde_json::Value {
    json!({
        "email": user.email,
        "display_name": user.display_name,
        "external_payment_id": user.external_payment_id,
    })
}

fn password_error(e: argon2::password_hash::Error) -> HttpResponse {
    log::error!("Failed to hash password: {}", e);
    error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password")
}

fn check_password(password: &str) -> Result<(), HttpResponse> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

async fn register(state: web::Data<AppState>, body: web::Json<CreateUserRequest>) -> impl Responder {
    let email = body.email.trim().to_lowercase();
    if !valid_email(&email) {
        return error(StatusCode::BAD_REQUEST, "A valid email address is required");
    }
    if let Err(resp) = check_password(&body.password) {
        return resp;
    }
    let display_name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    // No id exists yet; before-create hooks only see the payload
    let before = HookEvent::new("", json!({ "email": email, "display_name": display_name }));
    state.hooks.fire(HookPoint::UserCreate, HookTiming::Before, &before).await;

    let hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => return password_error(e),
    };
    let user = match state.db.create_user(&email, display_name, &hash) {
        Ok(user) => user,
        Err(e) => return db_error("create user", e),
    };
    log::info!("Registered user {}", user.id);

    let after = HookEvent::new(user.id.clone(), user_payload(&user));
    state.hooks.fire(HookPoint::UserCreate, HookTiming::After, &after).await;

    // Hooks may have filled in fields such as external_payment_id
    match state.db.get_user(&user.id) {
        Ok(Some(user)) => created("user", user),
        Ok(None) => not_found("User"),
        Err(e) => db_error("get user", e),
    }
}

async fn get_self(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.db.get_user(&session.user_id) {
        Ok(Some(user)) => ok("user", user),
        Ok(None) => not_found("User"),
        Err(e) => db_error("get user", e),
    }
}

async fn update_self(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UpdateUserRequest>,
) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if let Some(password) = body.password.as_deref() {
        if let Err(resp) = check_password(password) {
            return resp;
        }
    }

    let event = HookEvent::new(
        session.user_id.clone(),
        json!({ "display_name": body.display_name, "password_changed": body.password.is_some() }),
    );
    state.hooks.fire(HookPoint::UserUpdate, HookTiming::Before, &event).await;

    let hash = match body.password.as_deref().map(hash_password).transpose() {
        Ok(hash) => hash,
        Err(e) => return password_error(e),
    };
    let updated = state.db.update_user(
        &session.user_id,
        body.display_name.as_deref().map(str::trim),
        hash.as_deref(),
    );
    match updated {
        Ok(Some(user)) => {
            let event = HookEvent::new(user.id.clone(), user_payload(&user));
            state.hooks.fire(HookPoint::UserUpdate, HookTiming::After, &event).await;
            ok("user", user)
        }
        Ok(None) => not_found("User"),
        Err(e) => db_error("update user", e),
    }
}

async fn delete_self(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let user = match state.db.get_user(&session.user_id) {
        Ok(Some(user)) => user,
        Ok(None) => return not_found("User"),
        Err(e) => return db_error("get user", e),
    };

    let event = HookEvent::new(user.id.clone(), user_payload(&user));
    state.hooks.fire(HookPoint::UserDelete, HookTiming::Before, &event).await;

    match state.db.delete_user(&user.id) {
        Ok(true) => {
            log::info!("Deleted user {}", user.id);
            state.hooks.fire(HookPoint::UserDelete, HookTiming::After, &event).await;
            ok("deleted", true)
        }
        Ok(false) => not_found("User"),
        Err(e) => db_error("delete user", e),
    }
}

async fn list_users(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.list_users() {
        Ok(users) => ok("users", users),
        Err(e) => db_error("list users", e),
    }
}
