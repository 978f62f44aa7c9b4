use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, Responder};
use serde::Deserialize;

use super::{created, db_error, error, not_found, ok, valid_name};
use crate::db::{constraint_kind, ConstraintKind};
use crate::middleware::session_auth::{authenticate, require_root};
use crate::models::{CreateAbilityRequest, UpdateAbilityRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/ability")
            .route("", web::get().to(list_abilities))
            .route("", web::post().to(create_ability))
            .route("/{id}", web::get().to(get_ability))
            .route("/{id}", web::put().to(update_ability))
            .route("/{id}", web::delete().to(delete_ability)),
    );
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    extension_id: Option<String>,
}

async fn list_abilities(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListQuery>,
) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.list_abilities(query.extension_id.as_deref()) {
        Ok(abilities) => ok("abilities", abilities),
        Err(e) => db_error("list abilities", e),
    }
}

async fn create_ability(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateAbilityRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let name = body.name.trim().to_lowercase();
    if !valid_name(&name) {
        return error(StatusCode::BAD_REQUEST, "Invalid ability name");
    }
    match state
        .db
        .create_ability(&body.extension_id, &name, body.friendly_name.as_deref(), body.meta)
    {
        Ok(ability) => created("ability", ability),
        Err(e) if constraint_kind(&e) == Some(ConstraintKind::ForeignKey) => not_found("Extension"),
        Err(e) => db_error("create ability", e),
    }
}

async fn get_ability(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.get_ability(&path) {
        Ok(Some(ability)) => ok("ability", ability),
        Ok(None) => not_found("Ability"),
        Err(e) => db_error("get ability", e),
    }
}

async fn update_ability(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateAbilityRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.update_ability(&path, body.friendly_name.as_deref(), body.meta) {
        Ok(Some(ability)) => ok("ability", ability),
        Ok(None) => not_found("Ability"),
        Err(e) => db_error("update ability", e),
    }
}

async fn delete_ability(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.delete_ability(&path) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Ability"),
        Err(e) => db_error("delete ability", e),
    }
}
