use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::{created, db_error, error, not_found, ok, valid_name};
use crate::middleware::session_auth::{authenticate, require_root};
use crate::models::{AddRotationInstanceRequest, CreateRotationRequest, ExecuteRotationRequest, UpdateRotationRequest};
use crate::rotation::RotationError;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/rotation")
            .route("", web::get().to(list_rotations))
            .route("", web::post().to(create_rotation))
            .route("/{id}", web::get().to(get_rotation))
            .route("/{id}", web::put().to(update_rotation))
            .route("/{id}", web::delete().to(delete_rotation))
            .route("/{id}/instance", web::get().to(list_entries))
            .route("/{id}/instance", web::post().to(add_entry))
            .route("/{id}/instance/{entry_id}", web::delete().to(remove_entry))
            .route("/{id}/execute", web::post().to(execute)),
    );
}

async fn list_rotations(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.list_rotations() {
        Ok(rotations) => ok("rotations", rotations),
        Err(e) => db_error("list rotations", e),
    }
}

async fn create_rotation(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateRotationRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let name = body.name.trim().to_lowercase();
    if !valid_name(&name) {
        return error(StatusCode::BAD_REQUEST, "Invalid rotation name");
    }
    match state
        .db
        .create_rotation(&name, body.description.as_deref(), body.strategy)
    {
        Ok(rotation) => created("rotation", rotation),
        Err(e) => db_error("create rotation", e),
    }
}

/// Accepts an id or a rotation name
async fn get_rotation(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    let rotation = match state.rotation.resolve(&path) {
        Ok(rotation) => rotation,
        Err(RotationError::NotFound(_)) => return not_found("Rotation"),
        Err(e) => return rotation_error(e),
    };
    match state.db.list_rotation_instances(&rotation.id) {
        Ok(entries) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "rotation": rotation,
            "instances": entries,
        })),
        Err(e) => db_error("list rotation instances", e),
    }
}

async fn update_rotation(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateRotationRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state
        .db
        .update_rotation(&path, body.description.as_deref(), body.strategy)
    {
        Ok(Some(rotation)) => ok("rotation", rotation),
        Ok(None) => not_found("Rotation"),
        Err(e) => db_error("update rotation", e),
    }
}

async fn delete_rotation(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.delete_rotation(&path) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Rotation"),
        Err(e) => db_error("delete rotation", e),
    }
}

async fn list_entries(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.get_rotation(&path) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Rotation"),
        Err(e) => return db_error("get rotation", e),
    }
    match state.db.list_rotation_instances(&path) {
        Ok(entries) => ok("instances", entries),
        Err(e) => db_error("list rotation instances", e),
    }
}

async fn add_entry(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<AddRotationInstanceRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.get_rotation(&path) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Rotation"),
        Err(e) => return db_error("get rotation", e),
    }
    match state.db.get_provider_instance(&body.provider_instance_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Provider instance"),
        Err(e) => return db_error("get provider instance", e),
    }
    match state
        .db
        .add_rotation_instance(&path, &body.provider_instance_id, body.position)
    {
        Ok(entry) => created("instance", entry),
        Err(e) => db_error("add rotation instance", e),
    }
}

async fn remove_entry(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let (rotation_id, entry_id) = path.into_inner();
    match state.db.remove_rotation_instance(&rotation_id, &entry_id) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Rotation entry"),
        Err(e) => db_error("remove rotation instance", e),
    }
}

/// Run an ability through the rotation with failover. Abilities spend
/// operator credentials, so only the root key may call them directly.
async fn execute(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ExecuteRotationRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state
        .rotation
        .rotate(&path, &body.extension, &body.ability, &body.request)
        .await
    {
        Ok(outcome) => ok("result", outcome),
        Err(e) => rotation_error(e),
    }
}

fn rotation_error(e: RotationError) -> HttpResponse {
    let status = e.status_code();
    if status.is_server_error() {
        log::error!("[ROTATION] {}", e);
    }
    HttpResponse::build(status).json(serde_json::json!({
        "success": false,
        "error": e.to_string(),
        "attempts": e.attempts(),
    }))
}
