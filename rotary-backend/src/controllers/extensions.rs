use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::{created, db_error, error, not_found, ok, valid_name};
use crate::middleware::session_auth::{authenticate, require_root};
use crate::models::{CreateExtensionRequest, UpdateExtensionRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/extension")
            .route("", web::get().to(list_extensions))
            .route("", web::post().to(create_extension))
            .route("/{id}", web::get().to(get_extension))
            .route("/{id}", web::put().to(update_extension))
            .route("/{id}", web::delete().to(delete_extension)),
    );
}

async fn list_extensions(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.list_extensions() {
        Ok(extensions) => ok("extensions", extensions),
        Err(e) => db_error("list extensions", e),
    }
}

async fn create_extension(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateExtensionRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let name = body.name.trim().to_lowercase();
    if !valid_name(&name) {
        return error(StatusCode::BAD_REQUEST, "Invalid extension name");
    }
    match state
        .db
        .create_extension(&name, body.friendly_name.as_deref(), body.description.as_deref())
    {
        Ok(extension) => created("extension", extension),
        Err(e) => db_error("create extension", e),
    }
}

async fn get_extension(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    let id = path.into_inner();
    let found = match state.db.get_extension(&id) {
        Ok(None) => state.db.get_extension_by_name(&id),
        other => other,
    };
    match found {
        Ok(Some(extension)) => {
            let abilities = state.db.list_abilities(Some(&extension.id)).unwrap_or_else(|e| {
                log::error!("Failed to list abilities for {}: {}", extension.id, e);
                Vec::new()
            });
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "extension": extension,
                "abilities": abilities,
                "status": state.extensions.state(&extension.name),
            }))
        }
        Ok(None) => not_found("Extension"),
        Err(e) => db_error("get extension", e),
    }
}

async fn update_extension(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateExtensionRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state
        .db
        .update_extension(&path, body.friendly_name.as_deref(), body.description.as_deref())
    {
        Ok(Some(extension)) => ok("extension", extension),
        Ok(None) => not_found("Extension"),
        Err(e) => db_error("update extension", e),
    }
}

async fn delete_extension(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.delete_extension(&path) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Extension"),
        Err(e) => db_error("delete extension", e),
    }
}
