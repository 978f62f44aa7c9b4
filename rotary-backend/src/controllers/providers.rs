use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::{created, db_error, error, not_found, ok};
use crate::middleware::session_auth::{authenticate, require_root};
use crate::models::{BondProviderRequest, CreateProviderRequest, UpdateProviderRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/provider")
            .route("", web::get().to(list_providers))
            .route("", web::post().to(create_provider))
            .route("/{id}", web::get().to(get_provider))
            .route("/{id}", web::put().to(update_provider))
            .route("/{id}", web::delete().to(delete_provider))
            .route("/{id}/extension", web::get().to(list_bonds))
            .route("/{id}/extension", web::post().to(bond_extension))
            .route("/{id}/extension/{extension_id}", web::delete().to(unbond_extension)),
    );
}

async fn list_providers(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.list_providers() {
        Ok(providers) => {
            let implemented = state.rotation.registry().names();
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "providers": providers,
                "implemented": implemented,
            }))
        }
        Err(e) => db_error("list providers", e),
    }
}

async fn create_provider(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateProviderRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let name = body.name.trim();
    if name.is_empty() || name.len() > 64 {
        return error(StatusCode::BAD_REQUEST, "Invalid provider name");
    }
    if state.rotation.registry().get(name).is_none() {
        log::warn!("[PROVIDERS] '{}' has no registered backend; its instances cannot serve requests", name);
    }
    match state
        .db
        .create_provider(name, body.friendly_name.as_deref(), body.agent_settings.as_ref())
    {
        Ok(provider) => created("provider", provider),
        Err(e) => db_error("create provider", e),
    }
}

async fn get_provider(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.get_provider(&path) {
        Ok(Some(provider)) => ok("provider", provider),
        Ok(None) => not_found("Provider"),
        Err(e) => db_error("get provider", e),
    }
}

async fn update_provider(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateProviderRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state
        .db
        .update_provider(&path, body.friendly_name.as_deref(), body.agent_settings.as_ref())
    {
        Ok(Some(provider)) => ok("provider", provider),
        Ok(None) => not_found("Provider"),
        Err(e) => db_error("update provider", e),
    }
}

async fn delete_provider(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.delete_provider(&path) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Provider"),
        Err(e) => db_error("delete provider", e),
    }
}

async fn list_bonds(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    let provider_id = path.into_inner();
    match state.db.get_provider(&provider_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Provider"),
        Err(e) => return db_error("get provider", e),
    }
    let extensions = match state.db.list_provider_extensions(&provider_id) {
        Ok(bonds) => bonds,
        Err(e) => return db_error("list provider extensions", e),
    };
    match state.db.list_provider_abilities(&provider_id) {
        Ok(abilities) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "extensions": extensions,
            "abilities": abilities,
        })),
        Err(e) => db_error("list provider abilities", e),
    }
}

async fn bond_extension(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<BondProviderRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let provider_id = path.into_inner();
    match state.db.get_provider(&provider_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Provider"),
        Err(e) => return db_error("get provider", e),
    }
    let extension = match state.db.get_extension(&body.extension_id) {
        Ok(Some(ext)) => ext,
        Ok(None) => return not_found("Extension"),
        Err(e) => return db_error("get extension", e),
    };
    let abilities = match state.db.list_abilities(Some(&extension.id)) {
        Ok(all) if body.ability_ids.is_empty() => all.into_iter().filter(|a| !a.meta).collect::<Vec<_>>(),
        Ok(all) => {
            let mut selected = Vec::with_capacity(body.ability_ids.len());
            for id in &body.ability_ids {
                match all.iter().find(|a| &a.id == id) {
                    Some(ability) => selected.push(ability.clone()),
                    None => {
                        return error(
                            StatusCode::BAD_REQUEST,
                            format!("Ability {} does not belong to extension '{}'", id, extension.name),
                        )
                    }
                }
            }
            selected
        }
        Err(e) => return db_error("list abilities", e),
    };

    let bond = match state.db.bond_provider_extension(&provider_id, &extension.id) {
        Ok(bond) => bond,
        Err(e) => return db_error("bond provider", e),
    };
    let mut bonded = Vec::with_capacity(abilities.len());
    for ability in &abilities {
        match state.db.bond_provider_ability(&bond.id, &ability.id) {
            Ok(b) => bonded.push(b),
            Err(e) => return db_error("bond ability", e),
        }
    }
    log::info!(
        "[PROVIDERS] Bonded provider {} to '{}' ({} abilities)",
        provider_id,
        extension.name,
        bonded.len()
    );
    HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "extension": bond,
        "abilities": bonded,
    }))
}

async fn unbond_extension(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let (provider_id, extension_id) = path.into_inner();
    match state.db.unbond_provider_extension(&provider_id, &extension_id) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Bond"),
        Err(e) => db_error("unbond provider", e),
    }
}
