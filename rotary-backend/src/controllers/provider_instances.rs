use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use super::{created, db_error, error, not_found, ok};
use crate::middleware::session_auth::{authenticate, require_root};
use crate::models::{
    CreateProviderInstanceRequest, ProviderInstance, SetInstanceAbilityRequest, SetInstanceSettingRequest,
    UpdateProviderInstanceRequest,
};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/provider-instance")
            .route("", web::get().to(list_instances))
            .route("", web::post().to(create_instance))
            .route("/{id}", web::get().to(get_instance))
            .route("/{id}", web::put().to(update_instance))
            .route("/{id}", web::delete().to(delete_instance))
            .route("/{id}/settings", web::get().to(list_settings))
            .route("/{id}/settings", web::put().to(set_setting))
            .route("/{id}/settings/{key}", web::delete().to(delete_setting))
            .route("/{id}/usage", web::get().to(list_usage))
            .route("/{id}/ability", web::get().to(list_abilities))
            .route("/{id}/ability", web::put().to(set_ability)),
    );
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    provider_id: Option<String>,
}

/// Load an instance or produce the response to return instead
fn load_instance(state: &AppState, id: &str) -> Result<ProviderInstance, HttpResponse> {
    match state.db.get_provider_instance(id) {
        Ok(Some(instance)) => Ok(instance),
        Ok(None) => Err(not_found("Provider instance")),
        Err(e) => Err(db_error("get provider instance", e)),
    }
}

async fn list_instances(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListQuery>,
) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match state.db.list_provider_instances(query.provider_id.as_deref()) {
        Ok(instances) => ok(
            "provider_instances",
            instances.iter().map(|i| i.to_response()).collect::<Vec<_>>(),
        ),
        Err(e) => db_error("list provider instances", e),
    }
}

async fn create_instance(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateProviderInstanceRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let name = body.name.trim();
    if name.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Instance name is required");
    }
    match state.db.get_provider(&body.provider_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Provider"),
        Err(e) => return db_error("get provider", e),
    }
    match state.db.create_provider_instance(
        &body.provider_id,
        name,
        body.model_name.as_deref(),
        body.api_key.as_deref(),
        body.enabled,
    ) {
        Ok(instance) => created("provider_instance", instance.to_response()),
        Err(e) => db_error("create provider instance", e),
    }
}

async fn get_instance(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    match load_instance(&state, &path) {
        Ok(instance) => ok("provider_instance", instance.to_response()),
        Err(resp) => resp,
    }
}

async fn update_instance(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateProviderInstanceRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return error(StatusCode::BAD_REQUEST, "Instance name must not be empty");
    }
    match state.db.update_provider_instance(
        &path,
        body.name.as_deref().map(str::trim),
        body.model_name.as_deref(),
        body.api_key.as_deref(),
        body.enabled,
    ) {
        Ok(Some(instance)) => ok("provider_instance", instance.to_response()),
        Ok(None) => not_found("Provider instance"),
        Err(e) => db_error("update provider instance", e),
    }
}

async fn delete_instance(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    match state.db.delete_provider_instance(&path) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Provider instance"),
        Err(e) => db_error("delete provider instance", e),
    }
}

async fn list_settings(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    if let Err(resp) = load_instance(&state, &path) {
        return resp;
    }
    match state.db.list_instance_settings(&path) {
        Ok(settings) => ok("settings", settings),
        Err(e) => db_error("list settings", e),
    }
}

async fn set_setting(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<SetInstanceSettingRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let key = body.key.trim();
    if key.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Setting key is required");
    }
    if let Err(resp) = load_instance(&state, &path) {
        return resp;
    }
    match state.db.set_instance_setting(&path, key, &body.value) {
        Ok(setting) => ok("setting", setting),
        Err(e) => db_error("set setting", e),
    }
}

async fn delete_setting(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let (id, key) = path.into_inner();
    match state.db.delete_instance_setting(&id, &key) {
        Ok(true) => ok("deleted", true),
        Ok(false) => not_found("Setting"),
        Err(e) => db_error("delete setting", e),
    }
}

async fn list_usage(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    if let Err(resp) = load_instance(&state, &path) {
        return resp;
    }
    let usage = match state.db.list_instance_usage(&path) {
        Ok(usage) => usage,
        Err(e) => return db_error("list usage", e),
    };
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "usage": usage,
        "cooldown_secs": state.rotation.backoff().current_delay(&path),
    }))
}

async fn list_abilities(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = authenticate(&state, &req) {
        return resp;
    }
    if let Err(resp) = load_instance(&state, &path) {
        return resp;
    }
    match state.db.list_instance_abilities(&path) {
        Ok(abilities) => ok("abilities", abilities),
        Err(e) => db_error("list instance abilities", e),
    }
}

async fn set_ability(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<SetInstanceAbilityRequest>,
) -> impl Responder {
    if let Err(resp) = require_root(&state, &req) {
        return resp;
    }
    let instance = match load_instance(&state, &path) {
        Ok(instance) => instance,
        Err(resp) => return resp,
    };
    let bonded = match state.db.list_provider_abilities(&instance.provider_id) {
        Ok(bonds) => bonds
            .iter()
            .any(|b| b.id == body.provider_extension_ability_id),
        Err(e) => return db_error("list provider abilities", e),
    };
    if !bonded {
        return error(
            StatusCode::BAD_REQUEST,
            "Ability is not bonded to this instance's provider",
        );
    }
    match state
        .db
        .set_instance_ability(&instance.id, &body.provider_extension_ability_id, body.state, body.forced)
    {
        Ok(ability) => ok("ability", ability),
        Err(e) => db_error("set instance ability", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn root(req: test::TestRequest) -> test::TestRequest {
        req.insert_header(("X-API-Key", "root-test-key"))
    }

    #[actix_web::test]
    async fn test_api_key_is_masked() {
        let state = web::Data::new(AppState::for_tests().await);
        let provider = state.db.get_provider_by_name("SendGrid").unwrap().unwrap();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = root(test::TestRequest::post().uri("/v1/provider-instance"))
            .set_json(json!({ "provider_id": provider.id, "name": "primary", "api_key": "SG.secretvalue1234" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let instance = &body["provider_instance"];
        assert_eq!(instance["api_key_hint"], "****1234");
        assert!(instance.get("api_key").is_none());

        // Duplicate name under the same provider
        let req = root(test::TestRequest::post().uri("/v1/provider-instance"))
            .set_json(json!({ "provider_id": provider.id, "name": "primary" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_settings_and_ability_switch() {
        let state = web::Data::new(AppState::for_tests().await);
        let provider = state.db.get_provider_by_name("SendGrid").unwrap().unwrap();
        let instance = state
            .db
            .create_provider_instance(&provider.id, "backup", None, Some("key"), true)
            .unwrap();
        let bond = state.db.list_provider_abilities(&provider.id).unwrap().remove(0);
        let foreign = state
            .db
            .list_provider_abilities(&state.db.get_provider_by_name("Stripe").unwrap().unwrap().id)
            .unwrap()
            .remove(0);
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let uri = format!("/v1/provider-instance/{}/settings", instance.id);
        let req = root(test::TestRequest::put().uri(&uri))
            .set_json(json!({ "key": "from_email", "value": "noreply@example.com" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let settings = state.db.instance_settings_map(&instance.id).unwrap();
        assert_eq!(settings.get("from_email").map(String::as_str), Some("noreply@example.com"));

        let req = root(test::TestRequest::delete().uri(&format!("{}/from_email", uri))).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let uri = format!("/v1/provider-instance/{}/ability", instance.id);
        let req = root(test::TestRequest::put().uri(&uri))
            .set_json(json!({ "provider_extension_ability_id": bond.id, "state": false }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["ability"]["state"], false);

        let req = root(test::TestRequest::put().uri(&uri))
            .set_json(json!({ "provider_extension_ability_id": foreign.id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
