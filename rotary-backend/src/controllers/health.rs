use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::{not_found, ok};
use crate::middleware::session_auth::require_root;
use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
    cfg.service(web::resource("/api/service/{name}/pause").route(web::post().to(pause_service)));
    cfg.service(web::resource("/api/service/{name}/resume").route(web::post().to(resume_service)));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "extensions": state.extensions.statuses(),
        "providers": state.rotation.registry().names(),
        "services": state.services.iter().map(|s| s.status()).collect::<Vec<_>>(),
    }))
}

async fn pause_service(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    set_paused(&state, &req, &path, true)
}

async fn resume_service(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    set_paused(&state, &req, &path, false)
}

fn set_paused(state: &AppState, req: &HttpRequest, name: &str, paused: bool) -> HttpResponse {
    if let Err(resp) = require_root(state, req) {
        return resp;
    }
    let Some(runner) = state.service(name) else {
        return not_found("Service");
    };
    if paused {
        runner.pause();
    } else {
        runner.resume();
    }
    ok("service", runner.status())
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_lists_extensions() {
        let state = web::Data::new(AppState::for_tests().await);
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let resp: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/health").to_request()).await;
        assert_eq!(resp["status"], "ok");
        let names: Vec<&str> = resp["extensions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"email"));
        assert!(names.contains(&"mfa"));
        assert!(resp["providers"].as_array().unwrap().iter().any(|p| p == "SendGrid"));
        assert_eq!(resp["services"][0]["name"], "session_cleanup");
        assert_eq!(resp["services"][0]["paused"], false);
    }

    #[actix_web::test]
    async fn test_pause_and_resume_service() {
        let state = web::Data::new(AppState::for_tests().await);
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post().uri("/api/service/session_cleanup/pause").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/service/session_cleanup/pause")
            .insert_header(("X-API-Key", "root-test-key"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["service"]["paused"], true);
        assert!(state.service("session_cleanup").unwrap().is_paused());

        let req = test::TestRequest::post()
            .uri("/api/service/session_cleanup/resume")
            .insert_header(("X-API-Key", "root-test-key"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["service"]["paused"], false);

        let req = test::TestRequest::post()
            .uri("/api/service/missing/pause")
            .insert_header(("X-API-Key", "root-test-key"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
