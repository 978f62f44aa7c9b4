use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;

use super::{created, ok};
use crate::mfa::MfaError;
use crate::middleware::session_auth::require_user;
use crate::models::{CreateMfaMethodRequest, VerifyMfaMethodRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/user/mfa")
            .route("", web::get().to(status))
            .route("", web::post().to(create_method))
            .route("/recovery-codes", web::get().to(recovery_code_count))
            .route("/recovery-codes", web::post().to(regenerate_recovery_codes))
            .route("/{id}/verify", web::post().to(verify_method))
            .route("/{id}/primary", web::post().to(set_primary))
            .route("/{id}/send", web::post().to(send_code))
            .route("/{id}", web::delete().to(delete_method)),
    );
}

fn mfa_error(e: MfaError) -> HttpResponse {
    let status = e.status_code();
    if status.is_server_error() && !matches!(e, MfaError::Disabled | MfaError::DeliveryUnavailable(_)) {
        log::error!("[MFA] {}", e);
    }
    HttpResponse::build(status).json(json!({
        "success": false,
        "error": e.to_string()
    }))
}

async fn status(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.status(&session.user_id) {
        Ok(status) => ok("mfa", status),
        Err(e) => mfa_error(e),
    }
}

async fn create_method(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateMfaMethodRequest>,
) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let user = match state.db.get_user(&session.user_id) {
        Ok(Some(user)) => user,
        Ok(None) => return mfa_error(MfaError::UserNotFound),
        Err(e) => return mfa_error(e.into()),
    };
    match state.mfa.enroll(&user, &body).await {
        Ok(enrollment) => created("enrollment", enrollment),
        Err(e) => mfa_error(e),
    }
}

async fn verify_method(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<VerifyMfaMethodRequest>,
) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.verify_method(&session.user_id, &path, body.code.trim()) {
        Ok(recovery_codes) => HttpResponse::Ok().json(json!({
            "success": true,
            "verified": true,
            "recovery_codes": recovery_codes,
        })),
        Err(e) => mfa_error(e),
    }
}

async fn set_primary(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.set_primary(&session.user_id, &path) {
        Ok(method) => ok("method", method),
        Err(e) => mfa_error(e),
    }
}

async fn delete_method(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.delete_method(&session.user_id, &path) {
        Ok(()) => ok("deleted", true),
        Err(e) => mfa_error(e),
    }
}

async fn recovery_code_count(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.recovery_code_count(&session.user_id) {
        Ok(count) => ok("remaining", count),
        Err(e) => mfa_error(e),
    }
}

async fn regenerate_recovery_codes(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !state.mfa.is_enabled() {
        return mfa_error(MfaError::Disabled);
    }
    match state.mfa.regenerate_recovery_codes(&session.user_id) {
        Ok(codes) => ok("recovery_codes", codes),
        Err(e) => mfa_error(e),
    }
}

async fn send_code(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let session = match require_user(&state, &req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.mfa.send_method_code(&session.user_id, &path).await {
        Ok(()) => ok("sent", true),
        Err(e) => mfa_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfa::totp;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    async fn signed_in() -> (web::Data<AppState>, String) {
        let state = web::Data::new(AppState::for_tests().await);
        let user = state.db.create_user("mfa@example.com", None, "hash").unwrap();
        state
            .db
            .create_session("tok", &user.id, false, chrono::Duration::hours(1))
            .unwrap();
        (state, user.id)
    }

    #[actix_web::test]
    async fn test_totp_enrollment_over_http() {
        let (state, user_id) = signed_in().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/v1/user/mfa")
            .insert_header(("Authorization", "Bearer tok"))
            .set_json(json!({ "method_type": "totp" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let method_id = body["enrollment"]["method"]["id"].as_str().unwrap().to_string();
        assert!(body["enrollment"]["method"].get("secret").is_none());
        let secret = body["enrollment"]["secret"].as_str().unwrap().to_string();

        let method = state.db.get_mfa_method(&method_id).unwrap().unwrap();
        let key = totp::decode_secret(&secret).unwrap();
        let code = totp::code_at(method.algorithm, &key, totp::now_unix(), method.period, method.digits).unwrap();

        let req = test::TestRequest::post()
            .uri(&format!("/v1/user/mfa/{}/verify", method_id))
            .insert_header(("Authorization", "Bearer tok"))
            .set_json(json!({ "code": code }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["recovery_codes"].as_array().unwrap().len(), 10);

        let req = test::TestRequest::get()
            .uri("/v1/user/mfa")
            .insert_header(("Authorization", "Bearer tok"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mfa"]["primary_method_id"], method_id.as_str());
        assert_eq!(body["mfa"]["recovery_codes_remaining"], 10);
        assert!(state.mfa.login_method(&user_id).unwrap().is_some());
    }

    #[actix_web::test]
    async fn test_sms_delivery_is_not_implemented() {
        let (state, _) = signed_in().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/v1/user/mfa")
            .insert_header(("Authorization", "Bearer tok"))
            .set_json(json!({ "method_type": "sms", "identifier": "+15550100" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let method_id = body["enrollment"]["method"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/v1/user/mfa/{}/send", method_id))
            .insert_header(("Authorization", "Bearer tok"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[actix_web::test]
    async fn test_root_key_is_not_a_user() {
        let (state, _) = signed_in().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::get()
            .uri("/v1/user/mfa")
            .insert_header(("X-API-Key", "root-test-key"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
