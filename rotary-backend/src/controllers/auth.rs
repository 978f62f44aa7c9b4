use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{generate_token, verify_password};
use crate::hooks::{HookEvent, HookPoint, HookTiming};
use crate::mfa::{LoginFactor, MfaError};
use crate::middleware::session_auth::extract_token;
use crate::models::{MfaMethodType, Session};
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct MfaVerifyRequest {
    token: String,
    code: String,
}

#[derive(Deserialize)]
pub struct MfaSendRequest {
    token: String,
}

#[derive(Serialize, Default)]
pub struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mfa_method: Option<MfaMethodType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    factor: Option<LoginFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl LoginResponse {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn session(session: &Session) -> Self {
        Self {
            success: true,
            token: Some(session.token.clone()),
            expires_at: Some(session.expires_at.timestamp()),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
pub struct ValidateResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/auth")
            .route("/login", web::post().to(login))
            .route("/mfa/verify", web::post().to(mfa_verify))
            .route("/mfa/send", web::post().to(mfa_send))
            .route("/logout", web::post().to(logout))
            .route("/validate", web::get().to(validate)),
    );
}

fn session_ttl(state: &AppState) -> Duration {
    Duration::hours(state.config.session_ttl_hours)
}

fn internal_error(action: &str, e: impl std::fmt::Display) -> HttpResponse {
    log::error!("Failed to {}: {}", action, e);
    HttpResponse::InternalServerError().json(LoginResponse::failed(format!("Failed to {}", action)))
}

/// Issue a full session, firing the session hooks around it
async fn open_session(state: &AppState, user_id: &str) -> Result<Session, HttpResponse> {
    let event = HookEvent::new(user_id, json!({}));
    state.hooks.fire(HookPoint::SessionCreate, HookTiming::Before, &event).await;

    let session = state
        .db
        .create_session(&generate_token(), user_id, false, session_ttl(state))
        .map_err(|e| internal_error("create session", e))?;

    let event = HookEvent::new(user_id, json!({ "session_id": session.id }));
    state.hooks.fire(HookPoint::SessionCreate, HookTiming::After, &event).await;
    Ok(session)
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> impl Responder {
    let email = body.email.trim().to_lowercase();
    let user = match state.db.get_user_by_email(&email) {
        Ok(Some(user)) if verify_password(&body.password, &user.password_hash) => user,
        Ok(_) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failed("Invalid email or password"));
        }
        Err(e) => return internal_error("look up user", e),
    };

    let method = match state.mfa.login_method(&user.id) {
        Ok(method) => method,
        Err(e) => return internal_error("load MFA methods", e),
    };

    let Some(method) = method else {
        return match open_session(&state, &user.id).await {
            Ok(session) => {
                log::info!("User {} signed in", user.id);
                HttpResponse::Ok().json(LoginResponse::session(&session))
            }
            Err(resp) => resp,
        };
    };

    // Second factor required: hand out a short-lived pending token
    let ttl = Duration::minutes(state.config.mfa_pending_ttl_minutes);
    let pending = match state.db.create_session(&generate_token(), &user.id, true, ttl) {
        Ok(session) => session,
        Err(e) => return internal_error("create session", e),
    };

    let code_sent = if method.method_type == MfaMethodType::Email {
        match state.mfa.send_code(&method).await {
            Ok(()) => Some(true),
            Err(e) => {
                log::warn!("[MFA] Login code for user {} not sent: {}", user.id, e);
                Some(false)
            }
        }
    } else {
        None
    };

    log::info!("User {} passed password check, awaiting {} code", user.id, method.method_type);
    HttpResponse::Ok().json(LoginResponse {
        mfa_required: true,
        mfa_method: Some(method.method_type),
        code_sent,
        ..LoginResponse::session(&pending)
    })
}

async fn mfa_verify(state: web::Data<AppState>, body: web::Json<MfaVerifyRequest>) -> impl Responder {
    let pending = match state.db.get_pending_session(&body.token) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failed("Invalid or expired MFA token"));
        }
        Err(e) => return internal_error("load session", e),
    };

    let method = match state.mfa.login_method(&pending.user_id) {
        Ok(Some(method)) => method,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failed("No MFA method available"));
        }
        Err(e) => return internal_error("load MFA methods", e),
    };

    let factor = match state.mfa.verify_login(&pending.user_id, &method, body.code.trim()) {
        Ok(factor) => factor,
        Err(MfaError::InvalidCode) => {
            let attempts = match state.db.record_failed_mfa_attempt(&pending.token) {
                Ok(attempts) => attempts,
                Err(e) => return internal_error("record MFA attempt", e),
            };
            log::warn!(
                "[MFA] Rejected login code for user {} ({}/{})",
                pending.user_id,
                attempts,
                state.config.mfa_max_attempts
            );
            if attempts >= state.config.mfa_max_attempts {
                if let Err(e) = state.db.delete_session(&pending.token) {
                    return internal_error("discard pending session", e);
                }
                return HttpResponse::Unauthorized()
                    .json(LoginResponse::failed("Too many invalid codes, sign in again"));
            }
            return HttpResponse::Unauthorized().json(LoginResponse::failed("Invalid code"));
        }
        Err(e) => return internal_error("verify code", e),
    };

    let event = HookEvent::new(pending.user_id.clone(), json!({}));
    state.hooks.fire(HookPoint::SessionCreate, HookTiming::Before, &event).await;

    match state.db.promote_session(&pending.token, session_ttl(&state)) {
        Ok(Some(session)) => {
            let event = HookEvent::new(session.user_id.clone(), json!({ "session_id": session.id, "factor": factor }));
            state.hooks.fire(HookPoint::SessionCreate, HookTiming::After, &event).await;
            log::info!("User {} signed in with {:?}", session.user_id, factor);
            HttpResponse::Ok().json(LoginResponse {
                factor: Some(factor),
                ..LoginResponse::session(&session)
            })
        }
        Ok(None) => HttpResponse::Unauthorized().json(LoginResponse::failed("Invalid or expired MFA token")),
        Err(e) => internal_error("promote session", e),
    }
}

async fn mfa_send(state: web::Data<AppState>, body: web::Json<MfaSendRequest>) -> impl Responder {
    let pending = match state.db.get_pending_session(&body.token) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failed("Invalid or expired MFA token"));
        }
        Err(e) => return internal_error("load session", e),
    };
    let method = match state.mfa.login_method(&pending.user_id) {
        Ok(Some(method)) => method,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failed("No MFA method available"));
        }
        Err(e) => return internal_error("load MFA methods", e),
    };
    match state.mfa.send_code(&method).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "sent": true })),
        Err(e) => HttpResponse::build(e.status_code()).json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

async fn logout(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let Some(token) = extract_token(&req) else {
        return HttpResponse::Unauthorized().json(json!({
            "success": false,
            "error": "No authorization token provided"
        }));
    };
    match state.db.delete_session(&token) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => {
            log::error!("Failed to delete session: {}", e);
            HttpResponse::InternalServerError().json(json!({ "success": false }))
        }
    }
}

async fn validate(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let invalid = ValidateResponse {
        valid: false,
        user_id: None,
        expires_at: None,
    };
    let Some(token) = extract_token(&req) else {
        return HttpResponse::Ok().json(invalid);
    };

    match state.db.validate_session(&token) {
        Ok(Some(session)) => HttpResponse::Ok().json(ValidateResponse {
            valid: true,
            user_id: Some(session.user_id),
            expires_at: Some(session.expires_at.timestamp()),
        }),
        Ok(None) => HttpResponse::Ok().json(invalid),
        Err(e) => {
            log::error!("Failed to validate session: {}", e);
            HttpResponse::Ok().json(invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::mfa::totp;
    use crate::models::CreateMfaMethodRequest;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    async fn with_user() -> (web::Data<AppState>, String) {
        let state = web::Data::new(AppState::for_tests().await);
        let hash = hash_password("compilers").unwrap();
        let user = state.db.create_user("grace@example.com", None, &hash).unwrap();
        (state, user.id)
    }

    fn login_request(password: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/v1/auth/login")
            .set_json(json!({ "email": "Grace@example.com", "password": password }))
    }

    #[actix_web::test]
    async fn test_login_without_mfa() {
        let (state, user_id) = with_user().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let resp = test::call_service(&app, login_request("wrong password").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: Value = test::call_and_read_body_json(&app, login_request("compilers").to_request()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["mfa_required"], false);
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/v1/auth/validate")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["user_id"], user_id.as_str());

        let req = test::TestRequest::post()
            .uri("/v1/auth/logout")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(state.db.validate_session(&token).unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_login_with_totp_and_recovery_code() {
        let (state, user_id) = with_user().await;
        let user = state.db.get_user(&user_id).unwrap().unwrap();
        let enrollment = state
            .mfa
            .enroll(
                &user,
                &CreateMfaMethodRequest {
                    method_type: MfaMethodType::Totp,
                    identifier: None,
                    is_primary: true,
                    algorithm: None,
                    digits: None,
                    period: None,
                },
            )
            .await
            .unwrap();
        let method = state.db.get_mfa_method(&enrollment.method.id).unwrap().unwrap();
        let key = totp::decode_secret(&method.secret).unwrap();
        let code = totp::code_at(method.algorithm, &key, totp::now_unix(), method.period, method.digits).unwrap();
        let recovery = state.mfa.verify_method(&user_id, &method.id, &code).unwrap().unwrap();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let body: Value = test::call_and_read_body_json(&app, login_request("compilers").to_request()).await;
        assert_eq!(body["mfa_required"], true);
        assert_eq!(body["mfa_method"], "totp");
        let pending = body["token"].as_str().unwrap().to_string();

        // A pending token does not authenticate requests
        assert!(state.db.validate_session(&pending).unwrap().is_none());

        let req = test::TestRequest::post()
            .uri("/v1/auth/mfa/verify")
            .set_json(json!({ "token": pending, "code": "not-a-code" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/v1/auth/mfa/verify")
            .set_json(json!({ "token": pending, "code": recovery[0] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["factor"], "recovery_code");
        assert!(state.db.validate_session(&pending).unwrap().is_some());

        // The recovery code cannot be replayed on a second login
        let body: Value = test::call_and_read_body_json(&app, login_request("compilers").to_request()).await;
        let pending = body["token"].as_str().unwrap().to_string();
        let req = test::TestRequest::post()
            .uri("/v1/auth/mfa/verify")
            .set_json(json!({ "token": pending, "code": recovery[0] }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_pending_login_discarded_after_repeated_bad_codes() {
        let (state, user_id) = with_user().await;
        let user = state.db.get_user(&user_id).unwrap().unwrap();
        let enrollment = state
            .mfa
            .enroll(
                &user,
                &CreateMfaMethodRequest {
                    method_type: MfaMethodType::Totp,
                    identifier: None,
                    is_primary: true,
                    algorithm: None,
                    digits: None,
                    period: None,
                },
            )
            .await
            .unwrap();
        let method = state.db.get_mfa_method(&enrollment.method.id).unwrap().unwrap();
        let key = totp::decode_secret(&method.secret).unwrap();
        let code = totp::code_at(method.algorithm, &key, totp::now_unix(), method.period, method.digits).unwrap();
        let recovery = state.mfa.verify_method(&user_id, &method.id, &code).unwrap().unwrap();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let body: Value = test::call_and_read_body_json(&app, login_request("compilers").to_request()).await;
        let pending = body["token"].as_str().unwrap().to_string();

        for _ in 0..state.config.mfa_max_attempts {
            let req = test::TestRequest::post()
                .uri("/v1/auth/mfa/verify")
                .set_json(json!({ "token": pending, "code": "not-a-code" }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
        }
        assert!(state.db.get_pending_session(&pending).unwrap().is_none());

        // Even a valid recovery code cannot revive the discarded login
        let req = test::TestRequest::post()
            .uri("/v1/auth/mfa/verify")
            .set_json(json!({ "token": pending, "code": recovery[0] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], false);
        assert!(state.db.validate_session(&pending).unwrap().is_none());
    }
}
