//! Multi-factor authentication: TOTP, delivered codes and recovery codes
//!
//! Every method carries its own secret. TOTP secrets are shared with an
//! authenticator app once at enrollment; email and SMS secrets never leave the
//! server and derive short-lived codes that are delivered through a rotation.

pub mod recovery;
pub mod totp;

use actix_web::http::StatusCode;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::db::Database;
use crate::hooks::{HookEvent, HookManager, HookPoint, HookTiming};
use crate::models::{CreateMfaMethodRequest, MfaMethod, MfaMethodType, NewMfaMethod, User};
use crate::rotation::{RotationError, RotationManager};

/// Lifetime of an emailed code step
const DELIVERED_CODE_PERIOD: u64 = 300;
const DEFAULT_PERIOD: u64 = 30;
const DEFAULT_DIGITS: u32 = 6;

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("multi-factor authentication is disabled")]
    Disabled,
    #[error("user not found")]
    UserNotFound,
    #[error("MFA method not found")]
    MethodNotFound,
    #[error("{0}")]
    InvalidParameters(String),
    #[error("invalid code")]
    InvalidCode,
    #[error("MFA method has not been verified")]
    NotVerified,
    #[error("no provider can deliver {0} codes")]
    DeliveryUnavailable(MfaMethodType),
    #[error("code delivery failed: {0}")]
    Delivery(#[from] RotationError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl MfaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Disabled | Self::DeliveryUnavailable(_) => StatusCode::NOT_IMPLEMENTED,
            Self::UserNotFound | Self::MethodNotFound => StatusCode::NOT_FOUND,
            Self::InvalidParameters(_) | Self::NotVerified => StatusCode::BAD_REQUEST,
            Self::InvalidCode => StatusCode::UNAUTHORIZED,
            Self::Delivery(e) => match e {
                RotationError::NotFound(_) | RotationError::NoEligibleInstances { .. } => StatusCode::NOT_IMPLEMENTED,
                other => other.status_code(),
            },
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A newly created method; `secret` and `provisioning_uri` are only ever shown here
#[derive(Debug, Clone, Serialize)]
pub struct MfaEnrollment {
    pub method: MfaMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_uri: Option<String>,
    pub code_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MfaStatus {
    pub enabled: bool,
    pub methods: Vec<MfaMethod>,
    pub primary_method_id: Option<String>,
    pub recovery_codes_remaining: i64,
}

/// Which factor satisfied a login challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFactor {
    Code,
    RecoveryCode,
}

pub struct MfaManager {
    db: Arc<Database>,
    rotation: Arc<RotationManager>,
    hooks: Arc<HookManager>,
    issuer: String,
    enabled: bool,
}

impl MfaManager {
    pub fn new(
        db: Arc<Database>,
        rotation: Arc<RotationManager>,
        hooks: Arc<HookManager>,
        issuer: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            db,
            rotation,
            hooks,
            issuer: issuer.into(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn ensure_enabled(&self) -> Result<(), MfaError> {
        if self.enabled { Ok(()) } else { Err(MfaError::Disabled) }
    }

    fn owned_method(&self, user_id: &str, method_id: &str) -> Result<MfaMethod, MfaError> {
        self.db
            .get_mfa_method(method_id)?
            .filter(|m| m.user_id == user_id)
            .ok_or(MfaError::MethodNotFound)
    }

    pub fn status(&self, user_id: &str) -> Result<MfaStatus, MfaError> {
        let methods = self.db.list_mfa_methods(user_id)?;
        let primary_method_id = methods.iter().find(|m| m.is_primary && m.verified).map(|m| m.id.clone());
        Ok(MfaStatus {
            enabled: self.enabled,
            methods,
            primary_method_id,
            recovery_codes_remaining: self.db.count_unused_recovery_codes(user_id)?,
        })
    }

    /// The method a login must be challenged with, if any
    pub fn login_method(&self, user_id: &str) -> Result<Option<MfaMethod>, MfaError> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(primary) = self.db.get_primary_mfa_method(user_id)? {
            return Ok(Some(primary));
        }
        // Primary may point at an unverified method; any verified one still guards login
        Ok(self.db.list_mfa_methods(user_id)?.into_iter().find(|m| m.verified))
    }

    pub async fn enroll(&self, user: &User, req: &CreateMfaMethodRequest) -> Result<MfaEnrollment, MfaError> {
        self.ensure_enabled()?;

        let digits = req.digits.unwrap_or(DEFAULT_DIGITS);
        if !matches!(digits, 6 | 8) {
            return Err(MfaError::InvalidParameters("digits must be 6 or 8".to_string()));
        }
        let period = match req.method_type {
            MfaMethodType::Totp => req.period.unwrap_or(DEFAULT_PERIOD),
            _ => DELIVERED_CODE_PERIOD,
        };
        if !(15..=300).contains(&period) {
            return Err(MfaError::InvalidParameters("period must be between 15 and 300 seconds".to_string()));
        }

        let identifier = match req.method_type {
            MfaMethodType::Totp => None,
            MfaMethodType::Email => Some(
                req.identifier
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| user.email.clone()),
            ),
            MfaMethodType::Sms => Some(
                req.identifier
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| MfaError::InvalidParameters("a phone number is required".to_string()))?,
            ),
        };

        let event = HookEvent::new(&user.id, json!({ "method_type": req.method_type }));
        self.hooks.fire(HookPoint::MfaMethodCreate, HookTiming::Before, &event).await;

        let secret = totp::generate_secret();
        let algorithm = req.algorithm.unwrap_or_default();
        let method = self.db.create_mfa_method(&NewMfaMethod {
            user_id: user.id.clone(),
            method_type: req.method_type,
            identifier,
            secret: secret.clone(),
            algorithm,
            digits,
            period,
            is_primary: req.is_primary,
        })?;
        log::info!("[MFA] User {} enrolled {} method {}", user.id, method.method_type, method.id);

        let mut code_sent = false;
        if method.method_type == MfaMethodType::Email {
            match self.send_code(&method).await {
                Ok(()) => code_sent = true,
                Err(e) => log::warn!("[MFA] Could not send enrollment code for {}: {}", method.id, e),
            }
        }

        let event = HookEvent::new(&user.id, json!({ "method_id": method.id, "method_type": method.method_type }));
        self.hooks.fire(HookPoint::MfaMethodCreate, HookTiming::After, &event).await;

        let (secret, provisioning_uri) = if method.method_type == MfaMethodType::Totp {
            let uri = totp::provisioning_uri(&self.issuer, &user.email, &secret, algorithm, digits, period);
            (Some(secret), Some(uri))
        } else {
            (None, None)
        };

        Ok(MfaEnrollment {
            method,
            secret,
            provisioning_uri,
            code_sent,
        })
    }

    /// Check a code against a method's secret at the current time
    pub fn check_code(&self, method: &MfaMethod, code: &str) -> bool {
        totp::decode_secret(&method.secret)
            .map(|key| totp::verify_at(method.algorithm, &key, code, totp::now_unix(), method.period, method.digits))
            .unwrap_or(false)
    }

    /// Confirm a pending method. Returns new recovery codes when the user had none.
    pub fn verify_method(&self, user_id: &str, method_id: &str, code: &str) -> Result<Option<Vec<String>>, MfaError> {
        self.ensure_enabled()?;
        let method = self.owned_method(user_id, method_id)?;
        if !self.check_code(&method, code) {
            return Err(MfaError::InvalidCode);
        }

        if !method.verified {
            self.db.mark_mfa_method_verified(&method.id)?;
            if self.db.get_primary_mfa_method(user_id)?.is_none() {
                self.db.set_primary_mfa_method(user_id, &method.id)?;
            }
            log::info!("[MFA] Method {} verified for user {}", method.id, user_id);
        }
        self.db.touch_mfa_method(&method.id)?;

        if self.db.count_unused_recovery_codes(user_id)? == 0 {
            return Ok(Some(self.regenerate_recovery_codes(user_id)?));
        }
        Ok(None)
    }

    /// Second factor for a login: a code for the method or a recovery code
    pub fn verify_login(&self, user_id: &str, method: &MfaMethod, code: &str) -> Result<LoginFactor, MfaError> {
        if method.user_id != user_id {
            return Err(MfaError::MethodNotFound);
        }
        if self.check_code(method, code) {
            self.db.touch_mfa_method(&method.id)?;
            return Ok(LoginFactor::Code);
        }
        if recovery::looks_like_recovery_code(code) && self.consume_recovery_code(user_id, code)? {
            return Ok(LoginFactor::RecoveryCode);
        }
        Err(MfaError::InvalidCode)
    }

    pub fn set_primary(&self, user_id: &str, method_id: &str) -> Result<MfaMethod, MfaError> {
        let method = self.owned_method(user_id, method_id)?;
        if !method.verified {
            return Err(MfaError::NotVerified);
        }
        self.db.set_primary_mfa_method(user_id, &method.id)?;
        self.owned_method(user_id, method_id)
    }

    pub fn delete_method(&self, user_id: &str, method_id: &str) -> Result<(), MfaError> {
        if self.db.delete_mfa_method(user_id, method_id)? {
            Ok(())
        } else {
            Err(MfaError::MethodNotFound)
        }
    }

    /// Replace all recovery codes; the plaintext is returned once
    pub fn regenerate_recovery_codes(&self, user_id: &str) -> Result<Vec<String>, MfaError> {
        let (codes, hashed) = recovery::generate_set();
        self.db.replace_recovery_codes(user_id, &hashed)?;
        log::info!("[MFA] Issued {} recovery codes for user {}", codes.len(), user_id);
        Ok(codes)
    }

    pub fn recovery_code_count(&self, user_id: &str) -> Result<i64, MfaError> {
        Ok(self.db.count_unused_recovery_codes(user_id)?)
    }

    /// Use a recovery code. False if it does not match or was already used.
    pub fn consume_recovery_code(&self, user_id: &str, code: &str) -> Result<bool, MfaError> {
        let stored = self.db.list_unused_recovery_codes(user_id)?;
        match recovery::find_match(&stored, code) {
            Some(hit) => {
                let used = self.db.mark_recovery_code_used(&hit.id)?;
                if used {
                    log::info!("[MFA] Recovery code used by user {}", user_id);
                }
                Ok(used)
            }
            None => Ok(false),
        }
    }

    /// Send a fresh code for one of the user's own methods
    pub async fn send_method_code(&self, user_id: &str, method_id: &str) -> Result<(), MfaError> {
        self.ensure_enabled()?;
        let method = self.owned_method(user_id, method_id)?;
        self.send_code(&method).await
    }

    /// Deliver the current code for an email or SMS method
    pub async fn send_code(&self, method: &MfaMethod) -> Result<(), MfaError> {
        match method.method_type {
            MfaMethodType::Totp => Err(MfaError::InvalidParameters(
                "TOTP codes come from the authenticator app".to_string(),
            )),
            MfaMethodType::Sms => Err(MfaError::DeliveryUnavailable(MfaMethodType::Sms)),
            MfaMethodType::Email => {
                let to = method
                    .identifier
                    .as_deref()
                    .ok_or_else(|| MfaError::InvalidParameters("method has no email address".to_string()))?;
                let key = totp::decode_secret(&method.secret)
                    .ok_or_else(|| MfaError::InvalidParameters("method secret is corrupt".to_string()))?;
                let code = totp::code_at(method.algorithm, &key, totp::now_unix(), method.period, method.digits)
                    .ok_or_else(|| MfaError::InvalidParameters("method secret is corrupt".to_string()))?;

                let minutes = method.period / 60;
                let request = json!({
                    "to": to,
                    "subject": format!("Your {} verification code", self.issuer),
                    "text": format!("Your verification code is {}. It expires in about {} minutes.", code, minutes),
                });
                let outcome = self.rotation.rotate_default("email", "send_email", &request).await?;
                log::info!(
                    "[MFA] Sent code for method {} via {} ({} attempt(s))",
                    method.id,
                    outcome.provider_name,
                    outcome.attempts.len()
                );
                Ok(())
            }
        }
    }
}
