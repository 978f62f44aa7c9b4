use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Channel used to deliver or derive the second factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MfaMethodType {
    Totp,
    Email,
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TotpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaMethod {
    pub id: String,
    pub user_id: String,
    pub method_type: MfaMethodType,
    /// Email address or phone number for delivered codes
    pub identifier: Option<String>,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub algorithm: TotpAlgorithm,
    pub digits: u32,
    pub period: u64,
    pub verified: bool,
    pub is_primary: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert an MFA method
#[derive(Debug, Clone)]
pub struct NewMfaMethod {
    pub user_id: String,
    pub method_type: MfaMethodType,
    pub identifier: Option<String>,
    pub secret: String,
    pub algorithm: TotpAlgorithm,
    pub digits: u32,
    pub period: u64,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMfaMethodRequest {
    pub method_type: MfaMethodType,
    pub identifier: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    pub algorithm: Option<TotpAlgorithm>,
    pub digits: Option<u32>,
    pub period: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyMfaMethodRequest {
    pub code: String,
}

/// Hashed recovery code as stored; the plaintext is only shown once
#[derive(Debug, Clone)]
pub struct RecoveryCode {
    pub id: String,
    pub user_id: String,
    pub code_hash: String,
    pub salt: String,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
