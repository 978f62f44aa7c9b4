use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::ProviderInstance;

/// How a rotation picks the first instance to try
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RotationStrategy {
    /// Always start from the lowest position
    #[default]
    Ordered,
    /// Advance the starting instance on every call
    RoundRobin,
}

/// A named ordered pool of provider instances used for failover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotation {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub strategy: RotationStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationProviderInstance {
    pub id: String,
    pub rotation_id: String,
    pub provider_instance_id: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

/// A rotation entry resolved against its instance and provider,
/// filtered for one extension ability
#[derive(Debug, Clone)]
pub struct RotationCandidate {
    pub entry_id: String,
    pub position: i64,
    pub provider_name: String,
    pub instance: ProviderInstance,
    pub forced: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRotationRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub strategy: RotationStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRotationRequest {
    pub description: Option<String>,
    pub strategy: Option<RotationStrategy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddRotationInstanceRequest {
    pub provider_instance_id: String,
    /// Appended after the last entry when omitted
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRotationRequest {
    pub extension: String,
    pub ability: String,
    #[serde(default)]
    pub request: Value,
}
