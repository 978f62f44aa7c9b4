use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pluggable feature unit exposing abilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub friendly_name: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named capability belonging to exactly one extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ability {
    pub id: String,
    pub extension_id: String,
    pub name: String,
    pub friendly_name: Option<String>,
    /// Meta abilities describe the extension itself rather than a provider call
    pub meta: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExtensionRequest {
    pub name: String,
    pub friendly_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateExtensionRequest {
    pub friendly_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAbilityRequest {
    pub extension_id: String,
    pub name: String,
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub meta: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAbilityRequest {
    pub friendly_name: Option<String>,
    pub meta: Option<bool>,
}
