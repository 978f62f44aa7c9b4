use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical capability source such as "SendGrid" or "Stripe"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub friendly_name: Option<String>,
    pub agent_settings: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A concrete, configured credential/endpoint for a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub model_name: Option<String>,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provider instance as returned by the API (api key masked)
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInstanceResponse {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub model_name: Option<String>,
    pub api_key_hint: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderInstance {
    pub fn to_response(&self) -> ProviderInstanceResponse {
        ProviderInstanceResponse {
            id: self.id.clone(),
            provider_id: self.provider_id.clone(),
            name: self.name.clone(),
            model_name: self.model_name.clone(),
            api_key_hint: self.api_key.as_deref().map(mask_secret),
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Keep the last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Join between a provider and an extension it can serve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderExtension {
    pub id: String,
    pub provider_id: String,
    pub extension_id: String,
    pub created_at: DateTime<Utc>,
}

/// Join between a provider extension and one specific ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderExtensionAbility {
    pub id: String,
    pub provider_extension_id: String,
    pub ability_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceUsage {
    pub id: String,
    pub provider_instance_id: String,
    pub key: String,
    pub value: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceSetting {
    pub id: String,
    pub provider_instance_id: String,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-instance switch for one provider extension ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceExtensionAbility {
    pub id: String,
    pub provider_instance_id: String,
    pub provider_extension_ability_id: String,
    pub state: bool,
    /// Forced instances are tried before everything else in a rotation
    pub forced: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub friendly_name: Option<String>,
    pub agent_settings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProviderRequest {
    pub friendly_name: Option<String>,
    pub agent_settings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BondProviderRequest {
    pub extension_id: String,
    /// Abilities of the extension to bond; empty bonds every ability
    #[serde(default)]
    pub ability_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProviderInstanceRequest {
    pub provider_id: String,
    pub name: String,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProviderInstanceRequest {
    pub name: Option<String>,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetInstanceSettingRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetInstanceAbilityRequest {
    pub provider_extension_ability_id: String,
    #[serde(default = "default_true")]
    pub state: bool,
    #[serde(default)]
    pub forced: bool,
}

fn default_true() -> bool {
    true
}
