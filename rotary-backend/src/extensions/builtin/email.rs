use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::extensions::{seed_default_instance, AbilitySpec, Extension, ExtensionContext};
use crate::hooks::{Hook, HookEvent, HookPoint, HookTiming};
use crate::providers::{ProviderBackend, SendGridProvider};
use crate::rotation::{RotationError, RotationManager};

pub struct EmailExtension;

#[async_trait]
impl Extension for EmailExtension {
    fn name(&self) -> &'static str {
        "email"
    }

    fn friendly_name(&self) -> &'static str {
        "Email"
    }

    fn description(&self) -> &'static str {
        "Transactional email delivery"
    }

    fn abilities(&self) -> Vec<AbilitySpec> {
        vec![AbilitySpec::new("send_email", "Send email")]
    }

    fn providers(&self) -> Vec<Arc<dyn ProviderBackend>> {
        vec![Arc::new(SendGridProvider::new())]
    }

    fn hooks(&self, ctx: &ExtensionContext) -> Vec<Arc<dyn Hook>> {
        vec![Arc::new(WelcomeEmailHook {
            rotation: ctx.rotation.clone(),
            issuer: ctx.config.mfa_issuer.clone(),
        })]
    }

    fn validate_config(&self, config: &Config) -> Result<(), String> {
        if config.sendgrid_api_key.is_some() && config.sendgrid_from_email.is_none() {
            return Err("SENDGRID_FROM_EMAIL is required when SENDGRID_API_KEY is set".to_string());
        }
        Ok(())
    }

    fn seed(&self, ctx: &ExtensionContext) -> rusqlite::Result<()> {
        let settings: Vec<(&str, &str)> = ctx
            .config
            .sendgrid_from_email
            .as_deref()
            .map(|from| vec![("from_email", from)])
            .unwrap_or_default();
        match ctx.config.sendgrid_api_key.as_deref() {
            Some(key) => seed_default_instance(ctx, self.name(), "SendGrid", Some(key), &settings),
            None => seed_default_instance(ctx, self.name(), "SendGrid", None, &[]),
        }
    }
}

/// Sends a welcome message after a user registers
struct WelcomeEmailHook {
    rotation: Arc<RotationManager>,
    issuer: String,
}

#[async_trait]
impl Hook for WelcomeEmailHook {
    fn id(&self) -> &str {
        "email.welcome"
    }

    fn point(&self) -> HookPoint {
        HookPoint::UserCreate
    }

    fn timing(&self) -> HookTiming {
        HookTiming::After
    }

    async fn run(&self, event: &HookEvent) -> Result<(), String> {
        let Some(email) = event.payload.get("email").and_then(|v| v.as_str()) else {
            return Err("event has no email".to_string());
        };
        let greeting = event
            .payload
            .get("display_name")
            .and_then(|v| v.as_str())
            .map(|name| format!("Hi {},", name))
            .unwrap_or_else(|| "Hi,".to_string());

        let request = json!({
            "to": email,
            "subject": format!("Welcome to {}", self.issuer),
            "text": format!("{}\n\nYour {} account is ready.", greeting, self.issuer),
        });

        match self.rotation.rotate_default("email", "send_email", &request).await {
            Ok(_) => Ok(()),
            Err(RotationError::NotFound(_) | RotationError::NoEligibleInstances { .. }) => {
                log::debug!("[EXT] No email provider configured, skipping welcome email");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
