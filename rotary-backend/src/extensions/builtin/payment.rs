use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::extensions::{seed_default_instance, AbilitySpec, Extension, ExtensionContext};
use crate::hooks::{Hook, HookEvent, HookPoint, HookTiming};
use crate::providers::{ProviderBackend, StripeProvider};
use crate::rotation::{RotationError, RotationManager};

pub struct PaymentExtension;

#[async_trait]
impl Extension for PaymentExtension {
    fn name(&self) -> &'static str {
        "payment"
    }

    fn friendly_name(&self) -> &'static str {
        "Payments"
    }

    fn description(&self) -> &'static str {
        "Customer records and payment intents with an external processor"
    }

    fn abilities(&self) -> Vec<AbilitySpec> {
        vec![
            AbilitySpec::new("create_customer", "Create customer"),
            AbilitySpec::new("create_payment_intent", "Create payment intent"),
        ]
    }

    fn providers(&self) -> Vec<Arc<dyn ProviderBackend>> {
        vec![Arc::new(StripeProvider::new())]
    }

    fn hooks(&self, ctx: &ExtensionContext) -> Vec<Arc<dyn Hook>> {
        vec![
            Arc::new(CreateCustomerHook {
                db: ctx.db.clone(),
                rotation: ctx.rotation.clone(),
            }),
            Arc::new(OrphanedCustomerHook),
        ]
    }

    fn validate_config(&self, config: &Config) -> Result<(), String> {
        match config.stripe_api_key.as_deref() {
            Some(key) if !(key.starts_with("sk_") || key.starts_with("rk_")) => {
                Err("STRIPE_API_KEY must be a secret (sk_) or restricted (rk_) key".to_string())
            }
            _ => Ok(()),
        }
    }

    fn seed(&self, ctx: &ExtensionContext) -> rusqlite::Result<()> {
        seed_default_instance(ctx, self.name(), "Stripe", ctx.config.stripe_api_key.as_deref(), &[])
    }
}

/// Creates a processor customer for new users and stores its id
struct CreateCustomerHook {
    db: Arc<Database>,
    rotation: Arc<RotationManager>,
}

#[async_trait]
impl Hook for CreateCustomerHook {
    fn id(&self) -> &str {
        "payment.create_customer"
    }

    fn point(&self) -> HookPoint {
        HookPoint::UserCreate
    }

    fn timing(&self) -> HookTiming {
        HookTiming::After
    }

    async fn run(&self, event: &HookEvent) -> Result<(), String> {
        let request = json!({
            "email": event.payload.get("email"),
            "name": event.payload.get("display_name"),
            "user_id": event.user_id,
        });

        let outcome = match self.rotation.rotate_default("payment", "create_customer", &request).await {
            Ok(outcome) => outcome,
            Err(RotationError::NotFound(_) | RotationError::NoEligibleInstances { .. }) => {
                log::debug!("[EXT] No payment provider configured, user {} has no customer", event.user_id);
                return Ok(());
            }
            Err(e) => return Err(e.to_string()),
        };

        let customer_id = outcome
            .value
            .get("customer_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "provider returned no customer id".to_string())?;

        self.db
            .set_external_payment_id(&event.user_id, Some(customer_id))
            .map_err(|e| e.to_string())?;
        log::info!("[EXT] Linked user {} to payment customer via {}", event.user_id, outcome.provider_name);
        Ok(())
    }
}

/// Deleting a user leaves the processor customer behind
struct OrphanedCustomerHook;

#[async_trait]
impl Hook for OrphanedCustomerHook {
    fn id(&self) -> &str {
        "payment.orphaned_customer"
    }

    fn point(&self) -> HookPoint {
        HookPoint::UserDelete
    }

    fn timing(&self) -> HookTiming {
        HookTiming::After
    }

    async fn run(&self, event: &HookEvent) -> Result<(), String> {
        if let Some(customer_id) = event.payload.get("external_payment_id").and_then(|v| v.as_str()) {
            log::warn!(
                "[EXT] User {} deleted; payment customer {} was not removed",
                event.user_id,
                customer_id
            );
        }
        Ok(())
    }
}
