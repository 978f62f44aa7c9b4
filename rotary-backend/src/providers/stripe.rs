//! Stripe payments backend: customers and payment intents

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{http_client, ProviderBackend, ProviderContext, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

pub struct StripeProvider {
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new() -> Self {
        Self { client: http_client() }
    }

    fn customer_form(request: &Value) -> Result<Vec<(String, String)>, ProviderError> {
        let email = request
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest("'email' is required".to_string()))?;

        let mut form = vec![("email".to_string(), email.to_string())];
        if let Some(name) = request.get("name").and_then(|v| v.as_str()) {
            form.push(("name".to_string(), name.to_string()));
        }
        if let Some(user_id) = request.get("user_id").and_then(|v| v.as_str()) {
            form.push(("metadata[user_id]".to_string(), user_id.to_string()));
        }
        Ok(form)
    }

    fn payment_intent_form(request: &Value) -> Result<Vec<(String, String)>, ProviderError> {
        let amount = request
            .get("amount")
            .and_then(|v| v.as_i64())
            .filter(|a| *a > 0)
            .ok_or_else(|| ProviderError::InvalidRequest("'amount' must be a positive integer in minor units".to_string()))?;
        let currency = request
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("usd")
            .to_lowercase();

        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency),
        ];
        if let Some(customer) = request.get("customer").and_then(|v| v.as_str()) {
            form.push(("customer".to_string(), customer.to_string()));
        }
        if let Some(description) = request.get("description").and_then(|v| v.as_str()) {
            form.push(("description".to_string(), description.to_string()));
        }
        Ok(form)
    }

    async fn post_form(&self, ctx: &ProviderContext, path: &str, form: &[(String, String)]) -> Result<Value, ProviderError> {
        let api_key = ctx.require_api_key()?;
        let base_url = ctx.setting("base_url").unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');

        let response = self
            .client
            .post(format!("{}{}", base_url, path))
            .bearer_auth(api_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Rejected(format!("unreadable Stripe response: {}", e)))
    }
}

impl Default for StripeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderBackend for StripeProvider {
    fn name(&self) -> &str {
        "Stripe"
    }

    fn abilities(&self) -> Vec<(&'static str, &'static str)> {
        vec![("payment", "create_customer"), ("payment", "create_payment_intent")]
    }

    async fn execute(&self, ctx: &ProviderContext, request: &Value) -> Result<Value, ProviderError> {
        match ctx.ability.as_str() {
            "create_customer" => {
                let form = Self::customer_form(request)?;
                let customer = self.post_form(ctx, "/v1/customers", &form).await?;
                Ok(json!({
                    "customer_id": customer.get("id").cloned().unwrap_or(Value::Null),
                    "customer": customer,
                }))
            }
            "create_payment_intent" => {
                let form = Self::payment_intent_form(request)?;
                let intent = self.post_form(ctx, "/v1/payment_intents", &form).await?;
                Ok(json!({
                    "payment_intent_id": intent.get("id").cloned().unwrap_or(Value::Null),
                    "client_secret": intent.get("client_secret").cloned().unwrap_or(Value::Null),
                    "status": intent.get("status").cloned().unwrap_or(Value::Null),
                }))
            }
            other => Err(ProviderError::InvalidRequest(format!("Stripe cannot serve '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_context;

    #[test]
    fn test_customer_form_carries_metadata() {
        let form = StripeProvider::customer_form(&json!({ "email": "a@example.com", "user_id": "u-1" })).unwrap();
        assert!(form.contains(&("email".to_string(), "a@example.com".to_string())));
        assert!(form.contains(&("metadata[user_id]".to_string(), "u-1".to_string())));
    }

    #[test]
    fn test_payment_intent_requires_positive_amount() {
        assert!(matches!(
            StripeProvider::payment_intent_form(&json!({ "amount": 0 })),
            Err(ProviderError::InvalidRequest(_))
        ));

        let form = StripeProvider::payment_intent_form(&json!({ "amount": 1999, "currency": "EUR" })).unwrap();
        assert!(form.contains(&("currency".to_string(), "eur".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_ability_is_invalid_request() {
        let provider = StripeProvider::new();
        let ctx = test_context("payment", "refund", Some("sk_test"), &[]);
        let err = provider.execute(&ctx, &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let provider = StripeProvider::new();
        let ctx = test_context("payment", "create_customer", None, &[]);
        let err = provider.execute(&ctx, &json!({ "email": "a@example.com" })).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
