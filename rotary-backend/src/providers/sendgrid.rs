//! SendGrid mail delivery backend

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{http_client, ProviderBackend, ProviderContext, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

pub struct SendGridProvider {
    client: reqwest::Client,
}

impl SendGridProvider {
    pub fn new() -> Self {
        Self { client: http_client() }
    }

    /// Build the v3 mail/send payload from an ability request
    fn build_payload(ctx: &ProviderContext, request: &Value) -> Result<Value, ProviderError> {
        let to = request
            .get("to")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest("'to' is required".to_string()))?;
        let subject = request
            .get("subject")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidRequest("'subject' is required".to_string()))?;

        let from = request
            .get("from")
            .and_then(|v| v.as_str())
            .or_else(|| ctx.setting("from_email"))
            .ok_or_else(|| ProviderError::NotConfigured("no from address; set the 'from_email' setting".to_string()))?;

        let mut content = Vec::new();
        if let Some(text) = request.get("text").and_then(|v| v.as_str()) {
            content.push(json!({ "type": "text/plain", "value": text }));
        }
        if let Some(html) = request.get("html").and_then(|v| v.as_str()) {
            content.push(json!({ "type": "text/html", "value": html }));
        }
        if content.is_empty() {
            return Err(ProviderError::InvalidRequest("one of 'text' or 'html' is required".to_string()));
        }

        Ok(json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": from },
            "subject": subject,
            "content": content,
        }))
    }
}

impl Default for SendGridProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderBackend for SendGridProvider {
    fn name(&self) -> &str {
        "SendGrid"
    }

    fn abilities(&self) -> Vec<(&'static str, &'static str)> {
        vec![("email", "send_email")]
    }

    async fn execute(&self, ctx: &ProviderContext, request: &Value) -> Result<Value, ProviderError> {
        if ctx.ability != "send_email" {
            return Err(ProviderError::InvalidRequest(format!("SendGrid cannot serve '{}'", ctx.ability)));
        }
        let payload = Self::build_payload(ctx, request)?;
        let api_key = ctx.require_api_key()?;
        let base_url = ctx.setting("base_url").unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');

        let response = self
            .client
            .post(format!("{}/v3/mail/send", base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(json!({
            "accepted": true,
            "status": status.as_u16(),
            "message_id": message_id,
        }))
    }
}
