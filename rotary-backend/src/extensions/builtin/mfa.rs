use async_trait::async_trait;

use crate::config::Config;
use crate::extensions::{AbilitySpec, Extension, ExtensionContext};

/// Catalog entry for multi-factor authentication. The codes themselves are
/// handled by the MFA manager; emailed codes go through the email extension.
pub struct MfaExtension;

#[async_trait]
impl Extension for MfaExtension {
    fn name(&self) -> &'static str {
        "mfa"
    }

    fn friendly_name(&self) -> &'static str {
        "Multi-factor Authentication"
    }

    fn description(&self) -> &'static str {
        "TOTP, emailed and SMS one-time codes with single-use recovery codes"
    }

    fn abilities(&self) -> Vec<AbilitySpec> {
        vec![
            AbilitySpec::meta("totp", "Authenticator app"),
            AbilitySpec::meta("email_otp", "Emailed code"),
            AbilitySpec::meta("sms_otp", "Text message code"),
        ]
    }

    fn validate_config(&self, config: &Config) -> Result<(), String> {
        if !config.mfa_enabled {
            return Err("MFA_ENABLED is false".to_string());
        }
        if config.mfa_issuer.trim().is_empty() {
            return Err("MFA_ISSUER must not be empty".to_string());
        }
        Ok(())
    }

    async fn on_start(&self, ctx: &ExtensionContext) -> bool {
        if !ctx.config.extension_enabled("email") {
            log::warn!("[EXT] 'mfa' running without 'email': emailed codes cannot be delivered");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config() {
        let mut config = Config::for_tests();
        assert!(MfaExtension.validate_config(&config).is_ok());
        config.mfa_issuer = " ".to_string();
        assert!(MfaExtension.validate_config(&config).is_err());
    }
}
