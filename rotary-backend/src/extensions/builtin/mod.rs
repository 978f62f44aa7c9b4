mod database;
mod email;
mod mfa;
mod payment;

pub use database::DatabaseExtension;
pub use email::EmailExtension;
pub use mfa::MfaExtension;
pub use payment::PaymentExtension;

use std::sync::Arc;

use super::Extension;
use crate::config::Config;

/// Built-in extensions listed in EXTENSIONS, in dependency order
pub fn enabled(config: &Config) -> Vec<Arc<dyn Extension>> {
    let mut extensions: Vec<Arc<dyn Extension>> = Vec::new();

    // Email first: other extensions deliver through it
    if config.extension_enabled("email") {
        extensions.push(Arc::new(EmailExtension));
    }
    if config.extension_enabled("mfa") {
        if config.mfa_enabled {
            extensions.push(Arc::new(MfaExtension));
        } else {
            log::info!("[EXT] 'mfa' listed but MFA_ENABLED is false, skipping");
        }
    }
    if config.extension_enabled("payment") {
        extensions.push(Arc::new(PaymentExtension));
    }
    if config.extension_enabled("database") {
        extensions.push(Arc::new(DatabaseExtension));
    }

    for name in &config.extensions {
        if !["email", "mfa", "payment", "database"].contains(&name.as_str()) {
            log::warn!("[EXT] Unknown extension '{}' in EXTENSIONS", name);
        }
    }
    extensions
}
