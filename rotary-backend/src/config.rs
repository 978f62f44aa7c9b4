use std::env;
use std::str::FromStr;

/// Extensions enabled when EXTENSIONS is not set
pub const DEFAULT_EXTENSIONS: &str = "mfa,email,payment,database";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Root key for catalog administration; catalog writes are refused without it
    pub root_api_key: Option<String>,
    pub mfa_enabled: bool,
    pub mfa_issuer: String,
    pub session_ttl_hours: i64,
    pub mfa_pending_ttl_minutes: i64,
    /// Wrong codes a pending MFA login may submit before it is discarded
    pub mfa_max_attempts: u32,
    pub extensions: Vec<String>,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_from_email: Option<String>,
    pub stripe_api_key: Option<String>,
    pub sql_extension_database: Option<String>,
    pub service_interval_secs: u64,
    pub service_max_failures: u32,
    pub service_retry_delay_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_or("PORT", 8080),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "./.db/rotary.db".to_string()),
            root_api_key: non_empty("ROOT_API_KEY"),
            mfa_enabled: parse_bool("MFA_ENABLED", true),
            mfa_issuer: env::var("MFA_ISSUER").unwrap_or_else(|_| "Rotary".to_string()),
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 24),
            mfa_pending_ttl_minutes: parse_or("MFA_PENDING_TTL_MINUTES", 5),
            mfa_max_attempts: parse_or::<u32>("MFA_MAX_ATTEMPTS", 5).max(1),
            extensions: parse_list(
                &env::var("EXTENSIONS").unwrap_or_else(|_| DEFAULT_EXTENSIONS.to_string()),
            ),
            sendgrid_api_key: non_empty("SENDGRID_API_KEY"),
            sendgrid_from_email: non_empty("SENDGRID_FROM_EMAIL"),
            stripe_api_key: non_empty("STRIPE_API_KEY"),
            sql_extension_database: non_empty("SQL_EXTENSION_DATABASE"),
            service_interval_secs: parse_or("SERVICE_INTERVAL_SECS", 60),
            service_max_failures: parse_or("SERVICE_MAX_FAILURES", 5),
            service_retry_delay_secs: parse_or("SERVICE_RETRY_DELAY_SECS", 10),
        }
    }

    /// Whether an extension is listed in EXTENSIONS (case-insensitive)
    pub fn extension_enabled(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(name))
    }

    /// In-memory configuration with no provider credentials
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: ":memory:".to_string(),
            root_api_key: Some("root-test-key".to_string()),
            mfa_enabled: true,
            mfa_issuer: "Rotary".to_string(),
            session_ttl_hours: 24,
            mfa_pending_ttl_minutes: 5,
            mfa_max_attempts: 5,
            extensions: parse_list(DEFAULT_EXTENSIONS),
            sendgrid_api_key: None,
            sendgrid_from_email: None,
            stripe_api_key: None,
            sql_extension_database: None,
            service_interval_secs: 60,
            service_max_failures: 5,
            service_retry_delay_secs: 10,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("{} has invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
