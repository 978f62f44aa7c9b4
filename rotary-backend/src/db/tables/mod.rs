//! Database table modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table group.

mod auth;               // auth_sessions
mod extensions;         // extensions, abilities
mod mfa;                // mfa_methods, mfa_recovery_codes
mod provider_instances; // provider_instances, *_settings, *_usage, *_extension_abilities
mod providers;          // providers, provider_extensions, provider_extension_abilities
mod rotations;          // rotations, rotation_provider_instances
mod users;              // users
