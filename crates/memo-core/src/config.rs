//! Per-invocation server configuration resolved from the environment.

use serde::{Deserialize, Serialize};

/// Settings the action handler needs for a single invocation.
///
/// Built fresh for each invocation and passed by value into the components
/// that need it; nothing reads the environment after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Title stored for notes created without one
    pub default_title: String,
    /// Blob key holding the app config JSON
    pub config_key: String,
    /// Namespace segment prepended to every note key
    pub key_prefix: String,
    /// Template for generated note ids (`$TIMESTAMP$`, `$UNIQUE$`)
    pub name_template: String,
    /// Target bucket
    pub bucket: String,
    /// Deflate note bodies before storing them
    pub use_compression: bool,
    /// Sign-in password
    pub passwd: String,
    /// Salt mixed into the session token key material
    pub salt: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_title: "New entry".to_string(),
            config_key: "config.json".to_string(),
            key_prefix: "data".to_string(),
            name_template: "$UNIQUE$".to_string(),
            bucket: String::new(),
            use_compression: false,
            passwd: String::new(),
            salt: String::new(),
        }
    }
}

impl ServerConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup.
    ///
    /// Unset and empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let defaults = Self::default();

        Self {
            default_title: get("DEFAULT_TITLE").unwrap_or(defaults.default_title),
            config_key: get("CONFIG_KEY").unwrap_or(defaults.config_key),
            key_prefix: get("KEY_PREFIX").unwrap_or(defaults.key_prefix),
            name_template: get("NAME_TEMPLATE").unwrap_or(defaults.name_template),
            bucket: get("BUCKET").unwrap_or(defaults.bucket),
            use_compression: get("USE_COMPRESSION")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.use_compression),
            passwd: get("PASSWD").unwrap_or(defaults.passwd),
            salt: get("SALT").unwrap_or(defaults.salt),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
