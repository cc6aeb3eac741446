//! Server configuration, loaded from environment variables at startup.
//!
//! Application settings (API keys, export paths, ...) live in the JSON
//! settings file managed through `/api/settings`; this struct only covers
//! what the process needs before those settings are loaded.

/// Runtime configuration for subvox-server.
///
/// Every field has a default so the server works without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to bind (default: `"127.0.0.1:5000"`).
    pub bind_address: String,

    /// Path of the JSON application-settings file.
    pub settings_path: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl ServerConfig {
    /// Build [`ServerConfig`] from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("SUBVOX_BIND", "127.0.0.1:5000"),
            settings_path: env_or("SUBVOX_SETTINGS", "config.json"),
            log_level: env_or("SUBVOX_LOG", "info"),
            log_json: std::env::var("SUBVOX_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
