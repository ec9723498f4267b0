use std::time::Duration;

use kbtools_core::env::{optional, parse_or, var_or};

/// Profile value that switches the gateway into production mode.
pub const PRODUCTION_PROFILE: &str = "PRODUCTION";

/// Where non-API requests are sent.
pub const DEFAULT_EDITOR_URL: &str = "https://editor.keyboard-tools.xyz/";

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `15`).
    pub request_timeout_secs: u64,
    /// How long in-flight responses may drain after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    /// Production mode disables the permissive CORS layer.
    pub production: bool,
    /// Redirect target for every path outside `/api` and `/health`.
    pub editor_url: String,
    /// Submissions are refused while pending + active exceeds this.
    pub admission_max_depth: i64,
    /// Idle time after which a tracked task counts as abandoned.
    pub abandonment_timeout: Duration,
    /// Period of the abandonment sweep.
    pub abandonment_check_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                               |
    /// |-----------------------------------|---------------------------------------|
    /// | `HOST`                            | `0.0.0.0`                             |
    /// | `PORT`                            | `8080`                                |
    /// | `REQUEST_TIMEOUT_SECS`            | `15`                                  |
    /// | `SHUTDOWN_TIMEOUT_SECS`           | `10`                                  |
    /// | `PROFILE`                         | unset (`PRODUCTION` enables it)       |
    /// | `EDITOR_URL`                      | `https://editor.keyboard-tools.xyz/`  |
    /// | `ADMISSION_MAX_DEPTH`             | `2`                                   |
    /// | `TASK_ABANDONMENT_TIMEOUT`        | `15` (minutes)                        |
    /// | `TASK_ABANDONMENT_CHECK_INTERVAL` | `2` (minutes)                         |
    pub fn from_env() -> Self {
        let production = optional("PROFILE").is_some_and(|p| p == PRODUCTION_PROFILE);

        Self {
            host: var_or("HOST", "0.0.0.0"),
            port: parse_or("PORT", 8080),
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 15),
            shutdown_timeout_secs: parse_or("SHUTDOWN_TIMEOUT_SECS", 10),
            production,
            editor_url: var_or("EDITOR_URL", DEFAULT_EDITOR_URL),
            admission_max_depth: parse_or("ADMISSION_MAX_DEPTH", 2),
            abandonment_timeout: minutes(parse_or("TASK_ABANDONMENT_TIMEOUT", 15)),
            abandonment_check_interval: minutes(parse_or("TASK_ABANDONMENT_CHECK_INTERVAL", 2)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 15,
            shutdown_timeout_secs: 10,
            production: false,
            editor_url: DEFAULT_EDITOR_URL.to_string(),
            admission_max_depth: 2,
            abandonment_timeout: minutes(15),
            abandonment_check_interval: minutes(2),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}
