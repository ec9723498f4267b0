use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use kbtools_core::env::{optional, parse_or, var_or};
use kbtools_core::task::DEFAULT_QUEUE;

use crate::error::QueueError;

/// Connection settings for the queue backend.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Full connection URL. Takes precedence over the individual parts.
    pub database_url: Option<String>,
    /// `host:port` of the backend server.
    pub addr: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Queue that submissions go to and workers serve.
    pub queue_name: String,
    pub max_connections: u32,
}

impl QueueConfig {
    /// Load from environment variables.
    ///
    /// | Env var                 | Default          |
    /// |-------------------------|------------------|
    /// | `QUEUE_DATABASE_URL`    | unset            |
    /// | `QUEUE_ADDR`            | `localhost:5432` |
    /// | `QUEUE_USER`            | `kbtools`        |
    /// | `QUEUE_PASSWORD`        | empty            |
    /// | `QUEUE_DB`              | `kbtools`        |
    /// | `QUEUE_NAME`            | `kicad`          |
    /// | `QUEUE_MAX_CONNECTIONS` | `10`             |
    pub fn from_env() -> Self {
        Self {
            database_url: optional("QUEUE_DATABASE_URL"),
            addr: var_or("QUEUE_ADDR", "localhost:5432"),
            user: var_or("QUEUE_USER", "kbtools"),
            password: var_or("QUEUE_PASSWORD", ""),
            database: var_or("QUEUE_DB", "kbtools"),
            queue_name: var_or("QUEUE_NAME", DEFAULT_QUEUE),
            max_connections: parse_or("QUEUE_MAX_CONNECTIONS", 10),
        }
    }

    /// Build connection options from either the URL or the individual parts.
    pub fn connect_options(&self) -> Result<PgConnectOptions, QueueError> {
        if let Some(url) = &self.database_url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| QueueError::Config(format!("QUEUE_DATABASE_URL: {e}")));
        }

        let (host, port) = match self.addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    QueueError::Config(format!("QUEUE_ADDR port '{port}': {e}"))
                })?;
                (host, port)
            }
            None => (self.addr.as_str(), 5432),
        };

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.user)
            .database(&self.database);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }

    /// Open a connection pool to the backend.
    pub async fn connect(&self) -> Result<PgPool, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(self.connect_options()?)
            .await?;
        Ok(pool)
    }
}
