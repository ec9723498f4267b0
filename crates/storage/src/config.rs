use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use kbtools_core::env::{optional, parse_or, var_or};

/// Which storage backend holds artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// SeaweedFS-style Filer; artifacts are streamed through the gateway.
    Filer,
    /// S3-compatible object store; clients are redirected to pre-signed URLs.
    S3,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filer" => Ok(Self::Filer),
            "s3" => Ok(Self::S3),
            other => Err(format!("unknown storage backend '{other}', expected 'filer' or 's3'")),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filer => f.write_str("filer"),
            Self::S3 => f.write_str("s3"),
        }
    }
}

/// S3 connection settings.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint for S3-compatible stores; path-style addressing is
    /// used when set.
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub presign_expiry: Duration,
}

/// Storage settings shared by the gateway and the worker.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub filer_url: String,
    pub upload_timeout: Duration,
    pub s3: S3Config,
}

impl StorageConfig {
    /// Load from environment variables.
    ///
    /// | Env var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `STORAGE_BACKEND`        | `filer`                 |
    /// | `FILER_URL`              | `http://localhost:8888` |
    /// | `UPLOAD_TIMEOUT_SECS`    | `300`                   |
    /// | `S3_BUCKET`              | `kicad-projects`        |
    /// | `S3_ENDPOINT`            | unset                   |
    /// | `S3_REGION`              | `us-east-1`             |
    /// | `S3_ACCESS_KEY`          | unset                   |
    /// | `S3_SECRET_KEY`          | unset                   |
    /// | `S3_PRESIGN_EXPIRY_SECS` | `900`                   |
    pub fn from_env() -> Self {
        Self {
            backend: parse_or("STORAGE_BACKEND", StorageBackend::Filer),
            filer_url: var_or("FILER_URL", "http://localhost:8888"),
            upload_timeout: Duration::from_secs(parse_or("UPLOAD_TIMEOUT_SECS", 300)),
            s3: S3Config {
                bucket: var_or("S3_BUCKET", "kicad-projects"),
                endpoint: optional("S3_ENDPOINT"),
                region: var_or("S3_REGION", "us-east-1"),
                access_key: optional("S3_ACCESS_KEY"),
                secret_key: optional("S3_SECRET_KEY"),
                presign_expiry: Duration::from_secs(parse_or("S3_PRESIGN_EXPIRY_SECS", 900)),
            },
        }
    }
}
