//! Typed view of a project-generation request.
//!
//! The gateway only checks that a submission is a JSON object; the full
//! shape is checked here, on the worker, right before generation. Every
//! failure is a [`ValidationError`], which the worker never retries.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Project name used when the layout does not name itself.
pub const DEFAULT_PROJECT_NAME: &str = "keyboard";

/// Routing option that routes switches to diodes only.
pub const ROUTING_SWITCH_DIODE: &str = "Switch-Diode only";

/// Routing option that also routes rows and columns.
pub const ROUTING_FULL: &str = "Full";

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

/// Malformed input. Retrying a task that failed with one of these can never
/// succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid layout JSON structure: {0}")]
    InvalidLayoutJson(String),

    #[error("invalid layout in task request: {0}")]
    InvalidLayout(String),

    #[error("invalid settings in task request: {0}")]
    InvalidSettings(String),

    #[error("invalid footprint format: {field} must be in format 'lib:footprint'")]
    InvalidFootprintFormat { field: &'static str },

    #[error("invalid layout metadata: {0}")]
    InvalidLayoutMetadata(String),
}

/// A footprint reference split into library nickname and footprint name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub library: String,
    pub name: String,
}

impl Footprint {
    /// Parse `"library:footprint"`. Both halves must be non-empty.
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ValidationError> {
        match raw.split_once(':') {
            Some((library, name)) if !library.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Self {
                    library: library.trim().to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(ValidationError::InvalidFootprintFormat { field }),
        }
    }
}

/// Which connections the placement tool should route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Disabled,
    SwitchDiode,
    Full,
}

impl Routing {
    /// Parse the UI's routing label. Unrecognised labels disable routing.
    pub fn from_label(label: &str) -> Self {
        match label {
            ROUTING_FULL => Routing::Full,
            ROUTING_SWITCH_DIODE => Routing::SwitchDiode,
            _ => Routing::Disabled,
        }
    }

    pub fn switches_with_diodes(self) -> bool {
        matches!(self, Routing::SwitchDiode | Routing::Full)
    }

    pub fn rows_and_columns(self) -> bool {
        matches!(self, Routing::Full)
    }
}

/// Generation settings chosen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub switch_footprint: Footprint,
    pub diode_footprint: Footprint,
    pub routing: Routing,
}

/// A fully validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    /// Layout document passed verbatim to the placement tool.
    pub layout: Map<String, Value>,
    pub settings: Settings,
    /// File-system safe project name derived from `layout.meta.name`.
    pub project_name: String,
}

impl TaskRequest {
    /// Validate a decoded request body.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let request = value.as_object().ok_or_else(|| {
            ValidationError::InvalidLayoutJson("request must be a JSON object".into())
        })?;

        let layout = match request.get("layout") {
            Some(Value::Object(layout)) => layout,
            Some(_) => {
                return Err(ValidationError::InvalidLayout(
                    "field `layout` must be a JSON object".into(),
                ))
            }
            None => {
                return Err(ValidationError::InvalidLayout(
                    "missing required field `layout`".into(),
                ))
            }
        };

        let settings = match request.get("settings") {
            Some(Value::Object(settings)) => settings,
            Some(_) => {
                return Err(ValidationError::InvalidSettings(
                    "field `settings` must be a JSON object".into(),
                ))
            }
            None => {
                return Err(ValidationError::InvalidSettings(
                    "missing required field `settings`".into(),
                ))
            }
        };

        let settings = Settings {
            switch_footprint: Footprint::parse(
                "switchFootprint",
                string_field(settings, "switchFootprint"),
            )?,
            diode_footprint: Footprint::parse(
                "diodeFootprint",
                string_field(settings, "diodeFootprint"),
            )?,
            routing: Routing::from_label(string_field(settings, "routing")),
        };

        let meta = match layout.get("meta") {
            Some(Value::Object(meta)) => meta,
            _ => {
                return Err(ValidationError::InvalidLayoutMetadata(
                    "field `layout.meta` must be a JSON object".into(),
                ))
            }
        };

        Ok(Self {
            layout: layout.clone(),
            settings,
            project_name: project_name(string_field(meta, "name")),
        })
    }

    /// Decode and validate a raw request body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::InvalidLayoutJson(e.to_string()))?;
        Self::from_value(&value)
    }
}

/// Read a string field, treating absent or non-string values as empty.
fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Turn a layout name into a project name usable as a file and directory name.
pub fn project_name(layout_name: &str) -> String {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(layout_name.trim(), "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        DEFAULT_PROJECT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}
