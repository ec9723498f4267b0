//! Project generation capability.
//!
//! The worker only sees [`ProjectGenerator`]: give it a validated request,
//! get back a directory of generated files plus the three previews, or a
//! [`GenerateError`] that already knows whether a retry can help.
//! [`KicadGenerator`] implements it with the `kbplacer` placement tool and
//! `kicad-cli`.

pub mod command;
pub mod config;
pub mod error;
pub mod footprints;
pub mod kicad;

use std::path::PathBuf;

use async_trait::async_trait;
use kbtools_core::request::TaskRequest;

pub use config::PipelineConfig;
pub use error::GenerateError;
pub use kicad::KicadGenerator;

/// Files produced for one task.
///
/// The working directory is removed when the set is dropped.
#[derive(Debug)]
pub struct ArtifactSet {
    pub workdir: tempfile::TempDir,
    /// KiCad project directory inside `workdir`.
    pub project_dir: PathBuf,
    /// Preview name (`front`, `back`, `schematic`) and its SVG file.
    pub renders: Vec<(&'static str, PathBuf)>,
}

impl ArtifactSet {
    /// Root of everything that goes into the downloadable archive.
    pub fn root(&self) -> PathBuf {
        self.workdir.path().to_path_buf()
    }
}

/// Turns a validated request into a generated project.
#[async_trait]
pub trait ProjectGenerator: Send + Sync {
    async fn generate(
        &self,
        task_id: &str,
        request: &TaskRequest,
    ) -> Result<ArtifactSet, GenerateError>;
}
