//! Test doubles for the generator and the artifact store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kbtools_core::request::TaskRequest;
use kbtools_pipeline::{ArtifactSet, GenerateError, ProjectGenerator};
use kbtools_storage::{ArtifactStore, Fetched, StorageError};

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Succeed,
    ToolFailure,
    Panic,
    /// Never finishes on its own.
    Hang,
}

pub struct FakeGenerator {
    outcome: Outcome,
}

impl FakeGenerator {
    pub fn new(outcome: Outcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl ProjectGenerator for FakeGenerator {
    async fn generate(
        &self,
        _task_id: &str,
        request: &TaskRequest,
    ) -> Result<ArtifactSet, GenerateError> {
        match self.outcome {
            Outcome::Succeed => {}
            Outcome::ToolFailure => {
                return Err(GenerateError::ToolFailed {
                    tool: "kbplacer",
                    exit_code: Some(1),
                    detail: "placement failed".into(),
                })
            }
            Outcome::Panic => panic!("generator exploded"),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let workdir = tempfile::tempdir()?;
        let project_dir = workdir.path().join(&request.project_name);
        let logs = workdir.path().join("logs");
        std::fs::create_dir_all(&project_dir)?;
        std::fs::create_dir_all(&logs)?;
        std::fs::write(project_dir.join("board.kicad_pcb"), "(kicad_pcb)")?;

        let mut renders = Vec::new();
        for name in ["front", "back", "schematic"] {
            let path = logs.join(format!("{name}.svg"));
            std::fs::write(&path, format!("<svg>{name}</svg>"))?;
            renders.push((name, path));
        }

        Ok(ArtifactSet {
            workdir,
            project_dir,
            renders,
        })
    }
}

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl FakeStore {
    pub fn fail_uploads(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::BadGateway(503));
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn fetch(&self, key: &str, _disposition: Option<&str>) -> Result<Fetched, StorageError> {
        Err(StorageError::NotFound(key.to_string()))
    }
}
