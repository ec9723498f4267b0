#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use kbtools_api::app;
use kbtools_api::config::ServerConfig;
use kbtools_api::state::AppState;
use kbtools_core::request::TaskRequest;
use kbtools_pipeline::{ArtifactSet, GenerateError, KicadGenerator, PipelineConfig, ProjectGenerator};
use kbtools_queue::MemoryQueue;
use kbtools_storage::{ArtifactStore, FilerStore};
use kbtools_worker::config::WorkerConfig;
use kbtools_worker::processor::TaskProcessor;
use kbtools_worker::server::WorkerServer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const VALID_SUBMISSION: &str = r#"{
    "layout": {"meta": {"name": "mykb"}},
    "settings": {"switchFootprint": "lib:fp", "diodeFootprint": "lib2:fp2", "routing": "Full"}
}"#;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        ..ServerConfig::default()
    }
}

/// The full gateway over an in-memory queue.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub queue: Arc<MemoryQueue>,
}

impl TestApp {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self::with_config(test_config(), store)
    }

    pub fn with_config(config: ServerConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let state = AppState::new(config, queue.clone(), store, "kicad");
        Self {
            router: app::build(state.clone()),
            state,
            queue,
        }
    }

    /// A gateway whose artifacts live on `filer`.
    pub fn with_filer(filer: &FakeFiler) -> Self {
        Self::new(filer.store())
    }

    pub async fn request(&self, method: Method, uri: &str, body: Body) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> Response {
        self.request(Method::POST, uri, Body::from(body.to_string()))
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response {
        self.request(Method::DELETE, uri, Body::empty()).await
    }

    /// Submit `body` and return the new task ID, asserting acceptance.
    pub async fn submit(&self, body: &str) -> String {
        let response = self.post_json("/api/pcb", body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        json["task_id"].as_str().unwrap().to_string()
    }

    /// Poll the status endpoint until it reports `expected` or the deadline
    /// passes. Returns the last status document.
    pub async fn wait_for_status(&self, task_id: &str, expected: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let json = body_json(self.get(&format!("/api/pcb/{task_id}")).await).await;
            if json["task_status"] == expected || tokio::time::Instant::now() > deadline {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Fake Filer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

type Objects = Arc<Mutex<HashMap<String, StoredObject>>>;

/// A Filer stand-in on `127.0.0.1:0`: multipart `POST` stores, `GET`
/// serves, any key containing `broken` answers 500.
pub struct FakeFiler {
    pub url: String,
    objects: Objects,
}

impl FakeFiler {
    pub async fn spawn() -> Self {
        let objects = Objects::default();
        let router = Router::new()
            .route("/{*path}", get(serve_object).post(store_object))
            .with_state(objects.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            objects,
        }
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        Arc::new(FilerStore::new(&self.url, Duration::from_secs(5)).unwrap())
    }

    pub fn insert(&self, key: &str, content_type: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                bytes: bytes.to_vec(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

async fn serve_object(State(objects): State<Objects>, Path(path): Path<String>) -> Response {
    if path.contains("broken") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match objects.lock().unwrap().get(&path).cloned() {
        Some(object) => (
            [
                ("content-type", object.content_type),
                ("content-disposition", "inline".to_string()),
                ("x-filer-tag", "kept".to_string()),
            ],
            object.bytes,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn store_object(
    State(objects): State<Objects>,
    Path(path): Path<String>,
    mut multipart: Multipart,
) -> StatusCode {
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap().to_vec();
        objects
            .lock()
            .unwrap()
            .insert(path.clone(), StoredObject { content_type, bytes });
        return StatusCode::CREATED;
    }
    StatusCode::BAD_REQUEST
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Writes a minimal project and the three previews without external tools.
pub struct StubGenerator;

#[async_trait]
impl ProjectGenerator for StubGenerator {
    async fn generate(
        &self,
        _task_id: &str,
        request: &TaskRequest,
    ) -> Result<ArtifactSet, GenerateError> {
        let workdir = tempfile::tempdir()?;
        let name = &request.project_name;
        let project_dir = workdir.path().join(name);
        let logs = workdir.path().join("logs");
        std::fs::create_dir_all(&project_dir)?;
        std::fs::create_dir_all(&logs)?;
        std::fs::write(project_dir.join(format!("{name}.kicad_pcb")), "(kicad_pcb)")?;

        let mut renders = Vec::new();
        for preview in ["front", "back", "schematic"] {
            let path = logs.join(format!("{preview}.svg"));
            std::fs::write(&path, format!("<svg id=\"{preview}\"/>"))?;
            renders.push((preview, path));
        }

        Ok(ArtifactSet {
            workdir,
            project_dir,
            renders,
        })
    }
}

/// The real KiCad generator. Only usable for requests that fail validation,
/// since the test environment has no KiCad tools.
pub fn kicad_generator() -> Arc<dyn ProjectGenerator> {
    Arc::new(KicadGenerator::new(PipelineConfig {
        python_bin: "/nonexistent/python3".into(),
        kicad_cli_bin: "/nonexistent/kicad-cli".into(),
        kicad_3rdparty_dir: "/nonexistent/3rdparty".into(),
        diode_library_dir: "/nonexistent/footprints".into(),
        work_root: std::env::temp_dir(),
    }))
}

/// A running worker server draining `queue`.
pub struct RunningWorker {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    pub fn spawn(
        queue: Arc<MemoryQueue>,
        generator: Arc<dyn ProjectGenerator>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let config = WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let processor = TaskProcessor::new(queue.clone(), generator, store);
        let server = WorkerServer::new(config, queue, processor);

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.run(token).await.unwrap();
        });
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap();
    }
}
