//! Integration tests for submitting, polling and cancelling tasks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{body_bytes, body_json, FakeFiler, RunningWorker, StubGenerator, TestApp, VALID_SUBMISSION};
use kbtools_api::background::abandonment::sweep_once;
use kbtools_core::progress::ProgressReport;
use kbtools_core::task::{EnqueueOptions, TaskState, TASK_TYPE_GENERATE_KICAD};
use kbtools_queue::{TaskBroker, TaskQueue};
use kbtools_storage::keys;

fn no_store() -> Arc<dyn kbtools_storage::ArtifactStore> {
    Arc::new(
        kbtools_storage::FilerStore::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_202_and_task_starts_pending() {
    let app = TestApp::new(no_store());

    let response = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let task_id = json["task_id"].as_str().unwrap().to_string();
    assert!(!task_id.is_empty());
    assert_eq!(json["task_status"], "pending");

    let status = body_json(app.get(&format!("/api/pcb/{task_id}")).await).await;
    assert_eq!(status["task_id"], task_id.as_str());
    assert_eq!(status["task_status"], "PENDING");
    assert_eq!(status["task_result"], serde_json::json!({"percentage": 0}));

    assert!(app.state.tracker.contains(&task_id));
}

#[tokio::test]
async fn payload_is_enqueued_verbatim_with_admission_defaults() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;

    let task = app.queue.get(&task_id).unwrap();
    assert_eq!(task.payload, VALID_SUBMISSION.as_bytes());
    assert_eq!(task.task_type, TASK_TYPE_GENERATE_KICAD);
    assert_eq!(task.queue, "kicad");
    assert_eq!(task.max_retry, 3);
    assert_eq!(task.timeout, Duration::from_secs(600));
    assert_eq!(task.retention, Duration::from_secs(86_400));
}

#[tokio::test]
async fn identical_submissions_create_independent_tasks() {
    let app = TestApp::new(no_store());
    let first = app.submit(VALID_SUBMISSION).await;
    let second = app.submit(VALID_SUBMISSION).await;
    assert_ne!(first, second);
    assert_eq!(app.queue.len(), 2);
}

#[tokio::test]
async fn malformed_json_is_rejected_without_enqueue() {
    let app = TestApp::new(no_store());

    for body in ["{not json", "[1, 2, 3]", "\"layout\"", ""] {
        let response = app.post_json("/api/pcb", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        let json = body_json(response).await;
        assert_eq!(json["code"], "BAD_REQUEST");
        assert_eq!(json["error"], "Invalid JSON in request body");
    }
    assert!(app.queue.is_empty());
    assert_eq!(app.state.tracker.count(), 0);
}

#[tokio::test]
async fn submissions_past_the_depth_limit_get_503() {
    let app = TestApp::new(no_store());
    let opts = EnqueueOptions::default();
    for _ in 0..2 {
        app.queue
            .enqueue(TASK_TYPE_GENERATE_KICAD, b"{}".to_vec(), &opts)
            .await
            .unwrap();
    }

    // Depth 2 does not exceed the limit yet.
    let first = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

    let third = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(third.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(third).await;
    assert_eq!(json["code"], "OVERLOADED");
    assert!(json.get("task_id").is_none());

    assert_eq!(app.queue.len(), 3);
    assert_eq!(app.state.tracker.count(), 1);
}

#[tokio::test]
async fn active_tasks_count_towards_depth() {
    let app = TestApp::new(no_store());
    for _ in 0..3 {
        let id = app.submit(VALID_SUBMISSION).await;
        app.queue.set_state(&id, TaskState::Active);
    }

    let response = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn retrying_and_finished_tasks_do_not_count_towards_depth() {
    let app = TestApp::new(no_store());
    let states = [TaskState::Retry, TaskState::Completed, TaskState::Archived];
    for state in states {
        let id = app.submit(VALID_SUBMISSION).await;
        app.queue.set_state(&id, state);
    }

    let response = app.post_json("/api/pcb", VALID_SUBMISSION).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ---------------------------------------------------------------------------
// Status polling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_task_status_is_404() {
    let app = TestApp::new(no_store());
    let response = app.get("/api/pcb/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    assert_eq!(app.state.tracker.count(), 0);
}

#[tokio::test]
async fn polling_reports_progress_without_changing_state() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;
    app.queue.set_state(&task_id, TaskState::Active);
    app.queue
        .write_result(
            &task_id,
            &ProgressReport::new(10, "Generating KiCad PCB files").to_bytes(),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let json = body_json(app.get(&format!("/api/pcb/{task_id}")).await).await;
        assert_eq!(json["task_status"], "PROGRESS");
        assert_eq!(json["task_result"]["percentage"], 10);
        assert_eq!(json["task_result"]["message"], "Generating KiCad PCB files");
    }
    assert_eq!(app.queue.get(&task_id).unwrap().state, TaskState::Active);
    assert!(app.state.tracker.contains(&task_id));
}

#[tokio::test]
async fn missing_settings_fails_without_consuming_a_retry() {
    let filer = FakeFiler::spawn().await;
    let app = TestApp::with_filer(&filer);
    let task_id = app
        .submit(r#"{"layout": {"meta": {"name": "mykb"}}}"#)
        .await;

    let worker = RunningWorker::spawn(app.queue.clone(), common::kicad_generator(), filer.store());
    let json = app.wait_for_status(&task_id, "FAILURE").await;
    worker.stop().await;

    assert_eq!(json["task_status"], "FAILURE");
    assert_eq!(json["task_result"]["percentage"], 0);
    let error = json["task_result"]["error"].as_str().unwrap();
    assert!(error.contains("settings"), "error was: {error}");

    let task = app.queue.get(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Archived);
    assert_eq!(task.retried, 0);
    assert!(filer.keys().is_empty());
    assert!(!app.state.tracker.contains(&task_id));
}

#[tokio::test]
async fn completed_task_reports_success_and_serves_its_archive() {
    let filer = FakeFiler::spawn().await;
    let app = TestApp::with_filer(&filer);
    let task_id = app.submit(VALID_SUBMISSION).await;

    let worker = RunningWorker::spawn(app.queue.clone(), Arc::new(StubGenerator), filer.store());
    let json = app.wait_for_status(&task_id, "SUCCESS").await;
    worker.stop().await;

    assert_eq!(json["task_status"], "SUCCESS");
    assert_eq!(json["task_result"], serde_json::json!({"percentage": 100}));

    let uploaded = filer.object(&keys::archive_key(&task_id)).unwrap();
    assert_eq!(uploaded.content_type, "application/zip");

    let response = app.get(&format!("/api/pcb/{task_id}/result")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        format!("attachment; filename=\"{task_id}.zip\"").as_str()
    );
    let bytes = body_bytes(response).await;
    assert_eq!(bytes, uploaded.bytes);
    assert!(bytes.starts_with(b"PK"));

    let front = app.get(&format!("/api/pcb/{task_id}/render/front")).await;
    assert_eq!(front.status(), StatusCode::OK);
    assert_eq!(body_bytes(front).await, b"<svg id=\"front\"/>");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_pending_task_removes_it() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;

    let response = app.delete(&format!("/api/pcb/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["task_id"], task_id.as_str());
    assert_eq!(json["status"], "cancelled");

    assert!(app.queue.get(&task_id).is_none());
    assert!(!app.state.tracker.contains(&task_id));
    assert_eq!(
        app.get(&format!("/api/pcb/{task_id}")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn cancel_retrying_task_is_allowed() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;
    app.queue.set_state(&task_id, TaskState::Retry);

    let response = app.delete(&format!("/api/pcb/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cancel_running_task_is_a_conflict_and_leaves_it_running() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;
    app.queue.set_state(&task_id, TaskState::Active);

    let response = app.delete(&format!("/api/pcb/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
    assert_eq!(app.queue.get(&task_id).unwrap().state, TaskState::Active);
}

#[tokio::test]
async fn cancel_finished_task_is_gone() {
    let app = TestApp::new(no_store());
    for state in [TaskState::Completed, TaskState::Archived] {
        let task_id = app.submit(VALID_SUBMISSION).await;
        app.queue.set_state(&task_id, state);

        let response = app.delete(&format!("/api/pcb/{task_id}")).await;
        assert_eq!(response.status(), StatusCode::GONE, "state {state}");
        assert_eq!(body_json(response).await["code"], "GONE");
    }
}

#[tokio::test]
async fn cancel_unknown_task_is_404() {
    let app = TestApp::new(no_store());
    let response = app.delete("/api/pcb/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Abandonment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn abandoned_pending_task_is_swept_then_404() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;

    tokio::time::advance(Duration::from_secs(16 * 60)).await;
    let summary = sweep_once(&*app.queue, "kicad", &app.state.tracker).await;

    assert_eq!(summary.cancelled, 1);
    assert!(!app.state.tracker.contains(&task_id));
    assert!(app.queue.get(&task_id).is_none());
    assert_eq!(
        app.get(&format!("/api/pcb/{task_id}")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test(start_paused = true)]
async fn polled_task_is_not_swept() {
    let app = TestApp::new(no_store());
    let task_id = app.submit(VALID_SUBMISSION).await;

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    app.get(&format!("/api/pcb/{task_id}")).await;
    tokio::time::advance(Duration::from_secs(10 * 60)).await;

    let summary = sweep_once(&*app.queue, "kicad", &app.state.tracker).await;
    assert_eq!(summary.cancelled, 0);
    assert_eq!(app.queue.get(&task_id).unwrap().state, TaskState::Pending);
}
