//! Integration tests for the batch engine, driven through the public
//! surface with scripted mock collaborators.
//!
//! Every case builds a fresh engine over fresh services, submits through
//! [`BatchEngine::submit`], and observes outcomes the way real callers do:
//! by polling status snapshots.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use banana_client::{
    AssetStore, GenerationError, GenerationRequest, GenerationResult, GenerationService,
    UploadError,
};
use banana_core::artifact::ArtifactSource;
use banana_core::combine::ImageGroup;
use banana_core::error::CoreError;
use banana_core::prompt::PromptGroup;
use banana_core::request::BatchRequest;
use banana_core::status::GroupStatus;
use banana_engine::{BatchEngine, GroupSnapshot};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Minimal PNG header so saved artifacts sniff as `.png`.
const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
];

/// Counting asset store; configured paths fail permanently.
#[derive(Default)]
struct MockStore {
    calls: AtomicUsize,
    failing: Mutex<HashSet<PathBuf>>,
}

impl MockStore {
    fn fail_path(&self, path: impl Into<PathBuf>) {
        self.failing.lock().unwrap().insert(path.into());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for MockStore {
    async fn upload(&self, path: &Path, _credential: &str) -> Result<String, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(path) {
            return Err(UploadError::Api {
                status: 500,
                body: "upload rejected".to_string(),
            });
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("asset");
        Ok(format!("https://cdn.test/{name}"))
    }
}

/// Counting generation service with per-prompt failure scripts and an
/// optional gate that every call must pass.
#[derive(Default)]
struct MockService {
    generate_calls: AtomicUsize,
    /// prompt -> number of failures to serve before succeeding.
    flaky: Mutex<HashMap<String, u32>>,
    /// Prompts that fail on every attempt.
    broken: Mutex<HashSet<String>>,
    /// When set, every generate call consumes one permit first.
    gate: Option<Arc<tokio::sync::Semaphore>>,
}

impl MockService {
    fn flaky_prompt(&self, prompt: impl Into<String>, failures: u32) {
        self.flaky.lock().unwrap().insert(prompt.into(), failures);
    }

    fn broken_prompt(&self, prompt: impl Into<String>) {
        self.broken.lock().unwrap().insert(prompt.into());
    }

    fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for MockService {
    async fn generate(
        &self,
        request: &GenerationRequest,
        _credential: &str,
    ) -> Result<GenerationResult, GenerationError> {
        // Count before the gate so tests can observe an in-flight call.
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        if self.broken.lock().unwrap().contains(&request.prompt) {
            return Err(GenerationError::Api {
                status: 500,
                body: "server exploded".to_string(),
            });
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&request.prompt) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GenerationError::EmptyResult);
                }
            }
        }

        Ok(GenerationResult {
            image_urls: vec![format!("https://cdn.test/out/{call}.png")],
        })
    }

    async fn fetch_artifact(&self, _url: &str) -> Result<Vec<u8>, GenerationError> {
        Ok(PNG_BYTES.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine_with(store: Arc<MockStore>, service: Arc<MockService>) -> BatchEngine {
    BatchEngine::new(store, service)
}

fn request(output_dir: &Path, images: &[&str], prompts: &[&str]) -> BatchRequest {
    BatchRequest {
        image_groups: vec![ImageGroup::multiply(
            images.iter().map(PathBuf::from).collect(),
        )],
        prompt_groups: vec![PromptGroup::multiply(
            prompts.iter().map(|p| p.to_string()).collect(),
        )],
        credentials: vec![
            "sk-test-account-one-0000".to_string(),
            "sk-test-account-two-0000".to_string(),
        ],
        concurrency: 10,
        model: "nano-banana-fast".to_string(),
        aspect_ratio: "auto".to_string(),
        max_retries: 3,
        output_dir: output_dir.to_path_buf(),
    }
}

/// Poll status until the group reaches a terminal state.
async fn wait_terminal(engine: &BatchEngine, group_id: Uuid) -> GroupSnapshot {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Some(snapshot) = engine.status(group_id).await {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("group never reached a terminal state")
}

/// Poll until the service has seen at least `n` generate calls.
async fn wait_generate_calls(service: &MockService, n: usize) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while service.generate_calls() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("service never reached the expected call count");
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

/// 2 images x 3 prompts plans 6 tasks and, with every call succeeding,
/// produces exactly 6 artifacts with live progress counters to match.
#[tokio::test]
async fn two_images_by_three_prompts_completes_with_six_artifacts() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let receipt = engine
        .submit(request(
            dir.path(),
            &["a.png", "b.png"],
            &["standing", "sitting", "walking"],
        ))
        .await
        .unwrap();
    assert_eq!(receipt.estimate.total_tasks, 6);
    assert_eq!(receipt.estimate.stages.len(), 1);

    let snapshot = wait_terminal(&engine, receipt.group_id).await;
    assert_eq!(snapshot.status, GroupStatus::Completed);
    assert_eq!(snapshot.upload.to_string(), "2/2");
    assert_eq!(snapshot.api.to_string(), "6/6");

    assert_eq!(store.calls(), 2);
    assert_eq!(service.generate_calls(), 6);

    let outputs = engine.outputs().await;
    assert_eq!(outputs.len(), 6);
    for artifact in &outputs {
        assert!(artifact.path.exists(), "missing {}", artifact.path.display());
        assert!(artifact.path.with_extension("json").exists());
        assert_eq!(artifact.metadata.stage_index, 1);
        assert_eq!(artifact.metadata.retry_attempts, 1);
        assert_matches::assert_matches!(
            &artifact.metadata.source,
            ArtifactSource::SingleImage { .. }
        );
    }

    // The finished run must have cleared its cancellation flag entry.
    assert!(engine.services().cancellations.is_empty().await);
}

// ---------------------------------------------------------------------------
// Upload cache
// ---------------------------------------------------------------------------

/// Re-submitting the same asset never calls the asset store a second
/// time; the second group resolves it from the shared cache.
#[tokio::test]
async fn upload_cache_prevents_repeat_uploads() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let first = engine
        .submit(request(dir.path(), &["same.png"], &["one prompt"]))
        .await
        .unwrap();
    wait_terminal(&engine, first.group_id).await;
    assert_eq!(store.calls(), 1);

    let second = engine
        .submit(request(dir.path(), &["same.png"], &["another prompt"]))
        .await
        .unwrap();
    let snapshot = wait_terminal(&engine, second.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Completed);
    assert_eq!(store.calls(), 1, "cache hit must not re-upload");
    assert!(snapshot
        .log
        .iter()
        .any(|event| event.message.contains("(cached)")));

    assert_eq!(engine.clear_upload_cache().await, 1);
    let third = engine
        .submit(request(dir.path(), &["same.png"], &["third prompt"]))
        .await
        .unwrap();
    wait_terminal(&engine, third.group_id).await;
    assert_eq!(store.calls(), 2, "cleared cache uploads again");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A cancel that lands before the background task first runs yields a
/// `Cancelled` group with zero collaborator calls.
#[tokio::test]
async fn pre_start_cancellation_makes_no_calls() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let receipt = engine
        .submit(request(dir.path(), &["a.png"], &["prompt"]))
        .await
        .unwrap();
    assert!(engine.cancel(receipt.group_id).await);

    let snapshot = wait_terminal(&engine, receipt.group_id).await;
    assert_eq!(snapshot.status, GroupStatus::Cancelled);
    assert_eq!(store.calls(), 0);
    assert_eq!(service.generate_calls(), 0);
    assert!(engine.outputs().await.is_empty());
}

/// Cancelling mid-stage lets the in-flight call finish, keeps its
/// artifact, and dispatches nothing further.
#[tokio::test]
async fn cancellation_stops_dispatch_after_inflight_call() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService {
        gate: Some(Arc::clone(&gate)),
        ..MockService::default()
    });
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png"], &["p1", "p2", "p3"]);
    req.concurrency = 1;
    let receipt = engine.submit(req).await.unwrap();

    // Wait until the first call is in flight (blocked at the gate),
    // cancel, then let everything already dispatched finish.
    wait_generate_calls(&service, 1).await;
    let cancelled = engine.cancel_all().await;
    assert_eq!(cancelled, vec![receipt.group_id]);
    gate.add_permits(3);

    let snapshot = wait_terminal(&engine, receipt.group_id).await;
    assert_eq!(snapshot.status, GroupStatus::Cancelled);
    assert_eq!(service.generate_calls(), 1, "no new work after cancel");
    assert_eq!(engine.outputs().await.len(), 1, "in-flight result kept");
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// A task failing twice then succeeding with max_retries = 3 completes,
/// and its artifact records the successful attempt number.
#[tokio::test(start_paused = true)]
async fn task_failures_are_retried_until_success() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    service.flaky_prompt("flaky prompt", 2);
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let receipt = engine
        .submit(request(dir.path(), &["a.png"], &["flaky prompt"]))
        .await
        .unwrap();
    let snapshot = wait_terminal(&engine, receipt.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Completed);
    assert_eq!(service.generate_calls(), 3);

    let outputs = engine.outputs().await;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].metadata.retry_attempts, 3);
}

/// A task failing every attempt exhausts max_retries, and a stage with no
/// surviving task fails the whole group.
#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_group() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    service.broken_prompt("doomed prompt");
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png"], &["doomed prompt"]);
    req.max_retries = 2;
    let receipt = engine.submit(req).await.unwrap();
    let snapshot = wait_terminal(&engine, receipt.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Failed);
    assert!(snapshot.status_line.contains("all tasks failed"));
    assert_eq!(service.generate_calls(), 2);
    assert!(engine.outputs().await.is_empty());
}

/// One permanently failing task is excluded while its siblings complete
/// the stage normally.
#[tokio::test(start_paused = true)]
async fn failed_task_is_excluded_without_failing_siblings() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    service.broken_prompt("doomed prompt");
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png"], &["doomed prompt", "fine prompt"]);
    req.max_retries = 2;
    let receipt = engine.submit(req).await.unwrap();
    let snapshot = wait_terminal(&engine, receipt.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Completed);
    assert_eq!(snapshot.api.to_string(), "2/2");
    let outputs = engine.outputs().await;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].metadata.prompt, "fine prompt");
}

// ---------------------------------------------------------------------------
// Staged pipelines
// ---------------------------------------------------------------------------

/// Stage 1 (2 combinations x 2 prompts) feeds an inheriting Multiply
/// stage: 4 inputs, 4 tasks, and replace-mode prompts equal to the stage-2
/// literal instead of a concatenation.
#[tokio::test]
async fn staged_pipeline_chains_and_replaces_prompts() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png", "b.png"], &[]);
    req.prompt_groups = vec![
        PromptGroup::multiply(vec!["warm light".to_string(), "cold light".to_string()]),
        PromptGroup::multiply(vec!["final polish".to_string()]).inheriting(),
    ];
    let receipt = engine.submit(req).await.unwrap();

    assert_eq!(receipt.estimate.stages.len(), 2);
    assert_eq!(receipt.estimate.stages[1].input_count, 4);
    assert_eq!(receipt.estimate.stages[1].task_count, 4);
    assert_eq!(receipt.estimate.total_tasks, 8);

    let snapshot = wait_terminal(&engine, receipt.group_id).await;
    assert_eq!(snapshot.status, GroupStatus::Completed);

    // Planned task count matches the calls actually attempted.
    assert_eq!(service.generate_calls(), 8);
    // Stage-2 inputs are prior outputs; only the two originals upload.
    assert_eq!(store.calls(), 2);

    let outputs = engine.outputs().await;
    assert_eq!(outputs.len(), 8);
    let staged: Vec<_> = outputs
        .iter()
        .filter(|a| a.metadata.stage_index == 2)
        .collect();
    assert_eq!(staged.len(), 4);
    for artifact in staged {
        assert_eq!(artifact.metadata.prompt, "final polish");
        match &artifact.metadata.source {
            ArtifactSource::Staged { prompt_history } => {
                assert_eq!(prompt_history.len(), 2);
                assert_eq!(prompt_history[1], "final polish");
            }
            other => panic!("expected staged provenance, got {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload failures
// ---------------------------------------------------------------------------

/// A permanently failing upload drops only the combinations that need it.
#[tokio::test(start_paused = true)]
async fn failed_upload_drops_only_its_combinations() {
    let store = Arc::new(MockStore::default());
    store.fail_path("bad.png");
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let receipt = engine
        .submit(request(dir.path(), &["good.png", "bad.png"], &["prompt"]))
        .await
        .unwrap();
    let snapshot = wait_terminal(&engine, receipt.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Completed);
    assert_eq!(service.generate_calls(), 1);
    assert_eq!(engine.outputs().await.len(), 1);
    assert!(snapshot
        .log
        .iter()
        .any(|event| event.message.contains("upload failed")));
    assert!(snapshot
        .log
        .iter()
        .any(|event| event.message.contains("skipped")));
}

/// When every upload fails the group fails before any generation call.
#[tokio::test(start_paused = true)]
async fn all_uploads_failing_fails_the_group() {
    let store = Arc::new(MockStore::default());
    store.fail_path("a.png");
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let receipt = engine
        .submit(request(dir.path(), &["a.png"], &["prompt"]))
        .await
        .unwrap();
    let snapshot = wait_terminal(&engine, receipt.group_id).await;

    assert_eq!(snapshot.status, GroupStatus::Failed);
    assert!(snapshot.status_line.contains("all image uploads failed"));
    assert_eq!(service.generate_calls(), 0);
}

// ---------------------------------------------------------------------------
// Synchronous validation
// ---------------------------------------------------------------------------

/// An empty credential list is rejected before any background work or
/// registry entry exists.
#[tokio::test]
async fn empty_credentials_rejected_synchronously() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png"], &["prompt"]);
    req.credentials.clear();
    let err = engine.submit(req).await.unwrap_err();

    assert_matches::assert_matches!(err, CoreError::Configuration(_));
    assert!(engine.status_all().await.is_empty());
    assert_eq!(store.calls(), 0);
    assert_eq!(service.generate_calls(), 0);
}

/// A first prompt group with the inherit flag is rejected synchronously.
#[tokio::test]
async fn first_group_inheritance_rejected_synchronously() {
    let store = Arc::new(MockStore::default());
    let service = Arc::new(MockService::default());
    let engine = engine_with(Arc::clone(&store), Arc::clone(&service));
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(dir.path(), &["a.png"], &[]);
    req.prompt_groups = vec![PromptGroup::multiply(vec!["pose".to_string()]).inheriting()];
    let err = engine.submit(req).await.unwrap_err();

    assert_matches::assert_matches!(err, CoreError::Validation(_));
    assert!(engine.status_all().await.is_empty());
}
