//! Caller-facing engine surface.
//!
//! One [`BatchEngine`] is constructed per process and shared by reference.
//! Submission validates and plans synchronously, registers the group, and
//! spawns its background run; everything after that is observed through
//! non-blocking status snapshots.

use std::sync::Arc;

use uuid::Uuid;

use banana_client::{AssetStore, GenerationService};
use banana_core::artifact::OutputArtifact;
use banana_core::error::CoreError;
use banana_core::estimation::BatchEstimate;
use banana_core::naming::short_group_id;
use banana_core::request::BatchRequest;

use crate::orchestrator::run_group;
use crate::registry::{EngineServices, GroupSnapshot};

/// Returned by [`BatchEngine::submit`]: the group handle plus the
/// synchronously computed task-count estimate.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub group_id: Uuid,
    pub estimate: BatchEstimate,
}

/// Owns the shared services and collaborator handles, and spawns one
/// background run per submitted task group. Cheap to share behind an
/// `Arc`; independent groups run fully concurrently.
pub struct BatchEngine {
    store: Arc<dyn AssetStore>,
    service: Arc<dyn GenerationService>,
    services: EngineServices,
}

impl BatchEngine {
    /// Engine with fresh service state.
    pub fn new(store: Arc<dyn AssetStore>, service: Arc<dyn GenerationService>) -> Self {
        Self::with_services(store, service, EngineServices::default())
    }

    /// Engine over externally constructed services (tests inject fresh
    /// instances per case).
    pub fn with_services(
        store: Arc<dyn AssetStore>,
        service: Arc<dyn GenerationService>,
        services: EngineServices,
    ) -> Self {
        Self {
            store,
            service,
            services,
        }
    }

    /// The shared service objects backing this engine.
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Validate, plan, and start one batch in the background.
    ///
    /// Returns immediately after spawning with the group id and task
    /// estimate. Validation failures are returned synchronously and spawn
    /// nothing. Background outcomes never surface here -- poll
    /// [`status`](Self::status).
    pub async fn submit(&self, request: BatchRequest) -> Result<SubmitReceipt, CoreError> {
        let plan = request.plan()?;
        let estimate = plan.estimate.clone();

        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| {
                CoreError::Configuration(format!(
                    "cannot create output directory {}: {e}",
                    request.output_dir.display(),
                ))
            })?;

        let group_id = Uuid::new_v4();
        self.services.registry.create(group_id).await;
        let cancel = self.services.cancellations.register(group_id).await;

        tracing::info!(
            group_id = %group_id,
            combinations = plan.combinations.len(),
            stages = plan.stages.len(),
            planned_tasks = estimate.total_tasks,
            "Task group {} submitted",
            short_group_id(&group_id),
        );

        tokio::spawn(run_group(
            group_id,
            request,
            plan,
            Arc::clone(&self.store),
            Arc::clone(&self.service),
            self.services.clone(),
            cancel,
        ));

        Ok(SubmitReceipt { group_id, estimate })
    }

    /// Non-blocking snapshot of one group.
    pub async fn status(&self, group_id: Uuid) -> Option<GroupSnapshot> {
        self.services.registry.snapshot(group_id).await
    }

    /// Non-blocking snapshots of every group, most recent first.
    pub async fn status_all(&self) -> Vec<GroupSnapshot> {
        self.services.registry.snapshot_all().await
    }

    /// Every artifact produced so far, across all groups.
    pub async fn outputs(&self) -> Vec<OutputArtifact> {
        self.services.gallery.snapshot().await
    }

    /// Request cooperative cancellation of one group.
    ///
    /// In-flight calls finish; no new work is dispatched after the next
    /// poll point. Returns false when the group is unknown or already
    /// finished.
    pub async fn cancel(&self, group_id: Uuid) -> bool {
        let requested = self.services.cancellations.cancel(group_id).await;
        if requested {
            self.services
                .registry
                .append_log(group_id, "cancellation requested")
                .await;
        }
        requested
    }

    /// Request cancellation of every running group; returns the affected
    /// ids.
    pub async fn cancel_all(&self) -> Vec<Uuid> {
        let ids = self.services.cancellations.cancel_all().await;
        for id in &ids {
            self.services
                .registry
                .append_log(*id, "cancellation requested (cancel all)")
                .await;
        }
        ids
    }

    /// Drop every cached upload reference; returns how many were held.
    pub async fn clear_upload_cache(&self) -> usize {
        self.services.upload_cache.clear().await
    }

    /// Drop every artifact record; returns how many were held. Saved
    /// files stay on disk.
    pub async fn clear_outputs(&self) -> usize {
        self.services.gallery.clear().await
    }
}
