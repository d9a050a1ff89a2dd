//! Per-group orchestration: the background task spawned at submission.
//!
//! Drives one task group through `Uploading -> Generating(1..n) ->
//! Completed | Failed | Cancelled`, checking the cancellation token at
//! every safe suspension point and publishing progress through the
//! registry after each individual completion. Nothing here propagates to
//! the submitting caller; outcomes are observed only via status polling.

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use banana_client::{AssetStore, GenerationService};
use banana_core::request::{BatchPlan, BatchRequest};
use banana_core::status::GroupStatus;

use crate::registry::EngineServices;
use crate::retry::RetryPolicy;
use crate::stage::{execute_stage, CombinationState, StageFailure, StageParams};
use crate::upload::{upload_all, UploadParams};

/// Run one task group to completion.
///
/// The cancellation token is removed from the registry on every outcome,
/// including panics, so the flag map never leaks entries.
pub(crate) async fn run_group(
    group_id: Uuid,
    request: BatchRequest,
    plan: BatchPlan,
    store: Arc<dyn AssetStore>,
    service: Arc<dyn GenerationService>,
    services: EngineServices,
    cancel: CancellationToken,
) {
    let run = drive(
        group_id, &request, &plan, store, service, &services, &cancel,
    );
    if std::panic::AssertUnwindSafe(run).catch_unwind().await.is_err() {
        tracing::error!(group_id = %group_id, "Task group execution panicked");
        finish_failed(&services, group_id, "internal panic during execution".to_string()).await;
    }
    services.cancellations.remove(group_id).await;
}

async fn drive(
    group_id: Uuid,
    request: &BatchRequest,
    plan: &BatchPlan,
    store: Arc<dyn AssetStore>,
    service: Arc<dyn GenerationService>,
    services: &EngineServices,
    cancel: &CancellationToken,
) {
    // A cancel request may land before this task is first polled.
    if cancel.is_cancelled() {
        finish_cancelled(services, group_id, "cancelled before start").await;
        return;
    }

    let policy = RetryPolicy::new(request.max_retries);
    let stage_count = plan.stages.len();

    services
        .registry
        .update(group_id, |record| {
            record.status = GroupStatus::Uploading;
            record.status_line = "Uploading input images".to_string();
            record.append(format!(
                "starting: {} combination(s), {} stage(s), {} task(s) planned",
                plan.combinations.len(),
                stage_count,
                plan.estimate.total_tasks,
            ));
        })
        .await;

    // Distinct assets in first-seen order; each is uploaded at most once.
    let mut seen = HashSet::new();
    let mut distinct_assets = Vec::new();
    for combination in &plan.combinations {
        for path in combination {
            if seen.insert(path.clone()) {
                distinct_assets.push(path.clone());
            }
        }
    }

    let upload_params = UploadParams {
        group_id,
        credentials: &request.credentials,
        concurrency: request.concurrency,
        policy,
    };
    let uploads = match upload_all(
        &distinct_assets,
        &upload_params,
        store,
        services,
        cancel,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            finish_failed(services, group_id, format!("upload stage error: {e}")).await;
            return;
        }
    };
    if uploads.cancelled {
        finish_cancelled(services, group_id, "cancelled during upload").await;
        return;
    }
    if uploads.resolved.is_empty() {
        finish_failed(services, group_id, "all image uploads failed".to_string()).await;
        return;
    }
    services
        .registry
        .append_log(
            group_id,
            format!(
                "uploads resolved: {}/{}",
                uploads.resolved.len(),
                distinct_assets.len(),
            ),
        )
        .await;

    let mut states: Vec<CombinationState> = plan
        .combinations
        .iter()
        .map(|combination| CombinationState::initial(combination.clone()))
        .collect();
    let mut produced = 0usize;

    for stage in &plan.stages {
        if cancel.is_cancelled() {
            finish_cancelled(services, group_id, format!("cancelled before stage {}", stage.index))
                .await;
            return;
        }

        services
            .registry
            .update(group_id, |record| {
                record.status = GroupStatus::Generating { stage: stage.index };
                record.status_line = format!("Generating stage {}/{stage_count}", stage.index);
                record.append(format!(
                    "stage {}: {} input(s) x {} prompt(s)",
                    stage.index,
                    states.len(),
                    stage.suffixes.len(),
                ));
            })
            .await;

        let stage_params = StageParams {
            group_id,
            request,
            policy,
        };
        match execute_stage(
            &states,
            stage,
            &stage_params,
            &uploads.resolved,
            Arc::clone(&service),
            services,
            cancel,
        )
        .await
        {
            Ok(outputs) => {
                if outputs.is_empty() {
                    finish_failed(
                        services,
                        group_id,
                        format!("stage {}: all tasks failed", stage.index),
                    )
                    .await;
                    return;
                }
                produced += outputs.len();
                services
                    .registry
                    .append_log(
                        group_id,
                        format!("stage {} complete: {} output(s)", stage.index, outputs.len()),
                    )
                    .await;
                states = outputs;
            }
            Err(StageFailure::Cancelled) => {
                finish_cancelled(
                    services,
                    group_id,
                    format!("cancelled during stage {}", stage.index),
                )
                .await;
                return;
            }
            Err(StageFailure::NoValidInput(message)) => {
                finish_failed(services, group_id, message).await;
                return;
            }
            Err(StageFailure::Internal(message)) => {
                finish_failed(services, group_id, message).await;
                return;
            }
        }
    }

    let total_planned = plan.estimate.total_tasks;
    services
        .registry
        .update(group_id, |record| {
            record.status = GroupStatus::Completed;
            record.status_line =
                format!("Completed: {produced}/{total_planned} task(s) succeeded");
            record.append(format!(
                "completed: {produced}/{total_planned} task(s) succeeded"
            ));
        })
        .await;
    tracing::info!(group_id = %group_id, produced, total_planned, "Task group completed");
}

async fn finish_cancelled(services: &EngineServices, group_id: Uuid, context: impl Into<String>) {
    let context = context.into();
    tracing::info!(group_id = %group_id, context = %context, "Task group cancelled");
    services
        .registry
        .update(group_id, |record| {
            record.status = GroupStatus::Cancelled;
            record.status_line = "Cancelled".to_string();
            record.append(format!("{context} - stopping, partial results kept"));
        })
        .await;
}

async fn finish_failed(services: &EngineServices, group_id: Uuid, message: String) {
    tracing::error!(group_id = %group_id, error = %message, "Task group failed");
    services
        .registry
        .update(group_id, |record| {
            record.status = GroupStatus::Failed;
            record.status_line = format!("Failed: {message}");
            record.append(format!("failed: {message}"));
        })
        .await;
}
