//! Generation stage executor.
//!
//! Takes one stage's input combinations, composes their final prompts,
//! fans the resulting tasks out over a bounded worker pool with retry, and
//! folds each success into the next stage's inputs. Successful tasks
//! persist their primary output image (plus a JSON metadata sidecar) and
//! append it to the shared gallery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use banana_client::{GenerationError, GenerationRequest, GenerationService};
use banana_core::accounts::assign_credential;
use banana_core::artifact::{ArtifactMetadata, ArtifactSource, OutputArtifact};
use banana_core::naming::{output_filename, task_name};
use banana_core::prompt::{compose_prompt, PromptStage};
use banana_core::request::BatchRequest;

use crate::registry::EngineServices;
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
use crate::upload::ResolvedUpload;

/// A stage input image: still on disk, or already remote.
#[derive(Debug, Clone)]
pub enum ImageRef {
    Local(PathBuf),
    Remote(String),
}

/// One input combination flowing through the stage pipeline, carrying its
/// prompt lineage between stages.
#[derive(Debug, Clone)]
pub struct CombinationState {
    pub images: Vec<ImageRef>,
    /// Prompt carried forward from the previous stage; empty for stage 1.
    pub prompt: String,
    /// Every prompt contribution applied along the chain so far.
    pub history: Vec<String>,
}

impl CombinationState {
    /// Stage-1 input: local images, no prompt lineage yet.
    pub fn initial(paths: Vec<PathBuf>) -> Self {
        Self {
            images: paths.into_iter().map(ImageRef::Local).collect(),
            prompt: String::new(),
            history: Vec::new(),
        }
    }
}

/// Why a stage stopped without producing a normal result.
pub(crate) enum StageFailure {
    /// Cancellation was observed; partial artifacts are already saved.
    Cancelled,
    /// The stage had zero executable tasks. Fatal to the pipeline.
    NoValidInput(String),
    /// An unexpected internal error.
    Internal(String),
}

pub(crate) struct StageParams<'a> {
    pub group_id: Uuid,
    pub request: &'a BatchRequest,
    pub policy: RetryPolicy,
}

/// Everything one dispatched task owns.
struct TaskSpec {
    name: String,
    gen_request: GenerationRequest,
    credential: String,
    sources: Vec<String>,
    history: Vec<String>,
    upload_secs: f64,
}

enum TaskCompletion {
    Succeeded {
        name: String,
        attempts: u32,
        api_secs: f64,
        state: CombinationState,
    },
    Failed {
        name: String,
        attempts: u32,
        error: String,
    },
    Cancelled,
}

/// Execute one stage over its inputs and return the next stage's inputs.
///
/// Input states whose local images never resolved to remote references are
/// dropped (logged, not fatal), as are states whose composed prompt is
/// empty. Returns `Ok` with the successful outputs -- possibly empty when
/// every task failed, which the orchestrator treats as stage-fatal.
pub(crate) async fn execute_stage(
    inputs: &[CombinationState],
    stage: &PromptStage,
    params: &StageParams<'_>,
    resolved: &HashMap<PathBuf, ResolvedUpload>,
    service: Arc<dyn GenerationService>,
    services: &EngineServices,
    cancel: &CancellationToken,
) -> Result<Vec<CombinationState>, StageFailure> {
    let group_id = params.group_id;
    let request = params.request;

    let tasks = build_tasks(inputs, stage, params, resolved, services).await?;
    services
        .registry
        .update(group_id, |record| record.api.add_total(tasks.len()))
        .await;

    let semaphore = Arc::new(Semaphore::new(request.concurrency));
    let mut join_set = JoinSet::new();
    for spec in tasks {
        let semaphore = Arc::clone(&semaphore);
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        let gallery = Arc::clone(&services.gallery);
        let policy = params.policy;
        let output_dir = request.output_dir.clone();
        let stage_index = stage.index;

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return TaskCompletion::Cancelled;
            };
            if cancel.is_cancelled() {
                return TaskCompletion::Cancelled;
            }
            run_task(
                spec,
                policy,
                &cancel,
                service,
                gallery,
                group_id,
                stage_index,
                &output_dir,
            )
            .await
        });
    }

    let mut next_states = Vec::new();
    let mut cancelled = false;
    while let Some(joined) = join_set.join_next().await {
        let completion = match joined {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Generation worker panicked");
                continue;
            }
        };

        match completion {
            TaskCompletion::Succeeded {
                name,
                attempts,
                api_secs,
                state,
            } => {
                services
                    .registry
                    .update(group_id, |record| {
                        record.api.bump();
                        if attempts > 1 {
                            record.append(format!(
                                "{name}: generated ({api_secs:.1}s, attempt {attempts})"
                            ));
                        } else {
                            record.append(format!("{name}: generated ({api_secs:.1}s)"));
                        }
                    })
                    .await;
                next_states.push(state);
            }
            TaskCompletion::Failed {
                name,
                attempts,
                error,
            } => {
                tracing::warn!(
                    group_id = %group_id,
                    task = %name,
                    attempts,
                    error = %error,
                    "Generation task failed",
                );
                services
                    .registry
                    .update(group_id, |record| {
                        record.api.bump();
                        record.append(format!(
                            "{name}: failed after {attempts} attempt(s): {error}"
                        ));
                    })
                    .await;
            }
            TaskCompletion::Cancelled => {
                cancelled = true;
            }
        }

        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
    }

    if cancelled {
        // Let in-flight calls finish detached; nothing new is dispatched.
        join_set.detach_all();
        return Err(StageFailure::Cancelled);
    }

    Ok(next_states)
}

/// Build the flat task list for one stage: one task per surviving
/// (input state x prompt suffix) pair, with per-stage contiguous ordinals
/// for credential round-robin.
async fn build_tasks(
    inputs: &[CombinationState],
    stage: &PromptStage,
    params: &StageParams<'_>,
    resolved: &HashMap<PathBuf, ResolvedUpload>,
    services: &EngineServices,
) -> Result<Vec<TaskSpec>, StageFailure> {
    let group_id = params.group_id;
    let request = params.request;

    let mut tasks = Vec::new();
    let mut ordinal = 0usize;
    for (combo_position, state) in inputs.iter().enumerate() {
        let combo_index = combo_position + 1;

        let mut refs = Vec::with_capacity(state.images.len());
        let mut sources = Vec::with_capacity(state.images.len());
        let mut upload_secs = 0.0;
        let mut unresolved = None;
        for image in &state.images {
            match image {
                ImageRef::Remote(url) => {
                    refs.push(url.clone());
                    sources.push(url.clone());
                }
                ImageRef::Local(path) => match resolved.get(path) {
                    Some(upload) => {
                        refs.push(upload.url.clone());
                        sources.push(path.display().to_string());
                        upload_secs += upload.secs;
                    }
                    None => {
                        unresolved = Some(path.clone());
                        break;
                    }
                },
            }
        }
        if let Some(path) = unresolved {
            services
                .registry
                .append_log(
                    group_id,
                    format!(
                        "combination {combo_index} skipped: {} was not uploaded",
                        crate::upload::display_name(&path),
                    ),
                )
                .await;
            continue;
        }

        let stem = state.images.first().and_then(|image| match image {
            ImageRef::Local(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string()),
            ImageRef::Remote(_) => None,
        });

        for (prompt_position, suffix) in stage.suffixes.iter().enumerate() {
            let prompt_index = prompt_position + 1;
            let Some(final_prompt) = compose_prompt(&state.prompt, suffix, stage.replace_prompt)
            else {
                services
                    .registry
                    .append_log(
                        group_id,
                        format!(
                            "combination {combo_index} prompt {prompt_index} skipped: empty prompt"
                        ),
                    )
                    .await;
                continue;
            };

            ordinal += 1;
            let credential = assign_credential(ordinal, &request.credentials)
                .map_err(|e| StageFailure::Internal(e.to_string()))?
                .to_string();

            let mut history = state.history.clone();
            history.push(suffix.trim().to_string());

            tasks.push(TaskSpec {
                name: task_name(
                    &group_id,
                    stage.index,
                    combo_index,
                    prompt_index,
                    stem.as_deref(),
                ),
                gen_request: GenerationRequest {
                    prompt: final_prompt,
                    model: request.model.clone(),
                    input_refs: refs.clone(),
                    aspect_ratio: request.aspect_ratio.clone(),
                },
                credential,
                sources: sources.clone(),
                history,
                upload_secs,
            });
        }
    }

    if tasks.is_empty() {
        return Err(StageFailure::NoValidInput(format!(
            "stage {} has no executable tasks",
            stage.index
        )));
    }
    Ok(tasks)
}

/// Run one generation task to completion: call the service with retry,
/// download the primary result, persist it, and produce the chained state.
#[allow(clippy::too_many_arguments)]
async fn run_task(
    spec: TaskSpec,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    service: Arc<dyn GenerationService>,
    gallery: Arc<crate::registry::OutputGallery>,
    group_id: Uuid,
    stage_index: usize,
    output_dir: &std::path::Path,
) -> TaskCompletion {
    let outcome = retry_with_backoff(policy, cancel, |_attempt| {
        let service = Arc::clone(&service);
        let gen_request = spec.gen_request.clone();
        let credential = spec.credential.clone();
        async move {
            let started = Instant::now();
            let result = service.generate(&gen_request, &credential).await?;
            let primary = result
                .image_urls
                .first()
                .cloned()
                .ok_or(GenerationError::EmptyResult)?;
            let bytes = service.fetch_artifact(&primary).await?;
            Ok::<_, GenerationError>((primary, bytes, started.elapsed().as_secs_f64()))
        }
    })
    .await;

    let (primary_url, bytes, api_secs, attempts) = match outcome {
        RetryOutcome::Success {
            value: (url, bytes, secs),
            attempts,
        } => (url, bytes, secs, attempts),
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            return TaskCompletion::Failed {
                name: spec.name,
                attempts,
                error: last_error.to_string(),
            }
        }
        RetryOutcome::Cancelled => return TaskCompletion::Cancelled,
    };

    let extension = sniff_extension(&bytes);
    let path = output_dir.join(output_filename(&spec.name, extension));
    if let Err(e) = tokio::fs::write(&path, &bytes).await {
        return TaskCompletion::Failed {
            name: spec.name,
            attempts,
            error: format!("failed to write output file: {e}"),
        };
    }

    let metadata = ArtifactMetadata {
        group_id,
        task_name: spec.name.clone(),
        prompt: spec.gen_request.prompt.clone(),
        model: spec.gen_request.model.clone(),
        aspect_ratio: spec.gen_request.aspect_ratio.clone(),
        stage_index,
        retry_attempts: attempts,
        upload_secs: spec.upload_secs,
        api_secs,
        total_secs: spec.upload_secs + api_secs,
        created_at: chrono::Utc::now(),
        source: if stage_index == 1 {
            ArtifactSource::from_inputs(spec.sources)
        } else {
            ArtifactSource::Staged {
                prompt_history: spec.history.clone(),
            }
        },
    };

    match serde_json::to_vec_pretty(&metadata) {
        Ok(json) => {
            if let Err(e) = tokio::fs::write(path.with_extension("json"), json).await {
                tracing::warn!(task = %spec.name, error = %e, "Failed to write metadata sidecar");
            }
        }
        Err(e) => {
            tracing::warn!(task = %spec.name, error = %e, "Failed to serialize metadata");
        }
    }

    gallery
        .push(OutputArtifact {
            path,
            remote_url: primary_url.clone(),
            metadata,
        })
        .await;

    TaskCompletion::Succeeded {
        name: spec.name,
        attempts,
        api_secs,
        state: CombinationState {
            images: vec![ImageRef::Remote(primary_url)],
            prompt: spec.gen_request.prompt,
            history: spec.history,
        },
    }
}

/// Pick an output file extension from the image header, defaulting to png.
fn sniff_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png")
}
