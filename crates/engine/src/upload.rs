//! Upload stage: turn local assets into remote references.
//!
//! Each distinct asset is uploaded at most once per process: the shared
//! [`UploadCache`](crate::registry::UploadCache) is consulted first, and
//! hits count as zero-cost synthetic successes tagged `cached` in the
//! group log. Misses run over a semaphore-bounded worker pool with the
//! group's retry policy. Per-asset failures are logged and excluded from
//! the result without aborting sibling uploads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use banana_client::AssetStore;
use banana_core::accounts::assign_credential;
use banana_core::error::CoreError;

use crate::registry::EngineServices;
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy};

/// A successfully resolved asset.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedUpload {
    pub url: String,
    /// Upload wall time; zero for cache hits.
    pub secs: f64,
}

/// Result of one upload pass.
pub(crate) struct UploadOutcome {
    pub resolved: HashMap<PathBuf, ResolvedUpload>,
    /// Set when cancellation was observed mid-pass; `resolved` then holds
    /// whatever completed before the stop.
    pub cancelled: bool,
}

pub(crate) struct UploadParams<'a> {
    pub group_id: Uuid,
    pub credentials: &'a [String],
    pub concurrency: usize,
    pub policy: RetryPolicy,
}

enum UploadTaskResult {
    Uploaded { url: String, secs: f64, attempts: u32 },
    Failed { attempts: u32, error: String },
    Cancelled,
}

/// Upload every asset not already cached, bounded by `concurrency`.
///
/// Assets get 1-based ordinals in iteration order for credential
/// round-robin. Cancellation is checked after each completed upload; once
/// observed, remaining completions are left to finish detached and the
/// partial result is returned with the cancelled flag set.
pub(crate) async fn upload_all(
    assets: &[PathBuf],
    params: &UploadParams<'_>,
    store: Arc<dyn AssetStore>,
    services: &EngineServices,
    cancel: &CancellationToken,
) -> Result<UploadOutcome, CoreError> {
    let group_id = params.group_id;
    services
        .registry
        .update(group_id, |record| record.upload.add_total(assets.len()))
        .await;

    let mut resolved = HashMap::new();
    let mut pending = Vec::new();

    for (index, path) in assets.iter().enumerate() {
        let ordinal = index + 1;
        if let Some(url) = services.upload_cache.get(path).await {
            resolved.insert(path.clone(), ResolvedUpload { url, secs: 0.0 });
            services
                .registry
                .update(group_id, |record| {
                    record.upload.bump();
                    record.append(format!("{} resolved (cached)", display_name(path)));
                })
                .await;
        } else {
            let credential = assign_credential(ordinal, params.credentials)?.to_string();
            pending.push((path.clone(), credential));
        }
    }

    let semaphore = Arc::new(Semaphore::new(params.concurrency));
    let mut join_set = JoinSet::new();
    for (path, credential) in pending {
        let semaphore = Arc::clone(&semaphore);
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        let policy = params.policy;

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (path, UploadTaskResult::Cancelled);
            };
            if cancel.is_cancelled() {
                return (path, UploadTaskResult::Cancelled);
            }

            let started = Instant::now();
            let outcome = retry_with_backoff(policy, &cancel, |_attempt| {
                let store = Arc::clone(&store);
                let path = path.clone();
                let credential = credential.clone();
                async move { store.upload(&path, &credential).await }
            })
            .await;

            let result = match outcome {
                RetryOutcome::Success { value, attempts } => UploadTaskResult::Uploaded {
                    url: value,
                    secs: started.elapsed().as_secs_f64(),
                    attempts,
                },
                RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                } => UploadTaskResult::Failed {
                    attempts,
                    error: last_error.to_string(),
                },
                RetryOutcome::Cancelled => UploadTaskResult::Cancelled,
            };
            (path, result)
        });
    }

    let mut cancelled = false;
    while let Some(joined) = join_set.join_next().await {
        let Ok((path, result)) = joined else {
            tracing::error!(group_id = %group_id, "Upload worker panicked");
            continue;
        };

        match result {
            UploadTaskResult::Uploaded {
                url,
                secs,
                attempts,
            } => {
                services
                    .upload_cache
                    .insert(path.clone(), url.clone())
                    .await;
                services
                    .registry
                    .update(group_id, |record| {
                        record.upload.bump();
                        if attempts > 1 {
                            record.append(format!(
                                "{} uploaded ({secs:.1}s, attempt {attempts})",
                                display_name(&path),
                            ));
                        } else {
                            record.append(format!("{} uploaded ({secs:.1}s)", display_name(&path)));
                        }
                    })
                    .await;
                resolved.insert(path, ResolvedUpload { url, secs });
            }
            UploadTaskResult::Failed { attempts, error } => {
                tracing::warn!(
                    group_id = %group_id,
                    asset = %path.display(),
                    attempts,
                    error = %error,
                    "Asset upload failed",
                );
                services
                    .registry
                    .update(group_id, |record| {
                        record.upload.bump();
                        record.append(format!(
                            "{} upload failed after {attempts} attempt(s): {error}",
                            display_name(&path),
                        ));
                    })
                    .await;
            }
            UploadTaskResult::Cancelled => {
                cancelled = true;
            }
        }

        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
    }

    if cancelled {
        // In-flight uploads are not interrupted; they finish detached and
        // their results are discarded.
        join_set.detach_all();
    }

    Ok(UploadOutcome {
        resolved,
        cancelled,
    })
}

/// Filename portion of an asset path for log lines.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .unwrap_or_else(|| path.display().to_string())
}
