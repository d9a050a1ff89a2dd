//! Batch front-end: scan an input directory, read a prompt file, submit
//! one task group, and poll its status until it finishes.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use banana_client::{CdnAssetStore, DrawApi};
use banana_core::accounts::credential_hint;
use banana_core::combine::ImageGroup;
use banana_core::prompt::PromptGroup;
use banana_core::request::BatchRequest;
use banana_core::status::GroupStatus;
use banana_engine::BatchEngine;

use config::BatchConfig;

/// Image extensions picked up from the input directory.
const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif"];

/// How often the status poll refreshes.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banana_cli=info,banana_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BatchConfig::from_env()?;
    tracing::info!(
        model = %config.model,
        concurrency = config.concurrency,
        accounts = 1 + config.backup_keys.len(),
        "Loaded batch configuration",
    );
    for key in config.credentials() {
        tracing::debug!(account = %credential_hint(&key), "Using account");
    }

    let images = collect_images(&config.input_dir)?;
    if images.is_empty() {
        anyhow::bail!(
            "no images with supported extensions found in {}",
            config.input_dir.display(),
        );
    }
    tracing::info!(count = images.len(), dir = %config.input_dir.display(), "Found input images");

    let prompts = read_prompts(&config.prompt_file)?;
    if prompts.is_empty() {
        anyhow::bail!("no prompts found in {}", config.prompt_file.display());
    }
    tracing::info!(count = prompts.len(), file = %config.prompt_file.display(), "Found prompts");

    let engine = BatchEngine::new(
        Arc::new(CdnAssetStore::default()),
        Arc::new(DrawApi::new(config.api_base.clone())),
    );

    let request = BatchRequest {
        image_groups: vec![ImageGroup::multiply(images)],
        prompt_groups: vec![PromptGroup::multiply(prompts)],
        credentials: config.credentials(),
        concurrency: config.concurrency,
        model: config.model.clone(),
        aspect_ratio: config.aspect_ratio.clone(),
        max_retries: config.max_retries,
        output_dir: config.output_dir.clone(),
    };

    let receipt = engine.submit(request).await?;
    println!(
        "submitted group {} ({} task(s) planned over {} stage(s))",
        receipt.group_id,
        receipt.estimate.total_tasks,
        receipt.estimate.stages.len(),
    );

    let mut printed_log_events = 0;
    let final_status = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(snapshot) = engine.status(receipt.group_id).await else {
            anyhow::bail!("task group disappeared from the registry");
        };

        for event in snapshot.log.iter().skip(printed_log_events) {
            println!("  [{}] {}", event.at.format("%H:%M:%S"), event.message);
        }
        printed_log_events = snapshot.log.len();

        println!(
            "{} | upload {} | api {}",
            snapshot.status_line, snapshot.upload, snapshot.api,
        );

        if snapshot.status.is_terminal() {
            break snapshot.status;
        }
    };

    let outputs = engine.outputs().await;
    println!(
        "{} output image(s) in {}",
        outputs.len(),
        config.output_dir.display(),
    );

    match final_status {
        GroupStatus::Completed => Ok(()),
        GroupStatus::Cancelled => anyhow::bail!("batch was cancelled"),
        _ => anyhow::bail!("batch failed; see log above"),
    }
}

/// Collect supported image files from a directory, sorted by path.
fn collect_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("cannot read input directory {}: {e}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Read non-empty prompt lines from a text file.
fn read_prompts(file: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("cannot read prompt file {}: {e}", file.display()))?;
    Ok(text
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
