use std::path::PathBuf;

use banana_client::draw::DEFAULT_API_BASE;

/// Batch run configuration loaded from environment variables.
///
/// All fields except the API key have defaults suitable for a local
/// `input/` + `batch_outputs/` directory layout.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Primary API credential (required).
    pub api_key: String,
    /// Additional credentials for round-robin assignment.
    pub backup_keys: Vec<String>,
    /// Directory scanned for input images.
    pub input_dir: PathBuf,
    /// File read for prompt lines (one prompt per line).
    pub prompt_file: PathBuf,
    /// Directory generated images are written into.
    pub output_dir: PathBuf,
    pub model: String,
    pub aspect_ratio: String,
    /// Worker pool size (1-20).
    pub concurrency: usize,
    /// Maximum attempts per call.
    pub max_retries: u32,
    /// Generation API base URL.
    pub api_base: String,
}

impl BatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default                  |
    /// |-----------------------|--------------------------|
    /// | `GRSAI_API_KEY`       | (required)               |
    /// | `GRSAI_BACKUP_KEYS`   | (empty, comma-separated) |
    /// | `GRSAI_API_BASE`      | `https://api.grsai.com`  |
    /// | `BANANA_INPUT_DIR`    | `input/image`            |
    /// | `BANANA_PROMPT_FILE`  | `input/text/text.txt`    |
    /// | `BANANA_OUTPUT_DIR`   | `batch_outputs`          |
    /// | `BANANA_MODEL`        | `nano-banana-fast`       |
    /// | `BANANA_ASPECT_RATIO` | `auto`                   |
    /// | `BANANA_CONCURRENCY`  | `10`                     |
    /// | `BANANA_MAX_RETRIES`  | `3`                      |
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GRSAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GRSAI_API_KEY must be set (e.g. in .env)"))?;

        let backup_keys: Vec<String> = std::env::var("GRSAI_BACKUP_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let concurrency: usize = std::env::var("BANANA_CONCURRENCY")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .map_err(|_| anyhow::anyhow!("BANANA_CONCURRENCY must be a positive integer"))?;

        let max_retries: u32 = std::env::var("BANANA_MAX_RETRIES")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .map_err(|_| anyhow::anyhow!("BANANA_MAX_RETRIES must be a positive integer"))?;

        Ok(Self {
            api_key,
            backup_keys,
            input_dir: std::env::var("BANANA_INPUT_DIR")
                .unwrap_or_else(|_| "input/image".into())
                .into(),
            prompt_file: std::env::var("BANANA_PROMPT_FILE")
                .unwrap_or_else(|_| "input/text/text.txt".into())
                .into(),
            output_dir: std::env::var("BANANA_OUTPUT_DIR")
                .unwrap_or_else(|_| "batch_outputs".into())
                .into(),
            model: std::env::var("BANANA_MODEL").unwrap_or_else(|_| "nano-banana-fast".into()),
            aspect_ratio: std::env::var("BANANA_ASPECT_RATIO").unwrap_or_else(|_| "auto".into()),
            concurrency,
            max_retries,
            api_base: std::env::var("GRSAI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.into()),
        })
    }

    /// All credentials in assignment order: primary first, then backups.
    pub fn credentials(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(1 + self.backup_keys.len());
        keys.push(self.api_key.clone());
        keys.extend(self.backup_keys.iter().cloned());
        keys
    }
}
