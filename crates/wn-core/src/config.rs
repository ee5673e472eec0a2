//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, store, worker pool, normalization parameters
//! and external tools. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
    pub normalize: NormalizeConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, failing if it cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.workers.count == 0 {
            warnings.push("workers.count is 0; one worker will be started".into());
        }
        if self.workers.queue_capacity == 0 {
            warnings.push("workers.queue_capacity is 0; a capacity of 1 will be used".into());
        }
        if self.workers.job_timeout_secs == 0 {
            warnings.push("workers.job_timeout_secs is 0; every transcode will time out".into());
        }
        if self.workers.job_timeout_secs > MAX_JOB_TIMEOUT_SECS {
            warnings.push(format!(
                "workers.job_timeout_secs is {}; capped at {MAX_JOB_TIMEOUT_SECS}",
                self.workers.job_timeout_secs
            ));
        }

        if self.normalize.max_upload_bytes == 0 {
            warnings.push("normalize.max_upload_bytes is 0; every upload will be rejected".into());
        }
        let common_rates = [8_000, 16_000, 22_050, 24_000, 44_100, 48_000];
        if !common_rates.contains(&self.normalize.sample_rate) {
            warnings.push(format!(
                "normalize.sample_rate {} is unusual (common: {:?})",
                self.normalize.sample_rate, common_rates
            ));
        }
        for ext in &self.normalize.allowed_extensions {
            if !ext.starts_with('.') {
                warnings.push(format!(
                    "normalize.allowed_extensions entry {ext:?} should start with '.'"
                ));
            }
        }

        if let Some(ref p) = self.tools.ffmpeg_path {
            if !p.exists() {
                warnings.push(format!(
                    "tools.ffmpeg_path {} does not exist; PATH will be searched",
                    p.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Content store locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding finalized entries and claim markers.
    pub dir: PathBuf,
    /// Directory for per-attempt scratch inputs. `None` = OS temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Remove claim markers left behind by a crash when the server starts.
    pub recover_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("storage/normalized"),
            scratch_dir: None,
            recover_on_start: true,
        }
    }
}

impl StorageConfig {
    /// The scratch directory, resolved against the OS temp dir.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Job queue and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_capacity: usize,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_job_timeout() -> u64 {
    10
}

/// Upper bound applied to `job_timeout_secs` (one day).
pub const MAX_JOB_TIMEOUT_SECS: u64 = 86_400;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_capacity: 32,
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Worker count, never below one.
    pub fn effective_count(&self) -> usize {
        self.count.max(1)
    }

    /// Queue capacity, never below one.
    pub fn effective_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Per-job deadline, capped at [`MAX_JOB_TIMEOUT_SECS`].
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.min(MAX_JOB_TIMEOUT_SECS))
    }
}

/// Output format and upload acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub sample_rate: u32,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    /// When another request holds the claim for the same content, wait for
    /// its outcome instead of answering "skipped" straight away.
    pub wait_for_inflight: bool,
    /// Poll interval used when the claim is held outside this process.
    pub claim_poll_ms: u64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            max_upload_bytes: 10 << 20,
            allowed_extensions: vec![".mp3".into(), ".wav".into()],
            wait_for_inflight: true,
            claim_poll_ms: 100,
        }
    }
}

impl NormalizeConfig {
    /// Whether `extension` (with leading dot) is accepted, case-insensitively.
    pub fn allows(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_millis(self.claim_poll_ms.max(1))
    }
}

/// External tool path overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
