use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub polling: PollingConfig,
    pub capture: CaptureSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the analysis backend
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between session status polls, in milliseconds
    pub interval_ms: u64,

    /// Consecutive poll failures tolerated before giving up
    pub failure_budget: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Directory where recording artifacts are written before upload
    pub output_dir: String,

    /// Hard ceiling on recording length, enforced by the controller
    pub max_duration_secs: u64,

    /// Sample rate for captured audio
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Maximum delivery attempts before the task fails
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per attempt
    pub backoff_base_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            failure_budget: 5,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: "recordings".to_string(),
            max_duration_secs: 1800, // 30 minute hard cap
            sample_rate: 16000,
            channels: 1,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CaptureSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl UploadSettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}
