use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::retry::RetryConfig;

pub const ENV_API_URL: &str = "API_URL";
pub const ENV_BEARER_TOKEN: &str = "BEARER_TOKEN";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_KEY";

/// Connection to the table holding the active folder row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RemoteControlOptions {
    /// Project base URL, e.g. `https://xyz.supabase.co`. Overridden by `SUPABASE_URL`.
    pub url: String,
    /// Anonymous API key. Overridden by `SUPABASE_KEY`.
    pub key: String,
    pub table: String,
    /// How often the control row is re-read to detect folder changes.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RemoteControlOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            table: "slideshow_control".into(),
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ListingOptions {
    /// Base URL of the listing API. Overridden by `API_URL`.
    pub api_url: String,
    /// Overridden by `BEARER_TOKEN`.
    pub bearer_token: String,
    /// Prefix prepended to `source/year/month` when composing folder paths.
    pub folder_root: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            bearer_token: String::new(),
            folder_root: "Pictures".into(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SlideshowOptions {
    /// Time each image stays on screen before the next item.
    #[serde(with = "humantime_serde")]
    pub image_dwell: Duration,
    pub placeholder_text: String,
    /// Blur radius of the background fill behind images.
    pub backdrop_blur: u32,
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            image_dwell: Duration::from_millis(5_000),
            placeholder_text: "Loading...".into(),
            backdrop_blur: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DeviceOptions {
    /// Skip probing and use this model name.
    pub model: Option<String>,
    /// Models that receive the `.low.mp4` video variants.
    pub low_end_models: Vec<String>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            model: None,
            low_end_models: vec!["SM-J600FN".into()],
        }
    }
}

/// Player buffering thresholds. Operational tuning sized for 4K high-bitrate
/// sources; low-bitrate variants fit comfortably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct BufferConfig {
    pub min_buffer_ms: u64,
    pub max_buffer_ms: u64,
    pub buffer_for_playback_ms: u64,
    pub buffer_for_playback_after_rebuffer_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: 3_000,
            max_buffer_ms: 8_000,
            buffer_for_playback_ms: 1_500,
            buffer_for_playback_after_rebuffer_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceKind {
    #[default]
    Mpv,
    Headless,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PlayerOptions {
    pub surface: SurfaceKind,
    /// Program used by the mpv surface.
    pub mpv_binary: PathBuf,
    /// Extra arguments for the mpv process.
    pub mpv_args: Vec<String>,
    /// JSON IPC socket for the player; defaults to one in the temp dir.
    pub ipc_socket: Option<PathBuf>,
    pub buffer: BufferConfig,
    /// Loop videos in the player; every wrap counts as a completion.
    pub repeat: bool,
    /// How long the headless surface pretends a video plays.
    #[serde(with = "humantime_serde")]
    pub headless_video_duration: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            surface: SurfaceKind::default(),
            mpv_binary: PathBuf::from("mpv"),
            mpv_args: Vec::new(),
            ipc_socket: None,
            buffer: BufferConfig::default(),
            repeat: true,
            headless_video_duration: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub remote_control: RemoteControlOptions,
    pub listing: ListingOptions,
    pub slideshow: SlideshowOptions,
    pub device: DeviceOptions,
    pub player: PlayerOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Load the YAML file when given, otherwise start from defaults, then
    /// apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        Ok(cfg.with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// Credentials and endpoints from the environment take precedence over the file.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_API_URL) {
            self.listing.api_url = v;
        }
        if let Some(v) = non_empty(ENV_BEARER_TOKEN) {
            self.listing.bearer_token = v;
        }
        if let Some(v) = non_empty(ENV_SUPABASE_URL) {
            self.remote_control.url = v;
        }
        if let Some(v) = non_empty(ENV_SUPABASE_KEY) {
            self.remote_control.key = v;
        }
        self
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.listing.api_url.trim().is_empty(),
            "listing.api-url (or {ENV_API_URL}) must be set"
        );
        ensure!(
            !self.listing.bearer_token.is_empty(),
            "listing.bearer-token (or {ENV_BEARER_TOKEN}) must be set"
        );
        ensure!(
            !self.remote_control.url.trim().is_empty(),
            "remote-control.url (or {ENV_SUPABASE_URL}) must be set"
        );
        ensure!(
            !self.remote_control.key.is_empty(),
            "remote-control.key (or {ENV_SUPABASE_KEY}) must be set"
        );
        ensure!(
            !self.remote_control.table.trim().is_empty(),
            "remote-control.table must not be empty"
        );
        ensure!(
            !self.remote_control.poll_interval.is_zero(),
            "remote-control.poll-interval must be greater than zero"
        );
        ensure!(
            !self.slideshow.image_dwell.is_zero(),
            "slideshow.image-dwell must be greater than zero"
        );
        let buffer = &self.player.buffer;
        ensure!(
            buffer.min_buffer_ms <= buffer.max_buffer_ms,
            "player.buffer.min-buffer-ms must not exceed max-buffer-ms"
        );
        ensure!(
            self.listing.retry.base_delay <= self.listing.retry.max_delay,
            "listing.retry.base-delay must not exceed max-delay"
        );
        if self.player.surface == SurfaceKind::Headless {
            ensure!(
                !self.player.headless_video_duration.is_zero(),
                "player.headless-video-duration must be greater than zero"
            );
        }
        Ok(self)
    }
}
