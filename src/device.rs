use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::config::DeviceOptions;

/// Firmware files that name the board or machine model, most specific first.
const MODEL_SOURCES: &[&str] = &[
    "/sys/firmware/devicetree/base/model",
    "/proc/device-tree/model",
    "/sys/devices/virtual/dmi/id/product_name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceTier {
    #[default]
    Standard,
    /// Hardware that cannot decode the full-bitrate videos; served `.low.mp4` variants.
    LowEnd,
}

impl DeviceTier {
    pub fn is_low_end(self) -> bool {
        matches!(self, Self::LowEnd)
    }

    /// Classify `model` against the configured allow-list (exact match).
    pub fn for_model(model: Option<&str>, low_end_models: &[String]) -> Self {
        match model {
            Some(model) if low_end_models.iter().any(|m| m == model) => Self::LowEnd,
            _ => Self::Standard,
        }
    }
}

/// Resolve the tier for this machine. A configured model wins over probing.
pub fn detect(options: &DeviceOptions) -> DeviceTier {
    let model = match options.model.as_deref() {
        Some(model) => Some(model.to_owned()),
        None => probe_model(MODEL_SOURCES.iter().map(Path::new)),
    };
    let tier = DeviceTier::for_model(model.as_deref(), &options.low_end_models);
    info!(model = model.as_deref().unwrap_or("unknown"), ?tier, "device tier resolved");
    tier
}

fn probe_model<'a>(sources: impl IntoIterator<Item = &'a Path>) -> Option<String> {
    for path in sources {
        match fs::read_to_string(path) {
            Ok(raw) => {
                // devicetree strings are NUL-terminated
                let model = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                if !model.is_empty() {
                    debug!(path = %path.display(), model, "device model probed");
                    return Some(model.to_owned());
                }
            }
            Err(err) => debug!(path = %path.display(), "model source unavailable: {err}"),
        }
    }
    None
}
