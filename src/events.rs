use std::fmt;

use crate::config::BufferConfig;

/// Folder selected by the remote control row.
///
/// Two descriptors are the same folder when all three parts match; the
/// sequencer relies on this to ignore redundant notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveFolder {
    pub source: String,
    pub year: String,
    pub month: String,
}

impl ActiveFolder {
    pub fn new(
        source: impl Into<String>,
        year: impl Into<String>,
        month: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            year: year.into(),
            month: month.into(),
        }
    }

    /// Folder path as understood by the listing endpoint, e.g. `Pictures/family/2024/06`.
    pub fn path(&self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            format!("{}/{}/{}", self.source, self.year, self.month)
        } else {
            format!("{}/{}/{}/{}", root, self.source, self.year, self.month)
        }
    }
}

impl fmt::Display for ActiveFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.year, self.month)
    }
}

/// Identifies one rendered media frame. Playback events carry it back so the
/// sequencer can drop reports about frames that were already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the presentation surface should show right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Placeholder {
        message: String,
    },
    Image {
        id: FrameId,
        position: usize,
        url: String,
        /// Blur radius of the same-image background fill.
        backdrop_blur: u32,
    },
    Video {
        id: FrameId,
        position: usize,
        url: String,
        buffer: BufferConfig,
        /// Player-level repeat; completion still advances the show.
        repeat: bool,
    },
}

impl Frame {
    pub fn id(&self) -> Option<FrameId> {
        match self {
            Self::Placeholder { .. } => None,
            Self::Image { id, .. } | Self::Video { id, .. } => Some(*id),
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Placeholder { .. } => None,
            Self::Image { position, .. } | Self::Video { position, .. } => Some(*position),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Placeholder { .. } => None,
            Self::Image { url, .. } | Self::Video { url, .. } => Some(url),
        }
    }
}

/// Emitted by the surface as the player progresses through a video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started(FrameId),
    Ended(FrameId),
    Failed { frame: FrameId, reason: String },
}

impl PlaybackEvent {
    pub fn frame(&self) -> FrameId {
        match self {
            Self::Started(id) | Self::Ended(id) => *id,
            Self::Failed { frame, .. } => *frame,
        }
    }
}
