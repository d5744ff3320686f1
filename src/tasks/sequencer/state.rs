use tracing::{debug, warn};

use crate::config::{BufferConfig, PlayerOptions, SlideshowOptions};
use crate::events::{ActiveFolder, Frame, FrameId, PlaybackEvent};
use crate::media::MediaItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowState {
    /// No folder resolved yet.
    Idle,
    /// Waiting for (or stuck without) a non-empty listing of the current folder.
    Loading,
    ShowingImage(usize),
    ShowingVideo(usize),
}

impl SlideshowState {
    pub fn position(self) -> Option<usize> {
        match self {
            Self::ShowingImage(pos) | Self::ShowingVideo(pos) => Some(pos),
            Self::Idle | Self::Loading => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    FolderChanged(ActiveFolder),
    MediaListed {
        folder: ActiveFolder,
        items: Vec<MediaItem>,
    },
    ListingFailed {
        folder: ActiveFolder,
    },
    TimerFired,
    Playback(PlaybackEvent),
}

/// Side effects the driver must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CancelTimer,
    ArmTimer,
    FetchListing(ActiveFolder),
    Render(Frame),
}

/// Presentation settings stamped onto every frame.
#[derive(Debug, Clone)]
pub struct FramePolicy {
    pub placeholder_text: String,
    pub backdrop_blur: u32,
    pub buffer: BufferConfig,
    pub repeat: bool,
}

impl FramePolicy {
    pub fn new(slideshow: &SlideshowOptions, player: &PlayerOptions) -> Self {
        Self {
            placeholder_text: slideshow.placeholder_text.clone(),
            backdrop_blur: slideshow.backdrop_blur,
            buffer: player.buffer,
            repeat: player.repeat,
        }
    }
}

impl Default for FramePolicy {
    fn default() -> Self {
        Self::new(&SlideshowOptions::default(), &PlayerOptions::default())
    }
}

/// Next index on a circular list of `len` items.
pub fn next_position(position: usize, len: usize) -> usize {
    if len == 0 { 0 } else { (position + 1) % len }
}

/// Slideshow sequencing state machine.
///
/// Images advance on the periodic timer; videos advance on playback
/// completion. The timer is cancelled whenever a video becomes current, so a
/// video is never cut short by a stale tick.
pub struct SlideshowSM {
    state: SlideshowState,
    folder: Option<ActiveFolder>,
    media: Vec<MediaItem>,
    timer_armed: bool,
    current_frame: Option<FrameId>,
    next_frame: u64,
    policy: FramePolicy,
}

impl SlideshowSM {
    pub fn new(policy: FramePolicy) -> Self {
        Self {
            state: SlideshowState::Idle,
            folder: None,
            media: Vec::new(),
            timer_armed: false,
            current_frame: None,
            next_frame: 1,
            policy,
        }
    }

    pub fn current(&self) -> SlideshowState {
        self.state
    }

    pub fn folder(&self) -> Option<&ActiveFolder> {
        self.folder.as_ref()
    }

    pub fn media(&self) -> &[MediaItem] {
        &self.media
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn current_item(&self) -> Option<&MediaItem> {
        self.state.position().and_then(|pos| self.media.get(pos))
    }

    pub fn placeholder(&self) -> Frame {
        Frame::Placeholder {
            message: self.policy.placeholder_text.clone(),
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::FolderChanged(folder) => self.on_folder(folder),
            Input::MediaListed { folder, items } => self.on_listing(folder, items),
            Input::ListingFailed { folder } => {
                if self.is_pending(&folder) {
                    warn!(%folder, "listing failed; staying on placeholder");
                }
                Vec::new()
            }
            Input::TimerFired => self.on_timer(),
            Input::Playback(event) => self.on_playback(event),
        }
    }

    fn on_folder(&mut self, folder: ActiveFolder) -> Vec<Effect> {
        if self.folder.as_ref() == Some(&folder) {
            debug!(%folder, "folder unchanged; ignoring notification");
            return Vec::new();
        }
        debug!(from = ?self.state, %folder, "folder changed; reloading");
        let mut effects = Vec::new();
        self.disarm(&mut effects);
        self.folder = Some(folder.clone());
        self.media.clear();
        self.current_frame = None;
        self.state = SlideshowState::Loading;
        effects.push(Effect::Render(self.placeholder()));
        effects.push(Effect::FetchListing(folder));
        effects
    }

    fn is_pending(&self, folder: &ActiveFolder) -> bool {
        self.state == SlideshowState::Loading && self.folder.as_ref() == Some(folder)
    }

    fn on_listing(&mut self, folder: ActiveFolder, items: Vec<MediaItem>) -> Vec<Effect> {
        if !self.is_pending(&folder) {
            debug!(%folder, "discarding listing for a folder that is no longer pending");
            return Vec::new();
        }
        if items.is_empty() {
            warn!(%folder, "folder has no media; staying on placeholder");
            return Vec::new();
        }
        self.media = items;
        let mut effects = Vec::new();
        self.enter(0, &mut effects);
        effects
    }

    fn on_timer(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            // A timer only runs during a video after its playback failed.
            SlideshowState::ShowingImage(pos) | SlideshowState::ShowingVideo(pos) => {
                self.advance_from(pos, &mut effects);
            }
            SlideshowState::Idle | SlideshowState::Loading => {
                debug!(state = ?self.state, "timer fired without media");
                self.disarm(&mut effects);
            }
        }
        effects
    }

    fn on_playback(&mut self, event: PlaybackEvent) -> Vec<Effect> {
        let SlideshowState::ShowingVideo(pos) = self.state else {
            debug!(?event, "playback event outside video; ignoring");
            return Vec::new();
        };
        if self.current_frame != Some(event.frame()) {
            debug!(?event, current = ?self.current_frame, "stale playback event");
            return Vec::new();
        }
        let mut effects = Vec::new();
        match event {
            PlaybackEvent::Started(_) => self.disarm(&mut effects),
            PlaybackEvent::Ended(_) => self.advance_from(pos, &mut effects),
            PlaybackEvent::Failed { frame, reason } => {
                warn!(%frame, position = pos, %reason, "video playback failed; skipping after dwell");
                self.arm(&mut effects);
            }
        }
        effects
    }

    fn advance_from(&mut self, pos: usize, effects: &mut Vec<Effect>) {
        let len = self.media.len();
        let next = next_position(pos, len);
        if next == pos && self.media[pos].is_image() {
            // Lone image: keep it on screen and let the timer keep ticking.
            return;
        }
        self.enter(next, effects);
    }

    fn enter(&mut self, pos: usize, effects: &mut Vec<Effect>) {
        let is_video = self.media[pos].is_video();
        let url = self.media[pos].url().to_owned();
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        self.current_frame = Some(id);
        if is_video {
            self.state = SlideshowState::ShowingVideo(pos);
            self.disarm(effects);
            effects.push(Effect::Render(Frame::Video {
                id,
                position: pos,
                url,
                buffer: self.policy.buffer,
                repeat: self.policy.repeat,
            }));
        } else {
            self.state = SlideshowState::ShowingImage(pos);
            effects.push(Effect::Render(Frame::Image {
                id,
                position: pos,
                url,
                backdrop_blur: self.policy.backdrop_blur,
            }));
            self.arm(effects);
        }
    }

    fn arm(&mut self, effects: &mut Vec<Effect>) {
        if !self.timer_armed {
            self.timer_armed = true;
            effects.push(Effect::ArmTimer);
        }
    }

    fn disarm(&mut self, effects: &mut Vec<Effect>) {
        if self.timer_armed {
            self.timer_armed = false;
            effects.push(Effect::CancelTimer);
        }
    }
}
