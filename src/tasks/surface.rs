#[cfg(unix)]
pub mod mpv;

use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};
#[cfg(not(unix))]
use tracing::warn;

use crate::config::{PlayerOptions, SurfaceKind};
use crate::error::PlaybackError;
use crate::events::{Frame, PlaybackEvent};

#[cfg(unix)]
pub use mpv::MpvSurface;

/// Something that puts frames on screen.
///
/// Implementations report video progress for the most recent frame through
/// the `PlaybackEvent` channel they were built with. Rendering a new frame
/// replaces the previous one, including any playback still running.
pub trait Surface: Send {
    fn render(&mut self, frame: &Frame) -> Result<(), PlaybackError>;

    /// Release whatever the current frame holds (player processes, timers).
    fn teardown(&mut self) {}
}

/// Build the surface selected in the configuration.
pub fn from_options(options: &PlayerOptions, events: Sender<PlaybackEvent>) -> Box<dyn Surface> {
    match options.surface {
        #[cfg(unix)]
        SurfaceKind::Mpv => Box::new(MpvSurface::new(options, events)),
        #[cfg(not(unix))]
        SurfaceKind::Mpv => {
            warn!("mpv IPC needs a unix socket; falling back to the headless surface");
            Box::new(HeadlessSurface::new(events, options.headless_video_duration))
        }
        SurfaceKind::Headless => {
            Box::new(HeadlessSurface::new(events, options.headless_video_duration))
        }
    }
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn render(&mut self, frame: &Frame) -> Result<(), PlaybackError> {
        (**self).render(frame)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

/// Logs frames instead of drawing them and pretends each video plays for a
/// fixed duration. Useful on machines without a display. Repeating videos
/// report `Ended` once per simulated loop until replaced.
pub struct HeadlessSurface {
    events: Sender<PlaybackEvent>,
    video_duration: Duration,
    current: Option<DropGuard>,
}

impl HeadlessSurface {
    pub fn new(events: Sender<PlaybackEvent>, video_duration: Duration) -> Self {
        Self {
            events,
            video_duration,
            current: None,
        }
    }
}

impl Surface for HeadlessSurface {
    fn render(&mut self, frame: &Frame) -> Result<(), PlaybackError> {
        self.current = None;
        match frame {
            Frame::Placeholder { message } => info!(%message, "showing placeholder"),
            Frame::Image {
                id,
                position,
                url,
                backdrop_blur,
            } => info!(%id, position, %url, backdrop_blur, "showing image"),
            Frame::Video {
                id,
                position,
                url,
                repeat,
                ..
            } => {
                info!(%id, position, %url, repeat, "playing video");
                let (id, repeat) = (*id, *repeat);
                let token = CancellationToken::new();
                let events = self.events.clone();
                let duration = self.video_duration;
                tokio::spawn({
                    let token = token.clone();
                    async move {
                        if events.send(PlaybackEvent::Started(id)).await.is_err() {
                            return;
                        }
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => {
                                    debug!(%id, "simulated playback replaced");
                                    return;
                                }
                                _ = tokio::time::sleep(duration) => {
                                    if events.send(PlaybackEvent::Ended(id)).await.is_err() || !repeat {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                });
                self.current = Some(token.drop_guard());
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.current = None;
    }
}
