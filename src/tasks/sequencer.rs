pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::DeviceTier;
use crate::error::ListFilesError;
use crate::events::{ActiveFolder, PlaybackEvent};
use crate::media::classify_listing;
use crate::remote::{FileLister, ListedFile};
use crate::tasks::control::Subscription;
use crate::tasks::surface::Surface;

pub use state::{Effect, FramePolicy, Input, SlideshowSM, SlideshowState};

/// Everything the driver needs that does not change during a session.
#[derive(Debug, Clone)]
pub struct SequencerOptions {
    pub image_dwell: Duration,
    pub folder_root: String,
    pub tier: DeviceTier,
    pub frames: FramePolicy,
}

/// Periodic image timer. Disarmed means no ticks at all.
struct SlideTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl SlideTimer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// (Re)start the period from now; the first tick lands one period later.
    fn arm(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn cancel(&mut self) {
        self.interval = None;
    }

    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

type ListingResult = (ActiveFolder, Result<Vec<ListedFile>, ListFilesError>);

/// Resources held while the show runs. Dropping the session releases all of
/// them: the timer stops, any in-flight listing is aborted, and the config
/// subscription is cancelled.
struct Session {
    timer: SlideTimer,
    fetch: Option<JoinHandle<ListingResult>>,
    subscription: Subscription,
    subscription_open: bool,
}

impl Session {
    fn abort_fetch(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }
}

async fn fetched(fetch: &mut Option<JoinHandle<ListingResult>>) -> Result<ListingResult, JoinError> {
    match fetch.as_mut() {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.timer.cancel();
        self.abort_fetch();
        debug!("slideshow session released");
    }
}

/// Runs the slideshow until `cancel` fires.
///
/// Single task; every state change goes through [`SlideshowSM::handle`]:
/// - folder notifications from `subscription` reset the show and refetch;
/// - listing results are classified for `options.tier` and fed back in;
/// - the image timer advances images and is cancelled for videos;
/// - playback events from `surface` advance videos.
pub async fn run<L, S>(
    subscription: Subscription,
    mut playback_rx: Receiver<PlaybackEvent>,
    lister: Arc<L>,
    mut surface: S,
    options: SequencerOptions,
    cancel: CancellationToken,
) -> Result<()>
where
    L: FileLister,
    S: Surface,
{
    let mut sm = SlideshowSM::new(options.frames.clone());
    let mut session = Session {
        timer: SlideTimer::new(options.image_dwell),
        fetch: None,
        subscription,
        subscription_open: true,
    };

    if let Err(err) = surface.render(&sm.placeholder()) {
        warn!("failed to show placeholder: {err}");
    }

    loop {
        let input = tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; stopping slideshow");
                break;
            }

            maybe_folder = session.subscription.recv(), if session.subscription_open => {
                match maybe_folder {
                    Some(folder) => Input::FolderChanged(folder),
                    None => {
                        warn!("control subscription closed; keeping current folder");
                        session.subscription_open = false;
                        continue;
                    }
                }
            }

            joined = fetched(&mut session.fetch), if session.fetch.is_some() => {
                session.fetch = None;
                match joined {
                    Ok((folder, Ok(files))) => {
                        let items = classify_listing(files, options.tier);
                        info!(%folder, items = items.len(), "media list ready");
                        Input::MediaListed { folder, items }
                    }
                    Ok((folder, Err(err))) => {
                        warn!(%folder, "failed to list files: {err}");
                        Input::ListingFailed { folder }
                    }
                    Err(err) => {
                        warn!("listing task ended abnormally: {err}");
                        continue;
                    }
                }
            }

            _ = session.timer.tick() => Input::TimerFired,

            Some(event) = playback_rx.recv() => Input::Playback(event),
        };

        let before = sm.current();
        for effect in sm.handle(input) {
            match effect {
                Effect::CancelTimer => session.timer.cancel(),
                Effect::ArmTimer => session.timer.arm(),
                Effect::FetchListing(folder) => {
                    session.abort_fetch();
                    let lister = Arc::clone(&lister);
                    let path = folder.path(&options.folder_root);
                    debug!(%folder, %path, "requesting listing");
                    session.fetch = Some(tokio::spawn(async move {
                        let res = lister.list_files(&path).await;
                        (folder, res)
                    }));
                }
                Effect::Render(frame) => {
                    if let Err(err) = surface.render(&frame) {
                        warn!(id = ?frame.id(), "failed to render frame: {err}");
                    }
                }
            }
        }
        let after = sm.current();
        if before != after {
            debug!(from = ?before, to = ?after, "slideshow transition");
        }
    }

    surface.teardown();
    drop(session);
    Ok(())
}
