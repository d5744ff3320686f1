use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_signage_frame::device::DeviceTier;
use rust_signage_frame::error::{ConfigFetchError, ListFilesError, PlaybackError};
use rust_signage_frame::events::{ActiveFolder, Frame, FrameId, PlaybackEvent};
use rust_signage_frame::remote::{ControlSource, FileLister, ListedFile};
use rust_signage_frame::tasks::control::{self, Subscription};
use rust_signage_frame::tasks::sequencer::{self, FramePolicy, SequencerOptions};
use rust_signage_frame::tasks::surface::Surface;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct FakeLister {
    listings: Arc<Mutex<HashMap<String, Option<Vec<ListedFile>>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeLister {
    fn with(self, folder: &str, keys: &[&str]) -> Self {
        let files = keys
            .iter()
            .map(|key| ListedFile {
                key: key.to_string(),
                public_url: format!("https://cdn.example/{folder}/{key}"),
            })
            .collect();
        self.listings
            .lock()
            .unwrap()
            .insert(folder.to_string(), Some(files));
        self
    }

    fn failing(self, folder: &str) -> Self {
        self.listings.lock().unwrap().insert(folder.to_string(), None);
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl FileLister for FakeLister {
    async fn list_files(&self, folder: &str) -> Result<Vec<ListedFile>, ListFilesError> {
        self.requests.lock().unwrap().push(folder.to_string());
        let entry = self.listings.lock().unwrap().get(folder).cloned();
        match entry {
            Some(Some(files)) => Ok(files),
            Some(None) => Err(ListFilesError::Status(reqwest::StatusCode::BAD_GATEWAY)),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shown {
    Frame(Frame),
    Teardown,
}

struct RecordingSurface {
    tx: mpsc::UnboundedSender<Shown>,
}

impl Surface for RecordingSurface {
    fn render(&mut self, frame: &Frame) -> Result<(), PlaybackError> {
        let _ = self.tx.send(Shown::Frame(frame.clone()));
        Ok(())
    }

    fn teardown(&mut self) {
        let _ = self.tx.send(Shown::Teardown);
    }
}

struct Harness {
    folders: mpsc::Sender<ActiveFolder>,
    playback: mpsc::Sender<PlaybackEvent>,
    shown: mpsc::UnboundedReceiver<Shown>,
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(lister: FakeLister, tier: DeviceTier) -> Self {
        let (folders, folder_rx) = mpsc::channel(8);
        let (playback, playback_rx) = mpsc::channel(8);
        let (tx, shown) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let options = SequencerOptions {
            image_dwell: Duration::from_secs(5),
            folder_root: "Pictures".into(),
            tier,
            frames: FramePolicy::default(),
        };
        let handle = tokio::spawn(sequencer::run(
            Subscription::from_receiver(folder_rx),
            playback_rx,
            Arc::new(lister),
            RecordingSurface { tx },
            options,
            cancel.clone(),
        ));
        Self {
            folders,
            playback,
            shown,
            cancel,
            handle,
        }
    }

    async fn next(&mut self) -> Frame {
        match tokio::time::timeout(Duration::from_secs(600), self.shown.recv())
            .await
            .expect("timeout waiting for a frame")
            .expect("surface channel closed")
        {
            Shown::Frame(frame) => frame,
            Shown::Teardown => panic!("unexpected teardown"),
        }
    }

    async fn expect_quiet(&mut self, window: Duration) {
        let res = tokio::time::timeout(window, self.shown.recv()).await;
        assert!(res.is_err(), "expected no frame, got {res:?}");
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        self.handle
            .await
            .expect("sequencer task panicked")
            .expect("sequencer returned an error");
        assert_eq!(self.shown.recv().await, Some(Shown::Teardown));
    }
}

fn june() -> ActiveFolder {
    ActiveFolder::new("family", "2024", "06")
}

fn july() -> ActiveFolder {
    ActiveFolder::new("family", "2024", "07")
}

fn placeholder() -> Frame {
    Frame::Placeholder {
        message: "Loading...".into(),
    }
}

fn image_at(frame: &Frame) -> Option<usize> {
    match frame {
        Frame::Image { position, .. } => Some(*position),
        _ => None,
    }
}

fn video_at(frame: &Frame) -> Option<(FrameId, usize)> {
    match frame {
        Frame::Video { id, position, .. } => Some((*id, *position)),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn images_tick_and_video_waits_for_completion() {
    let lister = FakeLister::default().with(
        "Pictures/family/2024/06",
        &["a.jpg", "b.PNG", "c.mp4"],
    );
    let mut h = Harness::start(lister.clone(), DeviceTier::Standard);
    assert_eq!(h.next().await, placeholder());

    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    let first = h.next().await;
    assert_eq!(image_at(&first), Some(0));
    let shown_at = Instant::now();

    let second = h.next().await;
    assert_eq!(image_at(&second), Some(1));
    assert_eq!(shown_at.elapsed(), Duration::from_secs(5));

    let video = h.next().await;
    let (id, position) = video_at(&video).expect("third item is a video");
    assert_eq!(position, 2);
    assert_eq!(
        video.url(),
        Some("https://cdn.example/Pictures/family/2024/06/c.mp4")
    );

    // The timer is cancelled while the video plays.
    h.playback.send(PlaybackEvent::Started(id)).await.unwrap();
    h.expect_quiet(Duration::from_secs(60)).await;

    h.playback.send(PlaybackEvent::Ended(id)).await.unwrap();
    let wrapped = h.next().await;
    assert_eq!(image_at(&wrapped), Some(0));
    let rearmed_at = Instant::now();
    assert_eq!(image_at(&h.next().await), Some(1));
    assert_eq!(rearmed_at.elapsed(), Duration::from_secs(5));

    assert_eq!(lister.requests(), vec!["Pictures/family/2024/06".to_string()]);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn low_end_devices_receive_low_bitrate_videos() {
    let lister = FakeLister::default().with("Pictures/family/2024/06", &["clip.mov"]);
    let mut h = Harness::start(lister, DeviceTier::LowEnd);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    let video = h.next().await;
    assert_eq!(
        video.url(),
        Some("https://cdn.example/Pictures/family/2024/06/clip.low.mp4")
    );
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn identical_notifications_do_not_reset_the_show() {
    let lister = FakeLister::default().with("Pictures/family/2024/06", &["only.jpg"]);
    let mut h = Harness::start(lister.clone(), DeviceTier::Standard);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    assert_eq!(image_at(&h.next().await), Some(0));

    h.folders.send(june()).await.unwrap();
    h.folders.send(june()).await.unwrap();
    // A lone image is not re-rendered on tick, so nothing at all should appear.
    h.expect_quiet(Duration::from_secs(30)).await;
    assert_eq!(lister.requests().len(), 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn folder_change_mid_video_reloads_and_ignores_stale_events() {
    let lister = FakeLister::default()
        .with("Pictures/family/2024/06", &["intro.mp4", "a.jpg"])
        .with("Pictures/family/2024/07", &["b.jpeg", "c.jpg"]);
    let mut h = Harness::start(lister.clone(), DeviceTier::Standard);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    let (old_video, _) = video_at(&h.next().await).expect("june starts with a video");

    h.folders.send(july()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    assert_eq!(image_at(&h.next().await), Some(0));

    // Completion of the replaced video must not advance the new list.
    h.playback.send(PlaybackEvent::Ended(old_video)).await.unwrap();
    let start = Instant::now();
    assert_eq!(image_at(&h.next().await), Some(1));
    assert_eq!(start.elapsed(), Duration::from_secs(5));

    assert_eq!(
        lister.requests(),
        vec![
            "Pictures/family/2024/06".to_string(),
            "Pictures/family/2024/07".to_string()
        ]
    );
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_folder_keeps_placeholder_until_next_change() {
    let lister = FakeLister::default().with("Pictures/family/2024/07", &["a.jpg", "b.jpg"]);
    let mut h = Harness::start(lister, DeviceTier::Standard);
    h.next().await;

    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    h.expect_quiet(Duration::from_secs(60)).await;

    h.folders.send(july()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    assert_eq!(image_at(&h.next().await), Some(0));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn listing_failure_keeps_placeholder() {
    let lister = FakeLister::default().failing("Pictures/family/2024/06");
    let mut h = Harness::start(lister.clone(), DeviceTier::Standard);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    assert_eq!(h.next().await, placeholder());
    h.expect_quiet(Duration::from_secs(60)).await;
    assert_eq!(lister.requests().len(), 1, "no automatic retry");
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_video_is_skipped_after_one_dwell() {
    let lister = FakeLister::default().with("Pictures/family/2024/06", &["bad.mp4", "a.jpg"]);
    let mut h = Harness::start(lister, DeviceTier::Standard);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    h.next().await;
    let (id, _) = video_at(&h.next().await).expect("video first");

    h.playback
        .send(PlaybackEvent::Failed {
            frame: id,
            reason: "exit status 2".into(),
        })
        .await
        .unwrap();
    let start = Instant::now();
    assert_eq!(image_at(&h.next().await), Some(1));
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn closed_subscription_keeps_show_running() {
    let lister = FakeLister::default().with("Pictures/family/2024/06", &["a.jpg", "b.jpg"]);
    let mut h = Harness::start(lister, DeviceTier::Standard);
    h.next().await;
    h.folders.send(june()).await.unwrap();
    h.next().await;
    assert_eq!(image_at(&h.next().await), Some(0));

    let (replacement, _) = mpsc::channel(1);
    drop(std::mem::replace(&mut h.folders, replacement));
    assert_eq!(image_at(&h.next().await), Some(1));
    assert_eq!(image_at(&h.next().await), Some(0));
    h.stop().await;
}

/// Always reports the same folder and counts how often it was asked.
#[derive(Clone, Default)]
struct CountingControl {
    polls: Arc<AtomicUsize>,
}

impl ControlSource for CountingControl {
    async fn fetch_active(&self) -> Result<ActiveFolder, ConfigFetchError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(june())
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A listing request that never completes.
#[derive(Clone, Default)]
struct StalledLister {
    started: Arc<Notify>,
    dropped: Arc<AtomicBool>,
}

impl FileLister for StalledLister {
    async fn list_files(&self, _folder: &str) -> Result<Vec<ListedFile>, ListFilesError> {
        let _flag = SetOnDrop(Arc::clone(&self.dropped));
        self.started.notify_one();
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn stopping_releases_subscription_and_in_flight_listing() {
    let control_source = CountingControl::default();
    let polls = Arc::clone(&control_source.polls);
    let lister = StalledLister::default();
    let listing_started = Arc::clone(&lister.started);
    let listing_dropped = Arc::clone(&lister.dropped);

    // The poller hangs off the process token; the sequencer has its own.
    let process = CancellationToken::new();
    let subscription = control::subscribe(control_source, Duration::from_secs(1), &process);
    let sequencer_cancel = CancellationToken::new();
    let (_playback_tx, playback_rx) = mpsc::channel(8);
    let (tx, mut shown) = mpsc::unbounded_channel();
    let handle = tokio::spawn(sequencer::run(
        subscription,
        playback_rx,
        Arc::new(lister),
        RecordingSurface { tx },
        SequencerOptions {
            image_dwell: Duration::from_secs(5),
            folder_root: "Pictures".into(),
            tier: DeviceTier::Standard,
            frames: FramePolicy::default(),
        },
        sequencer_cancel.clone(),
    ));

    listing_started.notified().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(polls.load(Ordering::SeqCst) >= 3);
    assert!(!listing_dropped.load(Ordering::SeqCst));

    sequencer_cancel.cancel();
    handle
        .await
        .expect("sequencer task panicked")
        .expect("sequencer returned an error");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let polls_at_stop = polls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(polls.load(Ordering::SeqCst), polls_at_stop, "poller kept running");
    assert!(listing_dropped.load(Ordering::SeqCst), "listing was not aborted");
    assert!(!process.is_cancelled());

    let mut frames = Vec::new();
    while let Ok(item) = shown.try_recv() {
        frames.push(item);
    }
    assert_eq!(frames.last(), Some(&Shown::Teardown));
}
