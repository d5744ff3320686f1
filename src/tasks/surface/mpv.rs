//! Long-lived `mpv` player driven over its JSON IPC socket.
//!
//! One full-screen process is started on the first frame and kept for the
//! whole show. Every later frame is a `loadfile` into that window, so slides
//! change without the window being torn down. Playback progress comes back as
//! mpv events (`file-loaded`, `playback-restart`, `end-file`).

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::Surface;
use crate::config::{BufferConfig, PlayerOptions};
use crate::error::PlaybackError;
use crate::events::{Frame, FrameId, PlaybackEvent};

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

pub struct MpvSurface {
    program: PathBuf,
    extra_args: Vec<String>,
    socket: PathBuf,
    events: Sender<PlaybackEvent>,
    player: Option<Player>,
}

/// Handle to the running player. Dropping it stops the driver task, which
/// asks mpv to quit and then kills it.
struct Player {
    frames: UnboundedSender<Frame>,
    _guard: DropGuard,
}

impl MpvSurface {
    pub fn new(options: &PlayerOptions, events: Sender<PlaybackEvent>) -> Self {
        let socket = options.ipc_socket.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("signage-frame-mpv-{}.sock", std::process::id()))
        });
        Self {
            program: options.mpv_binary.clone(),
            extra_args: options.mpv_args.clone(),
            socket,
            events,
            player: None,
        }
    }

    fn launch(&self) -> Result<Player, PlaybackError> {
        // A socket left behind by a crashed player would refuse the bind.
        let _ = std::fs::remove_file(&self.socket);
        let args = player_args(&self.socket, &self.extra_args);
        debug!(?args, "launching mpv");
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PlaybackError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        info!(pid = ?child.id(), socket = %self.socket.display(), "mpv started");

        let (frames, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        tokio::spawn(drive(
            child,
            self.socket.clone(),
            rx,
            self.events.clone(),
            token.clone(),
        ));
        Ok(Player {
            frames,
            _guard: token.drop_guard(),
        })
    }
}

impl Surface for MpvSurface {
    fn render(&mut self, frame: &Frame) -> Result<(), PlaybackError> {
        // The driver closes its receiver when mpv dies; start a fresh player then.
        if self.player.as_ref().is_none_or(|p| p.frames.is_closed()) {
            self.player = Some(self.launch()?);
        }
        if let Some(player) = &self.player {
            if player.frames.send(frame.clone()).is_err() {
                warn!(id = ?frame.id(), "mpv driver gone; frame dropped");
            } else {
                debug!(id = ?frame.id(), position = ?frame.position(), url = ?frame.url(), "frame queued for mpv");
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.player = None;
    }
}

/// Owns the mpv process for its whole life.
async fn drive(
    mut child: Child,
    socket: PathBuf,
    mut frames: UnboundedReceiver<Frame>,
    events: Sender<PlaybackEvent>,
    token: CancellationToken,
) {
    let stream = tokio::select! {
        _ = token.cancelled() => None,
        status = child.wait() => {
            warn!(?status, "mpv exited before opening its IPC socket");
            None
        }
        res = connect(&socket) => match res {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(socket = %socket.display(), "failed to connect to mpv: {err}");
                None
            }
        },
    };

    if let Some(stream) = stream {
        let (read, write) = stream.into_split();
        match ipc_loop(BufReader::new(read), write, &mut frames, &events, &token).await {
            IpcExit::Stopped => debug!("mpv driver stopping"),
            IpcExit::Disconnected => warn!("mpv IPC connection lost; restarting on next frame"),
        }
    }

    drop(frames);
    if let Err(err) = child.start_kill() {
        debug!("mpv already gone: {err}");
    }
    let _ = child.wait().await;
    let _ = std::fs::remove_file(&socket);
}

async fn connect(path: &Path) -> io::Result<UnixStream> {
    let mut attempt = 1;
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(err) if attempt >= CONNECT_ATTEMPTS => return Err(err),
            Err(_) => {
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpcExit {
    /// Cancelled, or the surface went away.
    Stopped,
    /// mpv closed the socket.
    Disconnected,
}

/// Pumps frames into mpv and mpv events back out until either side stops.
async fn ipc_loop<R, W>(
    reader: R,
    mut writer: W,
    frames: &mut UnboundedReceiver<Frame>,
    events: &Sender<PlaybackEvent>,
    token: &CancellationToken,
) -> IpcExit
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut tracker = PlaybackTracker::default();
    let mut request_id = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = send(&mut writer, &mut request_id, json!(["quit"])).await;
                return IpcExit::Stopped;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = send(&mut writer, &mut request_id, json!(["quit"])).await;
                    return IpcExit::Stopped;
                };
                tracker.requested(&frame);
                let mut written = Ok(());
                for command in frame_commands(&frame) {
                    written = send(&mut writer, &mut request_id, command).await;
                    if written.is_err() {
                        break;
                    }
                }
                if let Err(err) = written {
                    debug!("mpv IPC write failed: {err}");
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(event) = tracker.on_message(&line)
                        && events.send(event).await.is_err()
                    {
                        return IpcExit::Stopped;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!("mpv IPC read failed: {err}");
                    break;
                }
            },
        }
    }

    if let Some(event) = tracker.player_lost() {
        let _ = events.send(event).await;
    }
    IpcExit::Disconnected
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request_id: &mut u64,
    command: Value,
) -> io::Result<()> {
    *request_id += 1;
    let mut line = json!({ "command": command, "request_id": *request_id }).to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// What is (or is about to be) playing in the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Loaded {
    video: Option<FrameId>,
    looping: bool,
}

impl Loaded {
    fn of(frame: &Frame) -> Option<Self> {
        match frame {
            Frame::Placeholder { .. } => None,
            Frame::Image { .. } => Some(Self {
                video: None,
                looping: false,
            }),
            Frame::Video { id, repeat, .. } => Some(Self {
                video: Some(*id),
                looping: *repeat,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    event: Option<String>,
    reason: Option<String>,
    file_error: Option<String>,
    error: Option<String>,
    request_id: Option<u64>,
}

/// Maps raw mpv events onto playback events for the frame being shown.
///
/// `loadfile replace` emits `end-file` (reason `stop`) for the old file
/// before `start-file` for the new one, so the most recent request becomes
/// current on `start-file`.
#[derive(Debug, Default)]
struct PlaybackTracker {
    requested: Option<Loaded>,
    current: Option<Loaded>,
    restarts: u32,
}

impl PlaybackTracker {
    fn requested(&mut self, frame: &Frame) {
        self.requested = Loaded::of(frame);
        if self.requested.is_none() {
            // `stop` leaves nothing playing.
            self.current = None;
        }
    }

    fn on_message(&mut self, line: &str) -> Option<PlaybackEvent> {
        let msg: Message = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%line, "unparsable mpv message: {err}");
                return None;
            }
        };
        let Some(event) = msg.event.as_deref() else {
            if let Some(error) = msg.error.as_deref().filter(|e| *e != "success") {
                warn!(request_id = ?msg.request_id, %error, "mpv rejected a command");
            }
            return None;
        };

        match event {
            "start-file" => {
                self.current = self.requested;
                self.restarts = 0;
                None
            }
            "file-loaded" => self.current_video().map(PlaybackEvent::Started),
            "playback-restart" => {
                self.restarts += 1;
                // The first restart is the initial start; later ones are loop wraps.
                match self.current {
                    Some(Loaded {
                        video: Some(id),
                        looping: true,
                    }) if self.restarts > 1 => Some(PlaybackEvent::Ended(id)),
                    _ => None,
                }
            }
            "end-file" => match msg.reason.as_deref() {
                Some("eof") => {
                    let ended = self.current_video().map(PlaybackEvent::Ended);
                    self.current = None;
                    ended
                }
                Some("error") => {
                    let reason = msg.file_error.unwrap_or_else(|| "unknown error".into());
                    let failed = match self.current_video() {
                        Some(frame) => Some(PlaybackEvent::Failed { frame, reason }),
                        None => {
                            warn!(%reason, "mpv failed to show still image");
                            None
                        }
                    };
                    self.current = None;
                    failed
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// The player died; a video that was playing will never finish.
    fn player_lost(&mut self) -> Option<PlaybackEvent> {
        let frame = self.current.take().or(self.requested.take())?.video?;
        Some(PlaybackEvent::Failed {
            frame,
            reason: "mpv exited".into(),
        })
    }

    fn current_video(&self) -> Option<FrameId> {
        self.current.and_then(|loaded| loaded.video)
    }
}

/// Command line for the long-lived player. It idles in a full-screen window
/// between files and holds off the screensaver.
pub fn player_args(socket: &Path, extra: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "--fs",
        "--idle=yes",
        "--force-window=yes",
        "--no-terminal",
        "--no-osc",
        "--no-input-default-bindings",
        "--stop-screensaver=yes",
        "--background=color",
        "--keep-open=no",
        "--image-display-duration=inf",
        "--osd-level=1",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(format!("--input-ipc-server={}", socket.display()));
    args.extend(extra.iter().cloned());
    args
}

fn set(property: &str, value: impl Into<Value>) -> Value {
    json!(["set_property", property, value.into()])
}

fn secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

fn buffer_commands(buffer: &BufferConfig) -> Vec<Value> {
    vec![
        set("cache", "yes"),
        set("demuxer-readahead-secs", secs(buffer.min_buffer_ms)),
        set("cache-secs", secs(buffer.max_buffer_ms)),
        set("cache-pause-initial", "yes"),
        set(
            "cache-pause-wait",
            secs(buffer.buffer_for_playback_ms.max(buffer.buffer_for_playback_after_rebuffer_ms)),
        ),
    ]
}

/// Fills the letterbox with an enlarged, blurred copy of the image itself.
fn backdrop_filter(radius: u32) -> String {
    if radius == 0 {
        return String::new();
    }
    format!(
        "lavfi=[split[bg][fg];[bg]scale=iw*2:ih*2,boxblur={radius}:1[blur];[blur][fg]overlay=(W-w)/2:(H-h)/2]"
    )
}

/// IPC commands that put `frame` on screen.
fn frame_commands(frame: &Frame) -> Vec<Value> {
    match frame {
        Frame::Placeholder { message } => vec![
            json!(["stop"]),
            set("vf", ""),
            set("osd-msg1", message.as_str()),
        ],
        Frame::Image {
            url, backdrop_blur, ..
        } => vec![
            set("osd-msg1", ""),
            set("loop-file", "no"),
            set("vf", backdrop_filter(*backdrop_blur)),
            json!(["loadfile", url, "replace"]),
        ],
        Frame::Video {
            url,
            buffer,
            repeat,
            ..
        } => {
            let mut commands = vec![set("osd-msg1", ""), set("vf", "")];
            commands.extend(buffer_commands(buffer));
            commands.push(set("loop-file", if *repeat { "inf" } else { "no" }));
            commands.push(json!(["loadfile", url, "replace"]));
            commands
        }
    }
}
