use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use crate::events::ActiveFolder;
use crate::remote::ControlSource;

/// Live feed of active-folder changes. Dropping it stops the underlying poller.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<ActiveFolder>,
    _guard: Option<DropGuard>,
}

impl Subscription {
    /// Wrap an existing channel; nothing is cancelled on drop.
    pub fn from_receiver(rx: Receiver<ActiveFolder>) -> Self {
        Self { rx, _guard: None }
    }

    pub async fn recv(&mut self) -> Option<ActiveFolder> {
        self.rx.recv().await
    }
}

/// Start polling `source` and return the subscription handle.
///
/// The poller runs under a child of `cancel`, so it stops either when the
/// whole process shuts down or when the returned handle is dropped.
pub fn subscribe<S: ControlSource>(
    source: S,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Subscription {
    let token = cancel.child_token();
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn({
        let token = token.clone();
        async move {
            if let Err(err) = run(source, tx, token, poll_interval).await {
                warn!("control poller stopped: {err:?}");
            }
        }
    });
    Subscription {
        rx,
        _guard: Some(token.drop_guard()),
    }
}

/// Reads the control row immediately and then every `poll_interval`,
/// forwarding a folder only when it differs from the last one forwarded.
///
/// Fetch failures are logged and leave the previous folder in effect.
#[instrument(skip(source, to_sequencer, cancel))]
pub async fn run<S: ControlSource>(
    source: S,
    to_sequencer: Sender<ActiveFolder>,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<ActiveFolder> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cancel received; exiting control poller");
                break;
            }
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            res = source.fetch_active() => res,
        };

        match fetched {
            Ok(folder) if last.as_ref() == Some(&folder) => {
                debug!(%folder, "control row unchanged");
            }
            Ok(folder) => {
                info!(%folder, "active folder changed");
                if to_sequencer.send(folder.clone()).await.is_err() {
                    debug!("subscriber gone; exiting control poller");
                    break;
                }
                last = Some(folder);
            }
            Err(err) => warn!("failed to fetch slideshow control: {err}"),
        }
    }
    Ok(())
}
