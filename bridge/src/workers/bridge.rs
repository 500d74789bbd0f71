//! Bridge worker: the single loop that polls, dispatches commands and refreshes

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bridge::{CommandDispatcher, Followup, StatusPoller};
use crate::mqtt::client::MqttMessage;

/// Bridge worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between scheduled polls; `None` disables the timer
    pub poll_interval: Option<Duration>,

    /// Delay before the first scheduled poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_secs(600)),
            initial_delay: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn from_secs(poll_interval_secs: u64) -> Self {
        Self {
            poll_interval: (poll_interval_secs > 0).then(|| Duration::from_secs(poll_interval_secs)),
            ..Default::default()
        }
    }
}

/// Run the bridge worker.
///
/// Poll cycles, inbound commands and post-command refreshes are handled one
/// at a time. Returns on shutdown or once the inbound channel closes.
pub async fn run<S, F>(
    options: &Options,
    poller: Arc<StatusPoller>,
    dispatcher: Arc<CommandDispatcher>,
    mut inbound_rx: mpsc::Receiver<MqttMessage>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Bridge worker starting...");

    let mut next_poll = options
        .poll_interval
        .map(|_| Instant::now() + options.initial_delay);
    let mut refresh_at: Option<Instant> = None;

    loop {
        let deadline = [next_poll, refresh_at].into_iter().flatten().min();
        let wait = deadline.map(|at| at.saturating_duration_since(Instant::now()));

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Bridge worker shutting down...");
                return;
            }
            message = inbound_rx.recv() => {
                let Some(message) = message else {
                    info!("Command channel closed, bridge worker stopping");
                    return;
                };
                debug!("Handling message on {}", message.topic);
                // A publish can stall on a full request queue; shutdown must still win
                let followup = tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Bridge worker shutting down mid-command...");
                        return;
                    }
                    followup = dispatcher.handle(&message.payload) => followup,
                };
                if let Followup::RefreshAfter(delay) = followup {
                    debug!("Status refresh scheduled in {:?}", delay);
                    refresh_at = Some(Instant::now() + delay);
                }
            }
            _ = sleep_fn(wait.unwrap_or_default()), if wait.is_some() => {
                let now = Instant::now();
                let refresh_due = refresh_at.is_some_and(|at| at <= now);
                let poll_due = next_poll.is_some_and(|at| at <= now);

                if refresh_due {
                    info!("Refreshing status after vehicle command");
                    refresh_at = None;
                }
                if refresh_due || poll_due {
                    tokio::select! {
                        _ = &mut shutdown_signal => {
                            info!("Bridge worker shutting down mid-poll...");
                            return;
                        }
                        _ = poller.poll() => {}
                    }
                }
                if poll_due {
                    next_poll = options.poll_interval.map(|interval| Instant::now() + interval);
                }
            }
        }
    }
}
