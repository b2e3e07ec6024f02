//! Live color events: captured frames run through the color finder.
//!
//! Each interval gets one analysis task. It consumes the frame feed for that
//! interval, runs the color finder once per frame and broadcasts the events
//! to every subscriber of the interval. The task starts with the first
//! subscriber and stops when the last one goes away, which in turn releases
//! the frame feed.

use crate::capture::ScreenCapture;
use crate::color_finder::ColorFinder;
use crate::config::{Config, ConfigError};
use crate::frame_source::{self, FrameSource, FrameSubscription};
use crate::types::{ColorEvent, FrameError, SubscribeError};
use futures::{FutureExt, Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

/// Fewest frames kept in flight; one stalled frame can always be overtaken
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;

struct EventFeed {
    sender: broadcast::Sender<ColorEvent>,
    subscribers: usize,
    task: JoinHandle<()>,
}

struct Shared {
    frames: FrameSource,
    finder: ColorFinder,
    frames_in_flight: usize,
    capacity: usize,
    feeds: Mutex<HashMap<u64, EventFeed>>,
}

impl Shared {
    fn feeds(&self) -> MutexGuard<'_, HashMap<u64, EventFeed>> {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Entry point for transports. Cheap to clone.
#[derive(Clone)]
pub struct ColorStream {
    shared: Arc<Shared>,
}

impl ColorStream {
    pub fn new(frames: FrameSource, finder: ColorFinder, frames_in_flight: usize) -> Self {
        Self::with_capacity(frames, finder, frames_in_flight, frame_source::DEFAULT_CAPACITY)
    }

    /// `frames_in_flight` is raised to [`MIN_FRAMES_IN_FLIGHT`]. `capacity`
    /// is how many events a subscriber may fall behind before it skips some.
    pub fn with_capacity(
        frames: FrameSource,
        finder: ColorFinder,
        frames_in_flight: usize,
        capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                frames,
                finder,
                frames_in_flight: frames_in_flight.max(MIN_FRAMES_IN_FLIGHT),
                capacity: capacity.max(1),
                feeds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build the full pipeline from a validated `config`
    pub fn from_config(capture: Arc<dyn ScreenCapture>, config: &Config) -> Result<Self, ConfigError> {
        let finder = ColorFinder::from_config(config)?;
        let capacity = config.pipeline.broadcast_capacity;
        Ok(Self::with_capacity(
            FrameSource::with_capacity(capture, capacity),
            finder,
            config.pipeline.frames_in_flight,
            capacity,
        ))
    }

    pub fn frame_source(&self) -> &FrameSource {
        &self.shared.frames
    }

    pub fn finder(&self) -> &ColorFinder {
        &self.shared.finder
    }

    /// Number of running analysis tasks
    pub fn active_feeds(&self) -> usize {
        self.shared.feeds().len()
    }

    /// Event subscribers at `interval_ms` (0 if none)
    pub fn subscriber_count(&self, interval_ms: u64) -> usize {
        self.shared
            .feeds()
            .get(&interval_ms)
            .map_or(0, |feed| feed.subscribers)
    }

    /// Color events for frames captured every `interval_ms` milliseconds.
    ///
    /// Events arrive in capture order and are shared by every subscriber of
    /// the same interval. Frames where every algorithm failed produce no
    /// event. A frame whose analysis is still running when a later frame has
    /// finished and the window is full is skipped. Dropping the subscription
    /// stops further work once no other subscriber is left.
    pub fn subscribe(&self, interval_ms: u64) -> Result<ColorSubscription, SubscribeError> {
        let mut feeds = self.shared.feeds();
        let receiver = match feeds.get_mut(&interval_ms) {
            Some(feed) => {
                feed.subscribers += 1;
                debug!(
                    "Joined {}ms color feed ({} subscribers)",
                    interval_ms, feed.subscribers
                );
                feed.sender.subscribe()
            }
            None => {
                let frames = self.shared.frames.subscribe(interval_ms)?;
                let (sender, receiver) = broadcast::channel(self.shared.capacity);
                let task = tokio::spawn(run_analysis(
                    frames,
                    self.shared.finder.clone(),
                    self.shared.frames_in_flight,
                    sender.clone(),
                ));
                feeds.insert(
                    interval_ms,
                    EventFeed {
                        sender,
                        subscribers: 1,
                        task,
                    },
                );
                info!("Started {}ms color feed", interval_ms);
                receiver
            }
        };

        Ok(ColorSubscription {
            events: BroadcastStream::new(receiver),
            lease: EventLease {
                shared: Arc::clone(&self.shared),
                interval_ms,
            },
        })
    }

    /// Same as [`subscribe`](Self::subscribe) with the interval given as text
    pub fn subscribe_str(&self, interval: &str) -> Result<ColorSubscription, SubscribeError> {
        let interval_ms = parse_interval(interval)?;
        self.subscribe(interval_ms)
    }
}

/// Parse a positive interval in milliseconds
pub fn parse_interval(interval: &str) -> Result<u64, SubscribeError> {
    match interval.trim().parse::<u64>() {
        Ok(ms) => frame_source::check_interval(ms),
        Err(e) => Err(SubscribeError::InvalidInterval(format!("{:?}: {}", interval, e))),
    }
}

struct EventLease {
    shared: Arc<Shared>,
    interval_ms: u64,
}

impl Drop for EventLease {
    fn drop(&mut self) {
        let mut feeds = self.shared.feeds();
        let Some(feed) = feeds.get_mut(&self.interval_ms) else {
            return;
        };

        feed.subscribers = feed.subscribers.saturating_sub(1);
        if feed.subscribers == 0 {
            if let Some(feed) = feeds.remove(&self.interval_ms) {
                feed.task.abort();
                info!("Stopped {}ms color feed", self.interval_ms);
            }
        } else {
            debug!(
                "Left {}ms color feed ({} subscribers)",
                self.interval_ms, feed.subscribers
            );
        }
    }
}

/// Color events for one interval. Dropping it unsubscribes.
pub struct ColorSubscription {
    events: BroadcastStream<ColorEvent>,
    lease: EventLease,
}

impl ColorSubscription {
    pub fn interval_ms(&self) -> u64 {
        self.lease.interval_ms
    }
}

impl Stream for ColorSubscription {
    type Item = ColorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ColorEvent>> {
        loop {
            match ready!(Pin::new(&mut self.events).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(
                        "Subscriber to {}ms color feed fell behind, skipped {} events",
                        self.lease.interval_ms, skipped
                    );
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

type Analysis = Result<ColorEvent, FrameError>;

struct InFlight {
    tick: u64,
    handle: AbortHandle,
    result: Option<Analysis>,
}

/// Frames being analyzed, oldest first
struct AnalysisWindow {
    capacity: usize,
    frames: VecDeque<InFlight>,
}

impl AnalysisWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    fn push(&mut self, tick: u64, handle: AbortHandle) {
        self.frames.push_back(InFlight {
            tick,
            handle,
            result: None,
        });
    }

    /// Record a finished analysis; frames already skipped are ignored
    fn settle(&mut self, tick: u64, result: Analysis) {
        if let Some(frame) = self.frames.iter_mut().find(|f| f.tick == tick) {
            frame.result = Some(result);
        }
    }

    /// Results that can be released in capture order.
    ///
    /// When the window is full and a later frame has finished, the oldest
    /// unfinished frame is aborted and skipped.
    fn take_ready(&mut self) -> Vec<Analysis> {
        let mut ready = Vec::new();
        loop {
            let Some(head) = self.frames.front_mut() else {
                break;
            };
            if let Some(result) = head.result.take() {
                ready.push(result);
                self.frames.pop_front();
            } else if self.is_full() && self.frames.iter().skip(1).any(|f| f.result.is_some()) {
                if let Some(stalled) = self.frames.pop_front() {
                    stalled.handle.abort();
                    warn!("Frame {} analysis stalled, skipping it", stalled.tick);
                }
            } else {
                break;
            }
        }
        ready
    }
}

/// Analysis loop for one interval; runs until aborted or the frames end
async fn run_analysis(
    mut frames: FrameSubscription,
    finder: ColorFinder,
    frames_in_flight: usize,
    sender: broadcast::Sender<ColorEvent>,
) {
    let interval_ms = frames.interval_ms();
    let mut running: JoinSet<(u64, Analysis)> = JoinSet::new();
    let mut window = AnalysisWindow::new(frames_in_flight);

    loop {
        tokio::select! {
            frame = frames.next(), if !window.is_full() => {
                let Some(frame) = frame else { break };
                let tick = frame.tick;
                let finder = finder.clone();
                let handle = running.spawn(async move {
                    let result = AssertUnwindSafe(finder.analyze(&frame))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(FrameError::AnalysisPanicked { tick }));
                    (tick, result)
                });
                window.push(tick, handle);
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                match joined {
                    Ok((tick, result)) => window.settle(tick, result),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!("Analysis task failed: {}", e),
                }
            }
            else => break,
        }

        for result in window.take_ready() {
            match result {
                Ok(event) => {
                    // Only fails when no receiver is left; the lease stops us shortly
                    if sender.send(event).is_err() {
                        trace!("{}ms color feed has no subscribers", interval_ms);
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    }

    debug!("{}ms color feed ended", interval_ms);
}
