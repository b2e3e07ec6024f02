//! Timer-driven, multicast frame capture.
//!
//! Each distinct interval gets one feed: a background task that waits for the
//! timer, captures a frame and broadcasts it to every subscriber of that
//! interval. Feeds start with their first subscriber and stop when the last
//! one goes away. Capture calls from all feeds are serialized.

use crate::capture::ScreenCapture;
use crate::types::{Frame, SubscribeError};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

/// Default frames buffered per subscriber
pub const DEFAULT_CAPACITY: usize = 16;

/// Longest accepted capture interval (one day)
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

struct Feed {
    sender: broadcast::Sender<Frame>,
    subscribers: usize,
    task: JoinHandle<()>,
}

struct Shared {
    capture: Arc<dyn ScreenCapture>,
    /// Held for the duration of every capture call
    capture_lock: Arc<tokio::sync::Mutex<()>>,
    feeds: Mutex<HashMap<u64, Feed>>,
    capacity: usize,
}

impl Shared {
    fn feeds(&self) -> MutexGuard<'_, HashMap<u64, Feed>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.feeds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared source of captured frames. Cheap to clone.
#[derive(Clone)]
pub struct FrameSource {
    shared: Arc<Shared>,
}

impl FrameSource {
    pub fn new(capture: Arc<dyn ScreenCapture>) -> Self {
        Self::with_capacity(capture, DEFAULT_CAPACITY)
    }

    /// `capacity` is how many frames a subscriber may fall behind before it
    /// starts skipping frames
    pub fn with_capacity(capture: Arc<dyn ScreenCapture>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capture,
                capture_lock: Arc::new(tokio::sync::Mutex::new(())),
                feeds: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Receive the frames captured every `interval_ms` milliseconds from now on.
    ///
    /// The first frame is captured one interval after the feed starts.
    /// Subscribers to an interval that is already running join the existing
    /// feed. Must be called from within a tokio runtime.
    pub fn subscribe(&self, interval_ms: u64) -> Result<FrameSubscription, SubscribeError> {
        check_interval(interval_ms)?;

        let mut feeds = self.shared.feeds();
        let receiver = match feeds.get_mut(&interval_ms) {
            Some(feed) => {
                feed.subscribers += 1;
                debug!(
                    "Joined {}ms feed ({} subscribers)",
                    interval_ms, feed.subscribers
                );
                feed.sender.subscribe()
            }
            None => {
                let (sender, receiver) = broadcast::channel(self.shared.capacity);
                let task = tokio::spawn(run_feed(
                    interval_ms,
                    Arc::clone(&self.shared.capture),
                    Arc::clone(&self.shared.capture_lock),
                    sender.clone(),
                ));
                feeds.insert(
                    interval_ms,
                    Feed {
                        sender,
                        subscribers: 1,
                        task,
                    },
                );
                info!("Started {}ms capture feed", interval_ms);
                receiver
            }
        };

        Ok(FrameSubscription {
            frames: BroadcastStream::new(receiver),
            lease: FeedLease {
                shared: Arc::clone(&self.shared),
                interval_ms,
            },
        })
    }

    /// Number of running feeds
    pub fn active_feeds(&self) -> usize {
        self.shared.feeds().len()
    }

    /// Subscribers of the feed for `interval_ms` (0 if not running)
    pub fn subscriber_count(&self, interval_ms: u64) -> usize {
        self.shared
            .feeds()
            .get(&interval_ms)
            .map_or(0, |feed| feed.subscribers)
    }
}

/// Accept intervals in `1..=MAX_INTERVAL_MS`
pub fn check_interval(interval_ms: u64) -> Result<u64, SubscribeError> {
    match interval_ms {
        0 => Err(SubscribeError::InvalidInterval(
            "interval must be greater than 0".to_string(),
        )),
        ms if ms > MAX_INTERVAL_MS => Err(SubscribeError::InvalidInterval(format!(
            "interval must be at most {}ms",
            MAX_INTERVAL_MS
        ))),
        ms => Ok(ms),
    }
}

/// Keeps a feed alive; the last lease to drop stops it
struct FeedLease {
    shared: Arc<Shared>,
    interval_ms: u64,
}

impl Drop for FeedLease {
    fn drop(&mut self) {
        let mut feeds = self.shared.feeds();
        let Some(feed) = feeds.get_mut(&self.interval_ms) else {
            return;
        };

        feed.subscribers = feed.subscribers.saturating_sub(1);
        if feed.subscribers == 0 {
            if let Some(feed) = feeds.remove(&self.interval_ms) {
                feed.task.abort();
                info!("Stopped {}ms capture feed", self.interval_ms);
            }
        } else {
            debug!(
                "Left {}ms feed ({} subscribers)",
                self.interval_ms, feed.subscribers
            );
        }
    }
}

/// Frames from one feed. Dropping it unsubscribes.
pub struct FrameSubscription {
    frames: BroadcastStream<Frame>,
    lease: FeedLease,
}

impl FrameSubscription {
    pub fn interval_ms(&self) -> u64 {
        self.lease.interval_ms
    }
}

impl Stream for FrameSubscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        loop {
            match ready!(Pin::new(&mut self.frames).poll_next(cx)) {
                Some(Ok(frame)) => return Poll::Ready(Some(frame)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(
                        "Subscriber to {}ms feed fell behind, skipped {} frames",
                        self.lease.interval_ms, skipped
                    );
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Capture loop for one feed; runs until aborted
async fn run_feed(
    interval_ms: u64,
    capture: Arc<dyn ScreenCapture>,
    capture_lock: Arc<tokio::sync::Mutex<()>>,
    sender: broadcast::Sender<Frame>,
) {
    let period = Duration::from_millis(interval_ms);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;
        tick += 1;

        let result = {
            let _guard = capture_lock.lock().await;
            let start = Instant::now();
            let result = capture.capture_once().await;
            debug!("Tick {} capture latency: {:?}", tick, start.elapsed());
            result
        };

        match result {
            Ok(image) => {
                let frame = Frame::new(tick, image);
                // Only fails when no receiver is left; the lease stops us shortly
                if sender.send(frame).is_err() {
                    trace!("Tick {}: no subscribers", tick);
                }
            }
            Err(e) => {
                warn!("Tick {} skipped: {}", tick, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureError, RasterImage};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Returns a 1x1 image whose red channel is the call number
    #[derive(Default)]
    struct CountingCapture {
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl ScreenCapture for CountingCapture {
        async fn capture_once(&self) -> Result<RasterImage, CaptureError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RasterImage::from_pixel(1, 1, image::Rgb([call as u8, 0, 0])))
        }
    }

    async fn next_frame(frames: &mut FrameSubscription) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("timed out waiting for frame")
            .expect("feed ended")
    }

    /// Tracks how many capture calls overlap
    #[derive(Default)]
    struct SlowCapture {
        active: AtomicU64,
        peak: AtomicU64,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl ScreenCapture for SlowCapture {
        async fn capture_once(&self) -> Result<RasterImage, CaptureError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RasterImage::from_pixel(1, 1, image::Rgb([0, 0, 0])))
        }
    }

    #[tokio::test]
    async fn test_out_of_range_interval_rejected() {
        let source = FrameSource::new(Arc::new(CountingCapture::default()));
        for interval in [0, MAX_INTERVAL_MS + 1, u64::MAX] {
            assert!(matches!(
                source.subscribe(interval),
                Err(SubscribeError::InvalidInterval(_))
            ));
        }
        assert_eq!(source.active_feeds(), 0);
        assert_eq!(check_interval(MAX_INTERVAL_MS).unwrap(), MAX_INTERVAL_MS);
    }

    #[tokio::test]
    async fn test_captures_serialized_across_feeds() {
        let capture = Arc::new(SlowCapture::default());
        let source = FrameSource::new(capture.clone());

        let mut feeds = vec![
            source.subscribe(10).unwrap(),
            source.subscribe(11).unwrap(),
            source.subscribe(13).unwrap(),
        ];
        assert_eq!(source.active_feeds(), 3);

        for frames in feeds.iter_mut() {
            for _ in 0..3 {
                next_frame(frames).await;
            }
        }

        assert!(capture.calls.load(Ordering::SeqCst) >= 9);
        assert_eq!(capture.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let source = FrameSource::new(Arc::new(CountingCapture::default()));

        let mut early = source.subscribe(20).unwrap();
        next_frame(&mut early).await;
        let delivered = next_frame(&mut early).await.tick;

        let mut late = source.subscribe(20).unwrap();
        let first = next_frame(&mut late).await;
        assert!(first.tick > delivered);
        assert_eq!(source.subscriber_count(20), 2);
    }

    #[tokio::test]
    async fn test_subscribers_share_frames() {
        let capture = Arc::new(CountingCapture::default());
        let source = FrameSource::new(capture.clone());

        let mut a = source.subscribe(20).unwrap();
        let mut b = source.subscribe(20).unwrap();
        assert_eq!(source.active_feeds(), 1);
        assert_eq!(source.subscriber_count(20), 2);

        let fa = next_frame(&mut a).await;
        let fb = next_frame(&mut b).await;
        assert_eq!(fa.tick, fb.tick);
        assert!(Arc::ptr_eq(&fa.image, &fb.image));
    }

    #[tokio::test]
    async fn test_dropping_one_subscriber_keeps_feed() {
        let capture = Arc::new(CountingCapture::default());
        let source = FrameSource::new(capture.clone());

        let a = source.subscribe(20).unwrap();
        let mut b = source.subscribe(20).unwrap();
        drop(a);

        assert_eq!(source.active_feeds(), 1);
        assert_eq!(source.subscriber_count(20), 1);

        let first = next_frame(&mut b).await;
        let second = next_frame(&mut b).await;
        assert!(second.tick > first.tick);
    }

    #[tokio::test]
    async fn test_last_subscriber_stops_feed() {
        let capture = Arc::new(CountingCapture::default());
        let source = FrameSource::new(capture.clone());

        let mut frames = source.subscribe(10).unwrap();
        next_frame(&mut frames).await;
        drop(frames);
        assert_eq!(source.active_feeds(), 0);

        // Give an aborted task a chance to run if it were still alive
        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls = capture.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), calls);

        // A new subscriber restarts capture
        let mut frames = source.subscribe(10).unwrap();
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame.tick, 1);
    }

    #[tokio::test]
    async fn test_intervals_get_separate_feeds() {
        let source = FrameSource::new(Arc::new(CountingCapture::default()));
        let _fast = source.subscribe(10).unwrap();
        let _slow = source.subscribe(50).unwrap();
        assert_eq!(source.active_feeds(), 2);
        assert_eq!(source.subscriber_count(10), 1);
        assert_eq!(source.subscriber_count(50), 1);
    }

    #[tokio::test]
    async fn test_no_capture_before_first_interval() {
        let capture = Arc::new(CountingCapture::default());
        let source = FrameSource::new(capture.clone());

        let _frames = source.subscribe(200).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    }
}
