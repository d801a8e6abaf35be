//! Continuous frame delivery for one display at a time.
//!
//! A `FrameSource` is the platform collaborator: it enumerates displays and
//! pushes frames into a `FrameSink` from whatever thread it likes. The sink
//! writes into a single-slot mailbox, so a slow consumer only ever sees the
//! newest frame and older ones are dropped unseen. `CaptureStream` is the
//! control handle (`update` / `stop`), `FrameStream` the consuming end.

use super::frame::{DisplayDescriptor, DisplayId, Frame, FrameError, Resolution};
use super::SurfaceId;
use crate::config::Quality;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;

/// Everything a source needs to produce frames for one display.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub display: DisplayDescriptor,
    pub excluded_surfaces: Vec<SurfaceId>,
    pub resolution: Resolution,
    /// Always false for the loupe: the pointer must not appear in samples.
    pub shows_cursor: bool,
}

impl StreamConfig {
    pub fn for_display(display: &DisplayDescriptor, quality: Quality, excluded: &[SurfaceId]) -> Self {
        Self {
            display: *display,
            excluded_surfaces: excluded.to_vec(),
            resolution: Resolution::for_display(display, quality),
            shows_cursor: false,
        }
    }

    pub fn display_id(&self) -> DisplayId {
        self.display.id
    }
}

/// Platform screen-capture collaborator.
///
/// `start` hands over a sink the source keeps pushing into until `stop`.
/// `update` must switch target, exclusions and resolution in one step: no
/// frame may be produced from a half-applied configuration.
pub trait FrameSource: Send + 'static {
    fn displays(&self) -> Result<Vec<DisplayDescriptor>, CaptureError>;

    fn start(&mut self, config: &StreamConfig, sink: FrameSink) -> Result<(), CaptureError>;

    fn update(&mut self, config: &StreamConfig) -> Result<(), CaptureError>;

    fn stop(&mut self);
}

/// Completeness flag reported by sources that can deliver partial frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub delivered: u64,
    /// Overwritten in the mailbox before anyone read them.
    pub dropped: u64,
    /// Rejected as incomplete.
    pub skipped: u64,
}

#[derive(Debug)]
enum Phase {
    Open,
    Failed(CaptureError),
    Closed,
}

#[derive(Debug)]
struct Slot {
    latest: Option<Frame>,
    phase: Phase,
    stats: StreamStats,
}

#[derive(Debug)]
struct Mailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                latest: None,
                phase: Phase::Open,
                stats: StreamStats::default(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject further frames and discard the unread one.
    fn close(&self) {
        {
            let mut slot = self.lock();
            slot.phase = Phase::Closed;
            slot.latest = None;
        }
        self.notify.notify_one();
    }
}

/// Producer end handed to a `FrameSource`. Cheap to clone, safe to use from
/// any thread.
#[derive(Debug, Clone)]
pub struct FrameSink {
    mailbox: Arc<Mailbox>,
}

impl FrameSink {
    /// Publish a complete frame. Returns false once the stream has ended, at
    /// which point the producer should wind down.
    pub fn deliver(&self, frame: Frame) -> bool {
        self.deliver_with_status(frame, FrameStatus::Complete)
    }

    pub fn deliver_with_status(&self, frame: Frame, status: FrameStatus) -> bool {
        {
            let mut slot = self.mailbox.lock();
            if !matches!(slot.phase, Phase::Open) {
                return false;
            }
            if status == FrameStatus::Incomplete {
                slot.stats.skipped += 1;
                log::trace!("[CAPTURE] Skipping incomplete frame");
                return true;
            }
            if slot.latest.replace(frame).is_some() {
                slot.stats.dropped += 1;
            }
            slot.stats.delivered += 1;
        }
        self.mailbox.notify.notify_one();
        true
    }

    /// End the stream with an unrecoverable error. Frames already in the
    /// mailbox are still handed out before the error.
    pub fn fail(&self, error: CaptureError) {
        {
            let mut slot = self.mailbox.lock();
            if !matches!(slot.phase, Phase::Open) {
                return;
            }
            log::error!("[CAPTURE] Stream failed: {}", error);
            slot.phase = Phase::Failed(error);
        }
        self.mailbox.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.mailbox.lock().phase, Phase::Open)
    }
}

/// Consuming end: yields the newest frame, then the terminal error if the
/// source failed, then `None` forever.
#[derive(Debug)]
pub struct FrameStream {
    mailbox: Arc<Mailbox>,
}

impl FrameStream {
    pub async fn next(&mut self) -> Option<Result<Frame, CaptureError>> {
        loop {
            {
                let mut slot = self.mailbox.lock();
                if let Some(frame) = slot.latest.take() {
                    return Some(Ok(frame));
                }
                match std::mem::replace(&mut slot.phase, Phase::Closed) {
                    Phase::Open => slot.phase = Phase::Open,
                    Phase::Failed(error) => return Some(Err(error)),
                    Phase::Closed => return None,
                }
            }
            self.mailbox.notify.notified().await;
        }
    }
}

struct Inner {
    source: tokio::sync::Mutex<Box<dyn FrameSource>>,
    mailbox: Arc<Mailbox>,
    config: Mutex<StreamConfig>,
    stopped: AtomicBool,
}

/// Control handle for a running stream. Clones share the same stream.
#[derive(Clone)]
pub struct CaptureStream {
    inner: Arc<Inner>,
}

impl CaptureStream {
    /// Start `source` on `config` and return the control handle together
    /// with the frame sequence.
    pub fn start(
        mut source: impl FrameSource,
        config: StreamConfig,
    ) -> Result<(CaptureStream, FrameStream), CaptureError> {
        let start = Instant::now();
        let mailbox = Arc::new(Mailbox::new());

        source.start(
            &config,
            FrameSink {
                mailbox: Arc::clone(&mailbox),
            },
        )?;

        log::info!(
            "[CAPTURE] Stream started on display {:?} at {}x{} in {}ms",
            config.display.id,
            config.resolution.width,
            config.resolution.height,
            start.elapsed().as_millis()
        );

        let stream = CaptureStream {
            inner: Arc::new(Inner {
                source: tokio::sync::Mutex::new(Box::new(source)),
                mailbox: Arc::clone(&mailbox),
                config: Mutex::new(config),
                stopped: AtomicBool::new(false),
            }),
        };
        Ok((stream, FrameStream { mailbox }))
    }

    /// Apply a new configuration without ending the sequence.
    ///
    /// Calls queue on a fair lock, so overlapping updates run one after the
    /// other in issue order. A no-op after `stop`. A source that rejects the
    /// update ends the stream with that error.
    pub async fn update(&self, config: StreamConfig) {
        let start = Instant::now();
        let mut source = self.inner.source.lock().await;
        if self.is_stopped() {
            log::debug!("[CAPTURE] Ignoring update after stop");
            return;
        }

        match source.update(&config) {
            Ok(()) => {
                log::info!(
                    "[CAPTURE] Retargeted to display {:?} at {}x{} in {}ms",
                    config.display.id,
                    config.resolution.width,
                    config.resolution.height,
                    start.elapsed().as_millis()
                );
                *self.inner.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
            }
            Err(e) => {
                FrameSink {
                    mailbox: Arc::clone(&self.inner.mailbox),
                }
                .fail(e);
            }
        }
    }

    /// Terminate the sequence and release the source. Idempotent.
    ///
    /// The mailbox closes before this awaits anything, so no frame is handed
    /// out after the call begins even if the producer is mid-delivery.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.mailbox.close();

        let mut source = self.inner.source.lock().await;
        source.stop();

        let stats = self.stats();
        log::info!(
            "[CAPTURE] Stream stopped ({} delivered, {} dropped, {} incomplete)",
            stats.delivered,
            stats.dropped,
            stats.skipped
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// The most recently applied configuration.
    pub fn config(&self) -> StreamConfig {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> StreamStats {
        self.inner.mailbox.lock().stats
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to enumerate monitors: {0}")]
    MonitorEnumeration(String),

    #[error("No displays available for capture")]
    NoDisplays,

    #[error("Display {0:?} is not available")]
    DisplayNotFound(DisplayId),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Capture source delivered a malformed frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("Capture stream ended: {0}")]
    StreamFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Rect;
    use crate::color::ColorSpace;
    use image::RgbaImage;

    #[derive(Default)]
    struct Recorded {
        sink: Option<FrameSink>,
        updates: Vec<StreamConfig>,
        stops: usize,
        reject_updates: bool,
    }

    #[derive(Clone, Default)]
    struct ManualSource(Arc<Mutex<Recorded>>);

    impl FrameSource for ManualSource {
        fn displays(&self) -> Result<Vec<DisplayDescriptor>, CaptureError> {
            Ok(vec![display(1)])
        }

        fn start(&mut self, _config: &StreamConfig, sink: FrameSink) -> Result<(), CaptureError> {
            self.0.lock().unwrap().sink = Some(sink);
            Ok(())
        }

        fn update(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
            let mut recorded = self.0.lock().unwrap();
            if recorded.reject_updates {
                return Err(CaptureError::DisplayNotFound(config.display.id));
            }
            recorded.updates.push(config.clone());
            Ok(())
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }
    }

    impl ManualSource {
        fn sink(&self) -> FrameSink {
            self.0.lock().unwrap().sink.clone().unwrap()
        }
    }

    fn display(id: u32) -> DisplayDescriptor {
        DisplayDescriptor {
            id: DisplayId(id),
            frame: Rect::new(0.0, 0.0, 4.0, 4.0),
            scale_factor: 1.0,
        }
    }

    fn frame(width: u32) -> Frame {
        Frame::new(RgbaImage::new(width, 1), display(1), ColorSpace::Srgb)
    }

    fn config(id: u32) -> StreamConfig {
        StreamConfig::for_display(&display(id), Quality::Nominal, &[SurfaceId(7)])
    }

    #[test]
    fn config_hides_cursor_and_keeps_exclusions() {
        let config = config(1);
        assert!(!config.shows_cursor);
        assert_eq!(config.excluded_surfaces, vec![SurfaceId(7)]);
        assert_eq!(config.resolution, Resolution { width: 4, height: 4 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_while_a_producer_is_delivering() {
        let source = ManualSource::default();
        let (stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        let sink = source.sink();
        let producer = std::thread::spawn(move || {
            let mut sent = 0u64;
            while sink.deliver(frame(1)) {
                sent += 1;
            }
            sent
        });

        while stream.stats().delivered == 0 {
            tokio::task::yield_now().await;
        }
        stream.stop().await;

        // The producer sees the closed stream and winds down on its own.
        assert!(producer.join().unwrap() > 0);
        assert!(frames.next().await.is_none());
        assert!(!source.sink().deliver(frame(1)));
        assert_eq!(source.0.lock().unwrap().stops, 1);
    }

    #[tokio::test]
    async fn only_the_newest_frame_is_kept() {
        let source = ManualSource::default();
        let (stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        let sink = source.sink();
        assert!(sink.deliver(frame(1)));
        assert!(sink.deliver(frame(2)));
        assert!(sink.deliver(frame(3)));

        let latest = frames.next().await.unwrap().unwrap();
        assert_eq!(latest.width(), 3);
        assert_eq!(stream.stats().dropped, 2);
    }

    #[tokio::test]
    async fn incomplete_frames_never_arrive() {
        let source = ManualSource::default();
        let (stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        let sink = source.sink();
        sink.deliver(frame(5));
        sink.deliver_with_status(frame(9), FrameStatus::Incomplete);

        assert_eq!(frames.next().await.unwrap().unwrap().width(), 5);
        assert_eq!(stream.stats().skipped, 1);
    }

    #[tokio::test]
    async fn failure_follows_pending_frame() {
        let source = ManualSource::default();
        let (_stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        let sink = source.sink();
        sink.deliver(frame(4));
        sink.fail(CaptureError::CaptureFailed("gone".into()));
        assert!(!sink.deliver(frame(6)));

        assert!(matches!(frames.next().await, Some(Ok(_))));
        assert!(matches!(frames.next().await, Some(Err(CaptureError::CaptureFailed(_)))));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn stop_ends_sequence_and_ignores_later_updates() {
        let source = ManualSource::default();
        let (stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        let sink = source.sink();
        sink.deliver(frame(2));
        stream.stop().await;
        stream.stop().await;

        assert!(sink.is_closed());
        assert!(!sink.deliver(frame(3)));
        assert!(frames.next().await.is_none());

        stream.update(config(2)).await;
        let recorded = source.0.lock().unwrap();
        assert!(recorded.updates.is_empty());
        assert_eq!(recorded.stops, 1);
        assert!(stream.is_stopped());
    }

    #[tokio::test]
    async fn updates_apply_in_issue_order() {
        let source = ManualSource::default();
        let (stream, _frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        stream.update(config(2)).await;
        stream.update(config(3)).await;

        let ids: Vec<_> = source.0.lock().unwrap().updates.iter().map(|c| c.display_id()).collect();
        assert_eq!(ids, vec![DisplayId(2), DisplayId(3)]);
        assert_eq!(stream.config().display_id(), DisplayId(3));
    }

    #[tokio::test]
    async fn rejected_update_fails_the_stream() {
        let source = ManualSource::default();
        source.0.lock().unwrap().reject_updates = true;
        let (stream, mut frames) = CaptureStream::start(source.clone(), config(1)).unwrap();

        stream.update(config(2)).await;

        assert!(matches!(
            frames.next().await,
            Some(Err(CaptureError::DisplayNotFound(DisplayId(2))))
        ));
        assert_eq!(stream.config().display_id(), DisplayId(1));
    }
}
