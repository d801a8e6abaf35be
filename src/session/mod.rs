//! Sampling session — public API.
//!
//! `sample()` starts capture on the display under the pointer and returns a
//! `Sampler`: an input handle for pointer, gesture and key events, a stream
//! of hover colors, a watch of the current loupe view, and a one-shot
//! selection that resolves exactly once.

mod driver;
mod machine;

pub use machine::{Effect, InputEvent, LiveState, SamplingSession, SessionState};

use crate::capture::{CaptureError, CaptureStream, FrameSource, Point};
use crate::color::Color;
use crate::config::SamplerConfig;
use crate::overlay::LoupeView;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Hover colors kept for a host that is not reading them. Older ones are
/// dropped first.
pub const HOVER_BACKLOG: usize = 64;

fn hover_channel() -> (broadcast::Sender<Color>, Hovers) {
    let (tx, rx) = broadcast::channel(HOVER_BACKLOG);
    (tx, Hovers(rx))
}

/// Start a sampling session. Must be called from within a tokio runtime.
///
/// Fails without ever starting a session when capture is unavailable; the
/// selection then never resolves because there is no `Sampler` to await.
pub fn sample<S: FrameSource>(
    source: S,
    config: SamplerConfig,
    pointer: Point,
) -> Result<Sampler, SampleError> {
    tokio::runtime::Handle::try_current().map_err(|_| SampleError::NoRuntime)?;

    let displays = source.displays()?;
    if displays.is_empty() {
        return Err(CaptureError::NoDisplays.into());
    }

    let mut session = SamplingSession::new(config, displays);
    let stream_config = session.begin(pointer)?;
    let (stream, frames) = CaptureStream::start(source, stream_config)?;

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (hover_tx, hovers) = hover_channel();
    let (view_tx, view_rx) = watch::channel(None);
    let (selection_tx, selection_rx) = oneshot::channel();

    let task = tokio::spawn(driver::run(
        session,
        stream,
        frames,
        input_rx,
        driver::Outputs {
            hover: hover_tx,
            view: view_tx,
            selection: selection_tx,
        },
    ));

    Ok(Sampler {
        input: InputSender(input_tx),
        hovers,
        views: view_rx,
        selection: Selection(selection_rx),
        task,
    })
}

/// Handle to a running session. Dropping it, along with every
/// `InputSender` clone, cancels the session.
pub struct Sampler {
    input: InputSender,
    hovers: Hovers,
    views: watch::Receiver<Option<LoupeView>>,
    selection: Selection,
    task: JoinHandle<()>,
}

pub struct SamplerParts {
    pub input: InputSender,
    pub hovers: Hovers,
    pub views: watch::Receiver<Option<LoupeView>>,
    pub selection: Selection,
}

impl Sampler {
    pub fn input(&self) -> InputSender {
        self.input.clone()
    }

    /// Next hover color, or `None` once the session has ended.
    pub async fn next_hover(&mut self) -> Option<Color> {
        self.hovers.next().await
    }

    pub fn views(&self) -> watch::Receiver<Option<LoupeView>> {
        self.views.clone()
    }

    pub fn cancel(&self) {
        self.input.escape();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal outcome. Consumes the sampler, so the
    /// selection can only be observed once.
    pub fn selection(self) -> Selection {
        self.selection
    }

    pub fn into_parts(self) -> SamplerParts {
        SamplerParts {
            input: self.input,
            hovers: self.hovers,
            views: self.views,
            selection: self.selection,
        }
    }
}

/// Cloneable sender for host input. Every method returns false once the
/// session is gone.
#[derive(Debug, Clone)]
pub struct InputSender(mpsc::UnboundedSender<InputEvent>);

impl InputSender {
    pub fn send(&self, event: InputEvent) -> bool {
        self.0.send(event).is_ok()
    }

    pub fn pointer_moved(&self, position: Point) -> bool {
        self.send(InputEvent::PointerMoved(position))
    }

    pub fn magnify(&self, magnification: f64) -> bool {
        self.send(InputEvent::Magnify(magnification))
    }

    pub fn scroll(&self, delta_y: f64) -> bool {
        self.send(InputEvent::Scroll(delta_y))
    }

    pub fn click(&self) -> bool {
        self.send(InputEvent::Click)
    }

    pub fn escape(&self) -> bool {
        self.send(InputEvent::Escape)
    }
}

/// Hover colors in delivery order. Ends when the session terminates.
///
/// At most `HOVER_BACKLOG` unread colors are held; a slow reader skips
/// ahead to the oldest one still buffered.
#[derive(Debug)]
pub struct Hovers(broadcast::Receiver<Color>);

impl Hovers {
    pub async fn next(&mut self) -> Option<Color> {
        loop {
            match self.0.recv().await {
                Ok(color) => return Some(color),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("[SESSION] Hover reader lagged, {} skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<Color> {
        loop {
            match self.0.try_recv() {
                Ok(color) => return Some(color),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::debug!("[SESSION] Hover reader lagged, {} skipped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Resolves to the selected color, or `None` on cancel or capture failure.
#[derive(Debug)]
pub struct Selection(oneshot::Receiver<Option<Color>>);

impl Future for Selection {
    type Output = Option<Color>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|result| result.ok().flatten())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(#[from] CaptureError),

    #[error("No display under the pointer at ({x}, {y})")]
    NoDisplayAtPointer { x: f64, y: f64 },

    #[error("Session has already started")]
    NotIdle,

    #[error("sample() must be called inside a tokio runtime")]
    NoRuntime,
}
