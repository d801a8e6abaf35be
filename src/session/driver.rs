//! Async shell around `SamplingSession`.
//!
//! One task owns the session. Frames and input are multiplexed onto it, so
//! every read and write of session state happens on a single logical
//! context. Effects are applied to the host channels and the capture stream.

use super::machine::{Effect, InputEvent, SamplingSession};
use crate::capture::{CaptureStream, FrameStream, StreamConfig};
use crate::color::Color;
use crate::overlay::LoupeView;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub(super) struct Outputs {
    pub hover: broadcast::Sender<Color>,
    pub view: watch::Sender<Option<LoupeView>>,
    pub selection: oneshot::Sender<Option<Color>>,
}

/// Apply retargets one after another on a dedicated task. Updates queued
/// behind a running one collapse to the newest.
fn spawn_retargeter(stream: CaptureStream) -> mpsc::UnboundedSender<StreamConfig> {
    let (tx, mut rx) = mpsc::unbounded_channel::<StreamConfig>();
    tokio::spawn(async move {
        while let Some(mut config) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                config = newer;
            }
            stream.update(config).await;
        }
    });
    tx
}

pub(super) async fn run(
    mut session: SamplingSession,
    stream: CaptureStream,
    mut frames: FrameStream,
    mut inputs: mpsc::UnboundedReceiver<InputEvent>,
    outputs: Outputs,
) {
    let started = Instant::now();
    let retarget = spawn_retargeter(stream.clone());
    let mut selection = None;

    loop {
        let effects = tokio::select! {
            biased;

            event = inputs.recv() => match event {
                Some(event) => session.handle_input(event),
                None => {
                    log::info!("[SESSION] Input source dropped, cancelling");
                    session.cancel()
                }
            },
            frame = frames.next() => match frame {
                Some(Ok(frame)) => session.handle_frame(frame),
                Some(Err(e)) => session.handle_stream_failure(&e.to_string()),
                None => session.handle_stream_failure("stream closed"),
            },
        };

        for effect in effects {
            match effect {
                Effect::Hover(color) => {
                    let _ = outputs.hover.send(color);
                }
                Effect::View(view) => {
                    outputs.view.send_replace(view);
                }
                Effect::Retarget(config) => {
                    let _ = retarget.send(config);
                }
                Effect::Finish(color) => selection = Some(color),
            }
        }

        if session.is_terminated() {
            break;
        }
    }

    drop(retarget);
    stream.stop().await;
    outputs.view.send_replace(None);

    let _ = outputs.selection.send(selection.flatten());
    log::info!("[SESSION] Session closed after {}ms", started.elapsed().as_millis());
}
