use crate::throttler::{DecodedFrame, FrameStats, FrameStreamThrottler, Viewport};
use std::time::Duration;
use tether_core::EventEnvelope;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum FrameInput {
    Envelope(EventEnvelope),
    /// Local stop; frames still in flight are discarded.
    EndSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameView {
    pub visible: Option<DecodedFrame>,
    pub viewport: Viewport,
    pub session_active: bool,
    pub current_url: Option<String>,
    pub stats: FrameStats,
}

impl FrameView {
    pub fn capture(throttler: &FrameStreamThrottler) -> Self {
        Self {
            visible: throttler.visible().cloned(),
            viewport: throttler.viewport(),
            session_active: throttler.is_active(),
            current_url: throttler.current_url().map(ToString::to_string),
            stats: throttler.stats().clone(),
        }
    }
}

/// Accepts frames as they arrive and publishes at most one visible swap per
/// `flush_period`. Ends when every input sender is dropped.
pub async fn run_frame_loop(
    mut throttler: FrameStreamThrottler,
    mut inputs: mpsc::Receiver<FrameInput>,
    view: watch::Sender<FrameView>,
    flush_period: Duration,
) -> FrameStreamThrottler {
    let mut flush = time::interval(flush_period.max(MIN_FLUSH_PERIOD));
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    view.send_replace(FrameView::capture(&throttler));
    info!(
        event = "frame_loop_start",
        flush_ms = flush_period.as_millis() as u64
    );

    loop {
        tokio::select! {
            biased;
            input = inputs.recv() => {
                let Some(input) = input else {
                    break;
                };
                let publish = match input {
                    FrameInput::Envelope(envelope) => {
                        throttler.apply_at(&envelope, time::Instant::now().into_std())
                    }
                    FrameInput::EndSession => {
                        throttler.end_session(Some("local"));
                        true
                    }
                };
                if publish {
                    view.send_replace(FrameView::capture(&throttler));
                }
            }
            _ = flush.tick() => {
                if throttler.flush() {
                    view.send_replace(FrameView::capture(&throttler));
                }
            }
        }
    }

    let stats = throttler.stats();
    info!(
        event = "frame_loop_stop",
        accepted = stats.accepted,
        flushed = stats.flushed,
        superseded = stats.superseded,
        decode_errors = stats.decode_errors
    );
    throttler
}
