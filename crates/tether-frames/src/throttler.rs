use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::envelope::{BrowserFrame, BrowserLifecycle};
use tether_core::EventEnvelope;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(33);
pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1440,
    height: 900,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub flush_period: Duration,
    pub default_viewport: Viewport,
    pub start_active: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            flush_period: DEFAULT_FLUSH_PERIOD,
            default_viewport: DEFAULT_VIEWPORT,
            start_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    #[error("frame payload is empty")]
    Empty,
    #[error("frame payload is not valid base64: {0}")]
    Base64(String),
    #[error("frame payload is not a recognised image")]
    UnknownFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub seq: u64,
    pub format: ImageFormat,
    pub bytes: Arc<[u8]>,
}

/// Decodes a base64 frame payload, accepting an optional `data:` URL prefix.
pub fn decode_frame_payload(data: &str) -> Result<(ImageFormat, Vec<u8>), FrameDecodeError> {
    let data = data.trim();
    let encoded = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, body)| body).unwrap_or(""),
        None => data,
    };
    if encoded.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    let bytes = B64
        .decode(encoded)
        .map_err(|err| FrameDecodeError::Base64(err.to_string()))?;
    if bytes.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    let format = ImageFormat::sniff(&bytes).ok_or(FrameDecodeError::UnknownFormat)?;
    Ok((format, bytes))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub fps: f64,
    pub last_frame_bytes: usize,
    pub accepted: u64,
    pub superseded: u64,
    pub flushed: u64,
    pub decode_errors: u64,
    pub discarded_inactive: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Accepted,
    Superseded,
    DiscardedInactive,
    DecodeFailed,
}

/// Latest-frame buffer with a pending and a visible slot.
///
/// Incoming frames replace the pending slot; `flush` promotes it. Callers
/// drive `flush` from a fixed-period timer, which caps visible swaps to one
/// per period no matter how fast frames arrive.
#[derive(Debug)]
pub struct FrameStreamThrottler {
    pending: Option<DecodedFrame>,
    visible: Option<DecodedFrame>,
    viewport: Viewport,
    session_active: bool,
    session_id: Option<String>,
    current_url: Option<String>,
    last_accepted_at: Option<Instant>,
    next_seq: u64,
    stats: FrameStats,
}

impl Default for FrameStreamThrottler {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl FrameStreamThrottler {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            pending: None,
            visible: None,
            viewport: config.default_viewport,
            session_active: config.start_active,
            session_id: None,
            current_url: None,
            last_accepted_at: None,
            next_seq: 0,
            stats: FrameStats::default(),
        }
    }

    pub fn visible(&self) -> Option<&DecodedFrame> {
        self.visible.as_ref()
    }

    pub fn pending(&self) -> Option<&DecodedFrame> {
        self.pending.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_active(&self) -> bool {
        self.session_active
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Applies a browser-stream envelope. Returns true when state outside the
    /// frame slots changed (url, lifecycle) and should be published now.
    pub fn apply_at(&mut self, envelope: &EventEnvelope, now: Instant) -> bool {
        match envelope {
            EventEnvelope::BrowserFrame(frame) => {
                self.push_frame(frame, now);
                false
            }
            EventEnvelope::BrowserUrlChanged(changed) => self.set_url(&changed.url),
            EventEnvelope::BrowserSessionStarted(lifecycle) => {
                self.start_session(lifecycle);
                true
            }
            EventEnvelope::BrowserSessionEnded(lifecycle) => {
                self.end_session(lifecycle.reason.as_deref());
                true
            }
            _ => false,
        }
    }

    pub fn push_frame(&mut self, frame: &BrowserFrame, now: Instant) -> FrameOutcome {
        if !self.session_active {
            self.stats.discarded_inactive += 1;
            return FrameOutcome::DiscardedInactive;
        }
        let (format, bytes) = match decode_frame_payload(&frame.data) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.decode_errors += 1;
                debug!(
                    event = "frame_decode_error",
                    error = %err,
                    errors = self.stats.decode_errors
                );
                return FrameOutcome::DecodeFailed;
            }
        };

        self.update_viewport(frame.width, frame.height);
        if let Some(previous) = self.last_accepted_at {
            let delta_ms = now.saturating_duration_since(previous).as_secs_f64() * 1000.0;
            if delta_ms > 0.0 {
                self.stats.fps = 1000.0 / delta_ms;
            }
        }
        self.last_accepted_at = Some(now);
        self.stats.accepted += 1;
        self.stats.last_frame_bytes = bytes.len();

        let seq = self.next_seq;
        self.next_seq += 1;
        let replaced = self.pending.replace(DecodedFrame {
            seq,
            format,
            bytes: bytes.into(),
        });
        if replaced.is_some() {
            self.stats.superseded += 1;
            FrameOutcome::Superseded
        } else {
            FrameOutcome::Accepted
        }
    }

    /// Promotes the pending frame. Returns true when the visible frame changed.
    pub fn flush(&mut self) -> bool {
        match self.pending.take() {
            Some(frame) => {
                self.visible = Some(frame);
                self.stats.flushed += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_url(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.current_url.as_deref() == Some(url) {
            return false;
        }
        self.current_url = Some(url.to_string());
        true
    }

    pub fn start_session(&mut self, lifecycle: &BrowserLifecycle) {
        self.session_active = true;
        self.session_id = lifecycle.session_id.clone();
        info!(
            event = "frame_session_started",
            session_id = lifecycle.session_id.as_deref().unwrap_or_default()
        );
    }

    /// Deactivates the stream and drops both slots so no stale frame resurfaces.
    pub fn end_session(&mut self, reason: Option<&str>) {
        self.session_active = false;
        self.session_id = None;
        self.pending = None;
        self.visible = None;
        self.last_accepted_at = None;
        self.stats.fps = 0.0;
        info!(
            event = "frame_session_ended",
            reason = reason.unwrap_or("unspecified")
        );
    }

    fn update_viewport(&mut self, width: Option<f64>, height: Option<f64>) {
        if let Some(width) = positive_dimension(width) {
            self.viewport.width = width;
        }
        if let Some(height) = positive_dimension(height) {
            self.viewport.height = height;
        }
    }
}

fn positive_dimension(value: Option<f64>) -> Option<u32> {
    let value = value?;
    if !value.is_finite() || value < 1.0 || value > f64::from(u32::MAX) {
        return None;
    }
    Some(value.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    fn frame(payload: &[u8]) -> BrowserFrame {
        BrowserFrame {
            data: B64.encode(payload),
            width: None,
            height: None,
        }
    }

    fn jpeg(tag: u8) -> BrowserFrame {
        let mut payload = JPEG.to_vec();
        payload.push(tag);
        frame(&payload)
    }

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(ImageFormat::sniff(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(
            ImageFormat::sniff(b"\x89PNG\r\n\x1a\nrest"),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"GIF89a..."), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"hello"), None);
    }

    #[test]
    fn decode_strips_data_url_prefix() {
        let encoded = format!("data:image/jpeg;base64,{}", B64.encode(JPEG));
        let (format, bytes) = decode_frame_payload(&encoded).expect("decode");
        assert_eq!(format, ImageFormat::Jpeg);
        assert_eq!(bytes, JPEG);
        assert_eq!(decode_frame_payload("  "), Err(FrameDecodeError::Empty));
        assert!(matches!(
            decode_frame_payload("%%%"),
            Err(FrameDecodeError::Base64(_))
        ));
        assert_eq!(
            decode_frame_payload(&B64.encode(b"plain text")),
            Err(FrameDecodeError::UnknownFormat)
        );
    }

    #[test]
    fn newer_frame_replaces_pending_slot() {
        let mut throttler = FrameStreamThrottler::default();
        let now = Instant::now();
        assert_eq!(throttler.push_frame(&jpeg(1), now), FrameOutcome::Accepted);
        assert_eq!(
            throttler.push_frame(&jpeg(2), now + Duration::from_millis(5)),
            FrameOutcome::Superseded
        );
        assert!(throttler.visible().is_none());

        assert!(throttler.flush());
        let visible = throttler.visible().expect("visible");
        assert_eq!(visible.seq, 1);
        assert_eq!(visible.bytes.last(), Some(&2));
        assert!(!throttler.flush());
        assert_eq!(throttler.stats().superseded, 1);
        assert_eq!(throttler.stats().flushed, 1);
    }

    #[test]
    fn decode_failure_keeps_visible_frame() {
        let mut throttler = FrameStreamThrottler::default();
        let now = Instant::now();
        throttler.push_frame(&jpeg(1), now);
        throttler.flush();

        let broken = BrowserFrame {
            data: "not-base64!".to_string(),
            width: Some(800.0),
            height: Some(600.0),
        };
        assert_eq!(throttler.push_frame(&broken, now), FrameOutcome::DecodeFailed);
        assert!(!throttler.flush());
        assert_eq!(throttler.visible().map(|frame| frame.seq), Some(0));
        assert_eq!(throttler.stats().decode_errors, 1);
        assert_eq!(throttler.viewport(), DEFAULT_VIEWPORT);
    }

    #[test]
    fn fps_tracks_accepted_frame_spacing() {
        let mut throttler = FrameStreamThrottler::default();
        let start = Instant::now();
        throttler.push_frame(&jpeg(1), start);
        throttler.push_frame(&jpeg(2), start + Duration::from_millis(50));
        assert!((throttler.stats().fps - 20.0).abs() < 1e-6);

        throttler.push_frame(&frame(b"bogus"), start + Duration::from_millis(60));
        assert!((throttler.stats().fps - 20.0).abs() < 1e-6);
        assert_eq!(throttler.stats().last_frame_bytes, JPEG.len() + 1);
    }

    #[test]
    fn viewport_updates_only_from_positive_metadata() {
        let mut throttler = FrameStreamThrottler::default();
        let now = Instant::now();
        let mut sized = jpeg(1);
        sized.width = Some(1280.0);
        sized.height = Some(0.0);
        throttler.push_frame(&sized, now);
        assert_eq!(
            throttler.viewport(),
            Viewport {
                width: 1280,
                height: 900
            }
        );
    }

    #[test]
    fn inactive_session_discards_and_end_clears_slots() {
        let mut throttler = FrameStreamThrottler::default();
        let now = Instant::now();
        throttler.push_frame(&jpeg(1), now);
        throttler.flush();
        throttler.push_frame(&jpeg(2), now);

        throttler.end_session(Some("user stop"));
        assert!(throttler.visible().is_none());
        assert!(throttler.pending().is_none());
        assert_eq!(
            throttler.push_frame(&jpeg(3), now),
            FrameOutcome::DiscardedInactive
        );
        assert!(!throttler.flush());
        assert_eq!(throttler.stats().discarded_inactive, 1);

        throttler.start_session(&BrowserLifecycle {
            session_id: Some("b-1".to_string()),
            reason: None,
        });
        assert_eq!(throttler.session_id(), Some("b-1"));
        assert_eq!(throttler.push_frame(&jpeg(4), now), FrameOutcome::Accepted);
    }

    #[test]
    fn visible_swaps_are_capped_by_flush_period() {
        let mut throttler = FrameStreamThrottler::default();
        let start = Instant::now();
        let period_ms = 33_u64;
        let window_ms = 1_000_u64;
        let mut next_flush = period_ms;
        let mut swaps = 0_u64;
        let mut latest_seq = None;

        for tick in 0..(window_ms / 5) {
            let at_ms = tick * 5;
            while at_ms >= next_flush {
                if throttler.flush() {
                    swaps += 1;
                    assert_eq!(throttler.visible().map(|frame| frame.seq), latest_seq);
                }
                next_flush += period_ms;
            }
            throttler.push_frame(&jpeg(tick as u8), start + Duration::from_millis(at_ms));
            latest_seq = throttler.pending().map(|frame| frame.seq);
        }

        assert!(swaps <= window_ms.div_ceil(period_ms));
        assert_eq!(throttler.stats().accepted, window_ms / 5);
    }

    #[test]
    fn url_changes_are_tracked_once() {
        let mut throttler = FrameStreamThrottler::default();
        assert!(throttler.set_url("https://example.dev"));
        assert!(!throttler.set_url("https://example.dev"));
        assert!(!throttler.set_url(" "));
        assert_eq!(throttler.current_url(), Some("https://example.dev"));
    }
}
