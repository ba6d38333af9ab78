use crate::chunk::{ChunkReport, LineAssembler, DEFAULT_MAX_LINE_BYTES};
use crate::dedup::{LogDeduplicator, DEFAULT_LOG_CAPACITY};
use crate::line::LogLine;
use crate::source::{LogBackfill, LogSourceError, LogTail};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_BACKFILL_TAIL: usize = 500;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub capacity: usize,
    pub backfill_tail: usize,
    pub max_line_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            backfill_tail: DEFAULT_BACKFILL_TAIL,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogControl {
    Pause,
    Resume,
    Clear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub backfill_lines: u64,
    pub live_lines: u64,
    pub held_dropped: u64,
    pub oversized_lines: u64,
    pub stream_errors: u64,
}

/// Backfill plus live tail, with pause/resume holding.
#[derive(Debug)]
pub struct LogFeed {
    buffer: LogDeduplicator,
    assembler: LineAssembler,
    paused: bool,
    held: VecDeque<(String, DateTime<Utc>)>,
    held_capacity: usize,
    stats: FeedStats,
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(&LogConfig::default())
    }
}

impl LogFeed {
    pub fn new(config: &LogConfig) -> Self {
        let buffer = LogDeduplicator::with_capacity(config.capacity);
        let held_capacity = buffer.capacity();
        Self {
            buffer,
            assembler: LineAssembler::new(config.max_line_bytes),
            paused: false,
            held: VecDeque::new(),
            held_capacity,
            stats: FeedStats::default(),
        }
    }

    pub fn buffer(&self) -> &LogDeduplicator {
        &self.buffer
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    /// Backfill lines are never held, even while paused.
    pub fn apply_backfill(&mut self, lines: Vec<String>, now: DateTime<Utc>) -> usize {
        let mut inserted = 0;
        for raw in lines {
            self.stats.backfill_lines += 1;
            if self.buffer.insert_raw(&raw, now) {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn push_chunk(&mut self, chunk: &str, now: DateTime<Utc>) -> usize {
        let report = self.assembler.push_chunk(chunk.as_bytes());
        self.absorb(report, now)
    }

    /// Flushes any trailing partial line once the tail ends.
    pub fn finish_chunks(&mut self, now: DateTime<Utc>) -> usize {
        let report = self.assembler.finish();
        self.absorb(report, now)
    }

    /// Returns true when the line reached the buffer.
    pub fn push_line(&mut self, raw: &str, now: DateTime<Utc>) -> bool {
        self.stats.live_lines += 1;
        if self.paused {
            self.hold(raw, now);
            return false;
        }
        self.buffer.insert_raw(raw, now)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.buffer.push_system("Log stream paused", now);
        true
    }

    /// Applies held lines in arrival order. Returns how many were held.
    pub fn resume(&mut self, now: DateTime<Utc>) -> usize {
        if !self.paused {
            return 0;
        }
        self.paused = false;
        let held = self.held.len();
        while let Some((raw, received_at)) = self.held.pop_front() {
            self.buffer.insert_raw(&raw, received_at);
        }
        let message = match held {
            0 => "Log stream resumed".to_string(),
            1 => "Log stream resumed (1 held line)".to_string(),
            count => format!("Log stream resumed ({count} held lines)"),
        };
        self.buffer.push_system(&message, now);
        held
    }

    /// Drops buffered and held lines; the pause state is kept.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.held.clear();
    }

    pub fn connected(&mut self, container_id: &str, now: DateTime<Utc>) {
        self.buffer
            .push_system(&format!("Connected to {container_id}"), now);
    }

    pub fn stream_ended(&mut self, now: DateTime<Utc>) {
        self.buffer.push_system("Log stream ended", now);
    }

    pub fn stream_error(&mut self, err: &LogSourceError, now: DateTime<Utc>) {
        self.stats.stream_errors += 1;
        self.buffer
            .push_system(&format!("Log stream error: {err}"), now);
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.buffer.lines()
    }

    fn absorb(&mut self, report: ChunkReport, now: DateTime<Utc>) -> usize {
        for err in &report.errors {
            self.stats.oversized_lines += 1;
            debug!(event = "log_line_dropped", error = %err);
        }
        let mut inserted = 0;
        for raw in &report.lines {
            if self.push_line(raw, now) {
                inserted += 1;
            }
        }
        inserted
    }

    fn hold(&mut self, raw: &str, now: DateTime<Utc>) {
        self.held.push_back((raw.to_string(), now));
        while self.held.len() > self.held_capacity {
            self.held.pop_front();
            self.stats.held_dropped += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogView {
    pub lines: Vec<LogLine>,
    pub paused: bool,
    pub held: usize,
}

impl LogView {
    pub fn capture(feed: &LogFeed) -> Self {
        Self {
            lines: feed.lines().cloned().collect(),
            paused: feed.is_paused(),
            held: feed.held_len(),
        }
    }
}

/// Backfills, then follows the tail until every control sender is dropped.
///
/// The tail is subscribed only after the backfill settles; overlap between
/// the two is absorbed by the dedup buffer.
pub async fn run_log_feed(
    container_id: String,
    config: LogConfig,
    backfill: Arc<dyn LogBackfill>,
    tail: Arc<dyn LogTail>,
    mut controls: mpsc::Receiver<LogControl>,
    view: watch::Sender<LogView>,
) -> LogFeed {
    let mut feed = LogFeed::new(&config);

    match backfill.fetch(&container_id, config.backfill_tail).await {
        Ok(lines) => {
            let inserted = feed.apply_backfill(lines, Utc::now());
            info!(event = "log_backfill_done", container_id = %container_id, inserted);
        }
        Err(err) => {
            warn!(event = "log_backfill_failed", container_id = %container_id, error = %err);
            feed.stream_error(&err, Utc::now());
        }
    }
    feed.connected(&container_id, Utc::now());
    view.send_replace(LogView::capture(&feed));

    let mut stream = tail.subscribe(&container_id);
    let mut tail_open = true;
    loop {
        tokio::select! {
            biased;
            control = controls.recv() => {
                let Some(control) = control else {
                    break;
                };
                let now = Utc::now();
                match control {
                    LogControl::Pause => {
                        feed.pause(now);
                    }
                    LogControl::Resume => {
                        let held = feed.resume(now);
                        debug!(event = "log_feed_resumed", held);
                    }
                    LogControl::Clear => feed.clear(),
                }
                view.send_replace(LogView::capture(&feed));
            }
            chunk = stream.next(), if tail_open => {
                let now = Utc::now();
                match chunk {
                    Some(Ok(chunk)) => {
                        if feed.push_chunk(&chunk, now) == 0 && !feed.is_paused() {
                            continue;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "log_tail_error", container_id = %container_id, error = %err);
                        feed.stream_error(&err, now);
                    }
                    None => {
                        tail_open = false;
                        feed.finish_chunks(now);
                        feed.stream_ended(now);
                        info!(event = "log_tail_closed", container_id = %container_id);
                    }
                }
                view.send_replace(LogView::capture(&feed));
            }
        }
    }

    info!(
        event = "log_feed_stop",
        container_id = %container_id,
        lines = feed.buffer().len(),
        stream_errors = feed.stats().stream_errors
    );
    feed
}
