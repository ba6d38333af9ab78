pub mod chunk;
pub mod dedup;
pub mod feed;
pub mod line;
pub mod source;

pub use chunk::{ChunkError, ChunkReport, LineAssembler, DEFAULT_MAX_LINE_BYTES};
pub use dedup::{LogDeduplicator, DEFAULT_LOG_CAPACITY};
pub use feed::{
    run_log_feed, FeedStats, LogConfig, LogControl, LogFeed, LogView, DEFAULT_BACKFILL_TAIL,
};
pub use line::{classify_level, line_id, strip_ansi, LogLevel, LogLine};
pub use source::{LogBackfill, LogSourceError, LogTail};
