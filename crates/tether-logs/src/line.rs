use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    System,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub is_system_message: bool,
}

impl LogLine {
    /// Parses one raw container line. Blank lines yield `None`.
    ///
    /// The id is keyed on the line's own timestamp when it carries one, so
    /// the same line seen in backfill and tail collapses to one entry.
    /// Unstamped lines are keyed on `received_at` instead, so a message that
    /// repeats later is kept as a new entry.
    pub fn parse(raw: &str, received_at: DateTime<Utc>) -> Option<Self> {
        let cleaned = strip_ansi(raw);
        let cleaned = cleaned.trim_end();
        let (stamp, text) = split_timestamp(cleaned);
        if text.trim().is_empty() {
            return None;
        }
        let timestamp = stamp.unwrap_or(received_at);
        let key = timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        Some(Self {
            id: line_id(&key, text),
            text: text.to_string(),
            timestamp,
            level: classify_level(text),
            is_system_message: false,
        })
    }

    pub fn system(counter: u64, message: &str, at: DateTime<Utc>) -> Self {
        let digest = sha256_hex(message.as_bytes());
        Self {
            id: format!("sys:{counter}:{}", &digest[..8]),
            text: message.to_string(),
            timestamp: at,
            level: LogLevel::System,
            is_system_message: true,
        }
    }
}

pub fn line_id(timestamp_key: &str, text: &str) -> String {
    let digest = sha256_hex(format!("{timestamp_key}|{text}").as_bytes());
    format!("log:{}", &digest[..24])
}

pub fn strip_ansi(raw: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let pattern = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
            .expect("valid regex")
    });
    pattern.replace_all(raw, "").into_owned()
}

pub fn classify_level(text: &str) -> LogLevel {
    static LEVELS: OnceLock<[(Regex, LogLevel); 4]> = OnceLock::new();
    let levels = LEVELS.get_or_init(|| {
        [
            (
                Regex::new(r"(?i)\b(error|err|fatal|panic|panicked|exception|failed)\b")
                    .expect("valid regex"),
                LogLevel::Error,
            ),
            (
                Regex::new(r"(?i)\b(warn|warning|deprecated)\b").expect("valid regex"),
                LogLevel::Warning,
            ),
            (
                Regex::new(r"(?i)\b(debug|trace)\b").expect("valid regex"),
                LogLevel::Debug,
            ),
            (
                Regex::new(r"(?i)(\b(success|successfully|succeeded|completed|ready)\b|✓|✔)")
                    .expect("valid regex"),
                LogLevel::Success,
            ),
        ]
    });
    levels
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, level)| *level)
        .unwrap_or(LogLevel::Info)
}

/// Splits a leading RFC3339 timestamp (container log style) from the text.
fn split_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    let Some((head, rest)) = line.split_once(' ') else {
        return (None, line);
    };
    match DateTime::parse_from_rfc3339(head) {
        Ok(parsed) => (Some(parsed.with_timezone(&Utc)), rest.trim_start()),
        Err(_) => (None, line),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
