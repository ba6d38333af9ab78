use std::collections::HashSet;
use tether_frames::FrameView;
use tether_logs::LogView;
use tether_session::{EntryKind, SessionPhase, SessionView, TranscriptEntry};
use tokio::sync::watch;

/// Turns successive session snapshots into newly printable lines.
#[derive(Debug, Default)]
pub struct SessionPrinter {
    last_seq: Option<u64>,
    indicator: bool,
    phase: Option<SessionPhase>,
}

impl SessionPrinter {
    pub fn update(&mut self, view: &SessionView) -> Vec<String> {
        let mut out = Vec::new();
        for entry in &view.entries {
            if self.last_seq.is_some_and(|last| entry.seq <= last) {
                continue;
            }
            out.push(format_entry(entry));
            self.last_seq = Some(entry.seq);
        }

        let indicator = view.state.show_working_indicator;
        if indicator && !self.indicator {
            out.push("  … working".to_string());
        }
        self.indicator = indicator;

        let phase = view.state.phase;
        if self.phase.is_some_and(|previous| previous.is_working()) && !phase.is_working() {
            out.push(format!("  ({})", phase.as_str()));
        }
        self.phase = Some(phase);
        out
    }
}

fn format_entry(entry: &TranscriptEntry) -> String {
    match entry.kind {
        EntryKind::User => format!("> {}", entry.text),
        EntryKind::AgentAnswer => entry.text.clone(),
        EntryKind::ToolCall | EntryKind::ToolResult | EntryKind::FileOp | EntryKind::GitOp => {
            format!("  · {}", entry.text)
        }
        EntryKind::Error => format!("! {}", entry.text),
        kind => format!("[{}] {}", kind.as_str(), entry.text),
    }
}

/// Prints log lines whose ids were not in the previous snapshot.
#[derive(Debug, Default)]
pub struct LogPrinter {
    seen: HashSet<String>,
}

impl LogPrinter {
    pub fn update(&mut self, view: &LogView) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = HashSet::with_capacity(view.lines.len());
        for line in &view.lines {
            if !self.seen.contains(&line.id) {
                out.push(if line.is_system_message {
                    format!("log| -- {}", line.text)
                } else {
                    format!("log| {:<7} {}", line.level.as_str(), line.text)
                });
            }
            current.insert(line.id.clone());
        }
        self.seen = current;
        out
    }
}

#[derive(Debug, Default)]
pub struct FramePrinter {
    active: Option<bool>,
    url: Option<String>,
}

impl FramePrinter {
    pub fn update(&mut self, view: &FrameView) -> Vec<String> {
        let mut out = Vec::new();
        if self.active.is_some_and(|active| active != view.session_active) {
            out.push(if view.session_active {
                "[browser] session started".to_string()
            } else {
                "[browser] session ended".to_string()
            });
        }
        self.active = Some(view.session_active);

        if view.current_url != self.url {
            if let Some(url) = &view.current_url {
                out.push(format!("[browser] {url}"));
            }
            self.url = view.current_url.clone();
        }
        out
    }
}

/// Prints engine output until every watched engine has stopped publishing.
pub async fn render_loop(
    mut session: watch::Receiver<SessionView>,
    mut frames: watch::Receiver<FrameView>,
    mut logs: Option<watch::Receiver<LogView>>,
) {
    let mut session_printer = SessionPrinter::default();
    let mut frame_printer = FramePrinter::default();
    let mut log_printer = LogPrinter::default();
    let mut session_open = true;
    let mut frames_open = true;

    loop {
        tokio::select! {
            changed = session.changed(), if session_open => {
                if changed.is_err() {
                    session_open = false;
                    continue;
                }
                let lines = session_printer.update(&session.borrow_and_update());
                emit(lines);
            }
            changed = frames.changed(), if frames_open => {
                if changed.is_err() {
                    frames_open = false;
                    continue;
                }
                let lines = frame_printer.update(&frames.borrow_and_update());
                emit(lines);
            }
            changed = next_log_change(&mut logs), if logs.is_some() => {
                match (changed, logs.as_mut()) {
                    (true, Some(rx)) => {
                        let lines = log_printer.update(&rx.borrow_and_update());
                        emit(lines);
                    }
                    _ => logs = None,
                }
            }
            else => break,
        }
    }
}

async fn next_log_change(logs: &mut Option<watch::Receiver<LogView>>) -> bool {
    match logs.as_mut() {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn emit(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
