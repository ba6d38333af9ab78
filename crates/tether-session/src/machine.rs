use crate::collaborators::{Collaborators, NotificationKind};
use crate::transcript::{EntryKind, EntryPayload, Transcript, DEFAULT_TRANSCRIPT_CAPACITY};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tether_core::envelope::{
    AgentError, AgentStatus, BuildProgress, ChatMessage, DeploymentComplete, FileOperation,
    GitOperation, PlanDecision, PlanProposed, ToolFinished, ToolStarted, WalkthroughReady,
};
use tether_core::{decode_envelope, EventEnvelope, OutboundCommand, StatusPhase};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_INDICATOR_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);
const DEFAULT_APPROVE_COMMENT: &str = "Approved";
const DEFAULT_REJECT_COMMENT: &str = "Rejected";
const TRIVIAL_TOOL_RESULTS: &[&str] = &[
    "",
    "ok",
    "okay",
    "success",
    "succeeded",
    "done",
    "true",
    "null",
    "{}",
    "[]",
    "\"ok\"",
    "{\"ok\":true}",
    "{\"success\":true}",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("no active project")]
    NoActiveProject,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound channel is closed")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub project_id: Option<String>,
    pub session_id: String,
    pub browser_mode: bool,
    pub indicator_delay: Duration,
    pub tick_period: Duration,
    pub transcript_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            session_id: "local".to_string(),
            browser_mode: false,
            indicator_delay: DEFAULT_INDICATOR_DELAY,
            tick_period: DEFAULT_TICK_PERIOD,
            transcript_capacity: DEFAULT_TRANSCRIPT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Working,
    AwaitingApproval,
    /// Idle after a failed task or agent error. Accepts new work exactly
    /// like `Idle`; only the failure stays visible until the next task.
    Error,
}

impl SessionPhase {
    /// A pending plan still counts as working.
    pub fn is_working(self) -> bool {
        matches!(self, Self::Working | Self::AwaitingApproval)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub task_id: Option<String>,
    pub work_started_at: Option<DateTime<Utc>>,
    pub tool_activity_seen: bool,
    pub pending_plan_id: Option<String>,
    pub show_working_indicator: bool,
}

impl SessionState {
    pub fn is_working(&self) -> bool {
        self.phase.is_working()
    }

    pub fn awaiting_approval(&self) -> bool {
        self.phase == SessionPhase::AwaitingApproval
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub applied: u64,
    pub ignored: u64,
    pub decode_errors: u64,
    pub stream_errors: u64,
    pub suppressed_tool_results: u64,
}

pub struct SessionStateMachine {
    config: SessionConfig,
    state: SessionState,
    transcript: Transcript,
    collaborators: Collaborators,
    outbound: mpsc::Sender<OutboundCommand>,
    stats: SessionStats,
}

impl SessionStateMachine {
    pub fn new(
        config: SessionConfig,
        collaborators: Collaborators,
        outbound: mpsc::Sender<OutboundCommand>,
    ) -> Self {
        let transcript = Transcript::with_capacity(config.transcript_capacity);
        Self {
            config,
            state: SessionState::default(),
            transcript,
            collaborators,
            outbound,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn apply_raw(&mut self, value: Value) {
        self.apply_raw_at(value, Utc::now());
    }

    pub fn apply_raw_at(&mut self, value: Value, now: DateTime<Utc>) {
        match decode_envelope(value) {
            Ok(envelope) => self.apply_at(envelope, now),
            Err(err) => {
                self.stats.decode_errors += 1;
                debug!(event = "session_envelope_decode_error", error = %err);
            }
        }
    }

    pub fn apply(&mut self, envelope: EventEnvelope) {
        self.apply_at(envelope, Utc::now());
    }

    pub fn apply_at(&mut self, envelope: EventEnvelope, now: DateTime<Utc>) {
        let kind = envelope.kind();
        match envelope {
            EventEnvelope::TaskQueued(queued) => {
                self.state.task_id = Some(queued.task_id);
                self.enter_working(now);
            }
            EventEnvelope::AgentStatus(status) => self.on_status(status, now),
            EventEnvelope::ChatMessage(message) if message.is_user() => {
                self.ignore(kind);
                return;
            }
            EventEnvelope::ChatMessage(message) => self.on_answer(message, now),
            EventEnvelope::ToolStarted(started) => self.on_tool_started(started, now),
            EventEnvelope::ToolFinished(finished) => self.on_tool_finished(finished, now),
            EventEnvelope::FileOperation(operation) => self.on_file_operation(operation, now),
            EventEnvelope::GitOperation(operation) => self.on_git_operation(operation, now),
            EventEnvelope::BuildProgress(progress) => self.on_build_progress(progress, now),
            EventEnvelope::DeploymentComplete(deployment) => self.on_deployment(deployment, now),
            EventEnvelope::Error(error) => self.on_error(error, now),
            EventEnvelope::PlanProposed(plan) => self.on_plan_proposed(plan, now),
            EventEnvelope::PlanApproved(decision) => self.on_plan_approved(decision, now),
            EventEnvelope::PlanRejected(decision) => self.on_plan_rejected(decision, now),
            EventEnvelope::WalkthroughReady(walkthrough) => self.on_walkthrough(walkthrough, now),
            EventEnvelope::UserMessage(_)
            | EventEnvelope::BrowserFrame(_)
            | EventEnvelope::BrowserUrlChanged(_)
            | EventEnvelope::BrowserSessionStarted(_)
            | EventEnvelope::BrowserSessionEnded(_)
            | EventEnvelope::Unknown => {
                self.ignore(kind);
                return;
            }
        }
        self.stats.applied += 1;
    }

    /// Transport-level failure of the envelope source. Existing state is kept.
    pub fn record_stream_error(&mut self, reason: &str) {
        self.stats.stream_errors += 1;
        warn!(
            event = "session_stream_error",
            reason,
            errors = self.stats.stream_errors
        );
    }

    pub fn tick(&mut self) -> bool {
        self.tick_at(Utc::now())
    }

    /// Recomputes the working indicator. Returns true when it changed.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> bool {
        let show = self.working_indicator_at(now);
        let changed = show != self.state.show_working_indicator;
        self.state.show_working_indicator = show;
        changed
    }

    pub fn send_message(&mut self, text: &str) -> Result<bool, CommandError> {
        self.send_message_at(text, Utc::now())
    }

    pub fn send_message_at(&mut self, text: &str, now: DateTime<Utc>) -> Result<bool, CommandError> {
        let message = text.trim();
        if message.is_empty() || self.state.is_working() {
            return Ok(false);
        }
        self.transcript.push(EntryKind::User, message, None, now);

        let Some(project_id) = self.config.project_id.clone() else {
            return Err(self.command_failed("Message not sent", CommandError::NoActiveProject));
        };
        let command = OutboundCommand::UserMessage {
            message: message.to_string(),
            project_id,
            browser_mode: self.config.browser_mode,
            session_id: self.config.session_id.clone(),
        };
        if let Err(err) = self.emit(command) {
            return Err(self.command_failed("Message not sent", err));
        }
        self.enter_working(now);
        Ok(true)
    }

    /// Clears working state immediately; the remote stop is fire-and-forget.
    pub fn stop_task(&mut self) -> bool {
        if !self.state.is_working() {
            return false;
        }
        let task_id = self.state.task_id.clone();
        self.transcript.remove_placeholder();
        self.reset(SessionPhase::Idle);
        info!(
            event = "session_stop_requested",
            task_id = task_id.as_deref().unwrap_or_default()
        );

        if self.config.browser_mode {
            if let Err(err) = self.emit(OutboundCommand::StopBrowserAgent) {
                debug!(event = "session_browser_stop_skipped", error = %err);
            }
        }
        self.dispatch_remote_stop(task_id);
        true
    }

    pub fn approve_plan(&mut self, comment: Option<&str>) -> Result<bool, CommandError> {
        let Some(plan_id) = self.state.pending_plan_id.take() else {
            return Ok(false);
        };
        self.state.phase = SessionPhase::Working;
        self.emit_plan_decision(plan_id, true, comment, DEFAULT_APPROVE_COMMENT)?;
        Ok(true)
    }

    /// Leaves the transcript alone; the `planRejected` event records the
    /// outcome and drops any open placeholder.
    pub fn reject_plan(&mut self, comment: Option<&str>) -> Result<bool, CommandError> {
        let Some(plan_id) = self.state.pending_plan_id.take() else {
            return Ok(false);
        };
        self.reset(SessionPhase::Idle);
        self.emit_plan_decision(plan_id, false, comment, DEFAULT_REJECT_COMMENT)?;
        Ok(true)
    }

    fn emit_plan_decision(
        &mut self,
        plan_id: String,
        approved: bool,
        comment: Option<&str>,
        default_comment: &str,
    ) -> Result<(), CommandError> {
        let comment = comment
            .map(str::trim)
            .filter(|comment| !comment.is_empty())
            .unwrap_or(default_comment)
            .to_string();
        let command = OutboundCommand::PlanApproval {
            plan_id,
            approved,
            comment,
        };
        self.emit(command)
            .map_err(|err| self.command_failed("Plan decision not sent", err))
    }

    fn on_status(&mut self, status: AgentStatus, now: DateTime<Utc>) {
        let phase = status.phase();
        match phase {
            StatusPhase::Started | StatusPhase::Thinking | StatusPhase::Planning => {
                let text = non_empty(status.message).unwrap_or_else(|| placeholder_text(phase));
                self.transcript.open_placeholder_with(text, now);
                if let Some(task_id) = status.task_id {
                    self.state.task_id = Some(task_id);
                }
                self.enter_working(now);
            }
            StatusPhase::Completed | StatusPhase::Stopped => {
                self.transcript.remove_placeholder();
                self.reset(SessionPhase::Idle);
            }
            StatusPhase::Failed => {
                self.transcript.remove_placeholder();
                let text = non_empty(status.message).unwrap_or_else(|| "Task failed".to_string());
                self.transcript.push(
                    EntryKind::Error,
                    text.clone(),
                    Some(EntryPayload::Error { code: None }),
                    now,
                );
                self.reset(SessionPhase::Error);
                self.collaborators
                    .notify("Task failed", &text, NotificationKind::Error);
            }
            StatusPhase::Other => {
                self.transcript.resolve_placeholder();
                let text = non_empty(status.message).unwrap_or(status.status);
                self.transcript.push(EntryKind::AgentStatus, text, None, now);
            }
        }
    }

    fn on_answer(&mut self, message: ChatMessage, now: DateTime<Utc>) {
        self.transcript.remove_placeholder();
        self.transcript
            .push(EntryKind::AgentAnswer, message.content, None, now);
        self.reset(SessionPhase::Idle);
    }

    fn on_tool_started(&mut self, started: ToolStarted, now: DateTime<Utc>) {
        self.state.tool_activity_seen = true;
        self.transcript.resolve_placeholder();
        let text = non_empty(started.message).unwrap_or_else(|| format!("Running {}", started.tool));
        self.transcript.push(
            EntryKind::ToolCall,
            text,
            Some(EntryPayload::Tool {
                name: started.tool,
                input: started.input,
            }),
            now,
        );
    }

    fn on_tool_finished(&mut self, finished: ToolFinished, now: DateTime<Utc>) {
        self.state.tool_activity_seen = true;
        let result = finished.result_text();
        if finished.success != Some(false) && is_trivial_tool_result(&result) {
            self.stats.suppressed_tool_results += 1;
            return;
        }
        self.transcript.resolve_placeholder();
        let text = if result.trim().is_empty() {
            format!("{} failed", finished.tool)
        } else {
            result.clone()
        };
        self.transcript.push(
            EntryKind::ToolResult,
            text,
            Some(EntryPayload::ToolResult {
                name: finished.tool,
                result,
                success: finished.success,
            }),
            now,
        );
    }

    fn on_file_operation(&mut self, operation: FileOperation, now: DateTime<Utc>) {
        self.state.tool_activity_seen = true;
        self.transcript.resolve_placeholder();
        let text = non_empty(operation.message)
            .unwrap_or_else(|| format!("{} {}", operation.operation, operation.path));
        self.transcript.push(
            EntryKind::FileOp,
            text,
            Some(EntryPayload::File {
                operation: operation.operation,
                path: operation.path,
            }),
            now,
        );
    }

    fn on_git_operation(&mut self, operation: GitOperation, now: DateTime<Utc>) {
        self.state.tool_activity_seen = true;
        self.transcript.resolve_placeholder();
        let text = non_empty(operation.message).unwrap_or_else(|| match &operation.branch {
            Some(branch) => format!("git {} ({branch})", operation.operation),
            None => format!("git {}", operation.operation),
        });
        self.transcript.push(
            EntryKind::GitOp,
            text,
            Some(EntryPayload::Git {
                operation: operation.operation,
                branch: operation.branch,
                commit: operation.commit,
            }),
            now,
        );
    }

    fn on_build_progress(&mut self, progress: BuildProgress, now: DateTime<Utc>) {
        self.transcript.resolve_placeholder();
        let value = progress.clamped_progress();
        let text = non_empty(progress.message.clone())
            .unwrap_or_else(|| format!("{} {:.0}%", progress.stage, value * 100.0));
        if let Some(build) = &self.collaborators.build {
            build.progress(&progress.stage, value);
        }
        self.transcript.push(
            EntryKind::BuildProgress,
            text,
            Some(EntryPayload::Build {
                stage: progress.stage,
                progress: value,
            }),
            now,
        );
    }

    fn on_deployment(&mut self, deployment: DeploymentComplete, now: DateTime<Utc>) {
        self.transcript.remove_placeholder();
        let url = non_empty(deployment.url);
        let text = non_empty(deployment.message).unwrap_or_else(|| match &url {
            Some(url) => format!("Deployed to {url}"),
            None => "Deployment complete".to_string(),
        });
        self.transcript.push(
            EntryKind::DeployDone,
            text.clone(),
            Some(EntryPayload::Deploy { url: url.clone() }),
            now,
        );
        self.reset(SessionPhase::Idle);
        if let (Some(build), Some(url)) = (&self.collaborators.build, url.as_deref()) {
            build.preview_ready(url);
        }
        self.collaborators
            .notify("Deployment complete", &text, NotificationKind::Success);
    }

    fn on_error(&mut self, error: AgentError, now: DateTime<Utc>) {
        self.transcript.remove_placeholder();
        self.transcript.push(
            EntryKind::Error,
            error.message.clone(),
            Some(EntryPayload::Error { code: error.code }),
            now,
        );
        self.reset(SessionPhase::Error);
        self.collaborators
            .notify("Agent error", &error.message, NotificationKind::Error);
    }

    fn on_plan_proposed(&mut self, plan: PlanProposed, now: DateTime<Utc>) {
        self.transcript.resolve_placeholder();
        self.transcript.push(
            EntryKind::Plan,
            "Plan ready for review",
            Some(EntryPayload::Plan {
                plan_id: Some(plan.plan_id.clone()),
                markdown: Some(plan.plan.clone()),
            }),
            now,
        );
        self.state.work_started_at.get_or_insert(now);
        self.state.pending_plan_id = Some(plan.plan_id.clone());
        self.state.phase = SessionPhase::AwaitingApproval;
        self.state.show_working_indicator = false;
        if let Some(review) = &self.collaborators.plan_review {
            review.present(&plan.plan_id, &plan.plan, plan.user_request.as_deref());
        }
    }

    fn on_plan_approved(&mut self, decision: PlanDecision, now: DateTime<Utc>) {
        let text = match non_empty(decision.comment) {
            Some(comment) => format!("Plan approved: {comment}"),
            None => "Plan approved".to_string(),
        };
        self.transcript.push(
            EntryKind::Plan,
            text,
            Some(EntryPayload::Plan {
                plan_id: decision.plan_id,
                markdown: None,
            }),
            now,
        );
        self.state.pending_plan_id = None;
        self.state.phase = SessionPhase::Working;
        self.state.work_started_at.get_or_insert(now);
    }

    fn on_plan_rejected(&mut self, decision: PlanDecision, now: DateTime<Utc>) {
        self.transcript.remove_placeholder();
        let text = match non_empty(decision.comment) {
            Some(comment) => format!("Plan rejected: {comment}"),
            None => "Plan rejected".to_string(),
        };
        self.transcript.push(
            EntryKind::Plan,
            text,
            Some(EntryPayload::Plan {
                plan_id: decision.plan_id,
                markdown: None,
            }),
            now,
        );
        self.reset(SessionPhase::Idle);
    }

    fn on_walkthrough(&mut self, walkthrough: WalkthroughReady, now: DateTime<Utc>) {
        let text = non_empty(walkthrough.title.clone())
            .unwrap_or_else(|| "Walkthrough ready".to_string());
        self.transcript.push(
            EntryKind::Walkthrough,
            text,
            Some(EntryPayload::Walkthrough {
                walkthrough_id: walkthrough.walkthrough_id.clone(),
                url: walkthrough.url.clone(),
            }),
            now,
        );
        if let Some(navigator) = &self.collaborators.navigator {
            navigator.open_walkthrough(
                walkthrough.walkthrough_id.as_deref(),
                walkthrough.url.as_deref(),
            );
        }
    }

    fn ignore(&mut self, kind: &'static str) {
        self.stats.ignored += 1;
        debug!(event = "session_envelope_ignored", kind);
    }

    fn enter_working(&mut self, now: DateTime<Utc>) {
        if !self.state.is_working() {
            self.state.phase = SessionPhase::Working;
        }
        self.state.work_started_at.get_or_insert(now);
    }

    fn reset(&mut self, phase: SessionPhase) {
        self.state.phase = phase;
        self.state.task_id = None;
        self.state.work_started_at = None;
        self.state.tool_activity_seen = false;
        self.state.pending_plan_id = None;
        self.state.show_working_indicator = false;
    }

    fn working_indicator_at(&self, now: DateTime<Utc>) -> bool {
        if !self.state.is_working() || self.state.awaiting_approval() {
            return false;
        }
        let Some(started) = self.state.work_started_at else {
            return false;
        };
        if self.state.tool_activity_seen {
            return true;
        }
        let delay = chrono::Duration::from_std(self.config.indicator_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());
        now.signed_duration_since(started) >= delay
    }

    fn emit(&self, command: OutboundCommand) -> Result<(), CommandError> {
        let kind = command.kind();
        match self.outbound.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "session_outbound_drop",
                    reason = "queue_full",
                    command = kind
                );
                Err(CommandError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    event = "session_outbound_drop",
                    reason = "channel_closed",
                    command = kind
                );
                Err(CommandError::ChannelClosed)
            }
        }
    }

    fn command_failed(&self, title: &str, err: CommandError) -> CommandError {
        self.collaborators
            .notify(title, &err.to_string(), NotificationKind::Error);
        err
    }

    fn dispatch_remote_stop(&self, task_id: Option<String>) {
        let (Some(stopper), Some(project_id), Some(task_id)) = (
            self.collaborators.task_stopper.as_ref(),
            self.config.project_id.as_deref(),
            task_id,
        ) else {
            return;
        };
        let request = stopper.stop(project_id, &task_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match request.await {
                        Ok(()) => debug!(event = "session_remote_stop_ok", task_id = %task_id),
                        Err(err) => warn!(
                            event = "session_remote_stop_failed",
                            task_id = %task_id,
                            error = %err
                        ),
                    }
                });
            }
            Err(_) => warn!(
                event = "session_remote_stop_skipped",
                reason = "no_runtime",
                task_id = %task_id
            ),
        }
    }
}

fn placeholder_text(phase: StatusPhase) -> String {
    match phase {
        StatusPhase::Planning => "Planning…".to_string(),
        _ => "Thinking…".to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn is_trivial_tool_result(result: &str) -> bool {
    let normalized = result.trim().to_ascii_lowercase();
    TRIVIAL_TOOL_RESULTS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        BuildSurface, CollaboratorError, Navigator, Notifier, PlanReviewSurface, TaskStopper,
    };
    use chrono::TimeZone;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, call: String) {
            self.calls.lock().expect("lock").push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl BuildSurface for Recorder {
        fn progress(&self, stage: &str, progress: f64) {
            self.record(format!("progress:{stage}:{progress}"));
        }

        fn preview_ready(&self, url: &str) {
            self.record(format!("preview:{url}"));
        }
    }

    impl PlanReviewSurface for Recorder {
        fn present(&self, plan_id: &str, _markdown: &str, user_request: Option<&str>) {
            self.record(format!("plan:{plan_id}:{}", user_request.unwrap_or("-")));
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, title: &str, _body: &str, kind: NotificationKind) {
            self.record(format!("notify:{}:{title}", kind.as_str()));
        }
    }

    impl Navigator for Recorder {
        fn open_walkthrough(&self, walkthrough_id: Option<&str>, _url: Option<&str>) {
            self.record(format!("walkthrough:{}", walkthrough_id.unwrap_or("-")));
        }
    }

    struct NeverStopper;

    impl TaskStopper for NeverStopper {
        fn stop(&self, _: &str, _: &str) -> BoxFuture<'static, Result<(), CollaboratorError>> {
            Box::pin(futures_util::future::pending())
        }
    }

    struct FailingStopper {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TaskStopper for FailingStopper {
        fn stop(
            &self,
            project_id: &str,
            task_id: &str,
        ) -> BoxFuture<'static, Result<(), CollaboratorError>> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("{project_id}/{task_id}"));
            Box::pin(async { Err(CollaboratorError::Rejected { status: 500 }) })
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn build(
        project_id: Option<&str>,
    ) -> (
        SessionStateMachine,
        mpsc::Receiver<OutboundCommand>,
        Arc<Recorder>,
    ) {
        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators::default()
            .with_build(recorder.clone())
            .with_plan_review(recorder.clone())
            .with_notifier(recorder.clone())
            .with_navigator(recorder.clone());
        let (tx, rx) = mpsc::channel(8);
        let config = SessionConfig {
            project_id: project_id.map(ToString::to_string),
            session_id: "sess-1".to_string(),
            ..SessionConfig::default()
        };
        (SessionStateMachine::new(config, collaborators, tx), rx, recorder)
    }

    fn apply(machine: &mut SessionStateMachine, value: Value, secs: i64) {
        machine.apply_raw_at(value, at(secs));
    }

    fn placeholder_count(machine: &SessionStateMachine) -> usize {
        machine
            .transcript()
            .entries()
            .filter(|entry| entry.kind == EntryKind::AgentStatus)
            .count()
    }

    #[test]
    fn busy_statuses_open_at_most_one_placeholder() {
        let (mut machine, _rx, _) = build(Some("proj"));
        for (index, status) in ["started", "thinking", "planning", "thinking"]
            .iter()
            .enumerate()
        {
            apply(
                &mut machine,
                json!({"type": "agentStatus", "status": status}),
                index as i64,
            );
            assert_eq!(placeholder_count(&machine), 1);
        }
        assert_eq!(machine.transcript().len(), 1);
        assert_eq!(machine.state().phase, SessionPhase::Working);
        assert_eq!(machine.state().work_started_at, Some(at(0)));
    }

    #[test]
    fn completed_removes_placeholder_without_appending() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-1"}), 0);
        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 1);
        assert_eq!(machine.transcript().len(), 1);

        apply(&mut machine, json!({"type": "agentStatus", "status": "stopped"}), 2);
        assert!(machine.transcript().is_empty());
        assert_eq!(machine.state(), &SessionState::default());
    }

    #[test]
    fn failed_status_is_never_swallowed() {
        let (mut machine, _rx, recorder) = build(Some("proj"));
        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 0);
        apply(
            &mut machine,
            json!({"type": "agentStatus", "status": "failed", "message": "compile error"}),
            1,
        );
        let entries = machine.transcript().entries().collect::<Vec<_>>();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Error);
        assert_eq!(entries[0].text, "compile error");
        assert_eq!(machine.state().phase, SessionPhase::Error);
        assert!(!machine.state().is_working());
        assert_eq!(recorder.calls(), vec!["notify:error:Task failed".to_string()]);
    }

    #[test]
    fn error_phase_accepts_new_work_like_idle() {
        let (mut machine, mut rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-1"}), 0);
        apply(&mut machine, json!({"type": "agentError", "message": "sandbox crashed"}), 1);
        assert_eq!(machine.state().phase, SessionPhase::Error);
        assert_eq!(
            machine.state(),
            &SessionState {
                phase: SessionPhase::Error,
                ..SessionState::default()
            }
        );
        assert!(!machine.stop_task());

        assert_eq!(machine.send_message_at("try again", at(2)), Ok(true));
        assert_eq!(machine.state().phase, SessionPhase::Working);
        assert!(matches!(
            rx.try_recv(),
            Ok(OutboundCommand::UserMessage { .. })
        ));
        assert_eq!(
            machine.transcript().last().map(|entry| entry.kind),
            Some(EntryKind::User)
        );
    }

    #[test]
    fn other_status_is_appended_verbatim() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "agentStatus", "status": "indexing"}), 0);
        let last = machine.transcript().last().expect("entry");
        assert_eq!(last.text, "indexing");
        assert_eq!(machine.state().phase, SessionPhase::Idle);
    }

    #[test]
    fn trivial_tool_results_are_suppressed() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "toolResult", "tool": "write_file", "result": "OK"}), 0);
        apply(&mut machine, json!({"type": "toolResult", "tool": "write_file"}), 1);
        assert!(machine.transcript().is_empty());
        assert_eq!(machine.stats().suppressed_tool_results, 2);
        assert!(machine.state().tool_activity_seen);

        apply(
            &mut machine,
            json!({"type": "toolResult", "tool": "run_tests", "success": false}),
            2,
        );
        let last = machine.transcript().last().expect("failure entry");
        assert_eq!(last.kind, EntryKind::ToolResult);
        assert_eq!(last.text, "run_tests failed");
    }

    #[test]
    fn chat_answer_returns_to_idle_and_user_echo_is_ignored() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "taskQueued", "taskId": "t-9"}), 0);
        apply(&mut machine, json!({"type": "chatMessage", "role": "user", "content": "hi"}), 1);
        assert!(machine.transcript().is_empty());
        assert!(machine.state().is_working());

        apply(&mut machine, json!({"type": "chatMessage", "content": "All done."}), 2);
        assert_eq!(machine.state().phase, SessionPhase::Idle);
        assert_eq!(machine.state().task_id, None);
        assert_eq!(
            machine.transcript().last().map(|entry| entry.kind),
            Some(EntryKind::AgentAnswer)
        );
    }

    #[test]
    fn plan_lifecycle_keeps_working_while_awaiting_approval() {
        let (mut machine, mut rx, recorder) = build(Some("proj"));
        apply(
            &mut machine,
            json!({"type": "planProposed", "plan_id": "p-1", "plan": "# Plan", "user_request": "add auth"}),
            0,
        );
        assert!(machine.state().awaiting_approval());
        assert!(machine.state().is_working());
        assert!(!machine.tick_at(at(30)));
        assert!(!machine.state().show_working_indicator);
        assert_eq!(recorder.calls(), vec!["plan:p-1:add auth".to_string()]);

        assert_eq!(machine.approve_plan(None), Ok(true));
        assert_eq!(machine.state().phase, SessionPhase::Working);
        assert_eq!(machine.state().pending_plan_id, None);
        assert_eq!(
            rx.try_recv().expect("approval"),
            OutboundCommand::PlanApproval {
                plan_id: "p-1".to_string(),
                approved: true,
                comment: "Approved".to_string(),
            }
        );
        assert_eq!(machine.approve_plan(None), Ok(false));
    }

    #[test]
    fn reject_plan_returns_to_idle_with_comment() {
        let (mut machine, mut rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "planProposed", "planId": "p-2"}), 0);
        assert_eq!(machine.reject_plan(Some("  too broad ")), Ok(true));
        assert_eq!(machine.state().phase, SessionPhase::Idle);
        match rx.try_recv().expect("rejection") {
            OutboundCommand::PlanApproval {
                approved, comment, ..
            } => {
                assert!(!approved);
                assert_eq!(comment, "too broad");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn reject_plan_leaves_transcript_to_the_inbound_event() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "planProposed", "plan_id": "p-5"}), 0);
        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 1);
        let before = machine.transcript().entries().cloned().collect::<Vec<_>>();
        assert_eq!(before.len(), 2);
        assert!(machine.transcript().has_open_placeholder());

        assert_eq!(machine.reject_plan(None), Ok(true));
        let after = machine.transcript().entries().cloned().collect::<Vec<_>>();
        assert_eq!(after, before);
        assert!(machine.transcript().has_open_placeholder());
        assert!(!machine.state().is_working());

        apply(&mut machine, json!({"type": "planRejected", "plan_id": "p-5"}), 2);
        assert!(!machine.transcript().has_open_placeholder());
        let texts = machine
            .transcript()
            .entries()
            .map(|entry| entry.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["Plan ready for review", "Plan rejected"]);
    }

    #[test]
    fn inbound_plan_events_update_bookkeeping() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "planProposed", "plan_id": "p-3"}), 0);
        apply(&mut machine, json!({"type": "planApproved", "plan_id": "p-3"}), 1);
        assert_eq!(machine.state().phase, SessionPhase::Working);
        assert_eq!(machine.state().pending_plan_id, None);

        apply(&mut machine, json!({"type": "planProposed", "plan_id": "p-4"}), 2);
        apply(&mut machine, json!({"type": "planRejected", "plan_id": "p-4"}), 3);
        assert_eq!(machine.state().phase, SessionPhase::Idle);
        assert_eq!(machine.transcript().len(), 4);
    }

    #[test]
    fn awaiting_approval_implies_working_across_mixed_script() {
        let (mut machine, _rx, _) = build(Some("proj"));
        let script = vec![
            json!({"type": "taskQueued", "task_id": "t-1"}),
            json!({"type": "agentStatus", "status": "planning"}),
            json!({"type": "planProposed", "plan_id": "p-1"}),
            json!({"type": "agentStatus", "status": "thinking"}),
            json!({"type": "toolExecution", "tool": "read_file"}),
            json!({"type": "planApproved", "plan_id": "p-1"}),
            json!({"type": "planProposed", "plan_id": "p-2"}),
            json!({"type": "error", "message": "boom"}),
            json!({"type": "planProposed", "plan_id": "p-3"}),
            json!({"type": "agentStatus", "status": "completed"}),
        ];
        for (index, value) in script.into_iter().enumerate() {
            apply(&mut machine, value, index as i64);
            let state = machine.state();
            if state.awaiting_approval() {
                assert!(state.is_working());
            }
            if state.task_id.is_some() {
                assert!(state.is_working());
            }
        }
        assert_eq!(machine.state().phase, SessionPhase::Idle);
    }

    #[test]
    fn working_indicator_waits_for_delay_or_tool_activity() {
        let (mut machine, _rx, _) = build(Some("proj"));
        assert!(!machine.tick_at(at(0)));

        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 0);
        machine.tick_at(at(1));
        assert!(!machine.state().show_working_indicator);
        assert!(machine.tick_at(at(2)));
        assert!(machine.state().show_working_indicator);

        apply(&mut machine, json!({"type": "agentStatus", "status": "completed"}), 3);
        machine.tick_at(at(4));
        assert!(!machine.state().show_working_indicator);

        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-2"}), 10);
        apply(&mut machine, json!({"type": "toolExecution", "tool": "ls"}), 10);
        assert!(machine.tick_at(at(10)));
        assert!(machine.state().show_working_indicator);
    }

    #[test]
    fn send_message_guards_and_emits() {
        let (mut machine, mut rx, _) = build(Some("proj"));
        assert_eq!(machine.send_message_at("   ", at(0)), Ok(false));
        assert!(machine.transcript().is_empty());

        assert_eq!(machine.send_message_at("build a todo app", at(0)), Ok(true));
        assert_eq!(machine.transcript().len(), 1);
        assert_eq!(machine.state().phase, SessionPhase::Working);
        assert_eq!(
            rx.try_recv().expect("command"),
            OutboundCommand::UserMessage {
                message: "build a todo app".to_string(),
                project_id: "proj".to_string(),
                browser_mode: false,
                session_id: "sess-1".to_string(),
            }
        );

        assert_eq!(machine.send_message_at("second", at(1)), Ok(false));
        assert_eq!(machine.transcript().len(), 1);
    }

    #[test]
    fn send_message_without_project_keeps_text_and_notifies() {
        let (mut machine, mut rx, recorder) = build(None);
        assert_eq!(
            machine.send_message_at("hello", at(0)),
            Err(CommandError::NoActiveProject)
        );
        assert_eq!(machine.transcript().len(), 1);
        assert_eq!(machine.state().phase, SessionPhase::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            recorder.calls(),
            vec!["notify:error:Message not sent".to_string()]
        );
    }

    #[test]
    fn send_message_reports_closed_transport() {
        let (mut machine, rx, recorder) = build(Some("proj"));
        drop(rx);
        assert_eq!(
            machine.send_message_at("hello", at(0)),
            Err(CommandError::ChannelClosed)
        );
        assert!(!machine.state().is_working());
        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn stop_task_is_instant_even_if_remote_never_answers() {
        let (tx, _rx) = mpsc::channel(8);
        let config = SessionConfig {
            project_id: Some("proj".to_string()),
            ..SessionConfig::default()
        };
        let collaborators = Collaborators::default().with_task_stopper(Arc::new(NeverStopper));
        let mut machine = SessionStateMachine::new(config, collaborators, tx);
        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-1"}), 0);
        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 0);
        apply(&mut machine, json!({"type": "toolExecution", "tool": "ls"}), 0);
        machine.tick_at(at(1));
        assert!(machine.state().show_working_indicator);

        assert!(machine.stop_task());
        assert!(!machine.state().is_working());
        assert!(!machine.state().show_working_indicator);
        assert_eq!(machine.state().task_id, None);
        assert!(!machine.transcript().has_open_placeholder());
        assert!(!machine.stop_task());
    }

    #[tokio::test]
    async fn failed_remote_stop_never_reopens_working_state() {
        let (tx, _rx) = mpsc::channel(8);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = SessionConfig {
            project_id: Some("proj".to_string()),
            browser_mode: true,
            ..SessionConfig::default()
        };
        let collaborators = Collaborators::default().with_task_stopper(Arc::new(FailingStopper {
            calls: calls.clone(),
        }));
        let mut machine = SessionStateMachine::new(config, collaborators, tx);
        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-7"}), 0);
        assert!(machine.stop_task());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.lock().expect("lock").clone(), vec!["proj/t-7".to_string()]);
        assert_eq!(machine.state().phase, SessionPhase::Idle);
    }

    #[test]
    fn stop_task_emits_browser_stop_in_browser_mode() {
        let (tx, mut rx) = mpsc::channel(8);
        let config = SessionConfig {
            project_id: Some("proj".to_string()),
            browser_mode: true,
            ..SessionConfig::default()
        };
        let mut machine = SessionStateMachine::new(config, Collaborators::default(), tx);
        apply(&mut machine, json!({"type": "agentStatus", "status": "started"}), 0);
        assert!(machine.stop_task());
        assert_eq!(rx.try_recv().expect("stop"), OutboundCommand::StopBrowserAgent);
    }

    #[test]
    fn deployment_and_errors_reset_and_notify() {
        let (mut machine, _rx, recorder) = build(Some("proj"));
        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-1"}), 0);
        apply(&mut machine, json!({"type": "buildProgress", "stage": "bundle", "progress": 0.5}), 1);
        apply(
            &mut machine,
            json!({"type": "deploymentComplete", "url": "https://preview.dev"}),
            2,
        );
        assert_eq!(machine.state().phase, SessionPhase::Idle);
        assert_eq!(
            recorder.calls(),
            vec![
                "progress:bundle:0.5".to_string(),
                "preview:https://preview.dev".to_string(),
                "notify:success:Deployment complete".to_string(),
            ]
        );

        apply(&mut machine, json!({"type": "taskQueued", "task_id": "t-2"}), 3);
        apply(&mut machine, json!({"type": "error", "message": "quota exceeded"}), 4);
        assert_eq!(machine.state().phase, SessionPhase::Error);
        assert_eq!(machine.state().task_id, None);
        assert_eq!(
            machine.transcript().last().map(|entry| entry.text.as_str()),
            Some("quota exceeded")
        );
    }

    #[test]
    fn walkthrough_triggers_navigation() {
        let (mut machine, _rx, recorder) = build(Some("proj"));
        apply(
            &mut machine,
            json!({"type": "walkthroughReady", "walkthrough_id": "w-1"}),
            0,
        );
        assert_eq!(recorder.calls(), vec!["walkthrough:w-1".to_string()]);
        assert_eq!(
            machine.transcript().last().map(|entry| entry.kind),
            Some(EntryKind::Walkthrough)
        );
    }

    #[test]
    fn unknown_malformed_and_browser_events_are_ignored() {
        let (mut machine, _rx, _) = build(Some("proj"));
        apply(&mut machine, json!({"type": "agentStatus", "status": "thinking"}), 0);
        apply(&mut machine, json!({"type": "somethingNew", "x": 1}), 1);
        apply(&mut machine, json!({"type": "browserFrame", "data": "AAAA"}), 1);
        apply(&mut machine, json!({"no_type": true}), 1);
        apply(&mut machine, json!({"type": "toolExecution"}), 1);
        machine.record_stream_error("connection reset");

        assert_eq!(machine.transcript().len(), 1);
        assert!(machine.state().is_working());
        let stats = machine.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.stream_errors, 1);
    }
}
