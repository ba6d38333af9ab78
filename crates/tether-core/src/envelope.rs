use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("envelope is not valid json: {0}")]
    Json(String),
    #[error("envelope is not a json object")]
    NotAnObject,
    #[error("envelope has no type discriminator")]
    MissingType,
    #[error("malformed {kind} envelope: {reason}")]
    Malformed { kind: String, reason: String },
}

/// One decoded unit from the agent event stream.
///
/// Every recognised `type` is accepted in camelCase and snake_case. Anything
/// else lands in [`EventEnvelope::Unknown`], which all engines ignore.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum EventEnvelope {
    #[serde(
        rename = "taskQueued",
        alias = "task_queued",
        alias = "taskAccepted",
        alias = "task_accepted"
    )]
    TaskQueued(TaskQueued),
    #[serde(rename = "agentStatus", alias = "agent_status", alias = "status")]
    AgentStatus(AgentStatus),
    #[serde(rename = "chatMessage", alias = "chat_message", alias = "agentResponse")]
    ChatMessage(ChatMessage),
    #[serde(rename = "userMessage", alias = "user_message")]
    UserMessage(UserMessage),
    #[serde(
        rename = "toolExecution",
        alias = "tool_execution",
        alias = "toolStarted",
        alias = "tool_started"
    )]
    ToolStarted(ToolStarted),
    #[serde(
        rename = "toolResult",
        alias = "tool_result",
        alias = "toolFinished",
        alias = "tool_finished"
    )]
    ToolFinished(ToolFinished),
    #[serde(rename = "fileOperation", alias = "file_operation")]
    FileOperation(FileOperation),
    #[serde(rename = "gitOperation", alias = "git_operation")]
    GitOperation(GitOperation),
    #[serde(rename = "buildProgress", alias = "build_progress")]
    BuildProgress(BuildProgress),
    #[serde(rename = "deploymentComplete", alias = "deployment_complete")]
    DeploymentComplete(DeploymentComplete),
    #[serde(rename = "planProposed", alias = "plan_proposed")]
    PlanProposed(PlanProposed),
    #[serde(rename = "planApproved", alias = "plan_approved")]
    PlanApproved(PlanDecision),
    #[serde(rename = "planRejected", alias = "plan_rejected")]
    PlanRejected(PlanDecision),
    #[serde(rename = "walkthroughReady", alias = "walkthrough_ready")]
    WalkthroughReady(WalkthroughReady),
    #[serde(rename = "error", alias = "agentError", alias = "agent_error")]
    Error(AgentError),
    #[serde(rename = "browserFrame", alias = "browser_frame", alias = "screencastFrame")]
    BrowserFrame(BrowserFrame),
    #[serde(rename = "browserUrlChanged", alias = "browser_url_changed")]
    BrowserUrlChanged(BrowserUrlChanged),
    #[serde(rename = "browserSessionStarted", alias = "browser_session_started")]
    BrowserSessionStarted(BrowserLifecycle),
    #[serde(rename = "browserSessionEnded", alias = "browser_session_ended")]
    BrowserSessionEnded(BrowserLifecycle),
    #[serde(other)]
    Unknown,
}

impl EventEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskQueued(_) => "task_queued",
            Self::AgentStatus(_) => "agent_status",
            Self::ChatMessage(_) => "chat_message",
            Self::UserMessage(_) => "user_message",
            Self::ToolStarted(_) => "tool_started",
            Self::ToolFinished(_) => "tool_finished",
            Self::FileOperation(_) => "file_operation",
            Self::GitOperation(_) => "git_operation",
            Self::BuildProgress(_) => "build_progress",
            Self::DeploymentComplete(_) => "deployment_complete",
            Self::PlanProposed(_) => "plan_proposed",
            Self::PlanApproved(_) => "plan_approved",
            Self::PlanRejected(_) => "plan_rejected",
            Self::WalkthroughReady(_) => "walkthrough_ready",
            Self::Error(_) => "error",
            Self::BrowserFrame(_) => "browser_frame",
            Self::BrowserUrlChanged(_) => "browser_url_changed",
            Self::BrowserSessionStarted(_) => "browser_session_started",
            Self::BrowserSessionEnded(_) => "browser_session_ended",
            Self::Unknown => "unknown",
        }
    }

    /// Envelopes consumed by the frame engine rather than the session engine.
    pub fn is_browser_stream(&self) -> bool {
        matches!(
            self,
            Self::BrowserFrame(_)
                | Self::BrowserUrlChanged(_)
                | Self::BrowserSessionStarted(_)
                | Self::BrowserSessionEnded(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskQueued {
    #[serde(alias = "taskId")]
    pub task_id: String,
    #[serde(default, alias = "queuePosition")]
    pub queue_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
}

impl AgentStatus {
    pub fn phase(&self) -> StatusPhase {
        StatusPhase::parse(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPhase {
    Started,
    Thinking,
    Planning,
    Completed,
    Stopped,
    Failed,
    Other,
}

impl StatusPhase {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "started" | "start" | "running" => Self::Started,
            "thinking" => Self::Thinking,
            "planning" => Self::Planning,
            "completed" | "complete" | "done" | "finished" => Self::Completed,
            "stopped" | "cancelled" | "canceled" => Self::Stopped,
            "failed" | "failure" => Self::Failed,
            _ => Self::Other,
        }
    }

    /// Phases that open a thinking placeholder in the transcript.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Started | Self::Thinking | Self::Planning)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Thinking => "thinking",
            Self::Planning => "planning",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(alias = "message", alias = "text")]
    pub content: String,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.role
            .as_deref()
            .map(|role| role.eq_ignore_ascii_case("user"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessage {
    #[serde(default, alias = "content", alias = "text")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolStarted {
    #[serde(alias = "name", alias = "tool_name", alias = "toolName")]
    pub tool: String,
    #[serde(default, alias = "args", alias = "arguments")]
    pub input: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolFinished {
    #[serde(alias = "name", alias = "tool_name", alias = "toolName")]
    pub tool: String,
    #[serde(default, alias = "output")]
    pub result: Option<Value>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl ToolFinished {
    /// Result flattened to display text; strings are taken verbatim.
    pub fn result_text(&self) -> String {
        match &self.result {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileOperation {
    #[serde(alias = "op", alias = "action")]
    pub operation: String,
    #[serde(alias = "file", alias = "file_path", alias = "filePath")]
    pub path: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GitOperation {
    #[serde(alias = "op", alias = "action")]
    pub operation: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildProgress {
    #[serde(default = "default_build_stage", alias = "phase")]
    pub stage: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
}

impl BuildProgress {
    pub fn clamped_progress(&self) -> f64 {
        if self.progress.is_finite() {
            self.progress.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

fn default_build_stage() -> String {
    "build".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeploymentComplete {
    #[serde(default, alias = "preview_url", alias = "previewUrl", alias = "deploymentUrl")]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanProposed {
    #[serde(alias = "planId")]
    pub plan_id: String,
    #[serde(default, alias = "markdown", alias = "content")]
    pub plan: String,
    #[serde(default, alias = "userRequest")]
    pub user_request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanDecision {
    #[serde(default, alias = "planId")]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WalkthroughReady {
    #[serde(default, alias = "walkthroughId")]
    pub walkthrough_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentError {
    #[serde(alias = "error")]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserFrame {
    #[serde(alias = "image", alias = "frame")]
    pub data: String,
    #[serde(default, alias = "deviceWidth", alias = "device_width")]
    pub width: Option<f64>,
    #[serde(default, alias = "deviceHeight", alias = "device_height")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserUrlChanged {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserLifecycle {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn decode_envelope(value: Value) -> Result<EventEnvelope, DecodeError> {
    let kind = {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        match object.get("type").and_then(Value::as_str) {
            Some(kind) if !kind.trim().is_empty() => kind.to_string(),
            _ => return Err(DecodeError::MissingType),
        }
    };
    serde_json::from_value(value).map_err(|err| DecodeError::Malformed {
        kind,
        reason: err.to_string(),
    })
}

pub fn decode_text(text: &str) -> Result<EventEnvelope, DecodeError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|err| DecodeError::Json(err.to_string()))?;
    decode_envelope(value)
}
