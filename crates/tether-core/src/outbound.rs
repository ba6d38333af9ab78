use serde::{Deserialize, Serialize};

pub const BROWSER_AGENT: &str = "browser";

/// Commands the client emits onto the agent transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    UserMessage {
        message: String,
        project_id: String,
        browser_mode: bool,
        session_id: String,
    },
    PlanApproval {
        plan_id: String,
        approved: bool,
        comment: String,
    },
    UserInteraction {
        agent: String,
        payload: InteractionPayload,
    },
    BrowserNavigation {
        action: NavigationAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    StartInteractiveBrowser {
        initial_url: String,
    },
    EndBrowserSession,
    StopBrowserAgent,
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::PlanApproval { .. } => "plan_approval",
            Self::UserInteraction { .. } => "user_interaction",
            Self::BrowserNavigation { .. } => "browser_navigation",
            Self::StartInteractiveBrowser { .. } => "start_interactive_browser",
            Self::EndBrowserSession => "end_browser_session",
            Self::StopBrowserAgent => "stop_browser_agent",
        }
    }

    pub fn browser_interaction(payload: InteractionPayload) -> Self {
        Self::UserInteraction {
            agent: BROWSER_AGENT.to_string(),
            payload,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionPayload {
    InputMouse(MouseInput),
    InputKeyboard(KeyboardInput),
    SetViewport { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseInput {
    pub event_type: MouseEventType,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub button: MouseButton,
    #[serde(default)]
    pub click_count: u32,
    #[serde(default)]
    pub delta_x: f64,
    #[serde(default)]
    pub delta_y: f64,
    #[serde(default)]
    pub modifiers: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseEventType {
    MousePressed,
    MouseReleased,
    MouseMoved,
    MouseWheel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    None,
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardInput {
    pub event_type: KeyEventType,
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub modifiers: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationAction {
    Back,
    Forward,
    Reload,
    Navigate,
}
