use crate::mapper::{map_pointer, Point, Size};
use crate::throttler::Viewport;
use tether_core::{
    InteractionPayload, KeyEventType, KeyboardInput, MouseButton, MouseEventType, MouseInput,
    NavigationAction, OutboundCommand,
};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("navigation target is empty")]
    Empty,
    #[error("invalid navigation url {input}: {reason}")]
    InvalidUrl { input: String, reason: String },
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        alt: false,
        ctrl: false,
        meta: false,
        shift: false,
    };

    /// Remote input bitmask: alt=1, ctrl=2, meta=4, shift=8.
    pub fn bits(self) -> u8 {
        u8::from(self.alt)
            | u8::from(self.ctrl) << 1
            | u8::from(self.meta) << 2
            | u8::from(self.shift) << 3
    }

    fn is_shortcut(self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: MouseEventType,
    pub position: Point,
    pub button: MouseButton,
    pub click_count: u32,
    pub delta_x: f64,
    pub delta_y: f64,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn new(kind: MouseEventType, position: Point) -> Self {
        Self {
            kind,
            position,
            button: MouseButton::None,
            click_count: 0,
            delta_x: 0.0,
            delta_y: 0.0,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_button(mut self, button: MouseButton, click_count: u32) -> Self {
        self.button = button;
        self.click_count = click_count;
        self
    }

    pub fn with_wheel(mut self, delta_x: f64, delta_y: f64) -> Self {
        self.delta_x = delta_x;
        self.delta_y = delta_y;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Builds a mouse interaction in remote coordinates. `None` when the display
/// has no drawable area.
pub fn pointer_command(
    event: PointerEvent,
    display: Size,
    viewport: Viewport,
) -> Option<OutboundCommand> {
    let mapped = map_pointer(event.position, display, viewport.into())?;
    Some(OutboundCommand::browser_interaction(
        InteractionPayload::InputMouse(MouseInput {
            event_type: event.kind,
            x: mapped.x.round(),
            y: mapped.y.round(),
            button: event.button,
            click_count: event.click_count,
            delta_x: event.delta_x,
            delta_y: event.delta_y,
            modifiers: event.modifiers.bits(),
        }),
    ))
}

/// Left press then release at the same point.
pub fn click_commands(position: Point, display: Size, viewport: Viewport) -> Vec<OutboundCommand> {
    [MouseEventType::MousePressed, MouseEventType::MouseReleased]
        .into_iter()
        .filter_map(|kind| {
            let event = PointerEvent::new(kind, position).with_button(MouseButton::Left, 1);
            pointer_command(event, display, viewport)
        })
        .collect()
}

/// Key down, an optional char event for printable input, then key up.
pub fn key_press_commands(key: &str, code: &str, modifiers: Modifiers) -> Vec<OutboundCommand> {
    let text = printable_text(key, modifiers);
    let mut commands = Vec::with_capacity(3);
    commands.push(key_command(KeyEventType::KeyDown, key, code, None, modifiers));
    if let Some(text) = text {
        commands.push(key_command(KeyEventType::Char, key, code, Some(text), modifiers));
    }
    commands.push(key_command(KeyEventType::KeyUp, key, code, None, modifiers));
    commands
}

pub fn key_command(
    event_type: KeyEventType,
    key: &str,
    code: &str,
    text: Option<String>,
    modifiers: Modifiers,
) -> OutboundCommand {
    OutboundCommand::browser_interaction(InteractionPayload::InputKeyboard(KeyboardInput {
        event_type,
        key: key.to_string(),
        code: code.to_string(),
        text,
        modifiers: modifiers.bits(),
    }))
}

pub fn viewport_command(viewport: Viewport) -> OutboundCommand {
    OutboundCommand::browser_interaction(InteractionPayload::SetViewport {
        width: viewport.width,
        height: viewport.height,
    })
}

pub fn navigate_command(input: &str) -> Result<OutboundCommand, NavigationError> {
    Ok(OutboundCommand::BrowserNavigation {
        action: NavigationAction::Navigate,
        url: Some(normalize_url(input)?),
    })
}

pub fn history_command(action: NavigationAction) -> OutboundCommand {
    OutboundCommand::BrowserNavigation { action, url: None }
}

pub fn start_session_command(initial_url: &str) -> Result<OutboundCommand, NavigationError> {
    Ok(OutboundCommand::StartInteractiveBrowser {
        initial_url: normalize_url(initial_url)?,
    })
}

pub fn end_session_command() -> OutboundCommand {
    OutboundCommand::EndBrowserSession
}

/// Accepts bare hosts (`example.dev/path`) by assuming https.
pub fn normalize_url(input: &str) -> Result<String, NavigationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NavigationError::Empty);
    }
    let candidate = if trimmed.contains("://") || trimmed.starts_with("about:") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&candidate).map_err(|err| NavigationError::InvalidUrl {
        input: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" | "about" => Ok(parsed.to_string()),
        other => Err(NavigationError::UnsupportedScheme(other.to_string())),
    }
}

fn printable_text(key: &str, modifiers: Modifiers) -> Option<String> {
    if modifiers.is_shortcut() {
        return None;
    }
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if !ch.is_control() => Some(ch.to_string()),
        _ if key == "Enter" => Some("\r".to_string()),
        _ => None,
    }
}
