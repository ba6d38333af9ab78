use tether_core::NavigationAction;
use tether_frames::Viewport;

/// One line typed at the console prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Message(String),
    Stop,
    Approve(Option<String>),
    Reject(Option<String>),
    OpenBrowser(String),
    Navigate(String),
    History(NavigationAction),
    Viewport(Viewport),
    EndBrowser,
    PauseLogs,
    ResumeLogs,
    ClearLogs,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  <text>              send a message to the agent
  /stop               stop the running task
  /approve [comment]  approve the pending plan
  /reject [comment]   reject the pending plan
  /open <url>         start an interactive browser session
  /go <url>           navigate the browser
  /back /forward /reload
  /viewport <WxH>     resize the remote viewport
  /end                end the browser session
  /pause /resume /clear   control the log tail
  /quit";

pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleCommand::Message(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let comment = (!arg.is_empty()).then(|| arg.to_string());

    match name {
        "stop" => ConsoleCommand::Stop,
        "approve" => ConsoleCommand::Approve(comment),
        "reject" => ConsoleCommand::Reject(comment),
        "open" => ConsoleCommand::OpenBrowser(if arg.is_empty() {
            "about:blank".to_string()
        } else {
            arg.to_string()
        }),
        "go" | "nav" => match comment {
            Some(url) => ConsoleCommand::Navigate(url),
            None => ConsoleCommand::Invalid("usage: /go <url>".to_string()),
        },
        "back" => ConsoleCommand::History(NavigationAction::Back),
        "forward" => ConsoleCommand::History(NavigationAction::Forward),
        "reload" => ConsoleCommand::History(NavigationAction::Reload),
        "viewport" => match parse_viewport(arg) {
            Some(viewport) => ConsoleCommand::Viewport(viewport),
            None => ConsoleCommand::Invalid("usage: /viewport <width>x<height>".to_string()),
        },
        "end" => ConsoleCommand::EndBrowser,
        "pause" => ConsoleCommand::PauseLogs,
        "resume" => ConsoleCommand::ResumeLogs,
        "clear" => ConsoleCommand::ClearLogs,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => ConsoleCommand::Invalid(format!("unknown command: /{other}")),
    }
}

fn parse_viewport(input: &str) -> Option<Viewport> {
    let (width, height) = input.split_once(['x', 'X'])?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().parse::<u32>().ok()?;
    (width > 0 && height > 0).then_some(Viewport { width, height })
}
