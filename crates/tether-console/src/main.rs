mod commands;
mod config;
mod docker;
mod logging;
mod render;
mod surfaces;
mod transport;

use clap::Parser;
use commands::{parse_command, ConsoleCommand, HELP};
use config::{load_config, Args};
use docker::DockerLogs;
use std::sync::Arc;
use tether_core::OutboundCommand;
use tether_frames::{
    end_session_command, history_command, navigate_command, run_frame_loop,
    start_session_command, viewport_command, FrameInput, FrameStreamThrottler, FrameView,
};
use tether_logs::{run_log_feed, LogControl, LogView};
use tether_session::{run_session_loop, SessionInput, SessionStateMachine, SessionView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use transport::{hub_loop, InboundRouter};

const OUTBOUND_QUEUE: usize = 256;
const INPUT_QUEUE: usize = 256;
const LOG_CONTROL_QUEUE: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;
    let _log_guard = logging::init_logging(&config);
    info!(
        event = "console_start",
        url = %config.hub_url,
        session_id = %config.session_id,
        project_id = config.project_id.as_deref().unwrap_or_default(),
        browser_mode = config.browser_mode
    );
    if config.project_id.is_none() {
        eprintln!("no project set (--project or TETHER_PROJECT_ID); messages cannot be sent");
    }

    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundCommand>(OUTBOUND_QUEUE);
    let (session_tx, session_rx) = mpsc::channel::<SessionInput>(INPUT_QUEUE);
    let (frame_tx, frame_rx) = mpsc::channel::<FrameInput>(INPUT_QUEUE);

    let machine = SessionStateMachine::new(
        config.session(),
        surfaces::TerminalSurfaces::collaborators(),
        outbound_tx.clone(),
    );
    let (session_view_tx, session_view_rx) = watch::channel(SessionView::default());
    let session_task = tokio::spawn(run_session_loop(machine, session_rx, session_view_tx));

    let frame_config = config.frames();
    let flush_period = frame_config.flush_period;
    let throttler = FrameStreamThrottler::new(&frame_config);
    let (frame_view_tx, frame_view_rx) = watch::channel(FrameView::capture(&throttler));
    let frame_task = tokio::spawn(run_frame_loop(throttler, frame_rx, frame_view_tx, flush_period));

    let (log_controls, log_view_rx, log_task) = match config.container_id.clone() {
        Some(container_id) => {
            let docker = Arc::new(DockerLogs::default());
            let (control_tx, control_rx) = mpsc::channel(LOG_CONTROL_QUEUE);
            let (view_tx, view_rx) = watch::channel(LogView::default());
            let task = tokio::spawn(run_log_feed(
                container_id,
                config.logs(),
                docker.clone(),
                docker,
                control_rx,
                view_tx,
            ));
            (Some(control_tx), Some(view_rx), Some(task))
        }
        None => (None, None, None),
    };

    let router = InboundRouter::new(session_tx.clone(), frame_tx.clone());
    let hub_task = tokio::spawn(hub_loop(config.hub_url.clone(), outbound_rx, router));
    let render_task = tokio::spawn(render::render_loop(
        session_view_rx,
        frame_view_rx.clone(),
        log_view_rx,
    ));

    let console = Console {
        session: session_tx,
        frames: frame_tx,
        outbound: outbound_tx,
        logs: log_controls,
        frame_view: frame_view_rx,
    };
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !console.handle(parse_command(&line)).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(event = "console_stdin_error", error = %err);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Dropping the console closes every engine input; the loops drain and stop.
    drop(console);
    hub_task.abort();
    if let Some(task) = log_task {
        task.abort();
    }
    let machine = session_task.await?;
    let throttler = frame_task.await?;
    let _ = render_task.await;
    let stats = machine.stats();
    info!(
        event = "console_stop",
        applied = stats.applied,
        ignored = stats.ignored,
        decode_errors = stats.decode_errors,
        frames_accepted = throttler.stats().accepted,
        frame_decode_errors = throttler.stats().decode_errors
    );
    Ok(())
}

struct Console {
    session: mpsc::Sender<SessionInput>,
    frames: mpsc::Sender<FrameInput>,
    outbound: mpsc::Sender<OutboundCommand>,
    logs: Option<mpsc::Sender<LogControl>>,
    frame_view: watch::Receiver<FrameView>,
}

impl Console {
    /// Returns false when the console should exit.
    async fn handle(&self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Empty => true,
            ConsoleCommand::Quit => false,
            ConsoleCommand::Help => {
                eprintln!("{HELP}");
                true
            }
            ConsoleCommand::Invalid(reason) => {
                eprintln!("{reason} (try /help)");
                true
            }
            ConsoleCommand::Message(text) => {
                self.to_session(SessionInput::SendMessage(text)).await
            }
            ConsoleCommand::Stop => self.to_session(SessionInput::StopTask).await,
            ConsoleCommand::Approve(comment) => {
                self.to_session(SessionInput::ApprovePlan(comment)).await
            }
            ConsoleCommand::Reject(comment) => {
                self.to_session(SessionInput::RejectPlan(comment)).await
            }
            ConsoleCommand::OpenBrowser(url) => match start_session_command(&url) {
                Ok(command) => self.send_outbound(command),
                Err(err) => {
                    eprintln!("{err}");
                    true
                }
            },
            ConsoleCommand::Navigate(url) => match navigate_command(&url) {
                Ok(command) => self.send_outbound(command),
                Err(err) => {
                    eprintln!("{err}");
                    true
                }
            },
            ConsoleCommand::History(action) => self.send_outbound(history_command(action)),
            ConsoleCommand::Viewport(viewport) => self.send_outbound(viewport_command(viewport)),
            ConsoleCommand::EndBrowser => {
                if !self.frame_view.borrow().session_active {
                    eprintln!("no active browser session");
                    return true;
                }
                let _ = self.frames.send(FrameInput::EndSession).await;
                self.send_outbound(end_session_command())
            }
            ConsoleCommand::PauseLogs => self.log_control(LogControl::Pause).await,
            ConsoleCommand::ResumeLogs => self.log_control(LogControl::Resume).await,
            ConsoleCommand::ClearLogs => self.log_control(LogControl::Clear).await,
        }
    }

    async fn to_session(&self, input: SessionInput) -> bool {
        self.session.send(input).await.is_ok()
    }

    fn send_outbound(&self, command: OutboundCommand) -> bool {
        match self.outbound.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(event = "console_outbound_full", kind = command.kind());
                eprintln!("outbound queue full; {} dropped", command.kind());
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                warn!(event = "console_outbound_closed", kind = command.kind());
            }
        }
        true
    }

    async fn log_control(&self, control: LogControl) -> bool {
        match &self.logs {
            Some(logs) => {
                let _ = logs.send(control).await;
            }
            None => eprintln!("no container set (--container or TETHER_CONTAINER_ID)"),
        }
        true
    }
}
