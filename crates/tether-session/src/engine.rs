use crate::machine::{CommandError, SessionState, SessionStateMachine};
use crate::transcript::TranscriptEntry;
use serde_json::Value;
use std::time::Duration;
use tether_core::EventEnvelope;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

const MIN_TICK_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum SessionInput {
    Envelope(EventEnvelope),
    Raw(Value),
    StreamError(String),
    SendMessage(String),
    StopTask,
    ApprovePlan(Option<String>),
    RejectPlan(Option<String>),
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub entries: Vec<TranscriptEntry>,
}

impl SessionView {
    pub fn capture(machine: &SessionStateMachine) -> Self {
        Self {
            state: machine.state().clone(),
            entries: machine.transcript().entries().cloned().collect(),
        }
    }
}

/// Drives the machine until every input sender is dropped.
///
/// Inputs are polled before the indicator tick, so a tick never observes a
/// half-applied cycle.
pub async fn run_session_loop(
    mut machine: SessionStateMachine,
    mut inputs: mpsc::Receiver<SessionInput>,
    view: watch::Sender<SessionView>,
) -> SessionStateMachine {
    let mut ticker = time::interval(machine.config().tick_period.max(MIN_TICK_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    view.send_replace(SessionView::capture(&machine));
    info!(
        event = "session_loop_start",
        session_id = %machine.config().session_id
    );

    loop {
        tokio::select! {
            biased;
            input = inputs.recv() => {
                let Some(input) = input else {
                    break;
                };
                handle_input(&mut machine, input);
                machine.tick();
                view.send_replace(SessionView::capture(&machine));
            }
            _ = ticker.tick() => {
                if machine.tick() {
                    view.send_replace(SessionView::capture(&machine));
                }
            }
        }
    }

    let stats = machine.stats();
    info!(
        event = "session_loop_stop",
        applied = stats.applied,
        ignored = stats.ignored,
        decode_errors = stats.decode_errors,
        stream_errors = stats.stream_errors
    );
    machine
}

fn handle_input(machine: &mut SessionStateMachine, input: SessionInput) {
    match input {
        SessionInput::Envelope(envelope) => machine.apply(envelope),
        SessionInput::Raw(value) => machine.apply_raw(value),
        SessionInput::StreamError(reason) => machine.record_stream_error(&reason),
        SessionInput::SendMessage(text) => {
            log_command("send_message", machine.send_message(&text));
        }
        SessionInput::StopTask => {
            log_command("stop_task", Ok(machine.stop_task()));
        }
        SessionInput::ApprovePlan(comment) => {
            log_command("approve_plan", machine.approve_plan(comment.as_deref()));
        }
        SessionInput::RejectPlan(comment) => {
            log_command("reject_plan", machine.reject_plan(comment.as_deref()));
        }
    }
}

fn log_command(command: &'static str, result: Result<bool, CommandError>) {
    match result {
        Ok(true) => debug!(event = "session_command", command),
        Ok(false) => debug!(event = "session_command_noop", command),
        Err(err) => debug!(event = "session_command_failed", command, error = %err),
    }
}
