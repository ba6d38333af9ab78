pub mod collaborators;
pub mod engine;
pub mod machine;
pub mod transcript;

pub use collaborators::{
    BuildSurface, CollaboratorError, Collaborators, Navigator, NotificationKind, Notifier,
    PlanReviewSurface, TaskStopper,
};
pub use engine::{run_session_loop, SessionInput, SessionView};
pub use machine::{
    CommandError, SessionConfig, SessionPhase, SessionState, SessionStateMachine, SessionStats,
    DEFAULT_INDICATOR_DELAY, DEFAULT_TICK_PERIOD,
};
pub use transcript::{
    EntryKind, EntryPayload, Transcript, TranscriptEntry, DEFAULT_TRANSCRIPT_CAPACITY,
};
