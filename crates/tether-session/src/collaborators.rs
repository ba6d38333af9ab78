use futures_util::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("remote rejected request: {status}")]
    Rejected { status: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

pub trait BuildSurface: Send + Sync {
    fn progress(&self, stage: &str, progress: f64);
    fn preview_ready(&self, url: &str);
}

pub trait PlanReviewSurface: Send + Sync {
    fn present(&self, plan_id: &str, markdown: &str, user_request: Option<&str>);
}

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str, kind: NotificationKind);
}

pub trait Navigator: Send + Sync {
    fn open_walkthrough(&self, walkthrough_id: Option<&str>, url: Option<&str>);
}

/// Remote task-stop call. The returned future is driven on a detached task;
/// its outcome is only logged.
pub trait TaskStopper: Send + Sync {
    fn stop(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> BoxFuture<'static, Result<(), CollaboratorError>>;
}

/// Optional surfaces injected at construction. A `None` slot means the host
/// has no such surface; calls to it are skipped.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub build: Option<Arc<dyn BuildSurface>>,
    pub plan_review: Option<Arc<dyn PlanReviewSurface>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub navigator: Option<Arc<dyn Navigator>>,
    pub task_stopper: Option<Arc<dyn TaskStopper>>,
}

impl Collaborators {
    pub fn with_build(mut self, build: Arc<dyn BuildSurface>) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_plan_review(mut self, plan_review: Arc<dyn PlanReviewSurface>) -> Self {
        self.plan_review = Some(plan_review);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_task_stopper(mut self, task_stopper: Arc<dyn TaskStopper>) -> Self {
        self.task_stopper = Some(task_stopper);
        self
    }

    pub(crate) fn notify(&self, title: &str, body: &str, kind: NotificationKind) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(title, body, kind);
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("build", &self.build.is_some())
            .field("plan_review", &self.plan_review.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("navigator", &self.navigator.is_some())
            .field("task_stopper", &self.task_stopper.is_some())
            .finish()
    }
}
