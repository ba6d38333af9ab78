use std::sync::Arc;
use tether_session::{
    BuildSurface, Collaborators, Navigator, NotificationKind, Notifier, PlanReviewSurface,
};

/// Terminal stand-ins for the host surfaces. Everything goes to stderr so
/// the transcript on stdout stays clean.
#[derive(Debug, Default)]
pub struct TerminalSurfaces;

impl TerminalSurfaces {
    pub fn collaborators() -> Collaborators {
        let surfaces = Arc::new(Self);
        Collaborators::default()
            .with_build(surfaces.clone())
            .with_plan_review(surfaces.clone())
            .with_notifier(surfaces.clone())
            .with_navigator(surfaces)
    }
}

impl BuildSurface for TerminalSurfaces {
    fn progress(&self, stage: &str, progress: f64) {
        eprintln!("[build] {}", format_progress(stage, progress));
    }

    fn preview_ready(&self, url: &str) {
        eprintln!("[build] preview ready: {url}");
    }
}

impl PlanReviewSurface for TerminalSurfaces {
    fn present(&self, plan_id: &str, markdown: &str, user_request: Option<&str>) {
        eprintln!("[plan {plan_id}] review requested");
        if let Some(request) = user_request {
            eprintln!("  request: {request}");
        }
        for line in markdown.lines() {
            eprintln!("  {line}");
        }
        eprintln!("  /approve [comment] or /reject [comment]");
    }
}

impl Notifier for TerminalSurfaces {
    fn notify(&self, title: &str, body: &str, kind: NotificationKind) {
        eprintln!("{}", format_notification(title, body, kind));
    }
}

impl Navigator for TerminalSurfaces {
    fn open_walkthrough(&self, walkthrough_id: Option<&str>, url: Option<&str>) {
        match (walkthrough_id, url) {
            (_, Some(url)) => eprintln!("[walkthrough] {url}"),
            (Some(id), None) => eprintln!("[walkthrough] {id}"),
            (None, None) => eprintln!("[walkthrough] ready"),
        }
    }
}

fn format_progress(stage: &str, progress: f64) -> String {
    let percent = (progress.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("{stage} {percent}%")
}

fn format_notification(title: &str, body: &str, kind: NotificationKind) -> String {
    if body.trim().is_empty() {
        format!("[{}] {title}", kind.as_str())
    } else {
        format!("[{}] {title}: {body}", kind.as_str())
    }
}
