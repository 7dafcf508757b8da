//! Terminal progress driven by event bus events.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::domain::models::QaEvent;
use crate::services::event_bus::EventBus;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}";
const PROGRESS_CHARS: &str = "█▓▒░ ";
const REFRESH: Duration = Duration::from_millis(100);

/// Renders stage and autofix progress on stderr until dropped or finished.
pub struct ProgressReporter {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    /// Start rendering events from `bus`. Hidden when `enabled` is false.
    pub fn start(bus: &Arc<EventBus>, enabled: bool) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        if enabled {
            if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
                bar.set_style(style.progress_chars(PROGRESS_CHARS));
            }
            bar.enable_steady_tick(REFRESH);
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut rx = bus.subscribe();
        let task_bar = bar.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => render(&task_bar, &envelope.event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "progress reporter lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { bar, task }
    }

    pub fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

fn render(bar: &ProgressBar, event: &QaEvent) {
    match event {
        QaEvent::StageStarted { stage, check_ids } => {
            bar.reset();
            bar.set_length(check_ids.len() as u64);
            bar.set_message(format!("stage {stage}"));
        }
        QaEvent::CheckCompleted { check_id, status, cached, .. } => {
            bar.inc(1);
            let suffix = if *cached { " (cached)" } else { "" };
            bar.set_message(format!("{check_id}: {status}{suffix}"));
        }
        QaEvent::PossibleHang { check_id, idle_secs, cpu_percent } => {
            bar.println(format!(
                "warning: {check_id} has been idle for {idle_secs}s ({cpu_percent:.1}% cpu)"
            ));
        }
        QaEvent::IterationStarted { index, issues_in } => {
            bar.set_message(format!("autofix iteration {index}: {issues_in} issue(s)"));
        }
        QaEvent::IterationCompleted { index, fixes_applied, issues_remaining } => {
            bar.println(format!(
                "iteration {index}: {fixes_applied} fix(es) applied, {issues_remaining} remaining"
            ));
        }
        QaEvent::FixRejected { agent_id, reason, .. } => {
            bar.println(format!("rejected fix from {agent_id}: {reason}"));
        }
        QaEvent::AutofixFinished { .. } => {}
    }
}
