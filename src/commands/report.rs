use log::warn;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::messages;
use crate::backend::ProgressEvent;
use crate::engine::QueueEvent;
use crate::package::EntryStatus;

/// Print queue events as they happen, as text or one JSON object per line.
pub(crate) fn spawn(mut events: broadcast::Receiver<QueueEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render(&event, json) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn render(event: &QueueEvent, json: bool) -> Option<String> {
    if json {
        return match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(err) => {
                warn!("Could not serialize event: {}", err);
                None
            }
        };
    }

    match event {
        QueueEvent::Admitted { entry } => {
            let mut line = format!(
                "[{}] {} {} ({})",
                entry.id, entry.name, entry.version, entry.architecture
            );
            match &entry.failure_reason {
                Some(reason) => {
                    line.push_str(": ");
                    line.push_str(&messages::failure_text(reason));
                }
                None => {
                    line.push_str(": ");
                    line.push_str(messages::status_label(entry.status));
                    if let Some(note) = messages::comparison_text(
                        entry.installed_comparison,
                        entry.installed_version.as_deref(),
                    ) {
                        line.push_str(&format!(" ({})", note));
                    }
                }
            }
            Some(line)
        }
        QueueEvent::StatusChanged { from, entry } => {
            let text = match (&entry.failure_reason, entry.status) {
                (Some(reason), _) => match messages::failure_detail(reason) {
                    Some(detail) => format!("{} ({})", messages::failure_text(reason), detail),
                    None => messages::failure_text(reason),
                },
                (None, EntryStatus::Installed) if *from == EntryStatus::Installing => {
                    "Installed successfully".to_string()
                }
                (None, EntryStatus::Removed) => "Uninstalled successfully".to_string(),
                (None, EntryStatus::Waiting) if entry.attempt > 1 => {
                    format!("Waiting (attempt {})", entry.attempt)
                }
                (None, status) => messages::status_label(status).to_string(),
            };
            Some(format!("[{}] {}: {}", entry.id, entry.name, text))
        }
        QueueEvent::Progress { id, progress } => match progress {
            ProgressEvent::Status { percent, message } => {
                Some(format!("[{}] {:>3.0}% {}", id, percent, message))
            }
            ProgressEvent::Output { line } => Some(format!("[{}]      {}", id, line)),
            ProgressEvent::DependenciesPending { names } => Some(format!(
                "[{}] {}",
                id,
                messages::pending_dependencies(names)
            )),
        },
        QueueEvent::Withdrawn { id } => Some(format!("[{}] Withdrawn", id)),
    }
}
