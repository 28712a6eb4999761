use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Notify;

use sessionlens_logging::{LogEvent, Logger};
use sessionlens_sessions::analytics::active_session_count;
use sessionlens_sessions::{SessionStore, SessionWatcher, WatchEvent, WatchEventType};

/// Watch the projects directory until Ctrl+C, logging every change.
pub async fn run_watch(store: SessionStore, debounce: Duration, logger: Logger) -> Result<()> {
    let started = Instant::now();
    let logger = Arc::new(logger);

    let initial = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.discover())
            .await
            .context("Initial scan task failed")?
            .context("Failed to scan projects directory")?
    };

    let mut watcher = SessionWatcher::new(store.clone()).with_debounce(debounce);

    {
        let logger = Arc::clone(&logger);
        watcher.set_event_callback(move |event| {
            if let Some(log_event) = to_log_event(&event) {
                logger.log(&log_event);
            }
        });
    }

    {
        let logger = Arc::clone(&logger);
        let window = store.active_window();
        watcher
            .start(move |sessions| {
                logger.log(&LogEvent::SessionsRefreshed {
                    total: sessions.len(),
                    active: active_session_count(&sessions, Utc::now(), window),
                });
            })
            .with_context(|| format!("Failed to watch {}", store.projects_dir().display()))?;
    }

    logger.log(&LogEvent::WatchStarted {
        root: store.projects_dir().to_path_buf(),
        debounce_ms: debounce.as_millis() as u64,
        sessions: initial.len(),
    });

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.notify_one())
            .context("Failed to set Ctrl+C handler")?;
    }
    shutdown.notified().await;

    watcher.stop().await;
    logger.log(&LogEvent::WatchStopped {
        duration_secs: started.elapsed().as_secs_f64(),
    });

    Ok(())
}

/// Terminal event for a watcher notification. Changes whose transcript could
/// not be re-read produce nothing.
fn to_log_event(event: &WatchEvent) -> Option<LogEvent> {
    if event.event_type == WatchEventType::Deleted {
        return Some(LogEvent::SessionDeleted {
            session_id: event.session_id.clone(),
        });
    }

    let session = event.session.as_ref()?;
    Some(match event.event_type {
        WatchEventType::Created => LogEvent::SessionCreated {
            session_id: session.id.clone(),
            project: session.project_name.clone(),
            model: session.model.clone(),
            status: session.status.to_string(),
        },
        _ => LogEvent::SessionUpdated {
            session_id: session.id.clone(),
            project: session.project_name.clone(),
            status: session.status.to_string(),
            messages: session.message_count(),
            total_tokens: session.tokens_used.total,
            current_task: session.current_task.clone(),
        },
    })
}
