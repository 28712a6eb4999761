use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use walkdir::WalkDir;

use crate::assembler::session_id;
use crate::error::{Result, SessionError};
use crate::store::{is_transcript_path, SessionStore};
use crate::types::{Session, WatchEvent, WatchEventType};

/// Quiet period after the last change before sessions are rediscovered.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Receives the full session set after a burst of changes settles.
pub type SessionsCallback = Arc<dyn Fn(Vec<Session>) + Send + Sync>;
/// Receives one notification per transcript change.
pub type EventCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

type EventCallbackSlot = Arc<RwLock<Option<EventCallback>>>;

/// Single resettable deadline.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Push the deadline to `delay` after `now`.
    pub fn bump(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once when the deadline has passed, then disarms.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Map a filesystem notification kind onto a transcript change.
pub fn classify(kind: &EventKind) -> Option<WatchEventType> {
    match kind {
        EventKind::Create(_) => Some(WatchEventType::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(WatchEventType::Deleted),
        EventKind::Modify(_) => Some(WatchEventType::Modified),
        EventKind::Remove(_) => Some(WatchEventType::Deleted),
        _ => None,
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Watches the projects directory and reports transcript changes.
///
/// Each instance owns its notify handle, registered-directory set and
/// debounce deadline for as long as it runs.
pub struct SessionWatcher {
    store: SessionStore,
    debounce: Duration,
    event_callback: EventCallbackSlot,
    running: Option<Running>,
}

impl SessionWatcher {
    /// Watch the root of the given store, discovering with its settings.
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            debounce: DEFAULT_DEBOUNCE,
            event_callback: Arc::new(RwLock::new(None)),
            running: None,
        }
    }

    /// Create a watcher on a custom directory.
    pub fn with_dir(projects_dir: PathBuf) -> Self {
        Self::new(SessionStore::with_dir(projects_dir))
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn root(&self) -> &Path {
        self.store.projects_dir()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Register the per-event callback. Takes effect immediately, running or not.
    pub fn set_event_callback<F>(&mut self, callback: F)
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        match self.event_callback.write() {
            Ok(mut slot) => *slot = Some(callback),
            Err(poisoned) => *poisoned.into_inner() = Some(callback),
        }
    }

    /// Register every directory under the root and start the event loop.
    ///
    /// `on_sessions_changed` receives the rediscovered session set once events
    /// have been quiet for the debounce delay. Must be called from within a
    /// tokio runtime.
    pub fn start<F>(&mut self, on_sessions_changed: F) -> Result<()>
    where
        F: Fn(Vec<Session>) + Send + Sync + 'static,
    {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let root = self.store.projects_dir();
        if !root.is_dir() {
            return Err(SessionError::WatchRootMissing(root.to_path_buf()));
        }
        let root = std::fs::canonicalize(root).map_err(|source| SessionError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        watcher.watch(&root, RecursiveMode::NonRecursive)?;
        let mut registered = HashSet::from([root.clone()]);
        let extra = register_tree(&mut watcher, &mut registered, &root);

        tracing::info!(
            root = %root.display(),
            directories = extra.len() + 1,
            "Watching projects directory"
        );

        let event_loop = EventLoop {
            store: self.store.clone(),
            root,
            watcher,
            registered,
            debouncer: Debouncer::new(self.debounce),
            on_sessions_changed: Arc::new(on_sessions_changed),
            event_callback: Arc::clone(&self.event_callback),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(event_loop.run(rx, shutdown_rx));

        self.running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Stop the event loop and release all watches.
    ///
    /// No callbacks are delivered once this returns. Calling it on a stopped
    /// watcher does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            if !e.is_cancelled() {
                tracing::warn!("Watcher task ended abnormally: {}", e);
            }
        }
        tracing::info!(root = %self.root().display(), "Stopped watching projects directory");
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

/// Watch `dir` and every directory below it that is not yet registered.
fn register_tree(
    watcher: &mut RecommendedWatcher,
    registered: &mut HashSet<PathBuf>,
    dir: &Path,
) -> Vec<PathBuf> {
    let mut added = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() || registered.contains(entry.path()) {
            continue;
        }
        let path = entry.into_path();
        match watcher.watch(&path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                registered.insert(path.clone());
                added.push(path);
            }
            Err(e) => tracing::warn!("Failed to watch {:?}: {}", path, e),
        }
    }

    added
}

struct EventLoop {
    store: SessionStore,
    root: PathBuf,
    watcher: RecommendedWatcher,
    registered: HashSet<PathBuf>,
    debouncer: Debouncer,
    on_sessions_changed: SessionsCallback,
    event_callback: EventCallbackSlot,
}

impl EventLoop {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let deadline = self.debouncer.deadline();
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                received = rx.recv() => match received {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => tracing::warn!("File watcher error: {}", e),
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    if self.debouncer.fire(Instant::now()) {
                        self.rediscover().await;
                    }
                }
            }
        }
        // Dropping self releases the notify handle and every watch it holds.
    }

    async fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    if path.is_dir() {
                        self.register_new_dir(path).await;
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    if self.registered.remove(path) {
                        tracing::debug!(dir = %path.display(), "Watched directory removed");
                    }
                }
            }
            _ => {}
        }

        let Some(event_type) = classify(&event.kind) else {
            return;
        };

        for path in event.paths {
            if !self.is_session_file(&path) {
                continue;
            }
            let event_type = if event_type != WatchEventType::Deleted && !path.exists() {
                WatchEventType::Deleted
            } else {
                event_type
            };
            self.debouncer.bump(Instant::now());
            self.notify_change(event_type, &path).await;
        }
    }

    /// Register a freshly created directory and report transcripts that were
    /// written into it before its watch existed.
    async fn register_new_dir(&mut self, dir: &Path) {
        let added = register_tree(&mut self.watcher, &mut self.registered, dir);
        for new_dir in added {
            tracing::debug!(dir = %new_dir.display(), "Registered new directory");
            let Ok(entries) = std::fs::read_dir(&new_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && self.is_session_file(&path) {
                    self.debouncer.bump(Instant::now());
                    self.notify_change(WatchEventType::Created, &path).await;
                }
            }
        }
    }

    /// Only `{root}/{project}/{id}.jsonl` counts; deeper files belong to sub-agents.
    fn is_session_file(&self, path: &Path) -> bool {
        is_transcript_path(path)
            && path
                .strip_prefix(&self.root)
                .is_ok_and(|rel| rel.components().count() == 2)
    }

    async fn notify_change(&self, event_type: WatchEventType, path: &Path) {
        let callback = match self.event_callback.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(callback) = callback else {
            return;
        };

        let session = if event_type == WatchEventType::Deleted {
            None
        } else {
            let store = self.store.clone();
            let file = path.to_path_buf();
            match tokio::task::spawn_blocking(move || store.parse_session_file(&file)).await {
                Ok(Ok(session)) => Some(session),
                Ok(Err(e)) => {
                    tracing::debug!("Re-parse of {:?} failed: {}", path, e);
                    None
                }
                Err(e) => {
                    tracing::warn!("Re-parse task for {:?} failed: {}", path, e);
                    None
                }
            }
        };

        callback(WatchEvent {
            event_type,
            session_id: session_id(path),
            session,
            timestamp: Utc::now(),
        });
    }

    async fn rediscover(&self) {
        let store = self.store.clone();
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || store.discover_in(&root)).await {
            Ok(Ok(sessions)) => {
                tracing::debug!(sessions = sessions.len(), "Sessions changed");
                (self.on_sessions_changed)(sessions);
            }
            Ok(Err(e)) => tracing::warn!("Rediscovery failed: {}", e),
            Err(e) => tracing::warn!("Rediscovery task failed: {}", e),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_debouncer_fires_once_after_last_bump() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        for i in 0..5 {
            debouncer.bump(start + Duration::from_millis(i * 100));
        }
        let last = start + Duration::from_millis(400);

        assert!(!debouncer.fire(last + Duration::from_millis(499)));
        assert!(debouncer.fire(last + Duration::from_millis(500)));
        assert!(!debouncer.fire(last + Duration::from_millis(900)));
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn test_debouncer_idle_never_fires() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(!debouncer.fire(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn test_classify_event_kinds() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(WatchEventType::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WatchEventType::Modified)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(WatchEventType::Deleted)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(WatchEventType::Deleted)
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
    }
}
