//! Rule file watcher for hot reload
//!
//! Watches the directories holding the rule files rather than the files
//! themselves, so editors that replace a file by rename are picked up.
//! Events are debounced: a reload runs once the files have been quiet
//! for the debounce window.

use crate::engine::RuleEngine;
use crate::error::{Result, RulesError};
use crate::rule::Rule;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Quiet period before a reload fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

type ReloadCallback = Arc<dyn Fn(std::result::Result<&[Rule], &RulesError>) + Send + Sync>;

/// Builder for the rule file watcher
pub struct RuleWatcher {
    paths: Vec<PathBuf>,
    engine: Arc<RuleEngine>,
    debounce: Duration,
    callback: Option<ReloadCallback>,
}

impl RuleWatcher {
    pub fn new<P: AsRef<Path>>(paths: &[P], engine: Arc<RuleEngine>) -> Self {
        Self {
            paths: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            engine,
            debounce: DEFAULT_DEBOUNCE,
            callback: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Called after every reload attempt with the new rules or the error
    pub fn on_reload<F>(mut self, callback: F) -> Self
    where
        F: Fn(std::result::Result<&[Rule], &RulesError>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(self) -> Result<WatcherHandle> {
        let paths = self
            .paths
            .iter()
            .map(|p| normalize_path(p))
            .collect::<Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dirs: BTreeSet<&Path> = paths.iter().filter_map(|p| p.parent()).collect();
        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            debug!(dir = ?dir, "Watching rule directory");
        }

        info!(
            files = paths.len(),
            debounce_ms = self.debounce.as_millis() as u64,
            "Rule watcher started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = WatchState {
            paths,
            engine: self.engine,
            debounce: self.debounce,
            callback: self.callback,
        };

        let task = tokio::spawn(state.run(watcher, rx, shutdown_rx));

        Ok(WatcherHandle {
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Running watcher; stop it to release the filesystem watch
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop watching and cancel any pending reload
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Rule watcher task failed");
        }
        info!("Rule watcher stopped");
    }
}

struct WatchState {
    paths: Vec<PathBuf>,
    engine: Arc<RuleEngine>,
    debounce: Duration,
    callback: Option<ReloadCallback>,
}

impl WatchState {
    async fn run(
        self,
        // Dropped when the loop exits, which ends the watch
        _watcher: RecommendedWatcher,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline;
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        if is_relevant_event(&event, &self.paths) {
                            debug!(kind = ?event.kind, paths = ?event.paths, "Rule file event");
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "File watcher error"),
                    None => break,
                },
                _ = sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                    deadline = None;
                    self.reload();
                }
            }
        }
    }

    fn reload(&self) {
        info!("Rule file change detected, reloading");

        match self.engine.load_rules(&self.paths) {
            Ok(count) => {
                info!(rules = count, "Rules reloaded");
                if let Some(callback) = &self.callback {
                    let rules = self.engine.snapshot();
                    callback(Ok(rules.as_slice()));
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to reload rules, keeping previous rule set");
                if let Some(callback) = &self.callback {
                    callback(Err(&e));
                }
            }
        }
    }
}

/// Absolute path with a canonical parent directory. The file itself may
/// not exist yet.
fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let file_name = absolute.file_name().ok_or_else(|| {
        RulesError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        ))
    })?;
    let parent = absolute.parent().unwrap_or_else(|| Path::new("/"));

    Ok(parent.canonicalize()?.join(file_name))
}

fn is_relevant_event(event: &Event, watched: &[PathBuf]) -> bool {
    match event.kind {
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
            event.paths.iter().any(|p| watched.contains(p))
        }
        _ => false,
    }
}
