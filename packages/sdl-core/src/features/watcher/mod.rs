//! Debounced filesystem watcher
//!
//! Cross-platform watching via `notify`, with a quiet-window debounce: paths
//! accumulate while events keep arriving and flush as one batch once the
//! stream has been quiet for the configured window. Batches feed incremental
//! index passes through the [`WatchSink`] seam.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::shared::models::{CoreError, Result};

/// Default quiet window before a batch flushes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watcher counts as stale after this much silence while active.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Poll interval of the processor thread.
const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub root_path: PathBuf,
    pub debounce: Duration,
    /// Extension allow-list; empty means everything
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub recursive: bool,
}

impl WatchConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            debounce: DEFAULT_DEBOUNCE,
            extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            recursive: true,
        }
    }
}

/// Receives debounced change batches.
pub trait WatchSink: Send {
    fn on_batch(&mut self, paths: Vec<PathBuf>);
    fn on_error(&mut self, message: String);
}

/// Health telemetry snapshot for `repo.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WatcherHealth {
    pub active: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub errors: u64,
    pub stale: bool,
}

#[derive(Debug)]
struct HealthInner {
    active: bool,
    last_event: Option<(Instant, DateTime<Utc>)>,
    errors: u64,
}

#[derive(Clone, Default)]
struct HealthHandle(Arc<Mutex<Option<HealthInner>>>);

impl HealthHandle {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Some(HealthInner {
            active: false,
            last_event: None,
            errors: 0,
        }))))
    }

    fn record_event(&self) {
        if let Some(inner) = self.0.lock().as_mut() {
            inner.last_event = Some((Instant::now(), Utc::now()));
        }
    }

    fn record_error(&self) {
        if let Some(inner) = self.0.lock().as_mut() {
            inner.errors += 1;
        }
    }

    fn set_active(&self, active: bool) {
        if let Some(inner) = self.0.lock().as_mut() {
            inner.active = active;
        }
    }

    fn snapshot(&self) -> WatcherHealth {
        let guard = self.0.lock();
        match guard.as_ref() {
            Some(inner) => WatcherHealth {
                active: inner.active,
                last_event_at: inner.last_event.map(|(_, at)| at),
                errors: inner.errors,
                stale: inner.active
                    && inner
                        .last_event
                        .map_or(false, |(instant, _)| instant.elapsed() > STALE_AFTER),
            },
            None => WatcherHealth {
                active: false,
                last_event_at: None,
                errors: 0,
                stale: false,
            },
        }
    }
}

/// Filesystem watcher for one repository root.
pub struct FileWatcher {
    config: WatchConfig,
    sink: Arc<Mutex<dyn WatchSink>>,
    watcher: Option<RecommendedWatcher>,
    event_tx: Option<Sender<Event>>,
    event_rx: Option<Receiver<Event>>,
    processor: Option<thread::JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
    health: HealthHandle,
}

impl FileWatcher {
    pub fn new(config: WatchConfig, sink: Arc<Mutex<dyn WatchSink>>) -> Result<Self> {
        if !config.root_path.is_dir() {
            return Err(CoreError::watch(format!(
                "watch root is not a directory: {}",
                config.root_path.display()
            )));
        }
        let (event_tx, event_rx) = channel();
        Ok(Self {
            config,
            sink,
            watcher: None,
            event_tx: Some(event_tx),
            event_rx: Some(event_rx),
            processor: None,
            running: Arc::new(Mutex::new(false)),
            health: HealthHandle::new(),
        })
    }

    pub fn health(&self) -> WatcherHealth {
        self.health.snapshot()
    }

    pub fn start(&mut self) -> Result<()> {
        if *self.running.lock() {
            return Err(CoreError::watch("watcher already running"));
        }
        if self.event_rx.is_none() {
            let (tx, rx) = channel();
            self.event_tx = Some(tx);
            self.event_rx = Some(rx);
        }

        let event_tx = self
            .event_tx
            .as_ref()
            .ok_or_else(|| CoreError::watch("event channel missing"))?
            .clone();
        let health = self.health.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(err) => {
                    warn!(%err, "watch backend error");
                    health.record_error();
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| CoreError::watch(format!("cannot create watcher: {e}")))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&self.config.root_path, mode)
            .map_err(|e| CoreError::watch(format!("cannot watch path: {e}")))?;
        self.watcher = Some(watcher);

        let event_rx = self
            .event_rx
            .take()
            .ok_or_else(|| CoreError::watch("event receiver missing"))?;
        let sink = self.sink.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let health = self.health.clone();

        *running.lock() = true;
        health.set_active(true);

        self.processor = Some(thread::spawn(move || {
            Self::process_events(event_rx, sink, config, running, health);
        }));
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !*self.running.lock() {
            return Ok(());
        }
        *self.running.lock() = false;
        self.health.set_active(false);
        self.watcher = None;
        if let Some(handle) = self.processor.take() {
            handle
                .join()
                .map_err(|_| CoreError::watch("processor thread panicked"))?;
        }
        Ok(())
    }

    /// Quiet-window batching loop.
    fn process_events(
        event_rx: Receiver<Event>,
        sink: Arc<Mutex<dyn WatchSink>>,
        config: WatchConfig,
        running: Arc<Mutex<bool>>,
        health: HealthHandle,
    ) {
        let mut pending: HashSet<PathBuf> = HashSet::new();
        let mut last_event: Option<Instant> = None;

        while *running.lock() {
            match event_rx.recv_timeout(TICK) {
                Ok(event) => {
                    health.record_event();
                    for path in Self::relevant_paths(&event, &config) {
                        pending.insert(path);
                    }
                    if !pending.is_empty() {
                        last_event = Some(Instant::now());
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }

            let quiet = last_event.map_or(false, |at| at.elapsed() >= config.debounce);
            if quiet && !pending.is_empty() {
                let mut batch: Vec<PathBuf> = pending.drain().collect();
                batch.sort();
                last_event = None;
                debug!(count = batch.len(), "flushing change batch");
                sink.lock().on_batch(batch);
            }
        }

        // flush whatever is left on shutdown
        if !pending.is_empty() {
            let mut batch: Vec<PathBuf> = pending.drain().collect();
            batch.sort();
            sink.lock().on_batch(batch);
        }
    }

    /// Filter one backend event down to the paths worth re-indexing.
    fn relevant_paths(event: &Event, config: &WatchConfig) -> Vec<PathBuf> {
        let wanted_kind = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        );
        if !wanted_kind {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|path| !Self::should_ignore(path, &config.ignore_patterns))
            .filter(|path| {
                if config.extensions.is_empty() {
                    return true;
                }
                path.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |ext| config.extensions.iter().any(|x| x == ext))
            })
            .cloned()
            .collect()
    }

    fn should_ignore(path: &Path, ignore_patterns: &[String]) -> bool {
        let Some(path_str) = path.to_str() else {
            return false;
        };
        for pattern in ignore_patterns {
            if pattern.contains("**") {
                for part in pattern.split("**") {
                    let part = part.trim_matches('/');
                    if part.is_empty() {
                        continue;
                    }
                    if path_str.contains(&format!("/{part}/"))
                        || path_str.ends_with(&format!("/{part}"))
                        || path_str.starts_with(&format!("{part}/"))
                    {
                        return true;
                    }
                }
            } else if path_str.contains(pattern.as_str()) {
                return true;
            }
        }
        false
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
