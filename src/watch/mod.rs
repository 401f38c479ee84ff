//! Debounced directory watching.
//!
//! A [`DirWatcher`] observes one directory (non-recursive) and invokes a
//! callback with the coalesced set of changed paths once the filesystem has
//! been quiet for the debounce interval. Editors routinely produce bursts of
//! events for a single save; the quiescence window folds each burst into one
//! rebind.
//!
//! Dispatch runs on a dedicated thread and is serialized: while the callback
//! is executing, further events only accumulate.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

/// Watcher lifecycle errors.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher is already open")]
    AlreadyOpen,

    #[error("watcher is not open")]
    NotOpen,

    #[error(transparent)]
    Notify(#[from] notify::Error),
}

#[derive(Default)]
struct State {
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
    paused: bool,
    closing: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn push(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let mut state = self.state.lock().unwrap();
        state.pending.extend(paths);
        state.last_event = Some(Instant::now());
        self.cond.notify_all();
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock().unwrap();
        state.paused = paused;
        self.cond.notify_all();
    }

    fn set_closing(&self) {
        let mut state = self.state.lock().unwrap();
        state.closing = true;
        self.cond.notify_all();
    }
}

/// Dispatch loop: waits for a batch of events, then for quiescence, then
/// hands the coalesced set to the callback. Returns when closing is flagged.
fn run_dispatch(
    shared: &Shared,
    debounce: Duration,
    callback: &mut dyn FnMut(&BTreeSet<PathBuf>),
) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.closing {
            return;
        }
        if state.pending.is_empty() || state.paused {
            state = shared.cond.wait(state).unwrap();
            continue;
        }

        // Deliver only once the burst has gone quiet; every new event pushes
        // the deadline out again.
        let since_last = state
            .last_event
            .map(|t| t.elapsed())
            .unwrap_or(debounce);
        if since_last < debounce {
            let (guard, _) = shared
                .cond
                .wait_timeout(state, debounce - since_last)
                .unwrap();
            state = guard;
            continue;
        }

        let batch = std::mem::take(&mut state.pending);
        state.last_event = None;
        drop(state);
        callback(&batch);
        state = shared.state.lock().unwrap();
    }
}

struct OpenState {
    // Kept alive for the duration of the watch; dropping it stops the
    // underlying OS watch.
    _watcher: RecommendedWatcher,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Debounced watcher for a single directory.
pub struct DirWatcher {
    dir: PathBuf,
    debounce: Duration,
    open: Option<OpenState>,
}

impl DirWatcher {
    /// Default quiescence window.
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

    /// Create a closed watcher for `dir` with the default debounce.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirWatcher::with_debounce(dir, DirWatcher::DEFAULT_DEBOUNCE)
    }

    /// Create a closed watcher with an explicit debounce interval.
    pub fn with_debounce(dir: impl Into<PathBuf>, debounce: Duration) -> Self {
        DirWatcher {
            dir: dir.into(),
            debounce,
            open: None,
        }
    }

    /// Watched directory.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Whether the watcher is currently open.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Start watching. Fails if already open.
    ///
    /// `callback` receives the coalesced set of changed paths; it runs on the
    /// watcher's dispatch thread.
    pub fn open<F>(&mut self, mut callback: F) -> Result<(), WatchError>
    where
        F: FnMut(&BTreeSet<PathBuf>) + Send + 'static,
    {
        if self.open.is_some() {
            return Err(WatchError::AlreadyOpen);
        }

        let shared = Arc::new(Shared::default());
        let event_shared = shared.clone();
        let event_dir = self.dir.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => event_shared.push(event.paths),
                Err(err) => {
                    tracing::warn!("watch error on {}: {}", event_dir.display(), err);
                }
            })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        tracing::debug!("watching {}", self.dir.display());

        let loop_shared = shared.clone();
        let debounce = self.debounce;
        let thread = std::thread::spawn(move || {
            run_dispatch(&loop_shared, debounce, &mut callback);
        });

        self.open = Some(OpenState {
            _watcher: watcher,
            shared,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Suspend delivery; events keep accumulating. Idempotent while open.
    pub fn pause(&self) -> Result<(), WatchError> {
        let open = self.open.as_ref().ok_or(WatchError::NotOpen)?;
        open.shared.set_paused(true);
        Ok(())
    }

    /// Resume delivery; a pending batch is dispatched after the usual
    /// quiescence window. Idempotent while open.
    pub fn resume(&self) -> Result<(), WatchError> {
        let open = self.open.as_ref().ok_or(WatchError::NotOpen)?;
        open.shared.set_paused(false);
        Ok(())
    }

    /// Stop watching and join the dispatch thread. Fails if not open.
    pub fn close(&mut self) -> Result<(), WatchError> {
        let mut open = self.open.take().ok_or(WatchError::NotOpen)?;
        open.shared.set_closing();
        if let Some(thread) = open.thread.take() {
            if thread.join().is_err() {
                tracing::error!(
                    "watch dispatch thread for {} panicked in a callback",
                    self.dir.display()
                );
            }
        }
        tracing::debug!("stopped watching {}", self.dir.display());
        Ok(())
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
