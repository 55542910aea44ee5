//! Filesystem change source.
//!
//! Thin layer over the notify crate. The tree under the root is enumerated
//! with walkdir and every directory the filter accepts is registered on its
//! own, so rejected subtrees never cost a watch. Directories created later
//! are registered as they appear.

use std::{
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use notify::{op, raw_watcher, RawEvent, RecommendedWatcher, RecursiveMode, Watcher};
use walkdir::WalkDir;

use crate::{error::Result, filter::PathFilter, logging::Logger};

/// Stops one or more [`ChangeSource`]s.
///
/// Cancelling is permanent. A source created from an already cancelled
/// handle yields nothing.
#[derive(Clone, Default)]
pub struct Canceller {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Sender<RawEvent>>>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for waker in wakers.iter() {
            // a pathless, empty event: the source checks the flag after every event
            let _ = waker.send(RawEvent {
                path: None,
                op: Ok(op::Op::empty()),
                cookie: None,
            });
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn attach(&self, waker: Sender<RawEvent>) {
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(waker);
    }
}

impl std::fmt::Debug for Canceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceller")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Lazy, unbounded sequence of changed paths under a root.
///
/// Iterating blocks until something changes. The sequence ends once the
/// [`Canceller`] it was created with fires; all OS watches are released then.
pub struct ChangeSource {
    root: PathBuf,
    filter: Arc<dyn PathFilter>,
    watcher: Option<RecommendedWatcher>,
    events: Receiver<RawEvent>,
    cancel: Canceller,
    watches: usize,
    log: Logger,
}

impl ChangeSource {
    /// Start watching `root`.
    ///
    /// Only failing to set up the watch backend is an error. Directories that
    /// can't be read or watched are logged and skipped.
    pub fn new(
        root: impl AsRef<Path>,
        cancel: Canceller,
        filter: Arc<dyn PathFilter>,
        log: Logger,
    ) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let (tx, events) = channel();
        let watcher = raw_watcher(tx.clone())?;
        cancel.attach(tx);

        let mut source = Self {
            root,
            filter,
            watcher: Some(watcher),
            events,
            cancel,
            watches: 0,
            log,
        };

        let root = source.root.clone();
        source.register(&root);
        source.log.info(format_args!(
            "watching {} directories under {}",
            source.watches,
            source.root.display()
        ));

        Ok(source)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of directories currently registered with the backend.
    pub fn watches(&self) -> usize {
        self.watches
    }

    /// Wait for a change, then keep collecting until nothing has changed for
    /// `quiet`. Returns `None` once cancelled, also when the cancel lands
    /// while a batch is being collected: that batch is dropped.
    pub fn next_batch(&mut self, quiet: Duration) -> Option<Vec<String>> {
        let mut batch = vec![self.next()?];

        loop {
            match self.events.recv_timeout(quiet) {
                Ok(_) if self.cancel.is_cancelled() => break,
                Ok(event) => {
                    if let Some(path) = self.handle(event) {
                        if !batch.contains(&path) {
                            batch.push(path);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.cancel.is_cancelled() {
            self.log
                .debug(format_args!("cancelled, dropping {} pending changes", batch.len()));
            self.close();
            return None;
        }

        Some(batch)
    }

    fn register(&mut self, dir: &Path) {
        let watcher = match &mut self.watcher {
            Some(watcher) => watcher,
            None => return,
        };

        let root = &self.root;
        let filter = &self.filter;
        let log = &self.log;
        let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
            entry.file_type().is_dir() && accepted(root, filter.as_ref(), entry.path())
        });

        for entry in walker {
            match entry {
                Ok(entry) => match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        self.watches += 1;
                        log.trace(format_args!("watching {}", entry.path().display()));
                    }
                    Err(err) => log.warn(format_args!(
                        "cannot watch {}, skipping it: {}",
                        entry.path().display(),
                        err
                    )),
                },
                Err(err) => log.warn(format_args!("cannot read {}", err)),
            }
        }
    }

    fn handle(&mut self, event: RawEvent) -> Option<String> {
        let RawEvent { path, op, .. } = event;

        let op = match op {
            Ok(op) => op,
            Err(err) => {
                self.log.warn(format_args!("watch error: {}", err));
                return None;
            }
        };
        let path = path?;

        if !accepted(&self.root, self.filter.as_ref(), &path) {
            self.log
                .trace(format_args!("filtered out {}", path.display()));
            return None;
        }

        if op.contains(op::CREATE) && path.is_dir() {
            self.register(&path);
        }

        self.log
            .debug(format_args!("{:?} {}", op, path.display()));
        Some(path.to_string_lossy().into_owned())
    }

    fn close(&mut self) {
        if self.watcher.take().is_some() {
            self.log
                .debug(format_args!("released {} watches", self.watches));
            self.watches = 0;
        }
    }
}

impl Iterator for ChangeSource {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if self.cancel.is_cancelled() {
                self.close();
                return None;
            }

            let event = self.events.recv().ok()?;
            if self.cancel.is_cancelled() {
                continue;
            }

            if let Some(path) = self.handle(event) {
                return Some(path);
            }
        }
    }
}

impl std::fmt::Debug for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSource")
            .field("root", &self.root)
            .field("watches", &self.watches)
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// `/`-separated path relative to `root`, empty for the root itself.
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .filter_map(|part| match part {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

fn accepted(root: &Path, filter: &dyn PathFilter, path: &Path) -> bool {
    match relative(root, path) {
        Some(rel) if rel.is_empty() => true,
        Some(rel) => filter.accepts(&rel),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_use_slashes() {
        let root = Path::new("/srv/app");

        assert_eq!(
            relative(root, Path::new("/srv/app/src/main.rs")).as_deref(),
            Some("src/main.rs")
        );
        assert_eq!(relative(root, root).as_deref(), Some(""));
        assert_eq!(relative(root, Path::new("/srv/other")), None);
    }

    #[test]
    fn root_is_always_accepted() {
        let root = Path::new("/srv/app");
        let nothing = |_: &str| false;

        assert!(accepted(root, &nothing, root));
        assert!(!accepted(root, &nothing, &root.join("src")));
        assert!(!accepted(root, &nothing, Path::new("/elsewhere")));
    }

    #[test]
    fn cancel_is_sticky_and_wakes_attached_sources() {
        let cancel = Canceller::new();
        let (tx, rx) = channel();
        cancel.attach(tx);

        cancel.cancel();
        cancel.cancel();

        assert!(cancel.is_cancelled());
        assert!(cancel.clone().is_cancelled());
        assert_eq!(rx.try_iter().count(), 1);
    }
}
