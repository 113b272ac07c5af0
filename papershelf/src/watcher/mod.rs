use crate::canonical::canonical_path;
use crate::error::Result;
use crate::library::Library;
pub use crate::record::is_document_file;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// A change to the library made outside papershelf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    Renamed { from: PathBuf, to: PathBuf },
    Created(PathBuf),
    Removed(PathBuf),
}

/// Watches a library directory and reports document changes.
/// Debounced events arrive on `event_rx` in the order they happened.
pub struct LibraryWatcher {
    _watcher: RecommendedWatcher,
    _thread: std::thread::JoinHandle<()>,
    pub event_rx: mpsc::Receiver<LibraryEvent>,
}

impl LibraryWatcher {
    /// Watch `root` recursively. Events under any of `ignore_dirs` (the
    /// virtual folders, whose links would otherwise echo back) are dropped.
    pub fn start(root: &Path, ignore_dirs: &[PathBuf]) -> Result<Self> {
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let (event_tx, event_rx) = mpsc::channel::<LibraryEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        log::info!("Watching {}", root.display());

        let ignored: Vec<PathBuf> = ignore_dirs
            .iter()
            .map(|d| PathBuf::from(canonical_path(d)))
            .chain(ignore_dirs.iter().cloned())
            .collect();

        let thread = std::thread::spawn(move || {
            let mut pending: Vec<LibraryEvent> = Vec::new();
            let mut last_event = Instant::now();

            loop {
                match notify_rx.recv_timeout(DEBOUNCE) {
                    Ok(Ok(event)) => {
                        pending.extend(
                            classify_event(event)
                                .into_iter()
                                .filter(|e| !is_ignored(e, &ignored)),
                        );
                        last_event = Instant::now();
                    }
                    Ok(Err(e)) => {
                        log::warn!("File watcher error: {e}");
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if !pending.is_empty() && last_event.elapsed() >= DEBOUNCE {
                            for event in coalesce(std::mem::take(&mut pending)) {
                                if event_tx.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(LibraryWatcher {
            _watcher: watcher,
            _thread: thread,
            event_rx,
        })
    }
}

/// Translate a raw notify event. Only documents count, except that a renamed
/// directory is reported because it carries documents with it.
pub fn classify_event(event: Event) -> Vec<LibraryEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] if is_document_file(from) || is_document_file(to) || to.is_dir() => {
                vec![LibraryEvent::Renamed {
                    from: from.clone(),
                    to: to.clone(),
                }]
            }
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter(|p| is_document_file(p))
            .map(LibraryEvent::Removed)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) | EventKind::Create(_) => event
            .paths
            .into_iter()
            .filter(|p| is_document_file(p))
            .map(LibraryEvent::Created)
            .collect(),
        _ => Vec::new(),
    }
}

/// Drop the half-events a backend reports alongside a paired rename, and
/// repeats of the same event, keeping the original order.
pub fn coalesce(events: Vec<LibraryEvent>) -> Vec<LibraryEvent> {
    let mut rename_sources = HashSet::new();
    let mut rename_targets = HashSet::new();
    for event in &events {
        if let LibraryEvent::Renamed { from, to } = event {
            rename_sources.insert(from.clone());
            rename_targets.insert(to.clone());
        }
    }

    let mut out: Vec<LibraryEvent> = Vec::with_capacity(events.len());
    for event in events {
        let redundant = match &event {
            LibraryEvent::Removed(p) => rename_sources.contains(p),
            LibraryEvent::Created(p) => rename_targets.contains(p),
            LibraryEvent::Renamed { .. } => false,
        };
        if redundant || out.last() == Some(&event) {
            continue;
        }
        out.push(event);
    }
    out
}

/// Bring the store and virtual folders in line with `event`.
pub fn apply_event(library: &Library<'_>, event: &LibraryEvent) -> Result<()> {
    match event {
        LibraryEvent::Renamed { from, to } => {
            let moved = library.track_move(&canonical_path(from), to)?;
            log::info!("{} -> {}: {moved} record(s) moved", from.display(), to.display());
        }
        LibraryEvent::Created(path) | LibraryEvent::Removed(path) => {
            log::debug!("{} changed, resyncing folders", path.display());
            library.sync_folders()?;
        }
    }
    Ok(())
}

fn is_ignored(event: &LibraryEvent, ignored: &[PathBuf]) -> bool {
    let under = |p: &Path| ignored.iter().any(|dir| p.starts_with(dir));
    match event {
        LibraryEvent::Renamed { from, to } => under(from) && under(to),
        LibraryEvent::Created(p) | LibraryEvent::Removed(p) => under(p),
    }
}
