//! Handle-indexed table of watched files.
//!
//! The monitor is constructed lazily by the file handler on first use.
//! A notify watcher on each file's parent directory reports which
//! directories changed, and only entries under a reported directory
//! are re-stat'ed; verdicts still come from comparing a stat snapshot
//! taken at registration (or the last `set_unmodified`) against the
//! file's current shape. Entries whose parent could not be watched,
//! and every entry when the watcher is inactive or reported nothing,
//! fall back to a full stat sweep, so watches on not-yet-existing
//! files work and a missed notification cannot wedge a rank in
//! "unmodified".

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Modification state of one watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Unmodified,
    Modified,
    Deleted,
}

/// Stat snapshot used to detect modification.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    mtime: SystemTime,
    len: u64,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Snapshot> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Snapshot {
            mtime: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

struct WatchEntry {
    path: PathBuf,
    state: FileState,
    snapshot: Option<Snapshot>,
}

fn refresh(entry: &mut WatchEntry) {
    let current = Snapshot::take(&entry.path);
    entry.state = match (entry.snapshot, current) {
        (Some(before), Some(now)) if before != now => FileState::Modified,
        (Some(_), None) => FileState::Deleted,
        (None, Some(_)) => FileState::Modified, // appeared since registration
        _ => entry.state,
    };
}

/// One refcounted parent-directory registration. `active` is false
/// when the watcher rejected the directory (typically because it does
/// not exist yet); entries under it are polled unconditionally.
struct DirWatch {
    refs: usize,
    active: bool,
}

/// Window for in-flight notifications to land before a sweep decides
/// which entries to stat.
const EVENT_SETTLE: Duration = Duration::from_millis(100);

/// Quiet period that ends draining once a burst of notifications has
/// been collected.
const EVENT_QUIET: Duration = Duration::from_millis(10);

/// Watch table with first-fit reuse of freed handles.
pub struct FileMonitor {
    entries: Vec<Option<WatchEntry>>,
    watcher: Option<RecommendedWatcher>,
    events: Option<Receiver<notify::Result<notify::Event>>>,
    /// Parent directories registered with the watcher, refcounted so a
    /// shared parent survives removal of one of its files.
    watched_dirs: HashMap<PathBuf, DirWatch>,
}

impl Default for FileMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileMonitor {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            watcher: None,
            events: None,
            watched_dirs: HashMap::new(),
        }
    }

    fn ensure_watcher(&mut self) {
        if self.watcher.is_some() {
            return;
        }
        let (tx, rx) = channel();
        match RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        ) {
            Ok(watcher) => {
                self.watcher = Some(watcher);
                self.events = Some(rx);
            }
            Err(e) => {
                // stat comparison still works without notifications
                warn!(error = %e, "failed to start file watcher, falling back to stat polling");
            }
        }
    }

    fn watch_parent(&mut self, path: &Path) {
        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            return;
        };
        let dir = self
            .watched_dirs
            .entry(parent.clone())
            .or_insert(DirWatch { refs: 0, active: false });
        dir.refs += 1;
        if dir.refs == 1 {
            if let Some(watcher) = self.watcher.as_mut() {
                match watcher.watch(&parent, RecursiveMode::NonRecursive) {
                    Ok(()) => dir.active = true,
                    Err(e) => {
                        debug!(dir = %parent.display(), error = %e, "cannot watch directory");
                    }
                }
            }
        }
    }

    fn unwatch_parent(&mut self, path: &Path) {
        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            return;
        };
        if let Some(dir) = self.watched_dirs.get_mut(&parent) {
            dir.refs -= 1;
            if dir.refs == 0 {
                let was_active = dir.active;
                self.watched_dirs.remove(&parent);
                if was_active {
                    if let Some(watcher) = self.watcher.as_mut() {
                        let _ = watcher.unwatch(&parent);
                    }
                }
            }
        }
    }

    /// Register a watch, deduplicating by path: a second registration
    /// returns the existing handle without growing the table.
    pub fn add_watch(&mut self, path: &Path) -> usize {
        if let Some(existing) = self.find_watch(path) {
            return existing;
        }
        self.ensure_watcher();
        self.watch_parent(path);

        let entry = WatchEntry {
            path: path.to_path_buf(),
            state: FileState::Unmodified,
            snapshot: Snapshot::take(path),
        };
        // first-fit over previously freed slots before growing
        match self.entries.iter().position(Option::is_none) {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    /// Handle watching `path`, if any.
    pub fn find_watch(&self, path: &Path) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.path == path))
    }

    /// Free a handle. Returns false for an unknown handle.
    pub fn remove_watch(&mut self, handle: usize) -> bool {
        match self.entries.get_mut(handle).and_then(Option::take) {
            Some(entry) => {
                self.unwatch_parent(&entry.path);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, handle: usize) -> Option<FileState> {
        self.entries.get(handle)?.as_ref().map(|e| e.state)
    }

    pub fn path(&self, handle: usize) -> Option<&Path> {
        self.entries.get(handle)?.as_ref().map(|e| e.path.as_path())
    }

    /// Re-snapshot the file and mark it unmodified.
    pub fn set_unmodified(&mut self, handle: usize) -> bool {
        match self.entries.get_mut(handle).and_then(Option::as_mut) {
            Some(entry) => {
                entry.snapshot = Snapshot::take(&entry.path);
                entry.state = FileState::Unmodified;
                true
            }
            None => false,
        }
    }

    /// Number of live watches.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watched paths in handle order.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .flatten()
            .map(|e| e.path.clone())
            .collect()
    }

    /// Paths the watcher reported since the last sweep, together with
    /// their parent directories. `None` when the watcher is inactive
    /// or reported nothing.
    fn drain_events(&mut self) -> Option<HashSet<PathBuf>> {
        let events = self.events.as_ref()?;
        let mut dirty: HashSet<PathBuf> = HashSet::new();
        let mut mark = |result: notify::Result<notify::Event>, dirty: &mut HashSet<PathBuf>| {
            match result {
                Ok(event) => {
                    debug!(?event, "watch event");
                    for path in event.paths {
                        if let Some(parent) = path.parent() {
                            dirty.insert(parent.to_path_buf());
                        }
                        dirty.insert(path);
                    }
                }
                Err(e) => warn!(error = %e, "watch error"),
            }
        };
        // give an in-flight notification a moment to land, then keep
        // draining until the burst goes quiet
        if let Ok(result) = events.recv_timeout(EVENT_SETTLE) {
            mark(result, &mut dirty);
            while let Ok(result) = events.recv_timeout(EVENT_QUIET) {
                mark(result, &mut dirty);
            }
        }
        (!dirty.is_empty()).then_some(dirty)
    }

    /// Refresh watched-file states against the filesystem on this
    /// rank. Watcher notifications choose which entries to stat;
    /// the stat comparison alone decides each verdict. Without any
    /// notifications every entry is stat'ed.
    pub fn update_states(&mut self) {
        match self.drain_events() {
            Some(dirty) => {
                for entry in self.entries.iter_mut().flatten() {
                    let parent = entry.path.parent();
                    let covered = parent
                        .and_then(|p| self.watched_dirs.get(p))
                        .is_some_and(|d| d.active);
                    let touched = dirty.contains(&entry.path)
                        || parent.is_some_and(|p| dirty.contains(p));
                    if !covered || touched {
                        refresh(entry);
                    }
                }
            }
            None => {
                for entry in self.entries.iter_mut().flatten() {
                    refresh(entry);
                }
            }
        }
    }

    /// States for every slot, scatterable to other ranks.
    pub fn states(&self) -> Vec<Option<FileState>> {
        self.entries
            .iter()
            .map(|e| e.as_ref().map(|e| e.state))
            .collect()
    }

    /// Adopt states computed on the master rank; slot indices align
    /// because every rank registers the same watch set.
    pub fn apply_states(&mut self, states: &[Option<FileState>]) {
        for (slot, state) in states.iter().enumerate() {
            if let (Some(Some(entry)), Some(state)) = (self.entries.get_mut(slot), state) {
                entry.state = *state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_deduplication() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("controlDict");
        std::fs::write(&file, b"a").unwrap();

        let mut monitor = FileMonitor::new();
        let first = monitor.add_watch(&file);
        let second = monitor.add_watch(&file);
        assert_eq!(first, second);
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_modification_detected() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("controlDict");
        std::fs::write(&file, b"deltaT 1;").unwrap();

        let mut monitor = FileMonitor::new();
        let handle = monitor.add_watch(&file);
        assert_eq!(monitor.state(handle), Some(FileState::Unmodified));

        std::fs::write(&file, b"deltaT 0.5;").unwrap();
        monitor.update_states();
        assert_eq!(monitor.state(handle), Some(FileState::Modified));

        monitor.set_unmodified(handle);
        assert_eq!(monitor.state(handle), Some(FileState::Unmodified));
        monitor.update_states();
        assert_eq!(monitor.state(handle), Some(FileState::Unmodified));
    }

    #[test]
    fn test_deleted_and_not_yet_existing() {
        let temp = tempfile::tempdir().unwrap();
        let present = temp.path().join("present");
        let pending = temp.path().join("pending");
        std::fs::write(&present, b"x").unwrap();

        let mut monitor = FileMonitor::new();
        let h_present = monitor.add_watch(&present);
        let h_pending = monitor.add_watch(&pending);

        std::fs::remove_file(&present).unwrap();
        std::fs::write(&pending, b"now exists").unwrap();
        monitor.update_states();

        assert_eq!(monitor.state(h_present), Some(FileState::Deleted));
        assert_eq!(monitor.state(h_pending), Some(FileState::Modified));
    }

    #[test]
    fn test_unwatchable_parent_still_polled() {
        let temp = tempfile::tempdir().unwrap();
        let pending_dir = temp.path().join("later");
        let file = pending_dir.join("controlDict");

        // parent does not exist, so the watcher cannot cover it
        let mut monitor = FileMonitor::new();
        let handle = monitor.add_watch(&file);
        assert_eq!(monitor.state(handle), Some(FileState::Unmodified));

        std::fs::create_dir_all(&pending_dir).unwrap();
        std::fs::write(&file, b"deltaT 1;").unwrap();
        monitor.update_states();
        assert_eq!(monitor.state(handle), Some(FileState::Modified));
    }

    #[test]
    fn test_concurrent_changes_across_directories() {
        let temp = tempfile::tempdir().unwrap();
        let dir_a = temp.path().join("system");
        let dir_b = temp.path().join("constant");
        std::fs::create_dir_all(&dir_a).unwrap();
        std::fs::create_dir_all(&dir_b).unwrap();
        let file_a = dir_a.join("controlDict");
        let file_b = dir_b.join("transportProperties");
        std::fs::write(&file_a, b"a").unwrap();
        std::fs::write(&file_b, b"b").unwrap();

        let mut monitor = FileMonitor::new();
        let h_a = monitor.add_watch(&file_a);
        let h_b = monitor.add_watch(&file_b);

        std::fs::write(&file_a, b"aa").unwrap();
        std::fs::write(&file_b, b"bbb").unwrap();
        monitor.update_states();
        assert_eq!(monitor.state(h_a), Some(FileState::Modified));
        assert_eq!(monitor.state(h_b), Some(FileState::Modified));
    }

    #[test]
    fn test_freed_slots_reused_first_fit() {
        let temp = tempfile::tempdir().unwrap();
        let mut monitor = FileMonitor::new();
        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let file = temp.path().join(name);
            std::fs::write(&file, b"x").unwrap();
            handles.push(monitor.add_watch(&file));
        }
        assert!(monitor.remove_watch(handles[1]));
        assert!(!monitor.remove_watch(handles[1]));

        let file = temp.path().join("d");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(monitor.add_watch(&file), handles[1]);
        assert_eq!(monitor.len(), 3);
    }

    #[test]
    fn test_apply_states_from_master() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("only-on-master");
        std::fs::write(&file, b"x").unwrap();

        let mut monitor = FileMonitor::new();
        let handle = monitor.add_watch(&file);
        monitor.apply_states(&[Some(FileState::Modified)]);
        assert_eq!(monitor.state(handle), Some(FileState::Modified));
    }
}
