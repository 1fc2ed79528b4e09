//! # simcase-fileops
//!
//! Pluggable mapping between case objects and the on-disk case layout.
//!
//! A [`FileHandler`] resolves an object identity to an actual file
//! (reconciling time directories, processor decompositions and collated
//! containers), reads and writes header/body files, and tracks file
//! modifications through a handle-indexed watch table. The process-wide
//! handler is an explicitly swappable slot: [`replace_handler`] returns
//! the previous strategy for orderly teardown.

pub mod header;
pub mod monitor;
pub mod resolve;
pub mod uncollated;

pub use header::{Format, ObjectHeader, StoredObject};
pub use monitor::{FileMonitor, FileState};
pub use resolve::{PathKind, ProcDirKind, Resolved};
pub use uncollated::UncollatedFileOps;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use simcase_comm::{CommError, CommSchedule, Communicator};
use simcase_ident::{CaseLayout, ObjectId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileOpsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("text codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    #[error("object '{object}': header class '{actual}' does not match expected '{expected}'")]
    HeaderMismatch {
        object: String,
        expected: String,
        actual: String,
    },

    #[error("unknown file handler '{0}'")]
    UnknownHandler(String),

    #[error("object '{object}' not found; attempted {attempted:?}")]
    NotFound {
        object: String,
        attempted: Vec<PathBuf>,
    },

    #[error("no watch registered under handle {0}")]
    BadWatchHandle(usize),
}

pub type Result<T> = std::result::Result<T, FileOpsError>;

/// Strategy mapping case objects to and from the filesystem.
///
/// Resolution methods never fail on absence: a missing object is data,
/// not an error, and callers with `MustRead` semantics escalate it
/// themselves (see [`must_read`]).
pub trait FileHandler: Send + Sync {
    /// Strategy name as selected by configuration.
    fn kind(&self) -> &str;

    /// Resolve the file holding `io`'s data, or `None`.
    fn file_path(&self, check_global: bool, layout: &CaseLayout, io: &ObjectId)
        -> Option<Resolved>;

    /// Resolve the directory holding `io`'s data, or `None`.
    fn dir_path(&self, check_global: bool, layout: &CaseLayout, io: &ObjectId) -> Option<Resolved>;

    /// Sorted time-directory names under the case: `constant` first,
    /// then numeric instances ascending.
    fn find_times(&self, layout: &CaseLayout) -> Vec<String>;

    /// Read only the header block of a stored object file.
    fn read_header(&self, path: &Path) -> Result<ObjectHeader>;

    /// Resolve and read an object on this rank alone. `Ok(None)` when
    /// the object is absent; a header-class mismatch errors only when
    /// `strict`, and warns otherwise.
    fn read_object(
        &self,
        check_global: bool,
        layout: &CaseLayout,
        io: &ObjectId,
        expected: &str,
        strict: bool,
    ) -> Result<Option<StoredObject>>;

    /// Write an object under its composed path, creating parent
    /// directories. Returns the written path.
    fn write_object(
        &self,
        layout: &CaseLayout,
        io: &ObjectId,
        stored: &StoredObject,
    ) -> Result<PathBuf>;

    /// The parallel read protocol. Without `master_only` every rank
    /// reads independently; with it only the master touches the disk
    /// and header plus body propagate along `sched`, each rank
    /// receiving from upstream before forwarding downstream.
    fn read(
        &self,
        comm: &dyn Communicator,
        sched: &CommSchedule,
        master_only: bool,
        check_global: bool,
        layout: &CaseLayout,
        io: &ObjectId,
        expected: &str,
        strict: bool,
    ) -> Result<Option<StoredObject>>;

    /// Register a watch for `path`, deduplicating: a second call with
    /// the same path returns the existing handle.
    fn add_watch(&self, path: &Path) -> Result<usize>;

    /// Drop a watch. Returns false for an unknown handle.
    fn remove_watch(&self, handle: usize) -> bool;

    /// Handle watching `path`, if any.
    fn find_watch(&self, path: &Path) -> Option<usize>;

    /// Current state of a watched file.
    fn watch_state(&self, handle: usize) -> Result<FileState>;

    /// Snapshot the file's current shape and mark it unmodified.
    fn set_unmodified(&self, handle: usize) -> Result<()>;

    /// Refresh every handle's modified state. With `master_only` the
    /// master evaluates and the verdicts are scattered along `sched`
    /// so every rank reaches the same answer for files only physically
    /// present on one rank.
    fn update_states(
        &self,
        master_only: bool,
        comm: &dyn Communicator,
        sched: &CommSchedule,
    ) -> Result<()>;

    /// Paths currently watched, in handle order.
    fn watched_files(&self) -> Vec<PathBuf>;
}

/// Escalate an absent read result for `MustRead` semantics.
pub fn must_read(
    found: Option<StoredObject>,
    io: &ObjectId,
    attempted: Vec<PathBuf>,
) -> Result<StoredObject> {
    found.ok_or_else(|| FileOpsError::NotFound {
        object: io.name().to_string(),
        attempted,
    })
}

/// Construct a handler by configured kind.
pub fn make_handler(kind: &str) -> Result<Arc<dyn FileHandler>> {
    match kind {
        "uncollated" => Ok(Arc::new(UncollatedFileOps::new())),
        other => Err(FileOpsError::UnknownHandler(other.to_string())),
    }
}

static HANDLER: Lazy<RwLock<Arc<dyn FileHandler>>> =
    Lazy::new(|| RwLock::new(Arc::new(UncollatedFileOps::new())));

/// The process-wide file handler.
pub fn file_handler() -> Arc<dyn FileHandler> {
    HANDLER.read().unwrap().clone()
}

/// Install a new process-wide handler, returning the previous one for
/// disposal. Exactly one strategy is active at a time per process.
pub fn replace_handler(new: Arc<dyn FileHandler>) -> Arc<dyn FileHandler> {
    std::mem::replace(&mut *HANDLER.write().unwrap(), new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_handler() {
        assert_eq!(make_handler("uncollated").unwrap().kind(), "uncollated");
        assert!(matches!(
            make_handler("collated"),
            Err(FileOpsError::UnknownHandler(_))
        ));
    }

    #[test]
    fn test_replace_handler_returns_old() {
        let installed = file_handler();
        let replacement = make_handler("uncollated").unwrap();
        let old = replace_handler(replacement.clone());
        assert!(Arc::ptr_eq(&old, &installed));
        assert!(Arc::ptr_eq(&file_handler(), &replacement));
        replace_handler(old);
    }

    #[test]
    fn test_must_read_escalates_absence() {
        let io = simcase_ident::ObjectId::new("controlDict", "system");
        let err = must_read(None, &io, vec![PathBuf::from("/case/system/controlDict")]);
        assert!(matches!(err, Err(FileOpsError::NotFound { .. })));
    }
}
