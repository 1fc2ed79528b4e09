//! Case directory layout context.
//!
//! An explicit value passed to every component that composes paths;
//! nothing holds a backpointer into a database.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Reserved instance directory for time-independent data shared by all
/// time steps.
pub const CONSTANT: &str = "constant";

/// Reserved instance directory for solver control data.
pub const SYSTEM: &str = "system";

/// Where a case lives on disk and which rank (if any) this process is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseLayout {
    /// Root directory holding the case.
    pub root: PathBuf,
    /// Undecomposed case name.
    pub case: String,
    /// This process's rank in a decomposed run; `None` for serial.
    pub processor: Option<usize>,
    /// Number of ranks in the decomposition.
    pub n_procs: usize,
    /// Scope contribution of the registry doing the lookup
    /// (e.g. `uniform` for a sub-registry persisted under it).
    pub db_dir: PathBuf,
    /// Whether case roots differ per rank (distributed storage).
    pub distributed: bool,
}

impl CaseLayout {
    pub fn new(root: impl Into<PathBuf>, case: &str) -> Self {
        Self {
            root: root.into(),
            case: case.to_string(),
            processor: None,
            n_procs: 1,
            db_dir: PathBuf::new(),
            distributed: false,
        }
    }

    pub fn with_processor(mut self, rank: usize, n_procs: usize) -> Self {
        self.processor = Some(rank);
        self.n_procs = n_procs;
        self
    }

    pub fn with_db_dir(mut self, db_dir: impl Into<PathBuf>) -> Self {
        self.db_dir = db_dir.into();
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.processor.is_some()
    }

    /// Case directory for this rank:
    /// `root/case` serial, `root/case/processorN` decomposed.
    pub fn case_path(&self) -> PathBuf {
        match self.processor {
            Some(rank) => self.root.join(&self.case).join(format!("processor{rank}")),
            None => self.root.join(&self.case),
        }
    }

    /// Undecomposed case directory, shared by all ranks.
    pub fn global_case_path(&self) -> PathBuf {
        self.root.join(&self.case)
    }

    /// Whether `instance` names one of the shared special directories
    /// that a decomposed run may resolve from the undecomposed case.
    pub fn is_shared_instance(instance: &Path) -> bool {
        instance == Path::new(CONSTANT) || instance == Path::new(SYSTEM)
    }
}
