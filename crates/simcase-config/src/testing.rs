//! Test environment abstraction for isolated case trees.
//!
//! `CaseEnvironment` owns a temporary directory and builds the on-disk
//! shape of a simulation case inside it: time directories,
//! `constant`/`system`, processor decompositions and object files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use simcase_ident::CaseLayout;
use tempfile::TempDir;

/// Atomic counter for unique test case names
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated case tree rooted in a temporary directory
pub struct CaseEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root directory holding the case
    pub root: PathBuf,
    /// Case name, unique per environment
    pub case: String,
}

impl CaseEnvironment {
    /// Create a new isolated case environment
    pub fn new() -> anyhow::Result<Self> {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        let case = format!("case{id}");

        std::fs::create_dir_all(root.join(&case))?;

        Ok(Self { _temp_dir: temp_dir, root, case })
    }

    /// Layout for the undecomposed case
    pub fn layout(&self) -> CaseLayout {
        CaseLayout::new(&self.root, &self.case)
    }

    /// Layout for one rank of a decomposed run
    pub fn processor_layout(&self, rank: usize, n_procs: usize) -> CaseLayout {
        self.layout().with_processor(rank, n_procs)
    }

    /// Path of the undecomposed case directory
    pub fn case_path(&self) -> PathBuf {
        self.root.join(&self.case)
    }

    /// Create an instance (time) directory under the case
    pub fn create_instance(&self, instance: &str) -> anyhow::Result<PathBuf> {
        let path = self.case_path().join(instance);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create `processor0..processorN-1` directories, each with the
    /// given instance directories
    pub fn create_processors(&self, n: usize, instances: &[&str]) -> anyhow::Result<()> {
        for rank in 0..n {
            let proc_dir = self.case_path().join(format!("processor{rank}"));
            std::fs::create_dir_all(&proc_dir)?;
            for instance in instances {
                std::fs::create_dir_all(proc_dir.join(instance))?;
            }
        }
        Ok(())
    }

    /// Write raw bytes as an object file under
    /// `<case>/<instance>/<local>/<name>`
    pub fn write_object(
        &self,
        instance: &str,
        local: &str,
        name: &str,
        contents: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let mut dir = self.case_path().join(instance);
        if !local.is_empty() {
            dir.push(local);
        }
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write raw bytes under one rank's processor directory
    pub fn write_processor_object(
        &self,
        rank: usize,
        instance: &str,
        name: &str,
        contents: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let dir = self
            .case_path()
            .join(format!("processor{rank}"))
            .join(instance);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Touch a file's modification time forward by rewriting it
    pub fn touch(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for CaseEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create case environment")
    }
}
