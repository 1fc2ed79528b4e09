//! Baseline file handling: every rank's data lives under its own
//! `processorN` directory with no inter-rank file sharing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::{debug, trace};

use simcase_comm::{broadcast_value, broadcast_with_schedule, CommSchedule, Communicator, MASTER};
use simcase_ident::{unique_file_name, CaseLayout, ObjectId};

use crate::header::{check_class, ObjectHeader, StoredObject};
use crate::monitor::{FileMonitor, FileState};
use crate::resolve::{self, PathKind, ProcDir, ProcDirKind, Resolved};
use crate::{FileHandler, FileOpsError, Result};

/// The uncollated file-handling strategy.
pub struct UncollatedFileOps {
    /// Discovered decomposition directories per case directory.
    proc_dirs: RwLock<HashMap<PathBuf, Vec<ProcDir>>>,
    monitor: Mutex<FileMonitor>,
}

impl Default for UncollatedFileOps {
    fn default() -> Self {
        Self::new()
    }
}

impl UncollatedFileOps {
    pub fn new() -> Self {
        Self {
            proc_dirs: RwLock::new(HashMap::new()),
            monitor: Mutex::new(FileMonitor::new()),
        }
    }

    fn cached_proc_dirs(&self, case_path: &Path) -> Vec<ProcDir> {
        if let Some(found) = self.proc_dirs.read().unwrap().get(case_path) {
            return found.clone();
        }
        let found = resolve::scan_proc_dirs(case_path);
        self.proc_dirs
            .write()
            .unwrap()
            .insert(case_path.to_path_buf(), found.clone());
        found
    }

    /// Shared resolution walk. `disk_name` is `Some` for file lookups
    /// and `None` for directory lookups.
    fn resolve(
        &self,
        check_global: bool,
        layout: &CaseLayout,
        io: &ObjectId,
        disk_name: Option<&str>,
    ) -> Option<Resolved> {
        let exists = |p: &Path| match disk_name {
            Some(_) => p.is_file(),
            None => p.is_dir(),
        };
        let finish = |dir: PathBuf| match disk_name {
            Some(name) => dir.join(name),
            None => dir,
        };

        // absolute instance: no composition, no fallbacks
        if io.instance.is_absolute() {
            let candidate = finish(io.instance.clone());
            return exists(&candidate)
                .then(|| Resolved::new(candidate, PathKind::AbsoluteObject));
        }

        // this rank's own case directory
        let candidate = finish(io.dir_path(layout));
        if exists(&candidate) {
            return Some(Resolved::new(candidate, PathKind::Object));
        }

        // shared constant/system data of the undecomposed case; objects
        // marked global are always searched there
        if (check_global || io.global)
            && layout.is_parallel()
            && CaseLayout::is_shared_instance(&io.instance)
        {
            let mut dir = layout.global_case_path().join(&io.instance);
            dir.push(&layout.db_dir);
            dir.push(&io.local);
            let candidate = finish(dir);
            if exists(&candidate) {
                return Some(Resolved::new(candidate, PathKind::ParentObject));
            }
        }

        // collated container directories covering this rank
        if let Some(rank) = layout.processor {
            for proc_dir in self.cached_proc_dirs(&layout.global_case_path()) {
                if !proc_dir.kind.covers(rank) {
                    continue;
                }
                let kind = match proc_dir.kind {
                    ProcDirKind::Uncollated { .. } => continue, // already tried via dir_path
                    ProcDirKind::Collated { .. } => PathKind::ProcBaseObject,
                    ProcDirKind::CollatedRange { .. } => PathKind::ProcObject,
                };
                let mut dir = proc_dir.path.join(&io.instance);
                dir.push(&layout.db_dir);
                dir.push(&io.local);
                let candidate = finish(dir);
                if exists(&candidate) {
                    return Some(Resolved::new(candidate, kind));
                }
            }
        }

        // time-directory naming skew: retry with a numerically equal
        // instance when the literal one does not exist
        let literal = layout.case_path().join(&io.instance);
        if !literal.is_dir() {
            if let Some(actual) =
                resolve::equal_time_instance(&layout.case_path(), &io.instance.to_string_lossy())
            {
                let mut corrected = io.clone();
                corrected.instance = PathBuf::from(actual);
                let candidate = finish(corrected.dir_path(layout));
                if exists(&candidate) {
                    return Some(Resolved::new(candidate, PathKind::Object));
                }
            }
        }

        trace!(object = %io.name(), "resolution exhausted");
        None
    }
}

impl FileHandler for UncollatedFileOps {
    fn kind(&self) -> &str {
        "uncollated"
    }

    fn file_path(
        &self,
        check_global: bool,
        layout: &CaseLayout,
        io: &ObjectId,
    ) -> Option<Resolved> {
        let disk_name = unique_file_name(io.name());
        self.resolve(check_global, layout, io, Some(&disk_name))
    }

    fn dir_path(&self, check_global: bool, layout: &CaseLayout, io: &ObjectId) -> Option<Resolved> {
        self.resolve(check_global, layout, io, None)
    }

    fn find_times(&self, layout: &CaseLayout) -> Vec<String> {
        resolve::find_times(&layout.case_path())
    }

    fn read_header(&self, path: &Path) -> Result<ObjectHeader> {
        let bytes = std::fs::read(path)?;
        Ok(StoredObject::from_bytes(&bytes)?.header)
    }

    fn read_object(
        &self,
        check_global: bool,
        layout: &CaseLayout,
        io: &ObjectId,
        expected: &str,
        strict: bool,
    ) -> Result<Option<StoredObject>> {
        let Some(resolved) = self.file_path(check_global, layout, io) else {
            return Ok(None);
        };
        debug!(object = %io.name(), path = %resolved.path.display(), kind = ?resolved.kind, "reading object");
        let bytes = std::fs::read(&resolved.path)?;
        let stored = StoredObject::from_bytes(&bytes)?;
        check_class(&stored.header, expected, strict)?;
        Ok(Some(stored))
    }

    fn write_object(
        &self,
        layout: &CaseLayout,
        io: &ObjectId,
        stored: &StoredObject,
    ) -> Result<PathBuf> {
        let dir = io.dir_path(layout);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(unique_file_name(io.name()));
        std::fs::write(&path, stored.to_bytes()?)?;
        debug!(object = %io.name(), path = %path.display(), "wrote object");
        Ok(path)
    }

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
    ) -> Result<Option<StoredObject>> {
        if !master_only || comm.size() == 1 {
            return self.read_object(check_global, layout, io, expected, strict);
        }

        if comm.rank() == MASTER {
            let found = self.read_object(check_global, layout, io, expected, strict)?;
            // header metadata first, so every rank agrees on the type
            let header = found.as_ref().map(|s| s.header.clone());
            broadcast_value::<Option<ObjectHeader>>(comm, sched, Some(&header))?;
            if let Some(stored) = &found {
                broadcast_with_schedule(comm, sched, Some(stored.body.clone()))?;
            }
            Ok(found)
        } else {
            match broadcast_value::<Option<ObjectHeader>>(comm, sched, None)? {
                Some(header) => {
                    let body = broadcast_with_schedule(comm, sched, None)?;
                    Ok(Some(StoredObject { header, body }))
                }
                None => Ok(None),
            }
        }
    }

    fn add_watch(&self, path: &Path) -> Result<usize> {
        Ok(self.monitor.lock().unwrap().add_watch(path))
    }

    fn remove_watch(&self, handle: usize) -> bool {
        self.monitor.lock().unwrap().remove_watch(handle)
    }

    fn find_watch(&self, path: &Path) -> Option<usize> {
        self.monitor.lock().unwrap().find_watch(path)
    }

    fn watch_state(&self, handle: usize) -> Result<FileState> {
        self.monitor
            .lock()
            .unwrap()
            .state(handle)
            .ok_or(FileOpsError::BadWatchHandle(handle))
    }

    fn set_unmodified(&self, handle: usize) -> Result<()> {
        if self.monitor.lock().unwrap().set_unmodified(handle) {
            Ok(())
        } else {
            Err(FileOpsError::BadWatchHandle(handle))
        }
    }

    fn update_states(
        &self,
        master_only: bool,
        comm: &dyn Communicator,
        sched: &CommSchedule,
    ) -> Result<()> {
        if !master_only || comm.size() == 1 {
            self.monitor.lock().unwrap().update_states();
            return Ok(());
        }

        if comm.rank() == MASTER {
            let states = {
                let mut monitor = self.monitor.lock().unwrap();
                monitor.update_states();
                monitor.states()
            };
            broadcast_value(comm, sched, Some(&states))?;
        } else {
            let states: Vec<Option<FileState>> = broadcast_value(comm, sched, None)?;
            self.monitor.lock().unwrap().apply_states(&states);
        }
        Ok(())
    }

    fn watched_files(&self) -> Vec<PathBuf> {
        self.monitor.lock().unwrap().watched_files()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcase_comm::SoloComm;
    use simcase_config::testing::CaseEnvironment;
    use simcase_ident::{ObjectId, ReadOpt};

    fn handler() -> UncollatedFileOps {
        UncollatedFileOps::new()
    }

    #[test]
    fn test_direct_resolution() {
        let env = CaseEnvironment::new().unwrap();
        env.write_object("0.5", "", "U", b"{}").unwrap();

        let io = ObjectId::new("U", "0.5");
        let resolved = handler().file_path(false, &env.layout(), &io).unwrap();
        assert_eq!(resolved.kind, PathKind::Object);
        assert!(resolved.path.ends_with("0.5/U"));
    }

    #[test]
    fn test_global_fallback_requires_check_global() {
        let env = CaseEnvironment::new().unwrap();
        env.create_processors(2, &["constant"]).unwrap();
        // transportProperties exists only in the undecomposed case
        env.write_object("constant", "", "transportProperties", b"{}")
            .unwrap();

        let layout = env.processor_layout(1, 2);
        let io = ObjectId::new("transportProperties", "constant");
        let h = handler();

        let found = h.file_path(true, &layout, &io).unwrap();
        assert_eq!(found.kind, PathKind::ParentObject);
        assert!(!found.path.to_string_lossy().contains("processor"));

        // without the global fallback the same lookup misses
        assert!(h.file_path(false, &layout, &io).is_none());

        // unless the object itself is marked global
        let mut global_io = ObjectId::new("transportProperties", "constant");
        global_io.global = true;
        assert!(h.file_path(false, &layout, &global_io).is_some());
    }

    #[test]
    fn test_approximate_time_instance() {
        let env = CaseEnvironment::new().unwrap();
        env.write_object("0.01", "", "p", b"{}").unwrap();

        let io = ObjectId::new("p", "1e-2");
        let resolved = handler().file_path(false, &env.layout(), &io).unwrap();
        assert!(resolved.path.ends_with("0.01/p"));
    }

    #[test]
    fn test_collated_container_resolution() {
        let env = CaseEnvironment::new().unwrap();
        env.create_processors(4, &[]).unwrap();
        let container = env.case_path().join("processors4").join("0.1");
        std::fs::create_dir_all(&container).unwrap();
        std::fs::write(container.join("U"), b"{}").unwrap();

        let layout = env.processor_layout(2, 4);
        let io = ObjectId::new("U", "0.1");
        let resolved = handler().file_path(false, &layout, &io).unwrap();
        assert_eq!(resolved.kind, PathKind::ProcBaseObject);
        assert!(resolved.path.to_string_lossy().contains("processors4"));
    }

    #[test]
    fn test_rename_table_redirects_disk_name() {
        let env = CaseEnvironment::new().unwrap();
        env.write_object("system", "", "fvSchemes.backup", b"{}")
            .unwrap();

        simcase_ident::replace_file_name("fvSchemes-redirected", "fvSchemes.backup");
        let io = ObjectId::new("fvSchemes-redirected", "system");
        let resolved = handler().file_path(false, &env.layout(), &io).unwrap();
        assert!(resolved.path.ends_with("system/fvSchemes.backup"));
    }

    #[test]
    fn test_absolute_instance_no_fallbacks() {
        let env = CaseEnvironment::new().unwrap();
        let elsewhere = env.root.join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(elsewhere.join("probes"), b"{}").unwrap();

        let io = ObjectId::new("probes", elsewhere.clone());
        let resolved = handler().file_path(true, &env.layout(), &io).unwrap();
        assert_eq!(resolved.kind, PathKind::AbsoluteObject);

        let missing = ObjectId::new("absent", elsewhere);
        assert!(handler().file_path(true, &env.layout(), &missing).is_none());
    }

    #[test]
    fn test_dir_path_resolution() {
        let env = CaseEnvironment::new().unwrap();
        env.write_object("0.5", "uniform", "time", b"{}").unwrap();

        let io = ObjectId::new("time", "0.5").with_local("uniform");
        let resolved = handler().dir_path(false, &env.layout(), &io).unwrap();
        assert!(resolved.path.ends_with("0.5/uniform"));
    }

    #[test]
    fn test_write_then_read_object() {
        let env = CaseEnvironment::new().unwrap();
        let io = ObjectId::new("p", "0")
            .with_class("volScalarField")
            .with_read(ReadOpt::MustRead);

        let stored = StoredObject::encode(
            ObjectHeader::new("volScalarField", "p").with_location("0"),
            &vec![1.0f64, 2.0, 3.0],
        )
        .unwrap();

        let h = handler();
        h.write_object(&env.layout(), &io, &stored).unwrap();

        let back = h
            .read_object(false, &env.layout(), &io, "volScalarField", true)
            .unwrap()
            .unwrap();
        assert_eq!(back.decode_body::<Vec<f64>>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_read_absent_is_none_not_error() {
        let env = CaseEnvironment::new().unwrap();
        let io = ObjectId::new("nonexistent", "0");
        let found = handler()
            .read_object(false, &env.layout(), &io, "", false)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_strict_class_mismatch_errors() {
        let env = CaseEnvironment::new().unwrap();
        let io = ObjectId::new("p", "0");
        let stored =
            StoredObject::encode(ObjectHeader::new("volScalarField", "p"), &Vec::<f64>::new())
                .unwrap();
        let h = handler();
        h.write_object(&env.layout(), &io, &stored).unwrap();

        let err = h
            .read_object(false, &env.layout(), &io, "volVectorField", true)
            .unwrap_err();
        assert!(matches!(err, FileOpsError::HeaderMismatch { .. }));
    }

    #[test]
    fn test_update_states_serial() {
        let env = CaseEnvironment::new().unwrap();
        let path = env.write_object("system", "", "controlDict", b"a").unwrap();

        let h = handler();
        let handle = h.add_watch(&path).unwrap();
        env.touch(&path, b"bb").unwrap();

        let sched = CommSchedule::for_size(1);
        h.update_states(false, &SoloComm, &sched).unwrap();
        assert_eq!(h.watch_state(handle).unwrap(), FileState::Modified);
    }
}
