//! Root of the registry hierarchy for one simulation case.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use simcase_comm::{broadcast_value, CommSchedule, Communicator, MASTER};
use simcase_fileops::{FileHandler, FileState};
use simcase_ident::{CaseLayout, ReadOpt};

use crate::registry::Registry;
use crate::{RegObject, RegistryError, Result};

/// The outermost scope: a case layout plus the root registry.
///
/// Every object lookup that crosses scopes starts here and descends
/// through named sub-registries, so an object's enclosing context is
/// explicit in the lookup path rather than stored inside the object.
pub struct Case {
    layout: CaseLayout,
    registry: Registry,
    runtime_modifiable: bool,
    master_only: bool,
}

impl Case {
    pub fn new(layout: CaseLayout) -> Self {
        let cfg = simcase_config::config();
        let registry = Registry::new(&layout.case);
        Self {
            layout,
            registry,
            runtime_modifiable: cfg.io.runtime_modifiable,
            master_only: cfg.io.master_only,
        }
    }

    pub fn with_runtime_modifiable(mut self, on: bool) -> Self {
        self.runtime_modifiable = on;
        self
    }

    pub fn with_master_only(mut self, on: bool) -> Self {
        self.master_only = on;
        self
    }

    pub fn layout(&self) -> &CaseLayout {
        &self.layout
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn runtime_modifiable(&self) -> bool {
        self.runtime_modifiable
    }

    // ---- scope chain ------------------------------------------------------

    /// Descend from the root through named sub-registries. An empty
    /// scope is the root itself.
    pub fn registry_at(&self, scope: &[&str]) -> Result<&Registry> {
        let mut reg = &self.registry;
        for (depth, part) in scope.iter().enumerate() {
            reg = reg.child(part).ok_or_else(|| RegistryError::ScopeNotFound {
                scope: scope[..=depth].iter().map(|s| s.to_string()).collect(),
            })?;
        }
        Ok(reg)
    }

    /// Mutable descent, creating missing levels when `force_create`.
    pub fn registry_at_mut(&mut self, scope: &[&str], force_create: bool) -> Result<&mut Registry> {
        let mut reg = &mut self.registry;
        for (depth, part) in scope.iter().enumerate() {
            reg = reg
                .sub_registry(part, force_create)
                .ok_or_else(|| RegistryError::ScopeNotFound {
                    scope: scope[..=depth].iter().map(|s| s.to_string()).collect(),
                })?;
        }
        Ok(reg)
    }

    /// Find `name` in the innermost registry along `scope` that holds
    /// it, widening one level at a time out to the root. The scope
    /// path itself must exist in full.
    pub fn lookup_in(&self, scope: &[&str], name: &str) -> Result<&RegObject> {
        let innermost = self.registry_at(scope)?;
        if let Some(obj) = innermost.cfind(name) {
            return Ok(obj);
        }
        for width in (0..scope.len()).rev() {
            // scope prefixes were validated by the full descent above
            let reg = self.registry_at(&scope[..width])?;
            if let Some(obj) = reg.cfind(name) {
                debug!(object = name, scope = ?&scope[..width], "resolved in enclosing scope");
                return Ok(obj);
            }
        }
        Err(RegistryError::NotFound {
            registry: scope.join("/"),
            name: name.to_string(),
            available: innermost.sorted_names(),
        })
    }

    // ---- runtime modification ---------------------------------------------

    /// Which root-registry entries are re-read when their file
    /// changes: only `MustReadIfModified` objects, and only while the
    /// case is runtime-modifiable.
    fn watch_candidates(&self) -> Vec<String> {
        self.registry
            .names_matching(|_| true)
            .into_iter()
            .filter(|name| {
                self.registry
                    .cfind(name)
                    .map(|o| o.ident().read_opt == ReadOpt::MustReadIfModified)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn resolve_watch_paths(&self, handler: &dyn FileHandler) -> Vec<(String, PathBuf)> {
        let mut names = self.watch_candidates();
        names.sort_unstable();
        names
            .into_iter()
            .filter_map(|name| {
                let obj = self.registry.cfind(&name)?;
                // fall back to the nominal path so a watch exists even
                // before the file's first write
                let path = handler
                    .file_path(true, &self.layout, obj.ident())
                    .map(|r| r.path)
                    .unwrap_or_else(|| obj.ident().object_path(&self.layout));
                Some((name, path))
            })
            .collect()
    }

    /// Register file watches for every re-readable object.
    ///
    /// With master-only reads the master resolves the watch paths and
    /// the list propagates along `sched`, so all ranks watch the same
    /// files even when only the master holds them on disk. Calling
    /// this twice for the same object is a programming error and
    /// panics.
    pub fn init_watches(
        &mut self,
        handler: &dyn FileHandler,
        comm: &dyn Communicator,
        sched: &CommSchedule,
    ) -> Result<()> {
        if !self.runtime_modifiable {
            return Ok(());
        }
        let list: Vec<(String, PathBuf)> = if self.master_only {
            let local = (comm.rank() == MASTER).then(|| self.resolve_watch_paths(handler));
            broadcast_value(comm, sched, local.as_ref())?
        } else {
            self.resolve_watch_paths(handler)
        };
        info!(count = list.len(), "registering runtime-modification watches");
        for (name, path) in list {
            let obj = self.registry.entry_mut(&name)?;
            if !obj.watches.is_empty() {
                panic!("watch already initialized for '{name}'");
            }
            let handle = handler.add_watch(&path)?;
            obj.watches.push(handle);
        }
        Ok(())
    }

    /// Register one watch for `name` at an explicit path, under the
    /// same gate as [`Case::init_watches`]: `None` when the case is
    /// not runtime-modifiable or the object is not re-readable.
    /// Re-adding a path the object already watches returns the
    /// existing handle.
    pub fn add_watch(
        &mut self,
        name: &str,
        path: &Path,
        handler: &dyn FileHandler,
    ) -> Result<Option<usize>> {
        if !self.runtime_modifiable {
            return Ok(None);
        }
        let obj = self.registry.entry_mut(name)?;
        if obj.ident().read_opt != ReadOpt::MustReadIfModified {
            return Ok(None);
        }
        let handle = handler.add_watch(path)?;
        if !obj.watches.contains(&handle) {
            obj.watches.push(handle);
        }
        Ok(Some(handle))
    }

    /// Names of watched objects whose files changed since the last
    /// [`FileHandler::update_states`] sweep, in sorted order.
    pub fn modified_objects(&self, handler: &dyn FileHandler) -> Result<Vec<String>> {
        let mut modified = Vec::new();
        for name in self.registry.sorted_names() {
            let Some(obj) = self.registry.cfind(&name) else {
                continue;
            };
            for &watch in obj.watches() {
                if handler.watch_state(watch)? == FileState::Modified {
                    modified.push(name.clone());
                    break;
                }
            }
        }
        Ok(modified)
    }

    /// Re-arm an object's watches after the caller re-read its data.
    pub fn mark_unmodified(&mut self, name: &str, handler: &dyn FileHandler) -> Result<()> {
        let obj = self.registry.entry_mut(name)?;
        for &watch in obj.watches.iter() {
            handler.set_unmodified(watch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcase_comm::SoloComm;
    use simcase_config::testing::CaseEnvironment;
    use simcase_fileops::UncollatedFileOps;
    use simcase_ident::ObjectId;

    fn obj(name: &str) -> RegObject {
        RegObject::new(ObjectId::new(name, "0"))
    }

    #[test]
    fn test_scope_chain_prefers_innermost() {
        let env = CaseEnvironment::new().unwrap();
        let mut case = Case::new(env.layout());
        case.registry_mut().check_in(obj("transportProperties")).unwrap();

        let inner = case.registry_at_mut(&["solid"], true).unwrap();
        let shadowing = obj("transportProperties");
        let inner_serial = shadowing.serial();
        inner.check_in(shadowing).unwrap();
        inner.check_in(obj("solidProperties")).unwrap();

        // shadowed name resolves to the inner registry's record
        let found = case.lookup_in(&["solid"], "transportProperties").unwrap();
        assert_eq!(found.serial(), inner_serial);

        // names absent from the inner scope fall outward to the root
        assert!(case.lookup_in(&["solid"], "solidProperties").is_ok());
        let root_serial = case.registry().cfind("transportProperties").unwrap().serial();
        assert_ne!(root_serial, inner_serial);
        assert!(case
            .lookup_in(&[], "transportProperties")
            .is_ok_and(|o| o.serial() == root_serial));
    }

    #[test]
    fn test_lookup_in_missing_everywhere() {
        let env = CaseEnvironment::new().unwrap();
        let mut case = Case::new(env.layout());
        case.registry_at_mut(&["solid"], true).unwrap();

        let err = case.lookup_in(&["solid"], "absent").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_scope_must_exist() {
        let env = CaseEnvironment::new().unwrap();
        let case = Case::new(env.layout());
        let err = case.registry_at(&["noSuchScope"]).unwrap_err();
        match err {
            RegistryError::ScopeNotFound { scope } => assert_eq!(scope, vec!["noSuchScope"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_init_watches_and_modification_cycle() {
        let env = CaseEnvironment::new().unwrap();
        let path = env
            .write_object("system", "", "controlDict", b"deltaT 1;\n")
            .unwrap();

        let handler = UncollatedFileOps::new();
        let comm = SoloComm;
        let sched = CommSchedule::for_size(1);

        let mut case = Case::new(env.layout()).with_runtime_modifiable(true);
        case.registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("controlDict", "system").with_read(ReadOpt::MustReadIfModified),
            ))
            .unwrap();
        case.registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("fvSchemes", "system").with_read(ReadOpt::MustRead),
            ))
            .unwrap();

        case.init_watches(&handler, &comm, &sched).unwrap();
        // only the re-readable object is watched
        assert_eq!(case.registry().cfind("controlDict").unwrap().watches().len(), 1);
        assert!(case.registry().cfind("fvSchemes").unwrap().watches().is_empty());

        handler.update_states(false, &comm, &sched).unwrap();
        assert!(case.modified_objects(&handler).unwrap().is_empty());

        env.touch(&path, b"deltaT 0.5; writeInterval 10;\n").unwrap();
        handler.update_states(false, &comm, &sched).unwrap();
        assert_eq!(case.modified_objects(&handler).unwrap(), vec!["controlDict"]);

        case.mark_unmodified("controlDict", &handler).unwrap();
        handler.update_states(false, &comm, &sched).unwrap();
        assert!(case.modified_objects(&handler).unwrap().is_empty());
    }

    #[test]
    fn test_add_watch_gate_and_dedup() {
        let env = CaseEnvironment::new().unwrap();
        let path = env
            .write_object("system", "", "controlDict", b"deltaT 1;\n")
            .unwrap();

        let handler = UncollatedFileOps::new();
        let mut case = Case::new(env.layout()).with_runtime_modifiable(true);
        case.registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("controlDict", "system").with_read(ReadOpt::MustReadIfModified),
            ))
            .unwrap();
        case.registry_mut()
            .check_in(RegObject::new(ObjectId::new("fvSchemes", "system")))
            .unwrap();

        let first = case.add_watch("controlDict", &path, &handler).unwrap();
        assert!(first.is_some());
        let again = case.add_watch("controlDict", &path, &handler).unwrap();
        assert_eq!(first, again);
        assert_eq!(case.registry().cfind("controlDict").unwrap().watches().len(), 1);

        // NoRead objects are never watched
        assert!(case.add_watch("fvSchemes", &path, &handler).unwrap().is_none());

        // nor is anything while runtime modification is off
        let mut frozen = Case::new(env.layout()).with_runtime_modifiable(false);
        frozen
            .registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("controlDict", "system").with_read(ReadOpt::MustReadIfModified),
            ))
            .unwrap();
        assert!(frozen.add_watch("controlDict", &path, &handler).unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "watch already initialized")]
    fn test_double_watch_init_panics() {
        let env = CaseEnvironment::new().unwrap();
        env.write_object("system", "", "controlDict", b"deltaT 1;\n")
            .unwrap();

        let handler = UncollatedFileOps::new();
        let comm = SoloComm;
        let sched = CommSchedule::for_size(1);

        let mut case = Case::new(env.layout()).with_runtime_modifiable(true);
        case.registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("controlDict", "system").with_read(ReadOpt::MustReadIfModified),
            ))
            .unwrap();

        case.init_watches(&handler, &comm, &sched).unwrap();
        case.init_watches(&handler, &comm, &sched).unwrap();
    }

    #[test]
    fn test_watches_survive_not_yet_written_files() {
        let env = CaseEnvironment::new().unwrap();
        env.create_instance("system").unwrap();

        let handler = UncollatedFileOps::new();
        let comm = SoloComm;
        let sched = CommSchedule::for_size(1);

        let mut case = Case::new(env.layout()).with_runtime_modifiable(true);
        case.registry_mut()
            .check_in(RegObject::new(
                ObjectId::new("controlDict", "system").with_read(ReadOpt::MustReadIfModified),
            ))
            .unwrap();

        // nothing on disk: the nominal path is watched anyway
        case.init_watches(&handler, &comm, &sched).unwrap();
        let watched = handler.watched_files();
        assert_eq!(watched.len(), 1);
        assert!(watched[0].ends_with("system/controlDict"));
    }
}
