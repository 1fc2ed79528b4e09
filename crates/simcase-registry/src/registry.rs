//! Name-keyed directory of case objects.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tracing::{debug, warn};

use simcase_fileops::FileHandler;

use crate::object::RegObject;
use crate::{RegistryError, Result};

/// A directory of [`RegObject`] records with nested sub-registries and
/// a strictly increasing event counter.
///
/// The registry is a local, single-process structure: one logical
/// owner mutates it at a time, and it performs no inter-process
/// communication of its own.
#[derive(Debug)]
pub struct Registry {
    name: String,
    /// This registry's contribution to the on-disk hierarchy.
    db_dir: PathBuf,
    entries: HashMap<String, RegObject>,
    children: HashMap<String, Registry>,
    event: u64,
    event_wrapped: bool,
    strict_checkin: bool,
    default_region: String,
}

impl Registry {
    /// Create a registry, taking duplicate-check-in policy from the
    /// process configuration.
    pub fn new(name: &str) -> Self {
        let cfg = simcase_config::config();
        Self {
            name: name.to_string(),
            db_dir: PathBuf::new(),
            entries: HashMap::new(),
            children: HashMap::new(),
            event: 1,
            event_wrapped: false,
            strict_checkin: cfg.registry.strict_checkin,
            default_region: cfg.registry.default_region.clone(),
        }
    }

    pub fn with_db_dir(mut self, db_dir: impl Into<PathBuf>) -> Self {
        self.db_dir = db_dir.into();
        self
    }

    /// Escalate duplicate check-in to a panic, for diagnosing
    /// accidental double-registration during development.
    pub fn with_strict_checkin(mut self, strict: bool) -> Self {
        self.strict_checkin = strict;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_dir(&self) -> &PathBuf {
        &self.db_dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ---- event versioning -------------------------------------------------

    /// Return the current event value and advance the counter.
    ///
    /// Near the representable maximum the counter resets to 1 with a
    /// one-time warning. Event numbers already stamped onto records
    /// are deliberately left alone; an object stamped just before the
    /// reset can spuriously test as up to date against objects stamped
    /// after it, which may force extra recomputation.
    pub fn get_event(&mut self) -> u64 {
        let current = self.event;
        if self.event >= u64::MAX - 1 {
            if !self.event_wrapped {
                warn!(
                    registry = %self.name,
                    "event counter wrapped; dependency tracking may force extra recomputation"
                );
                self.event_wrapped = true;
            }
            self.event = 1;
        } else {
            self.event += 1;
        }
        current
    }

    /// Stamp an object's event number to the next event value, making
    /// it newer than everything checked before this call.
    pub fn set_up_to_date(&mut self, name: &str) -> Result<()> {
        let next = self.get_event();
        let obj = self.entry_mut(name)?;
        obj.event_no = next;
        Ok(())
    }

    /// Whether `name` is newer than every named dependency: stale iff
    /// any dependency's event number is at or above this object's
    /// stamp.
    pub fn up_to_date(&self, name: &str, deps: &[&str]) -> Result<bool> {
        let stamp = self.entry(name)?.event_no;
        for dep in deps {
            if self.entry(dep)?.event_no >= stamp {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ---- check-in / check-out ---------------------------------------------

    /// Insert an object by name. On a name collision the registry is
    /// left untouched and the object is handed back to the caller:
    /// silently for the reserved default region name, with a warning
    /// otherwise, or with a panic under strict check-in.
    pub fn check_in(&mut self, mut obj: RegObject) -> std::result::Result<(), RegObject> {
        if !obj.ident().register {
            return Err(obj);
        }
        let name = obj.name().to_string();
        if self.entries.contains_key(&name) {
            if name == self.default_region {
                // expected collision, tolerated
            } else if self.strict_checkin {
                panic!(
                    "duplicate check-in of '{name}' in registry '{}'",
                    self.name
                );
            } else {
                warn!(registry = %self.name, object = %name, "duplicate check-in ignored");
            }
            return Err(obj);
        }
        obj.registered = true;
        obj.event_no = self.get_event();
        debug!(registry = %self.name, object = %name, "checked in");
        self.entries.insert(name, obj);
        Ok(())
    }

    /// Remove an object, but only when `serial` matches the stored
    /// record; a same-named but distinct object cannot check out
    /// someone else's entry. Outstanding watches are removed in
    /// reverse insertion order before the record leaves the map.
    pub fn check_out(
        &mut self,
        name: &str,
        serial: u64,
        handler: &dyn FileHandler,
    ) -> Option<RegObject> {
        if self.entries.get(name)?.serial() != serial {
            return None;
        }
        let mut obj = self.entries.remove(name)?;
        for &watch in obj.watches.iter().rev() {
            handler.remove_watch(watch);
        }
        obj.watches.clear();
        obj.registered = false;
        obj.owned_by_registry = false;
        debug!(registry = %self.name, object = %name, "checked out");
        Some(obj)
    }

    /// Check out under the old name, update the identity, check back
    /// in under the new name. Holders of the old record keep their
    /// payload handles but their watch registrations are gone.
    pub fn rename(
        &mut self,
        name: &str,
        serial: u64,
        new_name: &str,
        handler: &dyn FileHandler,
    ) -> bool {
        let Some(mut obj) = self.check_out(name, serial, handler) else {
            return false;
        };
        obj.ident_mut().set_name(new_name);
        if obj.ident().register {
            self.check_in(obj).is_ok()
        } else {
            true
        }
    }

    /// Remove and drop one entry, neutralizing its lifecycle flags
    /// first. Returns false if the name is absent.
    pub fn erase(&mut self, name: &str) -> bool {
        match self.entries.remove(name) {
            Some(mut obj) => {
                obj.registered = false;
                obj.owned_by_registry = false;
                true
            }
            None => false,
        }
    }

    /// Bulk erase, counting removals; stops once as many entries as
    /// the registry held have been removed.
    pub fn erase_many(&mut self, names: &[&str]) -> usize {
        let cap = self.entries.len();
        let mut removed = 0;
        for name in names {
            if removed == cap {
                break;
            }
            if self.erase(name) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every entry and sub-registry. Flags are neutralized
    /// before records are dropped so no record observes itself as
    /// still registered during teardown.
    pub fn clear(&mut self) {
        self.neutralize();
        self.entries.clear();
        self.children.clear();
    }

    // ---- lookup -----------------------------------------------------------

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Local (non-recursive) lookup.
    pub fn cfind(&self, name: &str) -> Option<&RegObject> {
        self.entries.get(name)
    }

    fn entry(&self, name: &str) -> Result<&RegObject> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            registry: self.name.clone(),
            name: name.to_string(),
            available: self.sorted_names(),
        })
    }

    pub(crate) fn entry_mut(&mut self, name: &str) -> Result<&mut RegObject> {
        let registry = self.name.clone();
        let available = self.sorted_names();
        self.entries.get_mut(name).ok_or(RegistryError::NotFound {
            registry,
            name: name.to_string(),
            available,
        })
    }

    /// Typed payload lookup. Absence lists the names that do hold the
    /// requested type; a type mismatch names both the requested and
    /// the declared class.
    pub fn lookup_object<T: Any>(&self, name: &str) -> Result<&T> {
        let Some(obj) = self.entries.get(name) else {
            return Err(RegistryError::NotFound {
                registry: self.name.clone(),
                name: name.to_string(),
                available: self.names_of_type::<T>(),
            });
        };
        obj.payload_as::<T>().ok_or_else(|| RegistryError::WrongType {
            name: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: if obj.class_name().is_empty() {
                "<undeclared>".to_string()
            } else {
                obj.class_name().to_string()
            },
        })
    }

    // ---- summarization views ----------------------------------------------

    fn select(&self, pred: impl Fn(&RegObject) -> bool) -> Vec<String> {
        self.entries
            .values()
            .filter(|o| pred(o))
            .map(|o| o.name().to_string())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.select(|_| true)
    }

    pub fn sorted_names(&self) -> Vec<String> {
        let mut names = self.names();
        names.sort_unstable();
        names
    }

    pub fn names_of_class(&self, class: &str) -> Vec<String> {
        self.select(|o| o.class_name() == class)
    }

    pub fn names_matching(&self, pred: impl Fn(&str) -> bool) -> Vec<String> {
        self.select(|o| pred(o.name()))
    }

    pub fn names_of_type<T: Any>(&self) -> Vec<String> {
        let mut names = self.select(|o| o.has_payload_of::<T>());
        names.sort_unstable();
        names
    }

    /// Class name to sorted object names, for reporting.
    pub fn classes(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for obj in self.entries.values() {
            let class = if obj.class_name().is_empty() {
                "<undeclared>"
            } else {
                obj.class_name()
            };
            map.entry(class.to_string())
                .or_default()
                .push(obj.name().to_string());
        }
        for names in map.values_mut() {
            names.sort_unstable();
        }
        map
    }

    // ---- nesting ----------------------------------------------------------

    /// Look up a nested registry, constructing it when `force_create`
    /// is set. A created child is owned by this registry and carries
    /// its name as an extra on-disk directory level.
    pub fn sub_registry(&mut self, name: &str, force_create: bool) -> Option<&mut Registry> {
        if force_create && !self.children.contains_key(name) {
            let child = Registry::new(name).with_db_dir(self.db_dir.join(name));
            debug!(registry = %self.name, child = name, "created sub-registry");
            self.children.insert(name.to_string(), child);
        }
        self.children.get_mut(name)
    }

    /// Clear registration flags so record teardown is silent.
    fn neutralize(&mut self) {
        for obj in self.entries.values_mut() {
            obj.registered = false;
            obj.owned_by_registry = false;
        }
    }

    pub fn child(&self, name: &str) -> Option<&Registry> {
        self.children.get(name)
    }

    pub fn sub_registries(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // sub-registries neutralize themselves recursively
        self.neutralize();
    }
}
