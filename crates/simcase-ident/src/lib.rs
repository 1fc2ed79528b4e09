//! # simcase-ident
//!
//! Identity and on-disk location of persistable case objects.
//!
//! An [`ObjectId`] names one object inside a registry and carries the
//! path fragments (`instance`, `local`) that place its data inside a
//! case directory. Composition against a [`CaseLayout`] is pure path
//! arithmetic; no I/O happens here.

pub mod layout;
pub mod rename;

pub use layout::CaseLayout;
pub use rename::{replace_file_name, unique_file_name};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors from identity construction and path splitting
#[derive(Error, Debug)]
pub enum IdentError {
    #[error("invalid object name '{0}'")]
    InvalidName(String),

    #[error("empty object name in path '{0}'")]
    EmptyName(String),

    #[error("path '{0}' is an existing directory, not an object")]
    IsDirectory(String),
}

pub type Result<T> = std::result::Result<T, IdentError>;

/// How an object's data is acquired when it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReadOpt {
    /// Data must exist on disk; absence is fatal for the caller.
    MustRead,
    /// As `MustRead`, and the resolved file is re-read when modified.
    MustReadIfModified,
    /// Read when present, otherwise start empty.
    ReadIfPresent,
    /// Never read.
    #[default]
    NoRead,
    /// Deferred read, resolved on first use.
    LazyRead,
}

/// Whether an object's data is written back automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WriteOpt {
    AutoWrite,
    #[default]
    NoWrite,
}

/// Read health of an object. `Bad` is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectState {
    #[default]
    Good,
    Bad,
}

/// Identity and location of a persistable object.
///
/// `instance` is ordinarily a formatted time value or one of the
/// literals `constant` / `system`; an absolute `instance` bypasses
/// case-relative composition entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectId {
    name: String,
    pub instance: PathBuf,
    pub local: PathBuf,
    /// Declared type, checked against the expected type on read.
    pub header_class: String,
    pub read_opt: ReadOpt,
    pub write_opt: WriteOpt,
    /// Whether the object participates in registry check-in at all.
    pub register: bool,
    /// Marks objects identical on all ranks, resolvable from the
    /// undecomposed case directory in parallel runs.
    pub global: bool,
    #[serde(skip)]
    state: ObjectState,
}

impl ObjectId {
    /// Create an identity with default (`NoRead`/`NoWrite`) policy.
    ///
    /// Panics if `name` violates the identifier grammar; use
    /// [`is_valid_name`] to pre-validate untrusted input.
    pub fn new(name: &str, instance: impl Into<PathBuf>) -> Self {
        assert!(is_valid_name(name), "invalid object name '{name}'");
        Self {
            name: name.to_string(),
            instance: instance.into(),
            local: PathBuf::new(),
            header_class: String::new(),
            read_opt: ReadOpt::NoRead,
            write_opt: WriteOpt::NoWrite,
            register: true,
            global: false,
            state: ObjectState::Good,
        }
    }

    /// Build an identity from a slash-delimited path, splitting it into
    /// `(instance, local, name)` per [`split_path`].
    pub fn from_path(path: &str) -> Result<Self> {
        let (instance, local, name) = split_path(path)?;
        let mut id = Self::new(&name, instance);
        id.local = local;
        Ok(id)
    }

    pub fn with_local(mut self, local: impl Into<PathBuf>) -> Self {
        self.local = local.into();
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.header_class = class.to_string();
        self
    }

    pub fn with_read(mut self, read_opt: ReadOpt) -> Self {
        self.read_opt = read_opt;
        self
    }

    pub fn with_write(mut self, write_opt: WriteOpt) -> Self {
        self.write_opt = write_opt;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group part of a `member.group` name; the whole name when there
    /// is no group suffix.
    pub fn group(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) if i > 0 => &self.name[i + 1..],
            _ => &self.name,
        }
    }

    /// Member part of a `member.group` name; the whole name when there
    /// is no group suffix.
    pub fn member(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) if i > 0 => &self.name[..i],
            _ => &self.name,
        }
    }

    /// Replace the object name. Only used by registry rename, which
    /// re-validates registration separately.
    pub fn set_name(&mut self, name: &str) {
        assert!(is_valid_name(name), "invalid object name '{name}'");
        self.name = name.to_string();
    }

    /// Directory holding this object's file:
    /// `case/instance/db_dir/local` for a relative instance, the
    /// instance verbatim when absolute.
    pub fn dir_path(&self, layout: &CaseLayout) -> PathBuf {
        if self.instance.is_absolute() {
            self.instance.clone()
        } else {
            let mut p = layout.case_path().join(&self.instance);
            p.push(&layout.db_dir);
            p.push(&self.local);
            p
        }
    }

    /// Nominal file path, before any rename-table redirection.
    pub fn object_path(&self, layout: &CaseLayout) -> PathBuf {
        self.dir_path(layout).join(&self.name)
    }

    pub fn is_bad(&self) -> bool {
        self.state == ObjectState::Bad
    }

    /// Mark the object bad after a failed read.
    ///
    /// Panics when called on an already-bad object: a second failure
    /// for the same object is a double fault the caller should have
    /// prevented.
    pub fn set_bad(&mut self, reason: &str) {
        if self.state == ObjectState::Bad {
            panic!("object '{}' marked bad twice: {reason}", self.name);
        }
        warn!(object = %self.name, reason, "object marked bad");
        self.state = ObjectState::Bad;
    }
}

/// Characters the dictionary grammar reserves; names may not contain
/// them, nor any whitespace.
const RESERVED: &[char] = &['/', '\\', ';', '{', '}', '"'];

/// Check a candidate object name against the identifier grammar.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || RESERVED.contains(&c))
}

/// Split a slash-delimited path into `(instance, local, name)`.
///
/// For an absolute path the instance is everything before the last
/// slash. For a relative path the instance is the text before the
/// first slash and the local part sits between the first and last
/// slash. With no slash at all the whole string is the name.
///
/// Fails when the resulting name is empty or invalid, or when `path`
/// denotes an existing directory.
pub fn split_path(path: &str) -> Result<(PathBuf, PathBuf, String)> {
    if Path::new(path).is_dir() {
        return Err(IdentError::IsDirectory(path.to_string()));
    }

    let absolute = path.starts_with('/');
    let (instance, local, name) = match (path.find('/'), path.rfind('/')) {
        (None, _) | (_, None) => (String::new(), String::new(), path.to_string()),
        (Some(_), Some(last)) if absolute => {
            (path[..last].to_string(), String::new(), path[last + 1..].to_string())
        }
        (Some(first), Some(last)) => {
            let local = if last > first {
                path[first + 1..last].to_string()
            } else {
                String::new()
            };
            (path[..first].to_string(), local, path[last + 1..].to_string())
        }
    };

    if name.is_empty() {
        return Err(IdentError::EmptyName(path.to_string()));
    }
    if !is_valid_name(&name) {
        return Err(IdentError::InvalidName(name));
    }
    Ok((PathBuf::from(instance), PathBuf::from(local), name))
}
