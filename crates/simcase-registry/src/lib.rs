//! # simcase-registry
//!
//! In-memory, ownership-tracked, event-versioned directory of case
//! objects.
//!
//! A [`Registry`] maps names to [`RegObject`] records and owns every
//! slot; external holders keep `Arc` clones of payloads they want to
//! outlive the registry, and records carry a process-unique serial so
//! identity survives check-out and re-insertion. [`Case`] wraps the
//! root registry together with the on-disk layout and walks nested
//! scopes explicitly.

pub mod case;
pub mod object;
pub mod registry;

pub use case::Case;
pub use object::RegObject;
pub use registry::Registry;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("object '{name}' not found in registry '{registry}'; available: {available:?}")]
    NotFound {
        registry: String,
        name: String,
        available: Vec<String>,
    },

    #[error("object '{name}' is a '{actual}', not the requested '{expected}'")]
    WrongType {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("no sub-registry at scope {scope:?}")]
    ScopeNotFound { scope: Vec<String> },

    #[error("file operation failed: {0}")]
    FileOps(#[from] simcase_fileops::FileOpsError),

    #[error("communication error: {0}")]
    Comm(#[from] simcase_comm::CommError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
