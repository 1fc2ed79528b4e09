//! Resolution primitives: candidate ranking, processor-directory
//! discovery and approximate time-instance matching.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Immediate subdirectories of `dir`, tolerating a missing directory.
fn subdirs(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
}

/// Precedence ranking of candidate locations. When several could
/// satisfy a lookup, the higher variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathKind {
    NotFound,
    /// Composed from this rank's own case directory.
    Object,
    /// Undecomposed-case fallback for shared instances.
    ParentObject,
    /// Inside a collated `processorsNN` container covering all ranks.
    ProcBaseObject,
    /// Inside a rank-range `processorsNN_first-last` container.
    ProcObject,
    /// Instance was absolute; no composition happened.
    AbsoluteObject,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub path: PathBuf,
    pub kind: PathKind,
}

impl Resolved {
    pub fn new(path: PathBuf, kind: PathKind) -> Self {
        Self { path, kind }
    }
}

/// Kind of decomposition directory found under a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcDirKind {
    /// `processorN`: one directory per rank.
    Uncollated { rank: usize },
    /// `processorsNN`: one container for all NN ranks.
    Collated { n_procs: usize },
    /// `processorsNN_first-last`: container for an inclusive rank range.
    CollatedRange {
        n_procs: usize,
        first: usize,
        last: usize,
    },
}

impl ProcDirKind {
    /// Whether this directory holds data for `rank`.
    pub fn covers(&self, rank: usize) -> bool {
        match *self {
            ProcDirKind::Uncollated { rank: r } => r == rank,
            ProcDirKind::Collated { n_procs } => rank < n_procs,
            ProcDirKind::CollatedRange { first, last, .. } => (first..=last).contains(&rank),
        }
    }
}

/// A discovered decomposition directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcDir {
    pub path: PathBuf,
    pub kind: ProcDirKind,
}

/// Parse a directory name in one of the decomposition forms.
pub fn parse_proc_dir_name(name: &str) -> Option<ProcDirKind> {
    if let Some(rest) = name.strip_prefix("processors") {
        if let Some((count, range)) = rest.split_once('_') {
            let n_procs = count.parse().ok()?;
            let (first, last) = range.split_once('-')?;
            return Some(ProcDirKind::CollatedRange {
                n_procs,
                first: first.parse().ok()?,
                last: last.parse().ok()?,
            });
        }
        return Some(ProcDirKind::Collated {
            n_procs: rest.parse().ok()?,
        });
    }
    let rank = name.strip_prefix("processor")?;
    Some(ProcDirKind::Uncollated {
        rank: rank.parse().ok()?,
    })
}

/// Scan a case directory for decomposition directories.
pub fn scan_proc_dirs(case_path: &Path) -> Vec<ProcDir> {
    let mut found = Vec::new();
    for entry in subdirs(case_path) {
        if let Some(kind) = entry.file_name().to_str().and_then(parse_proc_dir_name) {
            found.push(ProcDir { path: entry.path().to_path_buf(), kind });
        }
    }
    // deterministic order for precedence and caching
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

/// Tolerance used when comparing formatted time values: relative to
/// the larger magnitude, with a floor for values near zero.
fn time_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1e-15);
    (a - b).abs() <= 1e-6 * scale
}

/// Parse a directory name as a time value.
pub fn parse_time(name: &str) -> Option<f64> {
    let value: f64 = name.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Find an instance directory numerically equal to `wanted` within
/// formatting tolerance. Handles naming skew like `0.01` vs `1e-2`.
pub fn equal_time_instance(case_path: &Path, wanted: &str) -> Option<String> {
    let target = parse_time(wanted)?;
    for entry in subdirs(case_path) {
        let Some(name) = entry.file_name().to_str() else { continue };
        if let Some(value) = parse_time(name) {
            if time_eq(value, target) {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Sorted time-directory names: `constant` first, then numeric
/// instances ascending.
pub fn find_times(case_path: &Path) -> Vec<String> {
    let mut times: Vec<(f64, String)> = Vec::new();
    let mut has_constant = false;

    for entry in subdirs(case_path) {
        let Some(name) = entry.file_name().to_str() else { continue };
        if name == simcase_ident::layout::CONSTANT {
            has_constant = true;
        } else if let Some(value) = parse_time(name) {
            times.push((value, name.to_string()));
        }
    }
    times.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut names = Vec::with_capacity(times.len() + 1);
    if has_constant {
        names.push(simcase_ident::layout::CONSTANT.to_string());
    }
    names.extend(times.into_iter().map(|(_, name)| name));
    names
}
