//! Process-wide file-name redirection table.
//!
//! Lets a caller redirect reads of object `from` to a file actually
//! named `to` without changing the in-memory name used for registry
//! lookups. Keyed by declared name, independent of any one registry.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::debug;

static RENAMES: Lazy<RwLock<HashMap<String, String>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Redirect the on-disk file name for object `from` to `to`.
/// Last writer wins on collision.
pub fn replace_file_name(from: &str, to: &str) {
    let mut table = RENAMES.write().unwrap();
    if let Some(old) = table.insert(from.to_string(), to.to_string()) {
        debug!(from, old = %old, new = to, "file-name redirection replaced");
    }
}

/// The on-disk file name for `name`: the redirected name if one was
/// registered, otherwise `name` itself.
pub fn unique_file_name(name: &str) -> String {
    RENAMES
        .read()
        .unwrap()
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_table_last_writer_wins() {
        assert_eq!(unique_file_name("fvSolution-test"), "fvSolution-test");

        replace_file_name("fvSolution-test", "fvSolution.run1");
        assert_eq!(unique_file_name("fvSolution-test"), "fvSolution.run1");

        replace_file_name("fvSolution-test", "fvSolution.run2");
        assert_eq!(unique_file_name("fvSolution-test"), "fvSolution.run2");
    }
}
