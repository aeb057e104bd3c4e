//! Workspace slot allocation for mirrored output
//!
//! Finds a destination directory that is safe to mirror into: an existing
//! populated directory is never reused or overwritten. Claims are made with
//! atomic directory creation so two near-simultaneous calls for the same
//! base name race on the filesystem, not on shared state.

use crate::error::CoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Upper bound on the suffix probe before giving up
const MAX_CANDIDATES: u32 = 256;

/// Find or create a non-conflicting directory `parent/base_name`
///
/// Returns the candidate itself when it is missing (created) or exists but
/// is empty (reused). A populated candidate is left untouched and the probe
/// moves on to `base_name-2`, `base_name-3`, … in increasing order.
pub fn get_available_directory(parent: &Path, base_name: &str) -> Result<PathBuf, CoreError> {
    fs::create_dir_all(parent).map_err(|source| CoreError::DirectoryCreate {
        path: parent.to_path_buf(),
        source,
    })?;

    for attempt in 1..=MAX_CANDIDATES {
        let name = if attempt == 1 {
            base_name.to_string()
        } else {
            format!("{base_name}-{attempt}")
        };
        let candidate = parent.join(&name);

        match fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(path = %candidate.display(), "claimed fresh workspace directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // A file with this name, or an unreadable entry, counts as
                // occupied; keep probing.
                if dir_is_empty(&candidate) {
                    debug!(path = %candidate.display(), "reusing empty workspace directory");
                    return Ok(candidate);
                }
            }
            Err(source) => {
                return Err(CoreError::DirectoryCreate {
                    path: candidate,
                    source,
                });
            }
        }
    }

    Err(CoreError::WorkspaceExhausted {
        parent: parent.to_path_buf(),
        base_name: base_name.to_string(),
        attempts: MAX_CANDIDATES,
    })
}

fn dir_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

/// Derive a directory base name from free-form goal text
///
/// Lowercased ASCII alphanumeric runs joined by dashes, truncated to a
/// filesystem-friendly length.
pub fn folder_name_from_goal(goal: &str) -> String {
    const MAX_LEN: usize = 48;

    let normalized: String = goal
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();

    let mut slug = normalized.split_whitespace().collect::<Vec<_>>().join("-");
    if slug.len() > MAX_LEN {
        slug.truncate(MAX_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }

    if slug.is_empty() {
        "api-scripts".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_allocation_creates_base() {
        let parent = TempDir::new().unwrap();
        let dir = get_available_directory(parent.path(), "run").unwrap();
        assert_eq!(dir, parent.path().join("run"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_empty_directory_is_reused() {
        let parent = TempDir::new().unwrap();
        let first = get_available_directory(parent.path(), "run").unwrap();
        let second = get_available_directory(parent.path(), "run").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_populated_directory_is_never_touched() {
        let parent = TempDir::new().unwrap();
        let first = get_available_directory(parent.path(), "run").unwrap();
        std::fs::write(first.join("precious.py"), "print('hi')").unwrap();

        let second = get_available_directory(parent.path(), "run").unwrap();
        assert_eq!(second, parent.path().join("run-2"));

        // Original contents untouched
        let contents = std::fs::read_to_string(first.join("precious.py")).unwrap();
        assert_eq!(contents, "print('hi')");
    }

    #[test]
    fn test_suffixes_probe_in_order() {
        let parent = TempDir::new().unwrap();
        for dir in ["run", "run-2"] {
            let path = parent.path().join(dir);
            std::fs::create_dir(&path).unwrap();
            std::fs::write(path.join("x"), "x").unwrap();
        }

        let dir = get_available_directory(parent.path(), "run").unwrap();
        assert_eq!(dir, parent.path().join("run-3"));
    }

    #[test]
    fn test_file_occupying_candidate_is_skipped() {
        let parent = TempDir::new().unwrap();
        std::fs::write(parent.path().join("run"), "not a directory").unwrap();

        let dir = get_available_directory(parent.path(), "run").unwrap();
        assert_eq!(dir, parent.path().join("run-2"));
    }

    #[test]
    fn test_missing_parent_is_created() {
        let parent = TempDir::new().unwrap();
        let nested = parent.path().join("a").join("b");
        let dir = get_available_directory(&nested, "run").unwrap();
        assert_eq!(dir, nested.join("run"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_folder_name_from_goal() {
        assert_eq!(
            folder_name_from_goal("Scrape the Product Catalog!"),
            "scrape-the-product-catalog"
        );
        assert_eq!(folder_name_from_goal("  \t "), "api-scripts");
        assert_eq!(folder_name_from_goal("héllo wörld"), "h-llo-w-rld");

        let long = folder_name_from_goal(
            "download every invoice from the billing portal and archive them monthly",
        );
        assert!(long.len() <= 48);
        assert!(!long.ends_with('-'));
    }
}
