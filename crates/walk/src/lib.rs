//! Recursive directory scanner with include/exclude filename regexes.
//!
//! Given a shared root, [`Scanner`] enumerates regular files beneath it,
//! skipping any entry whose basename starts with `.`. Symlinks are followed
//! (a symlink to a directory is recursed into, a symlink to a file is
//! treated as a regular file). Each [`Scanner::scan`] call compares against
//! the previous scan and reports what's present, newly added, and removed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

/// Recursively enumerates files under a root, filtered by filename regex.
pub struct Scanner {
    root: PathBuf,
    include: Regex,
    exclude: Option<Regex>,
    previous: HashSet<PathBuf>,
}

/// The result of one scan, relative to the scan before it.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub present: HashSet<PathBuf>,
    pub added: HashSet<PathBuf>,
    pub removed: HashSet<PathBuf>,
}

impl Scanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, include: Regex) -> Self {
        Self {
            root: root.into(),
            include,
            exclude: None,
            previous: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_exclude(mut self, exclude: Regex) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Performs one scan, updating internal state so the next call can
    /// compute its own delta against this one.
    pub fn scan(&mut self) -> ScanResult {
        let mut present = HashSet::new();
        walk_dir(&self.root, &self.include, self.exclude.as_ref(), &mut present);

        let added = present.difference(&self.previous).cloned().collect();
        let removed = self.previous.difference(&present).cloned().collect();
        self.previous = present.clone();
        ScanResult {
            present,
            added,
            removed,
        }
    }
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn walk_dir(dir: &Path, include: &Regex, exclude: Option<&Regex>, out: &mut HashSet<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "failed to read directory");
            return;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if is_dotfile(&path) {
            continue;
        }

        // Follow symlinks: `metadata` (not `symlink_metadata`) resolves them.
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to stat entry");
                continue;
            }
        };

        if metadata.is_dir() {
            walk_dir(&path, include, exclude, out);
            continue;
        }
        if !metadata.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !include.is_match(name) {
            continue;
        }
        if exclude.is_some_and(|re| re.is_match(name)) {
            continue;
        }

        match fs::canonicalize(&path) {
            Ok(canonical) => {
                out.insert(canonical);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to canonicalize path");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self as stdfs, File};
    use tempfile::tempdir;

    #[test]
    fn finds_nested_matching_files() {
        let dir = tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("a/b")).unwrap();
        File::create(dir.path().join("a/b/x.log")).unwrap();
        File::create(dir.path().join("y.txt")).unwrap();

        let mut scanner = Scanner::new(dir.path(), Regex::new(r"\.log$").unwrap());
        let result = scanner.scan();
        assert_eq!(result.present.len(), 1);
        assert!(result
            .present
            .iter()
            .any(|p| p.ends_with("a/b/x.log")));
    }

    #[test]
    fn skips_dotfiles() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join(".hidden.log")).unwrap();
        File::create(dir.path().join("visible.log")).unwrap();

        let mut scanner = Scanner::new(dir.path(), Regex::new(r".*").unwrap());
        let result = scanner.scan();
        assert_eq!(result.present.len(), 1);
    }

    #[test]
    fn reports_added_and_removed_across_scans() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.log")).unwrap();

        let mut scanner = Scanner::new(dir.path(), Regex::new(r".*").unwrap());
        let first = scanner.scan();
        assert_eq!(first.added.len(), 1);
        assert!(first.removed.is_empty());

        stdfs::remove_file(dir.path().join("a.log")).unwrap();
        File::create(dir.path().join("b.log")).unwrap();
        let second = scanner.scan();
        assert_eq!(second.added.len(), 1);
        assert_eq!(second.removed.len(), 1);
        assert!(second.present.iter().any(|p| p.ends_with("b.log")));
    }

    #[test]
    fn exclude_regex_overrides_include() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("keep.log")).unwrap();
        File::create(dir.path().join("skip.log")).unwrap();

        let mut scanner = Scanner::new(dir.path(), Regex::new(r".*").unwrap())
            .with_exclude(Regex::new(r"^skip").unwrap());
        let result = scanner.scan();
        assert_eq!(result.present.len(), 1);
        assert!(result.present.iter().any(|p| p.ends_with("keep.log")));
    }
}
