//! Immutable snapshots of a virtual directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// An immutable snapshot of a small virtual directory.
///
/// Cloning is cheap (the file map is shared). [`Tree::with_new_file`]
/// returns a new snapshot and leaves the receiver untouched, so anyone
/// holding an older snapshot keeps seeing the old contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    files: Arc<BTreeMap<String, String>>,
}

impl Tree {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(path, contents)` pairs. Later duplicates win.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(path, contents)| (normalize(path.as_ref()), contents.into()))
            .collect();
        Self {
            files: Arc::new(files),
        }
    }

    /// Return a new snapshot with `path` set to `contents`, replacing any
    /// previous file at that path.
    pub fn with_new_file(&self, path: &str, contents: impl Into<String>) -> Self {
        let mut files = BTreeMap::clone(&self.files);
        files.insert(normalize(path), contents.into());
        Self {
            files: Arc::new(files),
        }
    }

    /// Contents of the file at `path`, if present.
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize(path)).map(String::as_str)
    }

    /// Whether a file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    /// Iterate over `(path, contents)` in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// SHA-256 over every path and its contents, hex-encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, contents) in self.files.iter() {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(contents.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Normalize a relative path: drop leading `/`, `.` and empty segments.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_new_file_leaves_receiver_untouched() {
        let before = Tree::new().with_new_file("main.go", "package main");
        let after = before.with_new_file("main.go", "package other");

        assert_eq!(before.file("main.go"), Some("package main"));
        assert_eq!(after.file("main.go"), Some("package other"));
    }

    #[test]
    fn paths_are_normalized() {
        let tree = Tree::new().with_new_file("/src/./demo//main.py", "x");
        assert_eq!(tree.file("src/demo/main.py"), Some("x"));
        assert!(tree.contains("./src/demo/main.py"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn from_files_orders_entries() {
        let tree = Tree::from_files([("b.txt", "2"), ("a.txt", "1")]);
        let paths: Vec<&str> = tree.entries().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn digest_tracks_contents() {
        let a = Tree::new().with_new_file("main.go", "one");
        let b = Tree::new().with_new_file("main.go", "one");
        let c = a.with_new_file("main.go", "two");

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn digest_separates_path_and_contents() {
        let a = Tree::new().with_new_file("ab", "c");
        let b = Tree::new().with_new_file("a", "bc");
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn empty_tree() {
        let tree = Tree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.file("main.go"), None);
    }
}
