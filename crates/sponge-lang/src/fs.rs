//! In-memory file system visible to learner programs.
//!
//! Every write stamps the file with the next value of a monotonic
//! revision counter. Callers take [`MemoryFs::revision`] as a lock point
//! and later ask which files changed after it.

use std::collections::{BTreeMap, BTreeSet};

/// Folder holding files that persist between runs of one session.
pub const SESSION_DIR: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    contents: String,
    revision: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Entry>,
    dirs: BTreeSet<String>,
    clock: u64,
}

/// Strip `./` and leading `/` so `./a.txt`, `/a.txt` and `a.txt` agree.
pub fn normalize(path: &str) -> String {
    let mut p = path.trim();
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            break;
        }
    }
    p.trim_end_matches('/').to_string()
}

impl MemoryFs {
    /// Empty file system with the session folder present.
    pub fn new() -> Self {
        let mut fs = Self::default();
        fs.mkdir(SESSION_DIR);
        fs
    }

    pub fn mkdir(&mut self, path: &str) {
        self.dirs.insert(normalize(path));
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(&normalize(path))
    }

    /// Current value of the revision counter.
    pub fn revision(&self) -> u64 {
        self.clock
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn write(&mut self, path: &str, contents: impl Into<String>) {
        let revision = self.tick();
        self.files.insert(
            normalize(path),
            Entry {
                contents: contents.into(),
                revision,
            },
        );
    }

    pub fn append(&mut self, path: &str, text: &str) {
        let revision = self.tick();
        let entry = self.files.entry(normalize(path)).or_insert(Entry {
            contents: String::new(),
            revision,
        });
        entry.contents.push_str(text);
        entry.revision = revision;
    }

    pub fn read(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize(path)).map(|e| e.contents.as_str())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.files.remove(&normalize(path)).is_some()
    }

    pub fn file_revision(&self, path: &str) -> Option<u64> {
        self.files.get(&normalize(path)).map(|e| e.revision)
    }

    /// Files directly under `dir`, as `(file name, contents)`.
    pub fn list(&self, dir: &str) -> Vec<(String, String)> {
        let prefix = format!("{}/", normalize(dir));
        self.files
            .iter()
            .filter_map(|(path, entry)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| (name.to_string(), entry.contents.clone()))
            })
            .collect()
    }

    /// Files directly under `dir` written after revision `since`.
    pub fn modified_since(&self, dir: &str, since: u64) -> Vec<(String, String)> {
        let prefix = format!("{}/", normalize(dir));
        self.files
            .iter()
            .filter(|(_, entry)| entry.revision > since)
            .filter_map(|(path, entry)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| (name.to_string(), entry.contents.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        let mut fs = MemoryFs::new();
        fs.write("./data.txt", "x");
        assert_eq!(fs.read("/data.txt"), Some("x"));
        assert!(fs.is_dir("session/"));
    }

    #[test]
    fn modified_since_uses_revision_lock() {
        let mut fs = MemoryFs::new();
        fs.write("session/a.txt", "1");
        let lock = fs.revision();
        fs.write("session/b.txt", "2");
        fs.append("session/a.txt", "3");
        fs.write("other.txt", "4");
        let changed = fs.modified_since(SESSION_DIR, lock);
        assert_eq!(
            changed,
            vec![
                ("a.txt".to_string(), "13".to_string()),
                ("b.txt".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn rewrite_with_same_contents_still_counts() {
        let mut fs = MemoryFs::new();
        fs.write("session/a.txt", "1");
        let lock = fs.revision();
        fs.write("session/a.txt", "1");
        assert_eq!(fs.modified_since(SESSION_DIR, lock).len(), 1);
    }
}
