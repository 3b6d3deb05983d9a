//! Editor-side data handed to the coordinator: breakpoints, the paused
//! debug context and extra files to materialise before a run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sponge_lang::BreakSnapshot;

/// Ordered set of breakpoint lines with a dirty flag tracking whether
/// the runtime's copy is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet {
    lines: BTreeSet<u32>,
    dirty: bool,
    revision: u64,
}

impl BreakpointSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines(lines: impl IntoIterator<Item = u32>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
            dirty: false,
            revision: 0,
        }
    }

    #[must_use]
    pub fn lines(&self) -> &BTreeSet<u32> {
        &self.lines
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.lines.iter().copied().collect()
    }

    #[must_use]
    pub fn contains(&self, line: u32) -> bool {
        self.lines.contains(&line)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bumped on every change; used to key cached decorations.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn changed(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    /// Replace the whole set. Returns whether anything changed.
    pub fn set(&mut self, lines: impl IntoIterator<Item = u32>) -> bool {
        let lines: BTreeSet<u32> = lines.into_iter().collect();
        if lines == self.lines {
            return false;
        }
        self.lines = lines;
        self.changed();
        true
    }

    /// Gutter click. Returns whether the line is now armed.
    pub fn toggle(&mut self, line: u32) -> bool {
        let armed = if self.lines.remove(&line) {
            false
        } else {
            self.lines.insert(line);
            true
        };
        self.changed();
        armed
    }

    /// Arm `line + 1` for a step. Only marks the set dirty when the line
    /// was not already armed.
    pub fn synthesize_step(&mut self, line: u32) -> bool {
        let next = line.saturating_add(1);
        if self.lines.insert(next) {
            self.changed();
            true
        } else {
            false
        }
    }

    /// The set to resend, if the runtime's copy is stale. Clears the flag.
    pub fn take_dirty(&mut self) -> Option<Vec<u32>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.to_vec())
    }

    /// The runtime has just been handed the full set.
    pub fn mark_sent(&mut self) {
        self.dirty = false;
    }
}

/// State of a paused program, replaced wholesale on every breakpoint hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugContext {
    pub line: u32,
    pub variables: Vec<(String, String)>,
    pub watches: Vec<(String, String)>,
}

impl From<BreakSnapshot> for DebugContext {
    fn from(snapshot: BreakSnapshot) -> Self {
        Self {
            line: snapshot.line,
            variables: snapshot.variables.into_iter().collect(),
            watches: snapshot.watches,
        }
    }
}

impl DebugContext {
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A file the book provides alongside the learner's program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalFile {
    pub filename: String,
    pub contents: String,
}

impl AdditionalFile {
    pub fn new(filename: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
        }
    }
}

/// Program text that writes every file before the learner's code runs.
#[must_use]
pub fn additional_files_init_code(files: &[AdditionalFile]) -> String {
    let mut code = String::new();
    for file in files {
        code.push_str(&format!(
            "with open({}, \"w\") as f:\n    f.write({})\n",
            quote(&file.filename),
            quote(&file.contents)
        ));
    }
    code
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
