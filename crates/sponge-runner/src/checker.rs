#![forbid(unsafe_code)]

//! Test cases and how a finished test run is judged against them.
//!
//! A test case's expected output is either plain text, compared with
//! surrounding whitespace trimmed, or a list of [`Requirement`]s that each
//! look for a pattern in one piece of evidence: the program output, the
//! source code, a file the program wrote, the output of an extra
//! statement run afterwards, or the turtle drawing.

use std::fmt;

use regex_lite::RegexBuilder;
use serde::{Deserialize, Serialize};

pub const FAILED_TO_COMPILE: &str = "Failed to compile";
pub const RUNTIME_ERROR: &str = "Runtime error";
pub const INCORRECT_OUTPUT: &str = "Incorrect output";
pub const UNCONSUMED_INPUT: &str = "Unconsumed input";
pub const INTERRUPTED: &str = "Interrupted";

fn yes() -> bool {
    true
}

fn any_count() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "in")]
    pub input: TestInput,
    #[serde(rename = "out")]
    pub output: ExpectedOutput,
    #[serde(default = "yes")]
    pub reveal: bool,
}

impl TestCase {
    pub fn text(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: TestInput::Text(input.into()),
            output: ExpectedOutput::Text(output.into()),
            reveal: true,
        }
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.reveal = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestInput {
    /// Lines separated by `\n`.
    Text(String),
    Lines(Vec<InputItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for InputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputItem::Text(s) => f.write_str(s),
            InputItem::Number(n) => write!(f, "{n}"),
        }
    }
}

impl TestInput {
    /// The queue of lines `input()` will return, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match self {
            TestInput::Text(text) if text.is_empty() => Vec::new(),
            TestInput::Text(text) => text.split('\n').map(str::to_string).collect(),
            TestInput::Lines(items) => items.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutput {
    Text(String),
    Requirements(Vec<Requirement>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequirementKind {
    #[default]
    #[serde(rename = "+")]
    OutputContains,
    #[serde(rename = "-")]
    OutputLacks,
    #[serde(rename = "c+")]
    CodeContains,
    #[serde(rename = "c-")]
    CodeLacks,
    #[serde(rename = "f+")]
    FileContains,
    #[serde(rename = "f-")]
    FileLacks,
    #[serde(rename = "s+")]
    StatementContains,
    #[serde(rename = "s-")]
    StatementLacks,
    #[serde(rename = "t")]
    Turtle,
}

impl RequirementKind {
    fn wants_presence(self) -> bool {
        matches!(
            self,
            RequirementKind::OutputContains
                | RequirementKind::CodeContains
                | RequirementKind::FileContains
                | RequirementKind::StatementContains
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub pattern: String,
    #[serde(default)]
    pub typ: RequirementKind,
    /// Any of `w` (whitespace), `c` (case), `p` (punctuation).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ignore: String,
    /// Exact number of occurrences required; -1 means any.
    #[serde(default = "any_count")]
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default = "yes")]
    pub regex: bool,
}

impl Requirement {
    pub fn new(typ: RequirementKind, pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            typ,
            ignore: String::new(),
            count: -1,
            filename: None,
            statement: None,
            regex: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(rename = "outcome")]
    pub passed: bool,
    #[serde(rename = "err", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ExpectedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(rename = "ins", default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TestInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_outcomes: Option<Vec<bool>>,
}

impl TestResult {
    /// Uniform failure applied to every case, e.g. on a compile error.
    #[must_use]
    pub fn failure(reason: &str) -> Self {
        Self {
            passed: false,
            error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    fn with_input(mut self, case: &TestCase) -> Self {
        self.input = Some(case.input.clone());
        self
    }
}

/// Everything about a finished program that requirements can inspect.
pub trait EvidenceSource {
    fn output(&self) -> &str;

    fn code(&self) -> &str;

    /// Contents of a file the program left behind.
    fn file(&mut self, name: &str) -> Option<String>;

    /// Output of running `statement` after the program. `None` if it
    /// failed.
    fn statement_output(&mut self, statement: &str) -> Option<String>;

    /// Whether the program drew the same picture as `reference_code`.
    fn turtle_matches(&mut self, reference_code: &str) -> bool;
}

/// How the program under test ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Faulted,
}

/// Judge one finished run. `unconsumed` holds the input lines the program
/// never read.
pub fn evaluate(
    case: &TestCase,
    end: RunEnd,
    unconsumed: &[String],
    evidence: &mut dyn EvidenceSource,
) -> TestResult {
    if end == RunEnd::Faulted {
        return TestResult::failure(RUNTIME_ERROR).with_input(case);
    }
    let unconsumed = match unconsumed {
        [only] if only.is_empty() => &[][..],
        rest => rest,
    };

    let (output_ok, criteria) = match &case.output {
        ExpectedOutput::Text(expected) => (expected.trim() == evidence.output().trim(), None),
        ExpectedOutput::Requirements(reqs) => {
            let outcomes: Vec<bool> = reqs.iter().map(|r| check(r, evidence)).collect();
            (outcomes.iter().all(|ok| *ok), Some(outcomes))
        }
    };

    let mut result = if !output_ok {
        let mut result = TestResult::failure(INCORRECT_OUTPUT);
        if case.reveal {
            result.expected = Some(case.output.clone());
            result.actual = Some(evidence.output().to_string());
        }
        result
    } else if !unconsumed.is_empty() {
        tracing::trace!(target: "sponge.bridge", left = unconsumed.len(), "inputs unconsumed");
        TestResult::failure(UNCONSUMED_INPUT)
    } else {
        TestResult {
            passed: true,
            ..TestResult::default()
        }
    };
    result.criteria_outcomes = criteria;
    result.with_input(case)
}

/// Whether one requirement holds.
pub fn check(req: &Requirement, evidence: &mut dyn EvidenceSource) -> bool {
    let haystack = match req.typ {
        RequirementKind::Turtle => return evidence.turtle_matches(&req.pattern),
        RequirementKind::OutputContains | RequirementKind::OutputLacks => {
            Some(evidence.output().to_string())
        }
        RequirementKind::CodeContains | RequirementKind::CodeLacks => {
            Some(evidence.code().to_string())
        }
        RequirementKind::FileContains | RequirementKind::FileLacks => req
            .filename
            .as_deref()
            .and_then(|name| evidence.file(name)),
        RequirementKind::StatementContains | RequirementKind::StatementLacks => {
            match req.statement.as_deref() {
                Some(stmt) => match evidence.statement_output(stmt) {
                    Some(out) => Some(out),
                    None => return false,
                },
                None => return false,
            }
        }
    };
    let present = req.typ.wants_presence();
    let Some(haystack) = haystack else {
        // A missing file contains nothing.
        return !present;
    };
    let Some(occurrences) = occurrences(req, &haystack) else {
        return false;
    };
    match (present, req.count) {
        (true, n) if n < 0 => occurrences > 0,
        (true, n) => occurrences as i64 == n,
        (false, n) if n < 0 => occurrences == 0,
        (false, n) => occurrences as i64 != n,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Ignore {
    whitespace: bool,
    case: bool,
    punctuation: bool,
}

impl Ignore {
    fn parse(flags: &str) -> Self {
        Self {
            whitespace: flags.contains('w'),
            case: flags.contains('c'),
            punctuation: flags.contains('p'),
        }
    }

    fn normalize(self, text: &str, lowercase: bool) -> String {
        let kept = text.chars().filter(|c| {
            !(self.whitespace && c.is_whitespace() || self.punctuation && c.is_ascii_punctuation())
        });
        if lowercase && self.case {
            kept.flat_map(char::to_lowercase).collect()
        } else {
            kept.collect()
        }
    }
}

/// Non-overlapping occurrences of the pattern. `None` for a pattern that
/// is not a valid regular expression.
fn occurrences(req: &Requirement, haystack: &str) -> Option<usize> {
    let ignore = Ignore::parse(&req.ignore);
    if req.regex {
        let text = ignore.normalize(haystack, false);
        let pattern = if ignore.whitespace {
            req.pattern.chars().filter(|c| !c.is_whitespace()).collect()
        } else {
            req.pattern.clone()
        };
        let re = match RegexBuilder::new(&pattern)
            .case_insensitive(ignore.case)
            .build()
        {
            Ok(re) => re,
            Err(err) => {
                tracing::debug!(target: "sponge.bridge", pattern = %req.pattern, %err, "invalid requirement pattern");
                return None;
            }
        };
        Some(re.find_iter(&text).count())
    } else {
        let text = ignore.normalize(haystack, true);
        let needle = ignore.normalize(&req.pattern, true);
        if needle.is_empty() {
            return Some(usize::from(!text.is_empty()));
        }
        Some(text.matches(needle.as_str()).count())
    }
}
