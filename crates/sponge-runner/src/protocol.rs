#![forbid(unsafe_code)]

//! Messages between the coordinator and a worker.
//!
//! Both directions are closed enums. They serialize to the JSON shape a
//! browser worker would exchange (`{"cmd": "debug", "code": ...}`), which
//! the CLI uses for `--json` event logs and tests use to pin the wire
//! format. Shared buffers never serialize; they travel in-process only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sponge_lang::{DrawCommand, TurtleCommand};

use crate::canvas::Drawing;
use crate::checker::{TestCase, TestResult};
use crate::signal::SharedBuffers;

/// Identity of the book page a test or example belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl BookNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A file kept in the `session/` folder between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    pub filename: String,
    pub data: String,
    pub is_text: bool,
}

impl SessionFile {
    pub fn new(filename: impl Into<String>, data: impl Into<String>) -> Self {
        let filename = filename.into();
        let is_text = is_text_file(&filename);
        Self {
            filename,
            data: data.into(),
            is_text,
        }
    }
}

#[must_use]
pub fn is_text_file(name: &str) -> bool {
    [".txt", ".csv", ".json"].iter().any(|ext| name.ends_with(ext))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum WorkerCommand {
    Init {
        standalone: bool,
    },
    #[serde(rename = "setSharedBuffers")]
    SetSharedBuffers {
        #[serde(skip)]
        buffers: SharedBuffers,
    },
    InstallDeps {
        deps: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Debug {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init_code: Option<String>,
        breakpoints: Option<Vec<u32>>,
        #[serde(default)]
        watches: Vec<String>,
        #[serde(default)]
        session_files: Vec<SessionFile>,
        #[serde(default)]
        is_session_files_allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    Run {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init_code: Option<String>,
        #[serde(default)]
        session_files: Vec<SessionFile>,
        #[serde(default)]
        is_session_files_allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    Test {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init_code: Option<String>,
        tests: Vec<TestCase>,
        book_node: BookNode,
        #[serde(default)]
        session_files: Vec<SessionFile>,
        #[serde(default)]
        is_session_files_allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    DrawTurtleExample {
        code: String,
        inputs: Vec<String>,
        book_node: BookNode,
    },
}

impl WorkerCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Init { .. } => "init",
            WorkerCommand::SetSharedBuffers { .. } => "setSharedBuffers",
            WorkerCommand::InstallDeps { .. } => "install-deps",
            WorkerCommand::Debug { .. } => "debug",
            WorkerCommand::Run { .. } => "run",
            WorkerCommand::Test { .. } => "test",
            WorkerCommand::DrawTurtleExample { .. } => "draw-turtle-example",
        }
    }
}

/// How a debug or run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Ok,
    Error,
    Interrupt,
}

impl FinishReason {
    /// Console line shown when a program finishes, without the
    /// surrounding newlines.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            FinishReason::Ok => "Program finished ok. Press run/debug to run again...",
            FinishReason::Error => {
                "Interrupted by error. Check the error message, then press run/debug to execute again..."
            }
            FinishReason::Interrupt => "Interrupted...",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinishReason::Ok => "ok",
            FinishReason::Error => "error",
            FinishReason::Interrupt => "interrupt",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum WorkerEvent {
    /// The worker thread is up and accepting commands.
    Loaded,
    InitDone,
    Print {
        msg: String,
    },
    Draw {
        msg: Vec<DrawCommand>,
    },
    Audio {
        msg: String,
    },
    /// Blocks the runtime until acknowledged through the turtle route.
    Turtle {
        id: i64,
        msg: TurtleCommand,
    },
    Cls,
    /// The runtime is blocked on the input route.
    Input,
    /// The runtime is blocked on the debug-break route.
    Breakpt {
        lineno: u32,
        env: BTreeMap<String, String>,
        #[serde(default)]
        watches: Vec<(String, String)>,
    },
    #[serde(rename_all = "camelCase")]
    DebugFinished {
        reason: FinishReason,
        #[serde(default)]
        updated_session_files: Vec<SessionFile>,
    },
    #[serde(rename_all = "camelCase")]
    TestFinished {
        results: Vec<TestResult>,
        code: String,
        book_node: BookNode,
    },
    InstallDepsFinished,
    #[serde(rename_all = "camelCase")]
    DrawTurtleExampleFinished {
        book_node: BookNode,
        drawing: Drawing,
    },
}
