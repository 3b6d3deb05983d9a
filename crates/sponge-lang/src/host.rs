//! The boundary between the interpreter and whatever embeds it.
//!
//! The interpreter is single-threaded and never blocks on its own; every
//! primitive that may need to wait (reading input, sleeping, pausing at a
//! breakpoint, waiting for a turtle animation) goes through [`Host`].

use std::collections::BTreeMap;

use crate::error::HostError;
use crate::fs::MemoryFs;
use crate::graphics::{DrawCommand, TurtleCommand};

/// Program state captured at a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BreakSnapshot {
    pub line: u32,
    /// Visible bindings rendered with `str`, sorted by name.
    pub variables: BTreeMap<String, String>,
    /// `(expression, rendered value)` per watch, in request order.
    pub watches: Vec<(String, String)>,
}

pub trait Host {
    /// Standard output.
    fn write(&mut self, text: &str) -> Result<(), HostError>;

    /// Block until a line of input is available. The prompt has already
    /// been written.
    fn read_line(&mut self) -> Result<String, HostError>;

    fn fs(&mut self) -> &mut MemoryFs;

    /// Polled before every statement and after every blocking primitive.
    fn interrupted(&self) -> bool {
        false
    }

    fn sleep(&mut self, _seconds: f64) -> Result<(), HostError> {
        Ok(())
    }

    /// Whether an instrumented line should pause right now.
    fn should_pause(&mut self, _line: u32) -> bool {
        false
    }

    /// Block at a breakpoint until the controller resumes.
    fn pause(&mut self, _snapshot: BreakSnapshot) -> Result<(), HostError> {
        Ok(())
    }

    fn watches(&self) -> Vec<String> {
        Vec::new()
    }

    fn turtle(&mut self, _id: u32, _command: TurtleCommand) -> Result<(), HostError> {
        Ok(())
    }

    fn draw(&mut self, _commands: Vec<DrawCommand>) -> Result<(), HostError> {
        Ok(())
    }

    fn audio(&mut self, _name: &str) -> Result<(), HostError> {
        Ok(())
    }

    fn clear_screen(&mut self) -> Result<(), HostError> {
        Ok(())
    }

    fn key_down(&self, _code: u8) -> bool {
        false
    }

    /// Installable packages present in this runtime.
    fn has_package(&self, _name: &str) -> bool {
        false
    }
}

/// Host with scripted input and captured output, for tests and batch use.
#[derive(Debug, Default)]
pub struct BufferHost {
    pub output: String,
    pub inputs: std::collections::VecDeque<String>,
    pub fs: MemoryFs,
    pub turtle_log: Vec<(u32, TurtleCommand)>,
    pub draw_log: Vec<DrawCommand>,
    pub packages: Vec<String>,
}

impl BufferHost {
    pub fn new() -> Self {
        Self {
            fs: MemoryFs::new(),
            ..Self::default()
        }
    }

    pub fn with_inputs<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut host = Self::new();
        host.inputs = inputs.into_iter().map(Into::into).collect();
        host
    }
}

impl Host for BufferHost {
    fn write(&mut self, text: &str) -> Result<(), HostError> {
        self.output.push_str(text);
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, HostError> {
        self.inputs.pop_front().ok_or(HostError::EndOfInput)
    }

    fn fs(&mut self) -> &mut MemoryFs {
        &mut self.fs
    }

    fn turtle(&mut self, id: u32, command: TurtleCommand) -> Result<(), HostError> {
        self.turtle_log.push((id, command));
        Ok(())
    }

    fn draw(&mut self, commands: Vec<DrawCommand>) -> Result<(), HostError> {
        self.draw_log.extend(commands);
        Ok(())
    }

    fn has_package(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p == name)
    }
}
