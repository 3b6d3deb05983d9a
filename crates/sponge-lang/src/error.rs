use std::fmt;

use thiserror::Error;

/// File name used when rendering diagnostics for learner code.
pub const MAIN_FILE: &str = "<main.py>";

/// Source failed to tokenize or parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("  File \"<main.py>\", line {line}\nSyntaxError: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Python exception class raised by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NameError,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    ZeroDivisionError,
    AttributeError,
    ModuleNotFoundError,
    FileNotFoundError,
    EOFError,
    RecursionError,
    OverflowError,
    MemoryError,
    /// Cooperative cancellation. User code can never observe or catch it.
    KeyboardInterrupt,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::NameError => "NameError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::AttributeError => "AttributeError",
            Self::ModuleNotFoundError => "ModuleNotFoundError",
            Self::FileNotFoundError => "FileNotFoundError",
            Self::EOFError => "EOFError",
            Self::RecursionError => "RecursionError",
            Self::OverflowError => "OverflowError",
            Self::MemoryError => "MemoryError",
            Self::KeyboardInterrupt => "KeyboardInterrupt",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An uncaught exception. `line` is the statement that raised it and
/// `frames` lists the enclosing function names, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub line: u32,
    pub message: String,
    pub frames: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            line: 0,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn interrupt() -> Self {
        Self::new(ErrorKind::KeyboardInterrupt, "")
    }

    pub fn is_interrupt(&self) -> bool {
        self.kind == ErrorKind::KeyboardInterrupt
    }

    pub(crate) fn at(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Traceback (most recent call last):")?;
        let scope = self.frames.last().map_or("<module>", String::as_str);
        writeln!(f, "  File \"{MAIN_FILE}\", line {}, in {scope}", self.line)?;
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Everything that can stop a program: it never compiled, or it raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("{0}")]
    Compile(#[from] ParseError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

impl ExecError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Runtime(err) if err.is_interrupt())
    }
}

/// Failure reported by a [`Host`](crate::Host) primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("interrupted")]
    Interrupted,
    #[error("EOF when reading a line")]
    EndOfInput,
    #[error("{0}")]
    Failed(String),
}

impl From<HostError> for RuntimeError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Interrupted => RuntimeError::interrupt(),
            HostError::EndOfInput => {
                RuntimeError::new(ErrorKind::EOFError, "EOF when reading a line")
            }
            HostError::Failed(msg) => RuntimeError::new(ErrorKind::ValueError, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_renders_python_traceback() {
        let err = RuntimeError::new(ErrorKind::NameError, "name 'y' is not defined").at(3);
        assert_eq!(
            err.to_string(),
            "Traceback (most recent call last):\n  File \"<main.py>\", line 3, in <module>\nNameError: name 'y' is not defined"
        );
    }

    #[test]
    fn at_keeps_innermost_line() {
        let err = RuntimeError::new(ErrorKind::TypeError, "x").at(7).at(2);
        assert_eq!(err.line, 7);
    }

    #[test]
    fn host_interrupt_maps_to_keyboard_interrupt() {
        let err: RuntimeError = HostError::Interrupted.into();
        assert!(err.is_interrupt());
        assert_eq!(err.to_string().lines().last(), Some("KeyboardInterrupt"));
    }
}
