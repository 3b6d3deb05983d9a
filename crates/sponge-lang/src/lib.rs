#![forbid(unsafe_code)]

//! A small Python-subset runtime for the Sponge runner.
//!
//! Programs are parsed into a statement tree, optionally instrumented with
//! breakpoint statements, and executed by [`Interpreter`] against a
//! [`Host`] that owns every side effect: console I/O, the in-memory file
//! system, graphics, timing and debugger pauses.
//!
//! ```
//! use sponge_lang::{BufferHost, Interpreter, Program};
//!
//! let program = Program::compile("print(6 * 7)").unwrap();
//! let mut host = BufferHost::new();
//! Interpreter::new(&mut host).run(program.body()).unwrap();
//! assert_eq!(host.output, "42\n");
//! ```

pub mod ast;
mod builtins;
pub mod error;
pub mod fs;
pub mod graphics;
pub mod host;
pub mod instrument;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use builtins::PACKAGES;
pub use error::{ErrorKind, ExecError, HostError, MAIN_FILE, ParseError, RuntimeError};
pub use fs::{MemoryFs, SESSION_DIR};
pub use graphics::{DrawCommand, TurtleCommand};
pub use host::{BreakSnapshot, BufferHost, Host};
pub use instrument::{InjectionPlan, InjectionReport};
pub use interp::{Interpreter, RECURSION_LIMIT};
pub use value::Value;

use ast::Stmt;

/// A parsed program, ready to run or instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    body: Vec<Stmt>,
}

impl Program {
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            body: parser::parse(source)?,
        })
    }

    /// Splice breakpoint statements into the program.
    pub fn instrument(&mut self, plan: &InjectionPlan) -> InjectionReport {
        instrument::instrument(&mut self.body, plan)
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }
}
