//! Drives a [`Coordinator`] from a terminal.
//!
//! The driver pumps the coordinator, writes console output, replays
//! turtle commands onto a [`VirtualCanvas`] and answers input requests and
//! breakpoint pauses from its input stream.

use std::io::{BufRead, Write};
use std::time::Duration;

use sponge_runner::{
    Completion, Coordinator, CoordinatorEvent, DebugContext, Drawing, ExecutionState,
    RunnerConfig, VirtualCanvas,
};
use web_time::Instant;

use crate::error::{CliError, EXIT_FAILED, Result};

/// How long the runtime may take to load before the command gives up.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const POLL: Duration = Duration::from_millis(20);

const PAUSE_PROMPT: &str = "[c]ontinue [s]tep [q]uit> ";

/// Terminal streams a command reads from and writes to.
pub struct Terminal<'io> {
    pub input: &'io mut dyn BufRead,
    pub out: &'io mut dyn Write,
    /// Whether typed input already shows on the terminal. When set, the
    /// console echo of answered input is not written again.
    pub echoes_input: bool,
}

impl std::fmt::Debug for Terminal<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("echoes_input", &self.echoes_input)
            .finish_non_exhaustive()
    }
}

pub struct Driver<'t, 'io> {
    coordinator: Coordinator,
    canvas: VirtualCanvas,
    term: &'t mut Terminal<'io>,
    skip_echo: Option<String>,
    pause_shown: bool,
}

impl<'t, 'io> Driver<'t, 'io> {
    /// Start a session and wait until the runtime is ready.
    pub fn start(config: RunnerConfig, term: &'t mut Terminal<'io>) -> Result<Self> {
        let mut driver = Self {
            coordinator: Coordinator::new(config)?,
            canvas: VirtualCanvas::new(),
            term,
            skip_echo: None,
            pause_shown: false,
        };
        driver.wait_ready()?;
        Ok(driver)
    }

    pub fn coordinator(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    #[must_use]
    pub fn drawing(&self) -> &Drawing {
        self.canvas.drawing()
    }

    fn wait_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while self.coordinator.state() != ExecutionState::Ready {
            if Instant::now() >= deadline {
                return Err(CliError::exit(
                    EXIT_FAILED,
                    format!(
                        "runtime did not start within {}s (state: {})",
                        STARTUP_TIMEOUT.as_secs(),
                        self.coordinator.state()
                    ),
                ));
            }
            self.coordinator.pump_blocking(POLL);
        }
        let startup = self.coordinator.drain_events();
        tracing::debug!(target: "sponge.cli", events = startup.len(), "runtime ready");
        Ok(())
    }

    /// Pump until `completion` resolves, serving the terminal meanwhile.
    pub fn finish<T>(&mut self, completion: &Completion<T>) -> Result<T> {
        loop {
            self.coordinator.pump_blocking(POLL);
            self.forward()?;
            if let Some(result) = completion.try_take() {
                return result.map_err(CliError::from);
            }
            self.serve()?;
        }
    }

    /// Write out everything the coordinator reported.
    fn forward(&mut self) -> Result<()> {
        loop {
            let events = self.coordinator.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.apply(event)?;
            }
        }
        self.term.out.flush()?;
        Ok(())
    }

    fn apply(&mut self, event: CoordinatorEvent) -> Result<()> {
        match event {
            CoordinatorEvent::Print(text) => {
                if self.skip_echo.as_deref() == Some(text.as_str()) {
                    self.skip_echo = None;
                } else {
                    self.term.out.write_all(text.as_bytes())?;
                }
            }
            CoordinatorEvent::Draw(commands) => self.canvas.draw(&commands),
            CoordinatorEvent::Turtle {
                ticket,
                id,
                command,
            } => {
                self.canvas.apply(id, &command);
                if !self.coordinator.turtle_cmd_complete(ticket, None) {
                    tracing::debug!(target: "sponge.cli", "turtle ack ignored");
                }
            }
            CoordinatorEvent::Audio(clip) => {
                tracing::debug!(target: "sponge.cli", %clip, "audio skipped");
            }
            CoordinatorEvent::StateChanged(state) => {
                tracing::trace!(target: "sponge.cli", %state, "state");
                if state != ExecutionState::OnBreakpoint {
                    self.pause_shown = false;
                }
            }
            CoordinatorEvent::Cls | CoordinatorEvent::TurtleStop => {}
        }
        Ok(())
    }

    /// Answer whatever the program is blocked on.
    fn serve(&mut self) -> Result<()> {
        if self.coordinator.is_killing() {
            return Ok(());
        }
        match self.coordinator.state() {
            ExecutionState::AwaitingInput => match self.read_line()? {
                Some(line) => {
                    if self.term.echoes_input {
                        self.skip_echo = Some(format!("{line}\n"));
                    }
                    self.coordinator.input(&line);
                }
                None => {
                    tracing::debug!(target: "sponge.cli", "input closed; stopping program");
                    self.coordinator.kill();
                }
            },
            ExecutionState::OnBreakpoint => self.serve_pause()?,
            _ => {}
        }
        Ok(())
    }

    fn serve_pause(&mut self) -> Result<()> {
        if !self.pause_shown {
            if let Some(ctx) = self.coordinator.debug_context() {
                let text = render_pause(ctx);
                self.term.out.write_all(text.as_bytes())?;
            }
            self.pause_shown = true;
        }
        self.term.out.write_all(PAUSE_PROMPT.as_bytes())?;
        self.term.out.flush()?;

        let Some(line) = self.read_line()? else {
            self.coordinator.kill();
            return Ok(());
        };
        match line.trim() {
            "" | "c" | "continue" => {
                self.coordinator.resume();
            }
            "s" | "step" => {
                self.coordinator.step();
            }
            "q" | "quit" => {
                self.coordinator.kill();
            }
            other => writeln!(self.term.out, "unknown command: {other}")?,
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.term.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// The paused line, bound variables and watch values.
#[must_use]
pub fn render_pause(ctx: &DebugContext) -> String {
    let mut out = format!("-- paused at line {} --\n", ctx.line);
    for (name, value) in &ctx.variables {
        out.push_str(&format!("  {name} = {value}\n"));
    }
    for (expr, value) in &ctx.watches {
        out.push_str(&format!("  watch {expr} = {value}\n"));
    }
    out
}
