use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use sponge_runner::protocol::is_text_file;
use sponge_runner::{
    AdditionalFile, BookNode, DebugOptions, FinishReason, RunnerConfig, SessionFile, TestCase,
    TestResult,
};

use crate::driver::{Driver, Terminal};
use crate::error::{CliError, EXIT_FAILED, Result};
use crate::settings::{ConfigSource, load_config};

#[derive(Debug, Parser)]
#[command(
    name = "sponge",
    about = "Run, debug and test learner programs on the Sponge runtime",
    version
)]
pub struct Cli {
    /// Runner configuration (TOML, or JSON by extension). Defaults to
    /// `sponge.toml` in the working directory when present.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a program to completion.
    Run(RunArgs),

    /// Run a program under the debugger, pausing at breakpoints.
    Debug(DebugArgs),

    /// Check a program against a JSON list of test cases.
    Test(TestArgs),

    /// Install packages into the runtime.
    Install(InstallArgs),

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Program source file.
    pub file: PathBuf,

    /// Answer input requests with these lines instead of reading stdin.
    #[arg(long = "input", value_name = "LINE")]
    pub input: Vec<String>,

    /// Directory whose text files are mounted under `session/`; files the
    /// program changes are written back.
    #[arg(long, value_name = "DIR")]
    pub session_dir: Option<PathBuf>,

    /// Write the turtle drawing as JSON.
    #[arg(long, value_name = "FILE")]
    pub drawing: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DebugArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Pause before this line runs. Repeatable.
    #[arg(long = "break", value_name = "LINE")]
    pub breakpoints: Vec<u32>,

    /// Expression evaluated at every pause. Repeatable.
    #[arg(long = "watch", value_name = "EXPR")]
    pub watches: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct TestArgs {
    /// Program source file.
    pub file: PathBuf,

    /// JSON array of test cases.
    #[arg(long, value_name = "FILE")]
    pub cases: PathBuf,

    /// File provided to the program, as NAME=PATH. Repeatable.
    #[arg(long = "data", value_name = "NAME=PATH")]
    pub data: Vec<String>,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct InstallArgs {
    /// Package names.
    #[arg(required = true)]
    pub packages: Vec<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    let stdin = io::stdin();
    let echoes_input = stdin.is_terminal();
    let mut input = stdin.lock();
    let mut out = io::stdout().lock();
    let mut term = Terminal {
        input: &mut input,
        out: &mut out,
        echoes_input,
    };
    let cwd = std::env::current_dir()?;
    run_with(cli, &mut term, &cwd)
}

/// Dispatch `cli` against explicit streams and working directory.
pub fn run_with(cli: Cli, term: &mut Terminal<'_>, cwd: &Path) -> Result<()> {
    let (config, source) = load_config(cli.config.as_deref(), cwd)?;
    match cli.command {
        Commands::Run(args) => run_program(args, DebugSetup::default(), config, term),
        Commands::Debug(args) => {
            let setup = DebugSetup {
                debugging: true,
                breakpoints: args.breakpoints,
                watches: args.watches,
            };
            run_program(args.run, setup, config, term)
        }
        Commands::Test(args) => run_tests(args, config, term),
        Commands::Install(args) => run_install(args, config, term),
        Commands::Config => print_config(&config, &source, term),
    }
}

#[derive(Debug, Default)]
struct DebugSetup {
    debugging: bool,
    breakpoints: Vec<u32>,
    watches: Vec<String>,
}

fn read_program(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CliError::Program {
        path: path.to_path_buf(),
        source,
    })
}

fn run_program(
    args: RunArgs,
    setup: DebugSetup,
    config: RunnerConfig,
    term: &mut Terminal<'_>,
) -> Result<()> {
    let code = read_program(&args.file)?;
    let session_files = match &args.session_dir {
        Some(dir) => read_session_dir(dir)?,
        None => Vec::new(),
    };
    let options = DebugOptions {
        watches: setup.watches,
        fixed_input: (!args.input.is_empty()).then(|| args.input.join("\n")),
        session_files,
        ..DebugOptions::default()
    };

    let mut driver = Driver::start(config, term)?;
    let completion = {
        let coordinator = driver.coordinator();
        if setup.debugging {
            coordinator.set_breakpoints(setup.breakpoints);
            coordinator.debug(&code, options)
        } else {
            coordinator.run(&code, options)
        }
    };
    let finished = driver.finish(&completion)?;

    if let Some(dir) = &args.session_dir {
        write_session_files(dir, &finished.updated_session_files)?;
    }
    if let Some(path) = &args.drawing {
        fs::write(path, serde_json::to_string_pretty(driver.drawing())?)?;
    }

    match finished.reason {
        FinishReason::Ok => Ok(()),
        FinishReason::Error => Err(CliError::exit(EXIT_FAILED, "program finished with an error")),
        FinishReason::Interrupt => Err(CliError::exit(EXIT_FAILED, "program interrupted")),
    }
}

fn read_session_dir(dir: &Path) -> Result<Vec<SessionFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_file() || !is_text_file(&name) {
            continue;
        }
        files.push(SessionFile::new(name, fs::read_to_string(entry.path())?));
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn write_session_files(dir: &Path, files: &[SessionFile]) -> Result<()> {
    for file in files {
        let name = Path::new(&file.filename);
        if name.components().count() != 1 {
            tracing::warn!(target: "sponge.cli", file = %file.filename, "skipping nested session file");
            continue;
        }
        fs::write(dir.join(name), &file.data)?;
        tracing::debug!(target: "sponge.cli", file = %file.filename, "session file updated");
    }
    Ok(())
}

fn parse_data_arg(arg: &str) -> Result<AdditionalFile> {
    let Some((name, path)) = arg.split_once('=') else {
        return Err(CliError::invalid(format!("--data expects NAME=PATH, got '{arg}'")));
    };
    if name.is_empty() {
        return Err(CliError::invalid(format!("--data has an empty name: '{arg}'")));
    }
    Ok(AdditionalFile::new(name, fs::read_to_string(path)?))
}

fn run_tests(args: TestArgs, config: RunnerConfig, term: &mut Terminal<'_>) -> Result<()> {
    let code = read_program(&args.file)?;
    let cases: Vec<TestCase> = serde_json::from_str(&fs::read_to_string(&args.cases)?)?;
    if cases.is_empty() {
        return Err(CliError::invalid(format!(
            "{} contains no test cases",
            args.cases.display()
        )));
    }
    let data = args
        .data
        .iter()
        .map(|arg| parse_data_arg(arg))
        .collect::<Result<Vec<_>>>()?;

    let node_id = args
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let book_node = BookNode::new(node_id, args.file.display().to_string());

    let mut driver = Driver::start(config, term)?;
    let completion = driver.coordinator().test(&code, cases.clone(), &data, book_node);
    let finished = driver.finish(&completion)?;
    drop(driver);

    if args.json {
        serde_json::to_writer_pretty(&mut *term.out, &finished.results)?;
        writeln!(term.out)?;
    } else {
        term.out
            .write_all(render_results(&cases, &finished.results).as_bytes())?;
    }

    let failed = finished.results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        return Err(CliError::exit(
            EXIT_FAILED,
            format!("{failed} of {} tests failed", finished.results.len()),
        ));
    }
    Ok(())
}

/// One line per case, with the evidence of revealed failures.
#[must_use]
pub fn render_results(cases: &[TestCase], results: &[TestResult]) -> String {
    let mut out = String::new();
    for (index, result) in results.iter().enumerate() {
        let n = index + 1;
        if result.passed {
            out.push_str(&format!("case {n}: passed\n"));
            continue;
        }
        let reason = result.error.as_deref().unwrap_or("failed");
        out.push_str(&format!("case {n}: failed ({reason})\n"));
        let revealed = cases.get(index).is_none_or(|case| case.reveal);
        if !revealed {
            continue;
        }
        if let Some(input) = &result.input {
            out.push_str(&format!("  input:    {:?}\n", input.lines().join("\n")));
        }
        if let Some(expected) = &result.expected {
            out.push_str(&format!("  expected: {}\n", serde_json::to_string(expected).unwrap_or_default()));
        }
        if let Some(actual) = &result.actual {
            out.push_str(&format!("  actual:   {actual:?}\n"));
        }
        if let Some(outcomes) = &result.criteria_outcomes {
            let marks: Vec<&str> = outcomes
                .iter()
                .map(|ok| if *ok { "pass" } else { "fail" })
                .collect();
            out.push_str(&format!("  criteria: {}\n", marks.join(" ")));
        }
    }
    let passed = results.iter().filter(|r| r.passed).count();
    out.push_str(&format!("{passed}/{} passed\n", results.len()));
    out
}

fn run_install(args: InstallArgs, config: RunnerConfig, term: &mut Terminal<'_>) -> Result<()> {
    let unknown: Vec<&str> = args
        .packages
        .iter()
        .filter(|pkg| !config.package_index.contains(pkg))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(CliError::invalid(format!(
            "not in the package index: {}",
            unknown.join(", ")
        )));
    }

    let mut driver = Driver::start(config, term)?;
    let completion = driver.coordinator().install_deps(args.packages);
    driver.finish(&completion)
}

fn print_config(config: &RunnerConfig, source: &ConfigSource, term: &mut Terminal<'_>) -> Result<()> {
    match source {
        ConfigSource::Defaults => writeln!(term.out, "# source: defaults")?,
        ConfigSource::File(path) => writeln!(term.out, "# source: {}", path.display())?,
    }
    term.out.write_all(config.to_toml_string()?.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::EXIT_USAGE;

    fn dispatch(command: Commands, cwd: &Path) -> (Result<()>, String) {
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let mut term = Terminal {
            input: &mut input,
            out: &mut out,
            echoes_input: false,
        };
        let result = run_with(Cli { config: None, command }, &mut term, cwd);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn config_command_prints_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (result, out) = dispatch(Commands::Config, dir.path());
        assert!(result.is_ok());
        assert!(out.starts_with("# source: defaults\n"));
        assert!(out.contains("kill_timeout_ms = 2000"));
    }

    #[test]
    fn missing_program_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let (result, _) = dispatch(
            Commands::Run(RunArgs {
                file: dir.path().join("missing.py"),
                ..RunArgs::default()
            }),
            dir.path(),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, CliError::Program { .. }));
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn unknown_package_is_rejected_before_starting() {
        let dir = tempfile::tempdir().unwrap();
        let (result, out) = dispatch(
            Commands::Install(InstallArgs {
                packages: vec!["numpy".into()],
            }),
            dir.path(),
        );
        assert_eq!(result.unwrap_err().exit_code(), EXIT_USAGE);
        assert!(out.is_empty());
    }

    #[test]
    fn data_argument_needs_a_name() {
        assert!(matches!(
            parse_data_arg("no-equals"),
            Err(CliError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_data_arg("=x.txt"),
            Err(CliError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn hidden_failures_show_no_evidence() {
        let cases = vec![TestCase::text("1", "2"), TestCase::text("3", "4").hidden()];
        let failing = TestResult {
            actual: Some("5\n".into()),
            ..TestResult::failure(sponge_runner::checker::INCORRECT_OUTPUT)
        };
        let text = render_results(&cases, &[failing.clone(), failing]);
        assert_eq!(text.matches("actual:").count(), 1);
        assert!(text.contains("case 2: failed (Incorrect output)\n0/2 passed\n"));
    }

    #[test]
    fn cli_parses_repeated_flags() {
        let cli = Cli::try_parse_from([
            "sponge", "debug", "prog.py", "--break", "2", "--break", "5", "--watch", "x",
        ])
        .unwrap();
        let Commands::Debug(args) = cli.command else {
            panic!("expected debug");
        };
        assert_eq!(args.breakpoints, vec![2, 5]);
        assert_eq!(args.watches, vec!["x".to_string()]);
        assert_eq!(args.run.file, PathBuf::from("prog.py"));
    }
}
