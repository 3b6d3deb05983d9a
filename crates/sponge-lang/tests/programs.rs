//! End-to-end programs through parse, instrument and run.

use std::collections::BTreeSet;

use sponge_lang::{
    BreakSnapshot, BufferHost, ErrorKind, ExecError, Host, HostError, InjectionPlan, Interpreter,
    MemoryFs, Program,
};

fn run(src: &str, inputs: &[&str]) -> (BufferHost, Result<(), ExecError>) {
    let mut host = BufferHost::with_inputs(inputs.iter().copied());
    let result = Interpreter::with_seed(&mut host, 7).exec_source(src);
    (host, result)
}

#[test]
fn fizzbuzz() {
    let src = "\
for i in range(1, 16):
    if i % 15 == 0:
        print('FizzBuzz')
    elif i % 3 == 0:
        print('Fizz')
    elif i % 5 == 0:
        print('Buzz')
    else:
        print(i)
";
    let (host, result) = run(src, &[]);
    result.unwrap();
    let lines: Vec<&str> = host.output.lines().collect();
    assert_eq!(lines.len(), 15);
    assert_eq!(lines[2], "Fizz");
    assert_eq!(lines[4], "Buzz");
    assert_eq!(lines[14], "FizzBuzz");
}

#[test]
fn interactive_sum_reads_until_blank() {
    let src = "\
total = 0
while True:
    line = input('n: ')
    if line == '':
        break
    total += int(line)
print('total', total)
";
    let (host, result) = run(src, &["3", "4", ""]);
    result.unwrap();
    assert_eq!(host.output, "n: n: n: total 7\n");
}

#[test]
fn recursive_function_and_globals() {
    let src = "\
calls = 0
def fact(n):
    global calls
    calls += 1
    if n <= 1:
        return 1
    return n * fact(n - 1)
print(fact(10), calls)
";
    let (host, result) = run(src, &[]);
    result.unwrap();
    assert_eq!(host.output, "3628800 10\n");
}

#[test]
fn uncaught_error_renders_traceback() {
    let src = "def boom(x):\n    return x / 0\n\nprint('before')\nboom(1)\n";
    let (host, result) = run(src, &[]);
    assert_eq!(host.output, "before\n");
    let Err(ExecError::Runtime(err)) = result else {
        panic!("expected runtime error");
    };
    assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
    assert_eq!(err.line, 2);
    assert_eq!(
        err.to_string(),
        "Traceback (most recent call last):\n  File \"<main.py>\", line 2, in boom\nZeroDivisionError: division by zero"
    );
}

#[test]
fn syntax_errors_surface_as_compile_errors() {
    let err = Program::compile("if x\n    pass\n").unwrap_err();
    assert_eq!(err.line, 1);
}

/// Host that records every pause and answers with a fixed pause set.
struct PausingHost {
    inner: BufferHost,
    pause_on: BTreeSet<u32>,
    watches: Vec<String>,
    snapshots: Vec<BreakSnapshot>,
}

impl Host for PausingHost {
    fn write(&mut self, text: &str) -> Result<(), HostError> {
        self.inner.write(text)
    }

    fn read_line(&mut self) -> Result<String, HostError> {
        self.inner.read_line()
    }

    fn fs(&mut self) -> &mut MemoryFs {
        self.inner.fs()
    }

    fn should_pause(&mut self, line: u32) -> bool {
        self.pause_on.contains(&line)
    }

    fn pause(&mut self, snapshot: BreakSnapshot) -> Result<(), HostError> {
        self.snapshots.push(snapshot);
        Ok(())
    }

    fn watches(&self) -> Vec<String> {
        self.watches.clone()
    }
}

#[test]
fn breakpoint_captures_visible_variables_and_watches() {
    let mut program = Program::compile("x = 1\ny = x + 1\nprint(y)\n").unwrap();
    program.instrument(&InjectionPlan::Lines(BTreeSet::from([2])));

    let mut host = PausingHost {
        inner: BufferHost::new(),
        pause_on: BTreeSet::from([2]),
        watches: vec!["x * 10".into(), "missing".into()],
        snapshots: Vec::new(),
    };
    Interpreter::new(&mut host).run(program.body()).unwrap();

    assert_eq!(host.inner.output, "2\n");
    assert_eq!(host.snapshots.len(), 1);
    let snap = &host.snapshots[0];
    assert_eq!(snap.line, 2);
    assert_eq!(snap.variables.get("x").map(String::as_str), Some("1"));
    assert!(!snap.variables.contains_key("y"));
    assert!(!snap.variables.contains_key("print"));
    assert_eq!(snap.watches[0], ("x * 10".to_string(), "10".to_string()));
    assert!(snap.watches[1].1.starts_with("<error: NameError"));
}

#[test]
fn instrumented_but_inactive_lines_do_not_pause() {
    let mut program = Program::compile("a = 1\nb = 2\n").unwrap();
    program.instrument(&InjectionPlan::AllLines);
    let mut host = PausingHost {
        inner: BufferHost::new(),
        pause_on: BTreeSet::new(),
        watches: Vec::new(),
        snapshots: Vec::new(),
    };
    Interpreter::new(&mut host).run(program.body()).unwrap();
    assert!(host.snapshots.is_empty());
}

/// Host whose interrupt flag trips after a number of polls.
struct CountdownHost {
    inner: BufferHost,
    polls: std::cell::Cell<u32>,
}

impl Host for CountdownHost {
    fn write(&mut self, text: &str) -> Result<(), HostError> {
        self.inner.write(text)
    }

    fn read_line(&mut self) -> Result<String, HostError> {
        self.inner.read_line()
    }

    fn fs(&mut self) -> &mut MemoryFs {
        self.inner.fs()
    }

    fn interrupted(&self) -> bool {
        let n = self.polls.get();
        self.polls.set(n.saturating_sub(1));
        n == 0
    }
}

#[test]
fn infinite_loop_stops_on_interrupt() {
    let mut host = CountdownHost {
        inner: BufferHost::new(),
        polls: std::cell::Cell::new(50),
    };
    let result = Interpreter::new(&mut host).exec_source("while True:\n    pass\n");
    assert!(result.unwrap_err().is_interrupt());
}

#[test]
fn session_files_are_visible_after_run() {
    let (host, result) = run(
        "f = open('session/out.txt', 'a')\nf.write('x')\nf.close()\nf.write('y')\n",
        &[],
    );
    let Err(ExecError::Runtime(err)) = result else {
        panic!("expected closed-file error");
    };
    assert_eq!(err.message, "I/O operation on closed file.");
    assert_eq!(host.fs.read("session/out.txt"), Some("x"));
}
