#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sponge_lang::instrument::{InjectionPlan, instrument};
use sponge_lang::parser::parse;

#[derive(Debug, Arbitrary)]
enum Line {
    Assign(u8),
    Print(u8),
    If,
    While,
    Def,
    Pass,
    OpenList,
    CloseList,
}

#[derive(Debug, Arbitrary)]
struct Input {
    lines: Vec<(u8, Line)>,
    breakpoints: Vec<u8>,
}

fn render(lines: &[(u8, Line)]) -> String {
    let mut out = String::new();
    for (indent, line) in lines.iter().take(64) {
        out.push_str(&"    ".repeat(usize::from(indent % 4)));
        let text = match line {
            Line::Assign(v) => format!("x{} = {v}", v % 4),
            Line::Print(v) => format!("print(x{})", v % 4),
            Line::If => "if x0 > 1:".to_string(),
            Line::While => "while x1 < 0:".to_string(),
            Line::Def => "def f(a):".to_string(),
            Line::Pass => "pass".to_string(),
            Line::OpenList => "y = [1,".to_string(),
            Line::CloseList => "2]".to_string(),
        };
        out.push_str(&text);
        out.push('\n');
    }
    out
}

fuzz_target!(|input: Input| {
    let source = render(&input.lines);
    let Ok(program) = parse(&source) else {
        return;
    };
    let requested: BTreeSet<u32> = input
        .breakpoints
        .iter()
        .take(16)
        .map(|b| u32::from(*b % 70) + 1)
        .collect();

    let mut first = program.clone();
    let report = instrument(&mut first, &InjectionPlan::Lines(requested.clone()));

    // Every requested line is either injected or dropped, never both.
    assert!(report.injected.is_disjoint(&report.dropped));
    let accounted: BTreeSet<u32> = report.injected.union(&report.dropped).copied().collect();
    assert_eq!(accounted, requested);

    // Injection is deterministic.
    let mut second = program;
    let again = instrument(&mut second, &InjectionPlan::Lines(requested));
    assert_eq!(report, again);
    assert_eq!(first, second);
});
