//! Breakpoint injection.
//!
//! Walks the statement tree breadth first, in document order within each
//! depth, and splices a [`StmtKind::Breakpoint`] in front of the first
//! (shallowest) statement found for each requested line. A line is
//! instrumented at most once. Lines that never start a statement, such
//! as continuation lines of a bracketed expression, are dropped and
//! reported back.

use std::collections::{BTreeSet, VecDeque};

use crate::ast::{Stmt, StmtKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionPlan {
    /// Instrument every statement line; the host decides at run time
    /// which ones pause.
    AllLines,
    /// Instrument exactly these lines.
    Lines(BTreeSet<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InjectionReport {
    pub injected: BTreeSet<u32>,
    pub dropped: BTreeSet<u32>,
}

struct BlockInfo {
    stmts: Vec<(u32, Vec<usize>)>,
}

fn number_blocks(block: &[Stmt], out: &mut Vec<BlockInfo>) -> usize {
    let id = out.len();
    out.push(BlockInfo { stmts: Vec::new() });
    let mut stmts = Vec::with_capacity(block.len());
    for stmt in block {
        let children = stmt
            .blocks()
            .into_iter()
            .map(|child| number_blocks(child, out))
            .collect();
        stmts.push((stmt.line, children));
    }
    out[id].stmts = stmts;
    id
}

fn collect_lines(block: &[Stmt], out: &mut BTreeSet<u32>) {
    for stmt in block {
        out.insert(stmt.line);
        for child in stmt.blocks() {
            collect_lines(child, out);
        }
    }
}

fn apply(block: &mut Vec<Stmt>, counter: &mut usize, marks: &BTreeSet<(usize, usize)>) {
    let id = *counter;
    *counter += 1;
    for stmt in block.iter_mut() {
        for child in stmt.blocks_mut() {
            apply(child, counter, marks);
        }
    }
    if !marks.iter().any(|(b, _)| *b == id) {
        return;
    }
    let old = std::mem::take(block);
    for (idx, stmt) in old.into_iter().enumerate() {
        if marks.contains(&(id, idx)) {
            block.push(Stmt::new(stmt.line, StmtKind::Breakpoint(stmt.line)));
        }
        block.push(stmt);
    }
}

/// Inject breakpoint statements into `program` in place.
pub fn instrument(program: &mut Vec<Stmt>, plan: &InjectionPlan) -> InjectionReport {
    let mut pending = match plan {
        InjectionPlan::Lines(lines) => lines.clone(),
        InjectionPlan::AllLines => {
            let mut lines = BTreeSet::new();
            collect_lines(program, &mut lines);
            lines
        }
    };

    let mut blocks = Vec::new();
    number_blocks(program, &mut blocks);

    let mut marks = BTreeSet::new();
    let mut injected = BTreeSet::new();
    let mut queue = VecDeque::from([0usize]);
    while let Some(id) = queue.pop_front() {
        if pending.is_empty() {
            break;
        }
        for (idx, (line, children)) in blocks[id].stmts.iter().enumerate() {
            if pending.remove(line) {
                marks.insert((id, idx));
                injected.insert(*line);
            }
            queue.extend(children.iter().copied());
        }
    }

    let mut counter = 0;
    apply(program, &mut counter, &marks);
    tracing::trace!(
        target: "sponge.lang",
        injected = injected.len(),
        dropped = pending.len(),
        "breakpoints injected"
    );
    InjectionReport {
        injected,
        dropped: pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn breakpoint_lines(block: &[Stmt], out: &mut Vec<u32>) {
        for stmt in block {
            if let StmtKind::Breakpoint(line) = stmt.kind {
                out.push(line);
            }
            for child in stmt.blocks() {
                breakpoint_lines(child, out);
            }
        }
    }

    #[test]
    fn injects_before_requested_statement() {
        let mut prog = parse("x=1\ny=2\nz=3\n").unwrap();
        let report = instrument(&mut prog, &InjectionPlan::Lines(BTreeSet::from([2])));
        assert_eq!(report.injected, BTreeSet::from([2]));
        assert_eq!(prog.len(), 4);
        assert_eq!(prog[1].kind, StmtKind::Breakpoint(2));
        assert_eq!(prog[2].line, 2);
    }

    #[test]
    fn nested_lines_are_reached_and_orelse_walked() {
        let src = "if a:\n    b = 1\nelse:\n    c = 2\nwhile x:\n    y = 3\n";
        let mut prog = parse(src).unwrap();
        let report = instrument(&mut prog, &InjectionPlan::Lines(BTreeSet::from([2, 4, 6])));
        assert_eq!(report.injected, BTreeSet::from([2, 4, 6]));
        let mut found = Vec::new();
        breakpoint_lines(&prog, &mut found);
        found.sort_unstable();
        assert_eq!(found, vec![2, 4, 6]);
    }

    #[test]
    fn shallowest_statement_wins_on_shared_line() {
        let mut prog = parse("if a: b = 1\n").unwrap();
        instrument(&mut prog, &InjectionPlan::Lines(BTreeSet::from([1])));
        assert_eq!(prog[0].kind, StmtKind::Breakpoint(1));
        let StmtKind::If { body, .. } = &prog[1].kind else {
            panic!("expected if");
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn continuation_lines_are_dropped() {
        let mut prog = parse("x = [1,\n     2]\ny = 3\n").unwrap();
        let report = instrument(&mut prog, &InjectionPlan::Lines(BTreeSet::from([2, 3, 9])));
        assert_eq!(report.injected, BTreeSet::from([3]));
        assert_eq!(report.dropped, BTreeSet::from([2, 9]));
    }

    #[test]
    fn all_lines_covers_every_statement_once() {
        let mut prog = parse("def f():\n    return 1\nf()\n").unwrap();
        let report = instrument(&mut prog, &InjectionPlan::AllLines);
        assert_eq!(report.injected, BTreeSet::from([1, 2, 3]));
        let mut found = Vec::new();
        breakpoint_lines(&prog, &mut found);
        assert_eq!(found.len(), 3);
    }
}
