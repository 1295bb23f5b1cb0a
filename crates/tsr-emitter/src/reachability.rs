//! Reachability analysis.
//!
//! A statement list is scanned for positions after which control cannot
//! continue (return, throw, break, continue, or an `if` whose branches both
//! terminate). The lowering pass asks before emitting each statement and
//! omits dead ones.

use tsr_parser::ast::{Stmt, StmtKind};

/// Whether execution can continue past this statement.
pub fn completes_normally(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Break(_) | StmtKind::Continue(_) => {
            false
        }
        StmtKind::Block(stmts) | StmtKind::Sequence(stmts) => {
            stmts.iter().all(completes_normally)
        }
        StmtKind::If { then_branch, else_branch: Some(else_branch), .. } => {
            completes_normally(then_branch) || completes_normally(else_branch)
        }
        _ => true,
    }
}

/// The statements of a list that are reachable in order; everything after
/// the first terminating statement is dead.
pub fn reachable(stmts: &[Stmt]) -> &[Stmt] {
    for (i, stmt) in stmts.iter().enumerate() {
        if !completes_normally(stmt) {
            return &stmts[..=i];
        }
    }
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsr_parser::Parser;

    #[test]
    fn code_after_return_is_dead() {
        let stmts = Parser::parse_source("function f() { return 1; console.log(2); }").unwrap();
        let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
        let body = func.body.as_ref().unwrap();
        assert_eq!(reachable(body).len(), 1);
    }

    #[test]
    fn if_with_one_open_branch_keeps_the_tail() {
        let stmts =
            Parser::parse_source("function f(x: number) { if (x) { return 1; } console.log(2); }")
                .unwrap();
        let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
        let body = func.body.as_ref().unwrap();
        assert_eq!(reachable(body).len(), 2);
    }

    #[test]
    fn if_with_both_branches_closed_terminates() {
        let stmts = Parser::parse_source(
            "function f(x: number) { if (x) { return 1; } else { return 2; } console.log(3); }",
        )
        .unwrap();
        let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
        let body = func.body.as_ref().unwrap();
        assert_eq!(reachable(body).len(), 1);
    }
}
