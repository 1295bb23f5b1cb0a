use pretty_assertions::assert_eq;

use crate::ast::*;
use crate::parser::Parser;

fn parse(source: &str) -> Vec<Stmt> {
    Parser::parse_source(source).expect("program should parse")
}

fn parse_err(source: &str) -> tsr_common::Diagnostic {
    Parser::parse_source(source).expect_err("program should not parse")
}

#[test]
fn parses_variable_declarations() {
    let stmts = parse("let x: number = 1; const y = \"s\";");
    assert!(matches!(&stmts[0].kind, StmtKind::Var { name, .. } if name == "x"));
    assert!(matches!(&stmts[1].kind, StmtKind::Const { name, .. } if name == "y"));
}

#[test]
fn expression_precedence() {
    let stmts = parse("1 + 2 * 3;");
    let StmtKind::Expression(expr) = &stmts[0].kind else { panic!() };
    let ExprKind::Binary { op: BinaryOp::Add, right, .. } = &expr.kind else {
        panic!("expected + at the top");
    };
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn exponent_is_right_associative() {
    let stmts = parse("2 ** 3 ** 2;");
    let StmtKind::Expression(expr) = &stmts[0].kind else { panic!() };
    let ExprKind::Binary { op: BinaryOp::Pow, right, .. } = &expr.kind else { panic!() };
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Pow, .. }));
}

#[test]
fn destructured_parameters_are_desugared() {
    let stmts = parse("function f({a, b}: {a: number; b: number}) { return a + b; }");
    let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
    assert_eq!(func.params.len(), 1);
    assert!(func.params[0].name.starts_with("_param"));
    // Prologue binds a and b before the user body.
    let body = func.body.as_ref().unwrap();
    assert!(matches!(&body[0].kind, StmtKind::Var { name, .. } if name == "a"));
    assert!(matches!(&body[1].kind, StmtKind::Var { name, .. } if name == "b"));
}

#[test]
fn array_pattern_with_default_uses_undefined_check() {
    let stmts = parse("let [a = 1, b] = pair;");
    let StmtKind::Sequence(decls) = &stmts[0].kind else { panic!() };
    assert!(matches!(&decls[0].kind, StmtKind::Var { name, .. } if name.starts_with("_dest")));
    let StmtKind::Var { name, init: Some(init), .. } = &decls[1].kind else { panic!() };
    assert_eq!(name, "a");
    assert!(matches!(init.kind, ExprKind::Ternary { .. }));
}

#[test]
fn parameter_properties_generate_this_assignments() {
    let stmts = parse("class P { constructor(public x: number, private y: string) {} }");
    let StmtKind::Class(class) = &stmts[0].kind else { panic!() };
    let ClassMember::Method { func, .. } = &class.members[0] else { panic!() };
    let body = func.body.as_ref().unwrap();
    assert_eq!(body.len(), 2);
    for stmt in body {
        let StmtKind::Expression(expr) = &stmt.kind else { panic!() };
        assert!(matches!(expr.kind, ExprKind::Set { .. }));
    }
}

#[test]
fn use_strict_directive_marks_function() {
    let stmts = parse("function f() { \"use strict\"; return 1; }");
    let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
    assert!(func.is_strict);
}

#[test]
fn strictness_propagates_to_nested_functions() {
    let stmts = parse("\"use strict\"; function outer() { function inner() {} }");
    let StmtKind::Function(outer) = &stmts[1].kind else { panic!() };
    assert!(outer.is_strict);
    let body = outer.body.as_ref().unwrap();
    let StmtKind::Function(inner) = &body[0].kind else { panic!() };
    assert!(inner.is_strict);
}

#[test]
fn duplicate_parameters_rejected_in_strict_mode() {
    let err = parse_err("\"use strict\"; function f(a, a) {}");
    assert_eq!(err.code, tsr_common::DiagnosticCode::DuplicateParameter);
}

#[test]
fn duplicate_parameters_allowed_in_sloppy_mode() {
    parse("function f(a, a) {}");
}

#[test]
fn overload_signature_has_no_body() {
    let stmts = parse("function f(x: number): number;\nfunction f(x: any): any { return x; }");
    let StmtKind::Function(sig) = &stmts[0].kind else { panic!() };
    assert!(sig.body.is_none());
    let StmtKind::Function(imp) = &stmts[1].kind else { panic!() };
    assert!(imp.body.is_some());
}

#[test]
fn labels_resolve_and_validate() {
    parse("outer: for (let i = 0; i < 3; i = i + 1) { continue outer; }");
    let err = parse_err("for (let i = 0; i < 1; i = i + 1) { continue missing; }");
    assert_eq!(err.code, tsr_common::DiagnosticCode::InvalidLabel);
}

#[test]
fn continue_to_non_loop_label_is_rejected() {
    let err = parse_err("blk: { continue blk; }");
    assert_eq!(err.code, tsr_common::DiagnosticCode::InvalidLabel);
}

#[test]
fn template_literals_interleave_parts() {
    let stmts = parse("`a${x}b${y}c`;");
    let StmtKind::Expression(expr) = &stmts[0].kind else { panic!() };
    let ExprKind::TemplateLiteral { strings, exprs } = &expr.kind else { panic!() };
    assert_eq!(strings, &vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    assert_eq!(exprs.len(), 2);
}

#[test]
fn arrow_functions_parse_with_backtracking() {
    let stmts = parse("const f = (a: number, b: number) => a + b; const g = x => x; (1 + 2);");
    let StmtKind::Const { init, .. } = &stmts[0].kind else { panic!() };
    assert!(matches!(init.kind, ExprKind::ArrowFunction(_)));
    let StmtKind::Const { init, .. } = &stmts[1].kind else { panic!() };
    assert!(matches!(init.kind, ExprKind::ArrowFunction(_)));
    let StmtKind::Expression(expr) = &stmts[2].kind else { panic!() };
    assert!(matches!(expr.kind, ExprKind::Grouping(_)));
}

#[test]
fn for_await_of_sets_flag() {
    let stmts = parse("async function f(xs: any) { for await (const x of xs) {} }");
    let StmtKind::Function(func) = &stmts[0].kind else { panic!() };
    let body = func.body.as_ref().unwrap();
    let StmtKind::ForOf { is_await, .. } = &body[0].kind else { panic!() };
    assert!(is_await);
}

#[test]
fn using_declaration_parses() {
    let stmts = parse("{ using r = open(); }");
    let StmtKind::Block(body) = &stmts[0].kind else { panic!() };
    assert!(matches!(&body[0].kind, StmtKind::Using { name, .. } if name == "r"));
}

#[test]
fn using_as_identifier_still_works() {
    let stmts = parse("let using = 1; using + 1;");
    assert!(matches!(&stmts[0].kind, StmtKind::Var { name, .. } if name == "using"));
}

#[test]
fn computed_keys_in_object_literals() {
    let stmts = parse("const o = { [Symbol.dispose]() { return 1; }, x: 2 };");
    let StmtKind::Const { init, .. } = &stmts[0].kind else { panic!() };
    let ExprKind::ObjectLiteral(props) = &init.kind else { panic!() };
    assert!(matches!(&props[0], ObjectProp::Entry { key: PropKey::Computed(_), .. }));
    assert!(matches!(&props[1], ObjectProp::Entry { key: PropKey::Static(name), .. } if name == "x"));
}

#[test]
fn nested_generics_close_with_shift_tokens() {
    parse("let m: Map<string, Array<number>> = make();");
}

#[test]
fn enum_declarations() {
    let stmts = parse("enum Color { Red, Green = 5, Blue } const enum Flags { A = 1 }");
    let StmtKind::Enum(color) = &stmts[0].kind else { panic!() };
    assert_eq!(color.members.len(), 3);
    assert!(!color.is_const);
    let StmtKind::Enum(flags) = &stmts[1].kind else { panic!() };
    assert!(flags.is_const);
}

#[test]
fn class_accessors_and_statics() {
    let stmts = parse(
        "class C { static count = 0; get value(): number { return 1; } set value(v: number) {} static make(): C { return new C(); } }",
    );
    let StmtKind::Class(class) = &stmts[0].kind else { panic!() };
    assert!(matches!(&class.members[0], ClassMember::Field { is_static: true, .. }));
    assert!(matches!(&class.members[1], ClassMember::Getter { name, .. } if name == "value"));
    assert!(matches!(&class.members[2], ClassMember::Setter { name, .. } if name == "value"));
    assert!(matches!(&class.members[3], ClassMember::Method { is_static: true, .. }));
}

#[test]
fn switch_with_cases_and_default() {
    let stmts = parse("switch (x) { case 1: a(); break; case 2: b(); default: c(); }");
    let StmtKind::Switch { cases, .. } = &stmts[0].kind else { panic!() };
    assert_eq!(cases.len(), 3);
    assert!(cases[2].test.is_none());
}

#[test]
fn regex_literal_in_expression_position() {
    let stmts = parse("const re = /a+b/gi;");
    let StmtKind::Const { init, .. } = &stmts[0].kind else { panic!() };
    let ExprKind::RegexLiteral { pattern, flags } = &init.kind else { panic!() };
    assert_eq!(pattern, "a+b");
    assert_eq!(flags, "gi");
}

#[test]
fn import_and_export_forms() {
    let stmts = parse("import { a, b as c } from \"./m\"; export const x = 1;");
    let StmtKind::Import { specs, .. } = &stmts[0].kind else { panic!() };
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[1].alias.as_deref(), Some("c"));
    assert!(matches!(&stmts[1].kind, StmtKind::Export(_)));
}
