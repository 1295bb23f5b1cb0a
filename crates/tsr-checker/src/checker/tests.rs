use tsr_common::DiagnosticCode;
use tsr_parser::Parser;

use crate::checker::Checker;

fn check_ok(source: &str) {
    let stmts = Parser::parse_source(source).expect("parse");
    if let Err(diags) = Checker::new(source).check_program(&stmts) {
        panic!("expected clean check, got: {diags:?}");
    }
}

fn check_err(source: &str) -> Vec<tsr_common::Diagnostic> {
    let stmts = Parser::parse_source(source).expect("parse");
    Checker::new(source)
        .check_program(&stmts)
        .err()
        .expect("expected diagnostics")
}

#[test]
fn literal_widening_on_let_but_not_const() {
    check_ok("let a = 1; a = 2;");
    check_ok("const b = \"x\"; const c: \"x\" = b;");
}

#[test]
fn incompatible_assignment_is_an_error() {
    let diags = check_err("let x: number = \"oops\";");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn undefined_variable_is_reported() {
    let diags = check_err("missing + 1;");
    assert_eq!(diags[0].code, DiagnosticCode::UndefinedVariable);
}

#[test]
fn const_reassignment_is_an_error() {
    let diags = check_err("const x = 1; x = 2;");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn union_assignability_distributes() {
    check_ok("let u: number | string = 1; u = \"s\";");
    let diags = check_err("let u: number | string = true;");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn never_is_bottom_unknown_is_top() {
    check_ok("function fail(): never { throw new Error(\"x\"); } let n: number = fail();");
    check_ok("let u: unknown = 42;");
    let diags = check_err("let u: unknown = 1; let n: number = u;");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn excess_property_check_on_fresh_literals() {
    let diags = check_err(
        "interface Point { x: number; y: number; }\nconst p: Point = { x: 1, y: 2, z: 3 };",
    );
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::ExcessProperty));
    // An index signature admits extra keys.
    check_ok(
        "interface Bag { [key: string]: number; }\nconst b: Bag = { x: 1, anything: 2 };",
    );
}

#[test]
fn structural_compatibility_ignores_declared_name() {
    check_ok(
        "interface Named { name: string; }\nclass Person { name: string = \"\"; }\nconst n: Named = new Person();",
    );
}

#[test]
fn function_arity_and_argument_types() {
    let diags = check_err("function f(x: number): number { return x; } f(1, 2, 3);");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::ArityMismatch));
    let diags = check_err("function f(x: number): number { return x; } f(\"s\");");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn callback_may_take_fewer_parameters() {
    check_ok(
        "function each(xs: number[], f: (x: number) => void): void { xs.forEach(f); }\neach([1], () => {});",
    );
}

#[test]
fn calling_a_non_callable_is_reported() {
    let diags = check_err("const n = 1; n();");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::NotCallable));
}

#[test]
fn typeof_narrowing_refines_branches() {
    check_ok(
        "function f(x: number | string): number {\n  if (typeof x === \"number\") { return x; }\n  return x.length;\n}",
    );
}

#[test]
fn truthiness_narrowing_strips_nullish() {
    check_ok(
        "function f(x: string | null): number {\n  if (x) { return x.length; }\n  return 0;\n}",
    );
}

#[test]
fn instanceof_narrowing() {
    check_ok(
        "class A { a: number = 1; }\nclass B { b: string = \"\"; }\nfunction f(x: A | B): number {\n  if (x instanceof A) { return x.a; }\n  return x.b.length;\n}",
    );
}

#[test]
fn in_narrowing_selects_members_with_key() {
    check_ok(
        "interface Cat { meow: string; }\ninterface Dog { bark: string; }\nfunction f(pet: Cat | Dog): string {\n  if (\"meow\" in pet) { return pet.meow; }\n  return pet.bark;\n}",
    );
}

#[test]
fn user_defined_predicate_narrows() {
    check_ok(
        "interface Fish { swim: string; }\ninterface Bird { fly: string; }\nfunction isFish(pet: Fish | Bird): pet is Fish { return \"swim\" in pet; }\nfunction f(pet: Fish | Bird): string {\n  if (isFish(pet)) { return pet.swim; }\n  return pet.fly;\n}",
    );
}

#[test]
fn generic_inference_from_call_site() {
    check_ok(
        "function identity<T>(x: T): T { return x; }\nconst n: number = identity(42);\nconst s: string = identity(\"s\");",
    );
}

#[test]
fn keyof_and_indexed_access() {
    check_ok(
        "interface P { x: number; y: number; }\ntype K = keyof P;\nconst k: K = \"x\";\ntype V = P[\"x\"];\nconst v: V = 1;",
    );
    let diags = check_err(
        "interface P { x: number; }\ntype K = keyof P;\nconst k: K = \"nope\";",
    );
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn mapped_types_expand() {
    check_ok(
        "type Flags = { [K in \"a\" | \"b\"]: boolean };\nconst f: Flags = { a: true, b: false };",
    );
    let diags = check_err(
        "type Flags = { [K in \"a\" | \"b\"]: boolean };\nconst f: Flags = { a: true };",
    );
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn conditional_types_select_branches() {
    check_ok(
        "type IsString<T> = T extends string ? \"yes\" : \"no\";\nconst a: IsString<string> = \"yes\";\nconst b: IsString<number> = \"no\";",
    );
}

#[test]
fn infer_positions_resolve_by_unification() {
    check_ok(
        "type ElementOf<T> = T extends (infer E)[] ? E : never;\nconst n: ElementOf<number[]> = 1;",
    );
}

#[test]
fn template_literal_types_match_greedily() {
    check_ok("type Greeting = `hello ${string}`;\nconst g: Greeting = \"hello world\";");
    let diags = check_err("type Greeting = `hello ${string}`;\nconst g: Greeting = \"bye world\";");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn numeric_enums_auto_increment() {
    check_ok(
        "enum Color { Red, Green = 5, Blue }\nconst r: 0 = Color.Red;\nconst b: 6 = Color.Blue;",
    );
}

#[test]
fn string_enum_members_require_initializers() {
    let diags = check_err("enum E { A = \"a\", B }");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::EnumError));
}

#[test]
fn const_enum_initializers_restricted_to_whitelist() {
    check_ok("const enum F { A = 1 << 2, B = A | 8 }");
    let diags = check_err("const enum F { A = Math.random() }");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::EnumError));
}

#[test]
fn forward_references_between_classes_resolve() {
    check_ok(
        "class A { partner(): B { return new B(); } }\nclass B { partner(): A { return new A(); } }",
    );
}

#[test]
fn abstract_classes_cannot_be_instantiated() {
    let diags = check_err("abstract class Base { abstract run(): void; }\nnew Base();");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::AbstractInstantiation));
}

#[test]
fn class_inheritance_is_assignable() {
    check_ok(
        "class Animal { name: string = \"\"; }\nclass Dog extends Animal { }\nconst a: Animal = new Dog();",
    );
}

#[test]
fn readonly_fields_reject_writes() {
    let diags = check_err(
        "class C { readonly x: number = 1; }\nconst c = new C();\nc.x = 2;",
    );
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::TypeError));
}

#[test]
fn unknown_property_on_known_shape() {
    let diags = check_err("interface P { x: number; }\nfunction f(p: P): void { p.missing; }");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::UnknownProperty));
}

#[test]
fn duplicate_declaration_in_scope() {
    let diags = check_err("let x = 1; let x = 2;");
    assert!(diags.iter().any(|d| d.code == DiagnosticCode::DuplicateIdentifier));
}

#[test]
fn set_algebra_surface_is_typed() {
    check_ok(
        "const a: Set<number> = new Set<number>();\nconst b: Set<number> = new Set<number>();\nconst u: Set<number> = a.union(b);\nconst ok: boolean = a.isSubsetOf(u);",
    );
}

#[test]
fn await_unwraps_promise() {
    check_ok(
        "async function f(): Promise<number> { return 1; }\nasync function g(): Promise<number> { const n: number = await f(); return n; }",
    );
}

#[test]
fn type_map_records_expressions() {
    let source = "const x = 1 + 2;";
    let stmts = Parser::parse_source(source).expect("parse");
    let checked = Checker::new(source).check_program(&stmts).expect("check");
    assert!(!checked.type_map.is_empty());
}
