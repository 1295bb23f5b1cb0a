use std::rc::Rc;

use pretty_assertions::assert_eq;

use tsr_checker::Checker;
use tsr_parser::Parser;
use tsr_runtime::error::{error_message, error_name};
use tsr_runtime::{Output, Value};

use crate::{Compiler, Module, Op, Vm};

fn compile(source: &str) -> Module {
    let stmts = Parser::parse_source(source).expect("program should parse");
    let checked = Checker::new(source)
        .check_program(&stmts)
        .expect("program should type-check");
    Compiler::new(Some(&checked))
        .compile_program(&stmts)
        .expect("program should lower")
}

fn run_compiled(source: &str) -> Result<String, Value> {
    // Round-trip the container so the serialized form is what executes.
    let bytes = compile(source).to_bytes().expect("serialize");
    let module = Module::from_bytes(&bytes).expect("deserialize");
    let output = Rc::new(Output::capture());
    let vm = Vm::new(Rc::clone(&output));
    vm.run_module(module)?;
    Ok(output.captured())
}

fn run_ok(source: &str) -> String {
    match run_compiled(source) {
        Ok(out) => out,
        Err(error) => panic!(
            "uncaught {}: {}",
            error_name(&error).unwrap_or_else(|| "value".into()),
            error_message(&error).unwrap_or_default()
        ),
    }
}

#[test]
fn arithmetic_and_output() {
    assert_eq!(run_ok("console.log(1 + 2 * 3);"), "7\n");
    assert_eq!(run_ok("console.log(2 ** 10, 10 % 3);"), "1024 1\n");
}

#[test]
fn numeric_specialization_matches_generic_semantics() {
    // Both operands statically numbers: the fast path must agree with the
    // generic one, NaN and -0 included.
    assert_eq!(run_ok("const a = 0; const b = -1; console.log(a * b);"), "0\n");
    assert_eq!(run_ok("const x = 1; console.log(x / 0);"), "Infinity\n");
}

#[test]
fn string_concat_chains_flatten() {
    let module = compile("const s = \"a\" + 1 + \"b\" + 2; console.log(s);");
    let concat_count = module
        .main
        .ops
        .iter()
        .filter(|op| matches!(op, Op::Concat(_)))
        .count();
    assert_eq!(concat_count, 1, "one variadic concat for the whole chain");
    assert_eq!(run_ok("const s = \"a\" + 1 + \"b\" + 2; console.log(s);"), "a1b2\n");
}

#[test]
fn closures_share_cells() {
    let out = run_ok(
        "function counter(): () => number { let n = 0; return () => { n = n + 1; return n; }; }\nconst c = counter();\nc(); c();\nconsole.log(c());",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn loops_and_labeled_break() {
    let out = run_ok(
        r#"
outer: for (let i = 0; i < 3; i = i + 1) {
  for (let j = 0; j < 3; j = j + 1) {
    if (j === 1 && i === 0) { continue outer; }
    if (i === 2) { break outer; }
    console.log(i * 10 + j);
  }
}
"#,
    );
    assert_eq!(out, "0\n10\n11\n12\n");
}

#[test]
fn compound_assignment_evaluates_receiver_once() {
    let out = run_ok(
        r#"
let hits = 0;
const box = [{n: 1}];
function target(): {n: number}[] { hits = hits + 1; return box; }
target()[0].n += 5;
console.log(box[0].n, hits);
"#,
    );
    assert_eq!(out, "6 1\n");
}

#[test]
fn try_catch_finally_all_paths() {
    let out = run_ok(
        r#"
function f(mode: number): string {
  try {
    if (mode === 0) { return "ret"; }
    if (mode === 1) { throw new Error("thrown"); }
    return "fall";
  } catch (e) {
    return "caught";
  } finally {
    console.log("finally " + mode);
  }
}
console.log(f(0));
console.log(f(1));
console.log(f(2));
"#,
    );
    assert_eq!(out, "finally 0\nret\nfinally 1\ncaught\nfinally 2\nfall\n");
}

#[test]
fn classes_fields_methods_and_super() {
    let out = run_ok(
        r#"
class Animal {
  name: string = "?";
  constructor(name: string) { this.name = name; }
  speak(): string { return this.name + " makes a sound"; }
}
class Dog extends Animal {
  constructor(name: string) { super(name); }
  speak(): string { return super.speak() + " (woof)"; }
}
const d = new Dog("Rex");
console.log(d.speak());
"#,
    );
    assert_eq!(out, "Rex makes a sound (woof)\n");
}

#[test]
fn getters_setters_and_statics() {
    let out = run_ok(
        r#"
class Box {
  value: number = 0;
  static made = 0;
  get contents(): number { return this.value; }
  set contents(v: number) { this.value = v * 2; }
  static make(): Box { Box.made = Box.made + 1; return new Box(); }
}
const b = Box.make();
b.contents = 21;
console.log(b.contents, Box.made);
"#,
    );
    assert_eq!(out, "42 1\n");
}

#[test]
fn field_initializer_scratch_does_not_clobber_constructor_params() {
    // The synthesized field prologue runs before the declared constructor
    // body in one spliced unit; its scratch locals sit above the body's
    // parameter slots, so `owner` arrives intact even when initializers
    // use compound assignment or increments.
    let out = run_ok(
        r#"
class Account {
  owner: string;
  balance: number = 0;
  bumped: number = (this.balance += 100);
  serial: number = this.balance++;
  constructor(owner: string) { this.owner = owner; }
}
const a = new Account("ada");
console.log(a.owner, a.balance, a.bumped, a.serial);
"#,
    );
    assert_eq!(out, "ada 101 100 100\n");
}

#[test]
fn generators_run_as_coroutines() {
    let out = run_ok(
        r#"
function* nums(): Generator<number> { yield 1; yield 2; yield 3; }
for (const n of nums()) { console.log(n); }
"#,
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn async_await_through_the_state_machine() {
    let out = run_ok(
        r#"
async function inner(): Promise<number> { return 5; }
async function main() {
  console.log("before");
  const v = await inner();
  console.log("after " + v);
}
main();
console.log("sync");
"#,
    );
    assert_eq!(out, "before\nsync\nafter 5\n");
}

#[test]
fn using_disposes_lifo_on_scope_exit() {
    let out = run_ok(
        r#"
let order: string[] = [];
{
  using a = {[Symbol.dispose]() { order.push("a"); }};
  using b = {[Symbol.dispose]() { order.push("b"); }};
  using c = {[Symbol.dispose]() { order.push("c"); }};
}
console.log(order.join(", "));
"#,
    );
    assert_eq!(out, "c, b, a\n");
}

#[test]
fn frozen_writes_follow_strict_mode() {
    let out = run_ok("const o = Object.freeze({x:1}); o.x = 2; console.log(o.x);");
    assert_eq!(out, "1\n");
    let error =
        run_compiled("\"use strict\"; const o = Object.freeze({x:1}); o.x = 2;").unwrap_err();
    assert_eq!(error_name(&error).as_deref(), Some("TypeError"));
    assert!(
        error_message(&error)
            .unwrap()
            .contains("Cannot assign to read only property")
    );
}

#[test]
fn const_enums_inline_at_use_sites() {
    let source = "const enum Flag { A = 1, B = 2 }\nconsole.log(Flag.A + Flag.B);";
    let module = compile(source);
    // The enum object was eliminated: no class/object construction, the
    // member accesses became number pushes.
    assert!(module.main.ops.iter().any(|op| matches!(op, Op::Number(n) if *n == 1.0)));
    assert!(module.main.ops.iter().any(|op| matches!(op, Op::Number(n) if *n == 2.0)));
    assert!(!module.main.ops.iter().any(|op| matches!(op, Op::GetProp(_))));
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn dead_code_is_omitted() {
    let source = "function f(): number { return 1; console.log(\"never\"); }\nconsole.log(f());";
    let module = compile(source);
    // The unreachable log call never made it into the function body.
    fn has_call_method(ops: &[Op]) -> bool {
        ops.iter().any(|op| matches!(op, Op::CallMethod { .. }))
    }
    let function_bodies: Vec<&crate::code::FnProto> = module
        .main
        .constants
        .iter()
        .filter_map(|c| match c {
            crate::code::Constant::Function(p) => Some(p.as_ref()),
            _ => None,
        })
        .collect();
    assert!(function_bodies.iter().all(|p| !has_call_method(&p.code.ops)));
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn switch_falls_through() {
    let out = run_ok(
        r#"
function pick(n: number): void {
  switch (n) {
    case 1:
      console.log("one");
    case 2:
      console.log("two");
      break;
    default:
      console.log("other");
  }
}
pick(1);
pick(9);
"#,
    );
    assert_eq!(out, "one\ntwo\nother\n");
}

#[test]
fn set_algebra_matches_interpreter() {
    let out = run_ok(
        r#"
let a = new Set([1, 2, 3]);
let b = new Set([3, 4, 5]);
console.log(a.union(b).size, a.intersection(b).size);
"#,
    );
    assert_eq!(out, "5 1\n");
}

#[test]
fn spread_and_rest_parameters() {
    let out = run_ok(
        r#"
function sum(...nums: number[]): number {
  let total = 0;
  for (const n of nums) { total = total + n; }
  return total;
}
const parts = [1, 2, 3];
console.log(sum(...parts, 4));
"#,
    );
    assert_eq!(out, "10\n");
}

#[test]
fn runtime_errors_carry_lines() {
    let error = run_compiled("const a = 1;\nnull.x;").unwrap_err();
    let Value::Object(obj) = &error else { panic!("expected error object") };
    let line = obj.props.borrow().get("line").cloned();
    assert_eq!(line.and_then(|v| v.as_number()), Some(2.0));
}
