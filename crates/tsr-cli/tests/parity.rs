//! The parity invariant: for every program in the accepted subset,
//! interpreting and compiling-then-running produce identical output
//! streams.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use tsr_checker::Checker;
use tsr_emitter::{Compiler, Module, Vm};
use tsr_interpreter::Interpreter;
use tsr_parser::Parser;
use tsr_runtime::Output;

fn interpret(source: &str) -> String {
    let stmts = Rc::new(Parser::parse_source(source).expect("parse"));
    let output = Rc::new(Output::capture());
    let interp = Interpreter::new(Rc::clone(&output));
    interp.run_program(stmts).expect("interpret");
    output.captured()
}

fn compile_and_run(source: &str) -> String {
    let stmts = Parser::parse_source(source).expect("parse");
    let checked = Checker::new(source).check_program(&stmts).expect("check");
    let module = Compiler::new(Some(&checked))
        .compile_program(&stmts)
        .expect("lower");
    let bytes = module.to_bytes().expect("serialize");
    let module = Module::from_bytes(&bytes).expect("deserialize");
    let output = Rc::new(Output::capture());
    let vm = Vm::new(Rc::clone(&output));
    vm.run_module(module).expect("execute");
    output.captured()
}

fn assert_parity(source: &str) {
    let interpreted = interpret(source);
    let compiled = compile_and_run(source);
    assert_eq!(interpreted, compiled, "backends disagree for:\n{source}");
}

#[test]
fn parity_arithmetic() {
    assert_parity("console.log(1 + 2 * 3, 7 % 4, 2 ** 8, 10 / 4);");
    assert_parity("console.log(5 & 3, 5 | 3, 5 ^ 3, 1 << 4, -16 >> 2, -1 >>> 28);");
    assert_parity("console.log(1 / 0, -1 / 0, 0 * -1);");
}

#[test]
fn parity_strings_and_templates() {
    assert_parity("const n = 6; console.log(`${n} * 7 = ${n * 7}`);");
    assert_parity("console.log(\"a\" + 1 + \"b\" + true + null + undefined);");
}

#[test]
fn parity_control_flow() {
    assert_parity(
        "let total = 0;\nfor (let i = 0; i < 10; i = i + 1) { if (i % 2 === 0) { continue; } total = total + i; }\nconsole.log(total);",
    );
    assert_parity(
        "let i = 0;\nwhile (true) { i = i + 1; if (i > 4) { break; } }\nconsole.log(i);",
    );
    assert_parity(
        "let n = 0;\ndo { n = n + 1; } while (n < 3);\nconsole.log(n);",
    );
}

#[test]
fn parity_functions_and_closures() {
    assert_parity(
        "function make(start: number): () => number {\n  let n = start;\n  return () => { n = n + 1; return n; };\n}\nconst a = make(10);\nconst b = make(100);\na();\nconsole.log(a(), b());",
    );
    assert_parity(
        "function greet(name: string = \"world\"): string { return \"hi \" + name; }\nconsole.log(greet(), greet(\"tsr\"));",
    );
}

#[test]
fn parity_objects_and_arrays() {
    assert_parity(
        "const o = {b: 1, a: 2};\nfor (const k in o) { console.log(k, o[k]); }",
    );
    assert_parity(
        "const xs = [3, 1, 2];\nconsole.log(xs.map((x: number) => x * 2).join(\",\"));\nconsole.log(xs.filter((x: number) => x > 1).length);",
    );
    assert_parity("const obj = {k1: \"v1\", k2: \"v2\"};\nconsole.log(obj.k1, obj.k2);");
}

#[test]
fn parity_classes() {
    assert_parity(
        r#"
class Shape {
  name: string;
  constructor(name: string) { this.name = name; }
  describe(): string { return "a " + this.name; }
}
class Circle extends Shape {
  constructor() { super("circle"); }
  describe(): string { return super.describe() + " (round)"; }
}
console.log(new Circle().describe());
"#,
    );
}

#[test]
fn parity_field_initializers_with_constructor_params() {
    // Compound-assignment and increment initializers need scratch slots in
    // compiled constructors; the constructor arguments must survive them.
    assert_parity(
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
}

#[test]
fn parity_generators() {
    assert_parity(
        "function* nums(): Generator<number> { yield 1; yield 2; yield 3; }\nfor (const n of nums()) { console.log(n); }",
    );
}

#[test]
fn parity_async() {
    assert_parity(
        r#"
async function inner(): Promise<number> { return 41; }
async function main() {
  const v = await inner();
  console.log(v + 1);
}
main();
console.log("first");
"#,
    );
}

#[test]
fn parity_for_await_over_promises() {
    assert_parity(
        r#"
async function main() {
  for await (const v of [Promise.resolve(1), Promise.resolve(2)]) {
    console.log(v);
  }
}
main();
"#,
    );
}

#[test]
fn parity_using_disposal() {
    assert_parity(
        r#"
let order: string[] = [];
{
  using a = {[Symbol.dispose]() { order.push("a"); }};
  using b = {[Symbol.dispose]() { order.push("b"); }};
}
console.log(order.join(", "));
"#,
    );
}

#[test]
fn parity_try_finally() {
    assert_parity(
        r#"
function f(mode: number): string {
  try {
    if (mode === 0) { return "ret"; }
    throw new Error("x");
  } catch (e) {
    return "caught";
  } finally {
    console.log("cleanup");
  }
}
console.log(f(0), f(1));
"#,
    );
}

#[test]
fn parity_enums() {
    assert_parity(
        "enum Color { Red, Green = 5, Blue }\nconsole.log(Color.Red, Color.Green, Color.Blue, Color[5]);",
    );
    assert_parity("const enum Flag { A = 1 << 1, B = A | 1 }\nconsole.log(Flag.A, Flag.B);");
}

#[test]
fn parity_sets_and_maps() {
    assert_parity(
        "let a = new Set([1, 2, 3]);\nlet b = new Set([3, 4]);\nconsole.log(a.union(b).size, a.intersection(b).size, a.isDisjointFrom(new Set([9])));",
    );
    assert_parity(
        "const m = new Map([[\"a\", 1], [\"b\", 2]]);\nconsole.log(m.get(\"a\"), m.size, m.has(\"c\"));",
    );
}

#[test]
fn parity_integer_expression_seeds() {
    // Property seed: integer arithmetic over the full operator set agrees
    // between the backends.
    let expressions = [
        "7 + 3 * 2",
        "(8 - 3) * (2 + 1)",
        "17 % 5 + 2 ** 3",
        "255 & 60 | 3 ^ 12",
        "1 << 10 >> 2",
        "-8 >>> 29",
        "6 / 3 - 4",
    ];
    for expr in expressions {
        assert_parity(&format!("console.log({expr});"));
    }
}
