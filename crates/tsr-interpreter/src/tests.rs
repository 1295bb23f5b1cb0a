use std::rc::Rc;

use pretty_assertions::assert_eq;

use tsr_parser::Parser;
use tsr_runtime::error::{error_message, error_name};
use tsr_runtime::{Output, Value};

use crate::Interpreter;

fn run(source: &str) -> Result<String, Value> {
    let stmts = Rc::new(Parser::parse_source(source).expect("program should parse"));
    let output = Rc::new(Output::capture());
    let interp = Interpreter::new(Rc::clone(&output));
    interp.run_program(stmts)?;
    Ok(output.captured())
}

fn run_ok(source: &str) -> String {
    match run(source) {
        Ok(out) => out,
        Err(error) => panic!(
            "uncaught {}: {}",
            error_name(&error).unwrap_or_else(|| "value".into()),
            error_message(&error).unwrap_or_default()
        ),
    }
}

#[test]
fn arithmetic_and_logging() {
    assert_eq!(run_ok("console.log(1 + 2 * 3);"), "7\n");
    assert_eq!(run_ok("console.log(\"a\" + 1);"), "a1\n");
    assert_eq!(run_ok("console.log(10 % 3, 2 ** 10);"), "1 1024\n");
}

#[test]
fn truthiness_and_equality() {
    assert_eq!(run_ok("console.log(null == undefined, null === undefined);"), "true false\n");
    assert_eq!(run_ok("console.log(0 ? \"t\" : \"f\", NaN ? 1 : 2);"), "f 2\n");
    assert_eq!(run_ok("console.log(\"\" || \"fallback\", 0 ?? 42);"), "fallback 0\n");
}

#[test]
fn closures_capture_by_reference() {
    let out = run_ok(
        "function counter() { let n = 0; return () => { n = n + 1; return n; }; }\nconst c = counter();\nc(); c();\nconsole.log(c());",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn classes_inheritance_and_super() {
    let out = run_ok(
        r#"
class Animal {
  name: string;
  constructor(name: string) { this.name = name; }
  speak(): string { return this.name + " makes a sound"; }
}
class Dog extends Animal {
  speak(): string { return super.speak() + " (woof)"; }
}
const d = new Dog("Rex");
console.log(d.speak());
"#,
    );
    assert_eq!(out, "Rex makes a sound (woof)\n");
}

#[test]
fn getters_and_setters() {
    let out = run_ok(
        r#"
class Box {
  private value: number = 0;
  get contents(): number { return this.value; }
  set contents(v: number) { this.value = v * 2; }
}
const b = new Box();
b.contents = 21;
console.log(b.contents);
"#,
    );
    assert_eq!(out, "42\n");
}

#[test]
fn static_members_and_blocks() {
    let out = run_ok(
        r#"
class Config {
  static count = 1;
  static { Config.count = Config.count + 41; }
}
console.log(Config.count);
"#,
    );
    assert_eq!(out, "42\n");
}

#[test]
fn frozen_object_write_is_silent_without_strict() {
    let out = run_ok("const o = Object.freeze({x:1}); o.x = 2; console.log(o.x);");
    assert_eq!(out, "1\n");
}

#[test]
fn frozen_object_write_throws_in_strict_mode() {
    let error = run("\"use strict\"; const o = Object.freeze({x:1}); o.x = 2;").unwrap_err();
    assert_eq!(error_name(&error).as_deref(), Some("TypeError"));
    assert!(
        error_message(&error)
            .unwrap()
            .contains("Cannot assign to read only property")
    );
}

#[test]
fn using_disposes_in_lifo_order() {
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
fn using_disposes_on_return_path() {
    let out = run_ok(
        r#"
let disposed = false;
function work(): number {
  using r = {[Symbol.dispose]() { disposed = true; }};
  return 42;
}
const result = work();
console.log("result: " + result);
console.log("disposed: " + disposed);
"#,
    );
    assert_eq!(out, "result: 42\ndisposed: true\n");
}

#[test]
fn using_skips_null_initializers() {
    let out = run_ok(
        r#"
{
  using nothing = null;
}
console.log("ok");
"#,
    );
    assert_eq!(out, "ok\n");
}

#[test]
fn set_algebra() {
    let out = run_ok(
        r#"
let a = new Set([1, 2, 3]);
let b = new Set([3, 4, 5]);
let u = a.union(b);
console.log(u.size);
let i = a.intersection(b);
console.log(i.size);
console.log(i.isSubsetOf(a), a.isDisjointFrom(new Set([9])));
"#,
    );
    assert_eq!(out, "5\n1\ntrue true\n");
}

#[test]
fn generators_yield_in_sequence() {
    let out = run_ok(
        r#"
function* nums() { yield 1; yield 2; yield 3; return 99; }
for (const n of nums()) { console.log(n); }
"#,
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn generator_next_and_done_protocol() {
    let out = run_ok(
        r#"
function* g() { const got = yield 1; yield got + 1; }
const it = g();
console.log(it.next().value);
console.log(it.next(41).value);
console.log(it.next().done);
console.log(it.next().done);
"#,
    );
    assert_eq!(out, "1\n42\ntrue\ntrue\n");
}

#[test]
fn for_await_over_sync_iterable_of_promises() {
    let out = run_ok(
        r#"
async function main() {
  for await (const v of [Promise.resolve(1), Promise.resolve(2)]) {
    console.log(v);
  }
}
main();
"#,
    );
    assert_eq!(out, "1\n2\n");
}

#[test]
fn for_await_passes_plain_values_through() {
    let out = run_ok(
        r#"
async function main() {
  for await (const v of [Promise.resolve(1), 2, Promise.resolve(3)]) {
    console.log(v);
  }
}
main();
"#,
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn async_await_and_microtask_ordering() {
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
fn promise_then_callbacks_fire_in_registration_order() {
    let out = run_ok(
        r#"
const p = Promise.resolve("x");
p.then((v: string) => console.log("first " + v));
p.then((v: string) => console.log("second " + v));
console.log("registered");
"#,
    );
    assert_eq!(out, "registered\nfirst x\nsecond x\n");
}

#[test]
fn rejected_promise_surfaces_in_catch_at_await() {
    let out = run_ok(
        r#"
async function fails() { throw new Error("boom"); }
async function main() {
  try {
    await fails();
  } catch (e) {
    console.log("caught " + e.message);
  }
}
main();
"#,
    );
    assert_eq!(out, "caught boom\n");
}

#[test]
fn try_finally_runs_on_every_exit_path() {
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
fn labeled_break_and_continue() {
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
fn switch_falls_through_until_break() {
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
pick(2);
pick(9);
"#,
    );
    assert_eq!(out, "one\ntwo\ntwo\nother\n");
}

#[test]
fn for_in_enumerates_string_keys_in_insertion_order() {
    let out = run_ok(
        r#"
const o = {b: 1, a: 2, c: 3};
for (const k in o) { console.log(k); }
"#,
    );
    assert_eq!(out, "b\na\nc\n");
}

#[test]
fn record_literal_reads_back_each_key() {
    let out = run_ok(
        r#"
const obj = {k1: "v1", k2: "v2", k3: "v3"};
console.log(obj.k1, obj.k2, obj.k3);
"#,
    );
    assert_eq!(out, "v1 v2 v3\n");
}

#[test]
fn destructured_parameters_bind() {
    let out = run_ok(
        r#"
function dist({x, y}: {x: number; y: number}): number {
  return Math.abs(x) + Math.abs(y);
}
console.log(dist({x: -3, y: 4}));
"#,
    );
    assert_eq!(out, "7\n");
}

#[test]
fn rest_and_spread() {
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
fn default_parameters_apply_on_undefined() {
    let out = run_ok(
        "function greet(name: string = \"world\"): string { return \"hi \" + name; }\nconsole.log(greet());\nconsole.log(greet(\"tsr\"));",
    );
    assert_eq!(out, "hi world\nhi tsr\n");
}

#[test]
fn enum_objects_and_reverse_mapping() {
    let out = run_ok(
        r#"
enum Color { Red, Green = 5, Blue }
console.log(Color.Red, Color.Green, Color.Blue);
console.log(Color[5]);
"#,
    );
    assert_eq!(out, "0 5 6\nGreen\n");
}

#[test]
fn template_literals_interpolate() {
    let out = run_ok("const n = 6; console.log(`${n} * 7 = ${n * 7}`);");
    assert_eq!(out, "6 * 7 = 42\n");
}

#[test]
fn bigint_arithmetic() {
    let out = run_ok("console.log(2n ** 64n);");
    assert_eq!(out, "18446744073709551616\n");
    let error = run("const x = 1n + 1;").unwrap_err();
    assert_eq!(error_name(&error).as_deref(), Some("TypeError"));
}

#[test]
fn runtime_errors_carry_line_numbers() {
    let error = run("const a = 1;\nconst b = 2;\nnull.x;").unwrap_err();
    let Value::Object(obj) = &error else { panic!("expected error object") };
    let line = obj.props.borrow().get("line").cloned();
    assert_eq!(line.and_then(|v| v.as_number()), Some(3.0));
}

#[test]
fn json_round_trip() {
    let out = run_ok(
        r#"
const data = {name: "tsr", tags: ["a", "b"], nested: {n: 1}};
const text = JSON.stringify(data);
const back = JSON.parse(text);
console.log(back.name, back.tags[1], back.nested.n);
console.log(JSON.stringify(JSON.parse(text)) === text);
"#,
    );
    assert_eq!(out, "tsr b 1\ntrue\n");
}

#[test]
fn timers_fire_after_sync_code() {
    let out = run_ok(
        r#"
setTimeout(() => console.log("timer"), 0);
Promise.resolve(0).then(() => console.log("microtask"));
console.log("sync");
"#,
    );
    assert_eq!(out, "sync\nmicrotask\ntimer\n");
}

#[test]
fn namespaces_merge_declarations() {
    let out = run_ok(
        r#"
namespace Geo { export function area(w: number, h: number): number { return w * h; } }
namespace Geo { export function perim(w: number, h: number): number { return 2 * (w + h); } }
console.log(Geo.area(3, 4), Geo.perim(3, 4));
"#,
    );
    assert_eq!(out, "12 14\n");
}

#[test]
fn instanceof_and_typeof() {
    let out = run_ok(
        r#"
class A {}
class B extends A {}
const b = new B();
console.log(b instanceof B, b instanceof A);
console.log(typeof 1, typeof "s", typeof undefined, typeof (() => 0));
"#,
    );
    assert_eq!(out, "true true\nnumber string undefined function\n");
}

#[test]
fn map_iteration_yields_pairs() {
    let out = run_ok(
        r#"
const m = new Map([["a", 1], ["b", 2]]);
for (const [k, v] of m) { console.log(k + "=" + v); }
"#,
    );
    assert_eq!(out, "a=1\nb=2\n");
}
