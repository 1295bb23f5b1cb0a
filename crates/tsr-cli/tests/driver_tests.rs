use std::rc::Rc;

use tsr_cli::driver::Driver;
use tsr_cli::loader::Loader;
use tsr_cli::pack;
use tsr_interpreter::Interpreter;
use tsr_runtime::Output;

fn write(dir: &tempfile::TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, source).unwrap();
    path
}

#[test]
fn check_accepts_well_typed_programs() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(&dir, "ok.ts", "const n: number = 1 + 2;\n");
    Driver::new().check(&file).expect("clean program should check");
}

#[test]
fn check_rejects_type_errors_with_location() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(&dir, "bad.ts", "const n: number = \"oops\";\n");
    let error = Driver::new().check(&file).unwrap_err();
    let message = format!("{error:#}");
    assert!(message.contains("TypeError"), "got: {message}");
    assert!(message.contains("bad.ts:1:"), "got: {message}");
}

#[test]
fn compile_writes_a_loadable_module() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(&dir, "prog.ts", "console.log(40 + 2);\n");
    let out = dir.path().join("prog.tsrb");
    Driver::new().compile(&file, Some(&out)).expect("compile");
    let bytes = std::fs::read(&out).unwrap();
    let module = tsr_emitter::Module::from_bytes(&bytes).expect("container parses");
    assert!(!module.main.ops.is_empty());
    // And the compiled module runs.
    Driver::new().run(&out).expect("compiled module runs");
}

#[test]
fn run_reports_uncaught_errors() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(&dir, "boom.ts", "throw new Error(\"boom\");\n");
    let error = Driver::new().run(&file).unwrap_err();
    let message = format!("{error:#}");
    assert!(message.contains("Error"), "got: {message}");
    assert!(message.contains("boom"), "got: {message}");
}

#[test]
fn modules_load_and_bind_exports() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "math_utils.ts",
        "export function double(n: number): number { return n * 2; }\nexport const BASE = 10;\n",
    );
    let main = write(
        &dir,
        "main.ts",
        "import { double, BASE } from \"./math_utils\";\nconsole.log(double(BASE));\n",
    );

    let (_, stmts) = Loader::parse_and_check(&main).expect("parse+check");
    let output = Rc::new(Output::capture());
    let interp = Interpreter::new(Rc::clone(&output));
    Loader::new()
        .load_imports(&interp, &main, &stmts)
        .expect("imports load");
    interp.run_program(Rc::new(stmts)).expect("run");
    assert_eq!(output.captured(), "20\n");
}

#[test]
fn pack_produces_a_bundle_with_manifest() {
    let dir = tempfile::tempdir().unwrap();
    // SAFETY: tests in this binary run single-threaded with respect to this
    // variable; no other thread reads the environment concurrently.
    unsafe {
        std::env::set_var("TSR_PACKAGE_CACHE", dir.path().join("cache"));
    }
    let file = write(&dir, "lib.ts", "console.log(\"packaged\");\n");
    let module_path = dir.path().join("lib.tsrb");
    Driver::new().compile(&file, Some(&module_path)).expect("compile");

    let out = dir.path().join("lib-1.2.3.tsrpkg");
    pack::pack(&module_path, Some("demo.lib"), Some("1.2.3"), Some(&out)).expect("pack");
    let bundle = pack::read_bundle(&out).expect("bundle parses");
    assert_eq!(bundle.package_id, "demo.lib");
    assert_eq!(bundle.version, "1.2.3");
    assert!(tsr_emitter::Module::from_bytes(&bundle.module).is_ok());
    // The cache copy landed in the overridden location.
    assert!(dir.path().join("cache").join("lib-1.2.3.tsrpkg").exists());
}

#[test]
fn pack_validates_identity() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(&dir, "lib.ts", "console.log(1);\n");
    let module_path = dir.path().join("lib.tsrb");
    Driver::new().compile(&file, Some(&module_path)).expect("compile");

    assert!(pack::pack(&module_path, Some("..bad"), Some("1.0.0"), None).is_err());
    assert!(pack::pack(&module_path, Some("ok.pkg"), Some("not-semver"), None).is_err());
    assert!(pack::pack(&module_path, None, Some("1.0.0"), None).is_err());
}
