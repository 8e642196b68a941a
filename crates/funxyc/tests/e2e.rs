//! End-to-end pipeline tests: source text through load -> analyze ->
//! execute, on both backends, asserting on the entry module's final
//! value. The differential cases check that the evaluator and the VM
//! agree on observable results.

use std::path::PathBuf;

use funxy_runtime::{values_equal, Value};
use funxyc::pipeline::{self, BackendKind, PipelineError};

fn write_program(name: &str, source: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "funxy-e2e-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

fn run_tree(source: &str) -> Result<Value, PipelineError> {
    let path = write_program("tree.fx", source);
    pipeline::run_file(&path, BackendKind::Tree)
}

fn run_vm(source: &str) -> Result<Value, PipelineError> {
    let path = write_program("vm.fx", source);
    pipeline::run_file(&path, BackendKind::Vm)
}

/// Run on both backends and require identical observable results.
fn run_both(source: &str) -> Value {
    let tree = run_tree(source).unwrap_or_else(|e| panic!("tree backend failed: {e}"));
    let vm = run_vm(source).unwrap_or_else(|e| panic!("vm backend failed: {e}"));
    assert_eq!(
        tree.to_string(),
        vm.to_string(),
        "backends disagree on `{source}`"
    );
    tree
}

#[test]
fn arithmetic_precedence() {
    let value = run_both("1 + 2 * 3");
    assert!(values_equal(&value, &Value::Int(7)));
}

#[test]
fn adt_match_computes_area() {
    let value = run_both(
        "type Shape = Circle Float | Rect Float Float\n\
         fun area(s: Shape) -> Float {\n\
           match s { Circle(r) -> 3.14 * r * r, Rect(w, h) -> w * h }\n\
         }\n\
         area(Circle(2.0))",
    );
    assert_eq!(value.to_string(), "12.56");
}

#[test]
fn user_trait_instance_dispatch() {
    let value = run_both(
        "trait Show<a> { fun show(x: a) -> String }\n\
         instance Show Int { fun show(x: Int) -> String { \"i:\" ++ intToStr(x) } }\n\
         show(42)",
    );
    assert_eq!(value.to_string(), "i:42");
}

#[test]
fn list_comprehension_filters_and_maps() {
    let value = run_both("xs = [1, 2, 3, 4]\n[x * x | x <- xs, x % 2 == 0]");
    assert_eq!(value.to_string(), "[4, 16]");
}

#[test]
fn do_notation_over_result_monad() {
    let value = run_both("do { x <- Ok(1)\n y <- Ok(2)\n Ok(x + y) }");
    assert!(values_equal(&value, &Value::ok(Value::Int(3))));
}

#[test]
fn do_notation_short_circuits_on_err() {
    let value = run_both(
        "do { x <- Ok(1)\n y <- Err(\"boom\")\n Ok(x + y) }",
    );
    assert!(values_equal(&value, &Value::err(Value::string("boom"))));
}

#[test]
fn missing_import_reports_a003() {
    let path = write_program("missing.fx", "import \"nope/x\"\n1");
    match pipeline::run_file(&path, BackendKind::Tree) {
        Err(PipelineError::Diagnostics(diags)) => {
            assert!(diags
                .iter()
                .any(|d| d.code.as_str() == "A003" && d.message.contains("nope/x")));
        }
        other => panic!("expected diagnostics, got {other:?}"),
    }
}

#[test]
fn constrained_function_dispatches_by_argument_type() {
    let value = run_both(
        "fun double<a: Add>(x: a) -> a { x + x }\n\
         (double(21), double(1.5))",
    );
    assert_eq!(value.to_string(), "(42, 3.0)");
}

#[test]
fn string_interpolation_renders() {
    let value = run_both("name = \"funxy\"\n\"hello ${name}, ${1 + 1}!\"");
    assert_eq!(value.to_string(), "hello funxy, 2!");
}

#[test]
fn closures_capture_environment() {
    let value = run_both(
        "fun adder(n: Int) -> (Int) -> Int { \\x -> x + n }\n\
         add5 = adder(5)\n\
         add5(37)",
    );
    assert!(values_equal(&value, &Value::Int(42)));
}

#[test]
fn tail_recursion_does_not_overflow() {
    let value = run_both(
        "fun count(n: Int, acc: Int) -> Int {\n\
           if n == 0 { acc } else { count(n - 1, acc + 1) }\n\
         }\n\
         count(100000, 0)",
    );
    assert!(values_equal(&value, &Value::Int(100_000)));
}

#[test]
fn division_by_zero_is_r002() {
    for result in [run_tree("1 / 0"), run_vm("1 / 0")] {
        match result {
            Err(PipelineError::Runtime(e)) => assert_eq!(e.code, "R002"),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }
}

#[test]
fn trap_catches_runtime_errors() {
    let value = run_both("trap(fun() { 1 / 0 })");
    assert_eq!(value.to_string(), "Err(division by zero)");
}

#[test]
fn pattern_match_failure_is_r001() {
    for result in [
        run_tree("match 3 { 1 -> \"one\", 2 -> \"two\" }"),
        run_vm("match 3 { 1 -> \"one\", 2 -> \"two\" }"),
    ] {
        match result {
            Err(PipelineError::Runtime(e)) => assert_eq!(e.code, "R001"),
            other => panic!("expected match failure, got {other:?}"),
        }
    }
}

#[test]
fn records_and_row_polymorphic_access() {
    let value = run_both(
        "fun getX(r: {x: Int | p}) -> Int { r.x }\n\
         getX({x: 40, y: 2}) + 2",
    );
    assert!(values_equal(&value, &Value::Int(42)));
}

#[test]
fn record_spread_overrides() {
    let value = run_both("base = {x: 1, y: 2}\nnext = {x: 10, ...base}\nnext.x + next.y");
    assert!(values_equal(&value, &Value::Int(12)));
}

#[test]
fn pipe_and_lambda() {
    let value = run_both("21 |> \\x -> x * 2");
    assert!(values_equal(&value, &Value::Int(42)));
}

#[test]
fn big_integers_promote_and_compute() {
    let value = run_both("99999999999999999999999999 + 1n");
    assert_eq!(value.to_string(), "100000000000000000000000000");
}

#[test]
fn imports_between_files() {
    let dir = std::env::temp_dir().join(format!(
        "funxy-e2e-import-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("util.fx"), "fun triple(x: Int) -> Int { x * 3 }\n").unwrap();
    std::fs::write(
        dir.join("main.fx"),
        "import \"./util\" exposing (triple)\ntriple(14)\n",
    )
    .unwrap();

    for backend in [BackendKind::Tree, BackendKind::Vm] {
        let value = pipeline::run_file(&dir.join("main.fx"), backend)
            .unwrap_or_else(|e| panic!("{backend:?} failed: {e}"));
        assert!(values_equal(&value, &Value::Int(42)));
    }
}

#[test]
fn virtual_module_natives() {
    let value = run_both("import \"lib/math\" exposing (abs)\nabs(-5)");
    assert!(values_equal(&value, &Value::Int(5)));
}

#[test]
fn bundle_round_trip_executes() {
    let path = write_program("bundled.fx", "fun inc(x: Int) -> Int { x + 1 }\ninc(41)");
    let bundle = pipeline::compile_source(&path).unwrap();
    let bytes = funxy_codegen::serialize_bundle(&bundle).unwrap();
    let restored = funxy_codegen::deserialize_bundle(&bytes).unwrap();
    let value = pipeline::run_bundle(&restored).unwrap();
    assert!(values_equal(&value, &Value::Int(42)));
}

#[test]
fn match_guards_choose_arms() {
    let value = run_both(
        "fun sign(n: Int) -> String {\n\
           match n { 0 -> \"zero\", x if x > 0 -> \"pos\", _ -> \"neg\" }\n\
         }\n\
         sign(0) ++ sign(5) ++ sign(0 - 5)",
    );
    assert_eq!(value.to_string(), "zeroposneg");
}

#[test]
fn string_pattern_captures() {
    let value = run_both(
        "match \"id:42\" { \"id:${rest}\" -> rest, _ -> \"none\" }",
    );
    assert_eq!(value.to_string(), "42");
}
