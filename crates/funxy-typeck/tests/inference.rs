//! End-to-end inference tests: parse a program, run the four passes,
//! assert on diagnostics.

use funxy_common::Severity;
use funxy_typeck::{analyze, Analysis, AnalyzerOptions};

fn check(source: &str) -> Analysis {
    let parse = funxy_parser::parse(source, "test.fx");
    assert!(
        !parse.has_errors(),
        "parse errors: {:?}",
        parse.diagnostics.diagnostics()
    );
    analyze(&[&parse.program], AnalyzerOptions::default())
}

fn check_ok(source: &str) -> Analysis {
    let analysis = check(source);
    assert!(
        !analysis.has_errors(),
        "unexpected analysis errors: {:?}",
        analysis.diagnostics.diagnostics()
    );
    analysis
}

fn codes(analysis: &Analysis) -> Vec<&'static str> {
    analysis
        .diagnostics
        .diagnostics()
        .iter()
        .map(|d| d.code.as_str())
        .collect()
}

#[test]
fn arithmetic_literals_check() {
    check_ok("x = 1 + 2 * 3");
}

#[test]
fn arithmetic_type_mismatch() {
    let analysis = check("x = 1 + \"a\"");
    assert!(codes(&analysis).contains(&"A004"), "got {:?}", codes(&analysis));
}

#[test]
fn unknown_identifier_is_a001() {
    let analysis = check("x = missing + 1");
    assert!(codes(&analysis).contains(&"A001"));
}

#[test]
fn duplicate_top_level_is_a002() {
    let analysis = check("x = 1\nx = 2");
    assert!(codes(&analysis).contains(&"A002"));
}

#[test]
fn annotated_function_checks_body() {
    check_ok("fun inc(x: Int) -> Int { x + 1 }\ny = inc(41)");
}

#[test]
fn annotated_function_wrong_body_type() {
    let analysis = check("fun broken(x: Int) -> String { x + 1 }");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn call_arity_mismatch_is_a009() {
    let analysis = check("fun inc(x: Int) -> Int { x + 1 }\ny = inc(1, 2)");
    assert!(codes(&analysis).contains(&"A009"));
}

#[test]
fn polymorphic_identity_generalizes() {
    check_ok("fun id<a>(x: a) -> a { x }\np = id(1)\nq = id(\"s\")");
}

#[test]
fn rigid_signature_variable_rejects_concrete_body() {
    // `a` is universally quantified; the body cannot pin it to Int.
    let analysis = check("fun bad<a>(x: a) -> a { 1 }");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn lambda_inference_and_pipe() {
    check_ok("double = \\x -> x * 2\ny = 21 |> double");
}

#[test]
fn let_generalization_allows_two_uses() {
    check_ok("ident = \\x -> x\na = ident(1)\nb = ident(\"s\")");
}

#[test]
fn if_branches_must_agree() {
    let analysis = check("fun pick(c: Bool) -> Int { if c { 1 } else { \"two\" } }");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn condition_must_be_bool() {
    let analysis = check("x = if 1 { 2 } else { 3 }");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn list_elements_unify() {
    check_ok("xs = [1, 2, 3]");
    let analysis = check("xs = [1, \"two\"]");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn nullable_annotation_accepts_nil_and_value() {
    check_ok("x: Int? = 5\ny: Int? = nil");
}

#[test]
fn record_field_access_is_row_polymorphic() {
    check_ok("fun getX(r: {x: Int | p}) -> Int { r.x }\na = getX({x: 1, y: 2})");
}

#[test]
fn missing_record_field_is_an_error() {
    let analysis = check("fun getX(r: {x: Int | p}) -> Int { r.x }\na = getX({y: 2})");
    assert!(codes(&analysis).contains(&"A004"));
}

#[test]
fn block_rebinding_shadows() {
    // Statement-position `=` introduces a new binding; shadowing inside a
    // block is legal (unlike top-level redefinition).
    check_ok("fun f() -> Int {\n  x = 1\n  x = 2\n  x\n}");
}

#[test]
fn recursion_with_annotation() {
    check_ok(
        "fun fact(n: Int) -> Int { if n == 0 { 1 } else { n * fact(n - 1) } }\nx = fact(5)",
    );
}

#[test]
fn comprehension_desugaring_checks() {
    check_ok("xs = [1, 2, 3, 4]\nsquares = [x * x | x <- xs, x % 2 == 0]");
}

#[test]
fn do_notation_over_result() {
    check_ok("r = do { x <- Ok(1)\n y <- Ok(2)\n Ok(x + y) }");
}

#[test]
fn adt_declaration_and_match() {
    check_ok(
        "type Shape = Circle Float | Rect Float Float\n\
         fun area(s: Shape) -> Float {\n\
           match s { Circle(r) -> 3.14 * r * r, Rect(w, h) -> w * h }\n\
         }\n\
         x = area(Circle(2.0))",
    );
}

#[test]
fn non_exhaustive_match_warns_by_default() {
    let analysis = check(
        "type Shape = Circle Float | Rect Float Float\n\
         fun f(s: Shape) -> Float { match s { Circle(r) -> r } }",
    );
    assert!(!analysis.has_errors());
    assert!(analysis
        .diagnostics
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("not exhaustive")));
}

#[test]
fn non_exhaustive_match_errors_when_configured() {
    let parse = funxy_parser::parse(
        "type Shape = Circle Float | Rect Float Float\n\
         fun f(s: Shape) -> Float { match s { Circle(r) -> r } }",
        "test.fx",
    );
    let analysis = analyze(
        &[&parse.program],
        AnalyzerOptions { exhaustiveness: Severity::Error },
    );
    assert!(analysis.has_errors());
}

#[test]
fn type_map_has_no_unresolved_entries() {
    let analysis = check_ok("fun inc(x: Int) -> Int { x + 1 }\ny = inc(41)");
    for (node, ty) in &analysis.types {
        assert!(
            !ty.mentions_var(),
            "unresolved type {ty} for node {node:?}"
        );
    }
}

#[test]
fn tail_call_is_marked() {
    let analysis = check_ok(
        "fun countdown(n: Int) -> Int { if n == 0 { 0 } else { countdown(n - 1) } }",
    );
    assert!(
        !analysis.tail_calls.is_empty(),
        "the recursive call in tail position should be marked"
    );
}

#[test]
fn alias_expansion() {
    check_ok("type alias Pair = (Int, Int)\nfun fst(p: Pair) -> Int { p[0] }");
}

#[test]
fn tuple_indexing_requires_literal() {
    let analysis = check("p = (1, \"a\")\nx = p[0 + 0]");
    assert!(codes(&analysis).contains(&"A010"));
}

#[test]
fn variadic_function_accepts_extra_arguments() {
    check_ok("fun sum3(a: Int, ...rest: Int) -> Int { a }\nx = sum3(1, 2, 3, 4)");
}

#[test]
fn default_parameter_reduces_minimum_arity() {
    check_ok("fun greet(name: String, punct: String = \"!\") -> String { name ++ punct }\nx = greet(\"hi\")");
}
