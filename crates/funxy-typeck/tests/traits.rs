//! Trait declaration, instance registration, dictionary elaboration, and
//! constraint-solving tests.

use funxy_typeck::{analyze, Analysis, AnalyzerOptions, WitnessSource};

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

const SHOW: &str = "trait Show<a> { fun show(x: a) -> String }\n";

#[test]
fn trait_and_instance_resolve_method_call() {
    let analysis = check_ok(&format!(
        "{SHOW}instance Show Int {{ fun show(x: Int) -> String {{ \"i:\" ++ intToStr(x) }} }}\n\
         s = show(42)"
    ));
    // The call received a concrete instance witness.
    assert!(analysis
        .witnesses
        .values()
        .any(|w| matches!(w.as_slice(), [WitnessSource::Instance { .. }])));
    assert!(!analysis.method_refs.is_empty());
}

#[test]
fn missing_instance_is_a007() {
    let analysis = check(&format!("{SHOW}s = show(1.5)"));
    assert!(codes(&analysis).contains(&"A007"), "got {:?}", codes(&analysis));
}

#[test]
fn constrained_function_grows_witness_parameter() {
    let analysis = check_ok(&format!(
        "{SHOW}instance Show Int {{ fun show(x: Int) -> String {{ intToStr(x) }} }}\n\
         fun describe<a: Show>(x: a) -> String {{ \"v=\" ++ show(x) }}\n\
         d = describe(7)"
    ));
    // `describe` carries one dictionary parameter; the inner `show` call
    // forwards it.
    assert!(analysis
        .fn_constraints
        .values()
        .any(|cs| cs.len() == 1 && cs[0].trait_name == "Show"));
    assert!(analysis
        .witnesses
        .values()
        .any(|w| matches!(w.as_slice(), [WitnessSource::Param(0)])));
}

#[test]
fn calling_constrained_function_at_unsupported_type_is_a007() {
    let analysis = check(&format!(
        "{SHOW}instance Show Int {{ fun show(x: Int) -> String {{ intToStr(x) }} }}\n\
         fun describe<a: Show>(x: a) -> String {{ show(x) }}\n\
         d = describe(1.5)"
    ));
    assert!(codes(&analysis).contains(&"A007"));
}

#[test]
fn overlapping_instances_are_a008() {
    let analysis = check(&format!(
        "{SHOW}instance Show Int {{ fun show(x: Int) -> String {{ \"a\" }} }}\n\
         instance Show Int {{ fun show(x: Int) -> String {{ \"b\" }} }}"
    ));
    assert!(codes(&analysis).contains(&"A008"));
}

#[test]
fn instance_missing_method_is_a010() {
    let analysis = check(&format!("{SHOW}instance Show Int {{ }}"));
    assert!(codes(&analysis).contains(&"A010"));
}

#[test]
fn instance_with_unknown_method_is_a010() {
    let analysis = check(&format!(
        "{SHOW}instance Show Int {{\n\
           fun show(x: Int) -> String {{ \"i\" }}\n\
           fun extra(x: Int) -> Int {{ x }}\n\
         }}"
    ));
    assert!(codes(&analysis).contains(&"A010"));
}

#[test]
fn default_method_fills_missing_slot() {
    check_ok(
        "trait Greet<a> {\n\
           fun name(x: a) -> String\n\
           fun greet(x: a) -> String { \"hello \" ++ name(x) }\n\
         }\n\
         instance Greet Int { fun name(x: Int) -> String { intToStr(x) } }\n\
         g = greet(3)",
    );
}

#[test]
fn super_trait_requires_instance() {
    let analysis = check(
        "trait Base<a> { fun base(x: a) -> Int }\n\
         trait Extended<a> : Base { fun ext(x: a) -> Int }\n\
         instance Extended Int { fun ext(x: Int) -> Int { x } }",
    );
    assert!(codes(&analysis).contains(&"A007"));
}

#[test]
fn super_trait_satisfied_passes() {
    check_ok(
        "trait Base<a> { fun base(x: a) -> Int }\n\
         trait Extended<a> : Base { fun ext(x: a) -> Int }\n\
         instance Base Int { fun base(x: Int) -> Int { x } }\n\
         instance Extended Int { fun ext(x: Int) -> Int { base(x) + 1 } }",
    );
}

#[test]
fn super_trait_expands_witness_parameters() {
    let analysis = check_ok(
        "trait Base<a> { fun base(x: a) -> Int }\n\
         trait Extended<a> : Base { fun ext(x: a) -> Int }\n\
         instance Base Int { fun base(x: Int) -> Int { x } }\n\
         instance Extended Int { fun ext(x: Int) -> Int { x } }\n\
         fun both<a: Extended>(x: a) -> Int { ext(x) + base(x) }\n\
         r = both(1)",
    );
    // One declared constraint plus one transitive super, deduplicated.
    assert!(analysis
        .fn_constraints
        .values()
        .any(|cs| cs.len() == 2
            && cs[0].trait_name == "Extended"
            && cs[1].trait_name == "Base"));
}

#[test]
fn multi_parameter_trait_with_fundep() {
    check_ok(
        "trait Convert<a, b> | a -> b { fun convert(x: a) -> b }\n\
         instance Convert Int String { fun convert(x: Int) -> String { intToStr(x) } }\n\
         s = convert(3) ++ \"!\"",
    );
}

#[test]
fn fundep_conflicting_use_is_error() {
    // The fundep fixes b = String for a = Int; using the result as Int
    // must fail.
    let analysis = check(
        "trait Convert<a, b> | a -> b { fun convert(x: a) -> b }\n\
         instance Convert Int String { fun convert(x: Int) -> String { intToStr(x) } }\n\
         n = convert(3) + 1",
    );
    assert!(codes(&analysis).iter().any(|c| *c == "A004" || *c == "A007"));
}

#[test]
fn operator_dispatch_through_add_trait() {
    let analysis = check_ok("x = 1 + 2");
    // The `+` node carries a method ref into the Add dictionary.
    assert!(analysis
        .method_refs
        .values()
        .any(|m| m.trait_name == "Add" && m.method_index == 0));
}

#[test]
fn monad_bind_resolves_builtin_result_instance() {
    let analysis = check_ok("r = Ok(1) >>= \\x -> Ok(x + 1)");
    assert!(analysis
        .method_refs
        .values()
        .any(|m| m.trait_name == "Monad"));
}

#[test]
fn higher_kinded_trait_parameter() {
    check_ok(
        "trait Functor<f: * -> *> { fun fmap(x: f<a>, g: (a) -> b) -> f<b> }\n\
         instance Functor Option {\n\
           fun fmap(x: Option<a>, g: (a) -> b) -> Option<b> {\n\
             match x { Some(v) -> Some(g(v)), None -> None }\n\
           }\n\
         }\n\
         y = fmap(Some(1), \\v -> v + 1)",
    );
}
