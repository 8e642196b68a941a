//! Diagnostic formatting and ordering guarantees.

use funxy_typeck::{analyze, AnalyzerOptions};

fn diags(source: &str) -> Vec<String> {
    let parse = funxy_parser::parse(source, "main.fx");
    let analysis = analyze(&[&parse.program], AnalyzerOptions::default());
    analysis
        .diagnostics
        .diagnostics()
        .iter()
        .map(|d| d.render_plain())
        .collect()
}

#[test]
fn plain_format_is_stable() {
    let rendered = diags("x = missing");
    assert_eq!(rendered.len(), 1);
    let line = &rendered[0];
    assert!(
        line.starts_with("- main.fx:1:5: [A001]"),
        "unexpected rendering: {line}"
    );
    assert!(line.contains("missing"));
}

#[test]
fn diagnostics_are_in_encounter_order() {
    let rendered = diags("a = missing1\nb = missing2");
    assert_eq!(rendered.len(), 2);
    assert!(rendered[0].contains("missing1"));
    assert!(rendered[1].contains("missing2"));
}

#[test]
fn analysis_continues_past_errors() {
    // Both the unknown identifier and the type mismatch are reported in
    // one pass.
    let rendered = diags("a = missing\nb = 1 + \"x\"");
    assert!(rendered.iter().any(|d| d.contains("[A001]")));
    assert!(rendered.iter().any(|d| d.contains("[A004]")));
}

#[test]
fn positions_point_at_the_offending_token() {
    let rendered = diags("x = 1\ny = oops");
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].starts_with("- main.fx:2:5:"), "got {}", rendered[0]);
}
