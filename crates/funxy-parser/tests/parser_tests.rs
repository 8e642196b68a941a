//! Parser integration tests: expression precedence, declarations,
//! desugarings, and error recovery.

use funxy_parser::ast::{
    BinOp, ExprKind, PatKind, StmtKind, TypeDeclBody, TypeExprKind,
};
use funxy_parser::parse;

fn parse_ok(source: &str) -> funxy_parser::Parse {
    let result = parse(source, "test.fx");
    assert!(
        !result.has_errors(),
        "unexpected diagnostics: {:?}",
        result.diagnostics.diagnostics()
    );
    result
}

fn first_expr(result: &funxy_parser::Parse) -> &ExprKind {
    match &result.program.stmts[0].kind {
        StmtKind::Expr(e) => &e.kind,
        other => panic!("expected expression statement, got {other:?}"),
    }
}

#[test]
fn precedence_mul_over_add() {
    let result = parse_ok("1 + 2 * 3");
    let ExprKind::Infix { op: BinOp::Add, rhs, .. } = first_expr(&result) else {
        panic!("expected `+` at the top");
    };
    assert!(matches!(rhs.kind, ExprKind::Infix { op: BinOp::Mul, .. }));
}

#[test]
fn power_is_right_associative() {
    let result = parse_ok("2 ** 3 ** 4");
    let ExprKind::Infix { op: BinOp::Pow, lhs, rhs } = first_expr(&result) else {
        panic!("expected `**` at the top");
    };
    assert!(matches!(lhs.kind, ExprKind::Int(2)));
    assert!(matches!(rhs.kind, ExprKind::Infix { op: BinOp::Pow, .. }));
}

#[test]
fn cons_is_right_associative() {
    let result = parse_ok("1 :: 2 :: xs");
    let ExprKind::Infix { op: BinOp::Cons, rhs, .. } = first_expr(&result) else {
        panic!("expected `::` at the top");
    };
    assert!(matches!(rhs.kind, ExprKind::Infix { op: BinOp::Cons, .. }));
}

#[test]
fn statement_assignment_is_const_binding() {
    let result = parse_ok("x = 42");
    match &result.program.stmts[0].kind {
        StmtKind::Const { name, ty, .. } => {
            assert_eq!(name, "x");
            assert!(ty.is_none());
        }
        other => panic!("expected const binding, got {other:?}"),
    }
}

#[test]
fn annotated_binding_keeps_type() {
    let result = parse_ok("x: Int = 42");
    match &result.program.stmts[0].kind {
        StmtKind::Const { name, ty, .. } => {
            assert_eq!(name, "x");
            assert!(ty.is_some());
        }
        other => panic!("expected typed const binding, got {other:?}"),
    }
}

#[test]
fn destructuring_binding_parses_as_pattern() {
    let result = parse_ok("(a, b) = pair");
    match &result.program.stmts[0].kind {
        StmtKind::ConstPattern { pat, .. } => {
            assert!(matches!(pat.kind, PatKind::Tuple(_)));
        }
        other => panic!("expected pattern binding, got {other:?}"),
    }
}

#[test]
fn compound_assignment_desugars() {
    let result = parse_ok("x += 1");
    match &result.program.stmts[0].kind {
        StmtKind::Const { name, value, .. } => {
            assert_eq!(name, "x");
            assert!(matches!(value.kind, ExprKind::Infix { op: BinOp::Add, .. }));
        }
        other => panic!("expected desugared const, got {other:?}"),
    }
}

#[test]
fn index_assignment_is_p007() {
    let result = parse("xs[0] = 1", "test.fx");
    assert!(result
        .diagnostics
        .diagnostics()
        .iter()
        .any(|d| d.code.as_str() == "P007"));
}

#[test]
fn adt_declaration_ml_and_c_style() {
    let result = parse_ok("type Shape = Circle Float | Rect(Float, Float) | Origin");
    match &result.program.stmts[0].kind {
        StmtKind::TypeDecl(decl) => {
            assert_eq!(decl.name, "Shape");
            let TypeDeclBody::Adt(ctors) = &decl.body else {
                panic!("expected ADT");
            };
            assert_eq!(ctors.len(), 3);
            assert_eq!(ctors[0].name, "Circle");
            assert_eq!(ctors[0].fields.len(), 1);
            assert_eq!(ctors[1].fields.len(), 2);
            assert!(ctors[2].fields.is_empty());
        }
        other => panic!("expected type declaration, got {other:?}"),
    }
}

#[test]
fn alias_declaration() {
    let result = parse_ok("type alias Pair<a> = (a, a)");
    match &result.program.stmts[0].kind {
        StmtKind::TypeDecl(decl) => {
            assert!(matches!(decl.body, TypeDeclBody::Alias(_)));
            assert_eq!(decl.params.len(), 1);
        }
        other => panic!("expected alias, got {other:?}"),
    }
}

#[test]
fn nested_generics_split_shr() {
    let result = parse_ok("type alias Matrix = List<List<Int>>");
    match &result.program.stmts[0].kind {
        StmtKind::TypeDecl(decl) => {
            let TypeDeclBody::Alias(ty) = &decl.body else { panic!() };
            let TypeExprKind::Named { name, args } = &ty.kind else {
                panic!("expected named type");
            };
            assert_eq!(name, "List");
            assert_eq!(args.len(), 1);
        }
        other => panic!("expected alias, got {other:?}"),
    }
}

#[test]
fn trait_with_supers_and_fundeps() {
    let result = parse_ok(
        "trait Convert<a, b> : Show | a -> b {\n  fun convert(x: a) -> b\n}",
    );
    match &result.program.stmts[0].kind {
        StmtKind::Trait(decl) => {
            assert_eq!(decl.name, "Convert");
            assert_eq!(decl.params.len(), 2);
            assert_eq!(decl.supers, vec!["Show".to_string()]);
            assert_eq!(decl.fundeps.len(), 1);
            assert_eq!(decl.methods.len(), 1);
            assert!(decl.methods[0].default_body.is_none());
        }
        other => panic!("expected trait, got {other:?}"),
    }
}

#[test]
fn instance_declaration() {
    let result = parse_ok(
        "instance Show Int {\n  fun show(x: Int) -> String { \"i\" }\n}",
    );
    match &result.program.stmts[0].kind {
        StmtKind::Instance(decl) => {
            assert_eq!(decl.trait_name, "Show");
            assert_eq!(decl.args.len(), 1);
            assert_eq!(decl.methods.len(), 1);
        }
        other => panic!("expected instance, got {other:?}"),
    }
}

#[test]
fn match_with_guard() {
    let result = parse_ok("match x { 0 -> \"zero\", n if n > 0 -> \"pos\", _ -> \"neg\" }");
    let ExprKind::Match { arms, .. } = first_expr(&result) else {
        panic!("expected match");
    };
    assert_eq!(arms.len(), 3);
    assert!(arms[1].guard.is_some());
    assert!(matches!(arms[2].pat.kind, PatKind::Wildcard));
}

#[test]
fn do_block_desugars_to_bind_chain() {
    let result = parse_ok("do { x <- m, y_unused :- 1; f(x) }".replace(',', "\n").as_str());
    // `do { x <- m \n y :- 1 \n f(x) }` -> m >>= \x -> ((fun() { y = 1; f(x) })())
    let ExprKind::Infix { op: BinOp::Bind, rhs, .. } = first_expr(&result) else {
        panic!("expected `>>=` chain");
    };
    assert!(matches!(rhs.kind, ExprKind::Lambda(_)));
}

#[test]
fn comprehension_desugars_to_flat_map() {
    let result = parse_ok("[x * x | x <- xs, x % 2 == 0]");
    let ExprKind::Call { callee, args } = first_expr(&result) else {
        panic!("expected desugared call");
    };
    assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "listFlatMap"));
    assert_eq!(args.len(), 2);
}

#[test]
fn interpolated_string_re_parses_expressions() {
    let result = parse_ok(r#""sum: ${1 + 2}!""#);
    let ExprKind::InterpStr(parts) = first_expr(&result) else {
        panic!("expected interpolated string");
    };
    assert_eq!(parts.len(), 3);
}

#[test]
fn late_import_is_p006() {
    let result = parse("x = 1\nimport \"lib/math\"", "test.fx");
    assert!(result
        .diagnostics
        .diagnostics()
        .iter()
        .any(|d| d.code.as_str() == "P006"));
}

#[test]
fn import_clauses() {
    let result = parse_ok("import \"lib/math\" as m exposing (sin, cos)\nx = 1");
    let import = &result.program.imports[0];
    assert_eq!(import.path, "lib/math");
    assert_eq!(import.alias.as_deref(), Some("m"));
    assert_eq!(import.symbols, vec!["sin".to_string(), "cos".to_string()]);
    assert!(!import.import_all);
}

#[test]
fn recovery_reports_multiple_errors() {
    let result = parse("x = )\ny = )\nz = 3", "test.fx");
    let errors = result
        .diagnostics
        .diagnostics()
        .iter()
        .filter(|d| d.code.as_str().starts_with('P'))
        .count();
    assert!(errors >= 2, "expected at least two parse errors, got {errors}");
    // The valid trailing statement still parses.
    assert!(result
        .program
        .stmts
        .iter()
        .any(|s| matches!(&s.kind, StmtKind::Const { name, .. } if name == "z")));
}

#[test]
fn pipe_continues_across_newlines() {
    let result = parse_ok("xs\n  |> f\n  |> g");
    let ExprKind::Infix { op: BinOp::Pipe, .. } = first_expr(&result) else {
        panic!("expected pipe chain");
    };
}

#[test]
fn trailing_dsl_block_becomes_list_argument() {
    let result = parse_ok("html(title) { header(1)\n body(2) }");
    let ExprKind::Call { args, .. } = first_expr(&result) else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 2);
    assert!(matches!(&args[1].kind, ExprKind::List(items) if items.len() == 2));
}

#[test]
fn record_literal_vs_block() {
    let record = parse_ok("{x: 1, y: 2}");
    assert!(matches!(first_expr(&record), ExprKind::Record { .. }));

    let block = parse_ok("{ f(1)\n g(2) }");
    assert!(matches!(first_expr(&block), ExprKind::Block(_)));
}

#[test]
fn nullable_type_desugars_to_union_with_nil() {
    let result = parse_ok("fun f(x: Int?) -> Int { 1 }");
    match &result.program.stmts[0].kind {
        StmtKind::Function(decl) => {
            let ty = decl.params[0].ty.as_ref().unwrap();
            let TypeExprKind::Union(members) = &ty.kind else {
                panic!("expected union");
            };
            assert_eq!(members.len(), 2);
        }
        other => panic!("expected function, got {other:?}"),
    }
}

#[test]
fn lambda_and_pipe() {
    let result = parse_ok(r"f = \x -> x + 1");
    match &result.program.stmts[0].kind {
        StmtKind::Const { value, .. } => {
            assert!(matches!(value.kind, ExprKind::Lambda(_)));
        }
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn every_node_gets_a_unique_id() {
    let result = parse_ok("fun f(x: Int) -> Int { x + 1 }\nf(2)");
    assert!(result.node_count > 8);
}
