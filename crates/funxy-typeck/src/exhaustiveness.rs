//! Exhaustiveness and redundancy analysis for `match` expressions.
//!
//! Constructor-cover analysis over ADT and Bool scrutinees: an arm whose
//! pattern is irrefutable (and unguarded) closes the match; a constructor
//! arm covers its constructor when its sub-patterns are irrefutable.
//! Guarded arms never count toward coverage. Other scrutinee types are
//! not analyzed.

use rustc_hash::FxHashSet;

use funxy_parser::ast::{MatchArm, PatKind, PatLit};

use crate::registry::TypeRegistry;
use crate::ty::Ty;

/// Result of coverage analysis.
#[derive(Debug, PartialEq)]
pub enum Coverage {
    Exhaustive,
    /// Constructor (or literal) names with no covering arm.
    Missing(Vec<String>),
    /// The scrutinee type is not analyzed (open-domain types).
    NotAnalyzed,
}

/// Analyze the arms of a match over `scrutinee`.
///
/// Returns the coverage verdict plus the indexes of redundant arms
/// (unreachable given the arms before them).
pub fn check_match(
    arms: &[MatchArm],
    scrutinee: &Ty,
    registry: &TypeRegistry,
) -> (Coverage, Vec<usize>) {
    let domain = match domain_of(scrutinee, registry) {
        Some(d) => d,
        None => return (Coverage::NotAnalyzed, Vec::new()),
    };

    let mut covered: FxHashSet<String> = FxHashSet::default();
    let mut closed = false;
    let mut redundant = Vec::new();

    for (idx, arm) in arms.iter().enumerate() {
        if closed {
            redundant.push(idx);
            continue;
        }
        if arm.guard.is_some() {
            // A guard may fail at runtime; the arm contributes nothing to
            // coverage.
            continue;
        }
        match &arm.pat.kind {
            PatKind::Wildcard | PatKind::Ident(_) | PatKind::Typed { .. } => {
                closed = true;
            }
            PatKind::Ctor { name, args } => {
                let fully_covers = args.iter().all(|p| p.is_irrefutable());
                if covered.contains(name) && fully_covers {
                    redundant.push(idx);
                } else if fully_covers {
                    covered.insert(name.clone());
                    if domain.iter().all(|c| covered.contains(c)) {
                        closed = true;
                    }
                }
            }
            PatKind::Literal(PatLit::Bool(value)) => {
                let name = if *value { "true" } else { "false" };
                if covered.contains(name) {
                    redundant.push(idx);
                } else {
                    covered.insert(name.to_string());
                    if domain.iter().all(|c| covered.contains(c)) {
                        closed = true;
                    }
                }
            }
            _ => {}
        }
    }

    if closed {
        (Coverage::Exhaustive, redundant)
    } else {
        let missing: Vec<String> = domain
            .iter()
            .filter(|c| !covered.contains(*c))
            .cloned()
            .collect();
        if missing.is_empty() {
            (Coverage::Exhaustive, redundant)
        } else {
            (Coverage::Missing(missing), redundant)
        }
    }
}

/// The finite constructor domain of a type, when it has one.
fn domain_of(ty: &Ty, registry: &TypeRegistry) -> Option<Vec<String>> {
    let head = match ty {
        Ty::Con(name) => name.clone(),
        Ty::App(head, _) => match head.as_ref() {
            Ty::Con(name) => name.clone(),
            _ => return None,
        },
        _ => return None,
    };
    if head == "Bool" {
        return Some(vec!["true".to_string(), "false".to_string()]);
    }
    registry
        .adt(&head)
        .map(|adt| adt.ctors.iter().map(|c| c.name.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AdtDef, CtorSig};
    use funxy_common::{Span, Token, TokenKind};
    use funxy_parser::ast::{NodeId, Pattern};

    fn tok() -> Token {
        Token::new(TokenKind::Match, Span::new(0, 1), 1, 1)
    }

    fn pat(kind: PatKind) -> Pattern {
        Pattern { id: NodeId(0), token: tok(), kind }
    }

    fn arm(p: PatKind, guarded: bool) -> MatchArm {
        MatchArm {
            id: NodeId(0),
            pat: pat(p),
            guard: if guarded {
                Some(funxy_parser::ast::Expr {
                    id: NodeId(0),
                    token: tok(),
                    kind: funxy_parser::ast::ExprKind::Bool(true),
                })
            } else {
                None
            },
            body: funxy_parser::ast::Expr {
                id: NodeId(0),
                token: tok(),
                kind: funxy_parser::ast::ExprKind::Nil,
            },
        }
    }

    fn shape_registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register_adt(AdtDef {
            name: "Shape".into(),
            params: Vec::new(),
            ctors: vec![
                CtorSig { name: "Circle".into(), fields: vec![Ty::float()] },
                CtorSig { name: "Rect".into(), fields: vec![Ty::float(), Ty::float()] },
            ],
        });
        reg
    }

    fn ctor(name: &str, args: Vec<PatKind>) -> PatKind {
        PatKind::Ctor {
            name: name.into(),
            args: args.into_iter().map(pat).collect(),
        }
    }

    #[test]
    fn all_ctors_covered_is_exhaustive() {
        let reg = shape_registry();
        let arms = vec![
            arm(ctor("Circle", vec![PatKind::Ident("r".into())]), false),
            arm(ctor("Rect", vec![PatKind::Ident("w".into()), PatKind::Ident("h".into())]), false),
        ];
        let (coverage, redundant) = check_match(&arms, &Ty::Con("Shape".into()), &reg);
        assert_eq!(coverage, Coverage::Exhaustive);
        assert!(redundant.is_empty());
    }

    #[test]
    fn missing_ctor_reported() {
        let reg = shape_registry();
        let arms = vec![arm(ctor("Circle", vec![PatKind::Wildcard]), false)];
        let (coverage, _) = check_match(&arms, &Ty::Con("Shape".into()), &reg);
        assert_eq!(coverage, Coverage::Missing(vec!["Rect".into()]));
    }

    #[test]
    fn wildcard_closes_and_later_arms_are_redundant() {
        let reg = shape_registry();
        let arms = vec![
            arm(PatKind::Wildcard, false),
            arm(ctor("Circle", vec![PatKind::Wildcard]), false),
        ];
        let (coverage, redundant) = check_match(&arms, &Ty::Con("Shape".into()), &reg);
        assert_eq!(coverage, Coverage::Exhaustive);
        assert_eq!(redundant, vec![1]);
    }

    #[test]
    fn guarded_arm_does_not_cover() {
        let reg = shape_registry();
        let arms = vec![
            arm(ctor("Circle", vec![PatKind::Wildcard]), true),
            arm(ctor("Rect", vec![PatKind::Wildcard, PatKind::Wildcard]), false),
        ];
        let (coverage, _) = check_match(&arms, &Ty::Con("Shape".into()), &reg);
        assert_eq!(coverage, Coverage::Missing(vec!["Circle".into()]));
    }

    #[test]
    fn bool_domain() {
        let reg = TypeRegistry::new();
        let arms = vec![
            arm(PatKind::Literal(PatLit::Bool(true)), false),
            arm(PatKind::Literal(PatLit::Bool(false)), false),
        ];
        let (coverage, _) = check_match(&arms, &Ty::bool(), &reg);
        assert_eq!(coverage, Coverage::Exhaustive);
    }

    #[test]
    fn open_types_not_analyzed() {
        let reg = TypeRegistry::new();
        let arms = vec![arm(PatKind::Literal(PatLit::Int(1)), false)];
        let (coverage, _) = check_match(&arms, &Ty::int(), &reg);
        assert_eq!(coverage, Coverage::NotAnalyzed);
    }
}
