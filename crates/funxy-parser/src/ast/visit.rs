//! Single-dispatch AST visitor.
//!
//! External consumers that need to walk the whole tree (analyzer passes,
//! tooling) implement [`Visitor`] and override the variants they care
//! about; the `walk_*` functions provide the default recursion so an
//! override can still descend by calling them.

use super::expr::{Block, Expr, ExprKind, FunctionLit, InterpPart, MatchArm};
use super::pat::{PatKind, Pattern};
use super::types::{TypeExpr, TypeExprKind};
use super::{FunctionDecl, InstanceDecl, Stmt, StmtKind, TraitDecl, TypeDecl, TypeDeclBody};

/// Read-only AST visitor with default deep recursion.
pub trait Visitor: Sized {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_pattern(&mut self, pat: &Pattern) {
        walk_pattern(self, pat);
    }

    fn visit_type(&mut self, ty: &TypeExpr) {
        walk_type(self, ty);
    }

    fn visit_function_decl(&mut self, decl: &FunctionDecl) {
        walk_function_decl(self, decl);
    }

    fn visit_trait_decl(&mut self, decl: &TraitDecl) {
        walk_trait_decl(self, decl);
    }

    fn visit_instance_decl(&mut self, decl: &InstanceDecl) {
        walk_instance_decl(self, decl);
    }

    fn visit_type_decl(&mut self, decl: &TypeDecl) {
        walk_type_decl(self, decl);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) => v.visit_expr(e),
        StmtKind::Const { ty, value, .. } => {
            if let Some(ty) = ty {
                v.visit_type(ty);
            }
            v.visit_expr(value);
        }
        StmtKind::ConstPattern { pat, value } => {
            v.visit_pattern(pat);
            v.visit_expr(value);
        }
        StmtKind::Function(decl) => v.visit_function_decl(decl),
        StmtKind::Trait(decl) => v.visit_trait_decl(decl),
        StmtKind::Instance(decl) => v.visit_instance_decl(decl),
        StmtKind::TypeDecl(decl) => v.visit_type_decl(decl),
        StmtKind::Directive { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        StmtKind::Return(Some(e)) => v.visit_expr(e),
        StmtKind::Break | StmtKind::Continue | StmtKind::Return(None) => {}
    }
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_function_lit<V: Visitor>(v: &mut V, lit: &FunctionLit) {
    for param in &lit.params {
        if let Some(ty) = &param.ty {
            v.visit_type(ty);
        }
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    if let Some(ret) = &lit.ret {
        v.visit_type(ret);
    }
    v.visit_expr(&lit.body);
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::BigInt(_)
        | ExprKind::Rational(_)
        | ExprKind::Float(_)
        | ExprKind::Bool(_)
        | ExprKind::Nil
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Bytes(_)
        | ExprKind::Bits { .. }
        | ExprKind::Ident(_) => {}
        ExprKind::InterpStr(parts) => {
            for part in parts {
                if let InterpPart::Expr(e) = part {
                    v.visit_expr(e);
                }
            }
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for e in items {
                v.visit_expr(e);
            }
        }
        ExprKind::Map(entries) => {
            for (k, val) in entries {
                v.visit_expr(k);
                v.visit_expr(val);
            }
        }
        ExprKind::Record { fields, spread } => {
            for (_, e) in fields {
                v.visit_expr(e);
            }
            if let Some(base) = spread {
                v.visit_expr(base);
            }
        }
        ExprKind::Prefix { rhs, .. } => v.visit_expr(rhs),
        ExprKind::Infix { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Call { callee, args } => {
            v.visit_expr(callee);
            for arg in args {
                v.visit_expr(arg);
            }
        }
        ExprKind::Index { obj, index } => {
            v.visit_expr(obj);
            v.visit_expr(index);
        }
        ExprKind::Member { obj, .. } => v.visit_expr(obj),
        ExprKind::Annotated { expr, ty } => {
            v.visit_expr(expr);
            v.visit_type(ty);
        }
        ExprKind::Assign { target, value } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        ExprKind::TypeApp { expr, args } => {
            v.visit_expr(expr);
            for ty in args {
                v.visit_type(ty);
            }
        }
        ExprKind::Lambda(lit) => walk_function_lit(v, lit),
        ExprKind::If { cond, then_branch, else_branch } => {
            v.visit_expr(cond);
            v.visit_expr(then_branch);
            if let Some(e) = else_branch {
                v.visit_expr(e);
            }
        }
        ExprKind::For { pat, iter, body } => {
            v.visit_pattern(pat);
            v.visit_expr(iter);
            v.visit_expr(body);
        }
        ExprKind::Match { scrutinee, arms } => {
            v.visit_expr(scrutinee);
            for arm in arms {
                walk_match_arm(v, arm);
            }
        }
        ExprKind::Block(block) => walk_block(v, block),
        ExprKind::Spread(e) => v.visit_expr(e),
        ExprKind::Range { start, end } => {
            v.visit_expr(start);
            v.visit_expr(end);
        }
    }
}

pub fn walk_match_arm<V: Visitor>(v: &mut V, arm: &MatchArm) {
    v.visit_pattern(&arm.pat);
    if let Some(guard) = &arm.guard {
        v.visit_expr(guard);
    }
    v.visit_expr(&arm.body);
}

pub fn walk_pattern<V: Visitor>(v: &mut V, pat: &Pattern) {
    match &pat.kind {
        PatKind::Wildcard
        | PatKind::Literal(_)
        | PatKind::Ident(_)
        | PatKind::Str(_)
        | PatKind::Pin(_) => {}
        PatKind::Typed { ty, .. } => v.visit_type(ty),
        PatKind::Ctor { args, .. } => {
            for p in args {
                v.visit_pattern(p);
            }
        }
        PatKind::Tuple(ps) => {
            for p in ps {
                v.visit_pattern(p);
            }
        }
        PatKind::List { elements, rest } => {
            for p in elements {
                v.visit_pattern(p);
            }
            if let Some(r) = rest {
                v.visit_pattern(r);
            }
        }
        PatKind::Record { fields, .. } => {
            for (_, sub) in fields {
                if let Some(p) = sub {
                    v.visit_pattern(p);
                }
            }
        }
    }
}

pub fn walk_type<V: Visitor>(v: &mut V, ty: &TypeExpr) {
    match &ty.kind {
        TypeExprKind::Named { args, .. } => {
            for a in args {
                v.visit_type(a);
            }
        }
        TypeExprKind::Tuple(items) => {
            for t in items {
                v.visit_type(t);
            }
        }
        TypeExprKind::Record { fields, .. } => {
            for (_, t) in fields {
                v.visit_type(t);
            }
        }
        TypeExprKind::Func { params, ret } => {
            for t in params {
                v.visit_type(t);
            }
            v.visit_type(ret);
        }
        TypeExprKind::Union(items) => {
            for t in items {
                v.visit_type(t);
            }
        }
        TypeExprKind::Forall { constraints, body, .. } => {
            for c in constraints {
                for a in &c.args {
                    v.visit_type(a);
                }
            }
            v.visit_type(body);
        }
    }
}

pub fn walk_function_decl<V: Visitor>(v: &mut V, decl: &FunctionDecl) {
    for param in &decl.params {
        if let Some(ty) = &param.ty {
            v.visit_type(ty);
        }
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    if let Some(ret) = &decl.ret {
        v.visit_type(ret);
    }
    v.visit_expr(&decl.body);
}

pub fn walk_trait_decl<V: Visitor>(v: &mut V, decl: &TraitDecl) {
    for method in &decl.methods {
        for param in &method.params {
            if let Some(ty) = &param.ty {
                v.visit_type(ty);
            }
        }
        if let Some(ret) = &method.ret {
            v.visit_type(ret);
        }
        if let Some(body) = &method.default_body {
            v.visit_expr(body);
        }
    }
}

pub fn walk_instance_decl<V: Visitor>(v: &mut V, decl: &InstanceDecl) {
    for arg in &decl.args {
        v.visit_type(arg);
    }
    for method in &decl.methods {
        v.visit_function_decl(method);
    }
}

pub fn walk_type_decl<V: Visitor>(v: &mut V, decl: &TypeDecl) {
    match &decl.body {
        TypeDeclBody::Alias(ty) => v.visit_type(ty),
        TypeDeclBody::Adt(ctors) => {
            for ctor in ctors {
                for field in &ctor.fields {
                    v.visit_type(field);
                }
            }
        }
    }
}
