//! Unification engine.
//!
//! Owns the `ena` union-find table, level bookkeeping for let
//! generalization, the occurs check, and structural unification including
//! row-polymorphic records and union set semantics. Errors are returned to
//! the caller (which attaches source positions), never thrown.

use ena::unify::InPlaceUnificationTable;
use rustc_hash::FxHashMap;

use crate::ty::{Constraint, Kind, Scheme, Ty, TyVar};

/// A structural unification failure.
#[derive(Clone, Debug)]
pub enum UnifyError {
    Mismatch { expected: Ty, found: Ty },
    ArityMismatch { expected: usize, found: usize },
    InfiniteType { var: TyVar, ty: Ty },
    /// A record without a row variable was asked to grow a field.
    MissingField { field: String, record: Ty },
}

impl std::fmt::Display for UnifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnifyError::Mismatch { expected, found } => {
                write!(f, "type mismatch: expected `{expected}`, found `{found}`")
            }
            UnifyError::ArityMismatch { expected, found } => {
                write!(f, "arity mismatch: expected {expected} arguments, found {found}")
            }
            UnifyError::InfiniteType { ty, .. } => {
                write!(f, "infinite type: a variable occurs in `{ty}`")
            }
            UnifyError::MissingField { field, record } => {
                write!(f, "record `{record}` has no field `{field}` and no row to extend")
            }
        }
    }
}

/// The inference context: union-find table, variable kinds and levels.
pub struct InferCtx {
    table: InPlaceUnificationTable<TyVar>,
    /// Kind of each variable, indexed by `TyVar.0`.
    var_kinds: Vec<Kind>,
    /// Level at which each variable was created, indexed by `TyVar.0`.
    var_levels: Vec<u32>,
    current_level: u32,
    /// Counter for quantified-variable names produced by generalization.
    name_counter: u32,
}

impl InferCtx {
    pub fn new() -> Self {
        InferCtx {
            table: InPlaceUnificationTable::new(),
            var_kinds: Vec::new(),
            var_levels: Vec::new(),
            current_level: 0,
            name_counter: 0,
        }
    }

    // ── Variables ───────────────────────────────────────────────────────

    /// A fresh unification variable of the given kind at the current level.
    pub fn fresh_var_kinded(&mut self, kind: Kind) -> TyVar {
        let var = self.table.new_key(None);
        while self.var_kinds.len() <= var.0 as usize {
            self.var_kinds.push(Kind::Star);
            self.var_levels.push(0);
        }
        self.var_kinds[var.0 as usize] = kind;
        self.var_levels[var.0 as usize] = self.current_level;
        var
    }

    /// A fresh `*`-kinded variable as a type.
    pub fn fresh_var(&mut self) -> Ty {
        Ty::Var(self.fresh_var_kinded(Kind::Star))
    }

    /// A fresh row variable for an open record.
    pub fn fresh_row(&mut self) -> TyVar {
        self.fresh_var_kinded(Kind::Star)
    }

    pub fn kind_of_var(&self, var: TyVar) -> Kind {
        self.var_kinds
            .get(var.0 as usize)
            .cloned()
            .unwrap_or(Kind::Star)
    }

    // ── Levels ──────────────────────────────────────────────────────────

    pub fn enter_level(&mut self) {
        self.current_level += 1;
    }

    pub fn leave_level(&mut self) {
        debug_assert!(self.current_level > 0, "cannot leave level 0");
        self.current_level -= 1;
    }

    // ── Snapshots (for trial unification in instance selection) ────────

    pub fn snapshot(&mut self) -> ena::unify::Snapshot<ena::unify::InPlace<TyVar>> {
        self.table.snapshot()
    }

    pub fn rollback_to(&mut self, snapshot: ena::unify::Snapshot<ena::unify::InPlace<TyVar>>) {
        self.table.rollback_to(snapshot);
    }

    pub fn commit(&mut self, snapshot: ena::unify::Snapshot<ena::unify::InPlace<TyVar>>) {
        self.table.commit(snapshot);
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Deep-resolve a type through the union-find table. Open records
    /// whose row variable has been bound are merged flat.
    pub fn resolve(&mut self, ty: Ty) -> Ty {
        match ty {
            Ty::Var(v) => match self.table.probe_value(v) {
                Some(inner) => self.resolve(inner),
                None => Ty::Var(self.table.find(v)),
            },
            Ty::App(head, args) => {
                let head = Box::new(self.resolve(*head));
                let args = args.into_iter().map(|a| self.resolve(a)).collect();
                Ty::App(head, args)
            }
            Ty::Func { params, ret, variadic, default_count } => Ty::Func {
                params: params.into_iter().map(|p| self.resolve(p)).collect(),
                ret: Box::new(self.resolve(*ret)),
                variadic,
                default_count,
            },
            Ty::Record { fields, row } => self.resolve_record(fields, row),
            Ty::Tuple(items) => {
                Ty::Tuple(items.into_iter().map(|t| self.resolve(t)).collect())
            }
            Ty::Union(members) => {
                let mut out: Vec<Ty> = Vec::new();
                for m in members {
                    let m = self.resolve(m);
                    // Flatten nested unions and drop duplicates.
                    match m {
                        Ty::Union(inner) => {
                            for i in inner {
                                if !out.contains(&i) {
                                    out.push(i);
                                }
                            }
                        }
                        other => {
                            if !out.contains(&other) {
                                out.push(other);
                            }
                        }
                    }
                }
                if out.len() == 1 {
                    out.pop().unwrap()
                } else {
                    Ty::Union(out)
                }
            }
            other => other,
        }
    }

    fn resolve_record(
        &mut self,
        fields: std::collections::BTreeMap<String, Ty>,
        row: Option<TyVar>,
    ) -> Ty {
        let mut merged: std::collections::BTreeMap<String, Ty> = fields
            .into_iter()
            .map(|(name, ty)| {
                let ty = self.resolve(ty);
                (name, ty)
            })
            .collect();
        let mut row = row;
        while let Some(v) = row {
            match self.table.probe_value(v) {
                Some(Ty::Record { fields: ext, row: next }) => {
                    for (name, ty) in ext {
                        let ty = self.resolve(ty);
                        merged.entry(name).or_insert(ty);
                    }
                    row = next;
                }
                Some(_) | None => {
                    row = Some(self.table.find(v));
                    break;
                }
            }
        }
        Ty::Record { fields: merged, row }
    }

    // ── Occurs check ────────────────────────────────────────────────────

    pub fn occurs_in(&mut self, var: TyVar, ty: &Ty) -> bool {
        match ty {
            Ty::Var(v) => {
                if self.table.unioned(*v, var) {
                    return true;
                }
                match self.table.probe_value(*v) {
                    Some(inner) => self.occurs_in(var, &inner),
                    None => false,
                }
            }
            Ty::Rigid(..) | Ty::Con(_) => false,
            Ty::App(head, args) => {
                self.occurs_in(var, head) || args.iter().any(|a| {
                    let a = a.clone();
                    self.occurs_in(var, &a)
                })
            }
            Ty::Func { params, ret, .. } => {
                params.iter().any(|p| {
                    let p = p.clone();
                    self.occurs_in(var, &p)
                }) || self.occurs_in(var, ret)
            }
            Ty::Record { fields, row } => {
                if let Some(r) = row {
                    if self.table.unioned(*r, var) {
                        return true;
                    }
                    if let Some(bound) = self.table.probe_value(*r) {
                        if self.occurs_in(var, &bound) {
                            return true;
                        }
                    }
                }
                fields.values().any(|t| {
                    let t = t.clone();
                    self.occurs_in(var, &t)
                })
            }
            Ty::Tuple(items) | Ty::Union(items) => items.iter().any(|t| {
                let t = t.clone();
                self.occurs_in(var, &t)
            }),
        }
    }

    // ── Unification ─────────────────────────────────────────────────────

    /// Unify two types, binding variables in the table.
    pub fn unify(&mut self, a: Ty, b: Ty) -> Result<(), UnifyError> {
        let a = self.resolve(a);
        let b = self.resolve(b);

        match (a, b) {
            (Ty::Var(v1), Ty::Var(v2)) if v1 == v2 => Ok(()),
            (Ty::Var(v1), Ty::Var(v2)) => {
                self.table
                    .unify_var_var(v1, v2)
                    .expect("two unbound vars always unify");
                Ok(())
            }
            (Ty::Var(v), ty) | (ty, Ty::Var(v)) => {
                if self.occurs_in(v, &ty) {
                    return Err(UnifyError::InfiniteType { var: v, ty });
                }
                self.table
                    .unify_var_value(v, Some(ty))
                    .expect("binding an unbound var after occurs check cannot fail");
                Ok(())
            }

            (Ty::Rigid(n1, _), Ty::Rigid(n2, _)) if n1 == n2 => Ok(()),
            (Ty::Con(n1), Ty::Con(n2)) if n1 == n2 => Ok(()),

            (Ty::App(h1, a1), Ty::App(h2, a2)) => {
                // Curried view: `m<a>` unifies with `Result<e, a>` by
                // solving `m := Result<e>`. The shorter application's head
                // absorbs the longer one's leading arguments.
                if a1.len() == a2.len() {
                    self.unify(*h1, *h2)?;
                    for (x, y) in a1.into_iter().zip(a2) {
                        self.unify(x, y)?;
                    }
                    Ok(())
                } else if a1.len() < a2.len() {
                    let split = a2.len() - a1.len();
                    let leading = a2[..split].to_vec();
                    let trailing = a2[split..].to_vec();
                    self.unify(*h1, Ty::App(h2, leading))?;
                    for (x, y) in a1.into_iter().zip(trailing) {
                        self.unify(x, y)?;
                    }
                    Ok(())
                } else {
                    let split = a1.len() - a2.len();
                    let leading = a1[..split].to_vec();
                    let trailing = a1[split..].to_vec();
                    self.unify(Ty::App(h1, leading), *h2)?;
                    for (x, y) in trailing.into_iter().zip(a2) {
                        self.unify(x, y)?;
                    }
                    Ok(())
                }
            }

            (
                Ty::Func { params: p1, ret: r1, .. },
                Ty::Func { params: p2, ret: r2, .. },
            ) => {
                if p1.len() != p2.len() {
                    return Err(UnifyError::ArityMismatch {
                        expected: p1.len(),
                        found: p2.len(),
                    });
                }
                for (x, y) in p1.into_iter().zip(p2) {
                    self.unify(x, y)?;
                }
                self.unify(*r1, *r2)
            }

            (Ty::Tuple(t1), Ty::Tuple(t2)) => {
                if t1.len() != t2.len() {
                    return Err(UnifyError::ArityMismatch {
                        expected: t1.len(),
                        found: t2.len(),
                    });
                }
                for (x, y) in t1.into_iter().zip(t2) {
                    self.unify(x, y)?;
                }
                Ok(())
            }

            (
                Ty::Record { fields: f1, row: r1 },
                Ty::Record { fields: f2, row: r2 },
            ) => self.unify_records(f1, r1, f2, r2),

            (Ty::Union(m1), Ty::Union(m2)) => self.unify_unions(m1, m2),
            (ty, Ty::Union(members)) | (Ty::Union(members), ty) => {
                self.unify_into_union(ty, members)
            }

            (a, b) => Err(UnifyError::Mismatch { expected: a, found: b }),
        }
    }

    /// Row-polymorphic record unification.
    ///
    /// Shared fields unify pointwise; fields present on only one side
    /// extend the other side's row variable. A closed record (no row)
    /// cannot grow.
    fn unify_records(
        &mut self,
        f1: std::collections::BTreeMap<String, Ty>,
        r1: Option<TyVar>,
        f2: std::collections::BTreeMap<String, Ty>,
        r2: Option<TyVar>,
    ) -> Result<(), UnifyError> {
        // Common fields.
        for (name, t1) in &f1 {
            if let Some(t2) = f2.get(name) {
                self.unify(t1.clone(), t2.clone())?;
            }
        }

        let only_1: std::collections::BTreeMap<String, Ty> = f1
            .iter()
            .filter(|(name, _)| !f2.contains_key(*name))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        let only_2: std::collections::BTreeMap<String, Ty> = f2
            .iter()
            .filter(|(name, _)| !f1.contains_key(*name))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();

        match (only_1.is_empty(), only_2.is_empty()) {
            (true, true) => match (r1, r2) {
                (None, None) => Ok(()),
                (Some(v), None) | (None, Some(v)) => {
                    // The open side closes over no extra fields.
                    let empty = Ty::Record {
                        fields: Default::default(),
                        row: None,
                    };
                    self.bind_row(v, empty)
                }
                (Some(v1), Some(v2)) => {
                    if v1 != v2 {
                        self.table
                            .unify_var_var(v1, v2)
                            .expect("row vars always unify");
                    }
                    Ok(())
                }
            },
            _ => {
                // Each side's extra fields flow into the other side's row.
                let shared_rest = if r1.is_some() && r2.is_some() {
                    Some(self.fresh_row())
                } else {
                    None
                };

                if !only_2.is_empty() {
                    let Some(v1) = r1 else {
                        let (field, _) = only_2.into_iter().next().unwrap();
                        return Err(UnifyError::MissingField {
                            field,
                            record: Ty::Record { fields: f1, row: r1 },
                        });
                    };
                    let ext = Ty::Record { fields: only_2, row: shared_rest };
                    self.bind_row(v1, ext)?;
                } else if let (Some(v1), Some(rest)) = (r1, shared_rest) {
                    self.bind_row(v1, Ty::Record { fields: Default::default(), row: Some(rest) })?;
                }

                if !only_1.is_empty() {
                    let Some(v2) = r2 else {
                        let (field, _) = only_1.into_iter().next().unwrap();
                        return Err(UnifyError::MissingField {
                            field,
                            record: Ty::Record { fields: f2, row: r2 },
                        });
                    };
                    let ext = Ty::Record { fields: only_1, row: shared_rest };
                    self.bind_row(v2, ext)?;
                } else if let (Some(v2), Some(rest)) = (r2, shared_rest) {
                    self.bind_row(v2, Ty::Record { fields: Default::default(), row: Some(rest) })?;
                }

                Ok(())
            }
        }
    }

    fn bind_row(&mut self, var: TyVar, ext: Ty) -> Result<(), UnifyError> {
        if self.occurs_in(var, &ext) {
            return Err(UnifyError::InfiniteType { var, ty: ext });
        }
        match self.table.probe_value(var) {
            None => {
                self.table
                    .unify_var_value(var, Some(ext))
                    .expect("binding an unbound row var cannot fail");
                Ok(())
            }
            Some(existing) => self.unify(existing, ext),
        }
    }

    /// Union ~ union: the smaller member set must embed into the larger.
    fn unify_unions(&mut self, m1: Vec<Ty>, m2: Vec<Ty>) -> Result<(), UnifyError> {
        let (small, large) = if m1.len() <= m2.len() { (m1.clone(), m2.clone()) } else { (m2.clone(), m1.clone()) };
        for member in &small {
            if !self.try_match_member(member, &large) {
                return Err(UnifyError::Mismatch {
                    expected: Ty::Union(m1),
                    found: Ty::Union(m2),
                });
            }
        }
        Ok(())
    }

    /// Non-union ~ union: the type must match one member (widening).
    fn unify_into_union(&mut self, ty: Ty, members: Vec<Ty>) -> Result<(), UnifyError> {
        if self.try_match_member(&ty, &members) {
            Ok(())
        } else {
            Err(UnifyError::Mismatch {
                expected: Ty::Union(members),
                found: ty,
            })
        }
    }

    /// Attempt to unify `ty` against some member, keeping only the first
    /// successful attempt's bindings.
    fn try_match_member(&mut self, ty: &Ty, members: &[Ty]) -> bool {
        for member in members {
            let snapshot = self.snapshot();
            match self.unify(ty.clone(), member.clone()) {
                Ok(()) => {
                    self.commit(snapshot);
                    return true;
                }
                Err(_) => {
                    self.rollback_to(snapshot);
                }
            }
        }
        false
    }

    // ── Generalization & instantiation ──────────────────────────────────

    /// Generalize a type (and its pending constraints) over the variables
    /// created at deeper levels than the current one.
    pub fn generalize(&mut self, ty: Ty, constraints: Vec<Constraint>) -> Scheme {
        let resolved = self.resolve(ty);
        let constraints: Vec<Constraint> = constraints
            .into_iter()
            .map(|c| Constraint {
                trait_name: c.trait_name,
                args: c.args.into_iter().map(|a| self.resolve(a)).collect(),
            })
            .collect();

        let mut ordered = Vec::new();
        self.collect_generalizable(&resolved, &mut ordered);
        for c in &constraints {
            for a in &c.args {
                self.collect_generalizable(a, &mut ordered);
            }
        }

        let mut seen = std::collections::HashSet::new();
        ordered.retain(|v| seen.insert(*v));

        let mut vars = Vec::new();
        let mut row_vars = Vec::new();
        let mut mapping: FxHashMap<TyVar, Ty> = FxHashMap::default();
        for v in ordered {
            if self.is_row_position(v, &resolved) {
                row_vars.push(v);
            } else {
                let name = self.fresh_name();
                let kind = self.kind_of_var(v);
                mapping.insert(v, Ty::Rigid(name.clone(), kind.clone()));
                vars.push((name, kind));
            }
        }

        let ty = subst_vars(&resolved, &mapping);
        let constraints = constraints
            .into_iter()
            .map(|c| Constraint {
                trait_name: c.trait_name,
                args: c.args.iter().map(|a| subst_vars(a, &mapping)).collect(),
            })
            .collect();

        Scheme { vars, row_vars, constraints, ty }
    }

    /// Whether `v` appears (only) as a record row in `ty`.
    fn is_row_position(&self, v: TyVar, ty: &Ty) -> bool {
        fn in_row(v: TyVar, ty: &Ty) -> bool {
            match ty {
                Ty::Record { fields, row } => {
                    row == &Some(v) || fields.values().any(|t| in_row(v, t))
                }
                Ty::App(head, args) => in_row(v, head) || args.iter().any(|a| in_row(v, a)),
                Ty::Func { params, ret, .. } => {
                    params.iter().any(|p| in_row(v, p)) || in_row(v, ret)
                }
                Ty::Tuple(items) | Ty::Union(items) => items.iter().any(|t| in_row(v, t)),
                _ => false,
            }
        }
        in_row(v, ty)
    }

    fn collect_generalizable(&mut self, ty: &Ty, out: &mut Vec<TyVar>) {
        match ty {
            Ty::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.collect_generalizable(&inner, out),
                None => {
                    let root = self.table.find(*v);
                    let level = self
                        .var_levels
                        .get(root.0 as usize)
                        .copied()
                        .unwrap_or(0);
                    if level > self.current_level {
                        out.push(root);
                    }
                }
            },
            Ty::Rigid(..) | Ty::Con(_) => {}
            Ty::App(head, args) => {
                self.collect_generalizable(head, out);
                for a in args {
                    let a = a.clone();
                    self.collect_generalizable(&a, out);
                }
            }
            Ty::Func { params, ret, .. } => {
                for p in params {
                    let p = p.clone();
                    self.collect_generalizable(&p, out);
                }
                self.collect_generalizable(ret, out);
            }
            Ty::Record { fields, row } => {
                for t in fields.values() {
                    let t = t.clone();
                    self.collect_generalizable(&t, out);
                }
                if let Some(v) = row {
                    let ty = Ty::Var(*v);
                    self.collect_generalizable(&ty, out);
                }
            }
            Ty::Tuple(items) | Ty::Union(items) => {
                for t in items {
                    let t = t.clone();
                    self.collect_generalizable(&t, out);
                }
            }
        }
    }

    fn fresh_name(&mut self) -> String {
        let n = self.name_counter;
        self.name_counter += 1;
        // a, b, ..., z, t26, t27, ...
        if n < 26 {
            ((b'a' + n as u8) as char).to_string()
        } else {
            format!("t{n}")
        }
    }

    /// Instantiate a scheme: each quantified rigid becomes a fresh
    /// unification variable, each quantified row var is freshened, and the
    /// constraints are returned with the same substitution applied.
    pub fn instantiate(&mut self, scheme: &Scheme) -> (Ty, Vec<Constraint>) {
        if scheme.vars.is_empty() && scheme.row_vars.is_empty() {
            return (scheme.ty.clone(), scheme.constraints.clone());
        }

        let rigid_map: FxHashMap<String, Ty> = scheme
            .vars
            .iter()
            .map(|(name, kind)| {
                let v = self.fresh_var_kinded(kind.clone());
                (name.clone(), Ty::Var(v))
            })
            .collect();
        let row_map: FxHashMap<TyVar, TyVar> = scheme
            .row_vars
            .iter()
            .map(|v| (*v, self.fresh_row()))
            .collect();

        let ty = subst_scheme(&scheme.ty, &rigid_map, &row_map);
        let constraints = scheme
            .constraints
            .iter()
            .map(|c| Constraint {
                trait_name: c.trait_name.clone(),
                args: c
                    .args
                    .iter()
                    .map(|a| subst_scheme(a, &rigid_map, &row_map))
                    .collect(),
            })
            .collect();
        (ty, constraints)
    }
}

impl Default for InferCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace mapped unification variables with their substitutes.
pub fn subst_vars(ty: &Ty, mapping: &FxHashMap<TyVar, Ty>) -> Ty {
    match ty {
        Ty::Var(v) => mapping.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Ty::Rigid(..) | Ty::Con(_) => ty.clone(),
        Ty::App(head, args) => Ty::App(
            Box::new(subst_vars(head, mapping)),
            args.iter().map(|a| subst_vars(a, mapping)).collect(),
        ),
        Ty::Func { params, ret, variadic, default_count } => Ty::Func {
            params: params.iter().map(|p| subst_vars(p, mapping)).collect(),
            ret: Box::new(subst_vars(ret, mapping)),
            variadic: *variadic,
            default_count: *default_count,
        },
        Ty::Record { fields, row } => Ty::Record {
            fields: fields
                .iter()
                .map(|(n, t)| (n.clone(), subst_vars(t, mapping)))
                .collect(),
            row: *row,
        },
        Ty::Tuple(items) => Ty::Tuple(items.iter().map(|t| subst_vars(t, mapping)).collect()),
        Ty::Union(items) => Ty::Union(items.iter().map(|t| subst_vars(t, mapping)).collect()),
    }
}

/// Replace quantified rigids by name and freshen quantified row variables.
pub fn subst_scheme(
    ty: &Ty,
    rigids: &FxHashMap<String, Ty>,
    rows: &FxHashMap<TyVar, TyVar>,
) -> Ty {
    match ty {
        Ty::Rigid(name, _) => rigids.get(name).cloned().unwrap_or_else(|| ty.clone()),
        Ty::Var(v) => Ty::Var(rows.get(v).copied().unwrap_or(*v)),
        Ty::Con(_) => ty.clone(),
        Ty::App(head, args) => Ty::App(
            Box::new(subst_scheme(head, rigids, rows)),
            args.iter().map(|a| subst_scheme(a, rigids, rows)).collect(),
        ),
        Ty::Func { params, ret, variadic, default_count } => Ty::Func {
            params: params.iter().map(|p| subst_scheme(p, rigids, rows)).collect(),
            ret: Box::new(subst_scheme(ret, rigids, rows)),
            variadic: *variadic,
            default_count: *default_count,
        },
        Ty::Record { fields, row } => Ty::Record {
            fields: fields
                .iter()
                .map(|(n, t)| (n.clone(), subst_scheme(t, rigids, rows)))
                .collect(),
            row: row.map(|v| rows.get(&v).copied().unwrap_or(v)),
        },
        Ty::Tuple(items) => {
            Ty::Tuple(items.iter().map(|t| subst_scheme(t, rigids, rows)).collect())
        }
        Ty::Union(items) => {
            Ty::Union(items.iter().map(|t| subst_scheme(t, rigids, rows)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn unify_two_fresh_vars_then_bind() {
        let mut ctx = InferCtx::new();
        let a = ctx.fresh_var();
        let b = ctx.fresh_var();
        ctx.unify(a.clone(), b.clone()).unwrap();
        ctx.unify(a.clone(), Ty::int()).unwrap();
        assert_eq!(ctx.resolve(a), Ty::int());
        assert_eq!(ctx.resolve(b), Ty::int());
    }

    #[test]
    fn unify_a_with_itself_binds_nothing() {
        let mut ctx = InferCtx::new();
        let a = ctx.fresh_var();
        ctx.unify(a.clone(), a.clone()).unwrap();
        assert!(matches!(ctx.resolve(a), Ty::Var(_)));
    }

    #[test]
    fn unify_mismatch() {
        let mut ctx = InferCtx::new();
        let err = ctx.unify(Ty::int(), Ty::string()).unwrap_err();
        assert!(matches!(err, UnifyError::Mismatch { .. }));
    }

    #[test]
    fn occurs_check_rejects_infinite_type() {
        let mut ctx = InferCtx::new();
        let a = ctx.fresh_var();
        let fun = Ty::func(vec![a.clone()], Ty::int());
        let err = ctx.unify(a, fun).unwrap_err();
        assert!(matches!(err, UnifyError::InfiniteType { .. }));
    }

    #[test]
    fn function_arity_mismatch() {
        let mut ctx = InferCtx::new();
        let f1 = Ty::func(vec![Ty::int()], Ty::int());
        let f2 = Ty::func(vec![Ty::int(), Ty::int()], Ty::int());
        let err = ctx.unify(f1, f2).unwrap_err();
        assert!(matches!(err, UnifyError::ArityMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn rigid_unifies_only_with_itself() {
        let mut ctx = InferCtx::new();
        let a = Ty::Rigid("a".into(), Kind::Star);
        ctx.unify(a.clone(), a.clone()).unwrap();
        assert!(ctx.unify(a, Ty::int()).is_err());
    }

    #[test]
    fn row_unification_extends_both_sides() {
        let mut ctx = InferCtx::new();
        let r1 = ctx.fresh_row();
        let r2 = ctx.fresh_row();

        let mut f1 = BTreeMap::new();
        f1.insert("x".to_string(), Ty::int());
        let rec1 = Ty::Record { fields: f1, row: Some(r1) };

        let mut f2 = BTreeMap::new();
        f2.insert("y".to_string(), Ty::bool());
        let rec2 = Ty::Record { fields: f2, row: Some(r2) };

        ctx.unify(rec1.clone(), rec2).unwrap();
        let resolved = ctx.resolve(rec1);
        let Ty::Record { fields, row } = resolved else { panic!() };
        assert_eq!(fields.get("x"), Some(&Ty::int()));
        assert_eq!(fields.get("y"), Some(&Ty::bool()));
        assert!(row.is_some(), "shared tail row should remain open");
    }

    #[test]
    fn closed_record_rejects_extension() {
        let mut ctx = InferCtx::new();
        let mut f1 = BTreeMap::new();
        f1.insert("x".to_string(), Ty::int());
        let closed = Ty::Record { fields: f1, row: None };

        let mut f2 = BTreeMap::new();
        f2.insert("x".to_string(), Ty::int());
        f2.insert("y".to_string(), Ty::bool());
        let bigger = Ty::Record { fields: f2, row: None };

        let err = ctx.unify(closed, bigger).unwrap_err();
        assert!(matches!(err, UnifyError::MissingField { .. }));
    }

    #[test]
    fn nullable_union_accepts_member() {
        let mut ctx = InferCtx::new();
        let nullable_int = Ty::Union(vec![Ty::int(), Ty::nil()]);
        ctx.unify(Ty::int(), nullable_int.clone()).unwrap();
        ctx.unify(Ty::nil(), nullable_int.clone()).unwrap();
        assert!(ctx.unify(Ty::string(), nullable_int).is_err());
    }

    #[test]
    fn union_set_semantics_ignore_order() {
        let mut ctx = InferCtx::new();
        let u1 = Ty::Union(vec![Ty::int(), Ty::nil()]);
        let u2 = Ty::Union(vec![Ty::nil(), Ty::int()]);
        ctx.unify(u1, u2).unwrap();
    }

    #[test]
    fn generalize_then_instantiate_fresh() {
        let mut ctx = InferCtx::new();
        ctx.enter_level();
        let a = ctx.fresh_var();
        let identity = Ty::func(vec![a.clone()], a);
        ctx.leave_level();

        let scheme = ctx.generalize(identity, Vec::new());
        assert_eq!(scheme.vars.len(), 1);

        let (inst1, _) = ctx.instantiate(&scheme);
        let (inst2, _) = ctx.instantiate(&scheme);
        let (Ty::Func { params: p1, .. }, Ty::Func { params: p2, .. }) = (inst1, inst2)
        else {
            panic!("expected function types");
        };
        assert_ne!(p1[0], p2[0], "instantiations must not share variables");
    }

    #[test]
    fn generalize_keeps_outer_vars_mono() {
        let mut ctx = InferCtx::new();
        let outer = ctx.fresh_var();
        ctx.enter_level();
        let inner = ctx.fresh_var();
        let ty = Ty::func(vec![outer.clone(), inner.clone()], inner);
        ctx.leave_level();
        let scheme = ctx.generalize(ty, Vec::new());
        assert_eq!(scheme.vars.len(), 1, "only the inner var generalizes");
    }
}
