//! Pattern elaboration and the exhaustiveness check.
//!
//! Pattern elaboration unifies each pattern against the scrutinee type and
//! introduces bindings into the current scope. Exhaustiveness enumerates
//! constructors for sum-typed scrutinees: a clause set covers a type iff
//! every constructor is matched by at least one clause whose sub-patterns
//! are themselves exhaustive. Open types (atoms, numbers, strings, free
//! variables) require a wildcard or binder. Clauses past the point where
//! the prefix already covers everything are reported as warnings.

use smol_str::SmolStr;
use std::collections::HashMap;
use vaisto_ast::{Literal, Loc, MatchArm, PatternId, PatternKind};
use vaisto_diag::{Code, Diagnostic};
use vaisto_types::{rename, Scheme, Ty, TyVarId};

use crate::typed::TPattern;
use crate::Elaborator;

impl<'a> Elaborator<'a> {
    // ── Pattern elaboration ──────────────────────────────────────

    pub(crate) fn check_pattern(&mut self, pid: PatternId, expected: &Ty) -> TPattern {
        let pat = self.module.patterns[pid].clone();
        let loc = pat.loc;
        match &pat.kind {
            PatternKind::Wildcard => TPattern::Wildcard,
            PatternKind::Var(name) => {
                let ty = self.subst.apply(expected);
                self.define(name.clone(), Scheme::mono(ty));
                TPattern::Var(name.clone())
            }
            PatternKind::Literal(Literal::Int(n)) => {
                self.unify(expected, &Ty::Int, loc);
                TPattern::Int(*n)
            }
            PatternKind::Literal(Literal::Float(x)) => {
                self.unify(expected, &Ty::Float, loc);
                TPattern::Float(*x)
            }
            PatternKind::Literal(Literal::String(s)) => {
                self.unify(expected, &Ty::Str, loc);
                TPattern::Str(s.clone())
            }
            PatternKind::Literal(Literal::Bool(b)) => {
                self.unify(expected, &Ty::Bool, loc);
                TPattern::Bool(*b)
            }
            PatternKind::Atom(a) => {
                // An atom pattern widens a free scrutinee to the universal
                // atom type so sibling clauses can match other atoms. A
                // singleton-typed scrutinee accepts any atom pattern (the
                // clause may simply never match).
                match self.subst.apply(expected) {
                    Ty::Var(_) => {
                        self.unify(expected, &Ty::Atom, loc);
                    }
                    Ty::Atom | Ty::AtomLit(_) | Ty::Any => {}
                    other => {
                        self.unify(&other, &Ty::AtomLit(a.clone()), loc);
                    }
                }
                TPattern::Atom(a.clone())
            }
            PatternKind::Constructor { name, args } => self.check_ctor_pattern(name, args, expected, loc),
            PatternKind::EmptyList => {
                let elem = self.fresh();
                self.unify_code(expected, &Ty::List(Box::new(elem)), loc, Code::NotAList);
                TPattern::EmptyList
            }
            PatternKind::Cons { head, tail } => {
                let applied = self.subst.apply(expected);
                match applied {
                    Ty::List(_) | Ty::Var(_) | Ty::Any => {}
                    other => {
                        self.error(
                            Code::ConsMismatch,
                            format!("cons pattern requires a list, got {}", other),
                            loc,
                        );
                        let h = self.check_pattern(*head, &Ty::Any);
                        let t = self.check_pattern(*tail, &Ty::Any);
                        return TPattern::Cons {
                            head: Box::new(h),
                            tail: Box::new(t),
                        };
                    }
                }
                let elem = self.fresh();
                self.unify_code(
                    expected,
                    &Ty::List(Box::new(elem.clone())),
                    loc,
                    Code::ConsMismatch,
                );
                let h = self.check_pattern(*head, &elem);
                let t = self.check_pattern(*tail, &Ty::List(Box::new(elem)));
                TPattern::Cons {
                    head: Box::new(h),
                    tail: Box::new(t),
                }
            }
            PatternKind::Tuple(elems) => {
                let elem_tys: Vec<Ty> = elems.iter().map(|_| self.fresh()).collect();
                self.unify(expected, &Ty::Tuple(elem_tys.clone()), loc);
                let tpats = elems
                    .iter()
                    .zip(elem_tys.iter())
                    .map(|(&p, t)| self.check_pattern(p, t))
                    .collect();
                TPattern::Tuple(tpats)
            }
        }
    }

    fn check_ctor_pattern(
        &mut self,
        name: &SmolStr,
        args: &[PatternId],
        expected: &Ty,
        loc: Loc,
    ) -> TPattern {
        let Some(ctor) = self.tables.ctors.get(name).cloned() else {
            let mut diag = Diagnostic::error(
                Code::UndefinedVariable,
                format!("undefined constructor `{}`", name),
                loc,
            );
            let ctors: Vec<&str> = self.tables.ctors.keys().map(|s| s.as_str()).collect();
            if let Some(s) = vaisto_diag::suggest(name, ctors) {
                diag = diag.with_hint(format!("did you mean `{}`?", s));
            }
            self.push_diag(diag);
            let targs = args.iter().map(|&p| self.check_pattern(p, &Ty::Any)).collect();
            return TPattern::Ctor {
                name: name.clone(),
                args: targs,
            };
        };
        let (field_tys, result) = self.instantiate_ctor(&ctor);
        self.unify(expected, &result, loc);
        if args.len() != field_tys.len() {
            self.error(
                Code::Arity,
                format!(
                    "pattern `{}` expects {} argument(s), got {}",
                    name,
                    field_tys.len(),
                    args.len()
                ),
                loc,
            );
        }
        let targs = args
            .iter()
            .zip(field_tys.iter())
            .map(|(&p, t)| self.check_pattern(p, t))
            .collect();
        TPattern::Ctor {
            name: name.clone(),
            args: targs,
        }
    }

    // ── Exhaustiveness ───────────────────────────────────────────

    pub(crate) fn check_match_coverage(
        &mut self,
        patterns: &[PatternId],
        scrut_ty: &Ty,
        match_loc: Loc,
        arms: &[MatchArm],
    ) {
        if let Err(witness) = self.is_exhaustive(patterns, scrut_ty) {
            let diag = Diagnostic::error(
                Code::NonExhaustiveMatch,
                "non-exhaustive match",
                match_loc,
            )
            .with_hint(format!("missing case: {}", witness));
            self.push_diag(diag);
        }
        // Redundancy: clauses after the prefix already covers the type.
        for i in 1..patterns.len() {
            if self.is_exhaustive(&patterns[..i], scrut_ty).is_ok() {
                for arm in &arms[i..] {
                    self.push_diag(Diagnostic::warning(
                        Code::RedundantClause,
                        "redundant match clause",
                        arm.loc,
                    ));
                }
                break;
            }
        }
    }

    /// `Ok(())` when the clause set covers every value of `ty`; otherwise
    /// `Err(witness)` naming an uncovered value.
    fn is_exhaustive(&self, pats: &[PatternId], ty: &Ty) -> Result<(), String> {
        if pats.iter().any(|&p| {
            matches!(
                self.module.patterns[p].kind,
                PatternKind::Wildcard | PatternKind::Var(_)
            )
        }) {
            return Ok(());
        }
        if pats.is_empty() {
            return Err("_".to_string());
        }
        match self.subst.apply(ty) {
            Ty::Bool => {
                let has = |want: bool| {
                    pats.iter().any(|&p| {
                        matches!(
                            self.module.patterns[p].kind,
                            PatternKind::Literal(Literal::Bool(b)) if b == want
                        )
                    })
                };
                if !has(true) {
                    return Err("true".to_string());
                }
                if !has(false) {
                    return Err("false".to_string());
                }
                Ok(())
            }
            Ty::Named { name, args } => {
                if let Some(def) = self.tables.sums.get(&name).cloned() {
                    let tmap: HashMap<TyVarId, Ty> = def
                        .param_vars
                        .iter()
                        .zip(args.iter())
                        .map(|(&v, a)| (v, a.clone()))
                        .collect();
                    for (ctor, fields) in &def.variants {
                        let covering: Vec<&PatternId> = pats
                            .iter()
                            .filter(|&&p| {
                                matches!(
                                    &self.module.patterns[p].kind,
                                    PatternKind::Constructor { name: n, .. } if n == ctor
                                )
                            })
                            .collect();
                        if covering.is_empty() {
                            return Err(ctor_witness(ctor, fields.len(), None, 0));
                        }
                        for (k, fty) in fields.iter().enumerate() {
                            let sub: Vec<PatternId> = covering
                                .iter()
                                .filter_map(|&&p| match &self.module.patterns[p].kind {
                                    PatternKind::Constructor { args, .. } => {
                                        args.get(k).copied()
                                    }
                                    _ => None,
                                })
                                .collect();
                            let field_ty = rename(fty, &tmap, &HashMap::new());
                            if let Err(w) = self.is_exhaustive(&sub, &field_ty) {
                                return Err(ctor_witness(ctor, fields.len(), Some(&w), k));
                            }
                        }
                    }
                    Ok(())
                } else if let Some(rec) = self.tables.recs.get(&name).cloned() {
                    let covering: Vec<&PatternId> = pats
                        .iter()
                        .filter(|&&p| {
                            matches!(
                                &self.module.patterns[p].kind,
                                PatternKind::Constructor { name: n, .. } if *n == name
                            )
                        })
                        .collect();
                    if covering.is_empty() {
                        return Err(ctor_witness(&name, rec.fields.len(), None, 0));
                    }
                    for (k, (_, fty)) in rec.fields.iter().enumerate() {
                        let sub: Vec<PatternId> = covering
                            .iter()
                            .filter_map(|&&p| match &self.module.patterns[p].kind {
                                PatternKind::Constructor { args, .. } => args.get(k).copied(),
                                _ => None,
                            })
                            .collect();
                        if let Err(w) = self.is_exhaustive(&sub, fty) {
                            return Err(ctor_witness(&name, rec.fields.len(), Some(&w), k));
                        }
                    }
                    Ok(())
                } else {
                    // Opaque nominal type: only a wildcard covers it.
                    Err("_".to_string())
                }
            }
            Ty::List(elem) => {
                if !pats
                    .iter()
                    .any(|&p| matches!(self.module.patterns[p].kind, PatternKind::EmptyList))
                {
                    return Err("[]".to_string());
                }
                let cons: Vec<(PatternId, PatternId)> = pats
                    .iter()
                    .filter_map(|&p| match self.module.patterns[p].kind {
                        PatternKind::Cons { head, tail } => Some((head, tail)),
                        _ => None,
                    })
                    .collect();
                if cons.is_empty() {
                    return Err("[_ | _]".to_string());
                }
                let heads: Vec<PatternId> = cons.iter().map(|(h, _)| *h).collect();
                if let Err(w) = self.is_exhaustive(&heads, &elem) {
                    return Err(format!("[{} | _]", w));
                }
                let tails: Vec<PatternId> = cons.iter().map(|(_, t)| *t).collect();
                if let Err(w) = self.is_exhaustive(&tails, &Ty::List(elem)) {
                    return Err(format!("[_ | {}]", w));
                }
                Ok(())
            }
            Ty::Tuple(elems) => {
                let tuples: Vec<Vec<PatternId>> = pats
                    .iter()
                    .filter_map(|&p| match &self.module.patterns[p].kind {
                        PatternKind::Tuple(ps) if ps.len() == elems.len() => Some(ps.clone()),
                        _ => None,
                    })
                    .collect();
                if tuples.is_empty() {
                    return Err(format!(
                        "(tuple{})",
                        " _".repeat(elems.len())
                    ));
                }
                for (k, ety) in elems.iter().enumerate() {
                    let sub: Vec<PatternId> = tuples.iter().map(|ps| ps[k]).collect();
                    if let Err(w) = self.is_exhaustive(&sub, ety) {
                        let mut parts = vec!["_".to_string(); elems.len()];
                        parts[k] = w;
                        return Err(format!("(tuple {})", parts.join(" ")));
                    }
                }
                Ok(())
            }
            // Open types: atoms, numbers, strings, unresolved variables,
            // rows — a wildcard or binder is required.
            _ => Err("_".to_string()),
        }
    }
}

/// Format a missing-case witness for a constructor, optionally embedding a
/// sub-witness at field position `at`.
fn ctor_witness(ctor: &str, arity: usize, sub: Option<&str>, at: usize) -> String {
    if arity == 0 {
        return ctor.to_string();
    }
    let parts: Vec<String> = (0..arity)
        .map(|i| match sub {
            Some(w) if i == at => w.to_string(),
            _ => "_".to_string(),
        })
        .collect();
    format!("({} {})", ctor, parts.join(" "))
}
