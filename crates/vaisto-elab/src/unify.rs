//! First-order unification with occurs check, plus row unification for
//! structural record access. Errors are accumulated on the elaborator;
//! callers pick a more specific code with `unify_code` when the generic
//! "type mismatch" would lose information.

use smol_str::SmolStr;
use vaisto_ast::Loc;
use vaisto_diag::{Code, Diagnostic};
use vaisto_types::{RowTail, Ty, TyVarId};

use crate::Elaborator;

impl<'a> Elaborator<'a> {
    /// Unify under a specific diagnostic code for the outermost failure.
    pub(crate) fn unify_code(&mut self, a: &Ty, b: &Ty, loc: Loc, code: Code) -> bool {
        let prev = self.mismatch_code.replace(code);
        let ok = self.unify(a, b, loc);
        self.mismatch_code = prev;
        ok
    }

    pub(crate) fn unify(&mut self, a: &Ty, b: &Ty, loc: Loc) -> bool {
        let a = self.subst.apply(a);
        let b = self.subst.apply(b);

        if a == b {
            return true;
        }

        match (&a, &b) {
            (Ty::Any, _) | (_, Ty::Any) => true,

            (Ty::Var(id), _) => self.bind_var(*id, &b, loc),
            (_, Ty::Var(id)) => self.bind_var(*id, &a, loc),

            // Atoms are one runtime family: singletons widen into the
            // universal atom type, and two distinct singletons join there.
            (Ty::Atom, Ty::AtomLit(_)) | (Ty::AtomLit(_), Ty::Atom) => true,
            (Ty::AtomLit(_), Ty::AtomLit(_)) => true,

            (Ty::List(e1), Ty::List(e2)) => self.unify(e1, e2, loc),

            (Ty::Tuple(a1), Ty::Tuple(a2)) if a1.len() == a2.len() => {
                let mut ok = true;
                for (x, y) in a1.iter().zip(a2.iter()) {
                    ok &= self.unify(x, y, loc);
                }
                ok
            }

            (Ty::Fn(p1, r1), Ty::Fn(p2, r2)) if p1.len() == p2.len() => {
                let mut ok = true;
                for (x, y) in p1.iter().zip(p2.iter()) {
                    ok &= self.unify(x, y, loc);
                }
                ok & self.unify(r1, r2, loc)
            }

            (
                Ty::Named {
                    name: n1,
                    args: a1,
                },
                Ty::Named {
                    name: n2,
                    args: a2,
                },
            ) if n1 == n2 && a1.len() == a2.len() => {
                let mut ok = true;
                for (x, y) in a1.iter().zip(a2.iter()) {
                    ok &= self.unify(x, y, loc);
                }
                ok
            }

            (Ty::PidOf { process: p1, .. }, Ty::PidOf { process: p2, .. }) if p1 == p2 => true,
            (Ty::Pid, Ty::PidOf { .. }) | (Ty::PidOf { .. }, Ty::Pid) => true,

            (
                Ty::Row {
                    fields: f1,
                    tail: t1,
                },
                Ty::Row {
                    fields: f2,
                    tail: t2,
                },
            ) => self.unify_rows(f1, *t1, f2, *t2, loc),

            (Ty::Row { fields, tail }, Ty::Named { name, args })
            | (Ty::Named { name, args }, Ty::Row { fields, tail })
                if args.is_empty() =>
            {
                self.unify_row_record(fields, *tail, name, loc)
            }

            _ => self.type_mismatch(&a, &b, loc),
        }
    }

    fn type_mismatch(&mut self, a: &Ty, b: &Ty, loc: Loc) -> bool {
        let code = self.mismatch_code.unwrap_or(Code::TypeMismatch);
        let diag = Diagnostic::error(code, "type mismatch", loc)
            .with_types(a.to_string(), b.to_string());
        self.push_diag(diag);
        false
    }

    fn bind_var(&mut self, id: TyVarId, ty: &Ty, loc: Loc) -> bool {
        let fv = self.subst.free_vars(ty);
        if fv.contains_ty(id) {
            self.error(
                Code::InfiniteType,
                format!("infinite type: ?{} = {}", id, ty),
                loc,
            );
            return false;
        }
        self.subst.bind_ty(id, ty.clone());
        true
    }

    // ── Rows ─────────────────────────────────────────────────────

    /// Partition the labels into common/left-only/right-only, unify the
    /// common field types, and let open tails absorb the rest.
    fn unify_rows(
        &mut self,
        f1: &[(SmolStr, Ty)],
        t1: RowTail,
        f2: &[(SmolStr, Ty)],
        t2: RowTail,
        loc: Loc,
    ) -> bool {
        let mut ok = true;
        let mut left_only: Vec<(SmolStr, Ty)> = Vec::new();
        for (l, ty1) in f1 {
            match f2.iter().find(|(l2, _)| l2 == l) {
                Some((_, ty2)) => ok &= self.unify(ty1, ty2, loc),
                None => left_only.push((l.clone(), ty1.clone())),
            }
        }
        let right_only: Vec<(SmolStr, Ty)> = f2
            .iter()
            .filter(|(l, _)| !f1.iter().any(|(l1, _)| l1 == l))
            .map(|(l, t)| (l.clone(), t.clone()))
            .collect();

        match (left_only.is_empty(), right_only.is_empty()) {
            (true, true) => ok & self.unify_tails(t1, t2),
            (false, true) => ok & self.absorb(t2, left_only, t1, loc),
            (true, false) => ok & self.absorb(t1, right_only, t2, loc),
            (false, false) => {
                let (RowTail::Var(r1), RowTail::Var(r2)) = (t1, t2) else {
                    return self.missing_fields(
                        if matches!(t1, RowTail::Closed) {
                            &right_only
                        } else {
                            &left_only
                        },
                        loc,
                    );
                };
                if r1 == r2 {
                    self.error(Code::InfiniteType, "infinite record row", loc);
                    return false;
                }
                let shared = self.fresh_row();
                self.subst.bind_row(
                    r1,
                    Ty::Row {
                        fields: right_only,
                        tail: RowTail::Var(shared),
                    },
                );
                self.subst.bind_row(
                    r2,
                    Ty::Row {
                        fields: left_only,
                        tail: RowTail::Var(shared),
                    },
                );
                ok
            }
        }
    }

    /// Bind `tail` to a row holding `extra` with `rest` as its tail.
    fn absorb(&mut self, tail: RowTail, extra: Vec<(SmolStr, Ty)>, rest: RowTail, loc: Loc) -> bool {
        match tail {
            RowTail::Var(r) => {
                if rest == RowTail::Var(r) {
                    self.error(Code::InfiniteType, "infinite record row", loc);
                    return false;
                }
                self.subst.bind_row(
                    r,
                    Ty::Row {
                        fields: extra,
                        tail: rest,
                    },
                );
                true
            }
            RowTail::Closed => self.missing_fields(&extra, loc),
        }
    }

    fn missing_fields(&mut self, fields: &[(SmolStr, Ty)], loc: Loc) -> bool {
        let labels = fields
            .iter()
            .map(|(l, _)| l.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.error(
            Code::RecordField,
            format!("record is missing field(s): {}", labels),
            loc,
        );
        false
    }

    fn unify_tails(&mut self, t1: RowTail, t2: RowTail) -> bool {
        match (t1, t2) {
            (RowTail::Closed, RowTail::Closed) => true,
            (RowTail::Var(r1), RowTail::Var(r2)) => {
                if r1 != r2 {
                    self.subst.bind_row(
                        r1,
                        Ty::Row {
                            fields: Vec::new(),
                            tail: RowTail::Var(r2),
                        },
                    );
                }
                true
            }
            // Binding a row variable to Closed closes the row.
            (RowTail::Var(r), RowTail::Closed) | (RowTail::Closed, RowTail::Var(r)) => {
                self.subst.bind_row(
                    r,
                    Ty::Row {
                        fields: Vec::new(),
                        tail: RowTail::Closed,
                    },
                );
                true
            }
        }
    }

    /// Unify an open row against a nominal record: every row field must
    /// exist in the record; an open tail then closes over the record.
    fn unify_row_record(
        &mut self,
        fields: &[(SmolStr, Ty)],
        tail: RowTail,
        name: &SmolStr,
        loc: Loc,
    ) -> bool {
        let Some(rec) = self.tables.recs.get(name.as_str()).cloned() else {
            let row = Ty::Row {
                fields: fields.to_vec(),
                tail,
            };
            return self.type_mismatch(&row, &Ty::named(name.clone()), loc);
        };
        let mut ok = true;
        for (label, ty) in fields {
            match rec.fields.iter().find(|(n, _)| n == label) {
                Some((_, fty)) => ok &= self.unify(ty, fty, loc),
                None => {
                    self.error(
                        Code::RecordField,
                        format!("record `{}` has no field `{}`", name, label),
                        loc,
                    );
                    ok = false;
                }
            }
        }
        match tail {
            RowTail::Var(r) => {
                self.subst.bind_row(r, Ty::named(name.clone()));
            }
            RowTail::Closed => {
                // A closed row equals a record with exactly those fields.
                for (n, _) in &rec.fields {
                    if !fields.iter().any(|(l, _)| l == n) {
                        self.error(
                            Code::RecordField,
                            format!("closed row is missing record field `{}`", n),
                            loc,
                        );
                        ok = false;
                    }
                }
            }
        }
        ok
    }

    /// The common type of two branches. Distinct singleton atoms join at
    /// the universal `Atom`; everything else must unify.
    pub(crate) fn join_branches(&mut self, t1: &Ty, t2: &Ty, loc: Loc, code: Code) -> Ty {
        let a = self.subst.apply(t1);
        let b = self.subst.apply(t2);
        match (&a, &b) {
            (Ty::AtomLit(x), Ty::AtomLit(y)) if x != y => Ty::Atom,
            (Ty::AtomLit(_), Ty::Atom) | (Ty::Atom, Ty::AtomLit(_)) => Ty::Atom,
            (Ty::Any, _) => b,
            (_, Ty::Any) => a,
            _ => {
                self.unify_code(&a, &b, loc, code);
                self.subst.apply(&a)
            }
        }
    }
}
