use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// ── Types ────────────────────────────────────────────────────────

pub type TyVarId = u32;
pub type RowVarId = u32;

/// Ids at or above this value are field-access-introduced type variables.
/// They are derived deterministically from `(record var, field label)` so
/// repeated accesses share a type without a lookup table, and they print
/// as `..a`, `..b` instead of `?n`.
pub const FIELD_VAR_BASE: TyVarId = 1 << 27;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Str,
    Unit,
    /// Unifies with anything; used for local error recovery.
    Any,
    /// An untyped process id.
    Pid,
    /// The universal atom type.
    Atom,
    /// A singleton atom type: the type of the literal `:x`.
    AtomLit(SmolStr),
    /// Unification variable.
    Var(TyVarId),
    List(Box<Ty>),
    Tuple(Vec<Ty>),
    /// Function type: `Fn([param_types], return_type)`.
    Fn(Vec<Ty>, Box<Ty>),
    /// Nominal reference to a declared sum or record, with instantiated
    /// type arguments. Variant and field structure lives in the
    /// declaration tables; keeping the reference indirect is what lets
    /// type declarations be mutually recursive.
    Named { name: SmolStr, args: Vec<Ty> },
    /// Structural record row — exists only during inference.
    Row {
        fields: Vec<(SmolStr, Ty)>,
        tail: RowTail,
    },
    /// A typed process id: the target process and the message tags it
    /// accepts (kept sorted).
    PidOf {
        process: SmolStr,
        msgs: Vec<SmolStr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowTail {
    Closed,
    Var(RowVarId),
}

/// A polymorphic type scheme: `∀ vars, row_vars. constraints => ty`.
/// Quantifiers appear here and nowhere else (prenex only).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    pub vars: Vec<TyVarId>,
    pub row_vars: Vec<RowVarId>,
    /// Class constraints over quantified variables: `(class, ty)`.
    pub constraints: Vec<(SmolStr, Ty)>,
    pub ty: Ty,
}

impl Scheme {
    /// A scheme with no quantified variables.
    pub fn mono(ty: Ty) -> Self {
        Scheme {
            vars: Vec::new(),
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.vars.is_empty() && self.row_vars.is_empty()
    }
}

impl Ty {
    pub fn named(name: impl Into<SmolStr>) -> Ty {
        Ty::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    /// The constructor name used for instance selection (the head).
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Ty::Int => Some("Int"),
            Ty::Float => Some("Float"),
            Ty::Bool => Some("Bool"),
            Ty::Str => Some("String"),
            Ty::Unit => Some("Unit"),
            Ty::Atom | Ty::AtomLit(_) => Some("Atom"),
            Ty::Pid | Ty::PidOf { .. } => Some("Pid"),
            Ty::List(_) => Some("List"),
            Ty::Tuple(_) => Some("Tuple"),
            Ty::Fn(_, _) => Some("Fn"),
            Ty::Named { name, .. } => Some(name.as_str()),
            Ty::Any | Ty::Var(_) | Ty::Row { .. } => None,
        }
    }

    /// The instantiated type arguments of the head (for constrained
    /// instance resolution). A list's element counts as its only argument.
    pub fn head_params(&self) -> Vec<Ty> {
        match self {
            Ty::Named { args, .. } => args.clone(),
            Ty::List(e) => vec![(**e).clone()],
            Ty::Tuple(elems) => elems.clone(),
            _ => Vec::new(),
        }
    }
}

// ── Free variables ───────────────────────────────────────────────

/// The unbound type and row variables reachable in a type.
/// `BTreeSet` keeps generalization order deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreeVars {
    pub tys: BTreeSet<TyVarId>,
    pub rows: BTreeSet<RowVarId>,
}

impl FreeVars {
    pub fn is_empty(&self) -> bool {
        self.tys.is_empty() && self.rows.is_empty()
    }

    pub fn extend(&mut self, other: FreeVars) {
        self.tys.extend(other.tys);
        self.rows.extend(other.rows);
    }

    pub fn contains_ty(&self, id: TyVarId) -> bool {
        self.tys.contains(&id)
    }
}

// ── Substitution ─────────────────────────────────────────────────

/// The substitution: type-var ids to types and row-var ids to rows.
/// Applied left-first and transitively until no bound id remains.
#[derive(Debug, Default, Clone)]
pub struct Subst {
    tys: HashMap<TyVarId, Ty>,
    rows: HashMap<RowVarId, Ty>,
}

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_ty(&mut self, id: TyVarId, ty: Ty) {
        self.tys.insert(id, ty);
    }

    /// Bind a row variable to a row (or, when a row closes over a nominal
    /// record, to that record).
    pub fn bind_row(&mut self, id: RowVarId, row: Ty) {
        self.rows.insert(id, row);
    }

    pub fn lookup_ty(&self, id: TyVarId) -> Option<&Ty> {
        self.tys.get(&id)
    }

    pub fn lookup_row(&self, id: RowVarId) -> Option<&Ty> {
        self.rows.get(&id)
    }

    /// Chase the substitution through a type until no bound variable
    /// remains at any depth.
    pub fn apply(&self, ty: &Ty) -> Ty {
        match ty {
            Ty::Var(id) => match self.tys.get(id) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Ty::List(e) => Ty::List(Box::new(self.apply(e))),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|t| self.apply(t)).collect()),
            Ty::Fn(params, ret) => Ty::Fn(
                params.iter().map(|p| self.apply(p)).collect(),
                Box::new(self.apply(ret)),
            ),
            Ty::Named { name, args } => Ty::Named {
                name: name.clone(),
                args: args.iter().map(|t| self.apply(t)).collect(),
            },
            Ty::Row { fields, tail } => {
                let mut out: Vec<(SmolStr, Ty)> = fields
                    .iter()
                    .map(|(l, t)| (l.clone(), self.apply(t)))
                    .collect();
                let mut tail = *tail;
                // Absorb whatever the tail is bound to.
                while let RowTail::Var(r) = tail {
                    match self.rows.get(&r) {
                        Some(Ty::Row {
                            fields: more,
                            tail: next,
                        }) => {
                            for (l, t) in more {
                                if !out.iter().any(|(l2, _)| l2 == l) {
                                    out.push((l.clone(), self.apply(t)));
                                }
                            }
                            tail = *next;
                        }
                        Some(other) => {
                            // The row closed over a nominal record; every
                            // known field was unified into it already.
                            return self.apply(other);
                        }
                        None => break,
                    }
                }
                out.sort_by(|a, b| a.0.cmp(&b.0));
                Ty::Row { fields: out, tail }
            }
            _ => ty.clone(),
        }
    }

    /// `compose(s1, s2)` yields `s` with `s.apply(t) = s2.apply(s1.apply(t))`;
    /// later bindings shadow earlier ones for the same id.
    pub fn compose(first: &Subst, second: &Subst) -> Subst {
        let mut out = Subst::new();
        for (id, ty) in &first.tys {
            out.tys.insert(*id, second.apply(ty));
        }
        for (id, row) in &first.rows {
            out.rows.insert(*id, second.apply(row));
        }
        for (id, ty) in &second.tys {
            out.tys.entry(*id).or_insert_with(|| ty.clone());
        }
        for (id, row) in &second.rows {
            out.rows.entry(*id).or_insert_with(|| row.clone());
        }
        out
    }

    /// Free variables of `ty` under this substitution.
    pub fn free_vars(&self, ty: &Ty) -> FreeVars {
        let mut out = FreeVars::default();
        collect_free(&self.apply(ty), &mut out);
        out
    }
}

/// Free variables of an already-applied type.
pub fn collect_free(ty: &Ty, out: &mut FreeVars) {
    match ty {
        Ty::Var(id) => {
            out.tys.insert(*id);
        }
        Ty::List(e) => collect_free(e, out),
        Ty::Tuple(elems) => {
            for t in elems {
                collect_free(t, out);
            }
        }
        Ty::Fn(params, ret) => {
            for p in params {
                collect_free(p, out);
            }
            collect_free(ret, out);
        }
        Ty::Named { args, .. } => {
            for t in args {
                collect_free(t, out);
            }
        }
        Ty::Row { fields, tail } => {
            for (_, t) in fields {
                collect_free(t, out);
            }
            if let RowTail::Var(r) = tail {
                out.rows.insert(*r);
            }
        }
        _ => {}
    }
}

/// Clone a type replacing variables per the given maps; unmapped
/// variables are left alone. Used for scheme instantiation and template
/// freshening — unlike `apply`, it never consults the substitution.
pub fn rename(ty: &Ty, tmap: &HashMap<TyVarId, Ty>, rmap: &HashMap<RowVarId, RowVarId>) -> Ty {
    match ty {
        Ty::Var(id) => tmap.get(id).cloned().unwrap_or_else(|| ty.clone()),
        Ty::List(e) => Ty::List(Box::new(rename(e, tmap, rmap))),
        Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|t| rename(t, tmap, rmap)).collect()),
        Ty::Fn(params, ret) => Ty::Fn(
            params.iter().map(|p| rename(p, tmap, rmap)).collect(),
            Box::new(rename(ret, tmap, rmap)),
        ),
        Ty::Named { name, args } => Ty::Named {
            name: name.clone(),
            args: args.iter().map(|t| rename(t, tmap, rmap)).collect(),
        },
        Ty::Row { fields, tail } => Ty::Row {
            fields: fields
                .iter()
                .map(|(l, t)| (l.clone(), rename(t, tmap, rmap)))
                .collect(),
            tail: match tail {
                RowTail::Var(r) => RowTail::Var(rmap.get(r).copied().unwrap_or(*r)),
                RowTail::Closed => RowTail::Closed,
            },
        },
        _ => ty.clone(),
    }
}

// ── Field-var derivation ─────────────────────────────────────────

/// Derive the type-variable id for a `(record var, field label)` pair.
/// FNV-1a folded into the reserved high half of the id space; the same
/// pair always yields the same id, so repeated `(. r :f)` accesses share
/// their field type.
pub fn field_var_id(record_var: TyVarId, label: &str) -> TyVarId {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut h = FNV_OFFSET;
    for b in record_var.to_le_bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    for b in label.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    (h & (FIELD_VAR_BASE - 1)) | FIELD_VAR_BASE
}

// ── Printing ─────────────────────────────────────────────────────

fn write_field_var(f: &mut fmt::Formatter<'_>, id: TyVarId) -> fmt::Result {
    let n = id - FIELD_VAR_BASE;
    let letter = (b'a' + (n % 26) as u8) as char;
    if n < 26 {
        write!(f, "..{}", letter)
    } else {
        write!(f, "..{}{}", letter, n / 26)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => write!(f, "Int"),
            Ty::Float => write!(f, "Float"),
            Ty::Bool => write!(f, "Bool"),
            Ty::Str => write!(f, "String"),
            Ty::Unit => write!(f, "Unit"),
            Ty::Any => write!(f, "Any"),
            Ty::Pid => write!(f, "Pid"),
            Ty::Atom => write!(f, "Atom"),
            Ty::AtomLit(name) => write!(f, ":{}", name),
            Ty::Var(id) if *id >= FIELD_VAR_BASE => write_field_var(f, *id),
            Ty::Var(id) => write!(f, "?{}", id),
            Ty::List(e) => write!(f, "(List {})", e),
            Ty::Tuple(elems) => {
                write!(f, "(Tuple")?;
                for t in elems {
                    write!(f, " {}", t)?;
                }
                write!(f, ")")
            }
            Ty::Fn(params, ret) => {
                write!(f, "(Fn [")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "] {})", ret)
            }
            Ty::Named { name, args } => {
                if args.is_empty() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "({}", name)?;
                    for a in args {
                        write!(f, " {}", a)?;
                    }
                    write!(f, ")")
                }
            }
            Ty::Row { fields, tail } => {
                write!(f, "{{")?;
                for (i, (l, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", l, t)?;
                }
                match tail {
                    RowTail::Closed => {}
                    RowTail::Var(_) => write!(f, " | ..")?,
                }
                write!(f, "}}")
            }
            Ty::PidOf { process, .. } => write!(f, "(Pid {})", process),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_mono() {
            return write!(f, "{}", self.ty);
        }
        write!(f, "∀")?;
        for v in &self.vars {
            write!(f, " ?{}", v)?;
        }
        for r in &self.row_vars {
            write!(f, " ..{}", r)?;
        }
        write!(f, ". {}", self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_chases_chains() {
        let mut s = Subst::new();
        s.bind_ty(0, Ty::Var(1));
        s.bind_ty(1, Ty::Int);
        assert_eq!(s.apply(&Ty::Var(0)), Ty::Int);
        assert_eq!(
            s.apply(&Ty::List(Box::new(Ty::Var(0)))),
            Ty::List(Box::new(Ty::Int))
        );
    }

    #[test]
    fn apply_leaves_unbound_vars() {
        let s = Subst::new();
        assert_eq!(s.apply(&Ty::Var(7)), Ty::Var(7));
    }

    #[test]
    fn free_vars_sees_through_substitution() {
        let mut s = Subst::new();
        s.bind_ty(0, Ty::List(Box::new(Ty::Var(3))));
        let fv = s.free_vars(&Ty::Fn(vec![Ty::Var(0)], Box::new(Ty::Var(5))));
        assert_eq!(fv.tys.into_iter().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn row_tail_absorption() {
        let mut s = Subst::new();
        // {x: Int | r0} where r0 ↦ {y: Bool | r1}
        s.bind_row(
            0,
            Ty::Row {
                fields: vec![(SmolStr::new("y"), Ty::Bool)],
                tail: RowTail::Var(1),
            },
        );
        let applied = s.apply(&Ty::Row {
            fields: vec![(SmolStr::new("x"), Ty::Int)],
            tail: RowTail::Var(0),
        });
        match applied {
            Ty::Row { fields, tail } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(tail, RowTail::Var(1));
            }
            other => panic!("expected row, got {}", other),
        }
    }

    #[test]
    fn row_closing_over_record_resolves_to_record() {
        let mut s = Subst::new();
        s.bind_row(0, Ty::named("Point"));
        let applied = s.apply(&Ty::Row {
            fields: vec![(SmolStr::new("x"), Ty::Int)],
            tail: RowTail::Var(0),
        });
        assert_eq!(applied, Ty::named("Point"));
    }

    #[test]
    fn compose_order() {
        let mut s1 = Subst::new();
        s1.bind_ty(0, Ty::Var(1));
        let mut s2 = Subst::new();
        s2.bind_ty(1, Ty::Int);
        let s = Subst::compose(&s1, &s2);
        assert_eq!(s.apply(&Ty::Var(0)), Ty::Int);
        assert_eq!(s.apply(&Ty::Var(1)), Ty::Int);
    }

    #[test]
    fn rename_replaces_only_mapped_vars() {
        let mut tmap = HashMap::new();
        tmap.insert(0, Ty::Int);
        let out = rename(
            &Ty::Fn(vec![Ty::Var(0)], Box::new(Ty::Var(1))),
            &tmap,
            &HashMap::new(),
        );
        assert_eq!(out, Ty::Fn(vec![Ty::Int], Box::new(Ty::Var(1))));
    }

    #[test]
    fn field_var_ids_are_high_and_stable() {
        let a = field_var_id(12, "x");
        let b = field_var_id(12, "x");
        let c = field_var_id(12, "y");
        let d = field_var_id(13, "x");
        assert_eq!(a, b);
        assert!(a >= FIELD_VAR_BASE);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Ty::List(Box::new(Ty::Int)).to_string(), "(List Int)");
        assert_eq!(
            Ty::Fn(vec![Ty::Int, Ty::Float], Box::new(Ty::Bool)).to_string(),
            "(Fn [Int Float] Bool)"
        );
        assert_eq!(Ty::AtomLit(SmolStr::new("yes")).to_string(), ":yes");
        assert_eq!(Ty::Var(3).to_string(), "?3");
        assert_eq!(
            Ty::Named {
                name: SmolStr::new("Maybe"),
                args: vec![Ty::Int]
            }
            .to_string(),
            "(Maybe Int)"
        );
        let fv = field_var_id(0, "x");
        assert!(Ty::Var(fv).to_string().starts_with(".."));
    }
}
