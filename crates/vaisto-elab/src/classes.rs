//! Type classes: admission of class and instance declarations, deriving,
//! default-method synthesis, and deferred constraint resolution with
//! dictionary construction for the emitter.

use smol_str::SmolStr;
use std::collections::HashMap;
use vaisto_ast::{Defclass, InstanceDef, InstanceHead, Loc};
use vaisto_diag::{Code, Diagnostic};
use vaisto_types::{rename, Scheme, Ty, TyVarId};

use crate::defs::{ClassDef, ClassMethod, InstanceEntry, MethodSource};
use crate::typed::{DictRef, TExprId, TExprKind, TInstanceMethod};
use crate::{Elaborator, PendingConstraint, CONSTRAINT_DEPTH_BUDGET};

/// Outcome of resolving one class constraint.
pub(crate) enum Resolution {
    Resolved(DictRef),
    /// The head (or a prerequisite) is still a free variable.
    Defer,
    /// Resolution is impossible but no further error should be emitted
    /// (recovery types, budget exhaustion after the first report).
    Skip,
    Failed,
}

impl<'a> Elaborator<'a> {
    // ── Builtin classes ──────────────────────────────────────────

    /// `Eq` (eq, neq-with-default) and `Show` (show) exist in every
    /// module, with instances for the primitive heads. `=`/`not=` are
    /// operator aliases for the `Eq` methods.
    pub(crate) fn register_builtin_classes(&mut self) {
        let eq_var = self.fresh_id();
        let eq_sig = vec![Ty::Var(eq_var), Ty::Var(eq_var)];
        self.tables.classes.insert(
            SmolStr::new("Eq"),
            ClassDef {
                name: SmolStr::new("Eq"),
                class_var: eq_var,
                methods: vec![
                    ClassMethod {
                        name: SmolStr::new("eq"),
                        params: eq_sig.clone(),
                        ret: Ty::Bool,
                        extra_vars: vec![],
                        default: None,
                        has_default: false,
                    },
                    ClassMethod {
                        name: SmolStr::new("neq"),
                        params: eq_sig,
                        ret: Ty::Bool,
                        extra_vars: vec![],
                        default: None,
                        has_default: true,
                    },
                ],
                loc: Loc::new(0, 0),
            },
        );
        let show_var = self.fresh_id();
        self.tables.classes.insert(
            SmolStr::new("Show"),
            ClassDef {
                name: SmolStr::new("Show"),
                class_var: show_var,
                methods: vec![ClassMethod {
                    name: SmolStr::new("show"),
                    params: vec![Ty::Var(show_var)],
                    ret: Ty::Str,
                    extra_vars: vec![],
                    default: None,
                    has_default: false,
                }],
                loc: Loc::new(0, 0),
            },
        );
        for (alias, class, method) in [
            ("eq", "Eq", "eq"),
            ("neq", "Eq", "neq"),
            ("=", "Eq", "eq"),
            ("not=", "Eq", "neq"),
            ("show", "Show", "show"),
        ] {
            self.tables.method_index.insert(
                SmolStr::new(alias),
                (SmolStr::new(class), SmolStr::new(method)),
            );
            self.lexicon.push(SmolStr::new(alias));
        }
        for head in ["Int", "Float", "Bool", "String", "Atom"] {
            for class in ["Eq", "Show"] {
                self.tables.instances.insert(
                    (SmolStr::new(class), SmolStr::new(head)),
                    InstanceEntry {
                        class: SmolStr::new(class),
                        head: SmolStr::new(head),
                        head_arity: 0,
                        constraints: vec![],
                        methods: vec![],
                        derived: true,
                        loc: Loc::new(0, 0),
                    },
                );
            }
        }
    }

    // ── Class admission ──────────────────────────────────────────

    pub(crate) fn admit_class(&mut self, d: &Defclass) {
        if self.tables.classes.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate class definition `{}`", d.name),
                d.name_loc,
            );
            return;
        }
        let class_var = self.fresh_id();
        let mut methods = Vec::new();
        let mut iface_methods = Vec::new();
        for m in &d.methods {
            if self.tables.method_index.contains_key(&m.name) {
                self.error(
                    Code::DuplicateDefinition,
                    format!("duplicate class method `{}`", m.name),
                    m.name_loc,
                );
                continue;
            }
            let mut tyvars: HashMap<SmolStr, Ty> =
                HashMap::from([(d.tyvar.clone(), Ty::Var(class_var))]);
            let params: Vec<Ty> = m
                .params
                .iter()
                .map(|&t| self.resolve_type_expr(t, &mut tyvars, true))
                .collect();
            let ret = self.resolve_type_expr(m.ret, &mut tyvars, true);
            // Extra signature variables in order of first appearance (the
            // interface numbering depends on it).
            let mut var_names: Vec<SmolStr> = Vec::new();
            for &t in m.params.iter().chain(std::iter::once(&m.ret)) {
                self.collect_tyvar_names(t, &mut var_names);
            }
            let extra_vars: Vec<TyVarId> = var_names
                .iter()
                .filter(|n| **n != d.tyvar)
                .filter_map(|n| match tyvars.get(n) {
                    Some(Ty::Var(v)) => Some(*v),
                    _ => None,
                })
                .collect();

            let has_default = !m.default_body.is_empty();
            if has_default && m.default_params.len() != params.len() {
                self.error(
                    Code::Arity,
                    format!(
                        "default body of `{}` takes {} parameter(s), signature has {}",
                        m.name,
                        m.default_params.len(),
                        params.len()
                    ),
                    m.loc,
                );
            }
            let default = if has_default {
                Some((m.default_params.clone(), m.default_body.clone()))
            } else {
                None
            };

            self.tables
                .method_index
                .insert(m.name.clone(), (d.name.clone(), m.name.clone()));
            self.lexicon.push(m.name.clone());

            // Normalized copy for the interface: class var 0, extras 1…
            let mut nmap: HashMap<TyVarId, Ty> = HashMap::from([(class_var, Ty::Var(0))]);
            for (i, &v) in extra_vars.iter().enumerate() {
                nmap.insert(v, Ty::Var(1 + i as TyVarId));
            }
            iface_methods.push(vaisto_iface::IfaceMethod {
                name: m.name.clone(),
                params: params
                    .iter()
                    .map(|t| rename(t, &nmap, &HashMap::new()))
                    .collect(),
                ret: rename(&ret, &nmap, &HashMap::new()),
                has_default,
            });

            methods.push(ClassMethod {
                name: m.name.clone(),
                params,
                ret,
                extra_vars,
                default,
                has_default,
            });
        }
        self.iface_classes.push(vaisto_iface::IfaceClass {
            name: d.name.clone(),
            class_var: 0,
            methods: iface_methods,
        });
        self.tables.classes.insert(
            d.name.clone(),
            ClassDef {
                name: d.name.clone(),
                class_var,
                methods,
                loc: d.loc,
            },
        );
    }

    // ── Instance admission ───────────────────────────────────────

    /// Build the head type for an instance declaration. Returns the head
    /// key, the type with a fresh variable per head argument, and the
    /// argument variables by name.
    pub(crate) fn instance_head_ty(
        &mut self,
        head: &InstanceHead,
    ) -> Option<(SmolStr, Ty, Vec<(SmolStr, TyVarId)>)> {
        let name = head.name.as_str();
        let mut arg_vars: Vec<(SmolStr, TyVarId)> = Vec::new();
        for a in &head.args {
            let v = self.fresh_id();
            arg_vars.push((a.clone(), v));
        }
        let arity_check = |elab: &mut Self, expected: usize| {
            if head.args.len() != expected {
                elab.error(
                    Code::Arity,
                    format!(
                        "instance head `{}` expects {} type argument(s), got {}",
                        name,
                        expected,
                        head.args.len()
                    ),
                    head.loc,
                );
                return false;
            }
            true
        };
        let ty = match name {
            "Int" | "Float" | "Bool" | "String" | "Atom" | "Unit" | "Pid" => {
                if !arity_check(self, 0) {
                    return None;
                }
                match name {
                    "Int" => Ty::Int,
                    "Float" => Ty::Float,
                    "Bool" => Ty::Bool,
                    "String" => Ty::Str,
                    "Atom" => Ty::Atom,
                    "Unit" => Ty::Unit,
                    "Pid" => Ty::Pid,
                    _ => unreachable!(),
                }
            }
            "List" => {
                if !arity_check(self, 1) {
                    return None;
                }
                Ty::List(Box::new(Ty::Var(arg_vars[0].1)))
            }
            _ => {
                if let Some(sum) = self.tables.sums.get(name) {
                    let expected = sum.params.len();
                    if !arity_check(self, expected) {
                        return None;
                    }
                    Ty::Named {
                        name: head.name.clone(),
                        args: arg_vars.iter().map(|(_, v)| Ty::Var(*v)).collect(),
                    }
                } else if self.tables.recs.contains_key(name) {
                    if !arity_check(self, 0) {
                        return None;
                    }
                    Ty::named(head.name.clone())
                } else {
                    self.error(
                        Code::UnknownType,
                        format!("unknown type `{}` in instance head", name),
                        head.loc,
                    );
                    return None;
                }
            }
        };
        Some((head.name.clone(), ty, arg_vars))
    }

    pub(crate) fn admit_instance(&mut self, d: &InstanceDef) {
        let Some(class) = self.tables.classes.get(&d.class_name).cloned() else {
            self.error(
                Code::UnknownClass,
                format!("unknown class `{}`", d.class_name),
                d.class_loc,
            );
            return;
        };
        let Some((head_key, _, arg_vars)) = self.instance_head_ty(&d.head) else {
            return;
        };
        let key = (d.class_name.clone(), head_key.clone());
        if self.tables.instances.contains_key(&key) {
            self.error(
                Code::DuplicateInstance,
                format!(
                    "duplicate instance `({} {})`",
                    d.class_name, head_key
                ),
                d.loc,
            );
            return;
        }

        let mut constraints: Vec<(SmolStr, usize)> = Vec::new();
        for c in &d.constraints {
            if !self.tables.classes.contains_key(&c.class_name) {
                self.error(
                    Code::UnknownClass,
                    format!("unknown class `{}` in constraint", c.class_name),
                    c.loc,
                );
                continue;
            }
            let tyvar_name = match &self.module.type_exprs[c.ty].kind {
                vaisto_ast::TypeExprKind::TypeVar(n) => Some(n.clone()),
                vaisto_ast::TypeExprKind::Named(n) => Some(n.clone()),
                _ => None,
            };
            let idx = tyvar_name
                .as_ref()
                .and_then(|n| arg_vars.iter().position(|(a, _)| a == n));
            match idx {
                Some(i) => constraints.push((c.class_name.clone(), i)),
                None => self.error(
                    Code::MalformedForm,
                    "instance constraint must name a head type variable",
                    c.loc,
                ),
            }
        }

        // Method presence: every class method is either implemented,
        // defaulted, or an error.
        let mut methods: Vec<(SmolStr, MethodSource)> = Vec::new();
        for m in &class.methods {
            if d.methods.iter().any(|i| i.name == m.name) {
                methods.push((m.name.clone(), MethodSource::Explicit));
            } else if m.has_default {
                methods.push((m.name.clone(), MethodSource::Default));
            } else {
                self.error(
                    Code::MissingInstanceMethod,
                    format!(
                        "instance `({} {})` is missing method `{}`",
                        d.class_name, head_key, m.name
                    ),
                    d.loc,
                );
            }
        }
        for i in &d.methods {
            if class.method(&i.name).is_none() {
                self.error(
                    Code::UnknownFunction,
                    format!(
                        "`{}` is not a method of class `{}`",
                        i.name, d.class_name
                    ),
                    i.name_loc,
                );
            }
        }

        self.iface_instances.push(vaisto_iface::IfaceInstance {
            class: d.class_name.clone(),
            head: head_key.clone(),
            head_arity: arg_vars.len(),
            constraints: constraints.clone(),
            derived: false,
        });
        self.tables.instances.insert(
            key,
            InstanceEntry {
                class: d.class_name.clone(),
                head: head_key,
                head_arity: arg_vars.len(),
                constraints,
                methods,
                derived: false,
                loc: d.loc,
            },
        );
    }

    // ── Instance bodies ──────────────────────────────────────────

    /// Elaborate the bodies of an admitted instance. The class type
    /// variable is substituted by the head, so method calls that go
    /// through it resolve at this instance's head — which is how a
    /// default `neq` implemented via `eq` works for every instance.
    pub(crate) fn check_instance_bodies(&mut self, d: &InstanceDef) {
        let Some(class) = self.tables.classes.get(&d.class_name).cloned() else {
            return;
        };
        // Admission already reported bad heads and duplicates.
        let Some(entry) = self
            .tables
            .instances
            .get(&(d.class_name.clone(), d.head.name.clone()))
            .cloned()
        else {
            return;
        };
        if entry.loc != d.loc {
            return; // a duplicate instance; only the first is elaborated
        }
        let Some((head_key, head_ty, arg_vars)) = self.instance_head_ty(&d.head) else {
            return;
        };

        // Constraints declared on the instance become local assumptions:
        // a deferred `(C a)` against one of the head's argument variables
        // is discharged by the instance's own dictionary parameters.
        let assumptions: Vec<(SmolStr, TyVarId)> = entry
            .constraints
            .iter()
            .filter_map(|(c, i)| arg_vars.get(*i).map(|(_, v)| (c.clone(), *v)))
            .collect();

        for (name, source) in &entry.methods {
            let Some(sig) = class.method(name) else {
                continue;
            };
            match source {
                MethodSource::Explicit => {
                    let Some(imp) = d.methods.iter().find(|i| &i.name == name) else {
                        continue;
                    };
                    self.check_method_body(
                        &d.class_name,
                        &head_key,
                        &head_ty,
                        class.class_var,
                        sig,
                        &imp.params,
                        &imp.body,
                        imp.loc,
                    );
                }
                MethodSource::Default => {
                    if let Some((params, body)) = sig.default.clone() {
                        self.check_method_body(
                            &d.class_name,
                            &head_key,
                            &head_ty,
                            class.class_var,
                            sig,
                            &params,
                            &body,
                            d.loc,
                        );
                    }
                }
                MethodSource::Derived => {}
            }
        }

        // Discharge deferred constraints covered by the assumptions. The
        // head argument variables are fresh to this instance, so nothing
        // older can be discharged by mistake.
        let all: Vec<PendingConstraint> = std::mem::take(&mut self.pending);
        for c in all {
            let keep = match self.subst.apply(&c.ty) {
                Ty::Var(v) => !assumptions.iter().any(|(cl, av)| *av == v && *cl == c.class),
                _ => true,
            };
            if keep {
                self.pending.push(c);
            }
        }
        self.resolve_pending(false);
    }

    #[allow(clippy::too_many_arguments)]
    fn check_method_body(
        &mut self,
        class_name: &SmolStr,
        head_key: &SmolStr,
        head_ty: &Ty,
        class_var: TyVarId,
        sig: &ClassMethod,
        params: &[vaisto_ast::Param],
        body: &[vaisto_ast::ExprId],
        loc: Loc,
    ) {
        let mut tmap: HashMap<TyVarId, Ty> = HashMap::from([(class_var, head_ty.clone())]);
        for &v in &sig.extra_vars {
            tmap.insert(v, self.fresh());
        }
        let param_tys: Vec<Ty> = sig
            .params
            .iter()
            .map(|t| rename(t, &tmap, &HashMap::new()))
            .collect();
        let ret = rename(&sig.ret, &tmap, &HashMap::new());

        if params.len() != param_tys.len() {
            self.error(
                Code::Arity,
                format!(
                    "method `{}` takes {} parameter(s), signature has {}",
                    sig.name,
                    params.len(),
                    param_tys.len()
                ),
                loc,
            );
            return;
        }

        self.push_scope();
        for (p, ty) in params.iter().zip(param_tys.iter()) {
            self.define(p.name.clone(), Scheme::mono(ty.clone()));
            self.mark_local(p.name.clone());
        }
        let (tbody, body_ty) = self.infer_body(body);
        let body_loc = body.last().map(|&e| self.module.exprs[e].loc).unwrap_or(loc);
        self.unify_code(&body_ty, &ret, body_loc, Code::ReturnType);
        self.pop_scope();

        self.typed.instance_methods.push(TInstanceMethod {
            class: class_name.clone(),
            head: head_key.clone(),
            method: sig.name.clone(),
            params: params.iter().map(|p| p.name.clone()).collect(),
            body: tbody,
            loc,
        });
    }

    // ── Class method calls ───────────────────────────────────────

    /// Elaborate `(m args…)` where `m` is a class method: instantiate the
    /// signature with a fresh head placeholder and defer the constraint
    /// until the placeholder becomes concrete.
    pub(crate) fn infer_class_call(
        &mut self,
        class_name: &SmolStr,
        method: &SmolStr,
        args: &[vaisto_ast::ExprId],
        loc: Loc,
    ) -> (TExprId, Ty) {
        let class = self.tables.classes[class_name].clone();
        let sig = class.method(method).cloned().expect("indexed method");

        let head = self.fresh();
        let mut tmap: HashMap<TyVarId, Ty> = HashMap::from([(class.class_var, head.clone())]);
        for &v in &sig.extra_vars {
            tmap.insert(v, self.fresh());
        }
        let param_tys: Vec<Ty> = sig
            .params
            .iter()
            .map(|t| rename(t, &tmap, &HashMap::new()))
            .collect();
        let ret = rename(&sig.ret, &tmap, &HashMap::new());

        if args.len() != param_tys.len() {
            self.error(
                Code::Arity,
                format!(
                    "`{}` expects {} argument(s), got {}",
                    method,
                    param_tys.len(),
                    args.len()
                ),
                loc,
            );
        }
        let mut texprs = Vec::new();
        for (&a, p) in args.iter().zip(param_tys.iter()) {
            let (texpr, aty) = self.infer_expr(a);
            let aloc = self.module.exprs[a].loc;
            self.unify(&aty, p, aloc);
            texprs.push(texpr);
        }
        let ret = self.subst.apply(&ret);
        let node = self.alloc(
            TExprKind::ClassCall {
                class: class_name.clone(),
                method: method.clone(),
                head: None,
                args: texprs,
                dicts: Vec::new(),
            },
            ret.clone(),
            loc,
        );
        self.pending.push(PendingConstraint {
            class: class_name.clone(),
            ty: head,
            node: Some(node),
            loc,
        });
        // Attempt resolution eagerly; arguments may already be concrete.
        self.resolve_pending(false);
        (node, ret)
    }

    // ── Deriving ─────────────────────────────────────────────────

    /// Synthesize instances for `deriving [C…]` immediately after the
    /// type declaration is admitted.
    pub(crate) fn run_deriving(&mut self, type_name: &SmolStr, deriving: &[(SmolStr, Loc)]) {
        for (class, loc) in deriving {
            match class.as_str() {
                "Eq" => {
                    let arity = self
                        .tables
                        .sums
                        .get(type_name)
                        .map(|s| s.params.len())
                        .unwrap_or(0);
                    // Structural equality of the fields needs Eq at every
                    // type argument.
                    let constraints: Vec<(SmolStr, usize)> =
                        (0..arity).map(|i| (SmolStr::new("Eq"), i)).collect();
                    self.insert_derived_instance(
                        "Eq",
                        type_name,
                        arity,
                        constraints,
                        &[("eq", MethodSource::Derived), ("neq", MethodSource::Derived)],
                        *loc,
                    );
                }
                "Show" => {
                    if self.tables.recs.contains_key(type_name) {
                        let diag = Diagnostic::error(
                            Code::DerivingUnsupported,
                            format!("cannot derive `Show` for record `{}`", type_name),
                            *loc,
                        )
                        .with_hint(format!(
                            "write a manual instance: (instance Show {} …)",
                            type_name
                        ));
                        self.push_diag(diag);
                        continue;
                    }
                    let all_nullary = self
                        .tables
                        .sums
                        .get(type_name)
                        .map(|s| s.variants.iter().all(|(_, fs)| fs.is_empty()))
                        .unwrap_or(false);
                    if !all_nullary {
                        let diag = Diagnostic::error(
                            Code::DerivingUnsupported,
                            format!(
                                "cannot derive `Show` for `{}`: only variant names can be derived",
                                type_name
                            ),
                            *loc,
                        )
                        .with_hint(format!(
                            "write a manual instance: (instance Show {} …)",
                            type_name
                        ));
                        self.push_diag(diag);
                        continue;
                    }
                    self.insert_derived_instance(
                        "Show",
                        type_name,
                        0,
                        Vec::new(),
                        &[("show", MethodSource::Derived)],
                        *loc,
                    );
                }
                other => {
                    if self.tables.classes.contains_key(other) {
                        self.error(
                            Code::DerivingUnsupported,
                            format!("class `{}` cannot be derived", other),
                            *loc,
                        );
                    } else {
                        self.error(
                            Code::UnknownClass,
                            format!("unknown class `{}` in deriving", other),
                            *loc,
                        );
                    }
                }
            }
        }
    }

    fn insert_derived_instance(
        &mut self,
        class: &str,
        head: &SmolStr,
        head_arity: usize,
        constraints: Vec<(SmolStr, usize)>,
        methods: &[(&str, MethodSource)],
        loc: Loc,
    ) {
        let key = (SmolStr::new(class), head.clone());
        if self.tables.instances.contains_key(&key) {
            self.error(
                Code::DuplicateInstance,
                format!("duplicate instance `({} {})`", class, head),
                loc,
            );
            return;
        }
        self.iface_instances.push(vaisto_iface::IfaceInstance {
            class: SmolStr::new(class),
            head: head.clone(),
            head_arity,
            constraints: constraints.clone(),
            derived: true,
        });
        self.tables.instances.insert(
            key,
            InstanceEntry {
                class: SmolStr::new(class),
                head: head.clone(),
                head_arity,
                constraints,
                methods: methods
                    .iter()
                    .map(|(n, s)| (SmolStr::new(*n), *s))
                    .collect(),
                derived: true,
                loc,
            },
        );
    }

    // ── Constraint resolution ────────────────────────────────────

    /// Try to discharge deferred constraints. Non-final passes keep
    /// still-free heads pending; the final pass reports them.
    pub(crate) fn resolve_pending(&mut self, final_pass: bool) {
        let pending = std::mem::take(&mut self.pending);
        let mut keep = Vec::new();
        for c in pending {
            let ty = self.subst.apply(&c.ty);
            match self.resolve_constraint(&c.class, &ty, c.loc, 0, final_pass) {
                Resolution::Resolved(dict) => {
                    if let Some(node) = c.node {
                        self.patch_class_call(node, &dict);
                    }
                }
                Resolution::Defer => keep.push(c),
                Resolution::Skip | Resolution::Failed => {}
            }
        }
        self.pending = keep;
    }

    fn patch_class_call(&mut self, node: TExprId, dict: &DictRef) {
        let head = match dict {
            DictRef::Instance { head, .. } | DictRef::Constrained { head, .. } => head.clone(),
        };
        if let TExprKind::ClassCall {
            head: slot, dicts, ..
        } = &mut self.typed.exprs[node].kind
        {
            *slot = Some(head);
            *dicts = vec![dict.clone()];
        }
    }

    /// Context reduction at generalization: a deferred constraint whose
    /// head is constructed over soon-to-be-quantified variables reduces
    /// through the instance table to leaf constraints on those variables,
    /// which the scheme then carries. The call node keeps its statically
    /// known head; its dictionaries arrive from the caller's context.
    pub(crate) fn reduce_for_scheme(
        &mut self,
        c: &PendingConstraint,
        ty: &Ty,
        out: &mut Vec<(SmolStr, Ty)>,
    ) {
        self.reduce_constraint(&c.class, ty, c.loc, 0, out);
        if let Some(node) = c.node {
            if let Some(head) = self.subst.apply(ty).head_name().map(SmolStr::new) {
                if let TExprKind::ClassCall { head: slot, .. } =
                    &mut self.typed.exprs[node].kind
                {
                    *slot = Some(head);
                }
            }
        }
    }

    fn reduce_constraint(
        &mut self,
        class: &SmolStr,
        ty: &Ty,
        loc: Loc,
        depth: usize,
        out: &mut Vec<(SmolStr, Ty)>,
    ) {
        if self.depth_exceeded {
            return;
        }
        if depth > CONSTRAINT_DEPTH_BUDGET {
            self.depth_exceeded = true;
            self.error(
                Code::ConstraintDepth,
                format!(
                    "constraint chain for `{}` exceeded the depth budget ({})",
                    class, CONSTRAINT_DEPTH_BUDGET
                ),
                loc,
            );
            return;
        }
        let ty = self.subst.apply(ty);
        match &ty {
            Ty::Any => return,
            Ty::Var(_) => {
                out.push((class.clone(), ty));
                return;
            }
            _ => {}
        }
        let Some(head) = ty.head_name().map(SmolStr::new) else {
            self.error(
                Code::NoInstance,
                format!("no instance of `{}` for `{}`", class, ty),
                loc,
            );
            return;
        };
        let Some(entry) = self.tables.instances.get(&(class.clone(), head.clone())).cloned()
        else {
            let diag = Diagnostic::error(
                Code::NoInstance,
                format!("no instance of `{}` for `{}`", class, ty),
                loc,
            )
            .with_hint(format!("define (instance {} {} …)", class, head));
            self.push_diag(diag);
            return;
        };
        let params = ty.head_params();
        for (c_class, idx) in &entry.constraints {
            if let Some(p) = params.get(*idx) {
                self.reduce_constraint(c_class, &p.clone(), loc, depth + 1, out);
            }
        }
    }

    /// Resolve `(class, ty)` to a dictionary, chaining through constrained
    /// instances. Chains are bounded by the depth budget; exceeding it is
    /// a single fatal diagnostic.
    fn resolve_constraint(
        &mut self,
        class: &SmolStr,
        ty: &Ty,
        loc: Loc,
        depth: usize,
        final_pass: bool,
    ) -> Resolution {
        if self.depth_exceeded {
            return Resolution::Skip;
        }
        if depth > CONSTRAINT_DEPTH_BUDGET {
            self.depth_exceeded = true;
            self.error(
                Code::ConstraintDepth,
                format!(
                    "constraint chain for `{}` exceeded the depth budget ({})",
                    class, CONSTRAINT_DEPTH_BUDGET
                ),
                loc,
            );
            return Resolution::Failed;
        }
        let ty = self.subst.apply(ty);
        match &ty {
            Ty::Any => return Resolution::Skip,
            Ty::Var(_) => {
                return if final_pass {
                    self.error(
                        Code::NoInstance,
                        format!("cannot resolve constraint `({} {})`", class, ty),
                        loc,
                    );
                    Resolution::Failed
                } else {
                    Resolution::Defer
                };
            }
            _ => {}
        }
        let Some(head) = ty.head_name().map(SmolStr::new) else {
            self.error(
                Code::NoInstance,
                format!("no instance of `{}` for `{}`", class, ty),
                loc,
            );
            return Resolution::Failed;
        };
        let Some(entry) = self.tables.instances.get(&(class.clone(), head.clone())).cloned()
        else {
            let diag = Diagnostic::error(
                Code::NoInstance,
                format!("no instance of `{}` for `{}`", class, ty),
                loc,
            )
            .with_hint(format!("define (instance {} {} …)", class, head));
            self.push_diag(diag);
            return Resolution::Failed;
        };
        if entry.constraints.is_empty() {
            return Resolution::Resolved(DictRef::Instance {
                class: class.clone(),
                head,
            });
        }
        let params = ty.head_params();
        let mut deps = Vec::new();
        for (c_class, idx) in &entry.constraints {
            let Some(p) = params.get(*idx) else {
                continue;
            };
            match self.resolve_constraint(c_class, &p.clone(), loc, depth + 1, final_pass) {
                Resolution::Resolved(d) => deps.push(d),
                Resolution::Defer => return Resolution::Defer,
                Resolution::Skip => {}
                Resolution::Failed => return Resolution::Failed,
            }
        }
        Resolution::Resolved(DictRef::Constrained {
            class: class.clone(),
            head,
            deps,
        })
    }

}
