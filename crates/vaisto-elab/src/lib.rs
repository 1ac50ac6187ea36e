//! The elaborator: Hindley–Milner inference over the untyped AST,
//! producing a typed AST, a module interface, and accumulated diagnostics.
//!
//! Elaboration runs in two phases. Admission walks the top-level items and
//! fills the definition tables (type names first, then type bodies,
//! classes, function signatures, instances, processes) so that everything
//! is in scope before any expression is looked at. The body phase then
//! walks expressions in declaration order, threading the substitution and
//! deferring class constraints until their head variables become concrete.

mod classes;
mod defs;
mod patterns;
pub mod typed;
mod unify;

#[cfg(test)]
mod tests;

use la_arena::ArenaMap;
use smol_str::SmolStr;
use std::collections::{HashMap, HashSet};
use vaisto_ast::*;
use vaisto_diag::{suggest, Code, Diagnostic};
use vaisto_iface::{IfaceFn, IfaceProcess, ModuleInterface, IFACE_VERSION};
use vaisto_types::{
    field_var_id, rename, FreeVars, RowTail, RowVarId, Scheme, Subst, Ty, TyVarId,
};

use defs::*;
use typed::*;

/// Everything elaboration produces. The verdict is `ok()` iff no
/// error-severity diagnostic was emitted.
pub struct ElabResult {
    pub diagnostics: Vec<Diagnostic>,
    pub typed: TypedModule,
    pub interface: ModuleInterface,
    /// Resolved type of every source expression (for tooling).
    pub expr_types: ArenaMap<ExprId, Ty>,
}

impl ElabResult {
    pub fn ok(&self) -> bool {
        self.diagnostics.iter().all(|d| !d.is_error())
    }
}

pub fn elaborate(module: &Module) -> ElabResult {
    elaborate_with_imports(module, &[])
}

/// Elaborate a module with the environments of its dependencies hydrated
/// from their interface files.
pub fn elaborate_with_imports(module: &Module, imports: &[ModuleInterface]) -> ElabResult {
    let mut elab = Elaborator::new(module);
    for iface in imports {
        elab.hydrate(iface);
    }
    elab.collect_definitions();
    elab.check_items();
    elab.finish()
}

/// Maximum constrained-instance chain depth before resolution is aborted.
pub(crate) const CONSTRAINT_DEPTH_BUDGET: usize = 32;

/// A class constraint waiting for its head variable to become concrete.
pub(crate) struct PendingConstraint {
    pub(crate) class: SmolStr,
    pub(crate) ty: Ty,
    /// The `ClassCall` node to patch once the head resolves. `None` for
    /// constraints that arose from instantiating a constrained scheme.
    pub(crate) node: Option<TExprId>,
    pub(crate) loc: Loc,
}

pub(crate) struct Elaborator<'a> {
    module: &'a Module,

    pub(crate) subst: Subst,
    next_var: TyVarId,
    next_row: RowVarId,

    /// Scope stack of name → scheme. Frame 0 holds builtins, frame 1 the
    /// module globals; further frames are lambda/let/match scopes.
    scopes: Vec<HashMap<SmolStr, Scheme>>,
    /// Lambda-bound names per scope (the emitter cares which loads are
    /// frame-local).
    local_scopes: Vec<HashSet<SmolStr>>,

    pub(crate) tables: Tables,
    /// Pre-generalization signatures for module functions, with the
    /// defining item's location (so a duplicate body is not re-checked).
    fn_sigs: HashMap<SmolStr, (Vec<Ty>, Ty, Loc)>,

    pub(crate) pending: Vec<PendingConstraint>,
    /// Sends against still-free pid types: `(pid ty, tag, loc)`.
    pending_sends: Vec<(Ty, Option<SmolStr>, Loc)>,
    pub(crate) depth_exceeded: bool,

    pub(crate) diags: Vec<Diagnostic>,
    pub(crate) typed: TypedModule,
    expr_types: ArenaMap<ExprId, Ty>,
    /// Typed init expressions recorded at process admission.
    proc_inits: HashMap<SmolStr, TExprId>,
    proc_order: Vec<SmolStr>,

    /// Interface parts accumulated in declaration order.
    iface_types: Vec<vaisto_iface::IfaceType>,
    iface_classes: Vec<vaisto_iface::IfaceClass>,
    pub(crate) iface_instances: Vec<vaisto_iface::IfaceInstance>,
    iface_fns: Vec<IfaceFn>,

    /// Names offered by typo suggestions.
    lexicon: Vec<SmolStr>,
    /// Override for the mismatch code of the outermost unify failure.
    pub(crate) mismatch_code: Option<Code>,
}

/// Builtin names known to the suggestion lexicon.
const BUILTIN_LEXICON: &[&str] = &[
    "+", "-", "*", "/", "<", "<=", ">", ">=", "=", "not=", "not", "and", "or", "str", "print",
    "println", "list", "cons", "head", "tail", "len", "empty?", "tuple", "spawn",
];

impl<'a> Elaborator<'a> {
    fn new(module: &'a Module) -> Self {
        let mut elab = Self {
            module,
            subst: Subst::new(),
            next_var: 0,
            next_row: 0,
            scopes: vec![HashMap::new(), HashMap::new()],
            local_scopes: vec![HashSet::new(), HashSet::new()],
            tables: Tables::default(),
            fn_sigs: HashMap::new(),
            pending: Vec::new(),
            pending_sends: Vec::new(),
            depth_exceeded: false,
            diags: Vec::new(),
            typed: TypedModule::default(),
            expr_types: ArenaMap::default(),
            proc_inits: HashMap::new(),
            proc_order: Vec::new(),
            iface_types: Vec::new(),
            iface_classes: Vec::new(),
            iface_instances: Vec::new(),
            iface_fns: Vec::new(),
            lexicon: BUILTIN_LEXICON.iter().map(SmolStr::new).collect(),
            mismatch_code: None,
        };
        elab.typed.name = module
            .name
            .clone()
            .unwrap_or_else(|| SmolStr::new("main"));
        elab.register_builtins();
        elab
    }

    // ── Fresh variables ──────────────────────────────────────────

    pub(crate) fn fresh(&mut self) -> Ty {
        let id = self.next_var;
        self.next_var += 1;
        Ty::Var(id)
    }

    pub(crate) fn fresh_id(&mut self) -> TyVarId {
        let id = self.next_var;
        self.next_var += 1;
        id
    }

    pub(crate) fn fresh_row(&mut self) -> RowVarId {
        let id = self.next_row;
        self.next_row += 1;
        id
    }

    // ── Scopes ───────────────────────────────────────────────────

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.local_scopes.push(HashSet::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
        self.local_scopes.pop();
    }

    fn define(&mut self, name: SmolStr, scheme: Scheme) {
        self.scopes.last_mut().unwrap().insert(name, scheme);
    }

    fn define_global(&mut self, name: SmolStr, scheme: Scheme) {
        self.scopes[1].insert(name, scheme);
    }

    fn mark_local(&mut self, name: SmolStr) {
        self.local_scopes.last_mut().unwrap().insert(name);
    }

    fn lookup(&self, name: &str) -> Option<&Scheme> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn is_local(&self, name: &str) -> bool {
        self.local_scopes.iter().rev().any(|s| s.contains(name))
    }

    pub(crate) fn error(&mut self, code: Code, message: impl Into<String>, loc: Loc) {
        self.diags.push(Diagnostic::error(code, message, loc));
    }

    pub(crate) fn push_diag(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    fn suggest_name(&self, name: &str) -> Option<SmolStr> {
        let mut candidates: Vec<&str> = self.lexicon.iter().map(|s| s.as_str()).collect();
        for scope in &self.scopes {
            candidates.extend(scope.keys().map(|s| s.as_str()));
        }
        candidates.extend(self.tables.method_index.keys().map(|s| s.as_str()));
        suggest(name, candidates).map(SmolStr::new)
    }

    // ── Builtins ─────────────────────────────────────────────────

    fn register_builtins(&mut self) {
        // print / println : ∀a. (Fn [a] Unit)
        for name in ["print", "println"] {
            let a = self.fresh_id();
            self.scopes[0].insert(
                SmolStr::new(name),
                Scheme {
                    vars: vec![a],
                    row_vars: vec![],
                    constraints: vec![],
                    ty: Ty::Fn(vec![Ty::Var(a)], Box::new(Ty::Unit)),
                },
            );
        }
        // not : (Fn [Bool] Bool); and/or : (Fn [Bool Bool] Bool)
        self.scopes[0].insert(
            SmolStr::new("not"),
            Scheme::mono(Ty::Fn(vec![Ty::Bool], Box::new(Ty::Bool))),
        );
        for name in ["and", "or"] {
            self.scopes[0].insert(
                SmolStr::new(name),
                Scheme::mono(Ty::Fn(vec![Ty::Bool, Ty::Bool], Box::new(Ty::Bool))),
            );
        }
        // List builtins
        let list_builtins: &[(&str, fn(Ty) -> (Vec<Ty>, Ty))] = &[
            ("cons", |a| {
                (
                    vec![a.clone(), Ty::List(Box::new(a.clone()))],
                    Ty::List(Box::new(a)),
                )
            }),
            ("head", |a| (vec![Ty::List(Box::new(a.clone()))], a)),
            ("tail", |a| {
                (
                    vec![Ty::List(Box::new(a.clone()))],
                    Ty::List(Box::new(a)),
                )
            }),
            ("len", |a| (vec![Ty::List(Box::new(a))], Ty::Int)),
            ("empty?", |a| (vec![Ty::List(Box::new(a))], Ty::Bool)),
        ];
        for (name, make) in list_builtins {
            let a = self.fresh_id();
            let (params, ret) = make(Ty::Var(a));
            self.scopes[0].insert(
                SmolStr::new(*name),
                Scheme {
                    vars: vec![a],
                    row_vars: vec![],
                    constraints: vec![],
                    ty: Ty::Fn(params, Box::new(ret)),
                },
            );
        }

        self.register_builtin_classes();
    }

    // ── Instantiation and generalization ─────────────────────────

    /// Fresh copy of a scheme's body; scheme constraints are re-deferred
    /// against the freshened variables.
    pub(crate) fn instantiate(&mut self, scheme: &Scheme, loc: Loc) -> Ty {
        if scheme.is_mono() {
            return scheme.ty.clone();
        }
        let tmap: HashMap<TyVarId, Ty> = scheme
            .vars
            .iter()
            .map(|&v| (v, self.fresh()))
            .collect();
        let rmap: HashMap<RowVarId, RowVarId> = scheme
            .row_vars
            .iter()
            .map(|&r| (r, self.fresh_row()))
            .collect();
        for (class, cty) in &scheme.constraints {
            let cty = rename(cty, &tmap, &rmap);
            self.pending.push(PendingConstraint {
                class: class.clone(),
                ty: cty,
                node: None,
                loc,
            });
        }
        rename(&scheme.ty, &tmap, &rmap)
    }

    /// Free variables of every scheme currently in scope.
    fn env_free_vars(&self) -> FreeVars {
        let mut out = FreeVars::default();
        for scope in &self.scopes {
            for scheme in scope.values() {
                let mut fv = self.subst.free_vars(&scheme.ty);
                for v in &scheme.vars {
                    fv.tys.remove(v);
                }
                for r in &scheme.row_vars {
                    fv.rows.remove(r);
                }
                out.extend(fv);
            }
        }
        out
    }

    /// Quantify over the variables free in `ty` but not in the
    /// environment. Performed only at `let`/`defn` boundaries. Pending
    /// class constraints over newly quantified variables move into the
    /// scheme so call sites re-check them.
    pub(crate) fn generalize(&mut self, ty: &Ty) -> Scheme {
        let applied = self.subst.apply(ty);
        let fv = self.subst.free_vars(&applied);
        let env_fv = self.env_free_vars();

        let vars: Vec<TyVarId> = fv
            .tys
            .iter()
            .copied()
            .filter(|v| !env_fv.tys.contains(v))
            .collect();
        let row_vars: Vec<RowVarId> = fv
            .rows
            .iter()
            .copied()
            .filter(|r| !env_fv.rows.contains(r))
            .collect();

        if vars.is_empty() && row_vars.is_empty() {
            return Scheme::mono(applied);
        }

        let mut constraints = Vec::new();
        let mut remaining = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for c in pending {
            let applied = self.subst.apply(&c.ty);
            match &applied {
                Ty::Var(v) if vars.contains(v) => {
                    constraints.push((c.class.clone(), Ty::Var(*v)));
                }
                Ty::Var(_) => remaining.push(c),
                _ => {
                    // A constructed head mentioning quantified variables
                    // reduces through its instance's constraints to leaf
                    // constraints on those variables (context reduction).
                    let fv = self.subst.free_vars(&applied);
                    if fv.tys.iter().any(|v| vars.contains(v)) {
                        self.reduce_for_scheme(&c, &applied, &mut constraints);
                    } else {
                        remaining.push(c);
                    }
                }
            }
        }
        self.pending = remaining;
        constraints.sort_by_key(|(c, t)| (c.clone(), t.to_string()));
        constraints.dedup();

        Scheme {
            vars,
            row_vars,
            constraints,
            ty: applied,
        }
    }

    // ── Type expression resolution ───────────────────────────────

    /// Walk a type expression collecting type-variable names in order of
    /// first appearance (used to discover a sum's parameter list).
    fn collect_tyvar_names(&self, id: TypeExprId, out: &mut Vec<SmolStr>) {
        match &self.module.type_exprs[id].kind {
            TypeExprKind::TypeVar(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TypeExprKind::Named(_) => {}
            TypeExprKind::Applied { args, .. } => {
                for &a in args {
                    self.collect_tyvar_names(a, out);
                }
            }
            TypeExprKind::Tuple(elems) => {
                for &e in elems {
                    self.collect_tyvar_names(e, out);
                }
            }
            TypeExprKind::Fn { params, ret } => {
                for &p in params {
                    self.collect_tyvar_names(p, out);
                }
                self.collect_tyvar_names(*ret, out);
            }
        }
    }

    fn resolve_type_expr(
        &mut self,
        id: TypeExprId,
        tyvars: &mut HashMap<SmolStr, Ty>,
        allow_new_vars: bool,
    ) -> Ty {
        let texpr = &self.module.type_exprs[id];
        let loc = texpr.loc;
        match texpr.kind.clone() {
            TypeExprKind::Named(name) => self.resolve_named_type(&name, &[], loc, tyvars, allow_new_vars),
            TypeExprKind::TypeVar(name) => {
                if let Some(ty) = tyvars.get(&name) {
                    ty.clone()
                } else if allow_new_vars {
                    let ty = self.fresh();
                    tyvars.insert(name, ty.clone());
                    ty
                } else {
                    self.error(
                        Code::UnknownType,
                        format!("unknown type variable `{}`", name),
                        loc,
                    );
                    Ty::Any
                }
            }
            TypeExprKind::Applied { name, args } => {
                let args: Vec<TypeExprId> = args;
                self.resolve_named_type(&name, &args, loc, tyvars, allow_new_vars)
            }
            TypeExprKind::Tuple(elems) => Ty::Tuple(
                elems
                    .iter()
                    .map(|&e| self.resolve_type_expr(e, tyvars, allow_new_vars))
                    .collect(),
            ),
            TypeExprKind::Fn { params, ret } => {
                let p: Vec<Ty> = params
                    .iter()
                    .map(|&t| self.resolve_type_expr(t, tyvars, allow_new_vars))
                    .collect();
                let r = self.resolve_type_expr(ret, tyvars, allow_new_vars);
                Ty::Fn(p, Box::new(r))
            }
        }
    }

    fn resolve_named_type(
        &mut self,
        name: &str,
        args: &[TypeExprId],
        loc: Loc,
        tyvars: &mut HashMap<SmolStr, Ty>,
        allow_new_vars: bool,
    ) -> Ty {
        let arg_tys: Vec<Ty> = args
            .iter()
            .map(|&a| self.resolve_type_expr(a, tyvars, allow_new_vars))
            .collect();
        let arity_err = |elab: &mut Self, expected: usize| {
            elab.error(
                Code::UnknownType,
                format!(
                    "type `{}` expects {} argument(s), got {}",
                    name,
                    expected,
                    arg_tys.len()
                ),
                loc,
            );
            Ty::Any
        };
        match name {
            "Int" | "Float" | "Bool" | "String" | "Atom" | "Unit" | "Any" | "Pid" => {
                if !arg_tys.is_empty() {
                    return arity_err(self, 0);
                }
                match name {
                    "Int" => Ty::Int,
                    "Float" => Ty::Float,
                    "Bool" => Ty::Bool,
                    "String" => Ty::Str,
                    "Atom" => Ty::Atom,
                    "Unit" => Ty::Unit,
                    "Any" => Ty::Any,
                    "Pid" => Ty::Pid,
                    _ => unreachable!(),
                }
            }
            "List" => {
                if arg_tys.len() != 1 {
                    return arity_err(self, 1);
                }
                Ty::List(Box::new(arg_tys.into_iter().next().unwrap()))
            }
            _ => {
                let expected = if let Some(sum) = self.tables.sums.get(name) {
                    sum.params.len()
                } else if self.tables.recs.contains_key(name) {
                    0
                } else {
                    self.error(Code::UnknownType, format!("undefined type `{}`", name), loc);
                    return Ty::Any;
                };
                if arg_tys.len() != expected {
                    return arity_err(self, expected);
                }
                Ty::Named {
                    name: SmolStr::new(name),
                    args: arg_tys,
                }
            }
        }
    }

    // ── Interface hydration ──────────────────────────────────────

    /// Load a dependency's interface into the environment and tables.
    fn hydrate(&mut self, iface: &ModuleInterface) {
        for f in &iface.fns {
            self.scopes[1].insert(f.name.clone(), f.scheme.clone());
        }
        for t in &iface.types {
            match t {
                vaisto_iface::IfaceType::Sum {
                    name,
                    param_vars,
                    variants,
                } => {
                    let params: Vec<SmolStr> = (0..param_vars.len())
                        .map(|i| SmolStr::new(format!("a{}", i)))
                        .collect();
                    for (i, (ctor, _)) in variants.iter().enumerate() {
                        self.tables
                            .ctors
                            .insert(ctor.clone(), CtorDef::Sum(name.clone(), i));
                    }
                    self.tables.sums.insert(
                        name.clone(),
                        SumDef {
                            name: name.clone(),
                            params,
                            param_vars: param_vars.clone(),
                            variants: variants.clone(),
                            loc: Loc::new(0, 0),
                        },
                    );
                }
                vaisto_iface::IfaceType::Record { name, fields } => {
                    self.tables
                        .ctors
                        .insert(name.clone(), CtorDef::Record(name.clone()));
                    self.tables.recs.insert(
                        name.clone(),
                        RecDef {
                            name: name.clone(),
                            fields: fields.clone(),
                            loc: Loc::new(0, 0),
                        },
                    );
                }
            }
        }
        for c in &iface.classes {
            let methods: Vec<ClassMethod> = c
                .methods
                .iter()
                .map(|m| {
                    let mut extra = FreeVars::default();
                    for p in &m.params {
                        vaisto_types::collect_free(p, &mut extra);
                    }
                    vaisto_types::collect_free(&m.ret, &mut extra);
                    extra.tys.remove(&c.class_var);
                    ClassMethod {
                        name: m.name.clone(),
                        params: m.params.clone(),
                        ret: m.ret.clone(),
                        extra_vars: extra.tys.into_iter().collect(),
                        default: None,
                        has_default: m.has_default,
                    }
                })
                .collect();
            for m in &methods {
                self.tables
                    .method_index
                    .insert(m.name.clone(), (c.name.clone(), m.name.clone()));
            }
            self.tables.classes.insert(
                c.name.clone(),
                ClassDef {
                    name: c.name.clone(),
                    class_var: c.class_var,
                    methods,
                    loc: Loc::new(0, 0),
                },
            );
        }
        for i in &iface.instances {
            self.tables.instances.insert(
                (i.class.clone(), i.head.clone()),
                InstanceEntry {
                    class: i.class.clone(),
                    head: i.head.clone(),
                    head_arity: i.head_arity,
                    constraints: i.constraints.clone(),
                    methods: Vec::new(),
                    derived: i.derived,
                    loc: Loc::new(0, 0),
                },
            );
        }
        for p in &iface.processes {
            self.tables.processes.insert(
                p.name.clone(),
                ProcDef {
                    name: p.name.clone(),
                    state: p.state.clone(),
                    msgs: p.msgs.clone(),
                    loc: Loc::new(0, 0),
                },
            );
        }
    }

    // ── Collection passes ────────────────────────────────────────

    fn collect_definitions(&mut self) {
        // Pass 1: admit all type names (so bodies may be mutually
        // recursive).
        for (item, _) in &self.module.items.clone() {
            match item {
                Item::Deftype(d) => self.admit_sum_name(d),
                Item::Defrecord(d) => self.admit_record_name(d),
                _ => {}
            }
        }
        // Pass 2: resolve type bodies, then run deriving.
        for (item, _) in &self.module.items.clone() {
            match item {
                Item::Deftype(d) => self.resolve_sum_body(d),
                Item::Defrecord(d) => self.resolve_record_body(d),
                _ => {}
            }
        }
        for (item, _) in &self.module.items.clone() {
            match item {
                Item::Deftype(d) => self.run_deriving(&d.name, &d.deriving),
                Item::Defrecord(d) => self.run_deriving(&d.name, &d.deriving),
                _ => {}
            }
        }
        // Pass 3: classes.
        for (item, _) in &self.module.items.clone() {
            if let Item::Defclass(d) = item {
                self.admit_class(d);
            }
        }
        // Pass 4: function signatures (monotypes, so recursion works).
        for (item, _) in &self.module.items.clone() {
            if let Item::Defn(d) = item {
                self.admit_defn_sig(d);
            }
        }
        // Pass 5: instances.
        for (item, _) in &self.module.items.clone() {
            if let Item::Instance(d) = item {
                self.admit_instance(d);
            }
        }
        // Pass 6: processes (state type comes from the init expression).
        for (item, _) in &self.module.items.clone() {
            if let Item::Process(d) = item {
                self.admit_process(d);
            }
        }
    }

    fn admit_sum_name(&mut self, d: &Deftype) {
        if self.tables.sums.contains_key(&d.name) || self.tables.recs.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate type definition `{}`", d.name),
                d.name_loc,
            );
            return;
        }
        let mut params = Vec::new();
        for v in &d.variants {
            for &f in &v.fields {
                self.collect_tyvar_names(f, &mut params);
            }
        }
        let param_vars: Vec<TyVarId> = params.iter().map(|_| self.fresh_id()).collect();
        self.tables.sums.insert(
            d.name.clone(),
            SumDef {
                name: d.name.clone(),
                params,
                param_vars,
                variants: Vec::new(),
                loc: d.loc,
            },
        );
    }

    fn admit_record_name(&mut self, d: &Defrecord) {
        if self.tables.sums.contains_key(&d.name) || self.tables.recs.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate type definition `{}`", d.name),
                d.name_loc,
            );
            return;
        }
        self.tables.recs.insert(
            d.name.clone(),
            RecDef {
                name: d.name.clone(),
                fields: Vec::new(),
                loc: d.loc,
            },
        );
    }

    fn resolve_sum_body(&mut self, d: &Deftype) {
        let Some(def) = self.tables.sums.get(&d.name) else {
            return;
        };
        if !def.variants.is_empty() {
            return; // duplicate definition, first one won
        }
        let mut tyvars: HashMap<SmolStr, Ty> = def
            .params
            .iter()
            .zip(def.param_vars.iter())
            .map(|(n, &v)| (n.clone(), Ty::Var(v)))
            .collect();

        let mut variants = Vec::new();
        for (i, v) in d.variants.iter().enumerate() {
            if self.tables.ctors.contains_key(&v.name) {
                self.error(
                    Code::DuplicateDefinition,
                    format!("duplicate constructor `{}`", v.name),
                    v.name_loc,
                );
                continue;
            }
            let fields: Vec<Ty> = v
                .fields
                .iter()
                .map(|&f| self.resolve_type_expr(f, &mut tyvars, false))
                .collect();
            self.tables
                .ctors
                .insert(v.name.clone(), CtorDef::Sum(d.name.clone(), i));
            variants.push((v.name.clone(), fields));
        }
        let def = self.tables.sums.get_mut(&d.name).unwrap();
        def.variants = variants;

        let def = self.tables.sums[&d.name].clone();
        let normalized = normalize_sum_templates(&def);
        self.iface_types.push(normalized);
    }

    fn resolve_record_body(&mut self, d: &Defrecord) {
        if self
            .tables
            .recs
            .get(&d.name)
            .map_or(true, |r| !r.fields.is_empty())
        {
            return;
        }
        let mut tyvars = HashMap::new();
        let mut fields = Vec::new();
        for f in &d.fields {
            if fields.iter().any(|(n, _)| n == &f.name) {
                self.error(
                    Code::DuplicateDefinition,
                    format!("duplicate field `{}` in record `{}`", f.name, d.name),
                    f.name_loc,
                );
                continue;
            }
            let ty = self.resolve_type_expr(f.ty, &mut tyvars, false);
            fields.push((f.name.clone(), ty));
        }
        if self.tables.ctors.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate constructor `{}`", d.name),
                d.name_loc,
            );
        } else {
            self.tables
                .ctors
                .insert(d.name.clone(), CtorDef::Record(d.name.clone()));
        }
        let rec = self.tables.recs.get_mut(&d.name).unwrap();
        rec.fields = fields.clone();
        self.iface_types.push(vaisto_iface::IfaceType::Record {
            name: d.name.clone(),
            fields,
        });
    }

    fn admit_defn_sig(&mut self, d: &Defn) {
        if self.fn_sigs.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate function definition `{}`", d.name),
                d.name_loc,
            );
            return;
        }
        let params: Vec<Ty> = d.params.iter().map(|_| self.fresh()).collect();
        let ret = self.fresh();
        self.define_global(
            d.name.clone(),
            Scheme::mono(Ty::Fn(params.clone(), Box::new(ret.clone()))),
        );
        self.fn_sigs.insert(d.name.clone(), (params, ret, d.loc));
        self.lexicon.push(d.name.clone());
    }

    fn admit_process(&mut self, d: &ProcessDef) {
        if self.tables.processes.contains_key(&d.name) {
            self.error(
                Code::DuplicateDefinition,
                format!("duplicate process definition `{}`", d.name),
                d.name_loc,
            );
            return;
        }
        let (init_texpr, init_ty) = self.infer_expr(d.init);
        let mut msgs: Vec<SmolStr> = Vec::new();
        for h in &d.handlers {
            if msgs.contains(&h.tag) {
                self.error(
                    Code::DuplicateDefinition,
                    format!("duplicate message tag `:{}` in process `{}`", h.tag, d.name),
                    h.tag_loc,
                );
                continue;
            }
            msgs.push(h.tag.clone());
        }
        msgs.sort();
        self.tables.processes.insert(
            d.name.clone(),
            ProcDef {
                name: d.name.clone(),
                state: init_ty,
                msgs,
                loc: d.loc,
            },
        );
        self.proc_inits.insert(d.name.clone(), init_texpr);
        self.proc_order.push(d.name.clone());
    }

    // ── Body phase ───────────────────────────────────────────────

    fn check_items(&mut self) {
        for (item, _) in &self.module.items.clone() {
            match item {
                Item::Defn(d) => self.check_defn(d),
                Item::Instance(d) => self.check_instance_bodies(d),
                Item::Process(d) => self.check_process_handlers(d),
                Item::TopExpr(e) => {
                    let (texpr, _) = self.infer_expr(*e);
                    self.typed.main.push(texpr);
                }
                _ => {}
            }
        }
    }

    fn check_defn(&mut self, d: &Defn) {
        let Some((param_tys, ret_ty, sig_loc)) = self.fn_sigs.get(&d.name).cloned() else {
            return;
        };
        if sig_loc != d.loc {
            return; // a duplicate definition; only the first is checked
        }
        self.push_scope();
        for (p, ty) in d.params.iter().zip(param_tys.iter()) {
            self.define(p.name.clone(), Scheme::mono(ty.clone()));
            self.mark_local(p.name.clone());
        }
        let (body, body_ty) = self.infer_body(&d.body);
        let body_loc = d
            .body
            .last()
            .map(|&e| self.module.exprs[e].loc)
            .unwrap_or(d.loc);
        self.unify_code(&body_ty, &ret_ty, body_loc, Code::ReturnType);
        self.pop_scope();

        self.resolve_pending(false);

        // The function's own monotype signature must not pin its
        // variables to the environment while generalizing.
        self.scopes[1].remove(&d.name);
        let scheme = self.generalize(&Ty::Fn(param_tys, Box::new(ret_ty)));
        self.define_global(d.name.clone(), scheme.clone());
        self.typed.defs.push(TDef {
            name: d.name.clone(),
            params: d.params.iter().map(|p| p.name.clone()).collect(),
            body,
            scheme,
            loc: d.loc,
        });
    }

    fn check_process_handlers(&mut self, d: &ProcessDef) {
        let Some(proc) = self.tables.processes.get(&d.name).cloned() else {
            return;
        };
        if proc.loc != d.loc {
            return; // a duplicate declaration; only the first is checked
        }
        let Some(&init) = self.proc_inits.get(&d.name) else {
            return;
        };
        let mut handlers = Vec::new();
        for h in &d.handlers {
            self.push_scope();
            self.define(SmolStr::new("state"), Scheme::mono(proc.state.clone()));
            let (body, body_ty) = self.infer_expr(h.body);
            let hloc = self.module.exprs[h.body].loc;
            self.unify(&body_ty, &proc.state, hloc);
            self.pop_scope();
            handlers.push((h.tag.clone(), body));
        }
        self.typed.processes.push(TProcess {
            name: d.name.clone(),
            state: proc.state.clone(),
            init,
            handlers,
            loc: d.loc,
        });
    }

    pub(crate) fn infer_body(&mut self, exprs: &[ExprId]) -> (Vec<TExprId>, Ty) {
        let mut out = Vec::new();
        let mut ty = Ty::Unit;
        for &e in exprs {
            let (texpr, t) = self.infer_expr(e);
            out.push(texpr);
            ty = t;
        }
        (out, ty)
    }

    fn alloc(&mut self, kind: TExprKind, ty: Ty, loc: Loc) -> TExprId {
        self.typed.exprs.alloc(TExpr { kind, ty, loc })
    }

    // ── Expression elaboration ───────────────────────────────────

    pub(crate) fn infer_expr(&mut self, id: ExprId) -> (TExprId, Ty) {
        let expr = self.module.exprs[id].clone();
        let loc = expr.loc;
        let (texpr, ty) = match &expr.kind {
            ExprKind::Lit(Literal::Int(n)) => (self.alloc(TExprKind::Int(*n), Ty::Int, loc), Ty::Int),
            ExprKind::Lit(Literal::Float(x)) => {
                (self.alloc(TExprKind::Float(*x), Ty::Float, loc), Ty::Float)
            }
            ExprKind::Lit(Literal::String(s)) => (
                self.alloc(TExprKind::Str(s.clone()), Ty::Str, loc),
                Ty::Str,
            ),
            ExprKind::Lit(Literal::Bool(b)) => {
                (self.alloc(TExprKind::Bool(*b), Ty::Bool, loc), Ty::Bool)
            }
            ExprKind::Atom(a) => {
                let ty = Ty::AtomLit(a.clone());
                (self.alloc(TExprKind::Atom(a.clone()), ty.clone(), loc), ty)
            }
            ExprKind::Var(name) => self.infer_var(name, loc),
            ExprKind::Call { func, args } => self.infer_call(*func, args, loc),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.infer_if(*condition, *then_branch, *else_branch, loc),
            ExprKind::Let { bindings, body } => self.infer_let(bindings, body, loc),
            ExprKind::Lambda { params, body } => self.infer_lambda(params, body, loc),
            ExprKind::Do { body } => {
                let (texprs, ty) = self.infer_body(body);
                (
                    self.alloc(TExprKind::Do { body: texprs }, ty.clone(), loc),
                    ty,
                )
            }
            ExprKind::Match { scrutinee, arms } => self.infer_match(*scrutinee, arms, loc),
            ExprKind::FieldAccess { record, field } => {
                self.infer_field_access(*record, field, loc)
            }
            ExprKind::ListLit(elems) => self.infer_list(elems, loc),
            ExprKind::TupleLit(elems) => {
                let mut texprs = Vec::new();
                let mut tys = Vec::new();
                for &e in elems {
                    let (texpr, t) = self.infer_expr(e);
                    texprs.push(texpr);
                    tys.push(t);
                }
                let ty = Ty::Tuple(tys);
                (
                    self.alloc(TExprKind::TupleLit(texprs), ty.clone(), loc),
                    ty,
                )
            }
            ExprKind::Spawn { process, init } => self.infer_spawn(process, *init, loc),
            ExprKind::Send {
                pid,
                msg,
                unchecked,
            } => self.infer_send(*pid, *msg, *unchecked, loc),
        };
        self.expr_types.insert(id, ty.clone());
        (texpr, ty)
    }

    fn infer_var(&mut self, name: &SmolStr, loc: Loc) -> (TExprId, Ty) {
        if let Some(scheme) = self.lookup(name).cloned() {
            let ty = self.instantiate(&scheme, loc);
            let local = self.is_local(name);
            return (
                self.alloc(
                    TExprKind::Var {
                        name: name.clone(),
                        local,
                    },
                    ty.clone(),
                    loc,
                ),
                ty,
            );
        }
        // A constructor used as a value becomes a function.
        if let Some(ctor) = self.tables.ctors.get(name).cloned() {
            let (field_tys, result) = self.instantiate_ctor(&ctor);
            let ty = Ty::Fn(field_tys, Box::new(result));
            return (
                self.alloc(
                    TExprKind::Var {
                        name: name.clone(),
                        local: false,
                    },
                    ty.clone(),
                    loc,
                ),
                ty,
            );
        }
        // A bare lowercase symbol evaluates to an atom literal of the
        // universal type — unless it looks like a known name gone missing.
        if is_tyvar_name(name) && !self.lexicon.contains(name) {
            return (
                self.alloc(TExprKind::Atom(name.clone()), Ty::Atom, loc),
                Ty::Atom,
            );
        }
        let mut diag = Diagnostic::error(
            Code::UndefinedVariable,
            format!("undefined variable `{}`", name),
            loc,
        );
        if let Some(s) = self.suggest_name(name) {
            diag = diag.with_hint(format!("did you mean `{}`?", s));
        }
        self.push_diag(diag);
        (
            self.alloc(
                TExprKind::Var {
                    name: name.clone(),
                    local: false,
                },
                Ty::Any,
                loc,
            ),
            Ty::Any,
        )
    }

    fn infer_call(&mut self, func: ExprId, args: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        if let ExprKind::Var(name) = &self.module.exprs[func].kind.clone() {
            match name.as_str() {
                "+" | "-" | "*" | "/" => return self.infer_arith(name, args, loc),
                "<" | "<=" | ">" | ">=" => return self.infer_compare(name, args, loc),
                "str" => return self.infer_str(args, loc),
                "list" => return self.infer_list(args, loc),
                _ => {}
            }
            // An explicit binding shadows a class method of the same name.
            if self.lookup(name).is_none() {
                if let Some((class, method)) = self.tables.method_index.get(name).cloned() {
                    return self.infer_class_call(&class, &method, args, loc);
                }
                if let Some(ctor) = self.tables.ctors.get(name).cloned() {
                    return self.infer_ctor_call(name, &ctor, args, loc);
                }
                let mut diag = Diagnostic::error(
                    Code::UnknownFunction,
                    format!("unknown function `{}`", name),
                    self.module.exprs[func].loc,
                );
                if let Some(s) = self.suggest_name(name) {
                    diag = diag.with_hint(format!("did you mean `{}`?", s));
                }
                self.push_diag(diag);
                // Recover: still elaborate arguments.
                let texprs: Vec<TExprId> =
                    args.iter().map(|&a| self.infer_expr(a).0).collect();
                let fnode = self.alloc(
                    TExprKind::Var {
                        name: name.clone(),
                        local: false,
                    },
                    Ty::Any,
                    self.module.exprs[func].loc,
                );
                return (
                    self.alloc(
                        TExprKind::Call {
                            func: fnode,
                            args: texprs,
                        },
                        Ty::Any,
                        loc,
                    ),
                    Ty::Any,
                );
            }
        }

        let (ftexpr, fty) = self.infer_expr(func);
        let higher_order = matches!(
            &self.module.exprs[func].kind,
            ExprKind::Var(name) if self.is_local(name)
        );
        self.apply_call(ftexpr, &fty, args, loc, higher_order)
    }

    fn apply_call(
        &mut self,
        ftexpr: TExprId,
        fty: &Ty,
        args: &[ExprId],
        loc: Loc,
        higher_order: bool,
    ) -> (TExprId, Ty) {
        let applied = self.subst.apply(fty);
        match applied {
            Ty::Fn(params, ret) => {
                if params.len() != args.len() {
                    let code = if higher_order {
                        Code::HigherOrderArity
                    } else {
                        Code::Arity
                    };
                    self.error(
                        code,
                        format!(
                            "expected {} argument(s), got {}",
                            params.len(),
                            args.len()
                        ),
                        loc,
                    );
                    let texprs: Vec<TExprId> =
                        args.iter().map(|&a| self.infer_expr(a).0).collect();
                    return (
                        self.alloc(
                            TExprKind::Call {
                                func: ftexpr,
                                args: texprs,
                            },
                            Ty::Any,
                            loc,
                        ),
                        Ty::Any,
                    );
                }
                let mut texprs = Vec::new();
                for (&a, p) in args.iter().zip(params.iter()) {
                    let (texpr, aty) = self.infer_expr(a);
                    let aloc = self.module.exprs[a].loc;
                    self.unify(&aty, p, aloc);
                    texprs.push(texpr);
                }
                let ret = self.subst.apply(&ret);
                (
                    self.alloc(
                        TExprKind::Call {
                            func: ftexpr,
                            args: texprs,
                        },
                        ret.clone(),
                        loc,
                    ),
                    ret,
                )
            }
            Ty::Var(_) => {
                // Unknown callee type: build a skeleton and unify.
                let mut texprs = Vec::new();
                let mut param_tys = Vec::new();
                for &a in args {
                    let (texpr, aty) = self.infer_expr(a);
                    texprs.push(texpr);
                    param_tys.push(aty);
                }
                let ret = self.fresh();
                self.unify(
                    &applied,
                    &Ty::Fn(param_tys, Box::new(ret.clone())),
                    loc,
                );
                let ret = self.subst.apply(&ret);
                (
                    self.alloc(
                        TExprKind::Call {
                            func: ftexpr,
                            args: texprs,
                        },
                        ret.clone(),
                        loc,
                    ),
                    ret,
                )
            }
            Ty::Any => {
                let texprs: Vec<TExprId> =
                    args.iter().map(|&a| self.infer_expr(a).0).collect();
                (
                    self.alloc(
                        TExprKind::Call {
                            func: ftexpr,
                            args: texprs,
                        },
                        Ty::Any,
                        loc,
                    ),
                    Ty::Any,
                )
            }
            other => {
                self.error(
                    Code::NotAFunction,
                    format!("`{}` is not a function", other),
                    loc,
                );
                let texprs: Vec<TExprId> =
                    args.iter().map(|&a| self.infer_expr(a).0).collect();
                (
                    self.alloc(
                        TExprKind::Call {
                            func: ftexpr,
                            args: texprs,
                        },
                        Ty::Any,
                        loc,
                    ),
                    Ty::Any,
                )
            }
        }
    }

    fn infer_ctor_call(
        &mut self,
        name: &SmolStr,
        ctor: &CtorDef,
        args: &[ExprId],
        loc: Loc,
    ) -> (TExprId, Ty) {
        let (field_tys, result) = self.instantiate_ctor(ctor);
        let type_name = match ctor {
            CtorDef::Sum(t, _) => t.clone(),
            CtorDef::Record(t) => t.clone(),
        };
        if field_tys.len() != args.len() {
            self.error(
                Code::Arity,
                format!(
                    "constructor `{}` expects {} argument(s), got {}",
                    name,
                    field_tys.len(),
                    args.len()
                ),
                loc,
            );
            let texprs: Vec<TExprId> = args.iter().map(|&a| self.infer_expr(a).0).collect();
            return (
                self.alloc(
                    TExprKind::Ctor {
                        type_name,
                        ctor: name.clone(),
                        args: texprs,
                    },
                    Ty::Any,
                    loc,
                ),
                Ty::Any,
            );
        }
        let mut texprs = Vec::new();
        for (&a, fty) in args.iter().zip(field_tys.iter()) {
            let (texpr, aty) = self.infer_expr(a);
            let aloc = self.module.exprs[a].loc;
            self.unify(&aty, fty, aloc);
            texprs.push(texpr);
        }
        let result = self.subst.apply(&result);
        (
            self.alloc(
                TExprKind::Ctor {
                    type_name,
                    ctor: name.clone(),
                    args: texprs,
                },
                result.clone(),
                loc,
            ),
            result,
        )
    }

    /// Instantiate a constructor: fresh type arguments, renamed field
    /// templates, and the resulting nominal type.
    pub(crate) fn instantiate_ctor(&mut self, ctor: &CtorDef) -> (Vec<Ty>, Ty) {
        match ctor {
            CtorDef::Sum(type_name, idx) => {
                let def = self.tables.sums[type_name].clone();
                let tmap: HashMap<TyVarId, Ty> = def
                    .param_vars
                    .iter()
                    .map(|&v| (v, self.fresh()))
                    .collect();
                let args: Vec<Ty> = def.param_vars.iter().map(|v| tmap[v].clone()).collect();
                let fields = def
                    .variants
                    .get(*idx)
                    .map(|(_, fs)| {
                        fs.iter()
                            .map(|t| rename(t, &tmap, &HashMap::new()))
                            .collect()
                    })
                    .unwrap_or_default();
                (
                    fields,
                    Ty::Named {
                        name: type_name.clone(),
                        args,
                    },
                )
            }
            CtorDef::Record(type_name) => {
                let def = self.tables.recs[type_name].clone();
                let fields = def.fields.iter().map(|(_, t)| t.clone()).collect();
                (
                    fields,
                    Ty::Named {
                        name: type_name.clone(),
                        args: Vec::new(),
                    },
                )
            }
        }
    }

    /// `+ - * /`: the only implicit numeric widening in the language.
    fn infer_arith(&mut self, op: &SmolStr, args: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        if args.len() != 2 {
            self.error(
                Code::Arity,
                format!("`{}` expects 2 arguments, got {}", op, args.len()),
                loc,
            );
        }
        let mut texprs = Vec::new();
        let mut tys = Vec::new();
        for &a in args {
            let (texpr, ty) = self.infer_expr(a);
            texprs.push(texpr);
            tys.push((self.subst.apply(&ty), self.module.exprs[a].loc));
        }
        let mut saw_float = false;
        let mut saw_any = false;
        // Unbound operands default to Int unless the other side is Float.
        let other_float = tys.iter().any(|(t, _)| matches!(t, Ty::Float));
        for (ty, aloc) in &tys {
            match ty {
                Ty::Int => {}
                Ty::Float => saw_float = true,
                Ty::Any => saw_any = true,
                Ty::Var(_) => {
                    let target = if other_float { Ty::Float } else { Ty::Int };
                    self.unify(ty, &target, *aloc);
                    saw_float |= other_float;
                }
                other => {
                    self.error(
                        Code::InvalidOperand,
                        format!("invalid operand for `{}`: {}", op, other),
                        *aloc,
                    );
                    saw_any = true;
                }
            }
        }
        let ty = if op.as_str() == "/" {
            Ty::Float
        } else if saw_float {
            Ty::Float
        } else if saw_any {
            Ty::Any
        } else {
            Ty::Int
        };
        let fnode = self.alloc(
            TExprKind::Var {
                name: op.clone(),
                local: false,
            },
            Ty::Fn(
                tys.iter().map(|(t, _)| t.clone()).collect(),
                Box::new(ty.clone()),
            ),
            loc,
        );
        (
            self.alloc(
                TExprKind::Call {
                    func: fnode,
                    args: texprs,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_compare(&mut self, op: &SmolStr, args: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        if args.len() != 2 {
            self.error(
                Code::Arity,
                format!("`{}` expects 2 arguments, got {}", op, args.len()),
                loc,
            );
        }
        let mut texprs = Vec::new();
        let mut tys = Vec::new();
        for &a in args {
            let (texpr, ty) = self.infer_expr(a);
            texprs.push(texpr);
            tys.push((ty, self.module.exprs[a].loc));
        }
        if tys.len() == 2 {
            let (a, aloc) = tys[0].clone();
            let (b, _) = tys[1].clone();
            self.unify(&a, &b, aloc);
            let resolved = self.subst.apply(&a);
            match resolved {
                Ty::Int | Ty::Float | Ty::Any => {}
                Ty::Var(_) => {
                    self.unify(&resolved, &Ty::Int, aloc);
                }
                other => {
                    self.error(
                        Code::InvalidOperand,
                        format!("invalid operand for `{}`: {}", op, other),
                        aloc,
                    );
                }
            }
        }
        let fnode = self.alloc(
            TExprKind::Var {
                name: op.clone(),
                local: false,
            },
            Ty::Fn(
                tys.iter().map(|(t, _)| self.subst.apply(t)).collect(),
                Box::new(Ty::Bool),
            ),
            loc,
        );
        (
            self.alloc(
                TExprKind::Call {
                    func: fnode,
                    args: texprs,
                },
                Ty::Bool,
                loc,
            ),
            Ty::Bool,
        )
    }

    /// `str` is variadic: any arguments, `String` result.
    fn infer_str(&mut self, args: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        let texprs: Vec<TExprId> = args.iter().map(|&a| self.infer_expr(a).0).collect();
        let fnode = self.alloc(
            TExprKind::Var {
                name: SmolStr::new("str"),
                local: false,
            },
            Ty::Any,
            loc,
        );
        (
            self.alloc(
                TExprKind::Call {
                    func: fnode,
                    args: texprs,
                },
                Ty::Str,
                loc,
            ),
            Ty::Str,
        )
    }

    fn infer_list(&mut self, elems: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        let elem = self.fresh();
        let mut texprs = Vec::new();
        for &e in elems {
            let (texpr, ty) = self.infer_expr(e);
            let eloc = self.module.exprs[e].loc;
            self.unify_code(&ty, &elem, eloc, Code::HeterogeneousList);
            texprs.push(texpr);
        }
        let ty = Ty::List(Box::new(self.subst.apply(&elem)));
        (
            self.alloc(TExprKind::ListLit(texprs), ty.clone(), loc),
            ty,
        )
    }

    fn infer_if(
        &mut self,
        condition: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
        loc: Loc,
    ) -> (TExprId, Ty) {
        let (ctexpr, cty) = self.infer_expr(condition);
        let cloc = self.module.exprs[condition].loc;
        match self.subst.apply(&cty) {
            Ty::Bool | Ty::Any => {}
            Ty::Var(_) => {
                self.unify(&cty, &Ty::Bool, cloc);
            }
            other => {
                self.error(
                    Code::NonBoolPredicate,
                    format!("if condition must be Bool, got {}", other),
                    cloc,
                );
            }
        }
        let (ttexpr, tty) = self.infer_expr(then_branch);
        let (etexpr, ety) = self.infer_expr(else_branch);
        let ty = self.join_branches(&tty, &ety, loc, Code::BranchDivergence);
        (
            self.alloc(
                TExprKind::If {
                    condition: ctexpr,
                    then_branch: ttexpr,
                    else_branch: etexpr,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_let(&mut self, bindings: &[LetBinding], body: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        self.push_scope();
        let mut tbindings = Vec::new();
        for b in bindings {
            let (texpr, ty) = self.infer_expr(b.value);
            let scheme = self.generalize(&ty);
            self.define(b.name.clone(), scheme);
            tbindings.push((b.name.clone(), texpr));
        }
        let (tbody, ty) = self.infer_body(body);
        self.pop_scope();
        (
            self.alloc(
                TExprKind::Let {
                    bindings: tbindings,
                    body: tbody,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_lambda(&mut self, params: &[Param], body: &[ExprId], loc: Loc) -> (TExprId, Ty) {
        self.push_scope();
        let mut param_tys = Vec::new();
        for p in params {
            let ty = self.fresh();
            self.define(p.name.clone(), Scheme::mono(ty.clone()));
            self.mark_local(p.name.clone());
            param_tys.push(ty);
        }
        let (tbody, ret) = self.infer_body(body);
        self.pop_scope();
        let ty = Ty::Fn(
            param_tys.iter().map(|t| self.subst.apply(t)).collect(),
            Box::new(self.subst.apply(&ret)),
        );
        (
            self.alloc(
                TExprKind::Lambda {
                    params: params.iter().map(|p| p.name.clone()).collect(),
                    body: tbody,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_match(&mut self, scrutinee: ExprId, arms: &[MatchArm], loc: Loc) -> (TExprId, Ty) {
        let (stexpr, sty) = self.infer_expr(scrutinee);
        let mut tarms = Vec::new();
        let mut result: Option<Ty> = None;
        for arm in arms {
            self.push_scope();
            let tpattern = self.check_pattern(arm.pattern, &sty);
            let (tbody, bty) = self.infer_body(&arm.body);
            self.pop_scope();
            result = Some(match result {
                None => bty,
                Some(prev) => self.join_branches(&prev, &bty, arm.loc, Code::BranchDivergence),
            });
            tarms.push(TMatchArm {
                pattern: tpattern,
                body: tbody,
                loc: arm.loc,
            });
        }
        let scrut_ty = self.subst.apply(&sty);
        let patterns: Vec<PatternId> = arms.iter().map(|a| a.pattern).collect();
        self.check_match_coverage(&patterns, &scrut_ty, loc, arms);
        let ty = result.unwrap_or(Ty::Unit);
        (
            self.alloc(
                TExprKind::Match {
                    scrutinee: stexpr,
                    arms: tarms,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_field_access(&mut self, record: ExprId, field: &SmolStr, loc: Loc) -> (TExprId, Ty) {
        let (rtexpr, rty) = self.infer_expr(record);
        let applied = self.subst.apply(&rty);
        let ty = match &applied {
            Ty::Named { name, .. } => {
                if let Some(rec) = self.tables.recs.get(name.as_str()) {
                    match rec.fields.iter().find(|(n, _)| n == field) {
                        Some((_, fty)) => fty.clone(),
                        None => {
                            self.error(
                                Code::RecordField,
                                format!("record `{}` has no field `{}`", name, field),
                                loc,
                            );
                            Ty::Any
                        }
                    }
                } else {
                    self.error(
                        Code::RecordField,
                        format!("type `{}` has no fields", applied),
                        loc,
                    );
                    Ty::Any
                }
            }
            Ty::Row { fields, .. } if fields.iter().any(|(n, _)| n == field) => fields
                .iter()
                .find(|(n, _)| n == field)
                .map(|(_, t)| t.clone())
                .unwrap(),
            Ty::Row { .. } | Ty::Var(_) => {
                // Open access: derive the field variable from the record's
                // own variable so repeated accesses share a type.
                let base = match (&rty, &applied) {
                    (Ty::Var(v), _) => *v,
                    (_, Ty::Var(v)) => *v,
                    _ => self.fresh_id(),
                };
                let field_ty = Ty::Var(field_var_id(base, field));
                let tail = self.fresh_row();
                let want = Ty::Row {
                    fields: vec![(field.clone(), field_ty.clone())],
                    tail: RowTail::Var(tail),
                };
                self.unify(&rty, &want, loc);
                self.subst.apply(&field_ty)
            }
            Ty::Any => Ty::Any,
            other => {
                self.error(
                    Code::RecordField,
                    format!("cannot access field `{}` on {}", field, other),
                    loc,
                );
                Ty::Any
            }
        };
        (
            self.alloc(
                TExprKind::FieldAccess {
                    record: rtexpr,
                    field: field.clone(),
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    fn infer_spawn(&mut self, process: &SmolStr, init: ExprId, loc: Loc) -> (TExprId, Ty) {
        let (itexpr, ity) = self.infer_expr(init);
        let Some(proc) = self.tables.processes.get(process).cloned() else {
            let mut diag = Diagnostic::error(
                Code::UnknownProcess,
                format!("unknown process `{}`", process),
                loc,
            );
            let procs: Vec<&str> = self
                .tables
                .processes
                .keys()
                .map(|s| s.as_str())
                .collect();
            if let Some(s) = suggest(process, procs) {
                diag = diag.with_hint(format!("did you mean `{}`?", s));
            }
            self.push_diag(diag);
            return (
                self.alloc(
                    TExprKind::Spawn {
                        process: process.clone(),
                        init: itexpr,
                    },
                    Ty::Any,
                    loc,
                ),
                Ty::Any,
            );
        };
        let iloc = self.module.exprs[init].loc;
        self.unify(&ity, &proc.state, iloc);
        let ty = Ty::PidOf {
            process: process.clone(),
            msgs: proc.msgs.clone(),
        };
        (
            self.alloc(
                TExprKind::Spawn {
                    process: process.clone(),
                    init: itexpr,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    /// The tag of a message expression, from its shape or its type.
    fn msg_tag(&self, msg: ExprId, ty: &Ty) -> Option<SmolStr> {
        match &self.module.exprs[msg].kind {
            ExprKind::Atom(a) => return Some(a.clone()),
            ExprKind::TupleLit(elems) => {
                if let Some(&first) = elems.first() {
                    if let ExprKind::Atom(a) = &self.module.exprs[first].kind {
                        return Some(a.clone());
                    }
                }
            }
            _ => {}
        }
        match self.subst.apply(ty) {
            Ty::AtomLit(a) => Some(a),
            Ty::Tuple(elems) => match elems.first() {
                Some(Ty::AtomLit(a)) => Some(a.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn infer_send(&mut self, pid: ExprId, msg: ExprId, unchecked: bool, loc: Loc) -> (TExprId, Ty) {
        let (ptexpr, pty) = self.infer_expr(pid);
        let (mtexpr, mty) = self.infer_expr(msg);
        let applied = self.subst.apply(&pty);
        let tag = self.msg_tag(msg, &mty);
        let ploc = self.module.exprs[pid].loc;

        if unchecked {
            // Only reject targets that can not possibly be a pid.
            match &applied {
                Ty::Int
                | Ty::Float
                | Ty::Bool
                | Ty::Str
                | Ty::Unit
                | Ty::Atom
                | Ty::AtomLit(_)
                | Ty::List(_)
                | Ty::Tuple(_)
                | Ty::Fn(_, _)
                | Ty::Named { .. }
                | Ty::Row { .. } => {
                    self.error(
                        Code::SendToNonPid,
                        format!("cannot send to {}", applied),
                        ploc,
                    );
                }
                _ => {}
            }
        } else {
            match &applied {
                Ty::PidOf { process, msgs } => {
                    if let Some(tag) = &tag {
                        if !msgs.contains(tag) {
                            let accepted = msgs
                                .iter()
                                .map(|m| format!(":{}", m))
                                .collect::<Vec<_>>()
                                .join(" ");
                            let diag = Diagnostic::error(
                                Code::InvalidMessage,
                                format!(
                                    "process `{}` does not accept message `:{}`",
                                    process, tag
                                ),
                                loc,
                            )
                            .with_hint(format!("accepted messages: {}", accepted));
                            self.push_diag(diag);
                        }
                    }
                }
                Ty::Var(_) => {
                    // Defer: the pid's type may become concrete later.
                    self.pending_sends.push((pty.clone(), tag.clone(), loc));
                }
                Ty::Pid | Ty::Any => {}
                other => {
                    self.error(
                        Code::SendToNonPid,
                        format!("cannot send to {}", other),
                        ploc,
                    );
                }
            }
        }

        // A send evaluates to the message.
        let ty = self.subst.apply(&mty);
        (
            self.alloc(
                TExprKind::Send {
                    pid: ptexpr,
                    msg: mtexpr,
                    unchecked,
                },
                ty.clone(),
                loc,
            ),
            ty,
        )
    }

    // ── Finalization ─────────────────────────────────────────────

    /// Sends whose pid type stayed free: the tag must match at least one
    /// declared process.
    fn check_pending_sends(&mut self) {
        let sends = std::mem::take(&mut self.pending_sends);
        for (pty, tag, loc) in sends {
            let applied = self.subst.apply(&pty);
            match &applied {
                Ty::PidOf { process, msgs } => {
                    if let Some(tag) = &tag {
                        if !msgs.contains(tag) {
                            let accepted = msgs
                                .iter()
                                .map(|m| format!(":{}", m))
                                .collect::<Vec<_>>()
                                .join(" ");
                            let diag = Diagnostic::error(
                                Code::InvalidMessage,
                                format!(
                                    "process `{}` does not accept message `:{}`",
                                    process, tag
                                ),
                                loc,
                            )
                            .with_hint(format!("accepted messages: {}", accepted));
                            self.push_diag(diag);
                        }
                    }
                }
                Ty::Pid | Ty::Any => {}
                Ty::Var(_) => {
                    if let Some(tag) = &tag {
                        let known = self
                            .tables
                            .processes
                            .values()
                            .any(|p| p.msgs.contains(tag));
                        if !known {
                            self.error(
                                Code::InvalidMessage,
                                format!("no declared process accepts message `:{}`", tag),
                                loc,
                            );
                        }
                    }
                }
                other => {
                    self.error(Code::SendToNonPid, format!("cannot send to {}", other), loc);
                }
            }
        }
    }

    fn finish(mut self) -> ElabResult {
        self.resolve_pending(true);
        self.check_pending_sends();

        // Apply the final substitution to every recorded type.
        let ids: Vec<TExprId> = self.typed.exprs.iter().map(|(id, _)| id).collect();
        for id in ids {
            let applied = self.subst.apply(&self.typed.exprs[id].ty);
            self.typed.exprs[id].ty = applied;
        }
        let expr_ids: Vec<ExprId> = self.expr_types.iter().map(|(id, _)| id).collect();
        for id in expr_ids {
            let applied = self.subst.apply(&self.expr_types[id]);
            self.expr_types.insert(id, applied);
        }
        for p in &mut self.typed.processes {
            p.state = self.subst.apply(&p.state);
        }

        // Function schemes are exported only now: variables shared with a
        // later (mutually recursive) definition may have resolved since
        // the scheme was built.
        for def in &mut self.typed.defs {
            def.scheme.ty = self.subst.apply(&def.scheme.ty);
            def.scheme.constraints = def
                .scheme
                .constraints
                .iter()
                .map(|(c, t)| (c.clone(), self.subst.apply(t)))
                .collect();
        }
        self.iface_fns = self
            .typed
            .defs
            .iter()
            .map(|def| IfaceFn {
                name: def.name.clone(),
                scheme: normalize_scheme(&def.scheme),
            })
            .collect();

        let processes: Vec<IfaceProcess> = self
            .proc_order
            .iter()
            .map(|name| {
                let p = &self.tables.processes[name];
                IfaceProcess {
                    name: p.name.clone(),
                    state: self.subst.apply(&p.state),
                    msgs: p.msgs.clone(),
                }
            })
            .collect();

        let interface = ModuleInterface {
            version: IFACE_VERSION,
            module: self.typed.name.clone(),
            fns: self.iface_fns,
            types: self.iface_types,
            classes: self.iface_classes,
            instances: self.iface_instances,
            processes,
        };

        ElabResult {
            diagnostics: self.diags,
            typed: self.typed,
            interface,
            expr_types: self.expr_types,
        }
    }
}

// ── Interface normalization ──────────────────────────────────────

/// Remap a scheme's bound variables to a dense `0..n` numbering so that
/// interface output is independent of the id supply.
fn normalize_scheme(scheme: &Scheme) -> Scheme {
    let tmap: HashMap<TyVarId, Ty> = scheme
        .vars
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, Ty::Var(i as TyVarId)))
        .collect();
    let rmap: HashMap<RowVarId, RowVarId> = scheme
        .row_vars
        .iter()
        .enumerate()
        .map(|(i, &r)| (r, i as RowVarId))
        .collect();
    Scheme {
        vars: (0..scheme.vars.len() as TyVarId).collect(),
        row_vars: (0..scheme.row_vars.len() as RowVarId).collect(),
        constraints: scheme
            .constraints
            .iter()
            .map(|(c, t)| (c.clone(), rename(t, &tmap, &rmap)))
            .collect(),
        ty: rename(&scheme.ty, &tmap, &rmap),
    }
}

pub(crate) fn normalize_sum_templates(def: &SumDef) -> vaisto_iface::IfaceType {
    let tmap: HashMap<TyVarId, Ty> = def
        .param_vars
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, Ty::Var(i as TyVarId)))
        .collect();
    vaisto_iface::IfaceType::Sum {
        name: def.name.clone(),
        param_vars: (0..def.param_vars.len() as TyVarId).collect(),
        variants: def
            .variants
            .iter()
            .map(|(c, fs)| {
                (
                    c.clone(),
                    fs.iter()
                        .map(|t| rename(t, &tmap, &HashMap::new()))
                        .collect(),
                )
            })
            .collect(),
    }
}
