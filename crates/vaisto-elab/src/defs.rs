//! Definitions collected during admission, before any expression is
//! elaborated: types, classes, instances, processes.

use smol_str::SmolStr;
use std::collections::HashMap;
use vaisto_ast::{ExprId, Loc, Param};
use vaisto_types::{Ty, TyVarId};

/// Sum type definition with resolved variant field templates.
/// `param_vars` are the template variable ids that instantiation freshens.
#[derive(Clone, Debug)]
pub(crate) struct SumDef {
    pub(crate) name: SmolStr,
    pub(crate) params: Vec<SmolStr>,
    pub(crate) param_vars: Vec<TyVarId>,
    pub(crate) variants: Vec<(SmolStr, Vec<Ty>)>,
    #[allow(dead_code)]
    pub(crate) loc: Loc,
}

/// Record definition with resolved field types (records are monomorphic).
#[derive(Clone, Debug)]
pub(crate) struct RecDef {
    pub(crate) name: SmolStr,
    pub(crate) fields: Vec<(SmolStr, Ty)>,
    #[allow(dead_code)]
    pub(crate) loc: Loc,
}

/// What a constructor name refers to.
#[derive(Clone, Debug)]
pub(crate) enum CtorDef {
    /// `(type_name, variant index)`
    Sum(SmolStr, usize),
    Record(SmolStr),
}

/// A class method signature, elaborated once at class admission.
/// The class type variable appears as `Ty::Var(class_var)` inside
/// `params`/`ret`; instantiation substitutes it with the head placeholder.
#[derive(Clone, Debug)]
pub(crate) struct ClassMethod {
    pub(crate) name: SmolStr,
    pub(crate) params: Vec<Ty>,
    pub(crate) ret: Ty,
    /// Extra signature variables besides the class variable.
    pub(crate) extra_vars: Vec<TyVarId>,
    /// Default implementation from the class body, if declared locally.
    pub(crate) default: Option<(Vec<Param>, Vec<ExprId>)>,
    pub(crate) has_default: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ClassDef {
    pub(crate) name: SmolStr,
    pub(crate) class_var: TyVarId,
    pub(crate) methods: Vec<ClassMethod>,
    #[allow(dead_code)]
    pub(crate) loc: Loc,
}

impl ClassDef {
    pub(crate) fn method(&self, name: &str) -> Option<&ClassMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// How an instance provides a method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MethodSource {
    Explicit,
    Default,
    Derived,
}

/// A registered instance, keyed by `(class, head)` in the instance table.
#[derive(Clone, Debug)]
pub(crate) struct InstanceEntry {
    pub(crate) class: SmolStr,
    pub(crate) head: SmolStr,
    pub(crate) head_arity: usize,
    /// Constraints as `(class, index into the head's type arguments)`.
    pub(crate) constraints: Vec<(SmolStr, usize)>,
    pub(crate) methods: Vec<(SmolStr, MethodSource)>,
    pub(crate) derived: bool,
    pub(crate) loc: Loc,
}

/// A declared process: state type and accepted message tags (sorted).
#[derive(Clone, Debug)]
pub(crate) struct ProcDef {
    pub(crate) name: SmolStr,
    pub(crate) state: Ty,
    pub(crate) msgs: Vec<SmolStr>,
    #[allow(dead_code)]
    pub(crate) loc: Loc,
}

/// Tables shared by the collection passes and the resolver.
#[derive(Default, Debug)]
pub(crate) struct Tables {
    pub(crate) sums: HashMap<SmolStr, SumDef>,
    pub(crate) recs: HashMap<SmolStr, RecDef>,
    pub(crate) ctors: HashMap<SmolStr, CtorDef>,
    pub(crate) classes: HashMap<SmolStr, ClassDef>,
    /// Method (or operator alias) → `(class, canonical method name)`.
    pub(crate) method_index: HashMap<SmolStr, (SmolStr, SmolStr)>,
    pub(crate) instances: HashMap<(SmolStr, SmolStr), InstanceEntry>,
    pub(crate) processes: HashMap<SmolStr, ProcDef>,
}
