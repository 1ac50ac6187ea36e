//! The typed AST produced by elaboration.
//!
//! Every node carries its resolved type and source location. Class-method
//! calls carry the resolved instance head and dictionary tree in the node
//! itself so the emitter can generate dispatch without re-running the
//! resolver.

use la_arena::{Arena, Idx};
use smol_str::SmolStr;
use vaisto_ast::Loc;
use vaisto_types::{Scheme, Ty};

pub type TExprId = Idx<TExpr>;

#[derive(Debug, Clone, PartialEq)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Ty,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Atom(SmolStr),
    Var {
        name: SmolStr,
        /// True for lambda-bound names (the emitter loads these from the
        /// frame rather than the module scope).
        local: bool,
    },
    Call {
        func: TExprId,
        args: Vec<TExprId>,
    },
    /// Sum or record construction.
    Ctor {
        type_name: SmolStr,
        ctor: SmolStr,
        args: Vec<TExprId>,
    },
    If {
        condition: TExprId,
        then_branch: TExprId,
        else_branch: TExprId,
    },
    Let {
        bindings: Vec<(SmolStr, TExprId)>,
        body: Vec<TExprId>,
    },
    Lambda {
        params: Vec<SmolStr>,
        body: Vec<TExprId>,
    },
    Do {
        body: Vec<TExprId>,
    },
    Match {
        scrutinee: TExprId,
        arms: Vec<TMatchArm>,
    },
    FieldAccess {
        record: TExprId,
        field: SmolStr,
    },
    ListLit(Vec<TExprId>),
    TupleLit(Vec<TExprId>),
    Spawn {
        process: SmolStr,
        init: TExprId,
    },
    Send {
        pid: TExprId,
        msg: TExprId,
        unchecked: bool,
    },
    /// A class-method invocation. `head` is `None` while dispatch is still
    /// polymorphic (the surrounding function quantified over the head).
    ClassCall {
        class: SmolStr,
        method: SmolStr,
        head: Option<SmolStr>,
        args: Vec<TExprId>,
        dicts: Vec<DictRef>,
    },
}

/// A resolved instance dictionary reference.
#[derive(Debug, Clone, PartialEq)]
pub enum DictRef {
    /// Direct instance for `(class, head)`.
    Instance { class: SmolStr, head: SmolStr },
    /// A constrained instance whose dictionary is built from the
    /// dictionaries of its prerequisites (nested resolution).
    Constrained {
        class: SmolStr,
        head: SmolStr,
        deps: Vec<DictRef>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TMatchArm {
    pub pattern: TPattern,
    pub body: Vec<TExprId>,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TPattern {
    Wildcard,
    Var(SmolStr),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Atom(SmolStr),
    Ctor {
        name: SmolStr,
        args: Vec<TPattern>,
    },
    EmptyList,
    Cons {
        head: Box<TPattern>,
        tail: Box<TPattern>,
    },
    Tuple(Vec<TPattern>),
}

/// A fully elaborated function.
#[derive(Debug, Clone)]
pub struct TDef {
    pub name: SmolStr,
    pub params: Vec<SmolStr>,
    pub body: Vec<TExprId>,
    pub scheme: Scheme,
    pub loc: Loc,
}

/// A fully elaborated instance method (explicit or a synthesized default).
#[derive(Debug, Clone)]
pub struct TInstanceMethod {
    pub class: SmolStr,
    pub head: SmolStr,
    pub method: SmolStr,
    pub params: Vec<SmolStr>,
    pub body: Vec<TExprId>,
    pub loc: Loc,
}

/// A fully elaborated process declaration.
#[derive(Debug, Clone)]
pub struct TProcess {
    pub name: SmolStr,
    pub state: Ty,
    pub init: TExprId,
    pub handlers: Vec<(SmolStr, TExprId)>,
    pub loc: Loc,
}

/// The elaborated module, ready for lowering.
#[derive(Debug, Clone, Default)]
pub struct TypedModule {
    pub name: SmolStr,
    pub exprs: Arena<TExpr>,
    pub defs: Vec<TDef>,
    pub instance_methods: Vec<TInstanceMethod>,
    pub processes: Vec<TProcess>,
    /// Top-level expressions in declaration order (the `main` body in eval
    /// mode).
    pub main: Vec<TExprId>,
}
