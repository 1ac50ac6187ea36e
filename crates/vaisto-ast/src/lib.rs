use la_arena::{Arena, Idx};
use smol_str::SmolStr;
pub use vaisto_lexer::Loc;

// ── ID types ──────────────────────────────────────────────────────

pub type ExprId = Idx<Expr>;
pub type TypeExprId = Idx<TypeExpr>;
pub type PatternId = Idx<Pattern>;

// ── Module ────────────────────────────────────────────────────────

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name from `(ns …)`, if present.
    pub name: Option<SmolStr>,
    pub items: Vec<(Item, Loc)>,
    pub exprs: Arena<Expr>,
    pub type_exprs: Arena<TypeExpr>,
    pub patterns: Arena<Pattern>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            name: None,
            items: Vec::new(),
            exprs: Arena::new(),
            type_exprs: Arena::new(),
            patterns: Arena::new(),
        }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

// ── Top-level items ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Item {
    Defn(Defn),
    Deftype(Deftype),
    Defrecord(Defrecord),
    Defclass(Defclass),
    Instance(InstanceDef),
    Process(ProcessDef),
    Import(Import),
    /// A bare top-level expression (the `main` body in eval mode).
    TopExpr(ExprId),
}

/// Function definition: `(defn name [params] body…)`
#[derive(Debug, Clone)]
pub struct Defn {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub params: Vec<Param>,
    pub body: Vec<ExprId>,
    pub loc: Loc,
}

/// Function parameter. The language is inference-only, so a parameter is
/// just a name.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: SmolStr,
    pub loc: Loc,
}

/// Sum type definition: `(deftype Name (Ctor ty…)… deriving [Class…]?)`
#[derive(Debug, Clone)]
pub struct Deftype {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub variants: Vec<Variant>,
    pub deriving: Vec<(SmolStr, Loc)>,
    pub loc: Loc,
}

/// Variant of a sum type.
#[derive(Debug, Clone)]
pub struct Variant {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub fields: Vec<TypeExprId>,
    pub loc: Loc,
}

/// Record definition: `(defrecord Name [field Ty]… deriving [Class…]?)`
#[derive(Debug, Clone)]
pub struct Defrecord {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub fields: Vec<RecordField>,
    pub deriving: Vec<(SmolStr, Loc)>,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub ty: TypeExprId,
    pub loc: Loc,
}

/// Type class definition: `(defclass Name [a] (method [ty…] ret default?)…)`
#[derive(Debug, Clone)]
pub struct Defclass {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub tyvar: SmolStr,
    pub methods: Vec<MethodSig>,
    pub loc: Loc,
}

/// Method signature in a class, with an optional default body.
///
/// `(neq [a a] Bool (not (eq x y)))` — the trailing expression is the
/// default; its parameter names are `x`, `y`, … positionally.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub params: Vec<TypeExprId>,
    pub ret: TypeExprId,
    pub default_params: Vec<Param>,
    pub default_body: Vec<ExprId>,
    pub loc: Loc,
}

/// Class constraint: `(Class a)`.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub class_name: SmolStr,
    pub ty: TypeExprId,
    pub loc: Loc,
}

/// Instance head: a primitive or nominal name, optionally applied.
#[derive(Debug, Clone)]
pub struct InstanceHead {
    pub name: SmolStr,
    pub args: Vec<SmolStr>,
    pub loc: Loc,
}

/// Instance: `(instance Class Head where [(C a)…]? method…)`
#[derive(Debug, Clone)]
pub struct InstanceDef {
    pub class_name: SmolStr,
    pub class_loc: Loc,
    pub head: InstanceHead,
    pub constraints: Vec<Constraint>,
    pub methods: Vec<MethodImpl>,
    pub loc: Loc,
}

/// A method implementation inside an instance: `(name [params] body…)`
#[derive(Debug, Clone)]
pub struct MethodImpl {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub params: Vec<Param>,
    pub body: Vec<ExprId>,
    pub loc: Loc,
}

/// Process declaration: `(process name init-expr :tag handler …)`
#[derive(Debug, Clone)]
pub struct ProcessDef {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub init: ExprId,
    pub handlers: Vec<Handler>,
    pub loc: Loc,
}

/// One message handler: the tag and the expression producing the next state.
#[derive(Debug, Clone)]
pub struct Handler {
    pub tag: SmolStr,
    pub tag_loc: Loc,
    pub body: ExprId,
    pub loc: Loc,
}

/// Import declaration: `(import name)` or `(import name :as alias)`
#[derive(Debug, Clone)]
pub struct Import {
    pub module: SmolStr,
    pub alias: Option<SmolStr>,
    pub loc: Loc,
}

// ── Expressions ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value.
    Lit(Literal),
    /// Atom literal: `:yes`
    Atom(SmolStr),
    /// Variable reference.
    Var(SmolStr),
    /// Function call: `(f args…)`
    Call { func: ExprId, args: Vec<ExprId> },
    /// Let binding: `(let [x e1 y e2] body…)`
    Let {
        bindings: Vec<LetBinding>,
        body: Vec<ExprId>,
    },
    /// If expression: `(if cond then else)`
    If {
        condition: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    /// Lambda: `(fn [params] body…)`
    Lambda { params: Vec<Param>, body: Vec<ExprId> },
    /// Do block: `(do exprs…)`
    Do { body: Vec<ExprId> },
    /// Match: `(match scrut [pat body…]…)`
    Match {
        scrutinee: ExprId,
        arms: Vec<MatchArm>,
    },
    /// Field access: `(. record :field)`
    FieldAccess { record: ExprId, field: SmolStr },
    /// List literal: `[exprs…]`
    ListLit(Vec<ExprId>),
    /// Tuple literal: `(tuple exprs…)`
    TupleLit(Vec<ExprId>),
    /// Spawn a process: `(spawn name init)`
    Spawn { process: SmolStr, init: ExprId },
    /// Message send: `(! pid msg)` / `(!! pid msg)`
    Send {
        pid: ExprId,
        msg: ExprId,
        unchecked: bool,
    },
}

/// Literal values.
#[derive(Debug, Clone)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

/// A binding pair in a let expression.
#[derive(Debug, Clone)]
pub struct LetBinding {
    pub name: SmolStr,
    pub name_loc: Loc,
    pub value: ExprId,
    pub loc: Loc,
}

/// A match arm: `[pattern body…]`
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: PatternId,
    pub body: Vec<ExprId>,
    pub loc: Loc,
}

// ── Patterns ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    /// Wildcard: `_`
    Wildcard,
    /// Variable binding (lowercase).
    Var(SmolStr),
    /// Literal pattern.
    Literal(Literal),
    /// Atom pattern: `:tag`
    Atom(SmolStr),
    /// Constructor: `Name` or `(Name args…)`
    Constructor { name: SmolStr, args: Vec<PatternId> },
    /// Empty list: `[]`
    EmptyList,
    /// Cons: `[h | t]`
    Cons { head: PatternId, tail: PatternId },
    /// Tuple: `(tuple p…)`
    Tuple(Vec<PatternId>),
}

// ── Type expressions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// Named type: `Int`, `String`, `Maybe`
    Named(SmolStr),
    /// Type variable: a lowercase name in type position.
    TypeVar(SmolStr),
    /// Applied type: `(List a)`, `(Maybe a)`
    Applied { name: SmolStr, args: Vec<TypeExprId> },
    /// Tuple type: `(Tuple a b)`
    Tuple(Vec<TypeExprId>),
    /// Function type: `(Fn [params] return)`
    Fn {
        params: Vec<TypeExprId>,
        ret: TypeExprId,
    },
}

/// True when a source name is a type variable rather than a type name:
/// type variables are lowercase, nominal types are capitalized.
pub fn is_tyvar_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_lowercase() || c == '_')
}
