use super::typed::{DictRef, TExprKind};
use super::*;
use vaisto_diag::Severity;

fn elab_src(source: &str) -> ElabResult {
    let (module, errors) = vaisto_parser::parse(source);
    assert!(errors.is_empty(), "parse errors: {:?}", errors);
    elaborate(&module)
}

fn elab_ok(source: &str) -> ElabResult {
    let result = elab_src(source);
    let errors: Vec<_> = result.diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(errors.is_empty(), "unexpected errors: {:#?}", errors);
    result
}

fn elab_err(source: &str) -> Vec<Diagnostic> {
    let result = elab_src(source);
    let errors: Vec<Diagnostic> = result
        .diagnostics
        .into_iter()
        .filter(|d| d.is_error())
        .collect();
    assert!(!errors.is_empty(), "expected errors, got none");
    errors
}

fn main_ty(result: &ElabResult) -> Ty {
    let &id = result.typed.main.last().expect("a top-level expression");
    result.typed.exprs[id].ty.clone()
}

// ── Numeric operators ────────────────────────────────────────────

#[test]
fn int_addition() {
    assert_eq!(main_ty(&elab_ok("(+ 1 2)")), Ty::Int);
}

#[test]
fn mixed_addition_widens_to_float() {
    assert_eq!(main_ty(&elab_ok("(+ 1 2.5)")), Ty::Float);
}

#[test]
fn division_is_always_float() {
    assert_eq!(main_ty(&elab_ok("(/ 10 2)")), Ty::Float);
}

#[test]
fn operand_vars_default_to_int() {
    let result = elab_ok("(defn add1 [x] (+ x 1))");
    let scheme = &result.typed.defs[0].scheme;
    assert_eq!(scheme.ty, Ty::Fn(vec![Ty::Int], Box::new(Ty::Int)));
}

#[test]
fn invalid_operand_reported() {
    let errors = elab_err("(+ 1 \"two\")");
    assert!(errors.iter().any(|e| e.code == Code::InvalidOperand));
}

#[test]
fn arith_arity_checked() {
    let errors = elab_err("(+ 1)");
    assert!(errors.iter().any(|e| e.code == Code::Arity));
}

// ── If and atoms ─────────────────────────────────────────────────

#[test]
fn if_with_matching_branches() {
    assert_eq!(main_ty(&elab_ok("(if true 1 0)")), Ty::Int);
}

#[test]
fn distinct_atoms_join_at_universal_atom() {
    assert_eq!(main_ty(&elab_ok("(if true :yes :no)")), Ty::Atom);
}

#[test]
fn branch_divergence_reported() {
    let errors = elab_err("(if true 1 \"one\")");
    assert!(errors.iter().any(|e| e.code == Code::BranchDivergence));
}

#[test]
fn non_bool_predicate_reported() {
    let errors = elab_err("(if 1 2 3)");
    assert!(errors.iter().any(|e| e.code == Code::NonBoolPredicate));
}

#[test]
fn bare_symbol_is_universal_atom() {
    let result = elab_ok("(defn f [] ok)");
    assert_eq!(
        result.typed.defs[0].scheme.ty,
        Ty::Fn(vec![], Box::new(Ty::Atom))
    );
}

// ── Let, lambdas, generalization ─────────────────────────────────

#[test]
fn let_bindings_are_sequential() {
    assert_eq!(main_ty(&elab_ok("(let [x 1 y (+ x 1)] y)")), Ty::Int);
}

#[test]
fn let_polymorphism() {
    elab_ok("(let [id (fn [x] x)] (do (id 1) (id \"s\")))");
}

#[test]
fn defn_generalizes_identity() {
    let result = elab_ok("(defn id [x] x)");
    let scheme = &result.typed.defs[0].scheme;
    assert_eq!(scheme.vars.len(), 1);
    let v = scheme.vars[0];
    assert_eq!(
        scheme.ty,
        Ty::Fn(vec![Ty::Var(v)], Box::new(Ty::Var(v)))
    );
}

#[test]
fn generalized_function_used_at_two_types() {
    elab_ok("(defn id [x] x) (defn both [] (do (id 1) (id \"s\")))");
}

#[test]
fn call_arity_mismatch() {
    let errors = elab_err("(defn add [x y] (+ x y)) (add 1)");
    assert!(errors.iter().any(|e| e.code == Code::Arity));
}

#[test]
fn higher_order_arity_mismatch() {
    // The first call fixes `f` at one parameter; the second misuses it.
    let errors = elab_err("(defn apply1 [f] (do (f 1) (f 1 2)))");
    assert!(errors.iter().any(|e| e.code == Code::HigherOrderArity));
}

#[test]
fn calling_a_non_function() {
    let errors = elab_err("(1 2)");
    assert!(errors.iter().any(|e| e.code == Code::NotAFunction));
}

#[test]
fn occurs_check_fires() {
    let errors = elab_err("(defn apply-self [x] (x x))");
    assert!(errors.iter().any(|e| e.code == Code::InfiniteType));
}

#[test]
fn unknown_function_suggests_builtin() {
    let errors = elab_err("(printn 5)");
    let e = errors
        .iter()
        .find(|e| e.code == Code::UnknownFunction)
        .expect("an unknown-function error");
    assert!(e.hint.as_deref().unwrap_or("").contains("println"));
}

#[test]
fn heterogeneous_list_rejected() {
    let errors = elab_err("[1 \"a\"]");
    assert!(errors.iter().any(|e| e.code == Code::HeterogeneousList));
}

#[test]
fn list_builtins() {
    assert_eq!(main_ty(&elab_ok("(head [1 2 3])")), Ty::Int);
    assert_eq!(main_ty(&elab_ok("(len [1 2])")), Ty::Int);
    assert_eq!(
        main_ty(&elab_ok("(cons 1 [2 3])")),
        Ty::List(Box::new(Ty::Int))
    );
}

// ── Sum types, matching, exhaustiveness ──────────────────────────

const COLOR: &str = "(deftype Color (Red) (Green) (Blue))";

#[test]
fn exhaustive_match_accepted() {
    elab_ok(&format!(
        "{COLOR} (defn f [c] (match c [(Red) 1] [(Green) 2] [(Blue) 3]))"
    ));
}

#[test]
fn missing_constructor_has_witness() {
    let errors = elab_err(&format!(
        "{COLOR} (defn f [c] (match c [(Red) 1] [(Green) 2]))"
    ));
    let e = errors
        .iter()
        .find(|e| e.code == Code::NonExhaustiveMatch)
        .expect("a non-exhaustive error");
    assert!(e.hint.as_deref().unwrap_or("").contains("Blue"));
}

#[test]
fn wildcard_restores_exhaustiveness() {
    elab_ok(&format!("{COLOR} (defn f [c] (match c [(Red) 1] [_ 0]))"));
}

#[test]
fn redundant_clause_is_a_warning() {
    let result = elab_src(&format!(
        "{COLOR} (defn f [c] (match c [_ 0] [(Red) 1]))"
    ));
    assert!(result.ok(), "warnings must not fail the build");
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.code == Code::RedundantClause && d.severity == Severity::Warning));
}

#[test]
fn parameterized_sum_inference() {
    let result = elab_ok(
        "(deftype Maybe (Just v) (Nothing))
         (defn unwrap [m d] (match m [(Just v) v] [(Nothing) d]))",
    );
    let scheme = &result.typed.defs[0].scheme;
    assert_eq!(scheme.vars.len(), 1);
    let v = scheme.vars[0];
    assert_eq!(
        scheme.ty,
        Ty::Fn(
            vec![
                Ty::Named {
                    name: "Maybe".into(),
                    args: vec![Ty::Var(v)]
                },
                Ty::Var(v)
            ],
            Box::new(Ty::Var(v))
        )
    );
}

#[test]
fn nested_pattern_exhaustiveness() {
    // Inner Maybe is matched only on Just; Nothing inside Just is missing.
    let errors = elab_err(
        "(deftype Maybe (Just v) (Nothing))
         (defn f [m]
           (match m
             [(Just (Just x)) x]
             [(Nothing) 0]))",
    );
    let e = errors
        .iter()
        .find(|e| e.code == Code::NonExhaustiveMatch)
        .expect("a non-exhaustive error");
    assert!(e.hint.as_deref().unwrap_or("").contains("Just"));
}

#[test]
fn list_patterns_need_both_shapes() {
    let errors = elab_err("(defn f [xs] (match xs [[] 0]))");
    assert!(errors.iter().any(|e| e.code == Code::NonExhaustiveMatch));
    elab_ok("(defn f [xs] (match xs [[] 0] [[h | t] h]))");
}

#[test]
fn cons_pattern_on_non_list() {
    let errors = elab_err("(defn f [] (match 5 [[h | t] h] [_ 0]))");
    assert!(errors.iter().any(|e| e.code == Code::ConsMismatch));
}

#[test]
fn bool_match_needs_both_literals() {
    let errors = elab_err("(defn f [b] (match b [true 1]))");
    assert!(errors.iter().any(|e| e.code == Code::NonExhaustiveMatch));
    elab_ok("(defn f [b] (match b [true 1] [false 0]))");
}

#[test]
fn open_scrutinee_requires_wildcard() {
    let errors = elab_err("(defn f [] (match :a [:a 1]))");
    assert!(errors.iter().any(|e| e.code == Code::NonExhaustiveMatch));
    elab_ok("(defn f [] (match :a [:a 1] [_ 0]))");
}

// ── Records and rows ─────────────────────────────────────────────

const POINT: &str = "(defrecord Point [x Int] [y Int])";

#[test]
fn record_construction_and_access() {
    assert_eq!(
        main_ty(&elab_ok(&format!("{POINT} (. (Point 1 2) :x)"))),
        Ty::Int
    );
}

#[test]
fn unknown_record_field() {
    let errors = elab_err(&format!("{POINT} (. (Point 1 2) :z)"));
    assert!(errors.iter().any(|e| e.code == Code::RecordField));
}

#[test]
fn open_row_access_generalizes() {
    let result = elab_ok("(defn get-x [r] (. r :x))");
    let scheme = &result.typed.defs[0].scheme;
    assert!(
        !scheme.row_vars.is_empty(),
        "open access must quantify a row variable: {}",
        scheme
    );
}

#[test]
fn row_function_applies_to_record() {
    assert_eq!(
        main_ty(&elab_ok(&format!(
            "{POINT} (defn get-x [r] (. r :x)) (get-x (Point 1 2))"
        ))),
        Ty::Int
    );
}

#[test]
fn row_function_rejects_record_without_field() {
    let errors = elab_err(
        "(defrecord Named [name String])
         (defn get-x [r] (. r :x))
         (get-x (Named \"a\"))",
    );
    assert!(errors.iter().any(|e| e.code == Code::RecordField));
}

#[test]
fn repeated_access_shares_field_type() {
    // Both accesses derive the same field variable, so `+` forces Int
    // once and the function closes over a single field type.
    let result = elab_ok("(defn double-x [r] (+ (. r :x) (. r :x)))");
    let scheme = &result.typed.defs[0].scheme;
    let Ty::Fn(params, ret) = &scheme.ty else {
        panic!("expected a function scheme");
    };
    assert_eq!(**ret, Ty::Int);
    match &params[0] {
        Ty::Row { fields, .. } => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].0, "x");
            assert_eq!(fields[0].1, Ty::Int);
        }
        other => panic!("expected a row parameter, got {}", other),
    }
}

#[test]
fn distinct_arguments_get_distinct_row_tails() {
    elab_ok(
        "(defn get-x [r] (. r :x))
         (defn sum-x [a b] (+ (get-x a) (get-x b)))",
    );
}

// ── Type classes ─────────────────────────────────────────────────

#[test]
fn builtin_eq_on_primitives() {
    assert_eq!(main_ty(&elab_ok("(= 1 2)")), Ty::Bool);
    assert_eq!(main_ty(&elab_ok("(not= :a :b)")), Ty::Bool);
}

#[test]
fn eq_on_functions_has_no_instance() {
    let errors = elab_err("(= (fn [x] x) (fn [y] y))");
    assert!(errors.iter().any(|e| e.code == Code::NoInstance));
}

#[test]
fn class_constraint_generalizes_into_scheme() {
    let result = elab_ok("(defn same [a b] (= a b))");
    let scheme = &result.typed.defs[0].scheme;
    assert_eq!(scheme.constraints.len(), 1);
    assert_eq!(scheme.constraints[0].0, "Eq");
}

#[test]
fn user_class_with_default_method() {
    let result = elab_ok(
        "(defclass MyEq [a]
           (same [a a] Bool)
           (diff [a a] Bool ([x y] (not (same x y)))))
         (instance MyEq Int
           (same [x y] (= x y)))
         (diff 1 2)",
    );
    assert_eq!(main_ty(&result), Ty::Bool);
    // The default body was synthesized once for the Int head.
    assert!(result
        .typed
        .instance_methods
        .iter()
        .any(|m| m.class == "MyEq" && m.head == "Int" && m.method == "diff"));
}

#[test]
fn missing_instance_method_reported() {
    let errors = elab_err(
        "(defclass Pretty [a] (pretty [a] String))
         (instance Pretty Int)",
    );
    assert!(errors.iter().any(|e| e.code == Code::MissingInstanceMethod));
}

#[test]
fn stray_instance_method_reported() {
    let errors = elab_err(
        "(defclass Pretty [a] (pretty [a] String))
         (instance Pretty Int
           (pretty [x] (str x))
           (extra [x] x))",
    );
    assert!(errors.iter().any(|e| e.code == Code::UnknownFunction));
}

#[test]
fn duplicate_instance_rejected() {
    let errors = elab_err(
        "(defclass Pretty [a] (pretty [a] String))
         (instance Pretty Int (pretty [x] (str x)))
         (instance Pretty Int (pretty [x] (str x)))",
    );
    assert!(errors.iter().any(|e| e.code == Code::DuplicateInstance));
}

#[test]
fn unknown_class_in_instance() {
    let errors = elab_err("(instance Mystery Int (m [x] x))");
    assert!(errors.iter().any(|e| e.code == Code::UnknownClass));
}

#[test]
fn constrained_instance_chain() {
    let result = elab_ok(
        "(deftype Maybe (Just v) (Nothing))
         (instance Show (Maybe a) where [(Show a)]
           (show [x]
             (match x
               [(Just v) (str \"Just(\" (show v) \")\")]
               [(Nothing) \"Nothing\"])))
         (show (Just (Just 42)))",
    );
    assert_eq!(main_ty(&result), Ty::Str);

    // The top-level call's dictionary threads the nested resolution:
    // Show (Maybe (Maybe Int)) → Show (Maybe Int) → Show Int.
    let &root = result.typed.main.last().unwrap();
    let TExprKind::ClassCall { head, dicts, .. } = &result.typed.exprs[root].kind else {
        panic!("expected a class call at top level");
    };
    assert_eq!(head.as_deref(), Some("Maybe"));
    let DictRef::Constrained { deps, .. } = &dicts[0] else {
        panic!("expected a constrained dictionary");
    };
    let DictRef::Constrained { deps: inner, .. } = &deps[0] else {
        panic!("expected a nested constrained dictionary");
    };
    assert_eq!(
        inner[0],
        DictRef::Instance {
            class: "Show".into(),
            head: "Int".into()
        }
    );
}

#[test]
fn constraint_depth_budget_is_one_error() {
    // 40 nested Just wrappers push the Show chain past the budget of 32.
    let mut value = String::from("42");
    for _ in 0..40 {
        value = format!("(Just {})", value);
    }
    let source = format!(
        "(deftype Maybe (Just v) (Nothing))
         (instance Show (Maybe a) where [(Show a)]
           (show [x] \"m\"))
         (show {})",
        value
    );
    let errors = elab_err(&source);
    let depth_errors: Vec<_> = errors
        .iter()
        .filter(|e| e.code == Code::ConstraintDepth)
        .collect();
    assert_eq!(depth_errors.len(), 1, "exactly one depth diagnostic");
}

#[test]
fn unresolved_constraint_at_top_level() {
    let errors = elab_err(
        "(defclass Pretty [a] (pretty [a] String))
         (pretty 1)",
    );
    assert!(errors.iter().any(|e| e.code == Code::NoInstance));
}

// ── Deriving ─────────────────────────────────────────────────────

#[test]
fn derived_eq_resolves() {
    elab_ok(&format!("{COLOR2} (= (Red) (Green))", COLOR2 = "(deftype Color (Red) (Green) (Blue) deriving [Eq])"));
}

#[test]
fn derived_eq_on_parameterized_sum_chains() {
    elab_ok(
        "(deftype Maybe (Just v) (Nothing) deriving [Eq])
         (= (Just 1) (Nothing))",
    );
}

#[test]
fn derived_show_on_nullary_sum() {
    elab_ok("(deftype Color (Red) (Green) (Blue) deriving [Show]) (show (Red))");
}

#[test]
fn deriving_show_rejected_for_fielded_variants() {
    let errors = elab_err("(deftype Maybe (Just v) (Nothing) deriving [Show])");
    assert!(errors.iter().any(|e| e.code == Code::DerivingUnsupported));
}

#[test]
fn deriving_show_rejected_for_records() {
    let errors = elab_err("(defrecord Point [x Int] [y Int] deriving [Show])");
    let e = errors
        .iter()
        .find(|e| e.code == Code::DerivingUnsupported)
        .expect("a deriving error");
    assert!(e.hint.as_deref().unwrap_or("").contains("manual instance"));
}

#[test]
fn deriving_unknown_class_rejected() {
    let errors = elab_err("(deftype Color (Red) deriving [Magic])");
    assert!(errors.iter().any(|e| e.code == Code::UnknownClass));
}

// ── Processes and typed pids ─────────────────────────────────────

const COUNTER: &str = "(process counter 0 :inc (+ state 1) :reset 0)";

#[test]
fn spawn_produces_typed_pid() {
    let result = elab_ok(&format!("{COUNTER} (spawn counter 0)"));
    match main_ty(&result) {
        Ty::PidOf { process, msgs } => {
            assert_eq!(process, "counter");
            assert_eq!(msgs, vec![SmolStr::new("inc"), SmolStr::new("reset")]);
        }
        other => panic!("expected a typed pid, got {}", other),
    }
}

#[test]
fn handler_state_mismatch_reported() {
    let errors = elab_err("(process counter 0 :bad \"oops\")");
    assert!(!errors.is_empty());
}

#[test]
fn spawn_init_must_match_state_type() {
    let errors = elab_err(&format!("{COUNTER} (spawn counter \"zero\")"));
    assert!(errors.iter().any(|e| e.code == Code::TypeMismatch));
}

#[test]
fn spawn_unknown_process() {
    let errors = elab_err("(spawn counter 0)");
    assert!(errors.iter().any(|e| e.code == Code::UnknownProcess));
}

#[test]
fn invalid_message_lists_accepted_tags() {
    let errors = elab_err(&format!("{COUNTER} (! (spawn counter 0) :wrong)"));
    let e = errors
        .iter()
        .find(|e| e.code == Code::InvalidMessage)
        .expect("an invalid-message error");
    assert!(e.hint.as_deref().unwrap_or("").contains(":inc"));
}

#[test]
fn valid_send_evaluates_to_message() {
    let result = elab_ok(&format!("{COUNTER} (! (spawn counter 0) :inc)"));
    assert_eq!(main_ty(&result), Ty::AtomLit("inc".into()));
}

#[test]
fn send_to_non_pid() {
    let errors = elab_err("(! 5 :inc)");
    assert!(errors.iter().any(|e| e.code == Code::SendToNonPid));
}

#[test]
fn unsafe_send_skips_tag_validation() {
    elab_ok(&format!("{COUNTER} (!! (spawn counter 0) :whatever)"));
}

#[test]
fn unsafe_send_still_rejects_obvious_non_pid() {
    let errors = elab_err("(!! \"pid\" :inc)");
    assert!(errors.iter().any(|e| e.code == Code::SendToNonPid));
}

#[test]
fn deferred_send_checked_at_module_end() {
    elab_ok(&format!("{COUNTER} (defn poke [p] (! p :inc))"));
    let errors = elab_err(&format!("{COUNTER} (defn poke [p] (! p :nothing))"));
    assert!(errors.iter().any(|e| e.code == Code::InvalidMessage));
}

// ── Determinism and interfaces ───────────────────────────────────

#[test]
fn elaboration_is_deterministic() {
    let source = "(deftype Maybe (Just v) (Nothing) deriving [Eq])
                  (defrecord Point [x Int] [y Int])
                  (defn get-x [r] (. r :x))
                  (process counter 0 :inc (+ state 1))
                  (defn main [] (get-x (Point 1 2)))";
    let a = elab_ok(source);
    let b = elab_ok(source);
    assert_eq!(a.interface.to_bytes(), b.interface.to_bytes());
    assert_eq!(format!("{:?}", a.typed.exprs), format!("{:?}", b.typed.exprs));
}

#[test]
fn interface_hydration_typechecks_importer() {
    let lib = elab_ok(
        "(ns shapes)
         (deftype Shape (Circle Float) (Square Float) deriving [Eq])
         (defn area [s]
           (match s
             [(Circle r) (* r r)]
             [(Square w) (* w w)]))",
    );
    assert_eq!(lib.interface.module, "shapes");

    let (importer, errors) =
        vaisto_parser::parse("(import shapes) (area (Circle 2.0))");
    assert!(errors.is_empty());
    let result = elaborate_with_imports(&importer, &[lib.interface]);
    assert!(
        result.ok(),
        "importer errors: {:#?}",
        result.diagnostics
    );
    let &id = result.typed.main.last().unwrap();
    assert_eq!(result.typed.exprs[id].ty, Ty::Float);
}

#[test]
fn interface_exports_normalized_schemes() {
    let result = elab_ok("(defn id [x] x)");
    let f = &result.interface.fns[0];
    assert_eq!(f.name, "id");
    assert_eq!(f.scheme.vars, vec![0]);
    assert_eq!(f.scheme.ty, Ty::Fn(vec![Ty::Var(0)], Box::new(Ty::Var(0))));
}

#[test]
fn duplicate_definitions_reported() {
    let errors = elab_err("(defn f [] 1) (defn f [] 2)");
    assert!(errors.iter().any(|e| e.code == Code::DuplicateDefinition));
}

#[test]
fn undefined_capitalized_name_is_an_error() {
    let errors = elab_err("(defn f [] (Missing 1))");
    assert!(errors
        .iter()
        .any(|e| e.code == Code::UnknownFunction || e.code == Code::UndefinedVariable));
}

#[test]
fn recovery_continues_past_first_error() {
    // Both bodies are wrong; both must be reported.
    let errors = elab_err("(defn f [] (+ 1 \"a\")) (defn g [] (if 1 2 3))");
    assert!(errors.iter().any(|e| e.code == Code::InvalidOperand));
    assert!(errors.iter().any(|e| e.code == Code::NonBoolPredicate));
}

#[test]
fn mutually_recursive_types_admitted() {
    elab_ok(
        "(deftype Tree (Leaf Int) (Node Forest))
         (deftype Forest (Empty) (Grove Tree Forest))
         (defn leftmost [t]
           (match t
             [(Leaf n) n]
             [(Node f) (match f
                         [(Empty) 0]
                         [(Grove child rest) (leftmost child)])]))",
    );
}

#[test]
fn tuple_literals_and_patterns() {
    let result = elab_ok("(defn swap [p] (match p [(tuple a b) (tuple b a)]))");
    let Ty::Fn(params, ret) = &result.typed.defs[0].scheme.ty else {
        panic!("expected fn");
    };
    assert!(matches!(params[0], Ty::Tuple(_)));
    assert!(matches!(**ret, Ty::Tuple(_)));
}
