use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn vaisto() -> Command {
    Command::cargo_bin("vaisto").unwrap()
}

// ── compile ─────────────────────────────────────────────────────

#[test]
fn compile_valid_file_exits_zero_and_writes_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ok.va");
    fs::write(&file, "(defn main [] (+ 1 2))").unwrap();

    vaisto()
        .args(["compile", file.to_str().unwrap()])
        .assert()
        .success();

    let bytes = fs::read(dir.path().join("ok.vab")).unwrap();
    assert_eq!(&bytes[0..4], b"FOR1");
}

#[test]
fn compile_type_error_exits_one_with_rendered_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.va");
    fs::write(&file, "(defn main [] (if 1 2 3))").unwrap();

    vaisto()
        .args(["compile", file.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[E011]"))
        .stderr(predicate::str::contains("-->"));
}

#[test]
fn compile_invalid_message_renders_accepted_tags() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("proc.va");
    fs::write(
        &file,
        "(process counter 0 :inc (+ state 1))
         (defn main [] (! (spawn counter 0) :wrong))",
    )
    .unwrap();

    vaisto()
        .args(["compile", file.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[E300]"))
        .stderr(predicate::str::contains(":inc"));
}

// ── eval ────────────────────────────────────────────────────────

#[test]
fn eval_prints_the_inferred_type() {
    vaisto()
        .args(["--eval", "(+ 1 2)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Int"));
    vaisto()
        .args(["--eval", "(/ 10 2)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Float"));
    vaisto()
        .args(["--eval", "(if true :yes :no)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Atom"));
}

#[test]
fn eval_rejects_empty_input_cleanly() {
    vaisto()
        .args(["--eval", "   "])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E200"));
}

// ── build ───────────────────────────────────────────────────────

#[test]
fn build_writes_interface_and_bytecode_per_module() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("lib.va"),
        "(ns lib) (defn double [x] (* x 2))",
    )
    .unwrap();
    fs::write(
        dir.path().join("app.va"),
        "(ns app) (import lib) (defn main [] (double 21))",
    )
    .unwrap();

    vaisto()
        .args(["build", dir.path().to_str().unwrap()])
        .assert()
        .success();

    let out = dir.path().join("out");
    assert!(out.join("lib.vai").exists());
    assert!(out.join("lib.vab").exists());
    assert!(out.join("app.vai").exists());
    assert!(out.join("app.vab").exists());
}

#[test]
fn build_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("lib.va"),
        "(ns lib) (deftype Maybe (Just v) (Nothing) deriving [Eq]) (defn id [x] x)",
    )
    .unwrap();

    vaisto()
        .args(["build", dir.path().to_str().unwrap()])
        .assert()
        .success();
    let first = fs::read(dir.path().join("out/lib.vai")).unwrap();

    vaisto()
        .args(["build", dir.path().to_str().unwrap()])
        .assert()
        .success();
    let second = fs::read(dir.path().join("out/lib.vai")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn build_reports_cycles() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.va"), "(ns a) (import b)").unwrap();
    fs::write(dir.path().join("b.va"), "(ns b) (import a)").unwrap();

    vaisto()
        .args(["build", dir.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cycle"));
}

// ── init ────────────────────────────────────────────────────────

#[test]
fn init_scaffolds_a_compilable_package() {
    let dir = tempfile::tempdir().unwrap();
    vaisto()
        .current_dir(dir.path())
        .args(["init", "hello"])
        .assert()
        .success();

    let main = dir.path().join("hello/main.va");
    assert!(main.exists());

    vaisto()
        .args(["compile", main.to_str().unwrap()])
        .assert()
        .success();
}
