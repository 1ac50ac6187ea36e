//! Bytecode container emitter.
//!
//! The artifact is an IFF-style form: a fixed `FOR1` magic, a big-endian
//! size, the `VAST` form tag, then tagged chunks. `Code` holds a
//! deterministic opcode-per-node encoding of the typed AST (class calls
//! carry their resolved head and dictionary tree, so no resolver runs at
//! load time); `Expt` lists the exported functions. Identical typed ASTs
//! produce identical bytes.

use vaisto_elab::typed::{
    DictRef, TExpr, TExprId, TExprKind, TMatchArm, TPattern, TypedModule,
};

pub const MAGIC: &[u8; 4] = b"FOR1";
pub const FORM: &[u8; 4] = b"VAST";

/// Emit a typed module into the container format.
pub fn emit(typed: &TypedModule) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(FORM);
    write_chunk(&mut body, b"Code", &encode_code(typed));
    write_chunk(&mut body, b"Expt", &encode_exports(typed));

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn write_chunk(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    // Chunks are 4-byte aligned.
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn encode_exports(typed: &TypedModule) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, typed.defs.len() as u32);
    for def in &typed.defs {
        write_str(&mut out, &def.name);
        write_u32(&mut out, def.params.len() as u32);
    }
    out
}

fn encode_code(typed: &TypedModule) -> Vec<u8> {
    let mut out = Vec::new();
    write_str(&mut out, &typed.name);

    write_u32(&mut out, typed.defs.len() as u32);
    for def in &typed.defs {
        write_str(&mut out, &def.name);
        write_u32(&mut out, def.params.len() as u32);
        for p in &def.params {
            write_str(&mut out, p);
        }
        write_body(&mut out, typed, &def.body);
    }

    write_u32(&mut out, typed.instance_methods.len() as u32);
    for m in &typed.instance_methods {
        write_str(&mut out, &m.class);
        write_str(&mut out, &m.head);
        write_str(&mut out, &m.method);
        write_u32(&mut out, m.params.len() as u32);
        for p in &m.params {
            write_str(&mut out, p);
        }
        write_body(&mut out, typed, &m.body);
    }

    write_u32(&mut out, typed.processes.len() as u32);
    for p in &typed.processes {
        write_str(&mut out, &p.name);
        encode_expr(&mut out, typed, p.init);
        write_u32(&mut out, p.handlers.len() as u32);
        for (tag, body) in &p.handlers {
            write_str(&mut out, tag);
            encode_expr(&mut out, typed, *body);
        }
    }

    write_body(&mut out, typed, &typed.main);
    out
}

// ── Node opcodes ─────────────────────────────────────────────────

mod op {
    pub const INT: u8 = 0x01;
    pub const FLOAT: u8 = 0x02;
    pub const STR: u8 = 0x03;
    pub const BOOL: u8 = 0x04;
    pub const ATOM: u8 = 0x05;
    pub const VAR: u8 = 0x06;
    pub const CALL: u8 = 0x07;
    pub const CTOR: u8 = 0x08;
    pub const IF: u8 = 0x09;
    pub const LET: u8 = 0x0a;
    pub const LAMBDA: u8 = 0x0b;
    pub const DO: u8 = 0x0c;
    pub const MATCH: u8 = 0x0d;
    pub const FIELD: u8 = 0x0e;
    pub const LIST: u8 = 0x0f;
    pub const TUPLE: u8 = 0x10;
    pub const SPAWN: u8 = 0x11;
    pub const SEND: u8 = 0x12;
    pub const CLASS_CALL: u8 = 0x13;
}

mod pat {
    pub const WILDCARD: u8 = 0x01;
    pub const VAR: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const STR: u8 = 0x05;
    pub const BOOL: u8 = 0x06;
    pub const ATOM: u8 = 0x07;
    pub const CTOR: u8 = 0x08;
    pub const EMPTY_LIST: u8 = 0x09;
    pub const CONS: u8 = 0x0a;
    pub const TUPLE: u8 = 0x0b;
}

fn write_u32(out: &mut Vec<u8>, n: u32) {
    out.extend_from_slice(&n.to_be_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_body(out: &mut Vec<u8>, typed: &TypedModule, body: &[TExprId]) {
    write_u32(out, body.len() as u32);
    for &e in body {
        encode_expr(out, typed, e);
    }
}

fn encode_expr(out: &mut Vec<u8>, typed: &TypedModule, id: TExprId) {
    let TExpr { kind, .. } = &typed.exprs[id];
    match kind {
        TExprKind::Int(n) => {
            out.push(op::INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        TExprKind::Float(x) => {
            out.push(op::FLOAT);
            out.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        TExprKind::Str(s) => {
            out.push(op::STR);
            write_str(out, s);
        }
        TExprKind::Bool(b) => {
            out.push(op::BOOL);
            out.push(*b as u8);
        }
        TExprKind::Atom(a) => {
            out.push(op::ATOM);
            write_str(out, a);
        }
        TExprKind::Var { name, local } => {
            out.push(op::VAR);
            out.push(*local as u8);
            write_str(out, name);
        }
        TExprKind::Call { func, args } => {
            out.push(op::CALL);
            encode_expr(out, typed, *func);
            write_body(out, typed, args);
        }
        TExprKind::Ctor {
            type_name,
            ctor,
            args,
        } => {
            out.push(op::CTOR);
            write_str(out, type_name);
            write_str(out, ctor);
            write_body(out, typed, args);
        }
        TExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push(op::IF);
            encode_expr(out, typed, *condition);
            encode_expr(out, typed, *then_branch);
            encode_expr(out, typed, *else_branch);
        }
        TExprKind::Let { bindings, body } => {
            out.push(op::LET);
            write_u32(out, bindings.len() as u32);
            for (name, value) in bindings {
                write_str(out, name);
                encode_expr(out, typed, *value);
            }
            write_body(out, typed, body);
        }
        TExprKind::Lambda { params, body } => {
            out.push(op::LAMBDA);
            write_u32(out, params.len() as u32);
            for p in params {
                write_str(out, p);
            }
            write_body(out, typed, body);
        }
        TExprKind::Do { body } => {
            out.push(op::DO);
            write_body(out, typed, body);
        }
        TExprKind::Match { scrutinee, arms } => {
            out.push(op::MATCH);
            encode_expr(out, typed, *scrutinee);
            write_u32(out, arms.len() as u32);
            for TMatchArm { pattern, body, .. } in arms {
                encode_pattern(out, pattern);
                write_body(out, typed, body);
            }
        }
        TExprKind::FieldAccess { record, field } => {
            out.push(op::FIELD);
            encode_expr(out, typed, *record);
            write_str(out, field);
        }
        TExprKind::ListLit(elems) => {
            out.push(op::LIST);
            write_body(out, typed, elems);
        }
        TExprKind::TupleLit(elems) => {
            out.push(op::TUPLE);
            write_body(out, typed, elems);
        }
        TExprKind::Spawn { process, init } => {
            out.push(op::SPAWN);
            write_str(out, process);
            encode_expr(out, typed, *init);
        }
        TExprKind::Send {
            pid,
            msg,
            unchecked,
        } => {
            out.push(op::SEND);
            out.push(*unchecked as u8);
            encode_expr(out, typed, *pid);
            encode_expr(out, typed, *msg);
        }
        TExprKind::ClassCall {
            class,
            method,
            head,
            args,
            dicts,
        } => {
            out.push(op::CLASS_CALL);
            write_str(out, class);
            write_str(out, method);
            match head {
                Some(h) => {
                    out.push(1);
                    write_str(out, h);
                }
                None => out.push(0),
            }
            write_u32(out, dicts.len() as u32);
            for d in dicts {
                encode_dict(out, d);
            }
            write_body(out, typed, args);
        }
    }
}

fn encode_dict(out: &mut Vec<u8>, dict: &DictRef) {
    match dict {
        DictRef::Instance { class, head } => {
            out.push(0);
            write_str(out, class);
            write_str(out, head);
        }
        DictRef::Constrained { class, head, deps } => {
            out.push(1);
            write_str(out, class);
            write_str(out, head);
            write_u32(out, deps.len() as u32);
            for d in deps {
                encode_dict(out, d);
            }
        }
    }
}

fn encode_pattern(out: &mut Vec<u8>, pattern: &TPattern) {
    match pattern {
        TPattern::Wildcard => out.push(pat::WILDCARD),
        TPattern::Var(name) => {
            out.push(pat::VAR);
            write_str(out, name);
        }
        TPattern::Int(n) => {
            out.push(pat::INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        TPattern::Float(x) => {
            out.push(pat::FLOAT);
            out.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        TPattern::Str(s) => {
            out.push(pat::STR);
            write_str(out, s);
        }
        TPattern::Bool(b) => {
            out.push(pat::BOOL);
            out.push(*b as u8);
        }
        TPattern::Atom(a) => {
            out.push(pat::ATOM);
            write_str(out, a);
        }
        TPattern::Ctor { name, args } => {
            out.push(pat::CTOR);
            write_str(out, name);
            write_u32(out, args.len() as u32);
            for a in args {
                encode_pattern(out, a);
            }
        }
        TPattern::EmptyList => out.push(pat::EMPTY_LIST),
        TPattern::Cons { head, tail } => {
            out.push(pat::CONS);
            encode_pattern(out, head);
            encode_pattern(out, tail);
        }
        TPattern::Tuple(elems) => {
            out.push(pat::TUPLE);
            write_u32(out, elems.len() as u32);
            for e in elems {
                encode_pattern(out, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_src(source: &str) -> Vec<u8> {
        let (module, errors) = vaisto_parser::parse(source);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        let result = vaisto_elab::elaborate(&module);
        assert!(result.ok(), "elab errors: {:#?}", result.diagnostics);
        emit(&result.typed)
    }

    #[test]
    fn artifact_starts_with_magic_and_size() {
        let bytes = emit_src("(defn main [] (+ 1 2))");
        assert_eq!(&bytes[0..4], MAGIC);
        let size = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        assert_eq!(size, bytes.len() - 8);
        assert_eq!(&bytes[8..12], FORM);
    }

    #[test]
    fn emission_is_deterministic() {
        let source = "(deftype Maybe (Just v) (Nothing))
                      (defn unwrap [m d] (match m [(Just v) v] [(Nothing) d]))
                      (process counter 0 :inc (+ state 1))
                      (defn main [] (unwrap (Just 1) 0))";
        assert_eq!(emit_src(source), emit_src(source));
    }

    #[test]
    fn code_chunk_present() {
        let bytes = emit_src("(defn main [] 42)");
        let body = &bytes[12..];
        assert_eq!(&body[0..4], b"Code");
    }

    #[test]
    fn class_dispatch_encoded_without_resolver() {
        // The head and dictionary land in the Code chunk as strings.
        let bytes = emit_src("(defn main [] (show 42))");
        let haystack = bytes.windows(4).any(|w| w == b"Show");
        assert!(haystack, "expected the Show dictionary in the artifact");
    }
}
