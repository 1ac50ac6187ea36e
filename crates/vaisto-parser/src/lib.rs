use smol_str::SmolStr;
use vaisto_ast::*;
use vaisto_diag::{Code, Diagnostic};
use vaisto_lexer::{lex, Loc, Token};

/// Parse a source file into a module plus accumulated diagnostics.
/// The parser recovers at top-level form boundaries, so a single bad form
/// does not hide errors in the rest of the file.
pub fn parse(source: &str) -> (Module, Vec<Diagnostic>) {
    let (tokens, lex_errors) = lex(source);
    let mut parser = Parser::new(tokens);
    for loc in lex_errors {
        parser
            .errors
            .push(Diagnostic::error(Code::ParseError, "unexpected character", loc));
    }
    parser.parse_module();
    (parser.module, parser.errors)
}

struct Parser {
    tokens: Vec<(Token, Loc)>,
    pos: usize,
    module: Module,
    errors: Vec<Diagnostic>,
}

impl Parser {
    fn new(tokens: Vec<(Token, Loc)>) -> Self {
        Self {
            tokens,
            pos: 0,
            module: Module::new(),
            errors: Vec::new(),
        }
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(t, _)| t)
    }

    fn peek_loc(&self) -> Loc {
        self.tokens.get(self.pos).map(|(_, l)| *l).unwrap_or_else(|| {
            self.tokens
                .last()
                .map(|(_, l)| Loc::new(l.end, l.end))
                .unwrap_or(Loc::new(0, 0))
        })
    }

    fn advance(&mut self) -> (Token, Loc) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn check_symbol(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(s)) if s.as_str() == name)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Option<Loc> {
        if self.check(expected) {
            let (_, loc) = self.advance();
            Some(loc)
        } else {
            let loc = self.peek_loc();
            self.error(format!("expected {}", what), loc);
            None
        }
    }

    fn expect_symbol(&mut self, what: &str) -> Option<(SmolStr, Loc)> {
        if let Some(Token::Symbol(_)) = self.peek() {
            let (tok, loc) = self.advance();
            if let Token::Symbol(s) = tok {
                return Some((s, loc));
            }
            unreachable!()
        }
        let loc = self.peek_loc();
        self.error(format!("expected {}", what), loc);
        None
    }

    fn expect_atom(&mut self, what: &str) -> Option<(SmolStr, Loc)> {
        if let Some(Token::Atom(_)) = self.peek() {
            let (tok, loc) = self.advance();
            if let Token::Atom(s) = tok {
                return Some((s, loc));
            }
            unreachable!()
        }
        let loc = self.peek_loc();
        self.error(format!("expected {}", what), loc);
        None
    }

    fn error(&mut self, message: impl Into<String>, loc: Loc) {
        self.errors
            .push(Diagnostic::error(Code::ParseError, message, loc));
    }

    fn malformed(&mut self, message: impl Into<String>, loc: Loc) {
        self.errors
            .push(Diagnostic::error(Code::MalformedForm, message, loc));
    }

    /// Skip tokens until the currently open form's closing paren is
    /// consumed. Called with the opening paren already consumed.
    fn skip_to_close(&mut self) {
        let mut depth = 1usize;
        while !self.at_end() && depth > 0 {
            match self.advance().0 {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth -= 1,
                _ => {}
            }
        }
    }

    // ── Module ────────────────────────────────────────────────────

    fn parse_module(&mut self) {
        while !self.at_end() {
            self.parse_top_level();
        }
    }

    fn parse_top_level(&mut self) {
        let start = self.peek_loc();
        if self.check(&Token::LParen) {
            // Head symbol decides whether this is an item.
            if let Some(Token::Symbol(head)) = self.peek2() {
                match head.as_str() {
                    "ns" => return self.parse_ns(),
                    "import" => return self.parse_import(),
                    "defn" => return self.parse_defn(),
                    "deftype" => return self.parse_deftype(),
                    "defrecord" => return self.parse_defrecord(),
                    "defclass" => return self.parse_defclass(),
                    "instance" => return self.parse_instance(),
                    "process" => return self.parse_process(),
                    _ => {}
                }
            }
        }
        // Anything else is a top-level expression.
        let expr = self.parse_expr();
        let loc = start.merge(self.prev_loc());
        self.module.items.push((Item::TopExpr(expr), loc));
    }

    fn prev_loc(&self) -> Loc {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|(_, l)| *l)
            .unwrap_or(Loc::new(0, 0))
    }

    fn parse_ns(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // ns
        if let Some((name, _)) = self.expect_symbol("module name") {
            if self.module.name.is_some() {
                self.malformed("duplicate (ns …) form", start);
            } else {
                self.module.name = Some(name);
            }
        }
        self.expect(&Token::RParen, "`)` to close ns");
    }

    fn parse_import(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // import
        let Some((module, _)) = self.expect_symbol("module name") else {
            self.skip_to_close();
            return;
        };
        let mut alias = None;
        if matches!(self.peek(), Some(Token::Atom(a)) if a.as_str() == "as") {
            self.advance();
            alias = self.expect_symbol("alias name").map(|(s, _)| s);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close import")
            .unwrap_or(start);
        self.module
            .items
            .push((Item::Import(Import { module, alias, loc: start.merge(end) }), start.merge(end)));
    }

    // ── defn ──────────────────────────────────────────────────────

    fn parse_defn(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // defn
        let Some((name, name_loc)) = self.expect_symbol("function name") else {
            self.skip_to_close();
            return;
        };
        let Some(params) = self.parse_param_list() else {
            self.skip_to_close();
            return;
        };
        let body = self.parse_body();
        if body.is_empty() {
            self.malformed(format!("(defn {} …) has an empty body", name), start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close defn")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Defn(Defn {
                name,
                name_loc,
                params,
                body,
                loc,
            }),
            loc,
        ));
    }

    /// `[a b c]` — plain names only; the language is inference-only.
    fn parse_param_list(&mut self) -> Option<Vec<Param>> {
        self.expect(&Token::LBracket, "`[` to open parameter list")?;
        let mut params = Vec::new();
        while !self.at_end() && !self.check(&Token::RBracket) {
            let (name, loc) = self.expect_symbol("parameter name")?;
            params.push(Param { name, loc });
        }
        self.expect(&Token::RBracket, "`]` to close parameter list")?;
        Some(params)
    }

    /// Expressions until the enclosing form's closing paren.
    fn parse_body(&mut self) -> Vec<ExprId> {
        let mut body = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            body.push(self.parse_expr());
        }
        body
    }

    // ── deftype / defrecord ───────────────────────────────────────

    fn parse_deftype(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // deftype
        let Some((name, name_loc)) = self.expect_symbol("type name") else {
            self.skip_to_close();
            return;
        };
        let mut variants = Vec::new();
        let mut deriving = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            if self.check_symbol("deriving") {
                self.advance();
                deriving = self.parse_deriving_list();
                break;
            }
            let vstart = self.peek_loc();
            if self.expect(&Token::LParen, "`(` to open a variant").is_none() {
                self.skip_to_close();
                return;
            }
            let Some((vname, vname_loc)) = self.expect_symbol("constructor name") else {
                self.skip_to_close();
                self.skip_to_close();
                return;
            };
            let mut fields = Vec::new();
            while !self.at_end() && !self.check(&Token::RParen) {
                fields.push(self.parse_type_expr());
            }
            let vend = self
                .expect(&Token::RParen, "`)` to close variant")
                .unwrap_or(vstart);
            variants.push(Variant {
                name: vname,
                name_loc: vname_loc,
                fields,
                loc: vstart.merge(vend),
            });
        }
        if variants.is_empty() {
            self.malformed(format!("(deftype {} …) has no variants", name), start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close deftype")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Deftype(Deftype {
                name,
                name_loc,
                variants,
                deriving,
                loc,
            }),
            loc,
        ));
    }

    fn parse_deriving_list(&mut self) -> Vec<(SmolStr, Loc)> {
        let mut classes = Vec::new();
        if self
            .expect(&Token::LBracket, "`[` after deriving")
            .is_none()
        {
            return classes;
        }
        while !self.at_end() && !self.check(&Token::RBracket) {
            if let Some((name, loc)) = self.expect_symbol("class name") {
                classes.push((name, loc));
            } else {
                break;
            }
        }
        self.expect(&Token::RBracket, "`]` to close deriving list");
        classes
    }

    fn parse_defrecord(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // defrecord
        let Some((name, name_loc)) = self.expect_symbol("record name") else {
            self.skip_to_close();
            return;
        };
        let mut fields = Vec::new();
        let mut deriving = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            if self.check_symbol("deriving") {
                self.advance();
                deriving = self.parse_deriving_list();
                break;
            }
            let fstart = self.peek_loc();
            if self
                .expect(&Token::LBracket, "`[field Type]` for a record field")
                .is_none()
            {
                self.skip_to_close();
                return;
            }
            let Some((fname, fname_loc)) = self.expect_symbol("field name") else {
                self.skip_to_close();
                self.skip_to_close();
                return;
            };
            let ty = self.parse_type_expr();
            let fend = self
                .expect(&Token::RBracket, "`]` to close record field")
                .unwrap_or(fstart);
            fields.push(RecordField {
                name: fname,
                name_loc: fname_loc,
                ty,
                loc: fstart.merge(fend),
            });
        }
        if fields.is_empty() {
            self.malformed(format!("(defrecord {} …) has no fields", name), start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close defrecord")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Defrecord(Defrecord {
                name,
                name_loc,
                fields,
                deriving,
                loc,
            }),
            loc,
        ));
    }

    // ── defclass / instance ───────────────────────────────────────

    fn parse_defclass(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // defclass
        let Some((name, name_loc)) = self.expect_symbol("class name") else {
            self.skip_to_close();
            return;
        };
        // Single class type variable: `[a]`
        let tyvar = (|| {
            self.expect(&Token::LBracket, "`[` to open class type variable")?;
            let (tv, _) = self.expect_symbol("class type variable")?;
            self.expect(&Token::RBracket, "`]` to close class type variable")?;
            Some(tv)
        })();
        let Some(tyvar) = tyvar else {
            self.skip_to_close();
            return;
        };
        let mut methods = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            if let Some(m) = self.parse_method_sig() {
                methods.push(m);
            } else {
                self.skip_to_close();
                return;
            }
        }
        if methods.is_empty() {
            self.malformed(format!("(defclass {} …) has no methods", name), start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close defclass")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Defclass(Defclass {
                name,
                name_loc,
                tyvar,
                methods,
                loc,
            }),
            loc,
        ));
    }

    /// `(name [ty…] ret ([params] default-body…)?)`
    fn parse_method_sig(&mut self) -> Option<MethodSig> {
        let start = self.peek_loc();
        self.expect(&Token::LParen, "`(` to open a method signature")?;
        let (name, name_loc) = self.expect_symbol("method name")?;
        self.expect(&Token::LBracket, "`[` to open method parameter types")?;
        let mut params = Vec::new();
        while !self.at_end() && !self.check(&Token::RBracket) {
            params.push(self.parse_type_expr());
        }
        self.expect(&Token::RBracket, "`]` to close method parameter types")?;
        let ret = self.parse_type_expr();

        let mut default_params = Vec::new();
        let mut default_body = Vec::new();
        if self.check(&Token::LParen) && self.peek2() == Some(&Token::LBracket) {
            self.advance(); // (
            default_params = self.parse_param_list()?;
            default_body = self.parse_body();
            self.expect(&Token::RParen, "`)` to close default method body")?;
        }

        let end = self.expect(&Token::RParen, "`)` to close method signature")?;
        Some(MethodSig {
            name,
            name_loc,
            params,
            ret,
            default_params,
            default_body,
            loc: start.merge(end),
        })
    }

    fn parse_instance(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // instance
        let Some((class_name, class_loc)) = self.expect_symbol("class name") else {
            self.skip_to_close();
            return;
        };

        // Head: `Int`, `Maybe`, or `(Maybe a)`
        let head = match self.peek() {
            Some(Token::Symbol(_)) => {
                let (name, loc) = self.expect_symbol("instance head").unwrap();
                InstanceHead {
                    name,
                    args: Vec::new(),
                    loc,
                }
            }
            Some(Token::LParen) => {
                let hstart = self.peek_loc();
                self.advance();
                let Some((name, _)) = self.expect_symbol("instance head name") else {
                    self.skip_to_close();
                    self.skip_to_close();
                    return;
                };
                let mut args = Vec::new();
                while !self.at_end() && !self.check(&Token::RParen) {
                    match self.expect_symbol("instance head type variable") {
                        Some((a, _)) => args.push(a),
                        None => break,
                    }
                }
                let hend = self
                    .expect(&Token::RParen, "`)` to close instance head")
                    .unwrap_or(hstart);
                InstanceHead {
                    name,
                    args,
                    loc: hstart.merge(hend),
                }
            }
            _ => {
                let loc = self.peek_loc();
                self.error("expected instance head", loc);
                self.skip_to_close();
                return;
            }
        };

        // Optional `where [(Class a)…]`
        let mut constraints = Vec::new();
        if self.check_symbol("where") {
            self.advance();
            if self
                .expect(&Token::LBracket, "`[` after where")
                .is_some()
            {
                while !self.at_end() && !self.check(&Token::RBracket) {
                    let cstart = self.peek_loc();
                    if self.expect(&Token::LParen, "`(` to open constraint").is_none() {
                        break;
                    }
                    let Some((cname, _)) = self.expect_symbol("constraint class") else {
                        break;
                    };
                    let ty = self.parse_type_expr();
                    let cend = self
                        .expect(&Token::RParen, "`)` to close constraint")
                        .unwrap_or(cstart);
                    constraints.push(Constraint {
                        class_name: cname,
                        ty,
                        loc: cstart.merge(cend),
                    });
                }
                self.expect(&Token::RBracket, "`]` to close where list");
            }
        }

        // Method implementations
        let mut methods = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            let mstart = self.peek_loc();
            if self.expect(&Token::LParen, "`(` to open a method").is_none() {
                self.skip_to_close();
                return;
            }
            let Some((mname, mname_loc)) = self.expect_symbol("method name") else {
                self.skip_to_close();
                self.skip_to_close();
                return;
            };
            let Some(params) = self.parse_param_list() else {
                self.skip_to_close();
                self.skip_to_close();
                return;
            };
            let body = self.parse_body();
            let mend = self
                .expect(&Token::RParen, "`)` to close method")
                .unwrap_or(mstart);
            methods.push(MethodImpl {
                name: mname,
                name_loc: mname_loc,
                params,
                body,
                loc: mstart.merge(mend),
            });
        }

        let end = self
            .expect(&Token::RParen, "`)` to close instance")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Instance(InstanceDef {
                class_name,
                class_loc,
                head,
                constraints,
                methods,
                loc,
            }),
            loc,
        ));
    }

    // ── process ───────────────────────────────────────────────────

    fn parse_process(&mut self) {
        let start = self.peek_loc();
        self.advance(); // (
        self.advance(); // process
        let Some((name, name_loc)) = self.expect_symbol("process name") else {
            self.skip_to_close();
            return;
        };
        let init = self.parse_expr();
        let mut handlers = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            let Some((tag, tag_loc)) = self.expect_atom("message tag (`:name`)") else {
                self.skip_to_close();
                return;
            };
            let body = self.parse_expr();
            let loc = tag_loc.merge(self.prev_loc());
            handlers.push(Handler {
                tag,
                tag_loc,
                body,
                loc,
            });
        }
        if handlers.is_empty() {
            self.malformed(format!("(process {} …) declares no messages", name), start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close process")
            .unwrap_or(start);
        let loc = start.merge(end);
        self.module.items.push((
            Item::Process(ProcessDef {
                name,
                name_loc,
                init,
                handlers,
                loc,
            }),
            loc,
        ));
    }

    // ── Expressions ───────────────────────────────────────────────

    fn alloc_expr(&mut self, kind: ExprKind, loc: Loc) -> ExprId {
        self.module.exprs.alloc(Expr { kind, loc })
    }

    fn parse_expr(&mut self) -> ExprId {
        let loc = self.peek_loc();
        if self.at_end() {
            self.error("unexpected end of input", loc);
            return self.alloc_expr(ExprKind::Lit(Literal::Bool(false)), loc);
        }
        match self.peek().unwrap() {
            Token::Int(_) => {
                let (tok, loc) = self.advance();
                let Token::Int(n) = tok else { unreachable!() };
                self.alloc_expr(ExprKind::Lit(Literal::Int(n)), loc)
            }
            Token::Float(_) => {
                let (tok, loc) = self.advance();
                let Token::Float(x) = tok else { unreachable!() };
                self.alloc_expr(ExprKind::Lit(Literal::Float(x)), loc)
            }
            Token::String(_) => {
                let (tok, loc) = self.advance();
                let Token::String(s) = tok else { unreachable!() };
                self.alloc_expr(ExprKind::Lit(Literal::String(s)), loc)
            }
            Token::True => {
                let (_, loc) = self.advance();
                self.alloc_expr(ExprKind::Lit(Literal::Bool(true)), loc)
            }
            Token::False => {
                let (_, loc) = self.advance();
                self.alloc_expr(ExprKind::Lit(Literal::Bool(false)), loc)
            }
            Token::Atom(_) => {
                let (tok, loc) = self.advance();
                let Token::Atom(a) = tok else { unreachable!() };
                self.alloc_expr(ExprKind::Atom(a), loc)
            }
            Token::Symbol(_) => {
                let (tok, loc) = self.advance();
                let Token::Symbol(s) = tok else { unreachable!() };
                self.alloc_expr(ExprKind::Var(s), loc)
            }
            Token::LBracket => self.parse_list_literal(),
            Token::LParen => self.parse_compound_expr(),
            other => {
                let msg = format!("unexpected token {:?}", other);
                self.advance();
                self.error(msg, loc);
                self.alloc_expr(ExprKind::Lit(Literal::Bool(false)), loc)
            }
        }
    }

    fn parse_list_literal(&mut self) -> ExprId {
        let start = self.peek_loc();
        self.advance(); // [
        let mut elems = Vec::new();
        while !self.at_end() && !self.check(&Token::RBracket) {
            elems.push(self.parse_expr());
        }
        let end = self
            .expect(&Token::RBracket, "`]` to close list literal")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::ListLit(elems), start.merge(end))
    }

    fn parse_compound_expr(&mut self) -> ExprId {
        let start = self.peek_loc();
        self.advance(); // (

        if self.check(&Token::RParen) {
            let end = self.advance().1;
            let loc = start.merge(end);
            self.error("empty form `()`", loc);
            return self.alloc_expr(ExprKind::Do { body: Vec::new() }, loc);
        }

        if self.check(&Token::Dot) {
            self.advance();
            let record = self.parse_expr();
            let field = self
                .expect_atom("field name (`:name`)")
                .map(|(f, _)| f)
                .unwrap_or_else(|| SmolStr::new("_"));
            let end = self
                .expect(&Token::RParen, "`)` to close field access")
                .unwrap_or(start);
            return self.alloc_expr(
                ExprKind::FieldAccess { record, field },
                start.merge(end),
            );
        }

        if let Some(Token::Symbol(head)) = self.peek() {
            match head.as_str() {
                "if" => return self.parse_if(start),
                "let" => return self.parse_let(start),
                "fn" => return self.parse_lambda(start),
                "do" => return self.parse_do(start),
                "match" => return self.parse_match(start),
                "tuple" => return self.parse_tuple(start),
                "spawn" => return self.parse_spawn(start),
                "!" => return self.parse_send(start, false),
                "!!" => return self.parse_send(start, true),
                _ => {}
            }
        }

        // Plain call
        let func = self.parse_expr();
        let mut args = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            args.push(self.parse_expr());
        }
        let end = self
            .expect(&Token::RParen, "`)` to close call")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Call { func, args }, start.merge(end))
    }

    fn parse_if(&mut self, start: Loc) -> ExprId {
        self.advance(); // if
        let condition = self.parse_expr();
        let then_branch = self.parse_expr();
        let else_branch = self.parse_expr();
        let end = self
            .expect(&Token::RParen, "`)` to close if")
            .unwrap_or(start);
        self.alloc_expr(
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            },
            start.merge(end),
        )
    }

    fn parse_let(&mut self, start: Loc) -> ExprId {
        self.advance(); // let
        let mut bindings = Vec::new();
        if self
            .expect(&Token::LBracket, "`[` to open let bindings")
            .is_some()
        {
            while !self.at_end() && !self.check(&Token::RBracket) {
                let Some((name, name_loc)) = self.expect_symbol("binding name") else {
                    break;
                };
                let value = self.parse_expr();
                bindings.push(LetBinding {
                    name,
                    name_loc,
                    value,
                    loc: name_loc.merge(self.prev_loc()),
                });
            }
            self.expect(&Token::RBracket, "`]` to close let bindings");
        }
        let body = self.parse_body();
        if body.is_empty() {
            self.malformed("(let …) has an empty body", start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close let")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Let { bindings, body }, start.merge(end))
    }

    fn parse_lambda(&mut self, start: Loc) -> ExprId {
        self.advance(); // fn
        let params = self.parse_param_list().unwrap_or_default();
        let body = self.parse_body();
        if body.is_empty() {
            self.malformed("(fn …) has an empty body", start);
        }
        let end = self
            .expect(&Token::RParen, "`)` to close fn")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Lambda { params, body }, start.merge(end))
    }

    fn parse_do(&mut self, start: Loc) -> ExprId {
        self.advance(); // do
        let body = self.parse_body();
        let end = self
            .expect(&Token::RParen, "`)` to close do")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Do { body }, start.merge(end))
    }

    fn parse_tuple(&mut self, start: Loc) -> ExprId {
        self.advance(); // tuple
        let mut elems = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            elems.push(self.parse_expr());
        }
        let end = self
            .expect(&Token::RParen, "`)` to close tuple")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::TupleLit(elems), start.merge(end))
    }

    fn parse_spawn(&mut self, start: Loc) -> ExprId {
        self.advance(); // spawn
        let process = self
            .expect_symbol("process name")
            .map(|(s, _)| s)
            .unwrap_or_else(|| SmolStr::new("_"));
        let init = self.parse_expr();
        let end = self
            .expect(&Token::RParen, "`)` to close spawn")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Spawn { process, init }, start.merge(end))
    }

    fn parse_send(&mut self, start: Loc, unchecked: bool) -> ExprId {
        self.advance(); // ! or !!
        let pid = self.parse_expr();
        let msg = self.parse_expr();
        let end = self
            .expect(&Token::RParen, "`)` to close send")
            .unwrap_or(start);
        self.alloc_expr(
            ExprKind::Send {
                pid,
                msg,
                unchecked,
            },
            start.merge(end),
        )
    }

    fn parse_match(&mut self, start: Loc) -> ExprId {
        self.advance(); // match
        let scrutinee = self.parse_expr();
        let mut arms = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            let astart = self.peek_loc();
            if self
                .expect(&Token::LBracket, "`[pattern body…]` for a match clause")
                .is_none()
            {
                break;
            }
            let pattern = self.parse_pattern();
            let mut body = Vec::new();
            while !self.at_end() && !self.check(&Token::RBracket) {
                body.push(self.parse_expr());
            }
            if body.is_empty() {
                self.malformed("match clause has an empty body", astart);
            }
            let aend = self
                .expect(&Token::RBracket, "`]` to close match clause")
                .unwrap_or(astart);
            arms.push(MatchArm {
                pattern,
                body,
                loc: astart.merge(aend),
            });
        }
        let end = self
            .expect(&Token::RParen, "`)` to close match")
            .unwrap_or(start);
        self.alloc_expr(ExprKind::Match { scrutinee, arms }, start.merge(end))
    }

    // ── Patterns ──────────────────────────────────────────────────

    fn alloc_pattern(&mut self, kind: PatternKind, loc: Loc) -> PatternId {
        self.module.patterns.alloc(Pattern { kind, loc })
    }

    fn parse_pattern(&mut self) -> PatternId {
        let loc = self.peek_loc();
        if self.at_end() {
            self.error("expected pattern", loc);
            return self.alloc_pattern(PatternKind::Wildcard, loc);
        }
        match self.peek().unwrap() {
            Token::Int(_) => {
                let (tok, loc) = self.advance();
                let Token::Int(n) = tok else { unreachable!() };
                self.alloc_pattern(PatternKind::Literal(Literal::Int(n)), loc)
            }
            Token::Float(_) => {
                let (tok, loc) = self.advance();
                let Token::Float(x) = tok else { unreachable!() };
                self.alloc_pattern(PatternKind::Literal(Literal::Float(x)), loc)
            }
            Token::String(_) => {
                let (tok, loc) = self.advance();
                let Token::String(s) = tok else { unreachable!() };
                self.alloc_pattern(PatternKind::Literal(Literal::String(s)), loc)
            }
            Token::True => {
                let (_, loc) = self.advance();
                self.alloc_pattern(PatternKind::Literal(Literal::Bool(true)), loc)
            }
            Token::False => {
                let (_, loc) = self.advance();
                self.alloc_pattern(PatternKind::Literal(Literal::Bool(false)), loc)
            }
            Token::Atom(_) => {
                let (tok, loc) = self.advance();
                let Token::Atom(a) = tok else { unreachable!() };
                self.alloc_pattern(PatternKind::Atom(a), loc)
            }
            Token::Symbol(s) => {
                let is_wild = s.as_str() == "_";
                let is_binder = is_tyvar_name(s.as_str());
                let (tok, loc) = self.advance();
                let Token::Symbol(name) = tok else { unreachable!() };
                if is_wild {
                    self.alloc_pattern(PatternKind::Wildcard, loc)
                } else if is_binder {
                    self.alloc_pattern(PatternKind::Var(name), loc)
                } else {
                    // Nullary constructor
                    self.alloc_pattern(
                        PatternKind::Constructor {
                            name,
                            args: Vec::new(),
                        },
                        loc,
                    )
                }
            }
            Token::LBracket => self.parse_list_pattern(),
            Token::LParen => self.parse_compound_pattern(),
            other => {
                let msg = format!("unexpected token {:?} in pattern", other);
                self.advance();
                self.error(msg, loc);
                self.alloc_pattern(PatternKind::Wildcard, loc)
            }
        }
    }

    /// `[]`, `[h | t]`, or a fixed-length list `[p1 p2]` (sugar for nested
    /// cons ending in `[]`).
    fn parse_list_pattern(&mut self) -> PatternId {
        let start = self.peek_loc();
        self.advance(); // [
        if self.check(&Token::RBracket) {
            let end = self.advance().1;
            return self.alloc_pattern(PatternKind::EmptyList, start.merge(end));
        }
        let mut elems = vec![self.parse_pattern()];
        let mut tail = None;
        while !self.at_end() && !self.check(&Token::RBracket) {
            if self.eat(&Token::Pipe) {
                tail = Some(self.parse_pattern());
                break;
            }
            elems.push(self.parse_pattern());
        }
        let end = self
            .expect(&Token::RBracket, "`]` to close list pattern")
            .unwrap_or(start);
        let loc = start.merge(end);
        let mut acc = match tail {
            Some(t) => t,
            None => self.alloc_pattern(PatternKind::EmptyList, loc),
        };
        for head in elems.into_iter().rev() {
            acc = self.alloc_pattern(PatternKind::Cons { head, tail: acc }, loc);
        }
        acc
    }

    fn parse_compound_pattern(&mut self) -> PatternId {
        let start = self.peek_loc();
        self.advance(); // (
        if self.check_symbol("tuple") {
            self.advance();
            let mut elems = Vec::new();
            while !self.at_end() && !self.check(&Token::RParen) {
                elems.push(self.parse_pattern());
            }
            let end = self
                .expect(&Token::RParen, "`)` to close tuple pattern")
                .unwrap_or(start);
            return self.alloc_pattern(PatternKind::Tuple(elems), start.merge(end));
        }
        let Some((name, _)) = self.expect_symbol("constructor name") else {
            self.skip_to_close();
            return self.alloc_pattern(PatternKind::Wildcard, start);
        };
        let mut args = Vec::new();
        while !self.at_end() && !self.check(&Token::RParen) {
            args.push(self.parse_pattern());
        }
        let end = self
            .expect(&Token::RParen, "`)` to close constructor pattern")
            .unwrap_or(start);
        self.alloc_pattern(PatternKind::Constructor { name, args }, start.merge(end))
    }

    // ── Type expressions ──────────────────────────────────────────

    fn alloc_type_expr(&mut self, kind: TypeExprKind, loc: Loc) -> TypeExprId {
        self.module.type_exprs.alloc(TypeExpr { kind, loc })
    }

    fn parse_type_expr(&mut self) -> TypeExprId {
        let loc = self.peek_loc();
        match self.peek() {
            Some(Token::Symbol(s)) => {
                let kind = if is_tyvar_name(s.as_str()) {
                    TypeExprKind::TypeVar(s.clone())
                } else {
                    TypeExprKind::Named(s.clone())
                };
                self.advance();
                self.alloc_type_expr(kind, loc)
            }
            Some(Token::LParen) => {
                let start = self.peek_loc();
                self.advance();
                let Some((name, _)) = self.expect_symbol("type name") else {
                    self.skip_to_close();
                    return self.alloc_type_expr(
                        TypeExprKind::Named(SmolStr::new("Any")),
                        start,
                    );
                };
                match name.as_str() {
                    "Fn" => {
                        self.expect(&Token::LBracket, "`[` to open Fn parameters");
                        let mut params = Vec::new();
                        while !self.at_end() && !self.check(&Token::RBracket) {
                            params.push(self.parse_type_expr());
                        }
                        self.expect(&Token::RBracket, "`]` to close Fn parameters");
                        let ret = self.parse_type_expr();
                        let end = self
                            .expect(&Token::RParen, "`)` to close Fn type")
                            .unwrap_or(start);
                        self.alloc_type_expr(
                            TypeExprKind::Fn { params, ret },
                            start.merge(end),
                        )
                    }
                    "Tuple" => {
                        let mut elems = Vec::new();
                        while !self.at_end() && !self.check(&Token::RParen) {
                            elems.push(self.parse_type_expr());
                        }
                        let end = self
                            .expect(&Token::RParen, "`)` to close Tuple type")
                            .unwrap_or(start);
                        self.alloc_type_expr(TypeExprKind::Tuple(elems), start.merge(end))
                    }
                    _ => {
                        let mut args = Vec::new();
                        while !self.at_end() && !self.check(&Token::RParen) {
                            args.push(self.parse_type_expr());
                        }
                        let end = self
                            .expect(&Token::RParen, "`)` to close applied type")
                            .unwrap_or(start);
                        self.alloc_type_expr(
                            TypeExprKind::Applied { name, args },
                            start.merge(end),
                        )
                    }
                }
            }
            _ => {
                self.error("expected a type", loc);
                self.advance();
                self.alloc_type_expr(TypeExprKind::Named(SmolStr::new("Any")), loc)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let (module, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        module
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let (_, errors) = parse(source);
        assert!(!errors.is_empty(), "expected parse errors, got none");
        errors
    }

    #[test]
    fn parse_defn() {
        let m = parse_ok("(defn add [x y] (+ x y))");
        assert_eq!(m.items.len(), 1);
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        assert_eq!(d.name, "add");
        assert_eq!(d.params.len(), 2);
        assert_eq!(d.body.len(), 1);
    }

    #[test]
    fn parse_ns_and_import() {
        let m = parse_ok("(ns geometry) (import prelude) (import math :as m)");
        assert_eq!(m.name.as_deref(), Some("geometry"));
        let Item::Import(i) = &m.items[1].0 else {
            panic!("expected import")
        };
        assert_eq!(i.module, "math");
        assert_eq!(i.alias.as_deref(), Some("m"));
    }

    #[test]
    fn parse_deftype_with_deriving() {
        let m = parse_ok("(deftype Color (Red) (Green) (Blue) deriving [Eq Show])");
        let Item::Deftype(d) = &m.items[0].0 else {
            panic!("expected deftype")
        };
        assert_eq!(d.name, "Color");
        assert_eq!(d.variants.len(), 3);
        assert_eq!(d.deriving.len(), 2);
        assert_eq!(d.deriving[0].0, "Eq");
    }

    #[test]
    fn parse_deftype_with_fields() {
        let m = parse_ok("(deftype Maybe (Just v) (Nothing))");
        let Item::Deftype(d) = &m.items[0].0 else {
            panic!("expected deftype")
        };
        assert_eq!(d.variants[0].fields.len(), 1);
        assert_eq!(d.variants[1].fields.len(), 0);
    }

    #[test]
    fn parse_defrecord() {
        let m = parse_ok("(defrecord Point [x Int] [y Int] deriving [Eq])");
        let Item::Defrecord(d) = &m.items[0].0 else {
            panic!("expected defrecord")
        };
        assert_eq!(d.fields.len(), 2);
        assert_eq!(d.fields[0].name, "x");
        assert_eq!(d.deriving.len(), 1);
    }

    #[test]
    fn parse_defclass_with_default() {
        let m = parse_ok(
            "(defclass Eq [a]
               (eq [a a] Bool)
               (neq [a a] Bool ([x y] (not (eq x y)))))",
        );
        let Item::Defclass(d) = &m.items[0].0 else {
            panic!("expected defclass")
        };
        assert_eq!(d.tyvar, "a");
        assert_eq!(d.methods.len(), 2);
        assert!(d.methods[0].default_body.is_empty());
        assert_eq!(d.methods[1].default_params.len(), 2);
        assert_eq!(d.methods[1].default_body.len(), 1);
    }

    #[test]
    fn parse_instance_simple() {
        let m = parse_ok("(instance Show Int (show [x] (str x)))");
        let Item::Instance(i) = &m.items[0].0 else {
            panic!("expected instance")
        };
        assert_eq!(i.class_name, "Show");
        assert_eq!(i.head.name, "Int");
        assert!(i.constraints.is_empty());
        assert_eq!(i.methods.len(), 1);
    }

    #[test]
    fn parse_constrained_instance() {
        let m = parse_ok(
            "(instance Show (Maybe a) where [(Show a)]
               (show [x] \"maybe\"))",
        );
        let Item::Instance(i) = &m.items[0].0 else {
            panic!("expected instance")
        };
        assert_eq!(i.head.name, "Maybe");
        assert_eq!(i.head.args, vec![SmolStr::new("a")]);
        assert_eq!(i.constraints.len(), 1);
        assert_eq!(i.constraints[0].class_name, "Show");
    }

    #[test]
    fn parse_process_decl() {
        let m = parse_ok("(process counter 0 :inc (+ state 1) :reset 0)");
        let Item::Process(p) = &m.items[0].0 else {
            panic!("expected process")
        };
        assert_eq!(p.name, "counter");
        assert_eq!(p.handlers.len(), 2);
        assert_eq!(p.handlers[0].tag, "inc");
        assert_eq!(p.handlers[1].tag, "reset");
    }

    #[test]
    fn parse_send_operators() {
        let m = parse_ok("(defn go [p] (do (! p :inc) (!! p :anything)))");
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::Do { body } = &m.exprs[d.body[0]].kind else {
            panic!("expected do")
        };
        let ExprKind::Send { unchecked, .. } = &m.exprs[body[0]].kind else {
            panic!("expected send")
        };
        assert!(!unchecked);
        let ExprKind::Send { unchecked, .. } = &m.exprs[body[1]].kind else {
            panic!("expected send")
        };
        assert!(unchecked);
    }

    #[test]
    fn parse_field_access() {
        let m = parse_ok("(defn get-x [r] (. r :x))");
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::FieldAccess { field, .. } = &m.exprs[d.body[0]].kind else {
            panic!("expected field access")
        };
        assert_eq!(field, "x");
    }

    #[test]
    fn parse_match_with_patterns() {
        let m = parse_ok(
            "(defn f [x]
               (match x
                 [(Just v) v]
                 [(Nothing) 0]))",
        );
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::Match { arms, .. } = &m.exprs[d.body[0]].kind else {
            panic!("expected match")
        };
        assert_eq!(arms.len(), 2);
        let PatternKind::Constructor { name, args } = &m.patterns[arms[0].pattern].kind else {
            panic!("expected constructor pattern")
        };
        assert_eq!(name, "Just");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn parse_cons_pattern() {
        let m = parse_ok("(defn f [xs] (match xs [[] 0] [[h | t] h]))");
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::Match { arms, .. } = &m.exprs[d.body[0]].kind else {
            panic!("expected match")
        };
        assert!(matches!(
            m.patterns[arms[0].pattern].kind,
            PatternKind::EmptyList
        ));
        assert!(matches!(
            m.patterns[arms[1].pattern].kind,
            PatternKind::Cons { .. }
        ));
    }

    #[test]
    fn parse_fixed_list_pattern_desugars_to_cons() {
        let m = parse_ok("(defn f [xs] (match xs [[a b] a] [_ 0]))");
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::Match { arms, .. } = &m.exprs[d.body[0]].kind else {
            panic!("expected match")
        };
        let PatternKind::Cons { tail, .. } = &m.patterns[arms[0].pattern].kind else {
            panic!("expected cons")
        };
        let PatternKind::Cons { tail, .. } = &m.patterns[*tail].kind else {
            panic!("expected nested cons")
        };
        assert!(matches!(m.patterns[*tail].kind, PatternKind::EmptyList));
    }

    #[test]
    fn parse_let_pairs() {
        let m = parse_ok("(defn f [] (let [x 1 y 2] (+ x y)))");
        let Item::Defn(d) = &m.items[0].0 else {
            panic!("expected defn")
        };
        let ExprKind::Let { bindings, .. } = &m.exprs[d.body[0]].kind else {
            panic!("expected let")
        };
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].name, "x");
        assert_eq!(bindings[1].name, "y");
    }

    #[test]
    fn parse_top_level_expr() {
        let m = parse_ok("(+ 1 2)");
        assert!(matches!(m.items[0].0, Item::TopExpr(_)));
    }

    #[test]
    fn empty_defn_body_is_malformed() {
        let errors = parse_err("(defn broken [x])");
        assert!(errors.iter().any(|e| e.code == Code::MalformedForm));
    }

    #[test]
    fn unclosed_form_reports_error() {
        parse_err("(defn f [x] (+ x 1)");
    }

    #[test]
    fn recovery_continues_after_bad_form() {
        let (module, errors) = parse("(deftype) (defn ok [x] x)");
        assert!(!errors.is_empty());
        assert!(module
            .items
            .iter()
            .any(|(item, _)| matches!(item, Item::Defn(d) if d.name == "ok")));
    }
}
