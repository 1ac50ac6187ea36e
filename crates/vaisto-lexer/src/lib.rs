use logos::Logos;
use smol_str::SmolStr;

/// Source location as byte offsets into the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Loc {
    pub start: u32,
    pub end: u32,
}

impl Loc {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Loc) -> Loc {
        Loc {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => result.push('\n'),
                't' => result.push('\t'),
                'r' => result.push('\r'),
                '\\' => result.push('\\'),
                '"' => result.push('"'),
                '0' => result.push('\0'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(".", priority = 3)]
    Dot,
    #[token("|", priority = 3)]
    Pipe,

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", priority = 3, callback = |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"-?[0-9]+", priority = 2, callback = |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, callback = parse_string)]
    String(String),

    #[token("true")]
    True,
    #[token("false")]
    False,

    /// Atom literal: `:inc`, `:yes`
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_\-!?]*", callback = |lex| SmolStr::new(&lex.slice()[1..]))]
    Atom(SmolStr),

    /// Symbol (identifiers and operators): `foo`, `+`, `!`, `spawn`, `not=`
    #[regex(r"[a-zA-Z_+\-*/<>=!&^~][a-zA-Z0-9_+\-*/<>=!&^~?]*", priority = 1, callback = |lex| SmolStr::new(lex.slice()))]
    Symbol(SmolStr),
}

/// Lex source code into a list of (token, loc) pairs plus error spans.
pub fn lex(source: &str) -> (Vec<(Token, Loc)>, Vec<Loc>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let loc = Loc::new(range.start as u32, range.end as u32);
        match result {
            Ok(token) => tokens.push((token, loc)),
            Err(_) => errors.push(loc),
        }
    }

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_tokens(source: &str) -> Vec<Token> {
        let (tokens, errors) = lex(source);
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn delimiters() {
        assert_eq!(
            lex_tokens("( ) [ ]"),
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn integers_and_floats() {
        assert_eq!(lex_tokens("42"), vec![Token::Int(42)]);
        assert_eq!(lex_tokens("-7"), vec![Token::Int(-7)]);
        assert_eq!(lex_tokens("2.5"), vec![Token::Float(2.5)]);
        assert_eq!(lex_tokens("1.0e10"), vec![Token::Float(1.0e10)]);
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            lex_tokens(r#""hello\nworld""#),
            vec![Token::String("hello\nworld".into())]
        );
        assert_eq!(lex_tokens(r#""""#), vec![Token::String("".into())]);
    }

    #[test]
    fn booleans() {
        assert_eq!(lex_tokens("true false"), vec![Token::True, Token::False]);
    }

    #[test]
    fn atoms() {
        assert_eq!(
            lex_tokens(":inc :yes"),
            vec![Token::Atom("inc".into()), Token::Atom("yes".into())]
        );
    }

    #[test]
    fn send_operators() {
        assert_eq!(
            lex_tokens("! !!"),
            vec![Token::Symbol("!".into()), Token::Symbol("!!".into())]
        );
    }

    #[test]
    fn dot_is_its_own_token() {
        assert_eq!(
            lex_tokens("(. r :x)"),
            vec![
                Token::LParen,
                Token::Dot,
                Token::Symbol("r".into()),
                Token::Atom("x".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn cons_pattern_tokens() {
        assert_eq!(
            lex_tokens("[h | t]"),
            vec![
                Token::LBracket,
                Token::Symbol("h".into()),
                Token::Pipe,
                Token::Symbol("t".into()),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex_tokens("+ - * / < > <= >= = not="),
            vec![
                Token::Symbol("+".into()),
                Token::Symbol("-".into()),
                Token::Symbol("*".into()),
                Token::Symbol("/".into()),
                Token::Symbol("<".into()),
                Token::Symbol(">".into()),
                Token::Symbol("<=".into()),
                Token::Symbol(">=".into()),
                Token::Symbol("=".into()),
                Token::Symbol("not=".into()),
            ]
        );
    }

    #[test]
    fn kebab_symbols() {
        assert_eq!(
            lex_tokens("spawn-enemy empty?"),
            vec![
                Token::Symbol("spawn-enemy".into()),
                Token::Symbol("empty?".into()),
            ]
        );
    }

    #[test]
    fn comments_skipped() {
        assert_eq!(lex_tokens("; a comment\n42"), vec![Token::Int(42)]);
    }

    #[test]
    fn simple_expression() {
        assert_eq!(
            lex_tokens("(+ 1 2)"),
            vec![
                Token::LParen,
                Token::Symbol("+".into()),
                Token::Int(1),
                Token::Int(2),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn locs() {
        let (tokens, _) = lex("(+ 1 2)");
        assert_eq!(tokens[0], (Token::LParen, Loc::new(0, 1)));
        assert_eq!(tokens[1], (Token::Symbol("+".into()), Loc::new(1, 2)));
        assert_eq!(tokens[2], (Token::Int(1), Loc::new(3, 4)));
        assert_eq!(tokens[3], (Token::Int(2), Loc::new(5, 6)));
        assert_eq!(tokens[4], (Token::RParen, Loc::new(6, 7)));
    }

    #[test]
    fn error_spans_reported() {
        let (tokens, errors) = lex("(foo @)");
        assert_eq!(tokens.len(), 3);
        assert_eq!(errors, vec![Loc::new(5, 6)]);
    }
}
