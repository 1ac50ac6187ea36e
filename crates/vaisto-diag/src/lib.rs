use std::fmt;
use vaisto_lexer::Loc;

// ── Codes ────────────────────────────────────────────────────────

/// Three-digit diagnostic codes, grouped by category:
/// `E0xx` type errors, `E1xx` name resolution, `E2xx` syntax/shape,
/// `E3xx` process/concurrency, `E9xx` internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    TypeMismatch,
    HeterogeneousList,
    BranchDivergence,
    ReturnType,
    Arity,
    InvalidOperand,
    ConsMismatch,
    NotAList,
    NotAFunction,
    HigherOrderArity,
    NonBoolPredicate,
    InfiniteType,
    RecordField,
    NonExhaustiveMatch,
    RedundantClause,
    NoInstance,
    UnknownClass,
    DerivingUnsupported,
    DuplicateInstance,
    MissingInstanceMethod,
    ConstraintDepth,
    UndefinedVariable,
    UnknownFunction,
    UnknownType,
    UnknownProcess,
    DuplicateDefinition,
    MalformedForm,
    ParseError,
    InvalidMessage,
    SendToNonPid,
    Internal,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::TypeMismatch => "E001",
            Code::HeterogeneousList => "E002",
            Code::BranchDivergence => "E003",
            Code::ReturnType => "E004",
            Code::Arity => "E005",
            Code::InvalidOperand => "E006",
            Code::ConsMismatch => "E007",
            Code::NotAList => "E008",
            Code::NotAFunction => "E009",
            Code::HigherOrderArity => "E010",
            Code::NonBoolPredicate => "E011",
            Code::InfiniteType => "E012",
            Code::RecordField => "E013",
            Code::NonExhaustiveMatch => "E014",
            Code::RedundantClause => "E015",
            Code::NoInstance => "E020",
            Code::UnknownClass => "E021",
            Code::DerivingUnsupported => "E022",
            Code::DuplicateInstance => "E023",
            Code::MissingInstanceMethod => "E024",
            Code::ConstraintDepth => "E030",
            Code::UndefinedVariable => "E100",
            Code::UnknownFunction => "E101",
            Code::UnknownType => "E102",
            Code::UnknownProcess => "E103",
            Code::DuplicateDefinition => "E104",
            Code::MalformedForm => "E200",
            Code::ParseError => "E201",
            Code::InvalidMessage => "E300",
            Code::SendToNonPid => "E301",
            Code::Internal => "E900",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

// ── Diagnostics ──────────────────────────────────────────────────

/// A structured diagnostic with a primary span and optional context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Code,
    pub severity: Severity,
    pub message: String,
    pub loc: Loc,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub hint: Option<String>,
    pub related: Vec<(String, Loc)>,
}

impl Diagnostic {
    pub fn error(code: Code, message: impl Into<String>, loc: Loc) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            loc,
            expected: None,
            actual: None,
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn warning(code: Code, message: impl Into<String>, loc: Loc) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, loc)
        }
    }

    pub fn with_types(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, message: impl Into<String>, loc: Loc) -> Self {
        self.related.push((message.into(), loc));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Line/column (1-based) for a byte offset.
fn line_col(source: &str, offset: u32) -> (usize, usize) {
    let offset = (offset as usize).min(source.len());
    let before = &source[..offset];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let col = before.rfind('\n').map(|i| offset - i - 1).unwrap_or(offset) + 1;
    (line, col)
}

fn source_line(source: &str, line: usize) -> &str {
    source.lines().nth(line - 1).unwrap_or("")
}

/// Render one diagnostic in the compact caret form:
///
/// ```text
/// error[E001]: type mismatch
///   --> main.va:3:9
///    |
///  3 |   (+ 1 true)
///    |        ^^^^
///    = expected Int, found Bool
/// ```
pub fn render(diag: &Diagnostic, file: &str, source: &str) -> String {
    let mut out = String::new();
    let kind = match diag.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    let (line, col) = line_col(source, diag.loc.start);
    out.push_str(&format!("{}[{}]: {}\n", kind, diag.code, diag.message));
    out.push_str(&format!("  --> {}:{}:{}\n", file, line, col));

    let text = source_line(source, line);
    let gutter_width = line.to_string().len().max(2);
    out.push_str(&format!("{:>width$} |\n", "", width = gutter_width));
    out.push_str(&format!("{:>width$} | {}\n", line, text, width = gutter_width));

    let caret_len = (diag.loc.len() as usize)
        .min(text.len().saturating_sub(col - 1))
        .max(1);
    out.push_str(&format!(
        "{:>width$} | {}{}\n",
        "",
        " ".repeat(col - 1),
        "^".repeat(caret_len),
        width = gutter_width
    ));

    if let (Some(exp), Some(act)) = (&diag.expected, &diag.actual) {
        out.push_str(&format!(
            "{:>width$} = expected {}, found {}\n",
            "",
            exp,
            act,
            width = gutter_width
        ));
    }
    if let Some(hint) = &diag.hint {
        out.push_str(&format!("{:>width$} = hint: {}\n", "", hint, width = gutter_width));
    }
    for (msg, loc) in &diag.related {
        let (rline, rcol) = line_col(source, loc.start);
        out.push_str(&format!(
            "{:>width$} = note: {} ({}:{}:{})\n",
            "",
            msg,
            file,
            rline,
            rcol,
            width = gutter_width
        ));
    }
    out
}

/// Render a list of diagnostics separated by blank lines.
pub fn render_all(diags: &[Diagnostic], file: &str, source: &str) -> String {
    diags
        .iter()
        .map(|d| render(d, file, source))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Name suggestions ─────────────────────────────────────────────

/// Jaro similarity of two strings.
fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 1.0 } else { 0.0 };
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && *ca == b[j] {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut j = 0usize;
    for (i, m) in a_matched.iter().enumerate() {
        if !m {
            continue;
        }
        while !b_matched[j] {
            j += 1;
        }
        if a[i] != b[j] {
            transpositions += 1;
        }
        j += 1;
    }

    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64 / 2.0) / m) / 3.0
}

/// Jaro–Winkler similarity: Jaro boosted by a shared prefix (up to 4 chars).
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let base = jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();
    base + prefix as f64 * 0.1 * (1.0 - base)
}

/// The closest candidate with similarity above 0.75, if any.
pub fn suggest<'a, I>(name: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&str, f64)> = None;
    for cand in candidates {
        let score = jaro_winkler(name, cand);
        if score > 0.75 && best.map_or(true, |(_, s)| score > s) {
            best = Some((cand, score));
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_format() {
        assert_eq!(Code::TypeMismatch.to_string(), "E001");
        assert_eq!(Code::Arity.to_string(), "E005");
        assert_eq!(Code::UndefinedVariable.to_string(), "E100");
        assert_eq!(Code::InvalidMessage.to_string(), "E300");
    }

    #[test]
    fn render_has_header_location_and_caret() {
        let source = "(defn main []\n  (+ 1 true))\n";
        let diag = Diagnostic::error(Code::TypeMismatch, "type mismatch", Loc::new(21, 25))
            .with_types("Int", "Bool");
        let rendered = render(&diag, "main.va", source);
        assert!(rendered.starts_with("error[E001]: type mismatch\n"));
        assert!(rendered.contains("--> main.va:2:8"));
        assert!(rendered.contains("(+ 1 true))"));
        assert!(rendered.contains("^^^^"));
        assert!(rendered.contains("expected Int, found Bool"));
    }

    #[test]
    fn render_warning_header() {
        let diag = Diagnostic::warning(Code::RedundantClause, "redundant clause", Loc::new(0, 1));
        let rendered = render(&diag, "m.va", "x");
        assert!(rendered.starts_with("warning[E015]:"));
    }

    #[test]
    fn jaro_winkler_identical_and_disjoint() {
        assert!((jaro_winkler("spawn", "spawn") - 1.0).abs() < 1e-9);
        assert_eq!(jaro_winkler("abc", "xyz"), 0.0);
    }

    #[test]
    fn suggest_close_names() {
        let lexicon = ["println", "print", "str", "len"];
        assert_eq!(suggest("printn", lexicon.iter().copied()), Some("println"));
        assert_eq!(suggest("zzz", lexicon.iter().copied()), None);
    }

    #[test]
    fn suggest_respects_threshold() {
        // "ab" vs "len" is well below 0.75
        assert_eq!(suggest("ab", ["len"].iter().copied()), None);
    }
}
