use tower_lsp::lsp_types::{Position, Range};
use vaisto_ast::Module;
use vaisto_elab::ElabResult;
use vaisto_lexer::Loc;

/// Maps between byte offsets (compiler `Loc`s) and LSP positions.
/// LSP columns are UTF-16 code units, so conversion needs the line text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of the start of each line.
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        LineIndex { line_starts }
    }

    pub fn offset_to_position(&self, text: &str, offset: u32) -> Position {
        let offset = offset.min(text.len() as u32);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next_line) => next_line - 1,
        };
        let line_start = self.line_starts[line] as usize;
        let prefix = &text[line_start..offset as usize];
        let character = prefix.chars().map(|c| c.len_utf16() as u32).sum();
        Position {
            line: line as u32,
            character,
        }
    }

    pub fn position_to_offset(&self, text: &str, position: Position) -> u32 {
        let line = position.line as usize;
        if line >= self.line_starts.len() {
            return text.len() as u32;
        }
        let line_start = self.line_starts[line] as usize;
        let line_end = self
            .line_starts
            .get(line + 1)
            .map(|&s| s as usize)
            .unwrap_or(text.len());
        let mut units = 0u32;
        for (i, c) in text[line_start..line_end].char_indices() {
            if units >= position.character {
                return (line_start + i) as u32;
            }
            units += c.len_utf16() as u32;
        }
        line_end as u32
    }

    pub fn loc_to_range(&self, text: &str, loc: Loc) -> Range {
        Range {
            start: self.offset_to_position(text, loc.start),
            end: self.offset_to_position(text, loc.end),
        }
    }
}

/// Per-document state tracked by the LSP server.
pub struct Document {
    pub text: String,
    pub line_index: LineIndex,
    pub version: i32,
    pub analysis: Option<AnalysisResult>,
}

impl Document {
    pub fn new(text: String, version: i32) -> Self {
        let line_index = LineIndex::new(&text);
        Self {
            text,
            line_index,
            version,
            analysis: None,
        }
    }
}

/// Result of running parse + elaboration on a document.
pub struct AnalysisResult {
    pub module: Module,
    pub elab: ElabResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_positions() {
        let text = "abc\ndef";
        let idx = LineIndex::new(text);
        assert_eq!(
            idx.offset_to_position(text, 5),
            Position {
                line: 1,
                character: 1
            }
        );
        assert_eq!(
            idx.position_to_offset(
                text,
                Position {
                    line: 1,
                    character: 1
                }
            ),
            5
        );
    }

    #[test]
    fn utf16_columns_for_multibyte_source() {
        // 'λ' is one UTF-16 unit but two UTF-8 bytes.
        let text = "(λ 1)";
        let idx = LineIndex::new(text);
        // Byte offset of `1` is 4; UTF-16 column is 3.
        assert_eq!(
            idx.offset_to_position(text, 4),
            Position {
                line: 0,
                character: 3
            }
        );
        assert_eq!(
            idx.position_to_offset(
                text,
                Position {
                    line: 0,
                    character: 3
                }
            ),
            4
        );
    }

    #[test]
    fn positions_past_end_clamp() {
        let text = "ab";
        let idx = LineIndex::new(text);
        assert_eq!(
            idx.position_to_offset(
                text,
                Position {
                    line: 9,
                    character: 0
                }
            ),
            2
        );
    }
}
