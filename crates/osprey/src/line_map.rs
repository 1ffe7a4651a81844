//
// line_map.rs
//
// Offset/position translation for a fixed text snapshot. The analysis
// engine speaks byte offsets; the editor speaks line/UTF-16-column
// positions. Conversions must round-trip for the same snapshot.
//

use tower_lsp::lsp_types::{Position, Range};

use crate::engine::TextSpan;

/// Line index over an immutable text snapshot.
pub struct LineMap {
    text: String,
    /// Byte offset of the first character of each line.
    line_starts: Vec<usize>,
}

impl LineMap {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            text: text.to_string(),
            line_starts,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// The text of a line, without its trailing line break.
    pub fn line_text(&self, line: u32) -> &str {
        let line = line as usize;
        if line >= self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        self.text[start..end].trim_end_matches('\r')
    }

    /// Byte offset of the first character of a line (clamped to the last line).
    pub fn line_start(&self, line: u32) -> usize {
        let line = (line as usize).min(self.line_starts.len() - 1);
        self.line_starts[line]
    }

    pub fn offset_to_position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let col_text = &self.text[self.line_starts[line]..offset];
        let character: usize = col_text.chars().map(|c| c.len_utf16()).sum();
        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    pub fn position_to_offset(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.line_starts.len() {
            return self.text.len();
        }
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());
        start + utf16_column_to_byte_offset(&self.text[start..end], position.character)
    }

    pub fn span_to_range(&self, span: TextSpan) -> Range {
        Range {
            start: self.offset_to_position(span.start),
            end: self.offset_to_position(span.end()),
        }
    }

    pub fn range_to_span(&self, range: Range) -> TextSpan {
        let start = self.position_to_offset(range.start);
        let end = self.position_to_offset(range.end);
        TextSpan::from_bounds(start, end.max(start))
    }
}

/// Convert a UTF-16 column offset (from LSP Position.character) to a byte
/// offset within the given line.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count >= utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_offset_to_position_ascii() {
        let map = LineMap::new("ab\ncd\nef");
        assert_eq!(map.offset_to_position(0), Position::new(0, 0));
        assert_eq!(map.offset_to_position(3), Position::new(1, 0));
        assert_eq!(map.offset_to_position(4), Position::new(1, 1));
        assert_eq!(map.offset_to_position(8), Position::new(2, 2));
    }

    #[test]
    fn test_position_to_offset_clamps() {
        let map = LineMap::new("ab\ncd");
        assert_eq!(map.position_to_offset(Position::new(9, 0)), 5);
        assert_eq!(map.position_to_offset(Position::new(0, 99)), 3);
    }

    #[test]
    fn test_utf16_columns() {
        // 🎉 is 4 bytes, 2 UTF-16 units
        let map = LineMap::new("a🎉b");
        assert_eq!(map.position_to_offset(Position::new(0, 3)), 5);
        assert_eq!(map.offset_to_position(5), Position::new(0, 3));
    }

    #[test]
    fn test_span_range_round_trip() {
        let map = LineMap::new("function foo() {\n  return 1;\n}\n");
        let span = TextSpan::new(9, 3); // "foo"
        let range = map.span_to_range(span);
        assert_eq!(range.start, Position::new(0, 9));
        assert_eq!(range.end, Position::new(0, 12));
        assert_eq!(map.range_to_span(range), span);
    }

    #[test]
    fn test_line_text() {
        let map = LineMap::new("one\rtwo\r\nthree");
        assert_eq!(map.line_text(0), "one\rtwo");
        assert_eq!(map.line_text(1), "three");
        assert_eq!(map.line_text(7), "");
    }

    proptest! {
        /// Offset -> position -> offset is the identity for any char boundary.
        #[test]
        fn prop_offset_round_trip(text in "[a-z\\n é🎉]{0,40}", cut in 0usize..40) {
            let map = LineMap::new(&text);
            let mut offset = cut.min(text.len());
            while !text.is_char_boundary(offset) {
                offset -= 1;
            }
            let pos = map.offset_to_position(offset);
            prop_assert_eq!(map.position_to_offset(pos), offset);
        }
    }
}
