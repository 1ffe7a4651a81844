//
// document.rs
//
// Open-document model: rope-backed text with LSP incremental sync.
//

use ropey::Rope;
use tower_lsp::lsp_types::TextDocumentContentChangeEvent;

/// An open text document as reported by the editor.
#[derive(Debug, Clone)]
pub struct Document {
    pub contents: Rope,
    pub language_id: String,
    pub version: i32,
}

impl Document {
    pub fn new(text: &str, language_id: &str, version: i32) -> Self {
        Self {
            contents: Rope::from_str(text),
            language_id: language_id.to_string(),
            version,
        }
    }

    /// Apply a single LSP content change. Ranged changes use UTF-16 columns;
    /// a change without a range replaces the whole document.
    pub fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        if let Some(range) = change.range {
            let start_line = range.start.line as usize;
            let end_line = range.end.line as usize;

            let start_line_text = self.contents.line(start_line).to_string();
            let end_line_text = self.contents.line(end_line).to_string();

            let start_char =
                utf16_offset_to_char_offset(&start_line_text, range.start.character as usize);
            let end_char =
                utf16_offset_to_char_offset(&end_line_text, range.end.character as usize);

            let start_idx = self.contents.line_to_char(start_line) + start_char;
            let end_idx = self.contents.line_to_char(end_line) + end_char;

            self.contents.remove(start_idx..end_idx);
            self.contents.insert(start_idx, &change.text);
        } else {
            // Full document sync
            self.contents = Rope::from_str(&change.text);
        }
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }

    pub fn line_count(&self) -> usize {
        self.contents.len_lines()
    }
}

fn utf16_offset_to_char_offset(line_text: &str, utf16_offset: usize) -> usize {
    let mut utf16_count = 0;
    let mut char_count = 0;

    for ch in line_text.chars() {
        if utf16_count >= utf16_offset {
            return char_count;
        }
        utf16_count += ch.len_utf16();
        char_count += 1;
    }
    char_count
}
