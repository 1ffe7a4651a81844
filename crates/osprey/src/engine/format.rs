//
// engine/format.rs
//
// Structural reindentation of a span. The engine tracks bracket depth
// line by line, seeded with a caller-provided base indent level, and
// emits one leading-whitespace replacement edit per misindented line.
//

use super::{EngineSession, TextSpan};

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub tab_size: u32,
    pub insert_spaces: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            tab_size: 4,
            insert_spaces: true,
        }
    }
}

/// A single replacement edit in engine coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEdit {
    pub span: TextSpan,
    pub new_text: String,
}

/// Build an indent string for `level` indentation levels.
pub fn indent_string(level: u32, options: &FormatOptions) -> String {
    if options.insert_spaces {
        " ".repeat((level * options.tab_size) as usize)
    } else {
        "\t".repeat(level as usize)
    }
}

impl EngineSession {
    /// Reindent every line that starts inside `span`. The first line's
    /// indent level is `initial_indent`; subsequent levels follow the
    /// net bracket depth of the preceding lines.
    pub fn format_span(
        &self,
        span: TextSpan,
        options: &FormatOptions,
        initial_indent: u32,
    ) -> Vec<FormatEdit> {
        let mut edits = Vec::new();
        let mut depth = initial_indent as i32;

        let mut line_start = line_start_at(&self.text, span.start);
        while line_start < span.end() && line_start < self.text.len() {
            let line_end = self.text[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(self.text.len());
            let line = &self.text[line_start..line_end];
            let balance = scan_line(line);

            if !line.trim().is_empty() {
                let target = (depth + balance.leading_closers).max(0) as u32;
                let current_indent_len = line.len() - line.trim_start().len();
                let desired = indent_string(target, options);
                if line[..current_indent_len] != desired {
                    edits.push(FormatEdit {
                        span: TextSpan::new(line_start, current_indent_len),
                        new_text: desired,
                    });
                }
            }

            depth += balance.net;
            line_start = line_end + 1;
        }

        edits
    }
}

struct LineBalance {
    /// Net bracket delta of the whole line.
    net: i32,
    /// Negative adjustment when the line begins with closing brackets,
    /// so closers align with their opener's line.
    leading_closers: i32,
}

/// Count bracket depth changes on a line, skipping string literals and
/// anything after a line comment marker.
fn scan_line(line: &str) -> LineBalance {
    let mut net = 0i32;
    let mut leading = 0i32;
    let mut seen_code = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                seen_code = true;
            }
            '/' if chars.peek() == Some(&'/') => break,
            '{' | '[' | '(' => {
                net += 1;
                seen_code = true;
            }
            '}' | ']' | ')' => {
                net -= 1;
                if !seen_code {
                    leading -= 1;
                }
                seen_code = true;
            }
            c if c.is_whitespace() => {}
            _ => seen_code = true,
        }
    }

    LineBalance {
        net,
        leading_closers: leading,
    }
}

fn line_start_at(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())]
        .rfind('\n')
        .map(|i| i + 1)
        .unwrap_or(0)
}
