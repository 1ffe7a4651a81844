//
// search/glob.rs
//
// Glob expression matching for exclude/include filters. An expression
// maps glob patterns to either a boolean or a sibling clause; pattern
// order is preserved so the first matching pattern decides.
//
// Paths are matched in '/'-normalized relative form. `**` crosses
// segment boundaries, `*` and `?` stay within one segment, and `{a,b}`
// groups alternate.
//

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

/// The value side of one expression entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobValue {
    /// Plain on/off. `false` entries never match.
    Simple(bool),
    /// Matches only when a named sibling file exists next to the
    /// candidate. `$(basename)` expands to the candidate's file name
    /// without its extension.
    SiblingClause { when: String },
}

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    regex: Regex,
    value: GlobValue,
}

/// A parsed glob expression. Empty expressions match nothing.
#[derive(Debug, Default)]
pub struct GlobExpression {
    patterns: Vec<CompiledPattern>,
}

impl GlobExpression {
    /// Parse from a configuration value: a single pattern string, or a
    /// pattern-to-value map, or null/absent for the empty expression.
    pub fn parse(value: &Value) -> Self {
        let mut entries: IndexMap<String, GlobValue> = IndexMap::new();
        match value {
            Value::String(pattern) => {
                entries.insert(pattern.clone(), GlobValue::Simple(true));
            }
            Value::Object(map) => {
                for (pattern, v) in map {
                    let glob_value = match v {
                        Value::Bool(enabled) => GlobValue::Simple(*enabled),
                        Value::Object(clause) => match clause.get("when") {
                            Some(Value::String(when)) => GlobValue::SiblingClause {
                                when: when.clone(),
                            },
                            _ => continue,
                        },
                        _ => continue,
                    };
                    entries.insert(pattern.clone(), glob_value);
                }
            }
            _ => {}
        }
        Self::from_entries(entries)
    }

    pub fn from_pattern(pattern: &str) -> Self {
        let mut entries = IndexMap::new();
        entries.insert(pattern.to_string(), GlobValue::Simple(true));
        Self::from_entries(entries)
    }

    fn from_entries(entries: IndexMap<String, GlobValue>) -> Self {
        let patterns = entries
            .into_iter()
            .filter_map(|(source, value)| {
                let anchored = format!("^{}$", glob_to_regex(&source));
                match Regex::new(&anchored) {
                    Ok(regex) => Some(CompiledPattern {
                        source,
                        regex,
                        value,
                    }),
                    Err(e) => {
                        log::warn!("ignoring unparsable glob pattern {source:?}: {e}");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether the expression matches `path`. `siblings` is the list of
    /// file names in the candidate's directory; passing `None` renders
    /// sibling clauses inert, which is how explicitly targeted files
    /// bypass sibling-conditional excludes.
    pub fn matches(&self, path: &str, basename: &str, siblings: Option<&[String]>) -> bool {
        self.evaluate(path, basename, siblings, false)
    }

    /// Sibling-conservative variant for callers that cannot enumerate
    /// siblings (ancestor directory checks): a sibling clause whose
    /// pattern matches counts as a match.
    pub fn matches_conservative(&self, path: &str, basename: &str) -> bool {
        self.evaluate(path, basename, None, true)
    }

    fn evaluate(
        &self,
        path: &str,
        basename: &str,
        siblings: Option<&[String]>,
        assume_siblings: bool,
    ) -> bool {
        for pattern in &self.patterns {
            if !pattern.regex.is_match(path) {
                continue;
            }
            match &pattern.value {
                GlobValue::Simple(enabled) => {
                    if *enabled {
                        return true;
                    }
                    // A disabled pattern decides for its path.
                    return false;
                }
                GlobValue::SiblingClause { when } => {
                    if assume_siblings {
                        return true;
                    }
                    let Some(siblings) = siblings else {
                        continue;
                    };
                    let stem = basename
                        .rsplit_once('.')
                        .map(|(stem, _)| stem)
                        .unwrap_or(basename);
                    let required = when.replace("$(basename)", stem);
                    if siblings.iter().any(|s| *s == required) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Pattern sources, for diagnostics.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }
}

/// Translate one glob pattern into an (unanchored) regex body.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let bytes = pattern.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    if bytes.get(i + 2) == Some(&b'/') {
                        // `**/` matches zero or more whole segments
                        out.push_str("(?:[^/]+/)*");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            b'?' => {
                out.push_str("[^/]");
                i += 1;
            }
            b'{' => {
                // Alternation group; find the balancing brace
                if let Some(close) = find_closing_brace(pattern, i) {
                    let inner = &pattern[i + 1..close];
                    let branches: Vec<String> = split_alternatives(inner)
                        .iter()
                        .map(|alt| glob_to_regex(alt))
                        .collect();
                    out.push_str("(?:");
                    out.push_str(&branches.join("|"));
                    out.push(')');
                    i = close + 1;
                } else {
                    out.push_str("\\{");
                    i += 1;
                }
            }
            b'[' => {
                // Character classes pass through with minimal escaping
                if let Some(close) = pattern[i + 1..].find(']').map(|j| i + 1 + j) {
                    out.push('[');
                    let mut inner = &pattern[i + 1..close];
                    if let Some(rest) = inner.strip_prefix('!') {
                        out.push('^');
                        inner = rest;
                    }
                    out.push_str(inner);
                    out.push(']');
                    i = close + 1;
                } else {
                    out.push_str("\\[");
                    i += 1;
                }
            }
            c => {
                let c = c as char;
                if c.is_ascii() && !c.is_ascii_alphanumeric() && c != '/' && c != '_' && c != '-' {
                    out.push('\\');
                    out.push(c);
                    i += 1;
                } else {
                    // Copy the whole UTF-8 character
                    let ch = pattern[i..].chars().next().unwrap_or(c);
                    out.push(ch);
                    i += ch.len_utf8();
                }
            }
        }
    }
    out
}

fn find_closing_brace(pattern: &str, open: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in pattern[open..].char_indices().map(|(i, c)| (open + i, c)) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_alternatives(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr(value: Value) -> GlobExpression {
        GlobExpression::parse(&value)
    }

    #[test]
    fn test_star_stays_in_segment() {
        let e = expr(json!("*.js"));
        assert!(e.matches("app.js", "app.js", None));
        assert!(!e.matches("src/app.js", "app.js", None));
    }

    #[test]
    fn test_globstar_crosses_segments() {
        let e = expr(json!("**/*.js"));
        assert!(e.matches("app.js", "app.js", None));
        assert!(e.matches("src/deep/app.js", "app.js", None));
        assert!(!e.matches("src/app.ts", "app.ts", None));
    }

    #[test]
    fn test_directory_exclude_pattern() {
        let e = expr(json!({ "**/node_modules/**": true }));
        assert!(e.matches("node_modules/lodash/index.js", "index.js", None));
        assert!(e.matches("pkg/node_modules/x.js", "x.js", None));
        assert!(!e.matches("src/modules/x.js", "x.js", None));
    }

    #[test]
    fn test_question_mark_single_char() {
        let e = expr(json!("file?.txt"));
        assert!(e.matches("file1.txt", "file1.txt", None));
        assert!(!e.matches("file10.txt", "file10.txt", None));
        assert!(!e.matches("a/b.txt", "b.txt", None));
    }

    #[test]
    fn test_brace_alternation() {
        let e = expr(json!("**/*.{js,ts}"));
        assert!(e.matches("src/a.js", "a.js", None));
        assert!(e.matches("src/a.ts", "a.ts", None));
        assert!(!e.matches("src/a.rs", "a.rs", None));
    }

    #[test]
    fn test_disabled_pattern_never_matches() {
        let e = expr(json!({ "**/*.log": false }));
        assert!(!e.matches("out/build.log", "build.log", None));
    }

    #[test]
    fn test_sibling_clause_requires_sibling() {
        let e = expr(json!({ "**/*.js": { "when": "$(basename).ts" } }));
        let siblings = vec!["app.ts".to_string(), "app.js".to_string()];
        assert!(e.matches("src/app.js", "app.js", Some(&siblings)));

        let no_ts = vec!["app.js".to_string()];
        assert!(!e.matches("src/app.js", "app.js", Some(&no_ts)));
    }

    #[test]
    fn test_sibling_clause_inert_without_sibling_list() {
        // Explicitly targeted files bypass sibling-conditional excludes.
        let e = expr(json!({ "**/*.js": { "when": "$(basename).ts" } }));
        assert!(!e.matches("src/app.js", "app.js", None));
    }

    #[test]
    fn test_conservative_counts_sibling_clause_as_match() {
        let e = expr(json!({ "**/*.js": { "when": "$(basename).ts" } }));
        assert!(e.matches_conservative("src/app.js", "app.js"));
        assert!(!e.matches_conservative("src/app.rs", "app.rs"));
    }

    #[test]
    fn test_pattern_order_first_match_decides() {
        let e = expr(json!({ "**/*.min.js": false, "**/*.js": true }));
        assert!(!e.matches("dist/app.min.js", "app.min.js", None));
        assert!(e.matches("dist/app.js", "app.js", None));
    }

    #[test]
    fn test_empty_expression_matches_nothing() {
        let e = expr(Value::Null);
        assert!(e.is_empty());
        assert!(!e.matches("anything", "anything", None));
    }

    #[test]
    fn test_literal_dots_escaped() {
        let e = expr(json!("a.b"));
        assert!(e.matches("a.b", "a.b", None));
        assert!(!e.matches("axb", "axb", None));
    }

    #[test]
    fn test_character_class() {
        let e = expr(json!("file[0-9].txt"));
        assert!(e.matches("file3.txt", "file3.txt", None));
        assert!(!e.matches("filex.txt", "filex.txt", None));
    }
}
