//
// engine/navigate.rs
//
// Structural navigation: the hierarchical navigation tree used for
// document symbols, and the outline spans used for folding.
//

use tree_sitter::Node;

use super::{span_of, EngineSession, NavigationItem, ScriptElementKind, TextSpan};

impl EngineSession {
    /// Hierarchical navigation tree. The root is a whole-document
    /// `script` pseudo-item; consumers typically skip it.
    pub fn navigation_tree(&self) -> NavigationItem {
        let children = match self.root() {
            Some(root) => self.collect_items(root),
            None => Vec::new(),
        };
        NavigationItem {
            name: "<script>".to_string(),
            kind: ScriptElementKind::Script,
            span: TextSpan::new(0, self.text.len()),
            children,
        }
    }

    fn collect_items(&self, node: Node) -> Vec<NavigationItem> {
        let mut items = Vec::new();
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else {
                continue;
            };
            match child.kind() {
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(item) = self.function_item(child, ScriptElementKind::Function) {
                        items.push(item);
                    }
                }
                "method_definition" => {
                    if let Some(item) = self.function_item(child, ScriptElementKind::Method) {
                        items.push(item);
                    }
                }
                "class_declaration" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let children = child
                            .child_by_field_name("body")
                            .map(|body| self.collect_items(body))
                            .unwrap_or_default();
                        items.push(NavigationItem {
                            name: self.node_text(name).to_string(),
                            kind: ScriptElementKind::Class,
                            span: span_of(child),
                            children,
                        });
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    let constant = self.node_text(child).starts_with("const");
                    items.extend(self.declarator_items(child, constant));
                }
                _ => {
                    // Statements (if/for/try/export...) may nest declarations.
                    items.extend(self.collect_items(child));
                }
            }
        }
        items
    }

    fn function_item(&self, node: Node, kind: ScriptElementKind) -> Option<NavigationItem> {
        let name = node.child_by_field_name("name")?;
        let children = node
            .child_by_field_name("body")
            .map(|body| self.collect_items(body))
            .unwrap_or_default();
        Some(NavigationItem {
            name: self.node_text(name).to_string(),
            kind,
            span: span_of(node),
            children,
        })
    }

    fn declarator_items(&self, declaration: Node, constant: bool) -> Vec<NavigationItem> {
        let mut items = Vec::new();
        for i in 0..declaration.child_count() {
            let Some(declarator) = declaration.child(i) else {
                continue;
            };
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name) = declarator.child_by_field_name("name") else {
                continue;
            };
            if name.kind() != "identifier" {
                continue;
            }

            let value = declarator.child_by_field_name("value");
            let function_value = value
                .map(|v| matches!(v.kind(), "arrow_function" | "function_expression"))
                .unwrap_or(false);

            if function_value {
                let children = value
                    .and_then(|v| v.child_by_field_name("body"))
                    .map(|body| self.collect_items(body))
                    .unwrap_or_default();
                items.push(NavigationItem {
                    name: self.node_text(name).to_string(),
                    kind: ScriptElementKind::Function,
                    span: span_of(declarator),
                    children,
                });
            } else {
                items.push(NavigationItem {
                    name: self.node_text(name).to_string(),
                    kind: if constant {
                        ScriptElementKind::Constant
                    } else {
                        ScriptElementKind::Variable
                    },
                    span: span_of(declarator),
                    children: Vec::new(),
                });
            }
        }
        items
    }

    /// Foldable spans: brace-delimited bodies, multi-line and grouped
    /// comments, and `//#region` ... `//#endregion` directive pairs.
    /// Spans are raw; the facade classifies and line-filters them.
    pub fn outline_spans(&self) -> Vec<TextSpan> {
        let Some(root) = self.root() else {
            return Vec::new();
        };

        let mut spans = Vec::new();
        let mut comments = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "statement_block" | "class_body" | "object" | "array" | "switch_body"
                | "formal_parameters" | "arguments" => {
                    spans.push(span_of(node));
                }
                "comment" => comments.push(node),
                _ => {}
            }
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
        }
        comments.sort_by_key(|c| c.start_byte());

        spans.extend(self.comment_spans(&comments));
        spans.extend(self.region_spans(&comments));
        spans.sort_by_key(|s| (s.start, usize::MAX - s.length));
        spans.dedup();
        spans
    }

    /// Multi-line block comments, plus runs of consecutive line comments
    /// coalesced into one span. Region directives are left out; they fold
    /// as regions, not comments.
    fn comment_spans(&self, comments: &[Node]) -> Vec<TextSpan> {
        let mut spans = Vec::new();
        let mut run: Option<(TextSpan, usize)> = None; // (span so far, last line)

        for comment in comments {
            let text = self.node_text(*comment);
            if text.starts_with("/*") {
                if comment.start_position().row < comment.end_position().row {
                    spans.push(span_of(*comment));
                }
                continue;
            }
            if is_region_directive(text) {
                continue;
            }

            let line = comment.start_position().row;
            match run.take() {
                Some((span, last_line)) if line == last_line + 1 => {
                    run = Some((
                        TextSpan::from_bounds(span.start, comment.end_byte()),
                        line,
                    ));
                }
                Some((span, _)) => {
                    spans.push(span);
                    run = Some((span_of(*comment), line));
                }
                None => run = Some((span_of(*comment), line)),
            }
        }
        if let Some((span, _)) = run {
            spans.push(span);
        }

        // A run of one line comment is not foldable.
        spans.retain(|span| span_lines(self, *span) > 0);
        spans
    }

    fn region_spans(&self, comments: &[Node]) -> Vec<TextSpan> {
        let mut spans = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        for comment in comments {
            let text = self.node_text(*comment);
            if region_start(text) {
                open.push(comment.start_byte());
            } else if region_end(text) {
                if let Some(start) = open.pop() {
                    spans.push(TextSpan::from_bounds(start, comment.end_byte()));
                }
            }
        }
        spans
    }
}

fn span_lines(session: &EngineSession, span: TextSpan) -> usize {
    session.text[span.start..span.end()]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
}

fn is_region_directive(text: &str) -> bool {
    region_start(text) || region_end(text)
}

pub(crate) fn region_start(text: &str) -> bool {
    text.strip_prefix("//")
        .map(|rest| rest.trim_start().starts_with("#region"))
        .unwrap_or(false)
}

pub(crate) fn region_end(text: &str) -> bool {
    text.strip_prefix("//")
        .map(|rest| rest.trim_start().starts_with("#endregion"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_session;
    use super::*;

    #[tokio::test]
    async fn test_navigation_tree_shape() {
        let text = "function outer() {\n  function inner() {}\n}\nclass Widget {\n  render() {}\n}\nvar count = 0;\n";
        let session = test_session(text).await;
        let tree = session.navigation_tree();

        assert_eq!(tree.kind, ScriptElementKind::Script);
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "Widget", "count"]);

        assert_eq!(tree.children[0].children[0].name, "inner");
        assert_eq!(tree.children[1].children[0].name, "render");
        assert_eq!(tree.children[1].children[0].kind, ScriptElementKind::Method);
    }

    #[tokio::test]
    async fn test_same_name_functions_distinct_spans() {
        let text = "function foo() {}\nfunction foo() {}\n";
        let session = test_session(text).await;
        let tree = session.navigation_tree();
        assert_eq!(tree.children.len(), 2);
        assert_ne!(tree.children[0].span.start, tree.children[1].span.start);
    }

    #[tokio::test]
    async fn test_outline_spans_blocks_and_comments() {
        let text = "function f() {\n  return 1;\n}\n// one\n// two\n// three\nvar x = 1;\n";
        let session = test_session(text).await;
        let spans = session.outline_spans();

        let texts: Vec<&str> = spans
            .iter()
            .map(|s| &session.text[s.start..s.end()])
            .collect();
        assert!(texts.iter().any(|t| t.starts_with('{')));
        assert!(texts.iter().any(|t| t.starts_with("// one")));
    }

    #[tokio::test]
    async fn test_region_directive_pairing() {
        let text = "//#region setup\nvar a = 1;\nvar b = 2;\n//#endregion\n";
        let session = test_session(text).await;
        let spans = session.outline_spans();
        let region = spans
            .iter()
            .find(|s| session.text[s.start..].starts_with("//#region"))
            .unwrap();
        assert!(session.text[region.start..region.end()].ends_with("#endregion"));
    }
}
