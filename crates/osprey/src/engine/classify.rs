//
// engine/classify.rs
//
// Semantic classification walk: assigns a token kind to declaration
// names, parameters and property accesses. The facade encodes the
// result into the editor's semantic-token wire format.
//

use super::{span_of, EngineSession, TextSpan};

/// Semantic token kinds, in legend order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Class,
    Function,
    Method,
    Parameter,
    Variable,
    Property,
}

impl TokenKind {
    /// Index into the semantic token legend.
    pub fn legend_index(self) -> u32 {
        match self {
            TokenKind::Class => 0,
            TokenKind::Function => 1,
            TokenKind::Method => 2,
            TokenKind::Parameter => 3,
            TokenKind::Variable => 4,
            TokenKind::Property => 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub span: TextSpan,
    pub kind: TokenKind,
}

impl EngineSession {
    /// Classified tokens for the whole document, ordered by offset.
    pub fn classifications(&self) -> Vec<Classification> {
        let Some(root) = self.root() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        out.push(Classification {
                            span: span_of(name),
                            kind: TokenKind::Function,
                        });
                    }
                }
                "method_definition" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        out.push(Classification {
                            span: span_of(name),
                            kind: TokenKind::Method,
                        });
                    }
                }
                "class_declaration" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        out.push(Classification {
                            span: span_of(name),
                            kind: TokenKind::Class,
                        });
                    }
                }
                "variable_declarator" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        if name.kind() == "identifier" {
                            let kind = if node
                                .child_by_field_name("value")
                                .map(|v| {
                                    matches!(v.kind(), "arrow_function" | "function_expression")
                                })
                                .unwrap_or(false)
                            {
                                TokenKind::Function
                            } else {
                                TokenKind::Variable
                            };
                            out.push(Classification {
                                span: span_of(name),
                                kind,
                            });
                        }
                    }
                }
                "formal_parameters" => {
                    for i in 0..node.child_count() {
                        if let Some(param) = node.child(i) {
                            if param.kind() == "identifier" {
                                out.push(Classification {
                                    span: span_of(param),
                                    kind: TokenKind::Parameter,
                                });
                            }
                        }
                    }
                }
                "member_expression" => {
                    if let Some(property) = node.child_by_field_name("property") {
                        if property.kind() == "property_identifier" {
                            out.push(Classification {
                                span: span_of(property),
                                kind: TokenKind::Property,
                            });
                        }
                    }
                }
                _ => {}
            }
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
        }

        out.sort_by_key(|c| c.span.start);
        out
    }
}
