//
// engine/scope.rs
//
// Identifier-level analysis: completions, declaration lookup, quick
// info, signature help, references, occurrences and rename locations.
//

use tree_sitter::Node;

use super::{
    is_identifier_kind, span_of, CompletionEntry, DocumentSpan, EngineSession, EntryDetails,
    QuickInfo, ScriptElementKind, SignatureInfo, TextSpan,
};

/// Keywords offered as low-priority completion entries.
const KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "null", "of", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "async", "await",
];

fn is_scope_kind(kind: &str) -> bool {
    matches!(
        kind,
        "program"
            | "statement_block"
            | "function_declaration"
            | "function_expression"
            | "arrow_function"
            | "generator_function_declaration"
            | "method_definition"
            | "class_body"
            | "for_statement"
            | "for_in_statement"
    )
}

impl EngineSession {
    /// Completion entries visible at `offset`: lexical declarations from
    /// enclosing scopes, then globals, then keywords. Deduplicated by
    /// name, innermost declaration first.
    pub fn completions_at(&self, offset: usize) -> Vec<CompletionEntry> {
        let mut entries: Vec<CompletionEntry> = self
            .scope_declarations_at(offset)
            .into_iter()
            .map(|decl| CompletionEntry {
                name: decl.name,
                kind: decl.kind,
            })
            .collect();

        entries.extend(self.engine().global_entries(&self.settings));
        entries.extend(KEYWORDS.iter().map(|kw| CompletionEntry {
            name: (*kw).to_string(),
            kind: ScriptElementKind::Keyword,
        }));

        let mut seen = std::collections::HashSet::new();
        entries.retain(|e| seen.insert(e.name.clone()));
        entries
    }

    /// Detail/documentation for a completion entry, resolved lazily.
    pub fn completion_detail(&self, name: &str, offset: usize) -> Option<EntryDetails> {
        if let Some(decl) = self.find_declaration(name, offset) {
            return Some(self.declaration_details(decl));
        }
        self.engine()
            .global_documentation(name, &self.settings)
            .map(|doc| EntryDetails {
                display: name.to_string(),
                documentation: Some(doc.to_string()),
            })
    }

    /// Hover information for the identifier at `offset`.
    pub fn quick_info(&self, offset: usize) -> Option<QuickInfo> {
        let ident = self.identifier_at(offset)?;
        let name = self.node_text(ident).to_string();

        if let Some(decl) = self.find_declaration(&name, offset) {
            let details = self.declaration_details(decl);
            return Some(QuickInfo {
                span: span_of(ident),
                display: details.display,
                documentation: details.documentation,
            });
        }

        self.engine()
            .global_documentation(&name, &self.settings)
            .map(|doc| QuickInfo {
                span: span_of(ident),
                display: format!("{name}: global"),
                documentation: Some(doc.to_string()),
            })
    }

    /// Signature help for the innermost call enclosing `offset`.
    pub fn signature_help_at(&self, offset: usize) -> Option<SignatureInfo> {
        let mut node = self.node_at(offset)?;
        let call = loop {
            if node.kind() == "call_expression" {
                if let Some(args) = node.child_by_field_name("arguments") {
                    if span_of(args).contains(offset) {
                        break node;
                    }
                }
            }
            node = node.parent()?;
        };

        let callee = call.child_by_field_name("function")?;
        let callee_name = match callee.kind() {
            "identifier" => self.node_text(callee).to_string(),
            "member_expression" => {
                let property = callee.child_by_field_name("property")?;
                self.node_text(property).to_string()
            }
            _ => return None,
        };

        let decl_name = self.find_declaration(&callee_name, offset)?;
        let func = function_of_declaration(decl_name)?;
        let parameters = self.parameter_names(func);

        let args = call.child_by_field_name("arguments")?;
        let mut active_parameter = 0;
        for i in 0..args.child_count() {
            if let Some(child) = args.child(i) {
                if child.kind() == "," && child.start_byte() < offset {
                    active_parameter += 1;
                }
            }
        }

        Some(SignatureInfo {
            label: format!("{}({})", callee_name, parameters.join(", ")),
            parameters,
            documentation: leading_comment(self, enclosing_statement(func)),
            active_parameter,
            applicable_span: span_of(args),
        })
    }

    /// Span of the declaration of the identifier at `offset`.
    pub fn definition_at(&self, offset: usize) -> Option<TextSpan> {
        let ident = self.identifier_at(offset)?;
        let name = self.node_text(ident).to_string();
        self.find_declaration(&name, offset).map(span_of)
    }

    /// All references to the identifier at `offset` within this document.
    pub fn references_at(&self, offset: usize) -> Vec<DocumentSpan> {
        let Some(ident) = self.identifier_at(offset) else {
            return Vec::new();
        };
        let name = self.node_text(ident).to_string();
        self.identifier_occurrences(&name, offset)
    }

    /// Occurrences for document highlighting. Same shape as references;
    /// write accesses are flagged for stronger highlighting.
    pub fn occurrences_at(&self, offset: usize) -> Vec<DocumentSpan> {
        self.references_at(offset)
    }

    /// Rename locations for the identifier at `offset`, or None when the
    /// position does not name a renameable identifier.
    pub fn rename_locations(&self, offset: usize) -> Option<Vec<DocumentSpan>> {
        let ident = self.identifier_at(offset)?;
        if ident.kind() != "identifier" {
            return None;
        }
        let name = self.node_text(ident).to_string();
        Some(self.identifier_occurrences(&name, offset))
    }

    // ------------------------------------------------------------------
    // Scope walking
    // ------------------------------------------------------------------

    /// Declarations visible at `offset`, innermost scope first.
    pub(crate) fn scope_declarations_at(&self, offset: usize) -> Vec<Declaration> {
        let Some(root) = self.root() else {
            return Vec::new();
        };

        let mut node = root
            .descendant_for_byte_range(offset.min(self.text.len()), offset.min(self.text.len()))
            .unwrap_or(root);
        let mut declarations = Vec::new();

        loop {
            if is_scope_kind(node.kind()) {
                self.collect_scope_declarations(node, &mut declarations);
            }
            match node.parent() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        declarations
    }

    fn collect_scope_declarations(&self, scope: Node, out: &mut Vec<Declaration>) {
        // Parameters of function-like scopes
        if let Some(params) = scope
            .child_by_field_name("parameters")
            .or_else(|| scope.child_by_field_name("parameter"))
        {
            self.collect_parameters(params, out);
        }

        for i in 0..scope.child_count() {
            let Some(child) = scope.child(i) else {
                continue;
            };
            match child.kind() {
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        out.push(Declaration {
                            name: self.node_text(name).to_string(),
                            kind: ScriptElementKind::Function,
                            name_node_id: name.id(),
                            name_span: span_of(name),
                        });
                    }
                }
                "class_declaration" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        out.push(Declaration {
                            name: self.node_text(name).to_string(),
                            kind: ScriptElementKind::Class,
                            name_node_id: name.id(),
                            name_span: span_of(name),
                        });
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    let constant = self.node_text(child).starts_with("const");
                    self.collect_declarators(child, constant, out);
                }
                "method_definition" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        out.push(Declaration {
                            name: self.node_text(name).to_string(),
                            kind: ScriptElementKind::Method,
                            name_node_id: name.id(),
                            name_span: span_of(name),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_declarators(&self, declaration: Node, constant: bool, out: &mut Vec<Declaration>) {
        for i in 0..declaration.child_count() {
            let Some(declarator) = declaration.child(i) else {
                continue;
            };
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            if let Some(name) = declarator.child_by_field_name("name") {
                if name.kind() == "identifier" {
                    let kind = if value_is_function(declarator) {
                        ScriptElementKind::Function
                    } else if constant {
                        ScriptElementKind::Constant
                    } else {
                        ScriptElementKind::Variable
                    };
                    out.push(Declaration {
                        name: self.node_text(name).to_string(),
                        kind,
                        name_node_id: name.id(),
                        name_span: span_of(name),
                    });
                }
            }
        }
    }

    fn collect_parameters(&self, params: Node, out: &mut Vec<Declaration>) {
        if params.kind() == "identifier" {
            // Single-parameter arrow function without parentheses
            out.push(Declaration {
                name: self.node_text(params).to_string(),
                kind: ScriptElementKind::Parameter,
                name_node_id: params.id(),
                name_span: span_of(params),
            });
            return;
        }
        let mut stack = vec![params];
        while let Some(node) = stack.pop() {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else {
                    continue;
                };
                if child.kind() == "identifier" {
                    out.push(Declaration {
                        name: self.node_text(child).to_string(),
                        kind: ScriptElementKind::Parameter,
                        name_node_id: child.id(),
                        name_span: span_of(child),
                    });
                } else if child.child_count() > 0 {
                    stack.push(child);
                }
            }
        }
    }

    /// The name node of the innermost declaration of `name` visible at
    /// `offset`.
    pub(crate) fn find_declaration(&self, name: &str, offset: usize) -> Option<Node<'_>> {
        let decl = self
            .scope_declarations_at(offset)
            .into_iter()
            .find(|d| d.name == name)?;
        // Recover the node from its span; ids are not stable lookups.
        let root = self.root()?;
        root.descendant_for_byte_range(decl.name_span.start, decl.name_span.end())
    }

    /// Display string and documentation for a declaration name node.
    pub(crate) fn declaration_details(&self, name_node: Node) -> EntryDetails {
        let statement = enclosing_statement(name_node);
        let display = self
            .node_text(statement)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('{')
            .trim()
            .to_string();
        EntryDetails {
            display,
            documentation: leading_comment(self, statement),
        }
    }

    /// Occurrences of `name` that resolve to the same declaration as the
    /// identifier at `offset`. When the name has no lexical declaration
    /// (globals, undeclared identifiers) every same-name identifier in
    /// the document counts.
    fn identifier_occurrences(&self, name: &str, offset: usize) -> Vec<DocumentSpan> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let declaration = self.find_declaration(name, offset).map(span_of);
        let search_root = declaration
            .and_then(|span| self.declaration_scope(span))
            .unwrap_or(root);

        let mut out = Vec::new();
        let mut stack = vec![search_root];
        while let Some(node) = stack.pop() {
            if is_identifier_kind(node.kind()) && self.node_text(node) == name {
                let resolves_here = match declaration {
                    // An inner redeclaration shadows ours; skip it and
                    // everything that binds to it.
                    Some(decl_span) => self
                        .find_declaration(name, node.start_byte())
                        .map(|d| span_of(d) == decl_span)
                        .unwrap_or(false),
                    None => true,
                };
                if resolves_here {
                    out.push(DocumentSpan {
                        span: span_of(node),
                        is_write: is_write_position(node),
                    });
                }
            }
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
        }
        out.sort_by_key(|occ| occ.span.start);
        out
    }

    /// The innermost scope node a declaration belongs to.
    fn declaration_scope(&self, decl_span: TextSpan) -> Option<Node<'_>> {
        let root = self.root()?;
        let mut node = root.descendant_for_byte_range(decl_span.start, decl_span.end())?;
        loop {
            if is_scope_kind(node.kind()) {
                return Some(node);
            }
            node = node.parent()?;
        }
    }

    fn parameter_names(&self, func: Node) -> Vec<String> {
        let mut declarations = Vec::new();
        if let Some(params) = func
            .child_by_field_name("parameters")
            .or_else(|| func.child_by_field_name("parameter"))
        {
            self.collect_parameters(params, &mut declarations);
        }
        declarations.into_iter().map(|d| d.name).collect()
    }
}

/// A named declaration discovered during scope walking.
pub(crate) struct Declaration {
    pub name: String,
    pub kind: ScriptElementKind,
    #[allow(dead_code)]
    pub name_node_id: usize,
    pub name_span: TextSpan,
}

/// Whether a declarator's value is function-like.
fn value_is_function(declarator: Node) -> bool {
    declarator
        .child_by_field_name("value")
        .map(|value| matches!(value.kind(), "arrow_function" | "function_expression"))
        .unwrap_or(false)
}

/// The function-like node a declaration name belongs to, if any.
fn function_of_declaration(name_node: Node) -> Option<Node<'_>> {
    let parent = name_node.parent()?;
    match parent.kind() {
        "function_declaration" | "generator_function_declaration" | "method_definition" => {
            Some(parent)
        }
        "variable_declarator" => {
            let value = parent.child_by_field_name("value")?;
            matches!(value.kind(), "arrow_function" | "function_expression").then_some(value)
        }
        _ => None,
    }
}

/// The statement-level node enclosing a declaration name, used for
/// display text and leading-comment lookup.
fn enclosing_statement(name_node: Node) -> Node<'_> {
    let mut node = name_node;
    while let Some(parent) = node.parent() {
        match parent.kind() {
            "program" | "statement_block" | "class_body" => return node,
            _ => node = parent,
        }
    }
    node
}

/// Comment text immediately preceding a statement, cleaned of comment
/// markers.
fn leading_comment(session: &EngineSession, statement: Node) -> Option<String> {
    let mut prev = statement.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }

    let mut lines = Vec::new();
    loop {
        lines.push(clean_comment(session.node_text(prev)));
        match prev.prev_sibling() {
            Some(node) if node.kind() == "comment" => prev = node,
            _ => break,
        }
    }
    lines.reverse();
    let text = lines.join("\n").trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn clean_comment(text: &str) -> String {
    if let Some(stripped) = text.strip_prefix("//") {
        return stripped.trim().to_string();
    }
    text.trim_start_matches("/*")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_write_position(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "variable_declarator" => parent
            .child_by_field_name("name")
            .map(|n| n.id() == node.id())
            .unwrap_or(false),
        "assignment_expression" | "augmented_assignment_expression" => parent
            .child_by_field_name("left")
            .map(|n| n.id() == node.id())
            .unwrap_or(false),
        "function_declaration" | "generator_function_declaration" | "class_declaration" => parent
            .child_by_field_name("name")
            .map(|n| n.id() == node.id())
            .unwrap_or(false),
        _ => false,
    }
}
