use super::Expression;

/// A node of the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // Text printed as-is.
    Text(String),

    // `{{ expression }}`
    Print(Expression),

    // `{% block name [scoped] [required] %}...{% endblock %}`
    Block {
        name: String,
        scoped: bool,
        required: bool,
        body: Vec<Node>,
        line: usize,
    },

    // `{% extends "base.html" %}`
    Extends {
        template: Expression,
        line: usize,
    },

    // `{% include "nav.html" [ignore missing] [with context|without context] %}`
    Include {
        template: Expression,
        ignore_missing: bool,
        with_context: bool,
    },

    // `{% import "forms.html" as forms %}`
    Import {
        template: Expression,
        target: String,
        with_context: bool,
    },

    // `{% from "forms.html" import input as field, label %}`
    FromImport {
        template: Expression,
        names: Vec<(String, Option<String>)>,
        with_context: bool,
    },

    If {
        condition: Expression,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },

    For {
        target: String,
        iter: Expression,
        body: Vec<Node>,
    },

    Set {
        name: String,
        value: Expression,
    },

    Macro {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },
}

impl Node {
    /// Any node in the tree is an `extends`.
    pub fn find_extends(nodes: &[Node]) -> bool {
        nodes.iter().any(|node| match node {
            Node::Extends { .. } => true,
            Node::Block { body, .. } | Node::For { body, .. } | Node::Macro { body, .. } => {
                Self::find_extends(body)
            }
            Node::If {
                body, otherwise, ..
            } => Self::find_extends(body) || Self::find_extends(otherwise),
            _ => false,
        })
    }

    /// Text made of whitespace only.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(text) if text.trim().is_empty())
    }
}
