//! Compiled template code.
//!
//! This is what the bytecode cache stores: a flat set of instruction lists,
//! one for the template body and one per block, ready to be executed
//! by the runtime.
use serde::{Deserialize, Serialize};

use super::super::language::Expression;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Bumped whenever the instruction set changes, so stale bytecode
/// stored by an older build is never executed.
pub const BYTECODE_VERSION: u32 = 1;

/// How an `include` target is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Lookup {
    // A single literal name.
    Single,
    // A literal list or tuple of candidates, first one found wins.
    Select,
    // Known only at runtime; a list selects, anything else is a single name.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Text(String),

    Print(Expression),

    // Runs only while no parent template has been resolved.
    Guarded(Vec<Instruction>),

    // Dispatch to the innermost override of the block.
    CallBlock {
        name: String,
        scoped: bool,
        required: bool,
    },

    // Resolve the parent and append its blocks to the override chains.
    // A guarded extends fails if a parent was already resolved.
    Extends {
        template: Expression,
        guarded: bool,
    },

    // Hand the rest of the render over to the parent template.
    RenderParent,

    Include {
        template: Expression,
        lookup: Lookup,
        ignore_missing: bool,
        with_context: bool,
    },

    Import {
        template: Expression,
        target: String,
        with_context: bool,
        export: bool,
    },

    FromImport {
        template: Expression,
        names: Vec<(String, Option<String>)>,
        with_context: bool,
        export: bool,
    },

    If {
        condition: Expression,
        body: Vec<Instruction>,
        otherwise: Vec<Instruction>,
    },

    For {
        target: String,
        iter: Expression,
        body: Vec<Instruction>,
    },

    Set {
        name: String,
        value: Expression,
        export: bool,
    },

    DefineMacro {
        code: Arc<MacroCode>,
        export: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroCode {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Instruction>,
}

/// Executable form of one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub name: String,
    pub filename: Option<String>,
    pub root: Vec<Instruction>,
    pub blocks: BTreeMap<String, Vec<Instruction>>,
}

impl Code {
    /// Names of all blocks the template defines.
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(|name| name.as_str())
    }
}
