//! Lowers the parsed template tree into executable [`Code`].
//!
//! The generator decides, at compile time, which output of a child
//! template can never be seen (everything after a top-level `extends`)
//! and which output has to be guarded at runtime because an `extends`
//! might or might not have happened yet.
pub mod code;

pub use code::{Code, Instruction, Lookup, MacroCode, BYTECODE_VERSION};

use super::language::{Expression, Node};
use super::{Error, Value};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Where in the template the generator currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    // Outside of any block, macro or loop. `if` doesn't change it.
    pub toplevel: bool,
    // Directly in the template body, not even inside an `if`.
    pub rootlevel: bool,
    // Output has to check if a parent template took over.
    pub require_output_check: bool,
}

impl Frame {
    fn root(require_output_check: bool) -> Self {
        Self {
            toplevel: true,
            rootlevel: true,
            require_output_check,
        }
    }

    // Inside an `if`: still top level, but an `extends` here
    // may not run, so it isn't known statically.
    fn soft(&self) -> Self {
        Self {
            rootlevel: false,
            ..*self
        }
    }

    // Inside a loop.
    fn inner(&self) -> Self {
        Self {
            toplevel: false,
            rootlevel: false,
            require_output_check: self.require_output_check,
        }
    }

    // Block and macro bodies.
    fn function() -> Self {
        Self {
            toplevel: false,
            rootlevel: false,
            require_output_check: false,
        }
    }
}

pub struct CodeGenerator {
    name: String,
    filename: Option<String>,
    blocks: BTreeMap<String, Vec<Instruction>>,
    // Number of `extends` seen so far.
    extends_so_far: usize,
    // An `extends` at root level was seen, so the parent certainly renders.
    has_known_extends: bool,
}

impl CodeGenerator {
    pub fn new(name: &str, filename: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            filename: filename.map(|f| f.to_string()),
            blocks: BTreeMap::new(),
            extends_so_far: 0,
            has_known_extends: false,
        }
    }

    /// Compile the template tree.
    pub fn generate(mut self, nodes: &[Node]) -> Result<Code, Error> {
        let have_extends = Node::find_extends(nodes);
        let frame = Frame::root(have_extends);

        let mut root = vec![];
        for node in nodes {
            self.visit(node, frame, &mut root)?;
        }

        if have_extends {
            root.push(Instruction::RenderParent);
        }

        Ok(Code {
            name: self.name,
            filename: self.filename,
            root,
            blocks: self.blocks,
        })
    }

    fn visit_all(&mut self, nodes: &[Node], frame: Frame) -> Result<Vec<Instruction>, Error> {
        let mut out = vec![];
        for node in nodes {
            self.visit(node, frame, &mut out)?;
        }
        Ok(out)
    }

    fn visit(&mut self, node: &Node, frame: Frame, out: &mut Vec<Instruction>) -> Result<(), Error> {
        match node {
            Node::Text(text) => {
                self.output(Instruction::Text(text.clone()), frame, out);
            }

            Node::Print(expression) => {
                self.output(Instruction::Print(expression.clone()), frame, out);
            }

            Node::Block {
                name,
                scoped,
                required,
                body,
                line,
            } => {
                if self.blocks.contains_key(name) {
                    return Err(Error::Compile {
                        message: format!("block '{}' defined twice", name),
                        line: *line,
                    });
                }

                // Reserve the name so a nested block with the same name is caught.
                self.blocks.insert(name.clone(), vec![]);
                let compiled = self.visit_all(body, Frame::function())?;
                self.blocks.insert(name.clone(), compiled);

                let call = Instruction::CallBlock {
                    name: name.clone(),
                    scoped: *scoped,
                    required: *required,
                };

                if frame.toplevel {
                    if self.has_known_extends {
                        return Ok(());
                    }
                    if self.extends_so_far > 0 {
                        out.push(Instruction::Guarded(vec![call]));
                        return Ok(());
                    }
                }

                out.push(call);
            }

            Node::Extends { template, line } => {
                if !frame.toplevel {
                    return Err(Error::Compile {
                        message: "cannot use extend from a non top-level scope".into(),
                        line: *line,
                    });
                }

                // A second extends where the first one is known to run can't be right.
                if self.extends_so_far > 0 && self.has_known_extends {
                    return Err(Error::Compile {
                        message: "extended multiple times".into(),
                        line: *line,
                    });
                }

                out.push(Instruction::Extends {
                    template: template.clone(),
                    guarded: self.extends_so_far > 0,
                });

                if frame.rootlevel {
                    self.has_known_extends = true;
                }

                self.extends_so_far += 1;
            }

            Node::Include {
                template,
                ignore_missing,
                with_context,
            } => {
                let include = Instruction::Include {
                    template: template.clone(),
                    lookup: Self::lookup(template),
                    ignore_missing: *ignore_missing,
                    with_context: *with_context,
                };

                self.output(include, frame, out);
            }

            Node::Import {
                template,
                target,
                with_context,
            } => out.push(Instruction::Import {
                template: template.clone(),
                target: target.clone(),
                with_context: *with_context,
                export: frame.toplevel,
            }),

            Node::FromImport {
                template,
                names,
                with_context,
            } => out.push(Instruction::FromImport {
                template: template.clone(),
                names: names.clone(),
                with_context: *with_context,
                export: frame.toplevel,
            }),

            Node::If {
                condition,
                body,
                otherwise,
            } => {
                let frame = frame.soft();
                let body = self.visit_all(body, frame)?;
                let otherwise = self.visit_all(otherwise, frame)?;

                out.push(Instruction::If {
                    condition: condition.clone(),
                    body,
                    otherwise,
                });
            }

            Node::For { target, iter, body } => {
                let body = self.visit_all(body, frame.inner())?;

                out.push(Instruction::For {
                    target: target.clone(),
                    iter: iter.clone(),
                    body,
                });
            }

            Node::Set { name, value } => out.push(Instruction::Set {
                name: name.clone(),
                value: value.clone(),
                export: frame.toplevel,
            }),

            Node::Macro { name, params, body } => {
                let body = self.visit_all(body, Frame::function())?;

                out.push(Instruction::DefineMacro {
                    code: Arc::new(MacroCode {
                        name: name.clone(),
                        params: params.clone(),
                        body,
                    }),
                    export: frame.toplevel,
                });
            }
        }

        Ok(())
    }

    // Output in a template that extends another is only visible
    // until the parent takes over.
    fn output(&self, instruction: Instruction, frame: Frame, out: &mut Vec<Instruction>) {
        if frame.require_output_check {
            if !self.has_known_extends {
                out.push(Instruction::Guarded(vec![instruction]));
            }
        } else {
            out.push(instruction);
        }
    }

    fn lookup(template: &Expression) -> Lookup {
        match template {
            Expression::Constant(Value::String(_)) => Lookup::Single,
            Expression::Constant(Value::List(_)) | Expression::List(_) | Expression::Tuple(_) => {
                Lookup::Select
            }
            _ => Lookup::Dynamic,
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::language::Parser;
    use super::*;

    fn compile(source: &str) -> Result<Code, Error> {
        CodeGenerator::new("test.html", None).generate(&Parser::from_str(source)?)
    }

    #[test]
    fn test_blocks_are_collected() -> Result<(), Error> {
        let code = compile("{% block a %}A{% block b %}B{% endblock %}{% endblock %}")?;

        assert_eq!(code.block_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(
            code.root,
            vec![Instruction::CallBlock {
                name: "a".into(),
                scoped: false,
                required: false,
            }]
        );
        assert_eq!(code.blocks["b"], vec![Instruction::Text("B".into())]);

        Ok(())
    }

    #[test]
    fn test_known_extends_drops_output() -> Result<(), Error> {
        let code = compile(
            r#"{% extends "base.html" %}ignored{% block title %}Child{% endblock %}"#,
        )?;

        assert_eq!(code.root.len(), 2);
        assert!(matches!(
            code.root[0],
            Instruction::Extends { guarded: false, .. }
        ));
        assert_eq!(code.root[1], Instruction::RenderParent);
        assert_eq!(code.blocks["title"], vec![Instruction::Text("Child".into())]);

        Ok(())
    }

    #[test]
    fn test_conditional_extends_guards_output() -> Result<(), Error> {
        let code = compile(r#"{% if layout %}{% extends layout %}{% endif %}text"#)?;

        assert!(matches!(code.root[0], Instruction::If { .. }));
        assert_eq!(
            code.root[1],
            Instruction::Guarded(vec![Instruction::Text("text".into())])
        );
        assert_eq!(code.root[2], Instruction::RenderParent);

        Ok(())
    }

    #[test]
    fn test_second_extends() -> Result<(), Error> {
        let err = compile(r#"{% extends "a.html" %}{% extends "b.html" %}"#).unwrap_err();
        assert!(err.to_string().contains("extended multiple times"));

        let code = compile(
            r#"{% if a %}{% extends "a.html" %}{% endif %}{% extends "b.html" %}"#,
        )?;
        assert!(matches!(
            code.root[1],
            Instruction::Extends { guarded: true, .. }
        ));

        Ok(())
    }

    #[test]
    fn test_extends_not_top_level() {
        let err = compile(r#"{% block a %}{% extends "base.html" %}{% endblock %}"#).unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot use extend from a non top-level scope"));

        let err = compile(r#"{% for x in y %}{% extends "base.html" %}{% endfor %}"#).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn test_duplicate_block() {
        assert!(matches!(
            compile("{% block a %}{% endblock %}{% block a %}{% endblock %}"),
            Err(Error::Compile { .. })
        ));
    }

    #[test]
    fn test_include_lookup() -> Result<(), Error> {
        let code = compile(
            r#"{% include "a.html" %}{% include ["a.html", "b.html"] %}{% include name %}"#,
        )?;

        let lookups = code
            .root
            .iter()
            .map(|i| match i {
                Instruction::Include { lookup, .. } => *lookup,
                _ => panic!("expected include"),
            })
            .collect::<Vec<_>>();

        assert_eq!(lookups, vec![Lookup::Single, Lookup::Select, Lookup::Dynamic]);

        Ok(())
    }

    #[test]
    fn test_exports_only_at_top_level() -> Result<(), Error> {
        let code = compile("{% set a = 1 %}{% for x in y %}{% set b = 2 %}{% endfor %}")?;

        assert!(matches!(code.root[0], Instruction::Set { export: true, .. }));
        match &code.root[1] {
            Instruction::For { body, .. } => {
                assert!(matches!(body[0], Instruction::Set { export: false, .. }))
            }
            i => panic!("expected for, got {:?}", i),
        }

        Ok(())
    }
}
