use super::{
    super::{Error, Token, TokenWithContext, Tokenize},
    Expression, Node,
};
use std::iter::{Iterator, Peekable};

macro_rules! expect {
    ($got:expr, $expected:expr) => {
        if $got.token() != $expected {
            return Err(Error::WrongToken($got, $expected));
        }
    };
}

/// Turns tokens into the template node tree.
pub struct Parser<I: Iterator<Item = TokenWithContext>> {
    iter: Peekable<I>,
}

impl Parser<std::vec::IntoIter<TokenWithContext>> {
    pub fn new(tokens: Vec<TokenWithContext>) -> Self {
        Self {
            iter: tokens.into_iter().peekable(),
        }
    }

    /// Parse template source into nodes.
    pub fn from_str(source: &str) -> Result<Vec<Node>, Error> {
        Self::new(source.tokenize()?).template()
    }
}

impl<I: Iterator<Item = TokenWithContext>> Parser<I> {
    /// Parse the whole template.
    pub fn template(&mut self) -> Result<Vec<Node>, Error> {
        let (nodes, _) = self.nodes(&[])?;
        Ok(nodes)
    }

    // Parse nodes until one of the `end` tags, e.g. `{% endblock`.
    // The rest of the end tag is left for the caller.
    fn nodes(&mut self, end: &[&'static str]) -> Result<(Vec<Node>, Option<String>), Error> {
        let mut nodes = vec![];

        while let Some(next) = self.iter.next() {
            match next.token() {
                Token::Text(text) => nodes.push(Node::Text(text)),

                Token::VariableStart => {
                    let expression = self.expression()?;
                    let close = self.iter.next().ok_or(Error::Eof("print"))?;
                    expect!(close, Token::VariableEnd);
                    nodes.push(Node::Print(expression));
                }

                Token::BlockStart => {
                    let tag = self.iter.next().ok_or(Error::Eof("statement"))?;
                    let keyword = match tag.token() {
                        Token::Name(keyword) => keyword,
                        _ => return Err(Error::Syntax(tag)),
                    };

                    if end.iter().any(|tag| *tag == keyword) {
                        return Ok((nodes, Some(keyword)));
                    }

                    nodes.push(self.statement(&keyword, tag)?);
                }

                _ => return Err(Error::Syntax(next)),
            }
        }

        match end.first().copied() {
            Some(tag) => Err(Error::Eof(tag)),
            None => Ok((nodes, None)),
        }
    }

    fn statement(&mut self, keyword: &str, tag: TokenWithContext) -> Result<Node, Error> {
        match keyword {
            "block" => self.block(tag.line()),

            "extends" => {
                let template = self.expression()?;
                self.block_end()?;

                Ok(Node::Extends {
                    template,
                    line: tag.line(),
                })
            }

            "include" => {
                let template = self.expression()?;
                let ignore_missing = if self.accept("ignore") {
                    self.keyword("missing")?;
                    true
                } else {
                    false
                };
                let with_context = self.context_modifier()?.unwrap_or(true);
                self.block_end()?;

                Ok(Node::Include {
                    template,
                    ignore_missing,
                    with_context,
                })
            }

            "import" => {
                let template = self.expression()?;
                self.keyword("as")?;
                let target = self.name()?;
                let with_context = self.context_modifier()?.unwrap_or(false);
                self.block_end()?;

                Ok(Node::Import {
                    template,
                    target,
                    with_context,
                })
            }

            "from" => {
                let template = self.expression()?;
                self.keyword("import")?;

                let mut names = vec![];
                loop {
                    let name = self.name()?;
                    let alias = if self.accept("as") {
                        Some(self.name()?)
                    } else {
                        None
                    };
                    names.push((name, alias));

                    if self
                        .iter
                        .next_if(|t| t.token() == Token::Comma)
                        .is_none()
                    {
                        break;
                    }
                }

                let with_context = self.context_modifier()?.unwrap_or(false);
                self.block_end()?;

                Ok(Node::FromImport {
                    template,
                    names,
                    with_context,
                })
            }

            "if" => self.if_statement(),

            "for" => {
                let target = self.name()?;
                self.keyword("in")?;
                let iter = self.expression()?;
                self.block_end()?;
                let (body, _) = self.nodes(&["endfor"])?;
                self.block_end()?;

                Ok(Node::For { target, iter, body })
            }

            "set" => {
                let name = self.name()?;
                let assign = self.iter.next().ok_or(Error::Eof("set"))?;
                expect!(assign, Token::Assign);
                let value = self.expression()?;
                self.block_end()?;

                Ok(Node::Set { name, value })
            }

            "macro" => {
                let name = self.name()?;
                let open = self.iter.next().ok_or(Error::Eof("macro"))?;
                expect!(open, Token::RoundBracketStart);

                let mut params = vec![];
                loop {
                    if self
                        .iter
                        .next_if(|t| t.token() == Token::RoundBracketEnd)
                        .is_some()
                    {
                        break;
                    }

                    params.push(self.name()?);

                    let next = self.iter.next().ok_or(Error::Eof("macro"))?;
                    match next.token() {
                        Token::Comma => continue,
                        Token::RoundBracketEnd => break,
                        _ => return Err(Error::WrongToken(next, Token::RoundBracketEnd)),
                    }
                }

                self.block_end()?;
                let (body, _) = self.nodes(&["endmacro"])?;
                self.block_end()?;

                Ok(Node::Macro { name, params, body })
            }

            _ => Err(Error::Syntax(tag)),
        }
    }

    fn block(&mut self, line: usize) -> Result<Node, Error> {
        let name = self.name()?;
        let (mut scoped, mut required) = (false, false);

        loop {
            if self.accept("scoped") {
                scoped = true;
            } else if self.accept("required") {
                required = true;
            } else {
                break;
            }
        }

        self.block_end()?;
        let (body, _) = self.nodes(&["endblock"])?;

        // `{% endblock name %}`
        if let Some(end) = self.iter.next_if(|t| matches!(t.token(), Token::Name(_))) {
            expect!(end, Token::Name(name.clone()));
        }
        self.block_end()?;

        if required && !body.iter().all(Node::is_whitespace) {
            return Err(Error::Compile {
                message: "Required blocks can only contain comments or whitespace".into(),
                line,
            });
        }

        Ok(Node::Block {
            name,
            scoped,
            required,
            body,
            line,
        })
    }

    // `elif` becomes an `if` nested in the `else` branch.
    fn if_statement(&mut self) -> Result<Node, Error> {
        let condition = self.expression()?;
        self.block_end()?;

        let (body, end) = self.nodes(&["elif", "else", "endif"])?;

        let otherwise = match end.as_deref() {
            Some("elif") => vec![self.if_statement()?],
            Some("else") => {
                self.block_end()?;
                let (otherwise, _) = self.nodes(&["endif"])?;
                self.block_end()?;
                otherwise
            }
            _ => {
                self.block_end()?;
                vec![]
            }
        };

        Ok(Node::If {
            condition,
            body,
            otherwise,
        })
    }

    fn expression(&mut self) -> Result<Expression, Error> {
        Expression::parse(&mut self.iter)
    }

    fn name(&mut self) -> Result<String, Error> {
        let next = self.iter.next().ok_or(Error::Eof("name"))?;
        match next.token() {
            Token::Name(name) => Ok(name),
            _ => Err(Error::Syntax(next)),
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), Error> {
        let next = self.iter.next().ok_or(Error::Eof("keyword"))?;
        expect!(next, Token::Name(keyword.to_string()));
        Ok(())
    }

    // Consume the keyword if it's next.
    fn accept(&mut self, keyword: &str) -> bool {
        self.iter.next_if(|t| t.token().is_name(keyword)).is_some()
    }

    // `with context` or `without context`
    fn context_modifier(&mut self) -> Result<Option<bool>, Error> {
        let with_context = if self.accept("with") {
            true
        } else if self.accept("without") {
            false
        } else {
            return Ok(None);
        };

        self.keyword("context")?;
        Ok(Some(with_context))
    }

    fn block_end(&mut self) -> Result<(), Error> {
        let next = self.iter.next().ok_or(Error::Eof("tag"))?;
        expect!(next, Token::BlockEnd);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::super::Value;
    use super::*;

    #[test]
    fn test_parse_child_template() -> Result<(), Error> {
        let nodes = Parser::from_str(
            r#"{% extends "base.html" %}{% block title scoped %}Hi {{ name }}{% endblock title %}"#,
        )?;

        assert_eq!(
            nodes,
            vec![
                Node::Extends {
                    template: Expression::constant(Value::String("base.html".into())),
                    line: 1,
                },
                Node::Block {
                    name: "title".into(),
                    scoped: true,
                    required: false,
                    body: vec![
                        Node::Text("Hi ".into()),
                        Node::Print(Expression::variable("name")),
                    ],
                    line: 1,
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn test_parse_include_modifiers() -> Result<(), Error> {
        let nodes = Parser::from_str(
            "{% include ['a.html', 'b.html'] ignore missing without context %}",
        )?;

        assert!(matches!(
            &nodes[0],
            Node::Include {
                template: Expression::List(_),
                ignore_missing: true,
                with_context: false,
            }
        ));

        let nodes = Parser::from_str("{% include name %}")?;
        assert!(matches!(
            &nodes[0],
            Node::Include {
                ignore_missing: false,
                with_context: true,
                ..
            }
        ));

        Ok(())
    }

    #[test]
    fn test_parse_imports() -> Result<(), Error> {
        let nodes = Parser::from_str(
            "{% import 'forms.html' as forms %}{% from 'forms.html' import input as field, label with context %}",
        )?;

        assert_eq!(
            nodes[0],
            Node::Import {
                template: Expression::constant(Value::String("forms.html".into())),
                target: "forms".into(),
                with_context: false,
            }
        );
        assert_eq!(
            nodes[1],
            Node::FromImport {
                template: Expression::constant(Value::String("forms.html".into())),
                names: vec![
                    ("input".into(), Some("field".into())),
                    ("label".into(), None)
                ],
                with_context: true,
            }
        );

        Ok(())
    }

    #[test]
    fn test_parse_elif() -> Result<(), Error> {
        let nodes = Parser::from_str("{% if a %}1{% elif b %}2{% else %}3{% endif %}")?;

        match &nodes[0] {
            Node::If { otherwise, .. } => match &otherwise[0] {
                Node::If { body, otherwise, .. } => {
                    assert_eq!(body, &vec![Node::Text("2".into())]);
                    assert_eq!(otherwise, &vec![Node::Text("3".into())]);
                }
                node => panic!("expected nested if, got {:?}", node),
            },
            node => panic!("expected if, got {:?}", node),
        }

        Ok(())
    }

    #[test]
    fn test_required_block_must_be_empty() {
        assert!(Parser::from_str("{% block b required %} \n {% endblock %}").is_ok());
        assert!(matches!(
            Parser::from_str("{% block b required %}X{% endblock %}"),
            Err(Error::Compile { .. })
        ));
    }

    #[test]
    fn test_unbalanced_tags() {
        assert!(matches!(
            Parser::from_str("{% block b %}X"),
            Err(Error::Eof("endblock"))
        ));
        assert!(matches!(
            Parser::from_str("{% endblock %}"),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            Parser::from_str("{% block a %}{% endblock b %}"),
            Err(Error::WrongToken(_, _))
        ));
    }
}
