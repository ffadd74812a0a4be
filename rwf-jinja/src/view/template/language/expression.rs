use super::super::{
    lexer::{Token, TokenWithContext, Value},
    runtime::{Context, Scope},
    Error,
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use std::iter::{Iterator, Peekable};

/// An expression, like `user.name == "lev"` or `render_block("nav.html")`,
/// which when evaluated produces a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    // `5`, `"hello"`, `true`, `none`.
    Constant(Value),

    // Resolved from the local scope first, then the context.
    Variable(String),

    // `user.name` or `items.0`
    Attribute {
        value: Box<Expression>,
        name: String,
    },

    // `[1, 2, variable]`
    List(Vec<Expression>),

    // `("a.html", "b.html")`
    Tuple(Vec<Expression>),

    // `macro_name(arg, "other arg")`
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },

    Not(Box<Expression>),

    // `==` when `equal`, `!=` otherwise.
    Compare {
        left: Box<Expression>,
        equal: bool,
        right: Box<Expression>,
    },
}

impl Expression {
    /// Create new constant expression.
    pub fn constant(value: Value) -> Self {
        Self::Constant(value)
    }

    /// Create new variable expression.
    pub fn variable(name: impl ToString) -> Self {
        Self::Variable(name.to_string())
    }

    /// Parse an expression from a stream of tokens. Stops at the first token
    /// that can't continue the expression, e.g. `%}` or a keyword like `as`.
    pub fn parse(iter: &mut Peekable<impl Iterator<Item = TokenWithContext>>) -> Result<Self, Error> {
        if let Some(next) = iter.peek() {
            if next.token().is_name("not") {
                let _ = iter.next();
                return Ok(Expression::Not(Box::new(Self::parse(iter)?)));
            }
        }

        let left = Self::operand(iter)?;

        let equal = match iter.peek().map(|t| t.token()) {
            Some(Token::Equals) => true,
            Some(Token::NotEquals) => false,
            _ => return Ok(left),
        };

        let _ = iter.next();
        let right = Self::operand(iter)?;

        Ok(Expression::Compare {
            left: Box::new(left),
            equal,
            right: Box::new(right),
        })
    }

    fn operand(iter: &mut Peekable<impl Iterator<Item = TokenWithContext>>) -> Result<Self, Error> {
        let term = Self::term(iter)?;
        Self::accessor(term, iter)
    }

    fn term(iter: &mut Peekable<impl Iterator<Item = TokenWithContext>>) -> Result<Self, Error> {
        let next = iter.next().ok_or(Error::Eof("expression"))?;

        Ok(match next.token() {
            Token::Value(value) => Self::constant(value),
            Token::Name(name) => Self::variable(name),

            Token::SquareBracketStart => {
                Expression::List(Self::sequence(iter, Token::SquareBracketEnd)?)
            }

            Token::RoundBracketStart => {
                let first = Self::parse(iter)?;
                let next = iter.next().ok_or(Error::Eof("round bracket"))?;

                match next.token() {
                    Token::RoundBracketEnd => first,
                    Token::Comma => {
                        let mut items = vec![first];
                        items.extend(Self::sequence(iter, Token::RoundBracketEnd)?);
                        Expression::Tuple(items)
                    }
                    _ => return Err(Error::WrongToken(next, Token::RoundBracketEnd)),
                }
            }

            _ => return Err(Error::Syntax(next)),
        })
    }

    // Comma-separated expressions up to and including the closing token.
    // A trailing comma is allowed.
    fn sequence(
        iter: &mut Peekable<impl Iterator<Item = TokenWithContext>>,
        end: Token,
    ) -> Result<Vec<Self>, Error> {
        let mut items = vec![];

        loop {
            match iter.peek() {
                Some(next) if next.token() == end => {
                    let _ = iter.next();
                    return Ok(items);
                }
                None => return Err(Error::Eof("list")),
                _ => (),
            }

            items.push(Self::parse(iter)?);

            let next = iter.next().ok_or(Error::Eof("list"))?;
            match next.token() {
                Token::Comma => continue,
                token if token == end => return Ok(items),
                _ => return Err(Error::WrongToken(next, end)),
            }
        }
    }

    fn accessor(
        mut expr: Self,
        iter: &mut Peekable<impl Iterator<Item = TokenWithContext>>,
    ) -> Result<Self, Error> {
        loop {
            let accessor = iter.peek().map(|t| t.token());

            expr = match accessor {
                Some(Token::Dot) => {
                    let _ = iter.next();
                    let name = iter.next().ok_or(Error::Eof("accessor name"))?;
                    let name = match name.token() {
                        Token::Name(name) => name,
                        Token::Value(Value::Integer(n)) => n.to_string(),
                        _ => return Err(Error::Syntax(name)),
                    };

                    Expression::Attribute {
                        value: Box::new(expr),
                        name,
                    }
                }

                Some(Token::RoundBracketStart) => {
                    let _ = iter.next();
                    let args = Self::sequence(iter, Token::RoundBracketEnd)?;

                    Expression::Call {
                        callee: Box::new(expr),
                        args,
                    }
                }

                _ => return Ok(expr),
            };
        }
    }

    /// The expression is a string literal, e.g. `"base.html"`.
    pub fn literal_name(&self) -> Option<&str> {
        match self {
            Expression::Constant(value) => value.as_str(),
            _ => None,
        }
    }

    /// Evaluate the expression. Evaluation may suspend when it calls
    /// a macro or a native function.
    pub fn evaluate<'a>(
        &'a self,
        context: &'a Context,
        scope: &'a Scope,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        Box::pin(async move {
            match self {
                Expression::Constant(value) => Ok(value.clone()),

                Expression::Variable(name) => scope
                    .resolve(name)
                    .or_else(|| context.resolve(name))
                    .ok_or_else(|| Error::UndefinedVariable(name.clone())),

                Expression::Attribute { value, name } => {
                    Ok(value.evaluate(context, scope).await?.attribute(name))
                }

                Expression::List(items) | Expression::Tuple(items) => {
                    let mut list = vec![];
                    for item in items {
                        list.push(item.evaluate(context, scope).await?);
                    }
                    Ok(Value::List(list))
                }

                Expression::Call { callee, args } => {
                    let callee = callee.evaluate(context, scope).await?;
                    let mut values = vec![];
                    for arg in args {
                        values.push(arg.evaluate(context, scope).await?);
                    }
                    callee.call(values).await
                }

                Expression::Not(operand) => Ok(Value::Boolean(
                    !operand.evaluate(context, scope).await?.truthy(),
                )),

                Expression::Compare { left, equal, right } => {
                    let left = left.evaluate(context, scope).await?;
                    let right = right.evaluate(context, scope).await?;
                    Ok(Value::Boolean((left == right) == *equal))
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::super::super::lexer::Tokenize;
    use super::*;

    // Parse the expression inside `{{ }}`.
    fn parse(source: &str) -> Result<Expression, Error> {
        let mut iter = source.tokenize()?.into_iter().skip(1).peekable();
        Expression::parse(&mut iter)
    }

    #[test]
    fn test_parse_call_with_attribute() -> Result<(), Error> {
        let expr = parse(r#"{{ forms.input("name", [1, 2]) }}"#)?;
        assert_eq!(
            expr,
            Expression::Call {
                callee: Box::new(Expression::Attribute {
                    value: Box::new(Expression::variable("forms")),
                    name: "input".into(),
                }),
                args: vec![
                    Expression::constant(Value::String("name".into())),
                    Expression::List(vec![
                        Expression::constant(Value::Integer(1)),
                        Expression::constant(Value::Integer(2)),
                    ]),
                ],
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_tuple_and_compare() -> Result<(), Error> {
        let mut iter = "{{ ('a.html', 'b.html') }}".tokenize()?.into_iter().peekable();
        let _ = iter.next();
        let expr = Expression::parse(&mut iter)?;
        assert!(matches!(expr, Expression::Tuple(ref items) if items.len() == 2));

        let mut iter = "{{ not a != none }}".tokenize()?.into_iter().peekable();
        let _ = iter.next();
        let expr = Expression::parse(&mut iter)?;
        assert!(matches!(
            expr,
            Expression::Not(ref inner) if matches!(**inner, Expression::Compare { equal: false, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_stops_at_keyword() -> Result<(), Error> {
        let mut iter = "{% include 'a.html' ignore missing %}"
            .tokenize()?
            .into_iter()
            .skip(2)
            .peekable();
        let expr = Expression::parse(&mut iter)?;
        assert_eq!(expr.literal_name(), Some("a.html"));
        assert_eq!(
            iter.next().map(|t| t.token()),
            Some(Token::Name("ignore".into()))
        );
        Ok(())
    }
}
