use super::Value;

/// A template language token, e.g. `{%` or `block`.
#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    // e.g. `<html><body></body></html>`
    Text(String),
    // e.g. `{% block content %}`, identifiers and keywords alike.
    Name(String),
    // e.g. `{{ "hello world" }}` or `{{ 5 }}`
    Value(Value),
    // `{{`
    VariableStart,
    // `}}`
    VariableEnd,
    // `{%`
    BlockStart,
    // `%}`
    BlockEnd,
    Dot,
    Comma,
    Assign,
    Equals,
    NotEquals,
    SquareBracketStart,
    SquareBracketEnd,
    RoundBracketStart,
    RoundBracketEnd,
}

impl Token {
    /// Number of characters the token occupies in the source.
    pub fn len(&self) -> usize {
        match self {
            Token::Text(text) => text.chars().count(),
            Token::Name(name) => name.chars().count(),
            Token::Value(Value::String(s)) => s.chars().count() + 2,
            Token::Value(value) => value.to_string().len(),
            Token::VariableStart | Token::VariableEnd | Token::BlockStart | Token::BlockEnd => 2,
            Token::Equals | Token::NotEquals => 2,
            _ => 1,
        }
    }

    /// The token is a keyword or identifier with this name.
    pub fn is_name(&self, expected: &str) -> bool {
        matches!(self, Token::Name(name) if name == expected)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Token::Text(text) => write!(f, "{}", text),
            Token::Name(name) => write!(f, "{}", name),
            Token::Value(Value::String(s)) => write!(f, "\"{}\"", s),
            Token::Value(value) => write!(f, "{}", value),
            Token::VariableStart => write!(f, "{{{{"),
            Token::VariableEnd => write!(f, "}}}}"),
            Token::BlockStart => write!(f, "{{%"),
            Token::BlockEnd => write!(f, "%}}"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Assign => write!(f, "="),
            Token::Equals => write!(f, "=="),
            Token::NotEquals => write!(f, "!="),
            Token::SquareBracketStart => write!(f, "["),
            Token::SquareBracketEnd => write!(f, "]"),
            Token::RoundBracketStart => write!(f, "("),
            Token::RoundBracketEnd => write!(f, ")"),
        }
    }
}
