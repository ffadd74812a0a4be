pub mod token;
pub mod value;

pub use token::Token;
pub use value::{ToTemplateValue, Value};

use super::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenWithContext {
    token: Token,
    line: usize,
    column: usize,
}

impl std::fmt::Display for TokenWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} (line: {}, column: {})",
            self.token, self.line, self.column
        )
    }
}

impl TokenWithContext {
    pub fn new(token: Token, line: usize, column: usize) -> Self {
        Self {
            token,
            line,
            column,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn token(&self) -> Token {
        self.token.clone()
    }
}

/// The lexer converts a template text
/// into a list of tokens that may mean something
/// in our template language.
///
/// Anything that's not inside a tag, e.g. `{% %}` or `{{ }}`,
/// is text that needs to be printed as-is and is represented
/// by the special `Token::Text`. Comments (`{# #}`) are dropped.
///
/// A `-` right inside a delimiter, e.g. `{%-` or `-}}`, strips
/// the whitespace on that side of the tag.
pub struct Lexer<'a> {
    // Template source.
    source: &'a str,
    chars: Vec<char>,
    position: usize,
    // Resulting tokens.
    tokens: Vec<TokenWithContext>,
    // Text outside of tags, waiting to be emitted.
    buffer: String,
    buffer_start: (usize, usize),
    // The last tag asked to strip whitespace from the text that follows it.
    lstrip: bool,
    // Which line we're on.
    line: usize,
    // Which column we're on.
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create new lexer from text input.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: vec![],
            position: 0,
            tokens: vec![],
            buffer: String::new(),
            buffer_start: (1, 1),
            lstrip: false,
            line: 1,
            column: 1,
        }
    }

    /// Parse an input string into tokens supported by our template language.
    pub fn tokens(mut self) -> Result<Vec<TokenWithContext>, Error> {
        self.chars = self.source.chars().collect();

        while let Some(c) = self.peek(0) {
            if c == '{' && matches!(self.peek(1), Some('{') | Some('%') | Some('#')) {
                self.tag()?;
                continue;
            }

            if self.buffer.is_empty() {
                self.buffer_start = (self.line, self.column);
            }

            self.buffer.push(c);
            self.bump();
        }

        self.drain_buffer(false);

        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.position += 1;

        match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
            }
            // Windows line endings.
            '\r' => (),
            _ => self.column += 1,
        }

        Some(c)
    }

    fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    // `{{`, `{%` or `{#` is at the current position.
    fn tag(&mut self) -> Result<(), Error> {
        let (line, column) = (self.line, self.column);
        let kind = self.peek(1);
        let rstrip = self.peek(2) == Some('-');

        self.drain_buffer(rstrip);
        self.skip(if rstrip { 3 } else { 2 });

        match kind {
            Some('#') => self.comment(),
            Some('{') => {
                self.tokens
                    .push(TokenWithContext::new(Token::VariableStart, line, column));
                self.code('}', Token::VariableEnd)
            }
            _ => {
                self.tokens
                    .push(TokenWithContext::new(Token::BlockStart, line, column));
                self.code('%', Token::BlockEnd)
            }
        }
    }

    fn comment(&mut self) -> Result<(), Error> {
        loop {
            match (self.peek(0), self.peek(1), self.peek(2)) {
                (None, _, _) => return Err(Error::Eof("comment")),
                (Some('-'), Some('#'), Some('}')) => {
                    self.skip(3);
                    self.lstrip = true;
                    return Ok(());
                }
                (Some('#'), Some('}'), _) => {
                    self.skip(2);
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    // Lex the inside of a tag until its closing delimiter, e.g. `%}`.
    fn code(&mut self, close: char, end: Token) -> Result<(), Error> {
        loop {
            let (line, column) = (self.line, self.column);
            let c = match self.peek(0) {
                Some(c) => c,
                None => return Err(Error::Eof("tag")),
            };

            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }

                '-' if self.peek(1) == Some(close) && self.peek(2) == Some('}') => {
                    self.skip(3);
                    self.lstrip = true;
                    self.add_token(end, line, column);
                    return Ok(());
                }

                c if c == close && self.peek(1) == Some('}') => {
                    self.skip(2);
                    self.add_token(end, line, column);
                    return Ok(());
                }

                '"' | '\'' => self.string(c, line, column)?,

                '0'..='9' => self.number(line, column)?,

                '-' if matches!(self.peek(1), Some('0'..='9')) => self.number(line, column)?,

                c if c.is_alphabetic() || c == '_' => self.name(line, column),

                '=' => {
                    if self.peek(1) == Some('=') {
                        self.skip(2);
                        self.add_token(Token::Equals, line, column);
                    } else {
                        self.bump();
                        self.add_token(Token::Assign, line, column);
                    }
                }

                '!' if self.peek(1) == Some('=') => {
                    self.skip(2);
                    self.add_token(Token::NotEquals, line, column);
                }

                '.' | ',' | '(' | ')' | '[' | ']' => {
                    self.bump();
                    let token = match c {
                        '.' => Token::Dot,
                        ',' => Token::Comma,
                        '(' => Token::RoundBracketStart,
                        ')' => Token::RoundBracketEnd,
                        '[' => Token::SquareBracketStart,
                        _ => Token::SquareBracketEnd,
                    };
                    self.add_token(token, line, column);
                }

                c => {
                    return Err(Error::Syntax(TokenWithContext::new(
                        Token::Text(c.to_string()),
                        line,
                        column,
                    )))
                }
            }
        }
    }

    fn string(&mut self, quote: char, line: usize, column: usize) -> Result<(), Error> {
        self.bump();
        let mut string = String::new();

        loop {
            match self.bump() {
                None => return Err(Error::Eof("string")),
                Some('\\') => match self.bump() {
                    Some('n') => string.push('\n'),
                    Some('t') => string.push('\t'),
                    Some(c) => string.push(c),
                    None => return Err(Error::Eof("string")),
                },
                Some(c) if c == quote => break,
                Some(c) => string.push(c),
            }
        }

        self.add_token(Token::Value(Value::String(string)), line, column);
        Ok(())
    }

    fn number(&mut self, line: usize, column: usize) -> Result<(), Error> {
        let mut number = String::new();
        let mut float = false;

        if self.peek(0) == Some('-') {
            number.push('-');
            self.bump();
        }

        while let Some(c) = self.peek(0) {
            match c {
                '0'..='9' | '_' => number.push(c),
                // Only a dot followed by a digit makes a float, otherwise it's an accessor.
                '.' if !float && matches!(self.peek(1), Some('0'..='9')) => {
                    float = true;
                    number.push(c);
                }
                _ => break,
            }
            self.bump();
        }

        let number = number.replace('_', "");
        let value = if float {
            number.parse::<f64>().ok().map(Value::Float)
        } else {
            number.parse::<i64>().ok().map(Value::Integer)
        };

        match value {
            Some(value) => {
                self.add_token(Token::Value(value), line, column);
                Ok(())
            }
            None => Err(Error::Syntax(TokenWithContext::new(
                Token::Text(number),
                line,
                column,
            ))),
        }
    }

    fn name(&mut self, line: usize, column: usize) {
        let mut name = String::new();

        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let token = match name.as_str() {
            "true" | "True" => Token::Value(Value::Boolean(true)),
            "false" | "False" => Token::Value(Value::Boolean(false)),
            "none" | "None" => Token::Value(Value::Null),
            _ => Token::Name(name),
        };

        self.add_token(token, line, column);
    }

    // Emit buffered text, applying whitespace control on both sides.
    fn drain_buffer(&mut self, rstrip: bool) {
        let mut text = std::mem::take(&mut self.buffer);

        if std::mem::take(&mut self.lstrip) {
            text = text.trim_start().to_string();
        }

        if rstrip {
            text.truncate(text.trim_end().len());
        }

        if !text.is_empty() {
            let (line, column) = self.buffer_start;
            self.add_token(Token::Text(text), line, column);
        }
    }

    // Add token to output with lexer context (e.g. line number).
    fn add_token(&mut self, token: Token, line: usize, column: usize) {
        self.tokens
            .push(TokenWithContext::new(token, line, column));
    }
}

// Easily tokenize strings.
pub trait Tokenize {
    // Parse a string and convert it to a list of tokens.
    fn tokenize(&self) -> Result<Vec<TokenWithContext>, Error>;
}

impl Tokenize for &str {
    fn tokenize(&self) -> Result<Vec<TokenWithContext>, Error> {
        Lexer::new(self).tokens()
    }
}

impl Tokenize for String {
    fn tokenize(&self) -> Result<Vec<TokenWithContext>, Error> {
        Lexer::new(self).tokens()
    }
}
