use super::{Token, TokenWithContext};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("syntax error")]
    Syntax(TokenWithContext),

    #[error("expected token \"{1}\", but have token \"{0}\" instead")]
    WrongToken(TokenWithContext, Token),

    #[error("reached end of file while performing \"{0}\", did you forget a closing tag?")]
    Eof(&'static str),

    #[error("{message} (line {line})")]
    Compile { message: String, line: usize },

    #[error("{0}")]
    Runtime(String),

    #[error("variable \"{0}\" is not defined or in scope")]
    UndefinedVariable(String),

    #[error("\"{0}\" is not callable")]
    NotCallable(String),

    #[error("\"{0}\" is not iterable")]
    NotIterable(String),

    #[error("template \"{0}\" does not exist")]
    TemplateNotFound(String),

    #[error("{}", templates_not_found(.0))]
    TemplatesNotFound(Vec<String>),

    #[error("Block '{block}' not found in template '{template}'")]
    BlockNotFound { block: String, template: String },

    #[error("no loader for this environment specified")]
    NoLoader,

    #[error("this loader cannot iterate over all templates")]
    CannotEnumerate,

    #[error("the template environment has been dropped")]
    EnvironmentDropped,

    #[error("store error: {0}")]
    Store(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to format a timtestamp correctly, error: \"{0}\"")]
    TimeFormatError(#[from] time::error::Format),

    #[error("Error loading template '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error rendering template '{template}': {source}")]
    Render {
        template: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error rendering fragment '{block}' in template '{template}': {source}")]
    Fragment {
        block: String,
        template: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error creating template response for '{name}': {source}")]
    Response {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error rendering block template '{name}': {source}")]
    Block {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Pretty(String),
}

fn templates_not_found(names: &[String]) -> String {
    if names.is_empty() {
        "Tried to select from an empty list of templates.".into()
    } else {
        format!("none of the templates given were found: {}", names.join(", "))
    }
}

impl Error {
    /// The template (or every candidate) could not be found by the loader.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::TemplateNotFound(_) | Error::TemplatesNotFound(_))
    }

    pub fn block_not_found(block: &str, template: &str) -> Self {
        Error::BlockNotFound {
            block: block.to_string(),
            template: template.to_string(),
        }
    }

    /// Point at the offending token in the template source.
    pub fn pretty(self, source: &str, path: Option<&str>) -> Self {
        let token = match self {
            Error::Syntax(ref token) => token,
            Error::WrongToken(ref token, _) => token,
            Error::Compile { line, ref message } => {
                let context = source.lines().nth(std::cmp::max(1, line) - 1);
                return match (path, context) {
                    (Some(path), Some(context)) => Error::Pretty(format!(
                        "---> {}:{}\n\n{} | {}\n\n{}",
                        path,
                        line,
                        line,
                        context.trim(),
                        message
                    )),
                    _ => self,
                };
            }
            _ => {
                if let Some(path) = path {
                    let prefix = "---> ";
                    return Error::Pretty(format!(
                        "{}{}\n\n{}{}",
                        prefix,
                        path,
                        " ".repeat(prefix.len()),
                        self
                    ));
                } else {
                    return self;
                }
            }
        };

        let error_msg = match self {
            Error::Syntax(_) => "syntax error".to_string(),
            Error::WrongToken(_, ref expected) => format!("expected \"{}\"", expected),
            _ => "".to_string(),
        };

        let context = source.lines().nth(std::cmp::max(1, token.line()) - 1); // lines start at 0
        let leading_spaces = if let Some(context) = context {
            context.len() - context.trim_start().len()
        } else {
            0
        };

        let underline = " ".repeat(token.column().saturating_sub(1 + leading_spaces))
            + &format!("^ {}", error_msg);

        let line_number = format!("{} | ", token.line());
        let underline_offset = " ".repeat(token.line().to_string().len()) + " | ";

        let path = if let Some(path) = path {
            format!("---> {}:{}:{}\n\n", path, token.line(), token.column())
        } else {
            "".to_string()
        };

        if let Some(context) = context {
            Error::Pretty(format!(
                "{}{}\n{}{}\n{}{}",
                path,
                underline_offset,
                line_number,
                context.trim(),
                underline_offset,
                underline
            ))
        } else {
            self
        }
    }
}
