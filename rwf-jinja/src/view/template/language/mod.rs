//! Implementation of the template language.
//!
//! Includes the expressions, the node tree and the parser.
pub mod expression;
pub mod node;
pub mod parser;

pub use expression::Expression;
pub use node::Node;
pub use parser::Parser;
