//! Lexical analysis for shader source
//!
//! Converts source text into a flat stream of tokens using longest-match literal
//! definitions followed by pluggable pattern matchers.

mod scanner;
mod token;

pub use scanner::{PatternMatcher, Scanner, TokenDefinitions, TokenMatcher};
pub use token::{Token, TokenKind};
