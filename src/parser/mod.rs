//! Shader parser
//!
//! Turns a token stream into a typed syntax tree. Type rules are applied while the
//! tree is built, so a successful parse is also a successful type check.

pub mod ast;
mod syntax_tree;

pub use ast::{
    BinaryOp, Decorators, ElseBranch, Expr, ExprKind, FunctionDef, IfStatement, Item, Literal,
    Program, RelationalOp, Statement,
};
pub use syntax_tree::{ParsedProgram, Parser};

use crate::compiler::context::ProgramContext;
use crate::error::Result;
use crate::lexer::Scanner;

/// Scans and parses `source` against a stage context
pub fn parse_source(source: &str, context: &ProgramContext) -> Result<ParsedProgram> {
    let tokens = Scanner::new(source).scan_tokens()?;
    Parser::new(source, tokens, context)?.parse()
}
