//! Recursive-descent parser that type checks as it builds the tree
//!
//! Symbols and functions are registered while parsing, so a name must be declared
//! before it is used. The stage context is applied to the tables first, which makes
//! the intrinsic variables and functions visible everywhere.

use super::ast::{
    BinaryOp, Decorators, ElseBranch, Expr, ExprKind, FunctionDef, IfStatement, Item, Literal,
    Program, RelationalOp, Statement,
};
use crate::compiler::context::ProgramContext;
use crate::compiler::functions::{FunctionId, FunctionTable};
use crate::compiler::symbols::{Scope, SymbolId, SymbolKind, SymbolTable};
use crate::error::{format_excerpt, Error, Result};
use crate::lexer::{Token, TokenKind};
use crate::types::{
    check_additive, check_assignment, check_equality, check_multiplicative, check_scalar_pair,
    result_of, ShaderType,
};

/// Output of a successful parse
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    /// Typed syntax tree
    pub program: Program,
    /// Every declared symbol, intrinsics included
    pub symbols: SymbolTable,
    /// Every declared function, intrinsics included
    pub functions: FunctionTable,
}

/// Shader parser
pub struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    current: usize,
    symbols: SymbolTable,
    functions: FunctionTable,
    function: Option<FunctionId>,
}

impl<'s> Parser<'s> {
    /// Creates a parser over `tokens` scanned from `source`, with the context's intrinsics declared
    pub fn new(source: &'s str, tokens: Vec<Token>, context: &ProgramContext) -> Result<Self> {
        let mut symbols = SymbolTable::new();
        let mut functions = FunctionTable::new();
        context.apply(&mut symbols, &mut functions)?;

        Ok(Parser {
            source,
            tokens,
            current: 0,
            symbols,
            functions,
            function: None,
        })
    }

    /// Parses the whole token stream
    pub fn parse(mut self) -> Result<ParsedProgram> {
        let mut items = Vec::new();

        while !self.is_at_end() {
            items.push(self.parse_declaration()?);
        }

        Ok(ParsedProgram {
            program: Program { items },
            symbols: self.symbols,
            functions: self.functions,
        })
    }

    // Declarations

    fn parse_declaration(&mut self) -> Result<Item> {
        let mut decorators = Decorators::default();
        while let Some(kind) = self.peek_kind().filter(|k| k.is_decorator()) {
            match kind {
                TokenKind::Export => decorators.export = true,
                TokenKind::Uniform => decorators.uniform = true,
                _ => decorators.interpolated = true,
            }
            self.current += 1;
        }

        let ty = match self.peek_kind().and_then(type_of) {
            Some(ty) => {
                self.current += 1;
                ty
            }
            None if decorators.is_empty() => {
                return Err(self.error_here("Expecting variable or function declaration"))
            }
            None => return Err(self.error_here("Expecting type name")),
        };

        let name = self.consume(TokenKind::Identifier, "Expecting identifier")?;

        if self.check(TokenKind::RoundBracketLeft) {
            self.parse_function(decorators, ty, name)
        } else {
            self.parse_global(decorators, ty, name)
        }
    }

    fn parse_global(&mut self, decorators: Decorators, ty: ShaderType, name: Token) -> Result<Item> {
        self.consume(TokenKind::Semicolon, "Missing semicolon")?;

        if ty == ShaderType::Void {
            return Err(self.error_at(&name, "Variables cannot have a type of 'void'"));
        }

        let symbol = self.declare(&name, Scope::Global, SymbolKind::Variable, ty)?;
        Ok(Item::GlobalVariable { symbol, decorators })
    }

    fn parse_function(
        &mut self,
        decorators: Decorators,
        return_type: ShaderType,
        name: Token,
    ) -> Result<Item> {
        if decorators.uniform {
            return Err(self.error_at(&name, "'uniform' cannot be applied to functions"));
        }
        if decorators.interpolated {
            return Err(self.error_at(&name, "'interpolated' cannot be applied to functions"));
        }

        let symbol = self.declare(&name, Scope::Global, SymbolKind::Function, ShaderType::Function)?;
        let id = self
            .functions
            .add(&name.lexeme, symbol, return_type)
            .ok_or_else(|| {
                self.error_at(&name, format!("Multiple definitions of symbol '{}'", name.lexeme))
            })?;
        self.functions.get_mut(id).export = decorators.export;
        self.function = Some(id);

        self.consume(TokenKind::RoundBracketLeft, "Expecting '('")?;
        if !self.check(TokenKind::RoundBracketRight) {
            loop {
                let (ty, parameter) = self.parse_type_and_identifier()?;
                if ty == ShaderType::Void {
                    return Err(self.error_at(&parameter, "Variables cannot have a type of 'void'"));
                }
                let symbol = self.declare(&parameter, Scope::Local, SymbolKind::Variable, ty)?;
                self.functions.get_mut(id).parameters.push(symbol);

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RoundBracketRight, "Expecting ')'")?;

        let body = self.parse_statement_list()?;
        self.function = None;

        Ok(Item::Function(FunctionDef {
            id,
            name: name.lexeme,
            decorators,
            body,
        }))
    }

    fn parse_type_and_identifier(&mut self) -> Result<(ShaderType, Token)> {
        let ty = self
            .peek_kind()
            .and_then(type_of)
            .ok_or_else(|| self.error_here("Expecting type name"))?;
        self.current += 1;

        let name = self.consume(TokenKind::Identifier, "Expecting identifier")?;
        Ok((ty, name))
    }

    fn declare(
        &mut self,
        name: &Token,
        scope: Scope,
        kind: SymbolKind,
        ty: ShaderType,
    ) -> Result<SymbolId> {
        let owner = match scope {
            Scope::Global => None,
            Scope::Local => self.function,
        };

        if let Some(existing) = self.symbols.find(&name.lexeme, owner) {
            let message = if self.symbols.get(existing).intrinsic {
                format!("Symbol '{}' shadows intrinsic", name.lexeme)
            } else {
                format!("Multiple definitions of symbol '{}'", name.lexeme)
            };
            return Err(self.error_at(name, message));
        }

        let id = self
            .symbols
            .add(&name.lexeme, scope, kind, ty, owner)
            .ok_or_else(|| {
                self.error_at(name, format!("Multiple definitions of symbol '{}'", name.lexeme))
            })?;
        self.symbols.get_mut(id).declared_at = Some((name.line, name.column));
        Ok(id)
    }

    // Statements

    fn parse_statement_list(&mut self) -> Result<Vec<Statement>> {
        self.consume(TokenKind::CurlyBracketLeft, "Expecting start of statement list '{'")?;

        let mut statements = Vec::new();
        while !self.check(TokenKind::CurlyBracketRight) {
            if self.is_at_end() {
                return Err(self.error_here("Expecting end of statement list '}'"));
            }
            // empty statement
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        self.current += 1;

        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek_kind() {
            Some(kind) if kind.is_type() => self.parse_local_variable(),
            Some(TokenKind::If) => Ok(Statement::If(self.parse_if()?)),
            Some(TokenKind::While) => self.parse_while(),
            Some(TokenKind::For) => self.parse_for(),
            Some(TokenKind::Return) => self.parse_return(),
            _ => {
                let expr = self.parse_expression()?;
                self.consume(TokenKind::Semicolon, "Missing semicolon")?;
                Ok(Statement::Expression(expr))
            }
        }
    }

    fn parse_local_variable(&mut self) -> Result<Statement> {
        let (ty, name) = self.parse_type_and_identifier()?;
        if ty == ShaderType::Void {
            return Err(self.error_at(&name, "Variables cannot have a type of 'void'"));
        }

        let initializer = if self.check(TokenKind::Assign) {
            let assign = self.advance()?;
            let value = self.parse_expression()?;
            if !check_assignment(ty, value.ty) {
                return Err(self.error_at(
                    &assign,
                    format!("Cannot initialise '{}' with '{}'", ty, value.ty),
                ));
            }
            Some(value)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Missing semicolon")?;

        // declared after the initializer so it cannot refer to itself
        let symbol = self.declare(&name, Scope::Local, SymbolKind::Variable, ty)?;
        if let Some(function) = self.function {
            self.functions.get_mut(function).locals.push(symbol);
        }

        Ok(Statement::LocalVariable {
            symbol,
            initializer,
        })
    }

    fn parse_if(&mut self) -> Result<IfStatement> {
        self.consume(TokenKind::If, "Expecting 'if'")?;
        let condition = self.parse_condition()?;
        let then_branch = self.parse_statement_list()?;

        let else_branch = if self.matches(TokenKind::Else) {
            if self.check(TokenKind::If) {
                Some(ElseBranch::ElseIf(Box::new(self.parse_if()?)))
            } else {
                Some(ElseBranch::Else(self.parse_statement_list()?))
            }
        } else {
            None
        };

        Ok(IfStatement {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Statement> {
        self.consume(TokenKind::While, "Expecting 'while'")?;
        let condition = self.parse_condition()?;
        let body = self.parse_statement_list()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_for(&mut self) -> Result<Statement> {
        self.consume(TokenKind::For, "Expecting 'for'")?;
        self.consume(TokenKind::RoundBracketLeft, "Expecting '('")?;
        let init = self.parse_expression()?;
        self.consume(TokenKind::Semicolon, "Missing semicolon")?;
        let condition = self.parse_bool_expression()?;
        self.consume(TokenKind::Semicolon, "Missing semicolon")?;
        let step = self.parse_expression()?;
        self.consume(TokenKind::RoundBracketRight, "Expecting ')'")?;
        let body = self.parse_statement_list()?;

        Ok(Statement::For {
            init,
            condition,
            step,
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Statement> {
        let keyword = self.consume(TokenKind::Return, "Expecting 'return'")?;
        let expected = self
            .function
            .map(|f| self.functions.get(f).return_type)
            .unwrap_or(ShaderType::Void);

        if self.matches(TokenKind::Semicolon) {
            if expected != ShaderType::Void {
                return Err(self.error_at(
                    &keyword,
                    format!("Expecting return value of type '{}'", expected),
                ));
            }
            return Ok(Statement::Return { value: None });
        }

        let value = self.parse_expression()?;
        if expected == ShaderType::Void || !check_assignment(expected, value.ty) {
            return Err(self.error_at(
                &keyword,
                format!("Cannot return '{}' from a '{}' function", value.ty, expected),
            ));
        }
        self.consume(TokenKind::Semicolon, "Missing semicolon")?;

        Ok(Statement::Return { value: Some(value) })
    }

    fn parse_condition(&mut self) -> Result<Expr> {
        self.consume(TokenKind::RoundBracketLeft, "Expecting '('")?;
        let condition = self.parse_bool_expression()?;
        self.consume(TokenKind::RoundBracketRight, "Expecting ')'")?;
        Ok(condition)
    }

    fn parse_bool_expression(&mut self) -> Result<Expr> {
        let start = self.current;
        let condition = self.parse_expression()?;
        if condition.ty != ShaderType::Bool {
            let message = format!("Condition must be 'bool', not '{}'", condition.ty);
            return Err(match self.tokens.get(start) {
                Some(token) => self.error_at(token, message),
                None => self.eof(message),
            });
        }
        Ok(condition)
    }

    // Expressions

    /// Parses one expression at assignment precedence
    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_relational()?;

        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::AddAssign) => Some(BinaryOp::Add),
            Some(TokenKind::SubtractAssign) => Some(BinaryOp::Subtract),
            Some(TokenKind::MultiplyAssign) => Some(BinaryOp::Multiply),
            Some(TokenKind::DivideAssign) => Some(BinaryOp::Divide),
            _ => return Ok(target),
        };
        let operator = self.advance()?;
        let value = self.parse_assignment()?;

        if target.is_constant() {
            return Err(self.error_at(&operator, "Assignment to constant expression"));
        }

        let operation_ok = match op {
            None => true,
            Some(BinaryOp::Add) | Some(BinaryOp::Subtract) => check_additive(target.ty, value.ty),
            Some(BinaryOp::Multiply) => check_multiplicative(target.ty, value.ty),
            Some(BinaryOp::Divide) => check_scalar_pair(target.ty, value.ty),
        };
        let stored = match op {
            None => value.ty,
            Some(_) => result_of(target.ty, value.ty),
        };

        if !operation_ok || !check_assignment(target.ty, stored) {
            return Err(self.error_at(
                &operator,
                format!(
                    "Incompatible types for assignment '{}' and '{}'",
                    target.ty, value.ty
                ),
            ));
        }

        Ok(Expr {
            ty: target.ty,
            line: operator.line,
            column: operator.column,
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        })
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;

        let op = match self.peek_kind() {
            Some(TokenKind::Equals) => RelationalOp::Equals,
            Some(TokenKind::NotEquals) => RelationalOp::NotEquals,
            Some(TokenKind::Less) => RelationalOp::Less,
            Some(TokenKind::LessEquals) => RelationalOp::LessEquals,
            Some(TokenKind::Greater) => RelationalOp::Greater,
            Some(TokenKind::GreaterEquals) => RelationalOp::GreaterEquals,
            _ => return Ok(lhs),
        };
        let operator = self.advance()?;
        let rhs = self.parse_additive()?;

        let compatible = match op {
            RelationalOp::Equals | RelationalOp::NotEquals => check_equality(lhs.ty, rhs.ty),
            _ => check_scalar_pair(lhs.ty, rhs.ty),
        };
        if !compatible {
            return Err(self.error_at(
                &operator,
                format!("Cannot compare '{}' and '{}'", lhs.ty, rhs.ty),
            ));
        }

        Ok(Expr {
            ty: ShaderType::Bool,
            line: operator.line,
            column: operator.column,
            kind: ExprKind::Relational {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Add) => BinaryOp::Add,
                Some(TokenKind::Subtract) => BinaryOp::Subtract,
                _ => break,
            };
            let operator = self.advance()?;
            let rhs = self.parse_multiplicative()?;

            if !check_additive(lhs.ty, rhs.ty) {
                let verb = if op == BinaryOp::Add { "add" } else { "subtract" };
                return Err(self.error_at(
                    &operator,
                    format!("Cannot {} '{}' and '{}'", verb, lhs.ty, rhs.ty),
                ));
            }

            lhs = binary(op, lhs, rhs, &operator);
        }

        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Multiply) => BinaryOp::Multiply,
                Some(TokenKind::Divide) => BinaryOp::Divide,
                _ => break,
            };
            let operator = self.advance()?;
            let rhs = self.parse_unary()?;

            let (compatible, verb) = match op {
                BinaryOp::Multiply => (check_multiplicative(lhs.ty, rhs.ty), "multiply"),
                _ => (check_scalar_pair(lhs.ty, rhs.ty), "divide"),
            };
            if !compatible {
                return Err(self.error_at(
                    &operator,
                    format!("Cannot {} '{}' by '{}'", verb, lhs.ty, rhs.ty),
                ));
            }

            lhs = binary(op, lhs, rhs, &operator);
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Subtract) => {
                let operator = self.advance()?;
                let operand = self.parse_unary()?;
                if !operand.ty.is_scalar() && !operand.ty.is_vector() {
                    return Err(self.error_at(&operator, "Unary '-' applied to invalid expression"));
                }
                Ok(Expr {
                    ty: operand.ty,
                    line: operator.line,
                    column: operator.column,
                    kind: ExprKind::Negate(Box::new(operand)),
                })
            }
            Some(TokenKind::LogicalNot) => {
                let operator = self.advance()?;
                let operand = self.parse_unary()?;
                if operand.ty != ShaderType::Bool {
                    return Err(self.error_at(
                        &operator,
                        "Unary '!' applied to non-boolean expression",
                    ));
                }
                Ok(Expr {
                    ty: ShaderType::Bool,
                    line: operator.line,
                    column: operator.column,
                    kind: ExprKind::Not(Box::new(operand)),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;

        loop {
            match self.peek_kind() {
                Some(TokenKind::SquareBracketLeft) => {
                    let bracket = self.advance()?;
                    let index = self.parse_expression()?;
                    self.consume(TokenKind::SquareBracketRight, "Expecting ']'")?;

                    let element = expr.ty.element().ok_or_else(|| {
                        self.error_at(&bracket, format!("Type '{}' cannot be subscripted", expr.ty))
                    })?;
                    if index.ty != ShaderType::Int {
                        return Err(self.error_at(&bracket, "Subscript is not integral"));
                    }

                    expr = Expr {
                        ty: element,
                        line: bracket.line,
                        column: bracket.column,
                        kind: ExprKind::Subscript {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                Some(TokenKind::RoundBracketLeft) => {
                    expr = self.parse_call(expr)?;
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr> {
        let paren = self.advance()?;

        let (function, name) = match &callee.kind {
            ExprKind::Name(symbol) => {
                let name = self.symbols.get(*symbol).name.clone();
                match self.functions.find(&name) {
                    Some(function) => (function, name),
                    None => {
                        return Err(self.error_at(&paren, format!("'{}' is not a function", name)))
                    }
                }
            }
            _ => return Err(self.error_at(&paren, "Expression is not a function")),
        };

        let mut args = Vec::new();
        if !self.check(TokenKind::RoundBracketRight) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RoundBracketRight, "Expecting ')'")?;

        let parameters = &self.functions.get(function).parameters;
        if args.len() != parameters.len() {
            return Err(self.error_at(
                &paren,
                format!(
                    "Function '{}' expects {} arguments but got {}",
                    name,
                    parameters.len(),
                    args.len()
                ),
            ));
        }
        for (i, (arg, parameter)) in args.iter().zip(parameters).enumerate() {
            let expected = self.symbols.get(*parameter).ty;
            if !check_assignment(expected, arg.ty) {
                return Err(self.error_at(
                    &paren,
                    format!(
                        "Incompatible argument {} for '{}': '{}' and '{}'",
                        i + 1,
                        name,
                        expected,
                        arg.ty
                    ),
                ));
            }
        }

        Ok(Expr {
            ty: self.functions.get(function).return_type,
            line: callee.line,
            column: callee.column,
            kind: ExprKind::Call {
                function,
                name,
                args,
            },
        })
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        if self.is_at_end() {
            return Err(self.eof("Expected expression"));
        }
        let token = self.advance()?;

        let (kind, ty) = match token.kind {
            TokenKind::IntLiteral => {
                let value = token
                    .lexeme
                    .parse::<i32>()
                    .map_err(|_| self.error_at(&token, "Integer literal out of range"))?;
                (ExprKind::Literal(Literal::Int(value)), ShaderType::Int)
            }
            TokenKind::FloatLiteral => {
                let value = token
                    .lexeme
                    .parse::<f32>()
                    .map_err(|_| self.error_at(&token, "Invalid float literal"))?;
                (ExprKind::Literal(Literal::Float(value)), ShaderType::Float)
            }
            TokenKind::BoolLiteral => (
                ExprKind::Literal(Literal::Bool(token.lexeme == "true")),
                ShaderType::Bool,
            ),
            TokenKind::Identifier => {
                let symbol = self.symbols.find(&token.lexeme, self.function).ok_or_else(|| {
                    self.error_at(&token, format!("Undefined symbol '{}'", token.lexeme))
                })?;
                (ExprKind::Name(symbol), self.symbols.get(symbol).ty)
            }
            TokenKind::RoundBracketLeft => {
                let inner = self.parse_expression()?;
                self.consume(TokenKind::RoundBracketRight, "Expecting ')'")?;
                return Ok(inner);
            }
            _ => return Err(self.error_at(&token, "Expected expression")),
        };

        Ok(Expr {
            kind,
            ty,
            line: token.line,
            column: token.column,
        })
    }

    // Token helpers

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.current).map(|t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.current)
            .cloned()
            .ok_or_else(|| self.eof("Unexpected end of input"))?;
        self.current += 1;
        Ok(token)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error_here(message))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        match self.tokens.get(self.current) {
            Some(token) => self.error_at(token, message),
            None => self.eof(message),
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> Error {
        let message = message.into();
        Error::Syntax {
            line: token.line,
            column: token.column,
            excerpt: format_excerpt(self.source, token.line, token.column, &message),
            message,
        }
    }

    fn eof(&self, message: impl Into<String>) -> Error {
        let message = message.into();
        Error::UnexpectedEof {
            excerpt: format!("{} at end of input\n", message),
            message,
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, operator: &Token) -> Expr {
    Expr {
        ty: result_of(lhs.ty, rhs.ty),
        line: operator.line,
        column: operator.column,
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    }
}

fn type_of(kind: TokenKind) -> Option<ShaderType> {
    Some(match kind {
        TokenKind::Void => ShaderType::Void,
        TokenKind::Int => ShaderType::Int,
        TokenKind::Float => ShaderType::Float,
        TokenKind::Bool => ShaderType::Bool,
        TokenKind::Vec3 => ShaderType::Vec3,
        TokenKind::Vec4 => ShaderType::Vec4,
        TokenKind::Mat3x3 => ShaderType::Mat3x3,
        TokenKind::Mat4x4 => ShaderType::Mat4x4,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::Stage;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> Result<ParsedProgram> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let context = ProgramContext::for_stage(Stage::Vertex);
        Parser::new(source, tokens, &context)?.parse()
    }

    fn syntax_error(source: &str) -> (usize, usize, String) {
        match parse(source) {
            Err(Error::Syntax {
                line,
                column,
                message,
                ..
            }) => (line, column, message),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    fn main_body(parsed: &ParsedProgram) -> &[Statement] {
        parsed
            .program
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(f) if f.name == "main" => Some(f.body.as_slice()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_transform_chain_is_left_associative() {
        let parsed = parse(
            "export void main() { g_world_position = g_projection * g_view * g_model * g_position; }",
        )
        .unwrap();

        let Statement::Expression(assign) = &main_body(&parsed)[0] else {
            panic!("expected expression statement");
        };
        assert_eq!(assign.ty, ShaderType::Vec4);

        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { lhs, rhs, .. } = &value.kind else {
            panic!("expected product");
        };
        assert_eq!(value.ty, ShaderType::Vec4);
        assert_eq!(lhs.ty, ShaderType::Mat4x4);
        assert!(matches!(rhs.kind, ExprKind::Name(_)));
    }

    #[test]
    fn test_empty_statements() {
        let parsed = parse("export void main() { ; }").unwrap();
        assert!(main_body(&parsed).is_empty());

        let parsed = parse(
            "bool b; int x;\nexport void main() { ;; if (b) { ; } else { ; ; } x = 1; ; }",
        )
        .unwrap();
        let body = main_body(&parsed);
        assert_eq!(body.len(), 2);
        let Statement::If(statement) = &body[0] else {
            panic!("expected if statement");
        };
        assert!(statement.then_branch.is_empty());
        assert!(matches!(&statement.else_branch, Some(ElseBranch::Else(b)) if b.is_empty()));
    }

    #[test]
    fn test_assignment_type_mismatch() {
        let (line, column, message) = syntax_error("vec4 v;\nvoid main() { v = 1.0; }");
        assert_eq!((line, column), (2, 17));
        assert_eq!(message, "Incompatible types for assignment 'vec4' and 'float'");
    }

    #[test]
    fn test_undefined_symbol() {
        let (line, column, message) = syntax_error("void main() {\n  x = 1;\n}");
        assert_eq!((line, column), (2, 3));
        assert_eq!(message, "Undefined symbol 'x'");
    }

    #[test]
    fn test_initializer_cannot_see_its_own_local() {
        let (_, _, message) = syntax_error("void main() { int x = x; }");
        assert_eq!(message, "Undefined symbol 'x'");
    }

    #[test]
    fn test_redeclaration_and_shadowing() {
        let (_, _, message) = syntax_error("int a; float a;");
        assert_eq!(message, "Multiple definitions of symbol 'a'");

        let (line, column, message) = syntax_error("vec4 g_position;");
        assert_eq!((line, column), (1, 6));
        assert_eq!(message, "Symbol 'g_position' shadows intrinsic");

        let (_, _, message) = syntax_error("void main() { float clamp; }");
        assert_eq!(message, "Symbol 'clamp' shadows intrinsic");
    }

    #[test]
    fn test_decorator_rules() {
        let (_, _, message) = syntax_error("uniform void main() {}");
        assert_eq!(message, "'uniform' cannot be applied to functions");

        let (_, _, message) = syntax_error("interpolated void main() {}");
        assert_eq!(message, "'interpolated' cannot be applied to functions");

        let (_, _, message) = syntax_error("void nothing;");
        assert_eq!(message, "Variables cannot have a type of 'void'");

        let parsed = parse("uniform float scale; export void main() {}").unwrap();
        let Item::GlobalVariable { decorators, .. } = &parsed.program.items[0] else {
            panic!("expected global");
        };
        assert!(decorators.uniform);
        let main = parsed.functions.find("main").unwrap();
        assert!(parsed.functions.get(main).export);
    }

    #[test]
    fn test_operator_messages() {
        let (_, _, message) = syntax_error("void main() { vec4 v; v = v + 1.0; }");
        assert_eq!(message, "Cannot add 'vec4' and 'float'");

        let (_, _, message) = syntax_error("void main() { vec4 v; v = 2.0 * v; }");
        assert_eq!(message, "Cannot multiply 'float' by 'vec4'");

        let (_, _, message) = syntax_error("void main() { vec4 v; v = v / 2.0; }");
        assert_eq!(message, "Cannot divide 'vec4' by 'float'");

        let (_, _, message) = syntax_error("void main() { bool b; if (b < 1) {} }");
        assert_eq!(message, "Cannot compare 'bool' and 'int'");

        let (_, _, message) = syntax_error("void main() { 1 = 2; }");
        assert_eq!(message, "Assignment to constant expression");

        let (_, _, message) = syntax_error("void main() { bool b; b = -b; }");
        assert_eq!(message, "Unary '-' applied to invalid expression");

        let (_, _, message) = syntax_error("void main() { int i; i = !i; }");
        assert_eq!(message, "Unary '!' applied to non-boolean expression");
    }

    #[test]
    fn test_compound_assignment_checks_result() {
        let (_, _, message) = syntax_error("void main() { g_model *= g_position; }");
        assert_eq!(message, "Incompatible types for assignment 'mat4x4' and 'vec4'");

        let parsed = parse("void main() { vec4 v; v *= 2.0; v += v; }").unwrap();
        assert_eq!(main_body(&parsed).len(), 3);
    }

    #[test]
    fn test_subscripts() {
        let parsed = parse("void main() { float f; f = g_model[1][2]; }").unwrap();
        let Statement::Expression(assign) = &main_body(&parsed)[1] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert_eq!(value.ty, ShaderType::Float);

        let (_, _, message) = syntax_error("void main() { float f; f = f[0]; }");
        assert_eq!(message, "Type 'float' cannot be subscripted");

        let (_, _, message) = syntax_error("void main() { float f; f = g_position[1.0]; }");
        assert_eq!(message, "Subscript is not integral");
    }

    #[test]
    fn test_calls() {
        let parsed = parse("void main() { float l; l = length(normalize(g_position)); }").unwrap();
        assert_eq!(main_body(&parsed).len(), 2);

        let (_, _, message) = syntax_error("void main() { float l; l = length(); }");
        assert_eq!(message, "Function 'length' expects 1 arguments but got 0");

        let (_, _, message) = syntax_error("void main() { float l; l = length(1.0); }");
        assert_eq!(message, "Incompatible argument 1 for 'length': 'vec4' and 'float'");

        let (_, _, message) = syntax_error("void main() { float l; l = g_position(1); }");
        assert_eq!(message, "'g_position' is not a function");
    }

    #[test]
    fn test_returns() {
        let (_, _, message) = syntax_error("void main() { return 1; }");
        assert_eq!(message, "Cannot return 'int' from a 'void' function");

        let (_, _, message) = syntax_error("float f() { return; }");
        assert_eq!(message, "Expecting return value of type 'float'");

        assert!(parse("float f() { return 1; }").is_ok());
    }

    #[test]
    fn test_control_flow_statements() {
        let parsed = parse(
            "void main() { int i; if (i == 0) { i = 1; } else if (i > 2) { i = 2; } else { i = 3; } \
             while (i < 10) { i += 1; } for (i = 0; i < 4; i += 1) { } }",
        )
        .unwrap();
        let body = main_body(&parsed);
        assert!(matches!(
            &body[1],
            Statement::If(IfStatement {
                else_branch: Some(ElseBranch::ElseIf(_)),
                ..
            })
        ));
        assert!(matches!(body[2], Statement::While { .. }));
        assert!(matches!(body[3], Statement::For { .. }));
    }

    #[test]
    fn test_missing_tokens() {
        assert!(matches!(parse("int a"), Err(Error::UnexpectedEof { .. })));
        assert!(matches!(
            parse("void main() { int a; a = 1;"),
            Err(Error::UnexpectedEof { .. })
        ));

        let (_, _, message) = syntax_error("void main() { bool a; a = && a; }");
        assert_eq!(message, "Expected expression");

        let (_, _, message) = syntax_error("void main() { bool a; a = a && a; }");
        assert_eq!(message, "Missing semicolon");

        let (_, _, message) = syntax_error("main() {}");
        assert_eq!(message, "Expecting variable or function declaration");
    }
}
