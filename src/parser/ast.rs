use crate::compiler::functions::FunctionId;
use crate::compiler::symbols::SymbolId;
use crate::types::ShaderType;
use std::fmt;

/// A parsed and type-checked shader
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Top-level declarations in source order
    pub items: Vec<Item>,
}

/// Declaration decorators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decorators {
    /// `export`
    pub export: bool,
    /// `uniform`
    pub uniform: bool,
    /// `interpolated`
    pub interpolated: bool,
}

impl Decorators {
    /// True when no decorator was given
    pub fn is_empty(&self) -> bool {
        !self.export && !self.uniform && !self.interpolated
    }
}

/// Top-level declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Global variable declaration
    GlobalVariable {
        /// Declared symbol
        symbol: SymbolId,
        /// Decorators on the declaration
        decorators: Decorators,
    },
    /// Function definition
    Function(FunctionDef),
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Entry in the function table
    pub id: FunctionId,
    /// Function name
    pub name: String,
    /// Decorators on the definition
    pub decorators: Decorators,
    /// Body statements
    pub body: Vec<Statement>,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Local variable with optional initializer
    LocalVariable {
        /// Declared symbol
        symbol: SymbolId,
        /// Initial value
        initializer: Option<Expr>,
    },

    /// Expression evaluated for its effects
    Expression(Expr),

    /// If with optional else / else-if chain
    If(IfStatement),

    /// While loop
    While {
        /// Loop condition
        condition: Expr,
        /// Loop body
        body: Vec<Statement>,
    },

    /// For loop
    For {
        /// Initial expression
        init: Expr,
        /// Loop condition
        condition: Expr,
        /// Step expression
        step: Expr,
        /// Loop body
        body: Vec<Statement>,
    },

    /// Return from the enclosing function
    Return {
        /// Returned value
        value: Option<Expr>,
    },
}

/// If statement
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// Condition, of type `bool`
    pub condition: Expr,
    /// Statements when the condition holds
    pub then_branch: Vec<Statement>,
    /// What follows `else`
    pub else_branch: Option<ElseBranch>,
}

/// The part after `else`
#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    /// `else if (...) { ... }`
    ElseIf(Box<IfStatement>),
    /// `else { ... }`
    Else(Vec<Statement>),
}

/// Typed expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Expression shape
    pub kind: ExprKind,
    /// Static type
    pub ty: ShaderType,
    /// Line of the token the expression is reported at
    pub line: usize,
    /// Column of the token the expression is reported at
    pub column: usize,
}

/// Expression shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value
    Literal(Literal),
    /// Reference to a variable
    Name(SymbolId),
    /// Arithmetic
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// `=` when `op` is `None`, compound assignment otherwise
    Assign {
        /// Arithmetic part of a compound assignment
        op: Option<BinaryOp>,
        /// Assigned location
        target: Box<Expr>,
        /// Assigned value
        value: Box<Expr>,
    },
    /// Comparison, of type `bool`
    Relational {
        /// Operator
        op: RelationalOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Unary `-`
    Negate(Box<Expr>),
    /// Unary `!`
    Not(Box<Expr>),
    /// `base[index]`
    Subscript {
        /// Vector or matrix
        base: Box<Expr>,
        /// Integer index
        index: Box<Expr>,
    },
    /// Function call
    Call {
        /// Called function
        function: FunctionId,
        /// Function name
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
    },
}

/// Literal values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    /// Integer literal
    Int(i32),
    /// Float literal
    Float(f32),
    /// `true` / `false`
    Bool(bool),
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalOp {
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `<`
    Less,
    /// `<=`
    LessEquals,
    /// `>`
    Greater,
    /// `>=`
    GreaterEquals,
}

impl Expr {
    /// True when the expression references no names
    pub fn is_constant(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Name(_) => false,
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Relational { lhs, rhs, .. } => {
                lhs.is_constant() && rhs.is_constant()
            }
            ExprKind::Assign { target, value, .. } => target.is_constant() && value.is_constant(),
            ExprKind::Negate(inner) | ExprKind::Not(inner) => inner.is_constant(),
            ExprKind::Subscript { base, index } => base.is_constant() && index.is_constant(),
            ExprKind::Call { args, .. } => args.iter().all(Expr::is_constant),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RelationalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationalOp::Equals => "==",
            RelationalOp::NotEquals => "!=",
            RelationalOp::Less => "<",
            RelationalOp::LessEquals => "<=",
            RelationalOp::Greater => ">",
            RelationalOp::GreaterEquals => ">=",
        };
        f.write_str(s)
    }
}
