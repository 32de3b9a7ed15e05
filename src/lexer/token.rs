use serde::{Deserialize, Serialize};

/// A single token from the shader source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Original text of the token
    pub lexeme: String,
    /// Line number where token appears (1-indexed)
    pub line: usize,
    /// Column number where token starts (1-indexed)
    pub column: usize,
}

impl Token {
    /// Creates a new token with the given properties
    pub fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

/// All token types of the shading language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Type keywords
    /// `void`
    Void,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `bool`
    Bool,
    /// `vec3`
    Vec3,
    /// `vec4`
    Vec4,
    /// `mat3x3`
    Mat3x3,
    /// `mat4x4`
    Mat4x4,

    // Decorators
    /// `export`
    Export,
    /// `uniform`
    Uniform,
    /// `interpolated`
    Interpolated,

    // Control
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `for`
    For,
    /// `return`
    Return,

    // Operators
    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubtractAssign,
    /// `*=`
    MultiplyAssign,
    /// `/=`
    DivideAssign,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
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
    /// `!`
    LogicalNot,
    /// `&&`
    LogicalAnd,
    /// `||`
    LogicalOr,

    // Punctuation
    /// `[`
    SquareBracketLeft,
    /// `]`
    SquareBracketRight,
    /// `(`
    RoundBracketLeft,
    /// `)`
    RoundBracketRight,
    /// `{`
    CurlyBracketLeft,
    /// `}`
    CurlyBracketRight,
    /// `,`
    Comma,
    /// `;`
    Semicolon,

    // Literals and names
    /// `true` or `false`
    BoolLiteral,
    /// Digits with a decimal point
    FloatLiteral,
    /// Digits
    IntLiteral,
    /// Letter or underscore followed by alphanumerics
    Identifier,
}

impl TokenKind {
    /// Returns true for the type keywords
    pub fn is_type(self) -> bool {
        matches!(
            self,
            TokenKind::Void
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Bool
                | TokenKind::Vec3
                | TokenKind::Vec4
                | TokenKind::Mat3x3
                | TokenKind::Mat4x4
        )
    }

    /// Returns true for literal tokens
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::BoolLiteral | TokenKind::FloatLiteral | TokenKind::IntLiteral
        )
    }

    /// Returns true for the declaration decorators
    pub fn is_decorator(self) -> bool {
        matches!(
            self,
            TokenKind::Export | TokenKind::Uniform | TokenKind::Interpolated
        )
    }
}
