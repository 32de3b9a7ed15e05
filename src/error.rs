//! Error types for the shader compiler and its runtime objects

use thiserror::Error;

/// Shader compilation and execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Lexing
    /// No token definition matched the input
    ///
    /// **Triggered by:** Characters outside the language's alphabet
    /// **Example:** `int x = 3 @ 4;`
    #[error("{message}")]
    Lex {
        /// Line number where matching failed
        line: usize,
        /// Column number where matching failed
        column: usize,
        /// Error description
        message: String,
    },

    // Parsing and type checking
    /// Syntax or type error attached to a token
    ///
    /// **Triggered by:** Type mismatches, undefined symbols, redeclarations, malformed statements
    /// **Example:** `vec4 v; v = 1.0;` (Incompatible types for assignment 'vec4' and 'float')
    #[error("{message}")]
    Syntax {
        /// Line of the offending token
        line: usize,
        /// Column of the offending token
        column: usize,
        /// Error description
        message: String,
        /// Source excerpt with a caret under the offending column
        excerpt: String,
    },

    /// Input ended in the middle of a construct
    #[error("{message} at end of input")]
    UnexpectedEof {
        /// Error description
        message: String,
        /// Formatted message for display
        excerpt: String,
    },

    // Internal compiler gaps
    /// A declared type has no placement rule
    #[error("Layout error: {message}")]
    Layout {
        /// Error description
        message: String,
    },

    /// Code generator met a node shape it has no lowering rule for
    ///
    /// **Triggered by:** `while`/`for` loops, relational operators outside an `if` condition
    #[error("Malformed syntax tree: {message}")]
    MalformedTree {
        /// Error description
        message: String,
    },

    /// Construct is accepted by the parser but not lowered to machine code
    #[error("{feature} not implemented")]
    Unsupported {
        /// Feature name
        feature: String,
    },

    // Runtime object
    /// The shader has no exported `main`
    #[error("shader has no main() export")]
    MissingEntryPoint,

    /// Host referenced a global the shader does not declare
    #[error("Unknown global: {name}")]
    UnknownGlobal {
        /// Global name
        name: String,
    },

    /// Host value size differs from the global's type
    #[error("Type mismatch for global '{name}': expected {expected}, got {got}")]
    GlobalTypeMismatch {
        /// Global name
        name: String,
        /// Declared type of the global
        expected: String,
        /// Description of the host value
        got: String,
    },

    /// Host tried to read a global that only lives in a register
    #[error("Global '{name}' is register resident and cannot be read")]
    RegisterResidentGlobal {
        /// Global name
        name: String,
    },

    /// Executable memory could not be obtained or released
    #[error("Executable memory error: {message}")]
    ExecutableMemory {
        /// Error description
        message: String,
    },

    /// A token pattern failed to compile
    #[error("Invalid token pattern '{pattern}': {message}")]
    TokenPattern {
        /// Pattern source
        pattern: String,
        /// Error description
        message: String,
    },

    /// Invalid compile options document
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
    },
}

impl Error {
    /// Returns true for errors raised while parsing or type checking
    pub fn is_syntax(&self) -> bool {
        matches!(self, Error::Syntax { .. } | Error::UnexpectedEof { .. })
    }

    /// Formatted source excerpt for syntax errors
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Error::Syntax { excerpt, .. } | Error::UnexpectedEof { excerpt, .. } => Some(excerpt),
            _ => None,
        }
    }

    /// Create a malformed tree error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedTree {
            message: message.into(),
        }
    }
}

/// Result type for compiler and runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Formats a diagnostic around `line`/`column` (both 1-indexed).
///
/// Output is the previous line (when there is one), the offending line, a caret
/// line aligned to `column` followed by the message, and the next line if present.
pub fn format_excerpt(source: &str, line: usize, column: usize, message: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();

    if line == 0 || line > lines.len() {
        out.push_str(message);
        out.push('\n');
        return out;
    }

    if line > 1 {
        out.push_str(&format!("{:<6}{}\n", line - 1, lines[line - 2]));
    }

    let text = lines[line - 1];
    out.push_str(&format!("{:<6}{}\n", line, text));

    // keep tabs so the caret lines up with the source as displayed
    out.push_str("      ");
    for c in text.chars().take(column.saturating_sub(1)) {
        out.push(if c == '\t' { '\t' } else { ' ' });
    }
    out.push_str("^ ");
    out.push_str(message);
    out.push('\n');

    if let Some(next) = lines.get(line) {
        out.push('\n');
        out.push_str(&format!("{:<6}{}\n", line + 1, next));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_middle_line() {
        let source = "int a;\nint b = c;\nint d;";
        let excerpt = format_excerpt(source, 2, 9, "Undefined symbol 'c'");
        assert_eq!(
            excerpt,
            "1     int a;\n2     int b = c;\n              ^ Undefined symbol 'c'\n\n3     int d;\n"
        );
    }

    #[test]
    fn test_excerpt_first_line_has_no_previous() {
        let excerpt = format_excerpt("x;", 1, 1, "oops");
        assert_eq!(excerpt, "1     x;\n      ^ oops\n");
    }

    #[test]
    fn test_excerpt_preserves_tabs() {
        let excerpt = format_excerpt("\tfoo;", 1, 2, "bad");
        assert!(excerpt.contains("      \t^ bad"));
    }

    #[test]
    fn test_eof_display() {
        let err = Error::UnexpectedEof {
            message: "Unexpected end of input".to_string(),
            excerpt: String::new(),
        };
        assert_eq!(err.to_string(), "Unexpected end of input at end of input");
        assert!(err.is_syntax());
    }
}
