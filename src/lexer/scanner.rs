use super::token::{Token, TokenKind};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// Pluggable matcher for tokens that are not fixed text
pub trait TokenMatcher: Send + Sync {
    /// Length in bytes of the match at the start of `input`, if any
    fn match_len(&self, input: &str) -> Option<usize>;
}

/// Matcher backed by an anchored regular expression
pub struct PatternMatcher {
    regex: Regex,
}

impl PatternMatcher {
    /// Builds a matcher from a pattern; the pattern is anchored at the start of input
    pub fn new(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(&format!("^(?:{})", pattern))?,
        })
    }
}

impl TokenMatcher for PatternMatcher {
    fn match_len(&self, input: &str) -> Option<usize> {
        self.regex.find(input).map(|m| m.end())
    }
}

struct LiteralDefinition {
    kind: TokenKind,
    text: &'static str,
    keyword: bool,
}

struct PatternDefinition {
    kind: TokenKind,
    matcher: Box<dyn TokenMatcher>,
}

/// Ordered token definitions: fixed literals first (longest first), then patterns in insertion order
#[derive(Default)]
pub struct TokenDefinitions {
    literals: Vec<LiteralDefinition>,
    patterns: Vec<PatternDefinition>,
}

impl TokenDefinitions {
    /// Empty definition set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed-text token. Alphabetic texts are keywords and need a word boundary.
    pub fn add_literal(&mut self, kind: TokenKind, text: &'static str) {
        let keyword = text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
        self.literals.push(LiteralDefinition {
            kind,
            text,
            keyword,
        });
        // stable, so equal lengths keep declaration order
        self.literals.sort_by(|a, b| b.text.len().cmp(&a.text.len()));
    }

    /// Adds a pattern token, tried after every literal
    pub fn add_pattern(&mut self, kind: TokenKind, matcher: Box<dyn TokenMatcher>) {
        self.patterns.push(PatternDefinition { kind, matcher });
    }

    /// Adds a regex pattern token
    pub fn add_regex(&mut self, kind: TokenKind, pattern: &str) -> Result<()> {
        let matcher = PatternMatcher::new(pattern).map_err(|e| Error::TokenPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        self.add_pattern(kind, Box::new(matcher));
        Ok(())
    }

    /// The shading language's token set
    pub fn shading_language() -> Result<Self> {
        let mut defs = Self::new();

        for (kind, text) in [
            (TokenKind::Int, "int"),
            (TokenKind::Float, "float"),
            (TokenKind::Bool, "bool"),
            (TokenKind::Void, "void"),
            (TokenKind::Vec3, "vec3"),
            (TokenKind::Vec4, "vec4"),
            (TokenKind::Mat3x3, "mat3x3"),
            (TokenKind::Mat4x4, "mat4x4"),
            (TokenKind::BoolLiteral, "true"),
            (TokenKind::BoolLiteral, "false"),
            (TokenKind::LogicalAnd, "&&"),
            (TokenKind::LogicalOr, "||"),
            (TokenKind::LogicalNot, "!"),
            (TokenKind::NotEquals, "!="),
            (TokenKind::Equals, "=="),
            (TokenKind::LessEquals, "<="),
            (TokenKind::GreaterEquals, ">="),
            (TokenKind::Less, "<"),
            (TokenKind::Greater, ">"),
            (TokenKind::Assign, "="),
            (TokenKind::Add, "+"),
            (TokenKind::AddAssign, "+="),
            (TokenKind::Subtract, "-"),
            (TokenKind::SubtractAssign, "-="),
            (TokenKind::Multiply, "*"),
            (TokenKind::MultiplyAssign, "*="),
            (TokenKind::Divide, "/"),
            (TokenKind::DivideAssign, "/="),
            (TokenKind::If, "if"),
            (TokenKind::Else, "else"),
            (TokenKind::Return, "return"),
            (TokenKind::For, "for"),
            (TokenKind::While, "while"),
            (TokenKind::Export, "export"),
            (TokenKind::Uniform, "uniform"),
            (TokenKind::Interpolated, "interpolated"),
            (TokenKind::SquareBracketLeft, "["),
            (TokenKind::SquareBracketRight, "]"),
            (TokenKind::RoundBracketLeft, "("),
            (TokenKind::RoundBracketRight, ")"),
            (TokenKind::CurlyBracketLeft, "{"),
            (TokenKind::CurlyBracketRight, "}"),
            (TokenKind::Comma, ","),
            (TokenKind::Semicolon, ";"),
        ] {
            defs.add_literal(kind, text);
        }

        for (kind, pattern) in [
            (TokenKind::FloatLiteral, r"[0-9]+\.[0-9]*|\.[0-9]+"),
            (TokenKind::IntLiteral, r"[0-9]+"),
            (TokenKind::Identifier, r"[A-Za-z_][A-Za-z0-9_]*"),
        ] {
            defs.add_regex(kind, pattern)?;
        }

        Ok(defs)
    }
}

lazy_static! {
    static ref SHADING_LANGUAGE: Result<TokenDefinitions> = TokenDefinitions::shading_language();
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scanner that turns shader source into tokens
pub struct Scanner<'d> {
    /// Source code
    source: String,
    /// Token definitions to match against
    definitions: Result<&'d TokenDefinitions>,
    /// Accumulated tokens
    tokens: Vec<Token>,
    /// Current byte position in source
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
}

impl Scanner<'static> {
    /// Creates a scanner using the shading language's token set
    pub fn new(source: &str) -> Self {
        Scanner {
            source: source.to_string(),
            definitions: SHADING_LANGUAGE.as_ref().map_err(Clone::clone),
            tokens: Vec::new(),
            current: 0,
            line: 1,
            column: 1,
        }
    }
}

impl<'d> Scanner<'d> {
    /// Creates a scanner with a custom definition set
    pub fn with_definitions(source: &str, definitions: &'d TokenDefinitions) -> Self {
        Scanner {
            source: source.to_string(),
            definitions: Ok(definitions),
            tokens: Vec::new(),
            current: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scans all tokens from source code and returns them as a vector
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>> {
        let definitions = self.definitions.clone()?;
        loop {
            self.skip_whitespace_and_comments();

            if self.is_at_end() {
                break;
            }

            self.scan_token(definitions)?;
        }

        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self, definitions: &TokenDefinitions) -> Result<()> {
        let rest = &self.source[self.current..];

        let mut matched: Option<(TokenKind, usize)> = None;

        for def in &definitions.literals {
            if !rest.starts_with(def.text) {
                continue;
            }
            if def.keyword
                && rest[def.text.len()..]
                    .chars()
                    .next()
                    .is_some_and(is_identifier_char)
            {
                continue;
            }
            matched = Some((def.kind, def.text.len()));
            break;
        }

        if matched.is_none() {
            for def in &definitions.patterns {
                if let Some(len) = def.matcher.match_len(rest) {
                    if len == 0 {
                        return Err(Error::Lex {
                            line: self.line,
                            column: self.column,
                            message: format!(
                                "Token definition {:?} did not advance stream at line {}, column {}",
                                def.kind, self.line, self.column
                            ),
                        });
                    }
                    matched = Some((def.kind, len));
                    break;
                }
            }
        }

        let Some((kind, len)) = matched else {
            return Err(Error::Lex {
                line: self.line,
                column: self.column,
                message: format!(
                    "Unable to match token at line {}, column {}",
                    self.line, self.column
                ),
            });
        };

        let lexeme = rest[..len].to_string();
        let token = Token::new(kind, lexeme, self.line, self.column);
        self.advance_by(len);
        self.tokens.push(token);

        Ok(())
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\r' | '\t' | '\n' => self.advance_by(1),
                '/' if self.source[self.current..].starts_with("//") => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance_by(c.len_utf8());
                    }
                }
                _ => break,
            }
        }
    }

    fn advance_by(&mut self, bytes: usize) {
        let end = self.current + bytes;
        for c in self.source[self.current..end].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.current = end;
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_longest_match_first() {
        assert_eq!(
            kinds("+= + <= < == ="),
            vec![
                TokenKind::AddAssign,
                TokenKind::Add,
                TokenKind::LessEquals,
                TokenKind::Less,
                TokenKind::Equals,
                TokenKind::Assign,
            ]
        );
    }

    #[test]
    fn test_keyword_boundary() {
        assert_eq!(kinds("intensity"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("int x"), vec![TokenKind::Int, TokenKind::Identifier]);
        assert_eq!(kinds("mat4x4"), vec![TokenKind::Mat4x4]);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds("1.5 42 .5 3. true"),
            vec![
                TokenKind::FloatLiteral,
                TokenKind::IntLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::BoolLiteral,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Scanner::new("int x;\n  x = 1;").scan_tokens().unwrap();
        let x = &tokens[3];
        assert_eq!(x.lexeme, "x");
        assert_eq!((x.line, x.column), (2, 3));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("x // trailing * stuff\n/ y"),
            vec![TokenKind::Identifier, TokenKind::Divide, TokenKind::Identifier]
        );
    }

    #[test]
    fn test_unmatched_character() {
        let err = Scanner::new("int x = 3 @ 4;").scan_tokens().unwrap_err();
        match err {
            Error::Lex { line, column, message } => {
                assert_eq!((line, column), (1, 11));
                assert_eq!(message, "Unable to match token at line 1, column 11");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    struct EmptyMatcher;

    impl TokenMatcher for EmptyMatcher {
        fn match_len(&self, _input: &str) -> Option<usize> {
            Some(0)
        }
    }

    #[test]
    fn test_invalid_pattern_reported() {
        let mut defs = TokenDefinitions::new();
        let err = defs.add_regex(TokenKind::Identifier, "[a-z").unwrap_err();
        assert!(matches!(err, Error::TokenPattern { ref pattern, .. } if pattern == "[a-z"));
        assert!(err.to_string().starts_with("Invalid token pattern '[a-z'"));
        assert!(TokenDefinitions::shading_language().is_ok());
    }

    #[test]
    fn test_zero_length_matcher_rejected() {
        let mut defs = TokenDefinitions::new();
        defs.add_pattern(TokenKind::Identifier, Box::new(EmptyMatcher));
        let err = Scanner::with_definitions("abc", &defs)
            .scan_tokens()
            .unwrap_err();
        assert!(err.to_string().contains("did not advance"));
    }
}
