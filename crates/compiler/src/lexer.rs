//! Lexer for Mycelial source text
//!
//! Produces a flat token stream with source positions. Whitespace and
//! `#`-to-end-of-line comments separate tokens but are not emitted.
//! Two-character operators are matched greedily before their single-character
//! prefixes, so `->` never lexes as `-` `>` and `..` never as `.` `.`.

use std::fmt;

/// Language keywords. Reserved type names (`u8`, `vec`, `string`, ...) are
/// deliberately NOT keywords; they lex as identifiers and the parser gives
/// them meaning in type position.
pub const KEYWORDS: &[&str] = &[
    "network",
    "frequencies",
    "frequency",
    "hyphae",
    "hyphal",
    "state",
    "on",
    "signal",
    "emit",
    "report",
    "spawn",
    "die",
    "socket",
    "fruiting_body",
    "topology",
    "config",
    "if",
    "else",
    "where",
    "rest",
    "cycle",
    "when",
    "match",
    "as",
    "let",
    "for",
    "in",
    "while",
    "break",
    "continue",
    "return",
    "true",
    "false",
    "null",
    "fn",
    "struct",
    "enum",
    "types",
    "rule",
];

/// Width/sign tag attached to a numeric literal, e.g. `255u8` or `1.5f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericSuffix {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl NumericSuffix {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "u8" => Some(NumericSuffix::U8),
            "u16" => Some(NumericSuffix::U16),
            "u32" => Some(NumericSuffix::U32),
            "u64" => Some(NumericSuffix::U64),
            "i8" => Some(NumericSuffix::I8),
            "i16" => Some(NumericSuffix::I16),
            "i32" => Some(NumericSuffix::I32),
            "i64" => Some(NumericSuffix::I64),
            "f32" => Some(NumericSuffix::F32),
            "f64" => Some(NumericSuffix::F64),
            _ => None,
        }
    }

    /// True for the floating-point tags.
    pub fn is_float(self) -> bool {
        matches!(self, NumericSuffix::F32 | NumericSuffix::F64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword,
    Ident,
    /// Integer literal with decoded value and optional width tag
    Int { value: i64, suffix: Option<NumericSuffix> },
    /// Floating literal with decoded value and optional width tag
    Float { value: f64, suffix: Option<NumericSuffix> },
    /// String literal; the decoded (unescaped) contents
    Str(String),
    /// Character literal; the decoded character
    Char(char),
    /// Single-character punctuation: `{}()[],:.=+-*/%<>!@|&^`
    Punct,
    /// Multi-character operator: `-> == != <= >= && || :: << >> ..`
    Op,
}

/// A token with its exact source text and the position of its first
/// character. Lines and columns are 1-indexed for direct use in messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme,
            line,
            column,
        }
    }

    /// True if this token is the given keyword.
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.lexeme == kw
    }

    /// True if this token is the given single-character punctuation.
    pub fn is_punct(&self, p: char) -> bool {
        self.kind == TokenKind::Punct && self.lexeme.chars().next() == Some(p)
    }

    /// True if this token is the given multi-character operator.
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.lexeme == op
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.lexeme)
    }
}

const TWO_CHAR_OPS: &[&str] = &[
    "->", "==", "!=", "<=", ">=", "&&", "||", "::", "<<", ">>", "..",
];

const SINGLE_PUNCT: &str = "{}()[],:.=+-*/%<>!@|&^";

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

/// Tokenize Mycelial source text.
///
/// Fails with a positioned message on an unterminated string/char literal or
/// an unrecognized character.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
    }
    .run()
}

impl Lexer {
    fn run(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            if ch == '#' {
                self.skip_comment();
            } else if ch.is_whitespace() {
                self.bump();
            } else if ch == '"' {
                tokens.push(self.lex_string()?);
            } else if ch == '\'' {
                tokens.push(self.lex_char()?);
            } else if ch.is_ascii_digit() {
                tokens.push(self.lex_number()?);
            } else if ch.is_alphabetic() || ch == '_' {
                tokens.push(self.lex_word());
            } else if let Some(op) = self.try_two_char_op() {
                tokens.push(op);
            } else if SINGLE_PUNCT.contains(ch) {
                let (line, column) = (self.line, self.column);
                self.bump();
                tokens.push(Token::new(TokenKind::Punct, ch.to_string(), line, column));
            } else {
                return Err(format!(
                    "lex error at {}:{}: unrecognized character '{}'",
                    self.line, self.column, ch
                ));
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn try_two_char_op(&mut self) -> Option<Token> {
        let a = self.peek()?;
        let b = self.peek_at(1)?;
        let pair: String = [a, b].iter().collect();
        if TWO_CHAR_OPS.contains(&pair.as_str()) {
            let (line, column) = (self.line, self.column);
            self.bump();
            self.bump();
            Some(Token::new(TokenKind::Op, pair, line, column))
        } else {
            None
        }
    }

    fn lex_word(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let kind = if KEYWORDS.contains(&text.as_str()) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        };
        Token::new(kind, text, line, column)
    }

    fn lex_number(&mut self) -> Result<Token, String> {
        let (line, column) = (self.line, self.column);
        let mut lexeme = String::new();

        // Hex: 0x prefix, always an integer
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            lexeme.push(self.bump().unwrap());
            lexeme.push(self.bump().unwrap());
            let mut digits = String::new();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_hexdigit() {
                    digits.push(ch);
                    lexeme.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(format!(
                    "lex error at {}:{}: hex literal has no digits",
                    line, column
                ));
            }
            let value = i64::from_str_radix(&digits, 16).map_err(|_| {
                format!("lex error at {}:{}: hex literal out of range", line, column)
            })?;
            let suffix = self.lex_suffix(&mut lexeme, line, column)?;
            if suffix.is_some_and(NumericSuffix::is_float) {
                return Err(format!(
                    "lex error at {}:{}: float suffix on hex literal",
                    line, column
                ));
            }
            return Ok(Token::new(
                TokenKind::Int { value, suffix },
                lexeme,
                line,
                column,
            ));
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                lexeme.push(ch);
                self.bump();
            } else {
                break;
            }
        }

        // A fractional part only when `.` is followed by a digit; `1..5`
        // leaves the range operator intact.
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            lexeme.push(self.bump().unwrap());
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    lexeme.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        let numeric_text = lexeme.clone();
        let suffix = self.lex_suffix(&mut lexeme, line, column)?;
        if suffix.is_some_and(NumericSuffix::is_float) {
            is_float = true;
        }

        let kind = if is_float {
            let value: f64 = numeric_text
                .parse()
                .map_err(|_| format!("lex error at {}:{}: bad float literal", line, column))?;
            TokenKind::Float { value, suffix }
        } else {
            let value: i64 = numeric_text.parse().map_err(|_| {
                format!(
                    "lex error at {}:{}: integer literal out of range",
                    line, column
                )
            })?;
            TokenKind::Int { value, suffix }
        };
        Ok(Token::new(kind, lexeme, line, column))
    }

    /// A type suffix directly follows the digits: `5u32`, `3.5f64`. Any
    /// other trailing identifier characters are an error rather than a
    /// separate token, so `5uu` cannot silently lex as `5` `uu`.
    fn lex_suffix(
        &mut self,
        lexeme: &mut String,
        line: usize,
        column: usize,
    ) -> Result<Option<NumericSuffix>, String> {
        let mut tail = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                tail.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if tail.is_empty() {
            return Ok(None);
        }
        lexeme.push_str(&tail);
        match NumericSuffix::from_str(&tail) {
            Some(s) => Ok(Some(s)),
            None => Err(format!(
                "lex error at {}:{}: invalid numeric suffix '{}'",
                line, column, tail
            )),
        }
    }

    fn lex_string(&mut self) -> Result<Token, String> {
        let (line, column) = (self.line, self.column);
        let mut lexeme = String::new();
        let mut value = String::new();
        lexeme.push(self.bump().unwrap()); // opening quote
        loop {
            let Some(ch) = self.peek() else {
                return Err(format!(
                    "lex error at {}:{}: unterminated string literal",
                    line, column
                ));
            };
            if ch == '\n' {
                return Err(format!(
                    "lex error at {}:{}: unterminated string literal",
                    line, column
                ));
            }
            self.bump();
            lexeme.push(ch);
            if ch == '"' {
                break;
            }
            if ch == '\\' {
                let Some(esc) = self.bump() else {
                    return Err(format!(
                        "lex error at {}:{}: unterminated string literal",
                        line, column
                    ));
                };
                lexeme.push(esc);
                value.push(decode_escape(esc, line, column)?);
            } else {
                value.push(ch);
            }
        }
        Ok(Token::new(TokenKind::Str(value), lexeme, line, column))
    }

    fn lex_char(&mut self) -> Result<Token, String> {
        let (line, column) = (self.line, self.column);
        let mut lexeme = String::new();
        lexeme.push(self.bump().unwrap()); // opening quote
        let Some(ch) = self.bump() else {
            return Err(format!(
                "lex error at {}:{}: unterminated character literal",
                line, column
            ));
        };
        lexeme.push(ch);
        let value = if ch == '\\' {
            let Some(esc) = self.bump() else {
                return Err(format!(
                    "lex error at {}:{}: unterminated character literal",
                    line, column
                ));
            };
            lexeme.push(esc);
            decode_escape(esc, line, column)?
        } else {
            ch
        };
        match self.bump() {
            Some('\'') => {
                lexeme.push('\'');
                Ok(Token::new(TokenKind::Char(value), lexeme, line, column))
            }
            _ => Err(format!(
                "lex error at {}:{}: unterminated character literal",
                line, column
            )),
        }
    }
}

fn decode_escape(esc: char, line: usize, column: usize) -> Result<char, String> {
    match esc {
        'n' => Ok('\n'),
        't' => Ok('\t'),
        'r' => Ok('\r'),
        '"' => Ok('"'),
        '\'' => Ok('\''),
        '\\' => Ok('\\'),
        '0' => Ok('\0'),
        other => Err(format!(
            "lex error at {}:{}: unknown escape '\\{}'",
            line, column, other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).expect("tokenize failed")
    }

    #[test]
    fn test_lexeme_matches_source_slice() {
        // Every token's lexeme must be the exact source substring at its
        // reported position.
        let source = "network Demo {\n  frequency tick { v: u32 }\n}\n";
        let lines: Vec<&str> = source.lines().collect();
        for token in kinds(source) {
            let line = lines[token.line - 1];
            let start: usize = line
                .char_indices()
                .nth(token.column - 1)
                .map(|(i, _)| i)
                .unwrap();
            assert!(
                line[start..].starts_with(&token.lexeme),
                "lexeme {:?} not found at {}:{}",
                token.lexeme,
                token.line,
                token.column
            );
        }
    }

    #[test]
    fn test_keywords_vs_identifiers() {
        let tokens = kinds("network hyphal foo u32 string state");
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Keyword);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
        // Reserved type names lex as identifiers
        assert_eq!(tokens[3].kind, TokenKind::Ident);
        assert_eq!(tokens[4].kind, TokenKind::Ident);
        assert_eq!(tokens[5].kind, TokenKind::Keyword);
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 0x2A 7u8 3.25 1.5f32 9i64");
        assert_eq!(
            tokens[0].kind,
            TokenKind::Int {
                value: 42,
                suffix: None
            }
        );
        assert_eq!(
            tokens[1].kind,
            TokenKind::Int {
                value: 42,
                suffix: None
            }
        );
        assert_eq!(
            tokens[2].kind,
            TokenKind::Int {
                value: 7,
                suffix: Some(NumericSuffix::U8)
            }
        );
        assert_eq!(
            tokens[3].kind,
            TokenKind::Float {
                value: 3.25,
                suffix: None
            }
        );
        assert_eq!(
            tokens[4].kind,
            TokenKind::Float {
                value: 1.5,
                suffix: Some(NumericSuffix::F32)
            }
        );
        assert_eq!(
            tokens[5].kind,
            TokenKind::Int {
                value: 9,
                suffix: Some(NumericSuffix::I64)
            }
        );
    }

    #[test]
    fn test_range_does_not_eat_fraction() {
        let tokens = kinds("1..5");
        assert_eq!(tokens.len(), 3);
        assert!(tokens[1].is_op(".."));
    }

    #[test]
    fn test_two_char_ops_greedy() {
        let tokens = kinds("-> == != <= >= && || :: << >> ..");
        for token in &tokens {
            assert_eq!(token.kind, TokenKind::Op, "token {:?}", token.lexeme);
        }
        assert_eq!(tokens.len(), 11);
        // `<=` must not lex as `<` `=`
        let tokens = kinds("a<=b");
        assert!(tokens[1].is_op("<="));
    }

    #[test]
    fn test_string_escapes() {
        let tokens = kinds(r#""line\n\ttab \"quoted\"""#);
        match &tokens[0].kind {
            TokenKind::Str(value) => assert_eq!(value, "line\n\ttab \"quoted\""),
            other => panic!("expected string, got {:?}", other),
        }
        // Lexeme keeps the raw source spelling
        assert!(tokens[0].lexeme.starts_with('"'));
        assert!(tokens[0].lexeme.contains("\\n"));
    }

    #[test]
    fn test_char_literals() {
        let tokens = kinds(r"'a' '\n' '\0'");
        assert_eq!(tokens[0].kind, TokenKind::Char('a'));
        assert_eq!(tokens[1].kind, TokenKind::Char('\n'));
        assert_eq!(tokens[2].kind, TokenKind::Char('\0'));
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("a # trailing comment\nb");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_positions() {
        let tokens = kinds("ab cd\n  ef");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 4));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"oops").unwrap_err();
        assert!(err.contains("unterminated string"));
        assert!(err.contains("1:1"));
    }

    #[test]
    fn test_unrecognized_character() {
        let err = tokenize("a ` b").unwrap_err();
        assert!(err.contains("unrecognized character"));
        assert!(err.contains("1:3"));
    }

    #[test]
    fn test_bad_suffix_rejected() {
        let err = tokenize("5uu").unwrap_err();
        assert!(err.contains("invalid numeric suffix"));
    }
}
