//! Turns script source into tokens.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::{CompileError, ScriptPosition};

/// The longest script accepted, in bytes.
pub const MAX_SOURCE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(Decimal),
    Str(String),
    Ident(String),

    Let,
    If,
    Else,
    Return,
    True,
    False,
    Nil,
    Matches,
    Contains,

    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Dot,

    Assign,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,

    Eof,
}

impl TokenKind {
    /// How the token reads in error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(number) => format!("number {number}"),
            TokenKind::Str(_) => "string".to_owned(),
            TokenKind::Ident(name) => format!("\"{name}\""),
            TokenKind::Eof => "end of script".to_owned(),
            other => format!("\"{}\"", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Let => "let",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Return => "return",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Nil => "nil",
            TokenKind::Matches => "matches",
            TokenKind::Contains => "contains",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Assign => "=",
            TokenKind::Equal => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::Ident(_) | TokenKind::Eof => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: ScriptPosition,
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn position(&self) -> ScriptPosition {
        ScriptPosition::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let character = self.peek()?;
        self.index += 1;

        if character == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(character)
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match (self.peek(), self.peek_next()) {
                (Some(character), _) if character.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(character) = self.peek() {
                        if character == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn number(&mut self, start: ScriptPosition) -> Result<TokenKind, CompileError> {
        let mut text = String::new();

        while let Some(character) = self.peek() {
            if character.is_ascii_digit() {
                text.push(character);
                self.bump();
            } else if character == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
                text.push(character);
                self.bump();
            } else {
                break;
            }
        }

        Decimal::from_str(&text)
            .map(TokenKind::Number)
            .map_err(|_| CompileError::new(start, format!("number {text} is out of range")))
    }

    fn string(&mut self, start: ScriptPosition) -> Result<TokenKind, CompileError> {
        let mut text = String::new();

        loop {
            match self.bump() {
                None => return Err(CompileError::new(start, "unterminated string")),
                Some('"') => return Ok(TokenKind::Str(text)),
                Some('\\') => {
                    let escape_position = self.position();
                    match self.bump() {
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => {
                            return Err(CompileError::new(
                                escape_position,
                                format!("unknown escape \\{other}"),
                            ));
                        }
                        None => return Err(CompileError::new(start, "unterminated string")),
                    }
                }
                Some(character) => text.push(character),
            }
        }
    }

    fn identifier(&mut self) -> TokenKind {
        let mut name = String::new();

        while let Some(character) = self.peek() {
            if character.is_ascii_alphanumeric() || character == '_' {
                name.push(character);
                self.bump();
            } else {
                break;
            }
        }

        match name.as_str() {
            "let" => TokenKind::Let,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "matches" => TokenKind::Matches,
            "contains" => TokenKind::Contains,
            _ => TokenKind::Ident(name),
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments();
        let position = self.position();

        let Some(character) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position,
            });
        };

        let kind = if character.is_ascii_digit() {
            self.number(position)?
        } else if character.is_ascii_alphabetic() || character == '_' {
            self.identifier()
        } else {
            self.bump();
            match character {
                '"' => self.string(position)?,
                '(' => TokenKind::LeftParen,
                ')' => TokenKind::RightParen,
                '{' => TokenKind::LeftBrace,
                '}' => TokenKind::RightBrace,
                '[' => TokenKind::LeftBracket,
                ']' => TokenKind::RightBracket,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semicolon,
                '.' => TokenKind::Dot,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' if self.bump_if('=') => TokenKind::Equal,
                '=' => TokenKind::Assign,
                '!' if self.bump_if('=') => TokenKind::NotEqual,
                '!' => TokenKind::Bang,
                '<' if self.bump_if('=') => TokenKind::LessEqual,
                '<' => TokenKind::Less,
                '>' if self.bump_if('=') => TokenKind::GreaterEqual,
                '>' => TokenKind::Greater,
                '&' if self.bump_if('&') => TokenKind::AndAnd,
                '|' if self.bump_if('|') => TokenKind::OrOr,
                other => {
                    return Err(CompileError::new(
                        position,
                        format!("unexpected character '{other}'"),
                    ));
                }
            }
        };

        Ok(Token { kind, position })
    }
}

/// Split `source` into tokens, ending with [TokenKind::Eof].
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    if source.len() > MAX_SOURCE_LENGTH {
        return Err(CompileError::new(
            ScriptPosition::new(1, 1),
            format!("script is longer than {MAX_SOURCE_LENGTH} bytes"),
        ));
    }

    let mut lexer = Lexer {
        chars: source.chars().collect(),
        index: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);

        if done {
            return Ok(tokens);
        }
    }
}
