//! Hand-written scanner turning source text into a flat token stream, in the
//! style of the token/span pairing used by other recursive-descent front
//! ends in this corpus: every token carries its own source position so the
//! parser never has to re-derive one for a diagnostic.

use crate::error::ConkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Integer(i64),
    Ident(String),

    Task,
    Loop,
    While,
    If,
    Else,
    Exit,
    True,
    False,
    Null,

    DollarOut,
    DollarIndex,

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,

    Assign,
    Arrow,    // ->
    LeftArrow, // <-
    Question,

    Plus,
    Minus,
    Star,
    Slash,

    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,

    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConkerError {
        ConkerError::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_all(&mut self) -> Result<Vec<Token>, ConkerError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.span();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: start,
                });
                break;
            };
            let kind = match c {
                '0'..='9' => self.lex_integer()?,
                c if is_ident_start(c) => self.lex_ident_or_keyword(),
                '$' => self.lex_magic()?,
                '{' => {
                    self.bump();
                    TokenKind::LBrace
                }
                '}' => {
                    self.bump();
                    TokenKind::RBrace
                }
                '(' => {
                    self.bump();
                    TokenKind::LParen
                }
                ')' => {
                    self.bump();
                    TokenKind::RParen
                }
                '[' => {
                    self.bump();
                    TokenKind::LBracket
                }
                ']' => {
                    self.bump();
                    TokenKind::RBracket
                }
                ';' => {
                    self.bump();
                    TokenKind::Semicolon
                }
                '?' => {
                    self.bump();
                    TokenKind::Question
                }
                '+' => {
                    self.bump();
                    TokenKind::Plus
                }
                '*' => {
                    self.bump();
                    TokenKind::Star
                }
                '/' => {
                    self.bump();
                    TokenKind::Slash
                }
                '-' => {
                    self.bump();
                    if self.peek() == Some('>') {
                        self.bump();
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('-') {
                        self.bump();
                        TokenKind::LeftArrow
                    } else if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '=' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::NotEq
                    } else {
                        return Err(self.error("unexpected character '!'"));
                    }
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            };
            tokens.push(Token { kind, span: start });
        }
        Ok(tokens)
    }

    fn lex_integer(&mut self) -> Result<TokenKind, ConkerError> {
        let start = self.span();
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        digits.parse::<i64>().map(TokenKind::Integer).map_err(|_| {
            ConkerError::Parse {
                line: start.line,
                column: start.column,
                message: format!("integer literal '{digits}' out of range"),
            }
        })
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match ident.as_str() {
            "task" => TokenKind::Task,
            "loop" => TokenKind::Loop,
            "while" => TokenKind::While,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "exit" => TokenKind::Exit,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(ident),
        }
    }

    fn lex_magic(&mut self) -> Result<TokenKind, ConkerError> {
        let start = self.span();
        self.bump(); // '$'
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match name.as_str() {
            "out" => Ok(TokenKind::DollarOut),
            "index" => Ok(TokenKind::DollarIndex),
            other => Err(ConkerError::Parse {
                line: start.line,
                column: start.column,
                message: format!("unknown magic endpoint '${other}'"),
            }),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn lex(source: &str) -> Result<Vec<Token>, ConkerError> {
    Lexer::new(source).lex_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_task_header() {
        assert_eq!(
            kinds("task Main {"),
            vec![
                TokenKind::Task,
                TokenKind::Ident("Main".to_string()),
                TokenKind::LBrace,
            ]
        );
    }

    #[test]
    fn lexes_send_and_receive_arrows() {
        assert_eq!(
            kinds("5 -> Other; x <- ?c;"),
            vec![
                TokenKind::Integer(5),
                TokenKind::Arrow,
                TokenKind::Ident("Other".to_string()),
                TokenKind::Semicolon,
                TokenKind::Ident("x".to_string()),
                TokenKind::LeftArrow,
                TokenKind::Question,
                TokenKind::Ident("c".to_string()),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn lexes_magic_endpoints() {
        assert_eq!(
            kinds("$out $index"),
            vec![TokenKind::DollarOut, TokenKind::DollarIndex]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("# a comment\ntask"),
            vec![TokenKind::Task]
        );
    }

    #[test]
    fn rejects_unknown_magic_name() {
        assert!(lex("$nope").is_err());
    }

    #[test]
    fn tracks_line_and_column_across_newlines() {
        let tokens = lex("task\nMain").unwrap();
        assert_eq!(tokens[1].span, Span { line: 2, column: 1 });
    }
}
