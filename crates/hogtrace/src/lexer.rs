//! Hand-written lexer for the HogTrace surface language (spec §4.1).
//!
//! There is no off-the-shelf grammar to delegate to here — unlike the
//! teacher, which hands Python source to `ruff_python_parser`, HogTrace's
//! surface language is small and bespoke, so tokenizing is a plain
//! character-by-character scan.

use crate::error::{Location, SyntaxError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Keywords
    KwFn,
    KwPy,
    KwEntry,
    KwExit,
    KwSample,
    KwCapture,
    KwSend,
    KwTrue,
    KwFalse,
    KwNone,

    // Punctuation
    Colon,
    Slash,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Semi,
    Assign,
    Percent,
    Plus,
    Minus,
    Star,
    Bang,
    Dollar,
    Pipe2,
    Amp2,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub at: Location,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenizes the entire input, returning tokens terminated by `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn here(&self) -> Location {
        Location::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.here();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => return Err(SyntaxError::new("unterminated block comment", start)),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia()?;
        let at = self.here();
        let Some(b) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                at,
            });
        };

        if b.is_ascii_digit() {
            return self.lex_number(at);
        }
        if b == b'"' || b == b'\'' {
            return self.lex_string(at, b);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return self.lex_ident(at);
        }

        self.advance();
        let kind = match b {
            b':' => TokenKind::Colon,
            b'/' => TokenKind::Slash,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b'%' => TokenKind::Percent,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'$' => TokenKind::Dollar,
            b'=' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::EqEq
            }
            b'=' => TokenKind::Assign,
            b'!' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::NotEq
            }
            b'!' => TokenKind::Bang,
            b'<' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::Le
            }
            b'<' => TokenKind::Lt,
            b'>' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::Ge
            }
            b'>' => TokenKind::Gt,
            b'|' if self.peek() == Some(b'|') => {
                self.advance();
                TokenKind::Pipe2
            }
            b'&' if self.peek() == Some(b'&') => {
                self.advance();
                TokenKind::Amp2
            }
            other => {
                return Err(SyntaxError::new(
                    format!("unexpected character '{}'", other as char),
                    at,
                ));
            }
        };
        Ok(Token { kind, at })
    }

    fn lex_number(&mut self, at: Location) -> Result<Token, SyntaxError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            let mut lookahead = self.pos + 1;
            if matches!(self.src.get(lookahead), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if self.src.get(lookahead).is_some_and(u8::is_ascii_digit) {
                is_float = true;
                while self.pos < lookahead {
                    self.advance();
                }
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                let _ = save;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits are valid utf8");
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| SyntaxError::new(format!("invalid float literal '{text}'"), at))?;
            Ok(Token {
                kind: TokenKind::Float(value),
                at,
            })
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| SyntaxError::new(format!("invalid integer literal '{text}'"), at))?;
            Ok(Token {
                kind: TokenKind::Int(value),
                at,
            })
        }
    }

    fn lex_string(&mut self, at: Location, quote: u8) -> Result<Token, SyntaxError> {
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(SyntaxError::new("unterminated string literal", at)),
                Some(b) if b == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(b'0') => out.push('\0'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'\'') => out.push('\''),
                    Some(b'"') => out.push('"'),
                    Some(other) => out.push(other as char),
                    None => return Err(SyntaxError::new("unterminated string escape", at)),
                },
                Some(b) => out.push(b as char),
            }
        }
        Ok(Token {
            kind: TokenKind::Str(out),
            at,
        })
    }

    fn lex_ident(&mut self, at: Location) -> Result<Token, SyntaxError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii ident is valid utf8");
        let kind = match text {
            "fn" => TokenKind::KwFn,
            "py" => TokenKind::KwPy,
            "entry" => TokenKind::KwEntry,
            "exit" => TokenKind::KwExit,
            "sample" => TokenKind::KwSample,
            "capture" => TokenKind::KwCapture,
            "send" => TokenKind::KwSend,
            "True" => TokenKind::KwTrue,
            "False" => TokenKind::KwFalse,
            "None" => TokenKind::KwNone,
            _ => TokenKind::Ident(text.to_owned()),
        };
        Ok(Token { kind, at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_probe_spec() {
        assert_eq!(
            kinds("fn:m.f:entry"),
            vec![
                TokenKind::KwFn,
                TokenKind::Colon,
                TokenKind::Ident("m".into()),
                TokenKind::Dot,
                TokenKind::Ident("f".into()),
                TokenKind::Colon,
                TokenKind::KwEntry,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42), TokenKind::Eof]);
        assert_eq!(kinds("3.5"), vec![TokenKind::Float(3.5), TokenKind::Eof]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Eof]);
    }

    #[test]
    fn lexes_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::Str("a\nb".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            kinds("# line\n/* block */ 1"),
            vec![TokenKind::Int(1), TokenKind::Eof]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
