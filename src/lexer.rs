use tracing::trace;

use crate::token::{Token, TokenKind};

/// Lazily turns source text into tokens.
///
/// Once the input is exhausted every further call to [`Lexer::next_token`]
/// yields an `Eof` token again. The `Iterator` impl stops after the first
/// `Eof` so the stream can be collected.
pub struct Lexer {
    input: String,
    position: usize,
    finished: bool,
}

/// Starts lexing `source`.
pub fn tokenize(source: &str) -> Lexer {
    Lexer::new(source)
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        Lexer {
            input: input.to_string(),
            position: 0,
            finished: false,
        }
    }

    fn get_one_char_token(ch: u8) -> Option<TokenKind> {
        let kind = match ch {
            b'=' => TokenKind::Assign,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'!' => TokenKind::Bang,
            b'*' => TokenKind::Asterisk,
            b'/' => TokenKind::Slash,
            b'>' => TokenKind::Gt,
            b'<' => TokenKind::Lt,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            _ => return None,
        };
        Some(kind)
    }

    fn get_two_char_token(first: u8, second: u8) -> Option<TokenKind> {
        let kind = match (first, second) {
            (b'=', b'=') => TokenKind::Eq,
            (b'!', b'=') => TokenKind::NotEq,
            _ => return None,
        };
        Some(kind)
    }

    /// Current byte, or 0 at end of input.
    fn ch(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_char(&self) -> u8 {
        self.peek_at(1)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.input
            .as_bytes()
            .get(self.position + offset)
            .copied()
            .unwrap_or(0)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.ch(), b' ' | b'\t' | b'\r' | b'\n') {
            self.position += 1;
        }
    }

    /// Advances past every byte matching `predicate`, returning where the run started.
    fn read_while(&mut self, predicate: fn(u8) -> bool) -> usize {
        let start = self.position;
        while !self.is_at_end() && predicate(self.ch()) {
            self.position += 1;
        }
        start
    }

    /// Emits a token for the next `len` bytes and moves past them.
    fn take_token(&mut self, kind: TokenKind, len: usize) -> Token {
        let token = Token::new(kind, &self.input[self.position..self.position + len]);
        self.position += len;
        token
    }

    pub fn next_token(&mut self) -> Token {
        let token = self.scan_token();
        trace!(kind = %token.kind, literal = %token.literal, "token");
        token
    }

    fn scan_token(&mut self) -> Token {
        self.skip_whitespace();

        if self.is_at_end() {
            return Token::eof();
        }

        let ch = self.ch();
        if let Some(kind) = Lexer::get_two_char_token(ch, self.peek_char()) {
            return self.take_token(kind, 2);
        }

        if let Some(kind) = Lexer::get_one_char_token(ch) {
            return self.take_token(kind, 1);
        }

        if is_letter(ch) {
            let start = self.read_while(is_letter);
            let word = &self.input[start..self.position];
            return Token::new(TokenKind::lookup_ident(word), word);
        }

        if ch.is_ascii_digit() {
            let start = self.read_while(|c| c.is_ascii_digit());
            return Token::new(TokenKind::Int, &self.input[start..self.position]);
        }

        if ch == b'"' {
            return self.read_string();
        }

        // Take the whole scalar so the cursor stays on a char boundary.
        let len = self.input[self.position..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        self.take_token(TokenKind::Illegal, len)
    }

    fn read_string(&mut self) -> Token {
        let open = self.position;
        self.position += 1;
        let start = self.read_while(|c| c != b'"');
        if self.is_at_end() {
            return Token::new(TokenKind::Illegal, &self.input[open..]);
        }
        let token = Token::new(TokenKind::String, &self.input[start..self.position]);
        // closing quote
        self.position += 1;
        token
    }
}

fn is_letter(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

impl Iterator for Lexer {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.is(TokenKind::Eof) {
            self.finished = true;
        }
        Some(token)
    }
}
