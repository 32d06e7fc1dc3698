//! Tokenizer for formula text.
//!
//! Identifiers may carry a `$` or `@` sigil, which is stripped.

use crate::error::{RatingError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offsets into the formula text
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),

    // Keywords
    Lookup,
    If,
    Then,
    Else,
    And,
    Or,
    Not,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];

        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;

        if ch.is_ascii_digit() || (ch == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let end = lex_number_end(bytes, pos);
            let text = &source[start..end];
            let value = text.replace('_', "").parse::<f64>().map_err(|_| RatingError::Parse {
                message: format!("malformed number '{}'", text),
                offset: start,
            })?;
            tokens.push(Token { kind: TokenKind::Number(value), start, end });
            pos = end;
            continue;
        }

        if ch == b'$' || ch == b'@' || ch.is_ascii_alphabetic() || ch == b'_' {
            let name_start = if ch == b'$' || ch == b'@' { pos + 1 } else { pos };
            let end = lex_ident_end(bytes, name_start);
            if end == name_start {
                return Err(RatingError::Parse {
                    message: format!("sigil '{}' is not followed by a name", ch as char),
                    offset: start,
                });
            }
            let word = &source[name_start..end];
            let kind = if name_start > pos {
                // Sigiled names are always variables, even when they spell a keyword
                TokenKind::Ident(word.to_string())
            } else {
                match word {
                    "lookup" => TokenKind::Lookup,
                    "if" => TokenKind::If,
                    "then" => TokenKind::Then,
                    "else" => TokenKind::Else,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    _ => TokenKind::Ident(word.to_string()),
                }
            };
            tokens.push(Token { kind, start, end });
            pos = end;
            continue;
        }

        if let Some(&next) = bytes.get(pos + 1) {
            let kind = match (ch, next) {
                (b'=', b'=') => Some(TokenKind::EqEq),
                (b'!', b'=') => Some(TokenKind::Ne),
                (b'<', b'=') => Some(TokenKind::Le),
                (b'>', b'=') => Some(TokenKind::Ge),
                (b'&', b'&') => Some(TokenKind::And),
                (b'|', b'|') => Some(TokenKind::Or),
                _ => None,
            };
            if let Some(kind) = kind {
                tokens.push(Token { kind, start, end: pos + 2 });
                pos += 2;
                continue;
            }
        }

        let kind = match ch {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'!' => TokenKind::Not,
            _ => {
                let c = source[pos..].chars().next().unwrap_or('?');
                return Err(RatingError::Parse {
                    message: format!("unexpected character '{}'", c),
                    offset: start,
                });
            }
        };
        tokens.push(Token { kind, start, end: pos + 1 });
        pos += 1;
    }

    Ok(tokens)
}

fn lex_number_end(bytes: &[u8], mut pos: usize) -> usize {
    let mut seen_dot = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'0'..=b'9' | b'_' => pos += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                pos += 1;
            }
            _ => break,
        }
    }
    pos
}

fn lex_ident_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
        pos += 1;
    }
    pos
}
