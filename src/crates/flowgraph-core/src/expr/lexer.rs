//! Tokenizer for the expression mini-language
//!
//! Produces a flat token stream with byte offsets so parse and evaluation
//! errors can point back into the source.

use crate::error::WorkflowError;

/// A single token with its byte offset into the source
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Eof,
}

impl TokenKind {
    /// Operator / punctuation spelling for error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string {:?}", s),
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::True => "'true'".into(),
            TokenKind::False => "'false'".into(),
            TokenKind::Null => "'null'".into(),
            TokenKind::Plus => "'+'".into(),
            TokenKind::Minus => "'-'".into(),
            TokenKind::Star => "'*'".into(),
            TokenKind::Slash => "'/'".into(),
            TokenKind::Percent => "'%'".into(),
            TokenKind::Bang => "'!'".into(),
            TokenKind::AndAnd => "'&&'".into(),
            TokenKind::OrOr => "'||'".into(),
            TokenKind::EqEq => "'=='".into(),
            TokenKind::NotEq => "'!='".into(),
            TokenKind::Lt => "'<'".into(),
            TokenKind::Le => "'<='".into(),
            TokenKind::Gt => "'>'".into(),
            TokenKind::Ge => "'>='".into(),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::LBracket => "'['".into(),
            TokenKind::RBracket => "']'".into(),
            TokenKind::Dot => "'.'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Eof => "end of expression".into(),
        }
    }
}

/// Tokenize the full source, appending a trailing [`TokenKind::Eof`]
pub fn tokenize(source: &str) -> Result<Vec<Token>, WorkflowError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];

        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'+' => {
                tokens.push(Token { kind: TokenKind::Plus, pos: start });
                i += 1;
            }
            b'-' => {
                tokens.push(Token { kind: TokenKind::Minus, pos: start });
                i += 1;
            }
            b'*' => {
                tokens.push(Token { kind: TokenKind::Star, pos: start });
                i += 1;
            }
            b'/' => {
                tokens.push(Token { kind: TokenKind::Slash, pos: start });
                i += 1;
            }
            b'%' => {
                tokens.push(Token { kind: TokenKind::Percent, pos: start });
                i += 1;
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, pos: start });
                i += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RParen, pos: start });
                i += 1;
            }
            b'[' => {
                tokens.push(Token { kind: TokenKind::LBracket, pos: start });
                i += 1;
            }
            b']' => {
                tokens.push(Token { kind: TokenKind::RBracket, pos: start });
                i += 1;
            }
            b'.' => {
                tokens.push(Token { kind: TokenKind::Dot, pos: start });
                i += 1;
            }
            b',' => {
                tokens.push(Token { kind: TokenKind::Comma, pos: start });
                i += 1;
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::NotEq, pos: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Bang, pos: start });
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::EqEq, pos: start });
                    i += 2;
                } else {
                    return Err(WorkflowError::eval_at("expected '==' (assignment is not supported)", start));
                }
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token { kind: TokenKind::AndAnd, pos: start });
                    i += 2;
                } else {
                    return Err(WorkflowError::eval_at("expected '&&'", start));
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token { kind: TokenKind::OrOr, pos: start });
                    i += 2;
                } else {
                    return Err(WorkflowError::eval_at("expected '||'", start));
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, pos: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, pos: start });
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, pos: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, pos: start });
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let (s, next) = lex_string(source, i)?;
                tokens.push(Token { kind: TokenKind::Str(s), pos: start });
                i = next;
            }
            b'0'..=b'9' => {
                let (n, next) = lex_number(source, i)?;
                tokens.push(Token { kind: TokenKind::Number(n), pos: start });
                i = next;
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let mut end = i + 1;
                while end < bytes.len()
                    && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric())
                {
                    end += 1;
                }
                let word = &source[i..end];
                let kind = match word {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, pos: start });
                i = end;
            }
            other => {
                return Err(WorkflowError::eval_at(
                    format!("unexpected character '{}'", other as char),
                    start,
                ));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: bytes.len(),
    });
    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), WorkflowError> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == b'\\' {
            match bytes.get(i + 1) {
                Some(b'n') => out.push('\n'),
                Some(b't') => out.push('\t'),
                Some(b'r') => out.push('\r'),
                Some(b'\\') => out.push('\\'),
                Some(b'"') => out.push('"'),
                Some(b'\'') => out.push('\''),
                Some(other) => {
                    return Err(WorkflowError::eval_at(
                        format!("unknown escape '\\{}'", *other as char),
                        i,
                    ))
                }
                None => break,
            }
            i += 2;
            continue;
        }
        // Copy whole UTF-8 sequences, not bytes.
        let ch_len = utf8_len(c);
        match source.get(i..i + ch_len) {
            Some(chunk) => out.push_str(chunk),
            None => return Err(WorkflowError::eval_at("invalid utf-8 in string", i)),
        }
        i += ch_len;
    }
    Err(WorkflowError::eval_at("unterminated string literal", start))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize), WorkflowError> {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).map(u8::is_ascii_digit).unwrap_or(false)
    {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    source[start..i]
        .parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| WorkflowError::eval_at("malformed number literal", start))
}
