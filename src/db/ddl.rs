//! Minimal tokenizer for stored `CREATE TABLE` statements.
//!
//! Grammar covered:
//!
//! ```text
//! create   := CREATE [TEMP | TEMPORARY] TABLE [IF NOT EXISTS] name body options
//! name     := ident | ident "." ident
//! ident    := word | "quoted" | `quoted` | [quoted]
//! body     := "(" ... ")" | AS select
//! options  := [WITHOUT ROWID] [, STRICT] ...
//! ```
//!
//! String literals, quoted identifiers and comments are skipped as units so
//! keywords appearing inside them are never matched.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DdlError {
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },
    #[error("not a CREATE TABLE statement")]
    NotCreateTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare keyword, identifier or number
    Word(String),
    /// Quoted identifier with quotes removed
    Quoted(String),
    /// String literal with quotes removed
    Str(String),
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(w) | TokenKind::Quoted(w) => Some(w),
            _ => None,
        }
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>, DdlError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                match sql[i + 2..].find("*/") {
                    Some(end) => i = i + 2 + end + 2,
                    None => {
                        return Err(DdlError::Unterminated {
                            what: "comment",
                            offset: start,
                        })
                    }
                }
            }
            b'\'' => {
                let (text, end) = quoted(sql, i, b'\'', "string literal")?;
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    start: i,
                    end,
                });
                i = end;
            }
            b'"' | b'`' => {
                let (text, end) = quoted(sql, i, c, "quoted identifier")?;
                tokens.push(Token {
                    kind: TokenKind::Quoted(text),
                    start: i,
                    end,
                });
                i = end;
            }
            b'[' => {
                let start = i;
                let close = sql[i + 1..].find(']').ok_or(DdlError::Unterminated {
                    what: "bracketed identifier",
                    offset: start,
                })?;
                let end = i + 1 + close + 1;
                tokens.push(Token {
                    kind: TokenKind::Quoted(sql[i + 1..end - 1].to_string()),
                    start,
                    end,
                });
                i = end;
            }
            _ if c == b'_' || c.is_ascii_alphanumeric() || c >= 0x80 => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i] == b'_'
                        || bytes[i] == b'$'
                        || bytes[i].is_ascii_alphanumeric()
                        || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word(sql[start..i].to_string()),
                    start,
                    end: i,
                });
            }
            _ => {
                // Multi-byte chars are consumed by the word branch above
                tokens.push(Token {
                    kind: TokenKind::Punct(c as char),
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Read a quoted run where a doubled quote escapes itself
fn quoted(
    sql: &str,
    start: usize,
    quote: u8,
    what: &'static str,
) -> Result<(String, usize), DdlError> {
    let bytes = sql.as_bytes();
    let mut text = Vec::new();
    let mut i = start + 1;
    loop {
        match bytes.get(i) {
            None => return Err(DdlError::Unterminated { what, offset: start }),
            Some(&b) if b == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    text.push(quote);
                    i += 2;
                } else {
                    return Ok((String::from_utf8_lossy(&text).into_owned(), i + 1));
                }
            }
            Some(&b) => {
                text.push(b);
                i += 1;
            }
        }
    }
}

/// Token index range of the table name (`schema.name` counts as one name)
fn name_span(tokens: &[Token]) -> Result<(usize, usize), DdlError> {
    let mut idx = 0;
    let expect = |idx: usize, kw: &str| tokens.get(idx).map_or(false, |t| t.is_keyword(kw));

    if !expect(idx, "CREATE") {
        return Err(DdlError::NotCreateTable);
    }
    idx += 1;
    if expect(idx, "TEMP") || expect(idx, "TEMPORARY") {
        idx += 1;
    }
    if !expect(idx, "TABLE") {
        return Err(DdlError::NotCreateTable);
    }
    idx += 1;
    if expect(idx, "IF") && expect(idx + 1, "NOT") && expect(idx + 2, "EXISTS") {
        idx += 3;
    }

    if tokens.get(idx).and_then(Token::identifier).is_none() {
        return Err(DdlError::NotCreateTable);
    }
    let qualified = tokens.get(idx + 1).map_or(false, |t| t.is_punct('.'))
        && tokens
            .get(idx + 2)
            .and_then(Token::identifier)
            .is_some();
    if qualified {
        Ok((idx, idx + 2))
    } else {
        Ok((idx, idx))
    }
}

/// Name of the table a `CREATE TABLE` statement defines, without schema
pub fn table_name(sql: &str) -> Result<String, DdlError> {
    let tokens = tokenize(sql)?;
    let (_, last) = name_span(&tokens)?;
    tokens[last]
        .identifier()
        .map(str::to_string)
        .ok_or(DdlError::NotCreateTable)
}

/// Rewrite a `CREATE TABLE` statement so it defines `new_name` instead
pub fn with_table_name(sql: &str, new_name: &str) -> Result<String, DdlError> {
    let tokens = tokenize(sql)?;
    let (first, last) = name_span(&tokens)?;
    let start = tokens[first].start;
    let end = tokens[last].end;
    Ok(format!(
        "{}{}{}",
        &sql[..start],
        quote_ident(new_name),
        &sql[end..]
    ))
}

/// True when the statement declares an AUTOINCREMENT column
pub fn has_autoincrement(sql: &str) -> Result<bool, DdlError> {
    Ok(tokenize(sql)?
        .iter()
        .any(|t| t.is_keyword("AUTOINCREMENT")))
}

/// True when the table options after the column list include WITHOUT ROWID
pub fn is_without_rowid(sql: &str) -> Result<bool, DdlError> {
    let tokens = tokenize(sql)?;
    let mut depth = 0usize;
    let mut body_closed_at = None;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                body_closed_at = Some(i);
            }
        }
    }
    let Some(close) = body_closed_at else {
        return Ok(false);
    };
    let options = &tokens[close + 1..];
    Ok(options
        .windows(2)
        .any(|w| w[0].is_keyword("WITHOUT") && w[1].is_keyword("ROWID")))
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
