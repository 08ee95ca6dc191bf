//! Positioned token stream over `sqlparser`'s tokenizer.
//!
//! `sqlparser` reports 1-based line/column locations counted in characters;
//! they are mapped back to byte offsets into the original text so segments
//! can be spliced. `end` is exclusive. Whitespace and comments are dropped.

use shardline_common::error::SqlError;
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Location, Token as SqlToken, Tokenizer, TokenizerError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Unquoted word: identifier or keyword, original case preserved.
    Word(String),
    /// `` `x` `` identifier, quotes stripped.
    QuotedIdent(String),
    Number(String),
    Str(String),
    /// `?` with its zero-based ordinal among all placeholders.
    Placeholder(usize),
    /// Single-character punctuation: `( ) , . ; * + - / %`.
    Symbol(char),
    /// Comparison operator: `= <> != < <= > >= <=>`.
    Op(String),
    /// Any other token, as written.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Inclusive index of the last byte of this token.
    pub fn stop(&self) -> usize {
        self.end - 1
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    pub fn is_symbol(&self, c: char) -> bool {
        matches!(self.kind, TokenKind::Symbol(s) if s == c)
    }

    pub fn is_op(&self, op: &str) -> bool {
        matches!(&self.kind, TokenKind::Op(o) if o == op)
    }

    /// Identifier text if this token can name a table or column.
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(w) | TokenKind::QuotedIdent(w) => Some(w.as_str()),
            _ => None,
        }
    }
}

/// Maps tokenizer locations to byte offsets.
struct OffsetIndex {
    /// Byte offset of every char, plus the text length as a sentinel.
    char_offsets: Vec<usize>,
    /// Char index at which each line starts.
    line_starts: Vec<usize>,
}

impl OffsetIndex {
    fn new(sql: &str) -> Self {
        let mut char_offsets = Vec::with_capacity(sql.len() + 1);
        let mut line_starts = vec![0];
        for (char_idx, (byte_idx, c)) in sql.char_indices().enumerate() {
            char_offsets.push(byte_idx);
            if c == '\n' {
                line_starts.push(char_idx + 1);
            }
        }
        char_offsets.push(sql.len());
        Self {
            char_offsets,
            line_starts,
        }
    }

    fn offset(&self, location: Location) -> usize {
        let sentinel = self.char_offsets.len() - 1;
        let line = (location.line as usize).saturating_sub(1);
        let column = (location.column as usize).saturating_sub(1);
        let Some(line_start) = self.line_starts.get(line) else {
            return self.char_offsets[sentinel];
        };
        self.char_offsets[(line_start + column).min(sentinel)]
    }
}

/// Tokenize `sql`. Returns the tokens and the number of placeholders.
pub fn tokenize(sql: &str) -> Result<(Vec<Token>, usize), SqlError> {
    let index = OffsetIndex::new(sql);
    let dialect = MySqlDialect {};
    let raw = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| tokenizer_error(&index, e))?;

    let mut tokens = Vec::with_capacity(raw.len());
    let mut placeholders = 0usize;
    for spanned in raw {
        let start = index.offset(spanned.span.start);
        let end = index.offset(spanned.span.end);
        let text = &sql[start..end];
        let kind = match spanned.token {
            SqlToken::Whitespace(_) | SqlToken::EOF => continue,
            SqlToken::Word(w) if w.quote_style.is_some() => TokenKind::QuotedIdent(w.value),
            SqlToken::Word(w) => TokenKind::Word(w.value),
            SqlToken::Number(n, _) => TokenKind::Number(n),
            SqlToken::SingleQuotedString(s) | SqlToken::DoubleQuotedString(s) => TokenKind::Str(s),
            SqlToken::Placeholder(p) if p == "?" => {
                placeholders += 1;
                TokenKind::Placeholder(placeholders - 1)
            }
            SqlToken::LParen => TokenKind::Symbol('('),
            SqlToken::RParen => TokenKind::Symbol(')'),
            SqlToken::Comma => TokenKind::Symbol(','),
            SqlToken::Period => TokenKind::Symbol('.'),
            SqlToken::SemiColon => TokenKind::Symbol(';'),
            SqlToken::Mul => TokenKind::Symbol('*'),
            SqlToken::Plus => TokenKind::Symbol('+'),
            SqlToken::Minus => TokenKind::Symbol('-'),
            SqlToken::Div => TokenKind::Symbol('/'),
            SqlToken::Mod => TokenKind::Symbol('%'),
            SqlToken::Eq
            | SqlToken::Neq
            | SqlToken::Lt
            | SqlToken::Gt
            | SqlToken::LtEq
            | SqlToken::GtEq
            | SqlToken::Spaceship => TokenKind::Op(text.to_string()),
            _ => TokenKind::Other(text.to_string()),
        };
        if end <= start {
            return Err(SqlError::Parse {
                position: start,
                message: format!("empty token '{}'", text),
            });
        }
        tokens.push(Token { kind, start, end });
    }

    Ok((tokens, placeholders))
}

fn tokenizer_error(index: &OffsetIndex, e: TokenizerError) -> SqlError {
    let position = index.offset(e.location);
    if e.message.starts_with("Unterminated string") {
        SqlError::Unterminated {
            what: "string literal",
            position,
        }
    } else {
        SqlError::Parse {
            position,
            message: e.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_and_kinds() {
        let (tokens, n) = tokenize("SELECT a FROM t WHERE id = ?").unwrap();
        assert_eq!(n, 1);
        assert_eq!(tokens[3].ident(), Some("t"));
        assert_eq!((tokens[3].start, tokens[3].end), (14, 15));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Placeholder(0));
    }

    #[test]
    fn test_escaped_quote_and_comments() {
        let (tokens, _) = tokenize("SELECT 'it''s' -- trailing\n/* block */ FROM t").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Str("it's".into()));
        assert_eq!((tokens[1].start, tokens[1].end), (7, 14));
        assert!(tokens[2].is_keyword("from"));
        assert_eq!(tokens[2].start, 39);
    }

    #[test]
    fn test_multibyte_text_maps_to_byte_offsets() {
        let sql = "SELECT 'é' FROM t_user";
        let (tokens, _) = tokenize(sql).unwrap();
        assert_eq!(&sql[tokens[1].start..tokens[1].end], "'é'");
        assert_eq!(&sql[tokens[3].start..tokens[3].end], "t_user");
    }

    #[test]
    fn test_placeholder_ordinals() {
        let (tokens, n) = tokenize("VALUES (?, ?, ?)").unwrap();
        assert_eq!(n, 3);
        let ordinals: Vec<usize> = tokens
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Placeholder(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_backtick_identifier() {
        let (tokens, _) = tokenize("SELECT * FROM `t_user`").unwrap();
        assert_eq!(tokens[3].kind, TokenKind::QuotedIdent("t_user".into()));
        assert_eq!((tokens[3].start, tokens[3].end), (14, 22));
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(matches!(
            tokenize("SELECT 'abc"),
            Err(SqlError::Unterminated { .. })
        ));
    }

    #[test]
    fn test_comparison_operators() {
        let (tokens, _) = tokenize("a<>b AND c>=1").unwrap();
        assert!(tokens[1].is_op("<>"));
        assert!(tokens[5].is_op(">="));
    }
}
