use formula_model::{name_to_col, CellAddress, RangeAddress, ReferenceDialect};

use crate::error::{ParseError, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Number(String),
    String(String),
    Cell(CellAddress),
    /// Complete range written as one token (ODF brackets).
    Range(RangeAddress),
    /// `#REF!`.
    Broken,
    Error(String),
    Ident(String),
    QuotedIdent(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Bang,
    Colon,
    Comma,
    Semicolon,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Percent,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    At,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Whitespace directly precedes this token (the intersection operator).
    pub space_before: bool,
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    idx: usize,
    dialect: ReferenceDialect,
    origin: Option<&'a CellAddress>,
    tokens: Vec<Token>,
    space_before: bool,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(
        src: &'a str,
        dialect: ReferenceDialect,
        origin: Option<&'a CellAddress>,
    ) -> Self {
        Self {
            src,
            chars: src.chars(),
            idx: 0,
            dialect,
            origin,
            tokens: Vec::new(),
            space_before: false,
        }
    }

    pub(crate) fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(ch) = self.peek_char() {
            let start = self.idx;
            if ch.is_whitespace() {
                self.bump();
                self.space_before = true;
                continue;
            }
            if ch.is_ascii_digit() || (ch == '.' && self.peek_next_is_digit()) {
                let raw = self.lex_number();
                self.push(TokenKind::Number(raw), start);
                continue;
            }
            match ch {
                '"' => {
                    let s = self.lex_quoted('"', "unterminated string literal")?;
                    self.push(TokenKind::String(s), start);
                }
                '\'' => {
                    let s = self.lex_quoted('\'', "unterminated quoted sheet name")?;
                    self.push(TokenKind::QuotedIdent(s), start);
                }
                '#' => {
                    let kind = self.lex_error_literal()?;
                    self.push(kind, start);
                }
                '[' if self.dialect == ReferenceDialect::Odf => {
                    let kind = self.lex_odf_reference()?;
                    self.push(kind, start);
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    let kind = self.lex_word()?;
                    self.push(kind, start);
                }
                _ => {
                    self.bump();
                    let kind = match ch {
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '{' => TokenKind::LBrace,
                        '}' => TokenKind::RBrace,
                        '!' => TokenKind::Bang,
                        ':' => TokenKind::Colon,
                        ',' => TokenKind::Comma,
                        ';' => TokenKind::Semicolon,
                        '|' => TokenKind::Pipe,
                        '~' => TokenKind::Tilde,
                        '+' => TokenKind::Plus,
                        '-' => TokenKind::Minus,
                        '*' => TokenKind::Star,
                        '/' => TokenKind::Slash,
                        '^' => TokenKind::Caret,
                        '&' => TokenKind::Amp,
                        '%' => TokenKind::Percent,
                        '@' => TokenKind::At,
                        '=' => TokenKind::Eq,
                        '<' => match self.peek_char() {
                            Some('>') => {
                                self.bump();
                                TokenKind::Ne
                            }
                            Some('=') => {
                                self.bump();
                                TokenKind::Le
                            }
                            _ => TokenKind::Lt,
                        },
                        '>' => match self.peek_char() {
                            Some('=') => {
                                self.bump();
                                TokenKind::Ge
                            }
                            _ => TokenKind::Gt,
                        },
                        other => {
                            return Err(self.error(format!("unexpected character `{other}`"), start));
                        }
                    };
                    self.push(kind, start);
                }
            }
        }
        let end = self.src.len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
            space_before: self.space_before,
        });
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.idx),
            space_before: std::mem::take(&mut self.space_before),
        });
    }

    fn error(&self, message: impl Into<String>, start: usize) -> ParseError {
        ParseError::new(message, self.src, Span::new(start, self.idx.max(start + 1)))
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        self.idx += ch.len_utf8();
        Some(ch)
    }

    fn rollback_to(&mut self, idx: usize) {
        self.idx = idx;
        self.chars = self.src[idx..].chars();
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek_next_is_digit(&self) -> bool {
        let mut iter = self.chars.clone();
        iter.next();
        matches!(iter.next(), Some(c) if c.is_ascii_digit())
    }

    fn take_while<F>(&mut self, mut pred: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut out = String::new();
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }
            self.bump();
            out.push(ch);
        }
        out
    }

    fn lex_number(&mut self) -> String {
        let mut raw = self.take_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.') {
            self.bump();
            raw.push('.');
            raw.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let mark = self.idx;
            self.bump();
            let mut exp = String::from("E");
            if let Some(sign @ ('+' | '-')) = self.peek_char() {
                self.bump();
                exp.push(sign);
            }
            let digits = self.take_while(|c| c.is_ascii_digit());
            if digits.is_empty() {
                self.rollback_to(mark);
            } else {
                raw.push_str(&exp);
                raw.push_str(&digits);
            }
        }
        raw
    }

    /// Quoted text where a doubled quote stands for one literal quote.
    fn lex_quoted(&mut self, quote: char, unterminated: &str) -> Result<String, ParseError> {
        let start = self.idx;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    if self.peek_char() == Some(quote) {
                        self.bump();
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => return Err(self.error(unterminated, start)),
            }
        }
    }

    fn lex_error_literal(&mut self) -> Result<TokenKind, ParseError> {
        const LITERALS: [&str; 7] = [
            "#DIV/0!", "#VALUE!", "#NAME?", "#NULL!", "#NUM!", "#N/A", "#REF!",
        ];
        let start = self.idx;
        let rest = &self.src[start..];
        let Some(lit) = LITERALS
            .iter()
            .find(|lit| {
                rest.get(..lit.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(lit))
            })
        else {
            self.bump();
            return Err(self.error("unknown error literal", start));
        };
        self.rollback_to(start + lit.len());
        if *lit == "#REF!" {
            if self.dialect != ReferenceDialect::Ooxml {
                return Err(self.error("broken reference outside OOXML formula", start));
            }
            return Ok(TokenKind::Broken);
        }
        Ok(TokenKind::Error(lit.to_string()))
    }

    fn lex_word(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.idx;
        let cell = match self.dialect {
            ReferenceDialect::R1C1 => self.try_lex_r1c1_cell()?,
            ReferenceDialect::Odf => None,
            _ => self.try_lex_a1_cell(),
        };
        if let Some(cell) = cell {
            return Ok(TokenKind::Cell(cell));
        }
        self.rollback_to(start);
        let word = self.take_while(is_ident_char);
        if word.is_empty() || word.starts_with('$') {
            self.bump();
            return Err(self.error("unexpected `$`", start));
        }
        Ok(TokenKind::Ident(word))
    }

    fn ends_reference(&self) -> bool {
        !matches!(self.peek_char(), Some(c) if is_ident_char(c) || c == '(')
    }

    fn try_lex_a1_cell(&mut self) -> Option<CellAddress> {
        let start = self.idx;
        let col_abs = self.peek_char() == Some('$');
        if col_abs {
            self.bump();
        }
        let letters = self.take_while(|c| c.is_ascii_alphabetic());
        if letters.is_empty() || letters.len() > 3 {
            return None;
        }
        let row_abs = self.peek_char() == Some('$');
        if row_abs {
            self.bump();
        }
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() || !self.ends_reference() {
            return None;
        }
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        let col = name_to_col(&letters)?;
        debug_assert!(self.idx > start);
        Some(CellAddress {
            sheet: None,
            row: row - 1,
            col,
            row_abs,
            col_abs,
        })
    }

    /// `R1C1`, `R[-1]C`, `RC[2]`. Bracketed offsets are relative to the origin cell.
    fn try_lex_r1c1_cell(&mut self) -> Result<Option<CellAddress>, ParseError> {
        let start = self.idx;
        if !matches!(self.bump(), Some('R' | 'r')) {
            return Ok(None);
        }
        let Some(row) = self.lex_r1c1_component() else {
            return Ok(None);
        };
        if !matches!(self.bump(), Some('C' | 'c')) {
            return Ok(None);
        }
        let Some(col) = self.lex_r1c1_component() else {
            return Ok(None);
        };
        if !self.ends_reference() {
            return Ok(None);
        }
        let resolve = |component: R1C1Component, base: Option<u32>| -> Option<(u32, bool)> {
            match component {
                R1C1Component::Absolute(n) => n.checked_sub(1).map(|v| (v, true)),
                R1C1Component::Offset(delta) => {
                    let base = i64::from(base?);
                    u32::try_from(base + delta).ok().map(|v| (v, false))
                }
            }
        };
        let base_row = self.origin.map(|o| o.row);
        let base_col = self.origin.map(|o| o.col);
        let relative = matches!(row, R1C1Component::Offset(_)) || matches!(col, R1C1Component::Offset(_));
        match (resolve(row, base_row), resolve(col, base_col)) {
            (Some((row, row_abs)), Some((col, col_abs))) => Ok(Some(CellAddress {
                sheet: None,
                row,
                col,
                row_abs,
                col_abs,
            })),
            _ if relative && self.origin.is_none() => Err(self.error(
                "relative R1C1 reference needs the address of the formula cell",
                start,
            )),
            _ => Err(self.error("R1C1 reference out of range", start)),
        }
    }

    fn lex_r1c1_component(&mut self) -> Option<R1C1Component> {
        match self.peek_char() {
            Some('[') => {
                self.bump();
                let negative = match self.peek_char() {
                    Some('-') => {
                        self.bump();
                        true
                    }
                    Some('+') => {
                        self.bump();
                        false
                    }
                    _ => false,
                };
                let digits = self.take_while(|c| c.is_ascii_digit());
                if self.bump() != Some(']') {
                    return None;
                }
                let value: i64 = digits.parse().ok()?;
                Some(R1C1Component::Offset(if negative { -value } else { value }))
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.take_while(|c| c.is_ascii_digit());
                digits.parse().ok().map(R1C1Component::Absolute)
            }
            _ => Some(R1C1Component::Offset(0)),
        }
    }

    /// `[.A1]`, `[.A1:.B2]`, `[Sheet1.A1:Sheet2.B2]`, `[$'My Sheet'.$A$1]`.
    fn lex_odf_reference(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.idx;
        self.bump();
        let mut inner = String::new();
        let mut in_quote = false;
        loop {
            match self.bump() {
                Some('\'') => {
                    in_quote = !in_quote;
                    inner.push('\'');
                }
                Some(']') if !in_quote => break,
                Some(c) => inner.push(c),
                None => return Err(self.error("unterminated ODF reference", start)),
            }
        }
        let mut parts = inner.splitn(2, ':');
        let first = parts.next().unwrap_or_default();
        let first = parse_odf_cell(first).ok_or_else(|| self.error("invalid ODF reference", start))?;
        match parts.next() {
            None => Ok(TokenKind::Cell(first)),
            Some(second) => {
                let mut second = parse_odf_cell(second)
                    .ok_or_else(|| self.error("invalid ODF reference", start))?;
                if second.sheet.is_none() {
                    second.sheet = first.sheet.clone();
                }
                Ok(TokenKind::Range(RangeAddress::new(first, second)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum R1C1Component {
    Absolute(u32),
    Offset(i64),
}

fn parse_odf_cell(raw: &str) -> Option<CellAddress> {
    let raw = raw.trim();
    let dot = raw.rfind('.')?;
    let (sheet, cell) = (&raw[..dot], &raw[dot + 1..]);
    let mut address = CellAddress::from_a1(cell)?;
    let sheet = sheet.trim_start_matches('$');
    if !sheet.is_empty() {
        let sheet = sheet
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .map(|s| s.replace("''", "'"))
            .unwrap_or_else(|| sheet.to_string());
        address.sheet = Some(sheet);
    }
    Some(address)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, dialect: ReferenceDialect) -> Vec<TokenKind> {
        Lexer::new(src, dialect, None)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn function_names_that_look_like_cells_stay_identifiers() {
        assert_eq!(
            kinds("LOG10(A1)", ReferenceDialect::A1),
            vec![
                TokenKind::Ident("LOG10".into()),
                TokenKind::LParen,
                TokenKind::Cell(CellAddress::new(0, 0)),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn odf_brackets_lex_as_one_token() {
        let toks = kinds("[Sheet1.A1:Sheet2.B1]", ReferenceDialect::Odf);
        let TokenKind::Range(range) = &toks[0] else {
            panic!("expected a range token, got {toks:?}");
        };
        assert_eq!(range.start.sheet.as_deref(), Some("Sheet1"));
        assert_eq!(range.end.sheet.as_deref(), Some("Sheet2"));
        assert_eq!(range.end.position(), (0, 1));
    }

    #[test]
    fn r1c1_needs_an_origin_for_offsets() {
        assert!(Lexer::new("R[1]C", ReferenceDialect::R1C1, None).lex().is_err());
        let origin = CellAddress::new(4, 4);
        let toks = Lexer::new("R[1]C[-2]+R1C1", ReferenceDialect::R1C1, Some(&origin))
            .lex()
            .unwrap();
        assert_eq!(toks[0].kind, TokenKind::Cell(CellAddress::new(5, 2)));
        assert_eq!(toks[2].kind, TokenKind::Cell(CellAddress::absolute(0, 0)));
    }

    #[test]
    fn whitespace_is_recorded_on_the_next_token() {
        let toks = Lexer::new("1 2", ReferenceDialect::A1, None).lex().unwrap();
        assert!(!toks[0].space_before);
        assert!(toks[1].space_before);
    }
}
