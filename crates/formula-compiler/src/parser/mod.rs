//! Formula text to [`ExpressionNode`] trees.
//!
//! The parser has no knowledge of the model: references come out as
//! [`NodeKind::Reference`](formula_model::NodeKind::Reference) nodes and are bound to cells later
//! (see [`crate::resolve`]). Named ranges are looked up through a [`NameResolver`].

mod lexer;

use formula_model::{
    BigDecimal, CellAddress, ExpressionNode, Function, Operator, RangeAddress, Reference,
    ReferenceDialect, Value,
};
use serde::{Deserialize, Serialize};

pub use lexer::{Token, TokenKind};

use crate::error::{ParseError, Span};
use lexer::Lexer;

const MAX_NESTING: usize = 256;

/// Binding power of unary prefix operators: tighter than `^`, looser than `%`.
const UNARY_BP: u8 = 55;
const PERCENT_BP: u8 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    pub dialect: ReferenceDialect,
    /// Address of the formula's own cell, for relative R1C1 references.
    pub origin: Option<CellAddress>,
}

impl ParseOptions {
    pub fn new(dialect: ReferenceDialect) -> Self {
        Self {
            dialect,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: CellAddress) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Lookup for named ranges used in formulas.
pub trait NameResolver {
    fn resolve_name(&self, name: &str) -> Option<Reference>;
}

/// Resolver that knows no names.
pub struct NoNames;

impl NameResolver for NoNames {
    fn resolve_name(&self, _name: &str) -> Option<Reference> {
        None
    }
}

pub fn parse_formula(formula: &str, opts: &ParseOptions) -> Result<ExpressionNode, ParseError> {
    parse_formula_with(formula, opts, &NoNames)
}

/// Parses `formula` (with or without a leading `=`).
pub fn parse_formula_with(
    formula: &str,
    opts: &ParseOptions,
    names: &dyn NameResolver,
) -> Result<ExpressionNode, ParseError> {
    let (body, offset) = match formula.strip_prefix('=') {
        Some(rest) => (rest, 1),
        None => (formula, 0),
    };
    let tokens = Lexer::new(body, opts.dialect, opts.origin.as_ref())
        .lex()
        .map_err(|e| reanchor(e, formula, offset))?;
    let mut parser = Parser::new(body, tokens, opts.dialect, names);
    let result = parser.parse_expression(0).and_then(|expr| {
        if matches!(parser.peek_kind(), TokenKind::Eof) {
            Ok(expr)
        } else {
            Err(parser.error("unexpected token"))
        }
    });
    result.map_err(|e| reanchor(e, formula, offset))
}

fn reanchor(err: ParseError, formula: &str, offset: usize) -> ParseError {
    ParseError {
        source: formula.to_string(),
        ..err.add_offset(offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Call,
    Group,
    Array,
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    dialect: ReferenceDialect,
    names: &'a dyn NameResolver,
    contexts: Vec<Context>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(
        src: &'a str,
        tokens: Vec<Token>,
        dialect: ReferenceDialect,
        names: &'a dyn NameResolver,
    ) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            dialect,
            names,
            contexts: Vec::new(),
            depth: 0,
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<ExpressionNode, ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("expression nesting exceeds {MAX_NESTING} levels")));
        }
        let result = self.parse_expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<ExpressionNode, ParseError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            if matches!(self.peek_kind(), TokenKind::Percent) && PERCENT_BP >= min_bp {
                self.next();
                lhs = ExpressionNode::op(Operator::Percent, vec![lhs]);
                continue;
            }

            let Some((op, consumes)) = self.peek_infix() else {
                break;
            };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            if consumes {
                self.next();
            }
            let rhs = self.parse_expression(r_bp)?;
            lhs = ExpressionNode::binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    /// The infix operator at the cursor, and whether it occupies a token (intersection doesn't).
    fn peek_infix(&self) -> Option<(Operator, bool)> {
        let token = &self.tokens[self.pos];
        let op = match &token.kind {
            TokenKind::Caret => Operator::Pow,
            TokenKind::Star => Operator::Mul,
            TokenKind::Slash => Operator::Div,
            TokenKind::Plus => Operator::Add,
            TokenKind::Minus => Operator::Sub,
            TokenKind::Amp => Operator::Concat,
            TokenKind::Eq => Operator::Eq,
            TokenKind::Ne => Operator::Ne,
            TokenKind::Lt => Operator::Lt,
            TokenKind::Gt => Operator::Gt,
            TokenKind::Le => Operator::Le,
            TokenKind::Ge => Operator::Ge,
            TokenKind::Ident(name) if name.eq_ignore_ascii_case("_min_") => Operator::Min,
            TokenKind::Ident(name) if name.eq_ignore_ascii_case("_max_") => Operator::Max,
            TokenKind::Tilde if self.dialect == ReferenceDialect::Odf => Operator::Union,
            TokenKind::Comma if self.dialect != ReferenceDialect::Odf && self.union_allowed() => {
                Operator::Union
            }
            kind if token.space_before && starts_primary(kind) => return Some((Operator::Intersect, false)),
            _ => return None,
        };
        Some((op, true))
    }

    /// `,` is a union only where it cannot separate arguments or array items.
    fn union_allowed(&self) -> bool {
        matches!(self.contexts.last(), None | Some(Context::Group))
    }

    fn parse_prefix(&mut self) -> Result<ExpressionNode, ParseError> {
        match self.peek_kind() {
            TokenKind::Plus => {
                // Unary plus is a no-op and leaves no node behind.
                self.next();
                self.parse_expression(UNARY_BP)
            }
            TokenKind::Minus => {
                self.next();
                let operand = self.parse_expression(UNARY_BP)?;
                Ok(ExpressionNode::op(Operator::Neg, vec![operand]))
            }
            TokenKind::At => {
                self.next();
                self.parse_expression(UNARY_BP)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<ExpressionNode, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Number(raw) => {
                self.next();
                let n: BigDecimal = raw
                    .parse()
                    .map_err(|_| self.error_at(self.pos - 1, "invalid number"))?;
                Ok(ExpressionNode::constant(Value::Number(n)))
            }
            TokenKind::String(s) => {
                self.next();
                Ok(ExpressionNode::constant(Value::Text(s)))
            }
            TokenKind::Error(code) => {
                self.next();
                if code == "#N/A" {
                    Ok(ExpressionNode::function(Function::Na, Vec::new()))
                } else {
                    Err(self.error_at(self.pos - 1, format!("unsupported error literal {code}")))
                }
            }
            TokenKind::Broken => {
                self.next();
                Ok(ExpressionNode::reference(Reference::Broken))
            }
            TokenKind::LParen => {
                self.next();
                self.contexts.push(Context::Group);
                let result = self
                    .parse_expression(0)
                    .and_then(|expr| self.expect(TokenKind::RParen).map(|()| expr));
                self.contexts.pop();
                result
            }
            TokenKind::LBrace => self.parse_array_literal(),
            TokenKind::Range(range) => {
                self.next();
                Ok(ExpressionNode::reference(Reference::Range(range)))
            }
            TokenKind::Cell(_) | TokenKind::Ident(_) | TokenKind::QuotedIdent(_) => {
                self.parse_reference_or_name_or_func()
            }
            _ => Err(self.error("unexpected token")),
        }
    }

    fn parse_reference_or_name_or_func(&mut self) -> Result<ExpressionNode, ParseError> {
        if let Some(sheets) = self.take_sheet_prefix()? {
            return self.parse_ref_after_prefix(Some(sheets));
        }
        match self.peek_kind().clone() {
            TokenKind::Cell(_) => self.parse_ref_after_prefix(None),
            TokenKind::Ident(name) => {
                let idx = self.pos;
                self.next();
                if matches!(self.peek_kind(), TokenKind::LParen) && !self.tokens[self.pos].space_before {
                    let Some(fun) = Function::from_name(&name) else {
                        return Err(self.error_at(idx, format!("unknown function `{name}`")));
                    };
                    return self.parse_function_call(fun);
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(ExpressionNode::constant(Value::boolean(true)));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(ExpressionNode::constant(Value::boolean(false)));
                }
                match self.names.resolve_name(&name) {
                    Some(reference) => Ok(ExpressionNode::reference(reference)),
                    None => Err(self.error_at(idx, format!("unknown name `{name}`"))),
                }
            }
            _ => Err(self.error("expected a reference")),
        }
    }

    /// Consumes `Sheet!` or `Sheet1:Sheet2!` if present.
    fn take_sheet_prefix(&mut self) -> Result<Option<(String, Option<String>)>, ParseError> {
        let start = self.pos;
        let Some(first) = self.sheet_name_at(start) else {
            return Ok(None);
        };
        let (second, bang) = match self.tokens.get(start + 1).map(|t| &t.kind) {
            Some(TokenKind::Bang) => (None, start + 1),
            Some(TokenKind::Colon) => match (
                self.sheet_name_at(start + 2),
                self.tokens.get(start + 3).map(|t| &t.kind),
            ) {
                (Some(second), Some(TokenKind::Bang)) => (Some(second), start + 3),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        if !matches!(
            self.dialect,
            ReferenceDialect::A1Sheets | ReferenceDialect::Ooxml
        ) {
            return Err(self.error_at(start, "sheet-qualified reference in a plain A1 formula"));
        }
        self.pos = bang + 1;
        Ok(Some((first, second)))
    }

    fn sheet_name_at(&self, pos: usize) -> Option<String> {
        let token = self.tokens.get(pos)?;
        match &token.kind {
            TokenKind::Ident(name) => Some(name.clone()),
            TokenKind::QuotedIdent(name) => Some(name.clone()),
            // A sheet named like a cell (`Q1!A1`).
            TokenKind::Cell(_) => Some(self.src[token.span.start..token.span.end].to_string()),
            _ => None,
        }
    }

    fn parse_ref_after_prefix(
        &mut self,
        sheets: Option<(String, Option<String>)>,
    ) -> Result<ExpressionNode, ParseError> {
        let (sheet, last_sheet) = match sheets {
            Some((first, second)) => (Some(first), second),
            None => (None, None),
        };
        let mut start = match self.peek_kind().clone() {
            TokenKind::Cell(cell) => {
                self.next();
                cell
            }
            TokenKind::Broken => {
                self.next();
                return Ok(ExpressionNode::reference(Reference::Broken));
            }
            _ => return Err(self.error("expected a cell reference")),
        };
        start.sheet = sheet.clone();
        let is_range = matches!(self.peek_kind(), TokenKind::Colon)
            && matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.kind),
                Some(TokenKind::Cell(_))
            );
        if !is_range {
            if let Some(last) = last_sheet {
                let mut end = start.clone();
                end.sheet = Some(last);
                return Ok(ExpressionNode::reference(Reference::Range(RangeAddress::new(
                    start, end,
                ))));
            }
            return Ok(ExpressionNode::reference(Reference::Cell(start)));
        }
        self.next();
        let TokenKind::Cell(mut end) = self.peek_kind().clone() else {
            return Err(self.error("expected a cell reference"));
        };
        self.next();
        end.sheet = last_sheet.or(sheet);
        Ok(ExpressionNode::reference(Reference::Range(RangeAddress::new(
            start, end,
        ))))
    }

    fn arg_separator(&self) -> TokenKind {
        if self.dialect == ReferenceDialect::Odf {
            TokenKind::Semicolon
        } else {
            TokenKind::Comma
        }
    }

    fn parse_function_call(&mut self, fun: Function) -> Result<ExpressionNode, ParseError> {
        self.expect(TokenKind::LParen)?;
        self.contexts.push(Context::Call);
        let result = self.parse_arguments();
        self.contexts.pop();
        let mut args = result?;
        // Trailing empty arguments are dropped; inner ones keep their position as nulls.
        while matches!(args.last(), Some(None)) {
            args.pop();
        }
        let args = args
            .into_iter()
            .map(|arg| arg.unwrap_or_else(ExpressionNode::null))
            .collect();
        Ok(ExpressionNode::function(fun, args))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Option<ExpressionNode>>, ParseError> {
        let sep = self.arg_separator();
        let mut args = Vec::new();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            let kind = self.peek_kind();
            if *kind == sep || matches!(kind, TokenKind::RParen) {
                args.push(None);
            } else {
                args.push(Some(self.parse_expression(0)?));
            }
            let kind = self.peek_kind();
            if *kind == sep {
                self.next();
                continue;
            }
            if matches!(kind, TokenKind::RParen) {
                self.next();
                return Ok(args);
            }
            return Err(self.error("expected argument separator or `)`"));
        }
    }

    fn parse_array_literal(&mut self) -> Result<ExpressionNode, ParseError> {
        let (col_sep, row_sep) = if self.dialect == ReferenceDialect::Odf {
            (TokenKind::Semicolon, TokenKind::Pipe)
        } else {
            (TokenKind::Comma, TokenKind::Semicolon)
        };
        let open = self.pos;
        self.expect(TokenKind::LBrace)?;
        self.contexts.push(Context::Array);
        let result = self.parse_array_rows(&col_sep, &row_sep);
        self.contexts.pop();
        let rows = result?;
        let cols = rows[0].len();
        if rows.iter().any(|r| r.len() != cols) {
            return Err(self.error_at(open, "array literal rows differ in length"));
        }
        let n_rows = rows.len() as u32;
        Ok(ExpressionNode::make_array(
            n_rows,
            cols as u32,
            rows.into_iter().flatten().collect(),
        ))
    }

    fn parse_array_rows(
        &mut self,
        col_sep: &TokenKind,
        row_sep: &TokenKind,
    ) -> Result<Vec<Vec<ExpressionNode>>, ParseError> {
        let mut rows: Vec<Vec<ExpressionNode>> = vec![Vec::new()];
        loop {
            let item = self.parse_expression(0)?;
            if let Some(row) = rows.last_mut() {
                row.push(item);
            }
            let kind = self.peek_kind().clone();
            if kind == *col_sep {
                self.next();
            } else if kind == *row_sep {
                self.next();
                rows.push(Vec::new());
            } else if kind == TokenKind::RBrace {
                self.next();
                return Ok(rows);
            } else {
                return Err(self.error("expected `}` in array literal"));
            }
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&kind) {
            self.next();
            Ok(())
        } else {
            Err(self.error(format!("expected {kind:?}")))
        }
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn next(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::new(self.src.len(), self.src.len()))
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.src, self.current_span())
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ParseError {
        let span = self
            .tokens
            .get(pos)
            .map(|t| t.span)
            .unwrap_or_else(|| self.current_span());
        ParseError::new(message, self.src, span)
    }
}

fn starts_primary(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Number(_)
            | TokenKind::String(_)
            | TokenKind::Cell(_)
            | TokenKind::Range(_)
            | TokenKind::Broken
            | TokenKind::Ident(_)
            | TokenKind::QuotedIdent(_)
            | TokenKind::LParen
            | TokenKind::LBrace
    )
}

/// Binding powers, loosest first: union, intersection, comparison, `&`, additive,
/// multiplicative, `^` (right associative), then the `_min_`/`_max_` operators.
fn infix_binding_power(op: Operator) -> (u8, u8) {
    match op {
        Operator::Union => (2, 3),
        Operator::Intersect => (4, 5),
        Operator::Eq | Operator::Ne | Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
            (10, 11)
        }
        Operator::Concat => (20, 21),
        Operator::Add | Operator::Sub => (30, 31),
        Operator::Mul | Operator::Div => (40, 41),
        Operator::Pow => (50, 50),
        Operator::Min | Operator::Max => (70, 71),
        Operator::Neg | Operator::Percent => (UNARY_BP, UNARY_BP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> String {
        parse_formula(src, &ParseOptions::default())
            .unwrap_or_else(|e| panic!("{src}: {e}"))
            .to_string()
    }

    #[test]
    fn percent_binds_to_its_immediate_operand() {
        assert_eq!(parse("3%^4"), "((3%) ^ 4)");
        assert_eq!(parse("3^4%"), "(3 ^ (4%))");
        assert_eq!(parse("-3%^-4"), "((-(3%)) ^ (-4))");
    }

    #[test]
    fn min_max_bind_tightest() {
        assert_eq!(parse("3 _max_ 4 = 5"), "((3 _max_ 4) = 5)");
        assert_eq!(parse("1 + 2 _min_ 3"), "(1 + (2 _min_ 3))");
    }

    #[test]
    fn errors_point_into_the_original_text() {
        let err = parse_formula("=1 + )", &ParseOptions::default()).unwrap_err();
        assert_eq!(err.source, "=1 + )");
        assert_eq!(err.offset(), 5);
    }

    #[test]
    fn unary_minus_binds_tighter_than_power() {
        assert_eq!(parse("-2^2"), "((-2) ^ 2)");
        assert_eq!(parse("--3"), "(-(-3))");
        assert_eq!(parse("+3"), "3");
        assert_eq!(parse("2^3^2"), "(2 ^ (3 ^ 2))");
    }

    #[test]
    fn missing_arguments() {
        assert_eq!(parse("IF(A1,,2)"), "IF(A1, null, 2)");
        assert_eq!(parse("ROUND(A1,)"), "ROUND(A1)");
        assert_eq!(parse("PI()"), "PI()");
    }

    #[test]
    fn union_and_intersection() {
        assert_eq!(parse("SUM((A1,B2))"), "SUM((A1, B2))");
        assert_eq!(parse("SUM(A1:B3 B2:C4)"), "SUM((A1:B3 B2:C4))");
        assert_eq!(parse("A1:B3 B2:C4,D1"), "((A1:B3 B2:C4), D1)");
        let odf = ParseOptions::new(ReferenceDialect::Odf);
        assert_eq!(
            parse_formula("SUM([.A1]~[.B2]; 1)", &odf).unwrap().to_string(),
            "SUM((A1, B2), 1)"
        );
    }

    #[test]
    fn array_literals() {
        assert_eq!(parse("{1,2;3,4}"), "{1, 2; 3, 4}");
        let odf = ParseOptions::new(ReferenceDialect::Odf);
        assert_eq!(
            parse_formula("{1;2|3;4}", &odf).unwrap().to_string(),
            "{1, 2; 3, 4}"
        );
        assert!(parse_formula("{1,2;3}", &ParseOptions::default()).is_err());
    }

    #[test]
    fn literals_and_error_values() {
        assert_eq!(parse("TRUE + FALSE"), "(1 + 0)");
        assert_eq!(parse("TRUE()"), "TRUE()");
        assert_eq!(parse("#N/A"), "NA()");
        assert_eq!(parse("\"a\"\"b\" & 1.50"), "(\"a\"\"b\" & 1.5)");
        assert!(parse_formula("#DIV/0!", &ParseOptions::default()).is_err());
        let ooxml = ParseOptions::new(ReferenceDialect::Ooxml);
        assert_eq!(
            parse_formula("#REF!+1", &ooxml).unwrap().to_string(),
            "(#REF! + 1)"
        );
    }

    #[test]
    fn sheet_prefixes_need_a_sheet_dialect() {
        let opts = ParseOptions::new(ReferenceDialect::A1Sheets);
        let expr = parse_formula("'My Sheet'!A1:B2 + Q1!C3", &opts).unwrap();
        assert_eq!(expr.to_string(), "('My Sheet'!A1:B2 + Q1!C3)");
        let span = parse_formula("Sheet1:Sheet3!A1", &opts).unwrap();
        assert_eq!(span.to_string(), "Sheet1:Sheet3!A1:A1");
        assert!(parse_formula("Sheet1!A1", &ParseOptions::default()).is_err());
    }

    #[test]
    fn names_go_through_the_resolver() {
        struct Rates;
        impl NameResolver for Rates {
            fn resolve_name(&self, name: &str) -> Option<Reference> {
                (name == "rate").then(|| Reference::Cell(CellAddress::new(0, 1)))
            }
        }
        let opts = ParseOptions::default();
        let expr = parse_formula_with("A1*rate", &opts, &Rates).unwrap();
        assert_eq!(expr.to_string(), "(A1 * B1)");
        let err = parse_formula_with("A1*rat", &opts, &Rates).unwrap_err();
        assert!(err.message.contains("rat"));
        assert!(parse_formula("FOO(1)", &opts).is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        let err = parse_formula(&src, &ParseOptions::default()).unwrap_err();
        assert!(err.message.contains("nesting"));
    }

    mod printing {
        use super::*;
        use proptest::prelude::*;

        fn formula() -> impl Strategy<Value = String> {
            let leaf = prop_oneof![
                (0u32..1000).prop_map(|n| n.to_string()),
                (0u32..50, 0u32..20).prop_map(|(r, c)| format!(
                    "{}{}",
                    formula_model::col_to_name(c),
                    r + 1
                )),
                "[a-z]{0,4}".prop_map(|s| format!("\"{s}\"")),
            ];
            leaf.prop_recursive(4, 32, 3, |inner| {
                prop_oneof![
                    (inner.clone(), "[-+*/^&<>=]", inner.clone())
                        .prop_map(|(a, op, b)| format!("{a}{op}{b}")),
                    inner.clone().prop_map(|a| format!("-{a}")),
                    inner.clone().prop_map(|a| format!("({a})%")),
                    prop::collection::vec(inner, 1..3)
                        .prop_map(|args| format!("SUM({})", args.join(","))),
                ]
            })
        }

        proptest! {
            #[test]
            fn printed_form_parses_back(src in formula()) {
                let opts = ParseOptions::default();
                let first = parse_formula(&src, &opts).unwrap();
                let second = parse_formula(&first.to_string(), &opts).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
