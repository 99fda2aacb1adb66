//! Database aggregates (`DSUM`, `DCOUNT`, ...).
//!
//! `Dxxx(database, field, criteria)` becomes a [`NodeKind::DatabaseFold`] over the data rows of
//! `database`. The filter is an OR over the criteria rows of an AND over their non-empty cells.
//! Criteria cells without a compile-time value are bound by enclosing `LET`s and compared for
//! equality.

use formula_model::{
    ArrayDescriptor, DataType, DatabaseFoldDef, ExpressionNode, FoldDef, Function, NodeKind,
    Operator, Value,
};

use super::rules::{bin, call, criterion_test, num, squared_deviation, var, variance, RewriteRules};
use super::RuleContext;
use crate::error::{CompilerError, CompilerResult};
use crate::eval::parse_criterion;

pub(super) fn register(rules: &mut RewriteRules) {
    rules
        .insert(Function::DSum, d_sum)
        .insert(Function::DCount, d_count)
        .insert(Function::DProduct, d_product)
        .insert(Function::DMin, d_min)
        .insert(Function::DMax, d_max)
        .insert(Function::DAverage, d_average)
        .insert(Function::DVarP, d_var_p)
        .insert(Function::DVar, d_var)
        .insert(Function::DStDevP, d_st_dev_p)
        .insert(Function::DStDev, d_st_dev);
}

/// A database argument split into its parts.
struct Table<'a> {
    labels: Vec<String>,
    rows: &'a [ExpressionNode],
}

fn unsupported(message: impl Into<String>) -> CompilerError {
    CompilerError::unsupported(message)
}

fn grid(node: &ExpressionNode, what: &str) -> CompilerResult<ArrayDescriptor> {
    match node.kind {
        NodeKind::Array(desc) | NodeKind::MakeArray(desc) if desc.cols > 0 => Ok(desc),
        _ => Err(unsupported(format!("{what} must be a rectangular range"))),
    }
}

fn labels(cx: &RuleContext<'_>, cells: &[ExpressionNode], what: &str) -> CompilerResult<Vec<String>> {
    cells
        .iter()
        .map(|cell| match cx.constant_of(cell) {
            Some(Value::Text(label)) => Ok(label),
            _ => Err(unsupported(format!("{what} labels must be constant text"))),
        })
        .collect()
}

fn table<'a>(cx: &RuleContext<'_>, database: &'a ExpressionNode) -> CompilerResult<Table<'a>> {
    let width = grid(database, "database")?.cols as usize;
    if database.args.len() < width {
        return Err(unsupported("database has no label row"));
    }
    let (head, rows) = database.args.split_at(width);
    Ok(Table {
        labels: labels(cx, head, "database")?,
        rows,
    })
}

fn position(labels: &[String], label: &str) -> Option<usize> {
    labels.iter().position(|l| l.eq_ignore_ascii_case(label))
}

impl Table<'_> {
    /// Types of the first data row; a band contributes one row of `width` cells.
    fn column_types(&self) -> Vec<DataType> {
        let width = self.labels.len();
        let first_row: Vec<&ExpressionNode> = match self.rows.first() {
            Some(band) if matches!(band.kind, NodeKind::SubSection(_)) => band.args.iter().collect(),
            _ => self.rows.iter().take(width).collect(),
        };
        (0..width)
            .map(|i| {
                first_row
                    .get(i)
                    .and_then(|node| node.data_type())
                    .unwrap_or(DataType::Numeric)
            })
            .collect()
    }

    fn field(&self, cx: &RuleContext<'_>, field: &ExpressionNode) -> CompilerResult<usize> {
        let found = match cx.constant_of(field) {
            Some(Value::Text(label)) => position(&self.labels, &label),
            Some(Value::Number(n)) => n
                .to_i64()
                .filter(|&i| n.is_integer() && i >= 1 && (i as usize) <= self.labels.len())
                .map(|i| i as usize - 1),
            _ => return Err(unsupported("database field must be a constant label or index")),
        };
        found.ok_or_else(|| unsupported("database field does not name a column"))
    }
}

/// A database fold ready to be assembled, with the `LET`s its filter needs.
struct Query {
    columns: Vec<String>,
    column_types: Vec<DataType>,
    folded: usize,
    filter: ExpressionNode,
    bindings: Vec<(String, ExpressionNode)>,
    rows: Vec<ExpressionNode>,
}

fn query(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Query> {
    let [database, field, criteria] = args else {
        return Err(unsupported("database functions take a database, a field and criteria"));
    };
    let table = table(cx, database)?;
    let folded = table.field(cx, field)?;
    let columns: Vec<String> = table.labels.iter().map(|_| cx.fresh("col")).collect();

    let criteria_width = grid(criteria, "criteria")?.cols as usize;
    if criteria.args.len() < criteria_width {
        return Err(unsupported("criteria have no label row"));
    }
    let (head, body) = criteria.args.split_at(criteria_width);
    let targets = labels(cx, head, "criteria")?
        .iter()
        .map(|label| {
            position(&table.labels, label)
                .ok_or_else(|| unsupported(format!("criteria column `{label}` is not in the database")))
        })
        .collect::<CompilerResult<Vec<usize>>>()?;

    let mut bindings = Vec::new();
    let mut alternatives = Vec::new();
    for row in body.chunks(criteria_width) {
        let mut tests = Vec::new();
        for (cell, &column) in row.iter().zip(&targets) {
            if matches!(cell.kind, NodeKind::SubSection(_)) {
                return Err(unsupported("criteria cannot span a repeating section"));
            }
            let subject = var(&columns[column]);
            match cx.constant_of(cell) {
                Some(value) => {
                    if let Some(criterion) = parse_criterion(&value) {
                        tests.push(criterion_test(&criterion, subject));
                    }
                }
                None => {
                    let name = cx.fresh("crit");
                    tests.push(bin(Operator::Eq, subject, var(&name)));
                    bindings.push((name, cell.clone()));
                }
            }
        }
        alternatives.push(
            tests
                .into_iter()
                .reduce(|a, b| bin(Operator::Min, a, b))
                .unwrap_or_else(|| num(1)),
        );
    }
    let filter = alternatives
        .into_iter()
        .reduce(|a, b| bin(Operator::Max, a, b))
        .unwrap_or_else(|| num(1));

    Ok(Query {
        column_types: table.column_types(),
        columns,
        folded,
        filter,
        bindings,
        rows: table.rows.to_vec(),
    })
}

impl Query {
    fn fold(
        self,
        cx: &mut RuleContext<'_>,
        seed: i64,
        def: fn(FoldDef) -> FoldDef,
        step: impl FnOnce(&str, &str) -> ExpressionNode,
    ) -> ExpressionNode {
        let acc = cx.fresh("acc");
        let elt = cx.fresh("xi");
        let step = step(&acc, &elt);
        let mut args = vec![num(seed), step, self.filter];
        args.extend(self.rows);
        let fold = ExpressionNode::new(
            NodeKind::DatabaseFold(DatabaseFoldDef {
                fold: def(FoldDef::new(acc, elt).numbers()),
                columns: self.columns,
                column_types: self.column_types,
                folded_column: self.folded,
            }),
            args,
        );
        self.bindings
            .into_iter()
            .rev()
            .fold(fold, |body, (name, value)| ExpressionNode::let_in(name, value, body))
    }
}

fn keep(def: FoldDef) -> FoldDef {
    def
}

fn d_sum(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let query = query(cx, args)?;
    Ok(Some(query.fold(cx, 0, keep, |acc, x| bin(Operator::Add, var(acc), var(x)))))
}

fn d_count(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let query = query(cx, args)?;
    Ok(Some(query.fold(cx, 0, keep, |acc, _| bin(Operator::Add, var(acc), num(1)))))
}

fn d_product(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let query = query(cx, args)?;
    Ok(Some(query.fold(cx, 0, FoldDef::from_first, |acc, x| {
        bin(Operator::Mul, var(acc), var(x))
    })))
}

fn d_min(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let query = query(cx, args)?;
    Ok(Some(query.fold(cx, 0, FoldDef::from_first, |acc, x| {
        bin(Operator::Min, var(acc), var(x))
    })))
}

fn d_max(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let query = query(cx, args)?;
    Ok(Some(query.fold(cx, 0, FoldDef::from_first, |acc, x| {
        bin(Operator::Max, var(acc), var(x))
    })))
}

fn d_average(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(bin(
        Operator::Div,
        call(Function::DSum, args.to_vec()),
        call(Function::DCount, args.to_vec()),
    )))
}

fn d_variance(
    cx: &mut RuleContext<'_>,
    args: &[ExpressionNode],
    sample: bool,
) -> CompilerResult<Option<ExpressionNode>> {
    let squares = query(cx, args)?;
    Ok(Some(variance(
        cx,
        call(Function::DCount, args.to_vec()),
        call(Function::DSum, args.to_vec()),
        move |cx, mean| squares.fold(cx, 0, keep, |acc, x| squared_deviation(acc, x, mean)),
        sample,
    )))
}

fn d_var_p(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    d_variance(cx, args, false)
}

fn d_var(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    d_variance(cx, args, true)
}

fn d_st_dev_p(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(call(Function::Sqrt, vec![call(Function::DVarP, args.to_vec())])))
}

fn d_st_dev(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(call(Function::Sqrt, vec![call(Function::DVar, args.to_vec())])))
}
