use std::collections::HashMap;
use std::sync::OnceLock;

use formula_model::{
    BigDecimal, ExpressionNode, FoldArrayDef, FoldDef, Function, NodeKind, Operator, Value,
};

use super::database;
use super::RuleContext;
use crate::error::CompilerResult;
use crate::eval::{parse_criterion, Criterion};

/// Expands a call with the given (already rewritten) arguments. `None` keeps the call as is.
pub type Rule = fn(&mut RuleContext<'_>, &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>>;

/// Read-only table of rewrite rules keyed by function.
#[derive(Clone, Default)]
pub struct RewriteRules {
    rules: HashMap<Function, Rule>,
}

impl std::fmt::Debug for RewriteRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.rules.keys().map(|fun| fun.name()).collect();
        names.sort_unstable();
        f.debug_struct("RewriteRules").field("functions", &names).finish()
    }
}

impl RewriteRules {
    /// A table without rules; calls stay native.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in rules, built once per process.
    pub fn standard() -> &'static RewriteRules {
        static STANDARD: OnceLock<RewriteRules> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let mut rules = RewriteRules::empty();
            rules.insert(Function::Sum, sum);
            rules.insert(Function::Product, product);
            rules.insert(Function::Min, min);
            rules.insert(Function::Max, max);
            rules.insert(Function::SumSq, sum_sq);
            rules.insert(Function::And, and);
            rules.insert(Function::Or, or);
            rules.insert(Function::Count, count);
            rules.insert(Function::Average, average);
            rules.insert(Function::VarP, var_p);
            rules.insert(Function::Var, var_s);
            rules.insert(Function::StDevP, st_dev_p);
            rules.insert(Function::StDev, st_dev);
            rules.insert(Function::Match, exact_match);
            rules.insert(Function::SumIf, sum_if);
            rules.insert(Function::CountIf, count_if);
            database::register(&mut rules);
            rules
        })
    }

    pub fn insert(&mut self, fun: Function, rule: Rule) -> &mut Self {
        self.rules.insert(fun, rule);
        self
    }

    pub fn get(&self, fun: Function) -> Option<Rule> {
        self.rules.get(&fun).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub(super) fn num(n: i64) -> ExpressionNode {
    ExpressionNode::constant(n)
}

pub(super) fn var(name: &str) -> ExpressionNode {
    ExpressionNode::var(name)
}

pub(super) fn bin(op: Operator, a: ExpressionNode, b: ExpressionNode) -> ExpressionNode {
    ExpressionNode::binary(op, a, b)
}

pub(super) fn call(fun: Function, args: Vec<ExpressionNode>) -> ExpressionNode {
    ExpressionNode::function(fun, args)
}

/// `FOLD(acc = seed; xi: step(acc, xi); elements)`.
fn fold_with(
    cx: &mut RuleContext<'_>,
    args: &[ExpressionNode],
    seed: ExpressionNode,
    def: fn(FoldDef) -> FoldDef,
    step: fn(ExpressionNode, ExpressionNode) -> ExpressionNode,
) -> ExpressionNode {
    let acc = cx.fresh("acc");
    let elt = cx.fresh("xi");
    ExpressionNode::fold(
        def(FoldDef::new(&acc, &elt)),
        seed,
        step(var(&acc), var(&elt)),
        args.to_vec(),
    )
}

fn sum(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(fold_with(
        cx,
        args,
        num(0),
        |def| def.commutative().numbers(),
        |acc, x| bin(Operator::Add, acc, x),
    )))
}

fn product(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(fold_with(
        cx,
        args,
        num(0),
        |def| def.from_first().commutative().numbers(),
        |acc, x| bin(Operator::Mul, acc, x),
    )))
}

fn min(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(fold_with(
        cx,
        args,
        num(0),
        |def| def.from_first().commutative().numbers(),
        |acc, x| bin(Operator::Min, acc, x),
    )))
}

fn max(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(fold_with(
        cx,
        args,
        num(0),
        |def| def.from_first().commutative().numbers(),
        |acc, x| bin(Operator::Max, acc, x),
    )))
}

fn sum_sq(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(fold_with(
        cx,
        args,
        num(0),
        |def| def.commutative().numbers(),
        |acc, x| bin(Operator::Add, acc, bin(Operator::Mul, x.clone(), x)),
    )))
}

/// `FOLD_FROM_FIRST(acc = VALUE("#VALUE!"); xi: (acc <> 0) op (xi <> 0); ..) <> 0`. Without a
/// single logical value the seed's `#VALUE!` is the result.
fn logical(
    cx: &mut RuleContext<'_>,
    args: &[ExpressionNode],
    step: fn(ExpressionNode, ExpressionNode) -> ExpressionNode,
) -> ExpressionNode {
    let no_values = call(Function::Value, vec![ExpressionNode::constant("#VALUE!")]);
    let fold = fold_with(
        cx,
        args,
        no_values,
        |def| def.from_first().commutative().logicals(),
        step,
    );
    bin(Operator::Ne, fold, num(0))
}

fn and(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(logical(cx, args, |acc, x| {
        bin(Operator::Min, bin(Operator::Ne, acc, num(0)), bin(Operator::Ne, x, num(0)))
    })))
}

fn or(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(logical(cx, args, |acc, x| {
        bin(Operator::Max, bin(Operator::Ne, acc, num(0)), bin(Operator::Ne, x, num(0)))
    })))
}

fn count(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(ExpressionNode::count(args.to_vec())))
}

fn average(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(bin(
        Operator::Div,
        call(Function::Sum, args.to_vec()),
        call(Function::Count, args.to_vec()),
    )))
}

/// `LET(n = COUNT(..); LET(m = SUM(..) / n; FOLD(acc = 0; xi: acc + (xi - m)^2; ..) / (n - k)))`.
///
/// Count and mean are computed once; the deviations take a single pass.
pub(super) fn variance(
    cx: &mut RuleContext<'_>,
    count: ExpressionNode,
    total: ExpressionNode,
    squares: impl FnOnce(&mut RuleContext<'_>, &str) -> ExpressionNode,
    sample: bool,
) -> ExpressionNode {
    let n = cx.fresh("n");
    let m = cx.fresh("m");
    let divisor = if sample {
        bin(Operator::Sub, var(&n), num(1))
    } else {
        var(&n)
    };
    ExpressionNode::let_in(
        &n,
        count,
        ExpressionNode::let_in(
            &m,
            bin(Operator::Div, total, var(&n)),
            bin(Operator::Div, squares(cx, &m), divisor),
        ),
    )
}

/// Fold step adding the squared deviation of `elt` from the mean bound to `mean`.
pub(super) fn squared_deviation(acc: &str, elt: &str, mean: &str) -> ExpressionNode {
    bin(
        Operator::Add,
        var(acc),
        bin(Operator::Pow, bin(Operator::Sub, var(elt), var(mean)), num(2)),
    )
}

fn variance_of(cx: &mut RuleContext<'_>, args: &[ExpressionNode], sample: bool) -> ExpressionNode {
    variance(
        cx,
        call(Function::Count, args.to_vec()),
        call(Function::Sum, args.to_vec()),
        |cx, mean| {
            let acc = cx.fresh("acc");
            let elt = cx.fresh("xi");
            let step = squared_deviation(&acc, &elt, mean);
            ExpressionNode::fold(FoldDef::new(acc, elt).numbers(), num(0), step, args.to_vec())
        },
        sample,
    )
}

fn var_p(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(variance_of(cx, args, false)))
}

fn var_s(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(variance_of(cx, args, true)))
}

fn st_dev_p(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(call(Function::Sqrt, vec![call(Function::VarP, args.to_vec())])))
}

fn st_dev(_: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    Ok(Some(call(Function::Sqrt, vec![call(Function::Var, args.to_vec())])))
}

/// `MATCH(value, array, 0)` becomes a positional fold that keeps the first matching index.
/// Other match types stay native.
fn exact_match(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let [value, array, match_type] = args else {
        return Ok(None);
    };
    let exact = cx
        .constant_of(match_type)
        .and_then(|v| v.as_number().map(BigDecimal::is_zero))
        .unwrap_or(false);
    if !exact {
        return Ok(None);
    }
    let v = cx.fresh("v");
    let found = cx.fresh("m");
    let acc = cx.fresh("acc");
    let elt = cx.fresh("xi");
    let index = cx.fresh("i");
    let step = call(
        Function::If,
        vec![
            bin(Operator::Eq, var(&acc), num(0)),
            call(
                Function::If,
                vec![bin(Operator::Eq, var(&elt), var(&v)), var(&index), num(0)],
            ),
            var(&acc),
        ],
    );
    let fold = fold_array(FoldDef::new(acc, elt), index, num(0), step, vec![array.clone()]);
    let result = call(
        Function::If,
        vec![
            bin(Operator::Eq, var(&found), num(0)),
            call(Function::Na, Vec::new()),
            var(&found),
        ],
    );
    Ok(Some(ExpressionNode::let_in(
        v,
        value.clone(),
        ExpressionNode::let_in(found, fold, result),
    )))
}

pub(super) fn fold_array(
    fold: FoldDef,
    index: String,
    seed: ExpressionNode,
    step: ExpressionNode,
    elements: Vec<ExpressionNode>,
) -> ExpressionNode {
    let mut args = vec![seed, step];
    args.extend(elements);
    ExpressionNode::new(NodeKind::FoldArray(FoldArrayDef { fold, index }), args)
}

/// Test of `subject` against a constant criterion. A number never matches text and vice
/// versa, except under `<>`.
pub(super) fn criterion_test(criterion: &Criterion, subject: ExpressionNode) -> ExpressionNode {
    let compare = bin(
        criterion.op,
        subject.clone(),
        ExpressionNode::constant(criterion.operand.clone()),
    );
    let kind_check = match &criterion.operand {
        Value::Number(_) => Function::IsNumber,
        Value::Text(t) if !t.is_empty() => Function::IsText,
        _ => return compare,
    };
    let mismatch = num(i64::from(criterion.op == Operator::Ne));
    call(
        Function::If,
        vec![call(kind_check, vec![subject]), compare, mismatch],
    )
}

/// Condition on `subject` for a `SUMIF`/`COUNTIF` criteria argument, plus the `LET` binding a
/// run-time criterion is lifted into. Run-time criteria compare for equality.
fn condition(
    cx: &mut RuleContext<'_>,
    criteria: &ExpressionNode,
    subject: ExpressionNode,
) -> (ExpressionNode, Option<(String, ExpressionNode)>) {
    match cx.constant_of(criteria) {
        Some(value) => match parse_criterion(&value) {
            Some(criterion) => (criterion_test(&criterion, subject), None),
            None => (num(1), None),
        },
        None => {
            let name = cx.fresh("crit");
            let test = bin(Operator::Eq, subject, var(&name));
            (test, Some((name, criteria.clone())))
        }
    }
}

fn wrap_let(binding: Option<(String, ExpressionNode)>, body: ExpressionNode) -> ExpressionNode {
    match binding {
        Some((name, value)) => ExpressionNode::let_in(name, value, body),
        None => body,
    }
}

/// `SUMIF(range, criteria[, sum_range])`. With a sum range, the element at the same
/// (row-major) position of the sum range is added.
fn sum_if(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let (range, criteria, sum_range) = match args {
        [range, criteria] => (range, criteria, None),
        [range, criteria, sum_range] => (range, criteria, Some(sum_range)),
        _ => return Ok(None),
    };
    let acc = cx.fresh("acc");
    let elt = cx.fresh("xi");
    let (test, binding) = condition(cx, criteria, var(&elt));
    let body = match sum_range {
        None => {
            let step = call(
                Function::If,
                vec![
                    test,
                    bin(Operator::Add, var(&acc), call(Function::N, vec![var(&elt)])),
                    var(&acc),
                ],
            );
            ExpressionNode::fold(FoldDef::new(acc, elt).commutative(), num(0), step, vec![range.clone()])
        }
        Some(sum_range) => {
            let values = cx.fresh("s");
            let index = cx.fresh("i");
            let addend = call(
                Function::N,
                vec![call(Function::Index, vec![var(&values), var(&index)])],
            );
            let step = call(
                Function::If,
                vec![test, bin(Operator::Add, var(&acc), addend), var(&acc)],
            );
            ExpressionNode::let_in(
                values,
                sum_range.clone(),
                fold_array(FoldDef::new(acc, elt), index, num(0), step, vec![range.clone()]),
            )
        }
    };
    Ok(Some(wrap_let(binding, body)))
}

fn count_if(cx: &mut RuleContext<'_>, args: &[ExpressionNode]) -> CompilerResult<Option<ExpressionNode>> {
    let [range, criteria] = args else {
        return Ok(None);
    };
    let acc = cx.fresh("acc");
    let elt = cx.fresh("xi");
    let index = cx.fresh("i");
    let (test, binding) = condition(cx, criteria, var(&elt));
    let step = call(
        Function::If,
        vec![test, bin(Operator::Add, var(&acc), num(1)), var(&acc)],
    );
    let body = fold_array(FoldDef::new(acc, elt), index, num(0), step, vec![range.clone()]);
    Ok(Some(wrap_let(binding, body)))
}
