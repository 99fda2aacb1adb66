use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{CellId, DataType, Function, Reference, SectionId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// Unary minus.
    Neg,
    /// Postfix `%`.
    Percent,
    /// `_min_` infix.
    Min,
    /// `_max_` infix.
    Max,
    /// Range union (`,` inside parentheses, `;` in ODF).
    Union,
    /// Range intersection (whitespace between references).
    Intersect,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub | Operator::Neg => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "^",
            Operator::Concat => "&",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Percent => "%",
            Operator::Min => "_min_",
            Operator::Max => "_max_",
            Operator::Union => ",",
            Operator::Intersect => " ",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Neg | Operator::Percent)
    }
}

/// Shape of an array or range: elements are stored row-major in the node's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub rows: u32,
    pub cols: u32,
}

impl ArrayDescriptor {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which evaluated elements a fold visits.
///
/// Empty values are never visited. The stricter filters read arguments the way spreadsheet
/// aggregates do: items of a range or array count only when they are numbers, while a value
/// passed directly must convert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoldFilter {
    #[default]
    NonEmpty,
    /// Direct text arguments are parsed as numbers; unparsable text is `#VALUE!`.
    Numbers,
    /// Direct arguments become 1 or 0 by truth value (`"TRUE"` and `"FALSE"` text included).
    Logicals,
}

impl FoldFilter {
    pub fn is_numeric(self) -> bool {
        self != FoldFilter::NonEmpty
    }
}

/// Reduction with an accumulator. Arguments: `[seed, step, elements...]`.
///
/// The step sees the accumulator bound to `acc` and the current element bound to `elt`. With
/// `from_first` the first element becomes the initial accumulator and the seed is only used when
/// there are no elements at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FoldDef {
    pub acc: String,
    pub elt: String,
    pub from_first: bool,
    /// The step is commutative and associative, so elements may be combined in any order
    /// (and constant elements pre-combined at compile time).
    pub commutative: bool,
    #[serde(default)]
    pub filter: FoldFilter,
}

impl FoldDef {
    pub fn new(acc: impl Into<String>, elt: impl Into<String>) -> Self {
        Self {
            acc: acc.into(),
            elt: elt.into(),
            from_first: false,
            commutative: false,
            filter: FoldFilter::NonEmpty,
        }
    }

    pub fn from_first(mut self) -> Self {
        self.from_first = true;
        self
    }

    pub fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }

    pub fn numbers(mut self) -> Self {
        self.filter = FoldFilter::Numbers;
        self
    }

    pub fn logicals(mut self) -> Self {
        self.filter = FoldFilter::Logicals;
        self
    }
}

/// A fold that also binds the 1-based position of each element to `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FoldArrayDef {
    pub fold: FoldDef,
    pub index: String,
}

/// A fold over the rows of a table that pass a filter.
///
/// Arguments: `[seed, step, filter, rows...]`. Each data row contributes `columns.len()`
/// consecutive elements (or one `SubSection` node yielding that many per runtime row). The filter
/// sees every column bound to its name in `columns`; the step folds column `folded_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseFoldDef {
    pub fold: FoldDef,
    pub columns: Vec<String>,
    pub column_types: Vec<DataType>,
    pub folded_column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Constant(Value),
    Operator(Operator),
    Function(Function),
    /// A reference straight from the parser, not yet bound to model cells.
    Reference(Reference),
    CellRef(CellId),
    /// Range of cells (or constants) with a fixed shape.
    Array(ArrayDescriptor),
    /// Array built from computed elements, such as an array literal.
    MakeArray(ArrayDescriptor),
    /// Evaluates its single argument in the enclosing frame of the given (inner) section.
    ParentSection(SectionId),
    /// Evaluates its arguments once per runtime row of the given sub-section.
    SubSection(SectionId),
    /// `[value, body]` with the name bound to `value` inside `body`.
    Let(String),
    LetVar(String),
    Fold(FoldDef),
    FoldArray(FoldArrayDef),
    DatabaseFold(DatabaseFoldDef),
    /// Number of numeric elements among the arguments.
    Count,
}

/// Node of the expression tree. Each node owns its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub kind: NodeKind,
    pub args: Vec<ExpressionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type: Option<DataType>,
}

impl PartialEq for ExpressionNode {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.args == other.args
    }
}

impl ExpressionNode {
    pub fn new(kind: NodeKind, args: Vec<ExpressionNode>) -> Self {
        Self {
            kind,
            args,
            data_type: None,
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let data_type = value.data_type();
        Self {
            kind: NodeKind::Constant(value),
            args: Vec::new(),
            data_type: Some(data_type),
        }
    }

    pub fn null() -> Self {
        Self::constant(Value::Null)
    }

    pub fn op(op: Operator, args: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::Operator(op), args)
    }

    pub fn binary(op: Operator, left: ExpressionNode, right: ExpressionNode) -> Self {
        Self::op(op, vec![left, right])
    }

    pub fn function(fun: Function, args: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::Function(fun), args)
    }

    pub fn reference(reference: Reference) -> Self {
        Self::new(NodeKind::Reference(reference), Vec::new())
    }

    pub fn cell(id: CellId) -> Self {
        Self::new(NodeKind::CellRef(id), Vec::new())
    }

    pub fn array(rows: u32, cols: u32, elements: Vec<ExpressionNode>) -> Self {
        debug_assert_eq!(rows as usize * cols as usize, elements.len());
        Self::new(NodeKind::Array(ArrayDescriptor::new(rows, cols)), elements)
    }

    pub fn make_array(rows: u32, cols: u32, elements: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::MakeArray(ArrayDescriptor::new(rows, cols)), elements)
    }

    pub fn parent_section(inner: SectionId, expr: ExpressionNode) -> Self {
        Self::new(NodeKind::ParentSection(inner), vec![expr])
    }

    pub fn sub_section(section: SectionId, elements: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::SubSection(section), elements)
    }

    pub fn let_in(name: impl Into<String>, value: ExpressionNode, body: ExpressionNode) -> Self {
        Self::new(NodeKind::Let(name.into()), vec![value, body])
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(NodeKind::LetVar(name.into()), Vec::new())
    }

    pub fn fold(
        def: FoldDef,
        seed: ExpressionNode,
        step: ExpressionNode,
        elements: Vec<ExpressionNode>,
    ) -> Self {
        let mut args = Vec::with_capacity(elements.len() + 2);
        args.push(seed);
        args.push(step);
        args.extend(elements);
        Self::new(NodeKind::Fold(def), args)
    }

    pub fn count(elements: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::Count, elements)
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Records the inferred type. A type, once set, is never changed.
    pub fn set_data_type(&mut self, data_type: DataType) {
        debug_assert!(
            self.data_type.is_none() || self.data_type == Some(data_type),
            "data type of {self} changed from {:?} to {data_type:?}",
            self.data_type
        );
        if self.data_type.is_none() {
            self.data_type = Some(data_type);
        }
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant(_))
    }

    /// Calls `f` for every cell referenced anywhere below (and including) this node.
    pub fn for_each_cell_ref(&self, f: &mut impl FnMut(CellId)) {
        if let NodeKind::CellRef(id) = self.kind {
            f(id);
        }
        for arg in &self.args {
            arg.for_each_cell_ref(f);
        }
    }

    /// Renders the node with a custom cell naming, e.g. the model's source identities.
    pub fn display_with<'a>(&'a self, names: &'a dyn Fn(CellId) -> String) -> impl fmt::Display + 'a {
        Printer { node: self, names }
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |id: CellId| format!("{id}");
        write_node(f, self, &names)
    }
}

struct Printer<'a> {
    node: &'a ExpressionNode,
    names: &'a dyn Fn(CellId) -> String,
}

impl fmt::Display for Printer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self.node, self.names)
    }
}

fn write_list(
    f: &mut fmt::Formatter<'_>,
    nodes: &[ExpressionNode],
    names: &dyn Fn(CellId) -> String,
) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_node(f, node, names)?;
    }
    Ok(())
}

fn write_grid(
    f: &mut fmt::Formatter<'_>,
    desc: &ArrayDescriptor,
    nodes: &[ExpressionNode],
    names: &dyn Fn(CellId) -> String,
) -> fmt::Result {
    let cols = (desc.cols as usize).max(1);
    for (r, row) in nodes.chunks(cols).enumerate() {
        if r > 0 {
            f.write_str("; ")?;
        }
        write_list(f, row, names)?;
    }
    Ok(())
}

fn write_node(
    f: &mut fmt::Formatter<'_>,
    node: &ExpressionNode,
    names: &dyn Fn(CellId) -> String,
) -> fmt::Result {
    let args = &node.args;
    match &node.kind {
        NodeKind::Constant(v) => write!(f, "{v}"),
        NodeKind::Operator(Operator::Neg) => {
            f.write_str("(-")?;
            write_list(f, args, names)?;
            f.write_str(")")
        }
        NodeKind::Operator(Operator::Percent) => {
            f.write_str("(")?;
            write_list(f, args, names)?;
            f.write_str("%)")
        }
        NodeKind::Operator(op) => {
            f.write_str("(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    match op {
                        Operator::Union => f.write_str(", ")?,
                        Operator::Intersect => f.write_str(" ")?,
                        _ => write!(f, " {} ", op.symbol())?,
                    }
                }
                write_node(f, arg, names)?;
            }
            f.write_str(")")
        }
        NodeKind::Function(fun) => {
            write!(f, "{fun}(")?;
            write_list(f, args, names)?;
            f.write_str(")")
        }
        NodeKind::Reference(r) => write!(f, "{r}"),
        NodeKind::CellRef(id) => f.write_str(&names(*id)),
        NodeKind::Array(desc) => {
            f.write_str("[")?;
            write_grid(f, desc, args, names)?;
            f.write_str("]")
        }
        NodeKind::MakeArray(desc) => {
            f.write_str("{")?;
            write_grid(f, desc, args, names)?;
            f.write_str("}")
        }
        NodeKind::ParentSection(_) => {
            f.write_str("PARENT(")?;
            write_list(f, args, names)?;
            f.write_str(")")
        }
        NodeKind::SubSection(id) => {
            write!(f, "SECTION{}(", id.index())?;
            write_list(f, args, names)?;
            f.write_str(")")
        }
        NodeKind::Let(name) => {
            write!(f, "LET({name} = ")?;
            write_node(f, &args[0], names)?;
            f.write_str("; ")?;
            write_node(f, &args[1], names)?;
            f.write_str(")")
        }
        NodeKind::LetVar(name) => f.write_str(name),
        NodeKind::Fold(def) => write_fold(f, "FOLD", def, None, args, names),
        NodeKind::FoldArray(def) => {
            write_fold(f, "FOLD_ARRAY", &def.fold, Some(&def.index), args, names)
        }
        NodeKind::DatabaseFold(def) => {
            write!(f, "DFOLD({} = ", def.fold.acc)?;
            write_node(f, &args[0], names)?;
            write!(f, "; {}: ", def.fold.elt)?;
            write_node(f, &args[1], names)?;
            write!(f, "; {}: ", def.columns.join(", "))?;
            write_node(f, &args[2], names)?;
            write!(f, "; #{}; ", def.folded_column + 1)?;
            write_filter(f, def.fold.filter)?;
            write_list(f, &args[3..], names)?;
            f.write_str(")")
        }
        NodeKind::Count => {
            f.write_str("_COUNT(")?;
            write_list(f, args, names)?;
            f.write_str(")")
        }
    }
}

fn write_fold(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    def: &FoldDef,
    index: Option<&str>,
    args: &[ExpressionNode],
    names: &dyn Fn(CellId) -> String,
) -> fmt::Result {
    let label = if def.from_first {
        format!("{label}_FROM_FIRST")
    } else {
        label.to_string()
    };
    write!(f, "{label}({} = ", def.acc)?;
    write_node(f, &args[0], names)?;
    write!(f, "; {}", def.elt)?;
    if let Some(index) = index {
        write!(f, ", {index}")?;
    }
    f.write_str(": ")?;
    write_node(f, &args[1], names)?;
    f.write_str("; ")?;
    write_filter(f, def.filter)?;
    write_list(f, &args[2..], names)?;
    f.write_str(")")
}

fn write_filter(f: &mut fmt::Formatter<'_>, filter: FoldFilter) -> fmt::Result {
    match filter {
        FoldFilter::NonEmpty => Ok(()),
        FoldFilter::Numbers => f.write_str("numbers: "),
        FoldFilter::Logicals => f.write_str("logicals: "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_fully_parenthesized() {
        let e = ExpressionNode::binary(
            Operator::Add,
            ExpressionNode::constant(1),
            ExpressionNode::binary(
                Operator::Mul,
                ExpressionNode::constant(2),
                ExpressionNode::op(Operator::Neg, vec![ExpressionNode::constant(3)]),
            ),
        );
        assert_eq!(e.to_string(), "(1 + (2 * (-3)))");
    }

    #[test]
    fn prints_folds() {
        let fold = ExpressionNode::fold(
            FoldDef::new("acc", "xi").commutative(),
            ExpressionNode::constant(0),
            ExpressionNode::binary(
                Operator::Add,
                ExpressionNode::var("acc"),
                ExpressionNode::var("xi"),
            ),
            vec![ExpressionNode::constant(1), ExpressionNode::constant("a")],
        );
        assert_eq!(fold.to_string(), "FOLD(acc = 0; xi: (acc + xi); 1, \"a\")");

        let max = ExpressionNode::fold(
            FoldDef::new("acc", "xi").from_first().numbers(),
            ExpressionNode::constant(0),
            ExpressionNode::binary(
                Operator::Max,
                ExpressionNode::var("acc"),
                ExpressionNode::var("xi"),
            ),
            vec![ExpressionNode::constant(1)],
        );
        assert_eq!(
            max.to_string(),
            "FOLD_FROM_FIRST(acc = 0; xi: (acc _max_ xi); numbers: 1)"
        );
    }

    #[test]
    fn equality_ignores_inferred_types() {
        let mut a = ExpressionNode::var("x");
        a.set_data_type(DataType::Numeric);
        assert_eq!(a, ExpressionNode::var("x"));
    }
}
