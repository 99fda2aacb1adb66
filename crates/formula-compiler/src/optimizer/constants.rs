use std::collections::HashSet;

use formula_model::{CellId, ComputationModel, ExpressionNode, FoldDef, NodeKind, Operator, Value};

use crate::error::CompilerResult;
use crate::eval::{CellLookup, Interpreter, Stop};
use crate::numeric::{with_arithmetic, Arithmetic};

/// Partial evaluator.
///
/// Subtrees that evaluate without run-time data are replaced by their value. Commutative folds
/// that still depend on run-time data get their constant elements pre-combined into the seed.
/// A cell whose whole expression reduces becomes a constant cell.
pub struct ConstantSubexpressionEliminator<'m> {
    model: &'m mut ComputationModel,
    folded: usize,
    partial: usize,
}

impl<'m> ConstantSubexpressionEliminator<'m> {
    pub fn new(model: &'m mut ComputationModel) -> Self {
        Self {
            model,
            folded: 0,
            partial: 0,
        }
    }

    /// Reduces every live cell, dependencies first. Returns the number of cells that became
    /// constants.
    pub fn eliminate(&mut self) -> CompilerResult<usize> {
        let numeric_type = self.model.numeric_type();
        let mut constant_cells = 0;
        for id in dependency_order(self.model) {
            let Some(mut expr) = self.model.cell_mut(id).take_expression() else {
                continue;
            };
            with_arithmetic!(numeric_type, ar => {
                let mut pass = Pass {
                    ar: &ar,
                    cells: &*self.model,
                    folded: 0,
                    partial: 0,
                };
                pass.reduce(&mut expr);
                self.folded += pass.folded;
                self.partial += pass.partial;
            });
            let cell = self.model.cell_mut(id);
            match expr.kind {
                NodeKind::Constant(value) => {
                    log::trace!("{} is constant {value}", cell.name());
                    cell.set_constant(value);
                    constant_cells += 1;
                }
                _ => cell.set_expression(expr),
            }
        }
        log::debug!(
            "constant elimination: {constant_cells} constant cells, {} folded subtrees, {} partial aggregations",
            self.folded,
            self.partial
        );
        Ok(constant_cells)
    }

    /// Number of subtrees replaced by their value so far.
    pub fn folded_count(&self) -> usize {
        self.folded
    }

    /// Number of folds whose constant elements were pre-combined so far.
    pub fn partial_count(&self) -> usize {
        self.partial
    }
}

/// Post-order over cell references, so referenced cells are reduced before their users.
fn dependency_order(model: &ComputationModel) -> Vec<CellId> {
    fn visit(model: &ComputationModel, id: CellId, seen: &mut HashSet<CellId>, out: &mut Vec<CellId>) {
        if !seen.insert(id) {
            return;
        }
        if let Some(expr) = model.cell(id).expression() {
            let mut refs = Vec::new();
            expr.for_each_cell_ref(&mut |r| refs.push(r));
            for r in refs {
                visit(model, r, seen, out);
            }
        }
        out.push(id);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in model.live_cells() {
        visit(model, id, &mut seen, &mut out);
    }
    out
}

struct Pass<'a, A: Arithmetic> {
    ar: &'a A,
    cells: &'a dyn CellLookup,
    folded: usize,
    partial: usize,
}

impl<A: Arithmetic> Pass<'_, A> {
    fn reduce(&mut self, node: &mut ExpressionNode) {
        if node.is_constant() || matches!(node.kind, NodeKind::LetVar(_)) {
            return;
        }
        if let Ok(value) = Interpreter::new(self.ar, self.cells).evaluate_value(node) {
            *node = ExpressionNode::constant(value);
            self.folded += 1;
            return;
        }
        if let NodeKind::Let(name) = &node.kind {
            let name = name.clone();
            self.reduce(&mut node.args[0]);
            if node.args[0].is_constant() {
                let value = node.args.swap_remove(0);
                let mut body = node.args.swap_remove(0);
                substitute(&mut body, &name, &value);
                *node = body;
                self.reduce(node);
                return;
            }
            self.reduce(&mut node.args[1]);
            return;
        }
        for arg in &mut node.args {
            self.reduce(arg);
        }
        if matches!(&node.kind, NodeKind::Fold(def) if def.commutative) {
            self.pre_aggregate(node);
        }
    }

    /// Combines the constant elements of a commutative fold into its seed.
    fn pre_aggregate(&mut self, node: &mut ExpressionNode) {
        let mut def = match &node.kind {
            NodeKind::Fold(def) if node.args.len() >= 2 => def.clone(),
            _ => return,
        };
        let mut elements = Vec::new();
        for element in node.args.drain(2..) {
            if def.filter.is_numeric() {
                spread_items(element, &mut elements);
            } else {
                spread(element, &mut elements);
            }
        }
        let (constants, rest): (Vec<_>, Vec<_>) =
            elements.into_iter().partition(ExpressionNode::is_constant);
        // Folds skip empty elements.
        let constants: Vec<_> = constants
            .into_iter()
            .filter(|c| !c.constant_value().is_some_and(Value::is_null))
            .collect();
        if constants.is_empty() || rest.is_empty() {
            node.args.extend(constants);
            node.args.extend(rest);
            return;
        }
        let partial = ExpressionNode::fold(
            def.clone(),
            node.args[0].clone(),
            node.args[1].clone(),
            constants.clone(),
        );
        match Interpreter::new(self.ar, self.cells).evaluate_value(&partial) {
            Ok(seed) => {
                log::trace!("pre-aggregated {} constant elements into {seed}", constants.len());
                def.from_first = false;
                node.kind = NodeKind::Fold(def);
                node.args[0] = ExpressionNode::constant(seed);
                node.args.extend(rest);
                self.partial += 1;
            }
            Err(Stop::NotConstant | Stop::Failed(_)) => {
                node.args.extend(constants);
                node.args.extend(rest);
            }
        }
    }
}

/// Splits static arrays and unions into their elements; the fold flattens them anyway.
fn spread(node: ExpressionNode, out: &mut Vec<ExpressionNode>) {
    match node.kind {
        NodeKind::Array(_) | NodeKind::Operator(Operator::Union) => {
            for arg in node.args {
                spread(arg, out);
            }
        }
        _ => out.push(node),
    }
}

/// Splits a static array for a fold that only visits the numbers inside arrays. Its other
/// constant items are never visited, and its run-time scalars stay grouped in an array.
fn spread_items(node: ExpressionNode, out: &mut Vec<ExpressionNode>) {
    if !matches!(node.kind, NodeKind::Array(_)) {
        out.push(node);
        return;
    }
    let mut scalars = Vec::new();
    for item in node.args {
        match item.constant_value() {
            Some(Value::Number(_)) => out.push(item),
            Some(_) => {}
            // Band columns are arrays already.
            None if matches!(item.kind, NodeKind::SubSection(_)) => out.push(item),
            None => scalars.push(item),
        }
    }
    if !scalars.is_empty() {
        out.push(ExpressionNode::array(1, scalars.len() as u32, scalars));
    }
}

/// Replaces free occurrences of the variable `name` with `value`.
fn substitute(node: &mut ExpressionNode, name: &str, value: &ExpressionNode) {
    if let NodeKind::LetVar(var) = &node.kind {
        if var == name {
            *node = value.clone();
        }
        return;
    }
    // Arguments in the scope of a binder that rebinds `name`.
    let shadowed: &[usize] = match &node.kind {
        NodeKind::Let(var) if var == name => &[1],
        NodeKind::Fold(def) if binds(def, name) => &[1],
        NodeKind::FoldArray(def) if binds(&def.fold, name) || def.index == name => &[1],
        NodeKind::DatabaseFold(def) => {
            match (binds(&def.fold, name), def.columns.iter().any(|c| c == name)) {
                (true, true) => &[1, 2],
                (true, false) => &[1],
                (false, true) => &[2],
                (false, false) => &[],
            }
        }
        _ => &[],
    };
    for (i, arg) in node.args.iter_mut().enumerate() {
        if !shadowed.contains(&i) {
            substitute(arg, name, value);
        }
    }
}

fn binds(def: &FoldDef, name: &str) -> bool {
    def.acc == name || def.elt == name
}

#[cfg(test)]
mod tests {
    use formula_model::{AccessorPath, CellContent};
    use pretty_assertions::assert_eq;

    use super::*;

    fn sum(elements: Vec<ExpressionNode>) -> ExpressionNode {
        ExpressionNode::fold(
            FoldDef::new("acc", "xi").commutative(),
            ExpressionNode::constant(0),
            ExpressionNode::binary(Operator::Add, ExpressionNode::var("acc"), ExpressionNode::var("xi")),
            elements,
        )
    }

    #[test]
    fn constant_cells_become_constants() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let one = model.add_constant(root, "ONE", 1).unwrap();
        let total = model
            .add_expression(
                root,
                "TOTAL",
                sum(vec![ExpressionNode::cell(one), ExpressionNode::constant(2), ExpressionNode::constant(3)]),
            )
            .unwrap();
        let double = model
            .add_expression(
                root,
                "DOUBLE",
                ExpressionNode::binary(Operator::Mul, ExpressionNode::cell(total), ExpressionNode::constant(2)),
            )
            .unwrap();
        let constants = ConstantSubexpressionEliminator::new(&mut model).eliminate().unwrap();
        assert_eq!(constants, 2);
        assert_eq!(model.cell(total).constant_value(), Some(&Value::number(6)));
        assert!(model.cell(total).expression().is_none());
        assert_eq!(model.cell(double).constant_value(), Some(&Value::number(12)));
    }

    #[test]
    fn commutative_folds_are_pre_aggregated() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let x = model.add_cell(root, "X", CellContent::Empty).unwrap();
        model.bind_input(x, AccessorPath::field("x"));
        let elements = vec![
            ExpressionNode::constant(1),
            ExpressionNode::array(1, 2, vec![ExpressionNode::constant(2), ExpressionNode::cell(x)]),
            ExpressionNode::constant(3),
        ];
        let total = model.add_expression(root, "TOTAL", sum(elements)).unwrap();
        let mut pass = ConstantSubexpressionEliminator::new(&mut model);
        assert_eq!(pass.eliminate().unwrap(), 0);
        assert_eq!(pass.partial_count(), 1);
        let expr = model.cell(total).expression().unwrap();
        assert_eq!(model.describe(expr), "FOLD(acc = 6; xi: (acc + xi); X)");
    }

    /// Every cell holds the same value.
    struct Filled(Value);

    impl CellLookup for Filled {
        fn constant(&self, _: CellId) -> Option<Value> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn numeric_folds_keep_run_time_array_items_in_an_array() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let x = model.add_cell(root, "X", CellContent::Empty).unwrap();
        model.bind_input(x, AccessorPath::field("x"));
        let labelled = ExpressionNode::array(
            3,
            1,
            vec![ExpressionNode::constant("label"), ExpressionNode::constant(2), ExpressionNode::cell(x)],
        );
        let mut numeric = sum(vec![ExpressionNode::constant(1), labelled]);
        if let NodeKind::Fold(def) = &mut numeric.kind {
            *def = def.clone().numbers();
        }
        let total = model.add_expression(root, "TOTAL", numeric.clone()).unwrap();
        let mut pass = ConstantSubexpressionEliminator::new(&mut model);
        pass.eliminate().unwrap();
        assert_eq!(pass.partial_count(), 1);
        let expr = model.cell(total).expression().unwrap().clone();
        assert_eq!(model.describe(&expr), "FOLD(acc = 3; xi: (acc + xi); numbers: [X])");

        let text = Filled(Value::text("n/a"));
        for node in [&numeric, &expr] {
            let value = Interpreter::new(&crate::numeric::Double, &text).evaluate_value(node);
            assert_eq!(value, Ok(Value::number(3)));
        }
    }

    #[test]
    fn non_commutative_folds_keep_their_elements() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let x = model.add_cell(root, "X", CellContent::Empty).unwrap();
        model.bind_input(x, AccessorPath::field("x"));
        let concat = ExpressionNode::fold(
            FoldDef::new("acc", "xi"),
            ExpressionNode::constant(""),
            ExpressionNode::binary(Operator::Concat, ExpressionNode::var("acc"), ExpressionNode::var("xi")),
            vec![ExpressionNode::constant("a"), ExpressionNode::cell(x), ExpressionNode::constant("b")],
        );
        let cell = model.add_expression(root, "C", concat.clone()).unwrap();
        ConstantSubexpressionEliminator::new(&mut model).eliminate().unwrap();
        assert_eq!(model.cell(cell).expression(), Some(&concat));
    }

    #[test]
    fn constant_lets_are_substituted() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let x = model.add_cell(root, "X", CellContent::Empty).unwrap();
        model.bind_input(x, AccessorPath::field("x"));
        let expr = ExpressionNode::let_in(
            "n",
            ExpressionNode::binary(Operator::Add, ExpressionNode::constant(1), ExpressionNode::constant(1)),
            ExpressionNode::binary(Operator::Mul, ExpressionNode::var("n"), ExpressionNode::cell(x)),
        );
        let cell = model.add_expression(root, "C", expr).unwrap();
        ConstantSubexpressionEliminator::new(&mut model).eliminate().unwrap();
        assert_eq!(model.describe(model.cell(cell).expression().unwrap()), "(2 * X)");
    }

    #[test]
    fn errors_are_left_for_run_time() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let div = ExpressionNode::binary(Operator::Div, ExpressionNode::constant(1), ExpressionNode::constant(0));
        let cell = model.add_expression(root, "C", div.clone()).unwrap();
        ConstantSubexpressionEliminator::new(&mut model).eliminate().unwrap();
        assert_eq!(model.cell(cell).expression(), Some(&div));
    }
}
