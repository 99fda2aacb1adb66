use formula_model::{
    CellContent, CellId, ComputationModel, DataType, ExpressionNode, Function, NodeKind, Operator,
};

use crate::error::{CompilerError, CompilerResult};
use crate::scope::{LetDictionary, Scoped};

/// Bottom-up type inference over cells and expressions.
///
/// Every node and cell is typed at most once: a node that already carries a type is returned as is
/// without descending into it. Input cells are typed by their default content and default to
/// numeric when they have none.
pub struct TypeAnnotator<'m> {
    model: &'m mut ComputationModel,
    scope: LetDictionary<()>,
    dispatches: usize,
}

impl Scoped for TypeAnnotator<'_> {
    type Value = ();

    fn let_dictionary(&mut self) -> &mut LetDictionary<()> {
        &mut self.scope
    }
}

impl<'m> TypeAnnotator<'m> {
    pub fn new(model: &'m mut ComputationModel) -> Self {
        Self {
            model,
            scope: LetDictionary::new(),
            dispatches: 0,
        }
    }

    /// Number of nodes whose type was actually computed (rather than read back).
    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    /// Types every live cell.
    pub fn annotate_model(&mut self) -> CompilerResult<()> {
        let cells = self.model.live_cells();
        for &id in &cells {
            self.annotate_cell(id)?;
        }
        log::debug!(
            "typed {} cells ({} nodes inferred)",
            cells.len(),
            self.dispatches
        );
        Ok(())
    }

    /// Types a cell. A typed cell is revisited only when a rewrite replaced its expression.
    pub fn annotate_cell(&mut self, id: CellId) -> CompilerResult<DataType> {
        let cell = self.model.cell(id);
        if let Some(data_type) = cell.data_type() {
            if cell.expression().map_or(true, |e| e.data_type().is_some()) {
                return Ok(data_type);
            }
        }
        let known = match cell.content() {
            CellContent::Empty if cell.is_input() => Some(DataType::Numeric),
            CellContent::Empty => Some(DataType::Null),
            CellContent::Constant(value) => Some(value.data_type()),
            CellContent::Formula(source) => {
                return Err(CompilerError::unsupported(format!(
                    "unresolved formula `{}` in {}",
                    source.text,
                    cell.name()
                )))
            }
            CellContent::Expression(_) => None,
        };
        let data_type = match known {
            Some(data_type) => data_type,
            None => {
                // Cycles are rejected beforehand, so the cell is never re-entered while its
                // expression is out.
                let Some(mut expr) = self.model.cell_mut(id).take_expression() else {
                    return Ok(DataType::Null);
                };
                let result = self.annotate(&mut expr);
                self.model.cell_mut(id).set_expression(expr);
                result?
            }
        };
        log::trace!("{} : {data_type}", self.model.cell(id).name());
        let cell = self.model.cell_mut(id);
        cell.set_data_type(data_type);
        Ok(cell.data_type().unwrap_or(data_type))
    }

    pub fn annotate(&mut self, node: &mut ExpressionNode) -> CompilerResult<DataType> {
        if let Some(data_type) = node.data_type() {
            return Ok(data_type);
        }
        self.dispatches += 1;
        let data_type = self.infer(node)?;
        node.set_data_type(data_type);
        Ok(data_type)
    }

    fn infer(&mut self, node: &mut ExpressionNode) -> CompilerResult<DataType> {
        match &node.kind {
            NodeKind::Constant(value) => Ok(value.data_type()),
            NodeKind::CellRef(id) => {
                let id = *id;
                self.annotate_cell(id)
            }
            NodeKind::Array(_) | NodeKind::MakeArray(_) | NodeKind::SubSection(_) => {
                self.element_type(&mut node.args)
            }
            NodeKind::Count => {
                self.annotate_all(&mut node.args)?;
                Ok(DataType::Numeric)
            }
            NodeKind::ParentSection(_) => match node.args.first_mut() {
                Some(inner) => self.annotate(inner),
                None => Err(CompilerError::unsupported("empty parent section reference")),
            },
            NodeKind::Operator(op) => {
                let op = *op;
                let args = self.annotate_all(&mut node.args)?;
                Ok(match op {
                    Operator::Concat => DataType::String,
                    Operator::Union => first_numeric(&args),
                    _ => DataType::Numeric,
                })
            }
            NodeKind::Function(fun) => {
                let fun = *fun;
                let args = self.annotate_all(&mut node.args)?;
                Ok(function_type(fun, &args))
            }
            NodeKind::Reference(r) => Err(CompilerError::unsupported(format!(
                "unresolved reference {r}"
            ))),
            NodeKind::Let(name) => {
                let name = name.clone();
                let [value, body] = node.args.as_mut_slice() else {
                    return Err(CompilerError::unsupported("LET needs a value and a body"));
                };
                let value_type = self.annotate(value)?;
                let mut scope = self.scope();
                scope.bind(name, Some(value_type), None);
                scope.annotate(body)
            }
            NodeKind::LetVar(name) => self
                .scope
                .get(name)
                .and_then(|entry| entry.data_type)
                .ok_or_else(|| CompilerError::unsupported(format!("unbound variable `{name}`"))),
            NodeKind::Fold(def) => {
                let (acc, elt) = (def.acc.clone(), def.elt.clone());
                self.infer_fold(&mut node.args, acc, elt, None, None)
            }
            NodeKind::FoldArray(def) => {
                let (acc, elt) = (def.fold.acc.clone(), def.fold.elt.clone());
                let index = def.index.clone();
                self.infer_fold(&mut node.args, acc, elt, Some(index), None)
            }
            NodeKind::DatabaseFold(def) => {
                let (acc, elt) = (def.fold.acc.clone(), def.fold.elt.clone());
                let columns: Vec<(String, DataType)> = def
                    .columns
                    .iter()
                    .cloned()
                    .zip(def.column_types.iter().copied())
                    .collect();
                self.infer_fold(&mut node.args, acc, elt, None, Some(&columns))
            }
        }
    }

    /// Folds: `[seed, step, elements...]`, or `[seed, step, filter, rows...]` for database folds,
    /// whose filter sees `columns`. The accumulator takes the seed's type, which is also the fold's type.
    fn infer_fold(
        &mut self,
        args: &mut [ExpressionNode],
        acc: String,
        elt: String,
        index: Option<String>,
        columns: Option<&[(String, DataType)]>,
    ) -> CompilerResult<DataType> {
        let fixed = if columns.is_some() { 3 } else { 2 };
        if args.len() < fixed {
            return Err(CompilerError::unsupported("fold without seed and step"));
        }
        let (head, elements) = args.split_at_mut(fixed);
        let element_type = self.element_type(elements)?;
        let seed_type = self.annotate(&mut head[0])?;
        {
            let mut scope = self.scope();
            scope.bind(acc, Some(seed_type), None);
            scope.bind(elt, Some(element_type), None);
            if let Some(index) = index {
                scope.bind(index, Some(DataType::Numeric), None);
            }
            scope.annotate(&mut head[1])?;
        }
        if let (Some(filter), Some(columns)) = (head.get_mut(2), columns) {
            let mut scope = self.scope();
            for (name, data_type) in columns {
                scope.bind(name.clone(), Some(*data_type), None);
            }
            scope.annotate(filter)?;
        }
        Ok(seed_type)
    }

    fn annotate_all(&mut self, args: &mut [ExpressionNode]) -> CompilerResult<Vec<DataType>> {
        args.iter_mut().map(|arg| self.annotate(arg)).collect()
    }

    /// Types all elements; the first numeric one decides, then text, else null.
    fn element_type(&mut self, elements: &mut [ExpressionNode]) -> CompilerResult<DataType> {
        let types = self.annotate_all(elements)?;
        Ok(first_numeric(&types))
    }
}

fn first_numeric(types: &[DataType]) -> DataType {
    if types.contains(&DataType::Numeric) {
        DataType::Numeric
    } else if types.contains(&DataType::String) {
        DataType::String
    } else {
        DataType::Null
    }
}

fn function_type(fun: Function, args: &[DataType]) -> DataType {
    match fun {
        Function::If => args.get(1).copied().unwrap_or(DataType::Numeric),
        Function::Index => args.first().copied().unwrap_or(DataType::Numeric),
        Function::Choose => args.get(1).copied().unwrap_or(DataType::Numeric),
        fun if fun.returns_text() => DataType::String,
        _ => DataType::Numeric,
    }
}

#[cfg(test)]
mod tests {
    use formula_model::{FoldDef, Value};

    use super::*;

    #[test]
    fn if_takes_the_type_of_its_then_branch() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let a = model.add_constant(root, "A", "x").unwrap();
        let b = model
            .add_expression(
                root,
                "B",
                ExpressionNode::function(
                    Function::If,
                    vec![
                        ExpressionNode::constant(1),
                        ExpressionNode::cell(a),
                        ExpressionNode::constant(2),
                    ],
                ),
            )
            .unwrap();
        let mut annotator = TypeAnnotator::new(&mut model);
        assert_eq!(annotator.annotate_cell(b).unwrap(), DataType::String);
    }

    #[test]
    fn fold_variables_are_scoped_to_the_step() {
        let mut node = ExpressionNode::fold(
            FoldDef::new("acc", "xi"),
            ExpressionNode::constant(Value::text("")),
            ExpressionNode::binary(Operator::Concat, ExpressionNode::var("acc"), ExpressionNode::var("xi")),
            vec![ExpressionNode::constant(1)],
        );
        let mut model = ComputationModel::new("m");
        let mut annotator = TypeAnnotator::new(&mut model);
        assert_eq!(annotator.annotate(&mut node).unwrap(), DataType::String);
        assert!(annotator.scope.is_empty());

        let mut stray = ExpressionNode::var("acc");
        assert!(annotator.annotate(&mut stray).is_err());
    }

    #[test]
    fn unresolved_references_are_unsupported() {
        let mut node = ExpressionNode::reference(formula_model::Reference::Broken);
        let mut model = ComputationModel::new("m");
        let err = TypeAnnotator::new(&mut model).annotate(&mut node).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedExpression { .. }));
    }
}
