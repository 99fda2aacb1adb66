use std::collections::HashSet;

use formula_model::{CellId, ComputationModel, ExpressionNode};

use crate::error::CycleError;

/// Rejects models in which a cell depends on itself.
pub struct CircularReferenceChecker<'m> {
    model: &'m ComputationModel,
}

impl<'m> CircularReferenceChecker<'m> {
    pub fn new(model: &'m ComputationModel) -> Self {
        Self { model }
    }

    /// Checks every live cell that holds an expression.
    pub fn check(&self) -> Result<(), CycleError> {
        let mut checked = 0usize;
        for id in self.model.live_cells() {
            if let Some(expr) = self.model.cell(id).expression() {
                let mut path = vec![id];
                let mut visited = HashSet::new();
                self.visit(id, expr, &mut path, &mut visited)?;
                checked += 1;
            }
        }
        log::debug!("cycle check passed for {checked} cells");
        Ok(())
    }

    /// Depth-first walk from `start`. `visited` holds cells already expanded on behalf of `start`;
    /// they cannot lead back to it, so they are not expanded twice.
    fn visit(
        &self,
        start: CellId,
        expr: &ExpressionNode,
        path: &mut Vec<CellId>,
        visited: &mut HashSet<CellId>,
    ) -> Result<(), CycleError> {
        let mut refs = Vec::new();
        expr.for_each_cell_ref(&mut |id| refs.push(id));
        for id in refs {
            if id == start {
                return Err(CycleError {
                    path: path
                        .iter()
                        .map(|&c| self.model.cell(c).name().to_string())
                        .collect(),
                });
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(next) = self.model.cell(id).expression() {
                path.push(id);
                self.visit(start, next, path, visited)?;
                path.pop();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use formula_model::Operator;

    use super::*;

    #[test]
    fn shared_subexpressions_are_expanded_once() {
        // A diamond chain: every level references the next one twice.
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let mut prev = model.add_constant(root, "L0", 1).unwrap();
        for level in 1..40 {
            let expr = ExpressionNode::binary(
                Operator::Add,
                ExpressionNode::cell(prev),
                ExpressionNode::cell(prev),
            );
            prev = model
                .add_expression(root, format!("L{level}"), expr)
                .unwrap();
        }
        assert!(CircularReferenceChecker::new(&model).check().is_ok());
    }

    #[test]
    fn self_reference_is_a_cycle_of_one() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let a = model.add_constant(root, "A", 0).unwrap();
        model
            .cell_mut(a)
            .set_expression(ExpressionNode::binary(
                Operator::Add,
                ExpressionNode::cell(a),
                ExpressionNode::constant(1),
            ));
        let err = CircularReferenceChecker::new(&model).check().unwrap_err();
        assert_eq!(err.path, vec!["A".to_string()]);
    }
}
