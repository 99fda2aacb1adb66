//! Desugaring of spreadsheet aggregates into fold primitives.
//!
//! A [`RewriteRules`] table maps functions to rules. The [`ExpressionRewriter`] applies them
//! bottom-up and re-applies them to each expansion, so a rule may expand into calls that are
//! rewritten in turn (`AVERAGE` becomes `SUM / COUNT`, whose `SUM` becomes a fold).

mod database;
mod rules;

use formula_model::{CellId, ComputationModel, ExpressionNode, NodeKind, Value};

use crate::error::CompilerResult;
use crate::eval::CellLookup;

pub use rules::{RewriteRules, Rule};

/// Naming and constant lookup available to rules.
pub struct RuleContext<'c> {
    cells: &'c dyn CellLookup,
    counter: &'c mut usize,
}

impl RuleContext<'_> {
    /// A variable name no other rewrite has produced.
    pub fn fresh(&mut self, base: &str) -> String {
        *self.counter += 1;
        format!("{base}{}", self.counter)
    }

    /// Compile-time value of a literal or of a reference to a constant cell.
    pub fn constant_of(&self, node: &ExpressionNode) -> Option<Value> {
        match &node.kind {
            NodeKind::Constant(value) => Some(value.clone()),
            NodeKind::CellRef(id) => self.cells.constant(*id),
            _ => None,
        }
    }
}

pub struct ExpressionRewriter<'r> {
    rules: &'r RewriteRules,
    counter: usize,
    rewritten: usize,
}

impl<'r> ExpressionRewriter<'r> {
    pub fn new(rules: &'r RewriteRules) -> Self {
        Self {
            rules,
            counter: 0,
            rewritten: 0,
        }
    }

    /// Number of rule applications so far.
    pub fn rewritten_count(&self) -> usize {
        self.rewritten
    }

    /// Rewrites `node` until no rule applies anywhere in it.
    ///
    /// Nodes above a rewritten subtree are rebuilt without a type, so the next type annotation
    /// reaches the new subtree.
    pub fn rewrite(&mut self, node: ExpressionNode, cells: &dyn CellLookup) -> CompilerResult<ExpressionNode> {
        Ok(self.rewrite_node(node, cells)?.0)
    }

    fn rewrite_node(
        &mut self,
        mut node: ExpressionNode,
        cells: &dyn CellLookup,
    ) -> CompilerResult<(ExpressionNode, bool)> {
        let mut changed = false;
        let args = std::mem::take(&mut node.args);
        let mut new_args = Vec::with_capacity(args.len());
        for arg in args {
            let (arg, arg_changed) = self.rewrite_node(arg, cells)?;
            changed |= arg_changed;
            new_args.push(arg);
        }
        if let NodeKind::Function(fun) = node.kind {
            if let Some(rule) = self.rules.get(fun) {
                let mut cx = RuleContext {
                    cells,
                    counter: &mut self.counter,
                };
                if let Some(expanded) = rule(&mut cx, &new_args)? {
                    self.rewritten += 1;
                    log::trace!("rewrote {fun} into {expanded}");
                    let (expanded, _) = self.rewrite_node(expanded, cells)?;
                    return Ok((expanded, true));
                }
            }
        }
        if changed {
            Ok((ExpressionNode::new(node.kind, new_args), true))
        } else {
            node.args = new_args;
            Ok((node, false))
        }
    }
}

/// Applies an [`ExpressionRewriter`] to every live cell of a model.
pub struct ModelRewriter<'r> {
    rewriter: ExpressionRewriter<'r>,
}

impl<'r> ModelRewriter<'r> {
    pub fn new(rules: &'r RewriteRules) -> Self {
        Self {
            rewriter: ExpressionRewriter::new(rules),
        }
    }

    /// Rewrites all cell expressions; returns the number of rule applications.
    pub fn rewrite(&mut self, model: &mut ComputationModel) -> CompilerResult<usize> {
        let before = self.rewriter.rewritten_count();
        for id in model.live_cells() {
            self.rewrite_cell(model, id)?;
        }
        let applied = self.rewriter.rewritten_count() - before;
        log::debug!("applied {applied} rewrite rules");
        Ok(applied)
    }

    fn rewrite_cell(&mut self, model: &mut ComputationModel, id: CellId) -> CompilerResult<()> {
        let Some(expr) = model.cell_mut(id).take_expression() else {
            return Ok(());
        };
        let rewritten = self.rewriter.rewrite(expr, &*model)?;
        model.cell_mut(id).set_expression(rewritten);
        Ok(())
    }
}
