use formula_model::{CellContent, CellId, ComputationModel, ExpressionNode, NodeKind};

use crate::error::{CompilerError, CompilerResult};

/// Counts, for every cell reachable from an output, how many expression nodes refer to it.
///
/// A reference reached through a parent-section node marks the target as sub-band accessed: it is
/// read once per row of an inner band and keeps a slot of its own.
pub struct ReferenceCounter<'m> {
    model: &'m mut ComputationModel,
}

impl<'m> ReferenceCounter<'m> {
    pub fn new(model: &'m mut ComputationModel) -> Self {
        Self { model }
    }

    /// Recounts from scratch. Returns the number of reachable cells.
    pub fn count(&mut self) -> usize {
        let ids: Vec<CellId> = self.model.cell_ids().collect();
        for &id in &ids {
            self.model.cell_mut(id).reset_references();
        }
        let mut pending: Vec<CellId> = self
            .model
            .live_cells()
            .into_iter()
            .filter(|&id| self.model.cell(id).is_output())
            .collect();
        let mut reached = pending.len();
        while let Some(id) = pending.pop() {
            let mut refs = Vec::new();
            if let Some(expr) = self.model.cell(id).expression() {
                collect_refs(expr, false, &mut refs);
            }
            for (target, crosses_parent) in refs {
                let cell = self.model.cell_mut(target);
                if crosses_parent {
                    cell.mark_sub_band_accessed();
                }
                // Outputs are already queued as roots.
                if cell.add_reference() == 1 && !cell.is_output() {
                    pending.push(target);
                    reached += 1;
                }
            }
        }
        log::debug!("reference count: {reached} reachable cells");
        reached
    }
}

fn collect_refs(node: &ExpressionNode, in_parent: bool, out: &mut Vec<(CellId, bool)>) {
    match node.kind {
        NodeKind::CellRef(id) => out.push((id, in_parent)),
        NodeKind::ParentSection(_) => {
            for arg in &node.args {
                collect_refs(arg, true, out);
            }
        }
        _ => {
            for arg in &node.args {
                collect_refs(arg, in_parent, out);
            }
        }
    }
}

/// Substitutes single-use intermediate cells into their users and drops unreachable ones.
///
/// Runs on the counts left by [`ReferenceCounter`]. Input and output cells are never removed, and
/// neither is a cell read from inside an inner band.
pub struct IntermediateResultsInliner<'m> {
    model: &'m mut ComputationModel,
    inlined: usize,
    dead: usize,
}

impl<'m> IntermediateResultsInliner<'m> {
    pub fn new(model: &'m mut ComputationModel) -> Self {
        Self {
            model,
            inlined: 0,
            dead: 0,
        }
    }

    /// Returns the number of cells removed from their sections.
    pub fn inline(&mut self) -> CompilerResult<usize> {
        let live = self.model.live_cells();
        let (candidates, kept): (Vec<CellId>, Vec<CellId>) =
            live.into_iter().partition(|&id| self.is_candidate(id));
        if candidates.is_empty() {
            return Ok(0);
        }
        for &id in &kept {
            let Some(mut expr) = self.model.cell_mut(id).take_expression() else {
                continue;
            };
            let result = self.substitute(&mut expr, 0);
            self.model.cell_mut(id).set_expression(expr);
            result?;
        }
        for &id in &candidates {
            let cell = self.model.cell(id);
            if cell.reference_count() == 0 {
                log::trace!("{} is unreachable", cell.name());
                self.dead += 1;
            } else {
                log::trace!("inlined {}", cell.name());
                self.inlined += 1;
            }
            self.model.detach_cell(id);
        }
        log::debug!(
            "inliner: {} cells inlined, {} unreachable cells removed",
            self.inlined,
            self.dead
        );
        Ok(candidates.len())
    }

    pub fn inlined_count(&self) -> usize {
        self.inlined
    }

    pub fn dead_count(&self) -> usize {
        self.dead
    }

    fn is_candidate(&self, id: CellId) -> bool {
        !self.model.cell(id).is_caching_candidate()
    }

    /// Replaces references to candidates by their content, following chains of candidates.
    fn substitute(&self, node: &mut ExpressionNode, depth: usize) -> CompilerResult<()> {
        if let NodeKind::CellRef(id) = node.kind {
            if !self.is_candidate(id) {
                return Ok(());
            }
            // Cycles were rejected earlier, so a chain is at most as long as the model.
            if depth > self.model.cell_count() {
                return Err(CompilerError::unsupported(format!(
                    "inlining {} does not terminate",
                    self.model.cell(id).name()
                )));
            }
            let cell = self.model.cell(id);
            let mut replacement = match cell.content() {
                CellContent::Empty => ExpressionNode::null(),
                CellContent::Constant(value) => ExpressionNode::constant(value.clone()),
                CellContent::Expression(expr) => expr.clone(),
                CellContent::Formula(source) => {
                    return Err(CompilerError::unsupported(format!(
                        "unresolved formula `{}` in {}",
                        source.text,
                        cell.name()
                    )))
                }
            };
            self.substitute(&mut replacement, depth + 1)?;
            *node = replacement;
            return Ok(());
        }
        for arg in &mut node.args {
            self.substitute(arg, depth)?;
        }
        Ok(())
    }
}
