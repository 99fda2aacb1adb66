//! Binding parsed references to model cells.
//!
//! Cells may arrive as unparsed [`FormulaSource`]s. [`ModelResolver`] parses them and replaces
//! every [`NodeKind::Reference`] with cell references through a [`ReferenceResolver`].

use std::collections::HashMap;

use formula_model::{
    ArrayDescriptor, CellAddress, CellContent, CellId, ComputationModel, ExpressionNode, ModelError,
    NodeKind, Operator, RangeAddress, Reference, SectionId,
};

use crate::error::{CompilerError, CompilerResult};
use crate::parser::{parse_formula_with, NameResolver, ParseOptions};

/// Maps references written in a formula of `cell` to expression nodes over model cells.
pub trait ReferenceResolver: NameResolver {
    fn resolve(
        &self,
        model: &ComputationModel,
        cell: CellId,
        reference: &Reference,
    ) -> CompilerResult<ExpressionNode>;

    /// Address of `cell`, used as the origin of relative R1C1 references.
    fn origin(&self, _model: &ComputationModel, _cell: CellId) -> Option<CellAddress> {
        None
    }
}

/// Parses pending formulas and binds references for a whole model.
pub struct ModelResolver<'r> {
    resolver: &'r dyn ReferenceResolver,
}

impl<'r> ModelResolver<'r> {
    pub fn new(resolver: &'r dyn ReferenceResolver) -> Self {
        Self { resolver }
    }

    /// Returns the number of cells whose content changed.
    pub fn resolve(&self, model: &mut ComputationModel) -> CompilerResult<usize> {
        let mut resolved = 0;
        for id in model.live_cells() {
            let expr = match model.cell(id).content() {
                CellContent::Formula(source) => {
                    let opts = ParseOptions {
                        dialect: source.dialect,
                        origin: source
                            .origin
                            .clone()
                            .or_else(|| self.resolver.origin(model, id)),
                    };
                    log::trace!("parsing {} = {}", model.cell(id).name(), source.text);
                    parse_formula_with(&source.text, &opts, &Names(self.resolver))?
                }
                CellContent::Expression(expr) if has_references(expr) => expr.clone(),
                _ => continue,
            };
            let bound = self.bind(model, id, expr)?;
            model.cell_mut(id).set_expression(bound);
            resolved += 1;
        }
        log::debug!("resolved references in {resolved} cells");
        Ok(resolved)
    }

    fn bind(
        &self,
        model: &ComputationModel,
        cell: CellId,
        expr: ExpressionNode,
    ) -> CompilerResult<ExpressionNode> {
        let ExpressionNode { kind, args, .. } = expr;
        match kind {
            NodeKind::Reference(reference) => self.resolver.resolve(model, cell, &reference),
            NodeKind::Operator(Operator::Intersect) => {
                let [left, right]: [ExpressionNode; 2] = args
                    .try_into()
                    .map_err(|_| CompilerError::unsupported("intersection needs two operands"))?;
                let (NodeKind::Reference(a), NodeKind::Reference(b)) = (&left.kind, &right.kind)
                else {
                    return Err(CompilerError::unsupported(
                        "intersection of computed values",
                    ));
                };
                let common = intersect(a, b).ok_or_else(|| {
                    CompilerError::unsupported(format!("{a} and {b} do not intersect"))
                })?;
                self.resolver.resolve(model, cell, &common)
            }
            kind => {
                let args = args
                    .into_iter()
                    .map(|arg| self.bind(model, cell, arg))
                    .collect::<CompilerResult<Vec<_>>>()?;
                Ok(ExpressionNode::new(kind, args))
            }
        }
    }
}

/// Named-range lookup of a [`ReferenceResolver`].
struct Names<'r>(&'r dyn ReferenceResolver);

impl NameResolver for Names<'_> {
    fn resolve_name(&self, name: &str) -> Option<Reference> {
        self.0.resolve_name(name)
    }
}

fn has_references(expr: &ExpressionNode) -> bool {
    matches!(expr.kind, NodeKind::Reference(_)) || expr.args.iter().any(has_references)
}

fn as_range(reference: &Reference) -> Option<RangeAddress> {
    match reference {
        Reference::Cell(c) => Some(RangeAddress::new(c.clone(), c.clone())),
        Reference::Range(r) if !r.is_sheet_span() => Some(r.clone()),
        _ => None,
    }
}

fn intersect(a: &Reference, b: &Reference) -> Option<Reference> {
    let (a, b) = (as_range(a)?, as_range(b)?);
    if a.start.sheet != b.start.sheet {
        return None;
    }
    let top = a.top().max(b.top());
    let bottom = a.bottom().min(b.bottom());
    let left = a.left().max(b.left());
    let right = a.right().min(b.right());
    if top > bottom || left > right {
        return None;
    }
    let sheet = a.start.sheet.clone();
    let corner = |row, col| CellAddress {
        sheet: sheet.clone(),
        ..CellAddress::new(row, col)
    };
    if top == bottom && left == right {
        return Some(Reference::Cell(corner(top, left)));
    }
    Some(Reference::Range(RangeAddress::new(
        corner(top, left),
        corner(bottom, right),
    )))
}

/// Resolver for models whose cell names are sheet addresses (`B3`, `Sheet1!B3`, `'My Sheet'!B3`).
///
/// Unqualified references refer to the sheet of the formula's own cell. Addresses without a cell
/// resolve to empty (null) values.
#[derive(Debug, Default)]
pub struct GridResolver {
    cells: HashMap<(String, u32, u32), CellId>,
    names: HashMap<String, Reference>,
}

impl GridResolver {
    /// Indexes every model cell whose name parses as an address.
    pub fn from_model(model: &ComputationModel) -> Self {
        let mut cells = HashMap::new();
        for id in model.cell_ids() {
            if let Some((sheet, address)) = split_cell_name(model.cell(id).name()) {
                cells.insert((sheet, address.row, address.col), id);
            }
        }
        Self {
            cells,
            names: HashMap::new(),
        }
    }

    /// Registers a named range, matched case-insensitively.
    pub fn define_name(&mut self, name: impl AsRef<str>, reference: Reference) {
        self.names
            .insert(name.as_ref().to_ascii_uppercase(), reference);
    }

    fn lookup(&self, sheet: &str, row: u32, col: u32) -> Option<CellId> {
        self.cells.get(&(sheet.to_string(), row, col)).copied()
    }

    fn cell_node(
        &self,
        model: &ComputationModel,
        from: SectionId,
        target: Option<CellId>,
    ) -> CompilerResult<(Option<SectionId>, ExpressionNode)> {
        let Some(target) = target else {
            return Ok((None, ExpressionNode::null()));
        };
        let target_section = model.cell(target).section();
        if model.is_ancestor(target_section, from) {
            // Outer cell read from inside a band: step out one frame per enclosing section.
            let mut chain = Vec::new();
            let mut current = from;
            while current != target_section {
                chain.push(current);
                current = model.section(current).parent().unwrap_or(target_section);
            }
            let node = chain
                .into_iter()
                .rev()
                .fold(ExpressionNode::cell(target), |node, inner| {
                    ExpressionNode::parent_section(inner, node)
                });
            return Ok((None, node));
        }
        if model.is_ancestor(from, target_section) {
            // Band cell read from outside: one `SubSection` per section below the direct child.
            let mut node = ExpressionNode::cell(target);
            let mut current = target_section;
            loop {
                let parent = model.section(current).parent().unwrap_or(from);
                if parent == from {
                    return Ok((Some(current), node));
                }
                node = ExpressionNode::sub_section(current, vec![node]);
                current = parent;
            }
        }
        Err(ModelError::NotInSection {
            cell: model.cell(target).name().to_string(),
            section: model.section(from).name().to_string(),
        }
        .into())
    }

    fn resolve_range(
        &self,
        model: &ComputationModel,
        from: SectionId,
        sheet: &str,
        range: &RangeAddress,
    ) -> CompilerResult<ExpressionNode> {
        let mut elements: Vec<ExpressionNode> = Vec::new();
        let mut units = 0u32;
        let mut aligned = true;
        let mut previous_band: Option<SectionId> = None;
        for row in range.top()..=range.bottom() {
            let mut row_nodes = Vec::with_capacity(range.width() as usize);
            for col in range.left()..=range.right() {
                row_nodes.push(self.cell_node(model, from, self.lookup(sheet, row, col))?);
            }
            let band = row_nodes[0].0;
            let whole_row = row_nodes.iter().all(|(b, _)| *b == band);
            if !whole_row {
                aligned = false;
            }
            match band {
                Some(band) if whole_row => {
                    let nodes = row_nodes.into_iter().map(|(_, n)| n);
                    match elements.last_mut() {
                        // Consecutive template rows of the same band form one unit.
                        Some(last) if previous_band == Some(band) => last.args.extend(nodes),
                        _ => {
                            elements.push(ExpressionNode::sub_section(band, nodes.collect()));
                            units += 1;
                        }
                    }
                    previous_band = Some(band);
                }
                _ => {
                    for (band, node) in row_nodes {
                        push_element(&mut elements, &mut previous_band, band, node);
                    }
                    previous_band = None;
                    units += 1;
                }
            }
        }
        if aligned {
            // A band unit stands for `width` elements per runtime row.
            let shape = ArrayDescriptor::new(units, range.width());
            Ok(ExpressionNode::new(NodeKind::Array(shape), elements))
        } else {
            let len = elements.len() as u32;
            Ok(ExpressionNode::array(1, len, elements))
        }
    }
}

fn push_element(
    elements: &mut Vec<ExpressionNode>,
    previous: &mut Option<SectionId>,
    band: Option<SectionId>,
    node: ExpressionNode,
) {
    match band {
        Some(band) => {
            match elements.last_mut() {
                Some(last) if *previous == Some(band) => last.args.push(node),
                _ => elements.push(ExpressionNode::sub_section(band, vec![node])),
            }
            *previous = Some(band);
        }
        None => {
            elements.push(node);
            *previous = None;
        }
    }
}

/// Splits `Sheet1!B3` into the (possibly empty) sheet name and the address.
fn split_cell_name(name: &str) -> Option<(String, CellAddress)> {
    let (sheet, address) = match name.rfind('!') {
        Some(bang) => (&name[..bang], &name[bang + 1..]),
        None => ("", name),
    };
    let sheet = sheet
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| s.replace("''", "'"))
        .unwrap_or_else(|| sheet.to_string());
    let address = CellAddress::from_a1(address)?;
    Some((sheet, address))
}

impl NameResolver for GridResolver {
    fn resolve_name(&self, name: &str) -> Option<Reference> {
        self.names.get(&name.to_ascii_uppercase()).cloned()
    }
}

impl ReferenceResolver for GridResolver {
    fn resolve(
        &self,
        model: &ComputationModel,
        cell: CellId,
        reference: &Reference,
    ) -> CompilerResult<ExpressionNode> {
        let from = model.cell(cell).section();
        let own_sheet = split_cell_name(model.cell(cell).name())
            .map(|(sheet, _)| sheet)
            .unwrap_or_default();
        let sheet_of = |address: &CellAddress| address.sheet.clone().unwrap_or_else(|| own_sheet.clone());
        match reference {
            Reference::Cell(address) => {
                let target = self.lookup(&sheet_of(address), address.row, address.col);
                let (band, node) = self.cell_node(model, from, target)?;
                Ok(match band {
                    Some(band) => ExpressionNode::sub_section(band, vec![node]),
                    None => node,
                })
            }
            Reference::Range(range) if range.is_sheet_span() => Err(CompilerError::unsupported(
                format!("3-D reference {range}"),
            )),
            Reference::Range(range) => {
                self.resolve_range(model, from, &sheet_of(&range.start), range)
            }
            Reference::Broken => Err(CompilerError::unsupported(
                "reference to a deleted cell (#REF!)",
            )),
        }
    }

    fn origin(&self, model: &ComputationModel, cell: CellId) -> Option<CellAddress> {
        split_cell_name(model.cell(cell).name()).map(|(_, address)| address)
    }
}

#[cfg(test)]
mod tests {
    use formula_model::{AccessorPath, FormulaSource, Orientation, ReferenceDialect};
    use pretty_assertions::assert_eq;

    use super::*;

    fn formula(text: &str) -> FormulaSource {
        FormulaSource::new(text, ReferenceDialect::A1)
    }

    #[test]
    fn ranges_become_row_major_arrays() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model.add_constant(root, "A1", 1).unwrap();
        model.add_constant(root, "B1", 2).unwrap();
        model.add_constant(root, "A2", 3).unwrap();
        let c = model.add_formula(root, "C1", formula("SUM(A1:B2)")).unwrap();
        let resolver = GridResolver::from_model(&model);
        ModelResolver::new(&resolver).resolve(&mut model).unwrap();
        let expr = model.cell(c).expression().unwrap();
        assert_eq!(model.describe(expr), "SUM([A1, B1; A2, null])");
    }

    #[test]
    fn band_cells_and_outer_cells_cross_section_boundaries() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let band = model
            .add_section(root, "items", Orientation::Vertical, AccessorPath::field("items"))
            .unwrap();
        model.add_constant(root, "A1", 2).unwrap();
        model.add_constant(band, "A2", 0).unwrap();
        let b2 = model.add_formula(band, "B2", formula("A2*$A$1")).unwrap();
        let total = model.add_formula(root, "B4", formula("SUM(B2:B3)")).unwrap();
        let resolver = GridResolver::from_model(&model);
        ModelResolver::new(&resolver).resolve(&mut model).unwrap();
        assert_eq!(
            model.describe(model.cell(b2).expression().unwrap()),
            "(A2 * PARENT(A1))"
        );
        assert_eq!(
            model.describe(model.cell(total).expression().unwrap()),
            "SUM([SECTION1(B2); null])"
        );
    }

    #[test]
    fn intersections_resolve_statically() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model.add_constant(root, "B2", 5).unwrap();
        let c = model
            .add_formula(root, "D1", formula("A1:B2 B2:C3"))
            .unwrap();
        let resolver = GridResolver::from_model(&model);
        ModelResolver::new(&resolver).resolve(&mut model).unwrap();
        assert_eq!(model.describe(model.cell(c).expression().unwrap()), "B2");
    }

    #[test]
    fn named_ranges_and_sheets() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model.add_constant(root, "Data!A1", 1).unwrap();
        let c = model
            .add_formula(
                root,
                "Calc!A1",
                FormulaSource::new("rate + Data!A1", ReferenceDialect::A1Sheets),
            )
            .unwrap();
        model.add_constant(root, "Calc!B1", 3).unwrap();
        let mut resolver = GridResolver::from_model(&model);
        resolver.define_name("Rate", Reference::Cell(CellAddress::new(0, 1)));
        ModelResolver::new(&resolver).resolve(&mut model).unwrap();
        assert_eq!(
            model.describe(model.cell(c).expression().unwrap()),
            "(Calc!B1 + Data!A1)"
        );
    }

    #[test]
    fn r1c1_offsets_are_relative_to_the_cell_name() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model.add_constant(root, "A1", 1).unwrap();
        let c = model
            .add_formula(root, "B2", FormulaSource::new("R[-1]C[-1]*2", ReferenceDialect::R1C1))
            .unwrap();
        let resolver = GridResolver::from_model(&model);
        ModelResolver::new(&resolver).resolve(&mut model).unwrap();
        assert_eq!(model.describe(model.cell(c).expression().unwrap()), "(A1 * 2)");
    }

    #[test]
    fn broken_references_fail_to_resolve() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model
            .add_formula(root, "A1", FormulaSource::new("#REF!+1", ReferenceDialect::Ooxml))
            .unwrap();
        let resolver = GridResolver::from_model(&model);
        let err = ModelResolver::new(&resolver).resolve(&mut model).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedExpression { .. }));
    }
}
