use core::fmt;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    AccessorPath, CellAddress, DataType, ExpressionNode, ModelError, NumericType,
    ReferenceDialect, Value,
};

/// Stable index of a cell in its [`ComputationModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(u32);

impl CellId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable index of a section in its [`ComputationModel`]. The root section is always `0`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(u32);

impl SectionId {
    pub const ROOT: SectionId = SectionId(0);

    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Repeats downwards, one row per element.
    Vertical,
    /// Repeats rightwards, one column per element.
    Horizontal,
}

/// Unparsed formula text, parsed on first demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaSource {
    pub text: String,
    pub dialect: ReferenceDialect,
    /// Address of the cell holding the formula; needed to resolve relative R1C1 offsets.
    pub origin: Option<CellAddress>,
}

impl FormulaSource {
    pub fn new(text: impl Into<String>, dialect: ReferenceDialect) -> Self {
        Self {
            text: text.into(),
            dialect,
            origin: None,
        }
    }

    pub fn at(mut self, origin: CellAddress) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// What a cell holds. The variants are exclusive: a cell never has both a constant and an
/// expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Empty,
    Constant(Value),
    Expression(ExpressionNode),
    Formula(FormulaSource),
}

#[derive(Debug, Clone)]
pub struct CellModel {
    name: String,
    section: SectionId,
    content: CellContent,
    data_type: Option<DataType>,
    input: Option<AccessorPath>,
    output: Option<String>,
    reference_count: u32,
    sub_band_accessed: bool,
    detached: bool,
}

impl CellModel {
    fn new(name: String, section: SectionId, content: CellContent) -> Self {
        Self {
            name,
            section,
            content,
            data_type: None,
            input: None,
            output: None,
            reference_count: 0,
            sub_band_accessed: false,
            detached: false,
        }
    }

    /// Source identity, e.g. `Sheet1!B3`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.content {
            CellContent::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&ExpressionNode> {
        match &self.content {
            CellContent::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn expression_mut(&mut self) -> Option<&mut ExpressionNode> {
        match &mut self.content {
            CellContent::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn formula_source(&self) -> Option<&FormulaSource> {
        match &self.content {
            CellContent::Formula(s) => Some(s),
            _ => None,
        }
    }

    /// Moves the expression out, leaving the cell empty until [`Self::set_expression`] or
    /// [`Self::set_constant`] puts content back.
    pub fn take_expression(&mut self) -> Option<ExpressionNode> {
        match std::mem::replace(&mut self.content, CellContent::Empty) {
            CellContent::Expression(e) => Some(e),
            other => {
                self.content = other;
                None
            }
        }
    }

    pub fn set_expression(&mut self, expr: ExpressionNode) {
        self.content = CellContent::Expression(expr);
    }

    /// Replaces any expression with a constant.
    pub fn set_constant(&mut self, value: Value) {
        self.content = CellContent::Constant(value);
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Records the inferred type; the first recorded type wins.
    pub fn set_data_type(&mut self, data_type: DataType) {
        if self.data_type.is_none() {
            self.data_type = Some(data_type);
        }
    }

    pub fn input(&self) -> Option<&AccessorPath> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn is_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn is_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Increments the reference count and returns the new value.
    pub fn add_reference(&mut self) -> u32 {
        self.reference_count += 1;
        self.reference_count
    }

    pub fn reset_references(&mut self) {
        self.reference_count = 0;
        self.sub_band_accessed = false;
    }

    pub fn mark_sub_band_accessed(&mut self) {
        self.sub_band_accessed = true;
    }

    pub fn is_sub_band_accessed(&self) -> bool {
        self.sub_band_accessed
    }

    /// Whether the value has to live in its own slot: shared, bound, or read from inside a band.
    pub fn is_caching_candidate(&self) -> bool {
        self.reference_count > 1 || self.sub_band_accessed || self.is_input() || self.is_output()
    }

    /// Removed from its section by the inliner.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

#[derive(Debug, Clone)]
pub struct SectionModel {
    name: String,
    orientation: Orientation,
    parent: Option<SectionId>,
    input: Option<AccessorPath>,
    output: Option<String>,
    cells: Vec<CellId>,
    sections: Vec<SectionId>,
}

impl SectionModel {
    fn new(name: String, orientation: Orientation, parent: Option<SectionId>) -> Self {
        Self {
            name,
            orientation,
            parent,
            input: None,
            output: None,
            cells: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn parent(&self) -> Option<SectionId> {
        self.parent
    }

    /// Accessor on the parent's input object that yields this section's rows.
    pub fn input(&self) -> Option<&AccessorPath> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Per-iteration template cells, in definition order.
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    pub fn sections(&self) -> &[SectionId] {
        &self.sections
    }
}

/// Unit of compilation: an arena of cells and (possibly nested) repeating sections.
#[derive(Debug, Clone)]
pub struct ComputationModel {
    cells: Vec<CellModel>,
    sections: Vec<SectionModel>,
    names: HashMap<String, CellId>,
    numeric_type: NumericType,
}

impl ComputationModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cells: Vec::new(),
            sections: vec![SectionModel::new(name.into(), Orientation::Vertical, None)],
            names: HashMap::new(),
            numeric_type: NumericType::default(),
        }
    }

    pub fn root(&self) -> SectionId {
        SectionId::ROOT
    }

    pub fn numeric_type(&self) -> NumericType {
        self.numeric_type
    }

    pub fn set_numeric_type(&mut self, numeric_type: NumericType) {
        self.numeric_type = numeric_type;
    }

    pub fn add_section(
        &mut self,
        parent: SectionId,
        name: impl Into<String>,
        orientation: Orientation,
        input: AccessorPath,
    ) -> Result<SectionId, ModelError> {
        let name = name.into();
        if self.sections.iter().any(|s| s.name == name) {
            return Err(ModelError::DuplicateDefinition { name });
        }
        let id = SectionId::new(self.sections.len() as u32);
        let mut section = SectionModel::new(name, orientation, Some(parent));
        section.input = Some(input);
        self.sections.push(section);
        self.sections[parent.index()].sections.push(id);
        Ok(id)
    }

    /// Exposes the section's rows through an output accessor of the given name.
    pub fn bind_section_output(&mut self, section: SectionId, name: impl Into<String>) {
        self.sections[section.index()].output = Some(name.into());
    }

    pub fn add_cell(
        &mut self,
        section: SectionId,
        name: impl Into<String>,
        content: CellContent,
    ) -> Result<CellId, ModelError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(ModelError::DuplicateDefinition { name });
        }
        let id = CellId::new(self.cells.len() as u32);
        self.names.insert(name.clone(), id);
        self.cells.push(CellModel::new(name, section, content));
        self.sections[section.index()].cells.push(id);
        Ok(id)
    }

    pub fn add_constant(
        &mut self,
        section: SectionId,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<CellId, ModelError> {
        self.add_cell(section, name, CellContent::Constant(value.into()))
    }

    pub fn add_expression(
        &mut self,
        section: SectionId,
        name: impl Into<String>,
        expr: ExpressionNode,
    ) -> Result<CellId, ModelError> {
        self.add_cell(section, name, CellContent::Expression(expr))
    }

    pub fn add_formula(
        &mut self,
        section: SectionId,
        name: impl Into<String>,
        source: FormulaSource,
    ) -> Result<CellId, ModelError> {
        self.add_cell(section, name, CellContent::Formula(source))
    }

    pub fn bind_input(&mut self, cell: CellId, path: AccessorPath) {
        self.cells[cell.index()].input = Some(path);
    }

    /// Binds `cell` to the output accessor `name`; names are unique within a section.
    pub fn bind_output(&mut self, cell: CellId, name: impl Into<String>) -> Result<(), ModelError> {
        let name = name.into();
        let section = self.cells[cell.index()].section;
        let taken = self.sections[section.index()]
            .cells
            .iter()
            .any(|&c| c != cell && self.cells[c.index()].output.as_deref() == Some(name.as_str()));
        if taken {
            return Err(ModelError::DuplicateDefinition { name });
        }
        self.cells[cell.index()].output = Some(name);
        Ok(())
    }

    pub fn cell(&self, id: CellId) -> &CellModel {
        &self.cells[id.index()]
    }

    pub fn cell_mut(&mut self, id: CellId) -> &mut CellModel {
        &mut self.cells[id.index()]
    }

    pub fn section(&self, id: SectionId) -> &SectionModel {
        &self.sections[id.index()]
    }

    pub fn find_cell(&self, name: &str) -> Option<CellId> {
        self.names.get(name).copied()
    }

    pub fn cell_named(&self, name: &str) -> Result<CellId, ModelError> {
        self.find_cell(name).ok_or_else(|| ModelError::NameNotFound {
            name: name.to_string(),
        })
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(|i| SectionId::new(i as u32))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Every cell ever added, including ones the inliner detached.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> {
        (0..self.cells.len() as u32).map(CellId::new)
    }

    /// Cells still listed in a section, depth-first from the root.
    pub fn live_cells(&self) -> Vec<CellId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(section) = stack.pop() {
            let s = self.section(section);
            out.extend_from_slice(&s.cells);
            stack.extend(s.sections.iter().rev());
        }
        out
    }

    /// Whether `ancestor` encloses `section` (a section encloses itself).
    pub fn is_ancestor(&self, ancestor: SectionId, section: SectionId) -> bool {
        let mut current = Some(section);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.section(s).parent;
        }
        false
    }

    /// Removes a cell from its section's template. The arena slot stays valid.
    pub fn detach_cell(&mut self, id: CellId) {
        let section = self.cells[id.index()].section;
        self.sections[section.index()].cells.retain(|&c| c != id);
        self.cells[id.index()].detached = true;
    }

    /// Renders an expression using cell source identities.
    pub fn describe(&self, expr: &ExpressionNode) -> String {
        let names = |id: CellId| {
            self.cells
                .get(id.index())
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let text = expr.display_with(&names).to_string();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_cell_names_are_rejected() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        model.add_constant(root, "A1", 1).unwrap();
        let err = model.add_constant(root, "A1", 2).unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicateDefinition {
                name: "A1".to_string()
            }
        );
    }

    #[test]
    fn take_expression_leaves_constants_alone() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let c = model.add_constant(root, "A1", 1).unwrap();
        assert!(model.cell_mut(c).take_expression().is_none());
        assert_eq!(model.cell(c).constant_value(), Some(&Value::number(1)));
    }

    #[test]
    fn detached_cells_leave_the_section() {
        let mut model = ComputationModel::new("m");
        let root = model.root();
        let band = model
            .add_section(root, "rows", Orientation::Vertical, AccessorPath::field("rows"))
            .unwrap();
        let a = model.add_constant(root, "A1", 1).unwrap();
        let b = model.add_constant(band, "B2", 2).unwrap();
        assert_eq!(model.live_cells(), vec![a, b]);
        model.detach_cell(b);
        assert_eq!(model.live_cells(), vec![a]);
        assert!(model.cell(b).is_detached());
        assert!(model.is_ancestor(root, band));
        assert!(!model.is_ancestor(band, root));
    }
}
