use formula_model::{
    AccessorPath, DataType, FoldFilter, Function, NumericType, Operator, Value, ValueType,
};
use serde::{Deserialize, Serialize};

/// Lowered expression. Cells are addressed by (section, slot); `LET` and fold variables by
/// local index within the slot being evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Code {
    Const(Value),
    /// Slot of `section`, read in the innermost frame of that section.
    Slot { section: u32, slot: u32 },
    Local(u32),
    Op(Operator, Vec<Code>),
    Call(Function, Vec<Code>),
    Array {
        rows: u32,
        cols: u32,
        items: Vec<Code>,
    },
    /// Evaluates `code` in the innermost frame of `section`, with the frames inside it popped.
    Outer { section: u32, code: Box<Code> },
    /// Evaluates `items` once per runtime row of `section`.
    Rows { section: u32, items: Vec<Code> },
    Let {
        local: u32,
        value: Box<Code>,
        body: Box<Code>,
    },
    Fold(Box<FoldCode>),
    DatabaseFold(Box<DatabaseFoldCode>),
    Count(Vec<Code>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldCode {
    pub acc: u32,
    pub elt: u32,
    /// Bound to the 1-based element position; empty elements are kept when present.
    pub index: Option<u32>,
    pub from_first: bool,
    /// Elements the fold visits. Positional folds see every element.
    #[serde(default)]
    pub visits: FoldFilter,
    pub seed: Code,
    pub step: Code,
    pub elements: Vec<Code>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFoldCode {
    pub acc: u32,
    pub elt: u32,
    pub from_first: bool,
    #[serde(default)]
    pub visits: FoldFilter,
    pub columns: Vec<u32>,
    pub folded_column: u32,
    pub seed: Code,
    pub step: Code,
    pub filter: Code,
    pub rows: Vec<Code>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotBody {
    /// Read from the frame's input object and coerced to the slot type.
    Input(AccessorPath),
    Value(Value),
    Code(Code),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCode {
    /// Source identity of the cell.
    pub name: String,
    pub data_type: DataType,
    pub body: SlotBody,
    /// Number of locals `body` uses.
    pub locals: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCode {
    pub name: String,
    pub value_type: ValueType,
    pub slot: u32,
}

/// A repeating section exposed as an output of its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsOutput {
    pub name: String,
    pub section: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionCode {
    pub name: String,
    pub parent: Option<u32>,
    /// Accessor on the parent's record yielding this section's rows.
    pub rows: Option<AccessorPath>,
    pub slots: Vec<SlotCode>,
    pub outputs: Vec<OutputCode>,
    pub row_outputs: Vec<RowsOutput>,
}

/// Everything an [`crate::Engine`] needs; this is what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub numeric_type: NumericType,
    pub full_caching: bool,
    /// Indexed by section id; the root section comes first.
    pub sections: Vec<SectionCode>,
}

impl Program {
    pub(crate) fn section(&self, index: u32) -> Option<&SectionCode> {
        self.sections.get(index as usize)
    }

    pub(crate) fn slot(&self, section: u32, slot: u32) -> Option<&SlotCode> {
        self.section(section)?.slots.get(slot as usize)
    }

    /// Total number of slots over all sections.
    pub fn slot_count(&self) -> usize {
        self.sections.iter().map(|s| s.slots.len()).sum()
    }
}

impl SectionCode {
    pub(crate) fn output(&self, name: &str) -> Option<&OutputCode> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub(crate) fn row_output(&self, name: &str) -> Option<&RowsOutput> {
        self.row_outputs.iter().find(|o| o.name == name)
    }
}
