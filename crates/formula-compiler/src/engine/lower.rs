use std::collections::HashMap;

use formula_model::{
    CellContent, CellId, ComputationModel, DataType, ExpressionNode, FoldDef, ModelError,
    NodeKind, OutputInterface, SectionId,
};

use super::program::{
    Code, DatabaseFoldCode, FoldCode, OutputCode, Program, RowsOutput, SectionCode, SlotBody,
    SlotCode,
};
use crate::error::{CompilerError, CompilerResult};
use crate::scope::{LetDictionary, Scoped};

/// Lowers an optimized, typed model into a [`Program`].
///
/// Every live cell gets a slot in its section. Outputs are resolved against `interface`; an
/// accessor the model does not bind is a [`ModelError::NameNotFound`].
pub(crate) fn lower(
    model: &ComputationModel,
    interface: &OutputInterface,
    full_caching: bool,
) -> CompilerResult<Program> {
    let section_count = count_sections(model);
    let mut slots = HashMap::new();
    for index in 0..section_count {
        let section = SectionId::new(index);
        for (slot, &cell) in model.section(section).cells().iter().enumerate() {
            slots.insert(cell, (index, slot as u32));
        }
    }

    let mut lowerer = Lowerer {
        model,
        slots: &slots,
        scope: LetDictionary::new(),
        locals: 0,
    };
    let mut sections = Vec::with_capacity(section_count as usize);
    for index in 0..section_count {
        let id = SectionId::new(index);
        let section = model.section(id);
        let mut codes = Vec::with_capacity(section.cells().len());
        for &cell in section.cells() {
            codes.push(lowerer.slot(cell)?);
        }
        sections.push(SectionCode {
            name: section.name().to_string(),
            parent: section.parent().map(|p| p.index() as u32),
            rows: section.input().cloned(),
            slots: codes,
            outputs: Vec::new(),
            row_outputs: Vec::new(),
        });
    }
    bind_outputs(model, model.root(), interface, &slots, &mut sections)?;

    let program = Program {
        numeric_type: model.numeric_type(),
        full_caching,
        sections,
    };
    log::debug!(
        "lowered {} slots in {} sections",
        program.slot_count(),
        program.sections.len()
    );
    Ok(program)
}

fn count_sections(model: &ComputationModel) -> u32 {
    let mut count = 1;
    let mut stack = vec![model.root()];
    while let Some(section) = stack.pop() {
        let children = model.section(section).sections();
        count += children.len() as u32;
        stack.extend_from_slice(children);
    }
    count
}

fn bind_outputs(
    model: &ComputationModel,
    section: SectionId,
    interface: &OutputInterface,
    slots: &HashMap<CellId, (u32, u32)>,
    sections: &mut [SectionCode],
) -> CompilerResult<()> {
    let template = model.section(section);
    let index = section.index();
    for accessor in &interface.outputs {
        let cell = template
            .cells()
            .iter()
            .copied()
            .find(|&c| model.cell(c).output() == Some(accessor.name.as_str()))
            .ok_or_else(|| not_found(template.name(), &accessor.name))?;
        let (_, slot) = slots[&cell];
        sections[index].outputs.push(OutputCode {
            name: accessor.name.clone(),
            value_type: accessor.value_type,
            slot,
        });
    }
    for nested in &interface.sections {
        let child = template
            .sections()
            .iter()
            .copied()
            .find(|&s| model.section(s).output() == Some(nested.name.as_str()))
            .ok_or_else(|| not_found(template.name(), &nested.name))?;
        sections[index].row_outputs.push(RowsOutput {
            name: nested.name.clone(),
            section: child.index() as u32,
        });
        bind_outputs(model, child, &nested.interface, slots, sections)?;
    }
    Ok(())
}

fn not_found(section: &str, name: &str) -> CompilerError {
    ModelError::NameNotFound {
        name: format!("{section}.{name}"),
    }
    .into()
}

struct Lowerer<'a> {
    model: &'a ComputationModel,
    slots: &'a HashMap<CellId, (u32, u32)>,
    scope: LetDictionary<u32>,
    locals: u32,
}

impl Scoped for Lowerer<'_> {
    type Value = u32;

    fn let_dictionary(&mut self) -> &mut LetDictionary<u32> {
        &mut self.scope
    }
}

impl Lowerer<'_> {
    fn slot(&mut self, id: CellId) -> CompilerResult<SlotCode> {
        let cell = self.model.cell(id);
        self.locals = 0;
        let body = match (cell.input(), cell.content()) {
            (Some(path), _) => SlotBody::Input(path.clone()),
            (None, CellContent::Empty) => SlotBody::Value(formula_model::Value::Null),
            (None, CellContent::Constant(value)) => SlotBody::Value(value.clone()),
            (None, CellContent::Expression(expr)) => SlotBody::Code(self.lower(expr)?),
            (None, CellContent::Formula(source)) => {
                return Err(CompilerError::unsupported(format!(
                    "unresolved formula `{}` in {}",
                    source.text,
                    cell.name()
                )))
            }
        };
        let data_type = cell.data_type().unwrap_or(if cell.is_input() {
            DataType::Numeric
        } else {
            DataType::Null
        });
        Ok(SlotCode {
            name: cell.name().to_string(),
            data_type,
            body,
            locals: self.locals,
        })
    }

    fn local(&mut self) -> u32 {
        self.locals += 1;
        self.locals - 1
    }

    fn lower_all(&mut self, nodes: &[ExpressionNode]) -> CompilerResult<Vec<Code>> {
        nodes.iter().map(|n| self.lower(n)).collect()
    }

    fn lower(&mut self, node: &ExpressionNode) -> CompilerResult<Code> {
        let args = &node.args;
        Ok(match &node.kind {
            NodeKind::Constant(value) => Code::Const(value.clone()),
            NodeKind::CellRef(id) => {
                let Some(&(section, slot)) = self.slots.get(id) else {
                    return Err(CompilerError::unsupported(format!(
                        "reference to removed cell {}",
                        self.model.cell(*id).name()
                    )));
                };
                Code::Slot { section, slot }
            }
            NodeKind::Reference(r) => {
                return Err(CompilerError::unsupported(format!("unresolved reference {r}")))
            }
            NodeKind::Operator(op) => Code::Op(*op, self.lower_all(args)?),
            NodeKind::Function(fun) if fun.is_database() => {
                return Err(CompilerError::UnsupportedFunction {
                    name: fun.name().to_string(),
                })
            }
            NodeKind::Function(fun) => Code::Call(*fun, self.lower_all(args)?),
            NodeKind::Array(desc) | NodeKind::MakeArray(desc) => Code::Array {
                rows: desc.rows,
                cols: desc.cols,
                items: self.lower_all(args)?,
            },
            NodeKind::ParentSection(inner) => {
                let parent = self.model.section(*inner).parent().ok_or_else(|| {
                    CompilerError::unsupported("parent reference from the root section")
                })?;
                let [inner] = args.as_slice() else {
                    return Err(CompilerError::unsupported("empty parent section reference"));
                };
                Code::Outer {
                    section: parent.index() as u32,
                    code: Box::new(self.lower(inner)?),
                }
            }
            NodeKind::SubSection(section) => Code::Rows {
                section: section.index() as u32,
                items: self.lower_all(args)?,
            },
            NodeKind::Let(name) => {
                let [value, body] = args.as_slice() else {
                    return Err(CompilerError::unsupported("LET needs a value and a body"));
                };
                let value = self.lower(value)?;
                let local = self.local();
                let mut scope = self.scope();
                scope.bind(name.as_str(), None, Some(local));
                let body = scope.lower(body)?;
                Code::Let {
                    local,
                    value: Box::new(value),
                    body: Box::new(body),
                }
            }
            NodeKind::LetVar(name) => match self.scope.get(name).and_then(|e| e.value) {
                Some(local) => Code::Local(local),
                None => {
                    return Err(CompilerError::unsupported(format!("unbound variable `{name}`")))
                }
            },
            NodeKind::Fold(def) => Code::Fold(Box::new(self.fold(def, None, args)?)),
            NodeKind::FoldArray(def) => {
                Code::Fold(Box::new(self.fold(&def.fold, Some(&def.index), args)?))
            }
            NodeKind::DatabaseFold(def) => {
                let [seed, step, filter, rows @ ..] = args.as_slice() else {
                    return Err(CompilerError::unsupported("database fold without a filter"));
                };
                let seed = self.lower(seed)?;
                let rows = self.lower_all(rows)?;
                let acc = self.local();
                let elt = self.local();
                let step = {
                    let mut scope = self.scope();
                    scope.bind(def.fold.acc.as_str(), None, Some(acc));
                    scope.bind(def.fold.elt.as_str(), None, Some(elt));
                    scope.lower(step)?
                };
                let columns: Vec<u32> = def.columns.iter().map(|_| self.local()).collect();
                let filter = {
                    let mut scope = self.scope();
                    for (name, &local) in def.columns.iter().zip(&columns) {
                        scope.bind(name.as_str(), None, Some(local));
                    }
                    scope.lower(filter)?
                };
                Code::DatabaseFold(Box::new(DatabaseFoldCode {
                    acc,
                    elt,
                    from_first: def.fold.from_first,
                    visits: def.fold.filter,
                    columns,
                    folded_column: def.folded_column as u32,
                    seed,
                    step,
                    filter,
                    rows,
                }))
            }
            NodeKind::Count => Code::Count(self.lower_all(args)?),
        })
    }

    fn fold(
        &mut self,
        def: &FoldDef,
        index_name: Option<&str>,
        args: &[ExpressionNode],
    ) -> CompilerResult<FoldCode> {
        let [seed, step, elements @ ..] = args else {
            return Err(CompilerError::unsupported("fold without seed and step"));
        };
        let seed = self.lower(seed)?;
        let elements = self.lower_all(elements)?;
        let acc = self.local();
        let elt = self.local();
        let index = index_name.map(|_| self.local());
        let mut scope = self.scope();
        scope.bind(def.acc.as_str(), None, Some(acc));
        scope.bind(def.elt.as_str(), None, Some(elt));
        if let (Some(name), Some(local)) = (index_name, index) {
            scope.bind(name, None, Some(local));
        }
        let step = scope.lower(step)?;
        Ok(FoldCode {
            acc,
            elt,
            index,
            from_first: def.from_first,
            visits: def.filter,
            seed,
            step,
            elements,
        })
    }
}
