use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use formula_model::Value;

use super::input::{read_rows, InputObject};
use super::program::{Program, SectionCode};
use super::vm::{Cache, Frame, Vm};
use crate::error::{ErrorKind, EvalError};
use crate::numeric::with_arithmetic;

/// One evaluation context over an [`crate::Engine`]: a root input object, or one row of a
/// repeating section exposed as an output.
///
/// Not meant to be shared across threads; create one per thread from the same engine instead.
pub struct Computation {
    program: Arc<Program>,
    frames: Vec<Frame>,
    cache: Option<Rc<RefCell<Cache>>>,
}

impl Computation {
    pub(crate) fn new(program: Arc<Program>, input: Rc<dyn InputObject>) -> Self {
        let cache = program
            .full_caching
            .then(|| Rc::new(RefCell::new(Cache::new())));
        Self {
            program,
            frames: vec![Frame {
                section: 0,
                record: input,
                row: None,
            }],
            cache,
        }
    }

    fn section(&self) -> Result<&SectionCode, EvalError> {
        let index = self.frames.last().map_or(0, |f| f.section);
        Ok(self.program.section(index).ok_or(ErrorKind::Ref)?)
    }

    /// Computes the output accessor `name`.
    pub fn value(&self, name: &str) -> Result<Value, EvalError> {
        let output = self
            .section()?
            .output(name)
            .ok_or_else(|| EvalError::NameNotFound {
                name: name.to_string(),
            })?;
        let program = &*self.program;
        let cache = self.cache.as_deref();
        with_arithmetic!(program.numeric_type, ar => {
            Vm::new(&ar, program, self.frames.clone(), cache).output(output.slot, output.value_type)
        })
    }

    /// One computation per input row of the repeating section exposed as `name`.
    pub fn rows(&self, name: &str) -> Result<Vec<Computation>, EvalError> {
        let rows = self
            .section()?
            .row_output(name)
            .ok_or_else(|| EvalError::NameNotFound {
                name: name.to_string(),
            })?;
        let path = self
            .program
            .section(rows.section)
            .and_then(|s| s.rows.as_ref())
            .ok_or(ErrorKind::Ref)?;
        let record = &self.frames.last().ok_or(ErrorKind::Ref)?.record;
        let records = read_rows(record, path)?;
        Ok(records
            .into_iter()
            .enumerate()
            .map(|(row, record)| {
                let mut frames = self.frames.clone();
                frames.push(Frame {
                    section: rows.section,
                    record,
                    row: Some(row as u32),
                });
                Computation {
                    program: Arc::clone(&self.program),
                    frames,
                    cache: self.cache.clone(),
                }
            })
            .collect())
    }

    /// Names of the value outputs available on this computation.
    pub fn output_names(&self) -> Vec<&str> {
        self.section()
            .map(|s| s.outputs.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Computes every value output, in declaration order.
    pub fn values(&self) -> Result<Vec<(String, Value)>, EvalError> {
        self.output_names()
            .into_iter()
            .map(|name| Ok((name.to_string(), self.value(name)?)))
            .collect()
    }

    /// Number of memoized values; always zero without full caching.
    pub fn cached_count(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.borrow().len())
    }
}
