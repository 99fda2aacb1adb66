use core::fmt;

use serde::{Deserialize, Serialize};

use crate::Value;

/// One named step of an accessor path, optionally parameterized (`orders`, `rate("EUR")`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl AccessorStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for AccessorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("(")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Ordered chain of steps leading from an input object to a value or a row collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorPath {
    pub steps: Vec<AccessorStep>,
}

impl AccessorPath {
    pub fn new(steps: Vec<AccessorStep>) -> Self {
        Self { steps }
    }

    /// Path of plain field names: `AccessorPath::fields(["customer", "rate"])`.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(AccessorStep::new).collect())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::new(vec![AccessorStep::new(name)])
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps but the last, and the last one.
    pub fn split_last(&self) -> Option<(&[AccessorStep], &AccessorStep)> {
        let (last, init) = self.steps.split_last()?;
        Some((init, last))
    }
}

impl fmt::Display for AccessorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Type an output accessor declares for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueType {
    /// Whatever the cell produces.
    #[default]
    Any,
    Number,
    /// Number truncated towards zero.
    Integer,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAccessor {
    pub name: String,
    pub value_type: ValueType,
}

/// Output accessors the compiled engine must provide, including those of repeating sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInterface {
    pub outputs: Vec<OutputAccessor>,
    pub sections: Vec<SectionInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInterface {
    pub name: String,
    pub interface: OutputInterface,
}

impl OutputInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.outputs.push(OutputAccessor {
            name: name.into(),
            value_type,
        });
        self
    }

    pub fn section(mut self, name: impl Into<String>, interface: OutputInterface) -> Self {
        self.sections.push(SectionInterface {
            name: name.into(),
            interface,
        });
        self
    }

    pub fn find_output(&self, name: &str) -> Option<&OutputAccessor> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn find_section(&self, name: &str) -> Option<&OutputInterface> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.interface)
    }
}
