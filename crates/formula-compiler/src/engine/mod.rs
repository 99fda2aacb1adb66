//! Lowering into a [`Program`], and the [`Engine`] that evaluates it.
//!
//! An engine is immutable and can be shared between threads; every [`Computation`] created from
//! it evaluates against its own input object.

mod compile;
mod computation;
mod input;
mod lower;
mod program;
mod vm;

use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::Arc;

use formula_model::NumericType;

use crate::error::EngineError;

pub use compile::{CompileOptions, EngineCompiler};
pub use computation::Computation;
pub use input::{AccessorError, Input, InputFn, InputObject, Record};
pub use program::{
    Code, DatabaseFoldCode, FoldCode, OutputCode, Program, RowsOutput, SectionCode, SlotBody,
    SlotCode,
};

/// Leading bytes of a saved engine.
pub const ENGINE_MAGIC: [u8; 4] = *b"FCEN";
/// Version of the saved layout; bumped whenever [`Program`] changes incompatibly.
pub const ENGINE_FORMAT_VERSION: u32 = 1;

/// A compiled computation model.
#[derive(Debug, Clone)]
pub struct Engine {
    program: Arc<Program>,
}

impl Engine {
    pub fn new(program: Program) -> Self {
        Self {
            program: Arc::new(program),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn numeric_type(&self) -> NumericType {
        self.program.numeric_type
    }

    pub fn new_computation(&self, input: impl InputObject + 'static) -> Computation {
        self.computation_for(Rc::new(input))
    }

    pub fn computation_for(&self, input: Rc<dyn InputObject>) -> Computation {
        Computation::new(Arc::clone(&self.program), input)
    }

    /// Writes the engine: magic, little-endian format version, then the JSON program.
    pub fn save_to(&self, mut sink: impl Write) -> Result<(), EngineError> {
        let payload = serde_json::to_vec(&*self.program)?;
        sink.write_all(&ENGINE_MAGIC)?;
        sink.write_all(&ENGINE_FORMAT_VERSION.to_le_bytes())?;
        sink.write_all(&payload)?;
        sink.flush()?;
        log::debug!(
            "saved engine (format {ENGINE_FORMAT_VERSION}, {} payload bytes)",
            payload.len()
        );
        Ok(())
    }

    pub fn load_from(mut source: impl Read) -> Result<Engine, EngineError> {
        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if magic != ENGINE_MAGIC {
            return Err(EngineError::UnsupportedFormat { found: magic });
        }
        let mut version = [0u8; 4];
        source.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != ENGINE_FORMAT_VERSION {
            return Err(EngineError::UnsupportedVersion { found: version });
        }
        let mut payload = Vec::new();
        source.read_to_end(&mut payload)?;
        let program: Program = serde_json::from_slice(&payload)?;
        if crate::numeric::validate(program.numeric_type).is_err() {
            return Err(EngineError::Deserialize(<serde_json::Error as serde::de::Error>::custom(format!(
                "unsupported numeric type {}",
                program.numeric_type
            ))));
        }
        log::debug!(
            "loaded engine (format {version}, {} payload bytes, {} slots)",
            payload.len(),
            program.slot_count()
        );
        Ok(Engine::new(program))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let mut bytes = Vec::new();
        self.save_to(&mut bytes)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Engine, EngineError> {
        Self::load_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Engine {
        Engine::new(Program {
            numeric_type: NumericType::scaled_long(2),
            full_caching: true,
            sections: Vec::new(),
        })
    }

    #[test]
    fn saved_engines_start_with_magic_and_version() {
        let bytes = empty().to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"FCEN");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        let loaded = Engine::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.program(), empty().program());
    }

    #[test]
    fn foreign_and_future_formats_are_rejected() {
        let err = Engine::from_bytes(b"PK\x03\x04rest").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat { found } if &found == b"PK\x03\x04"));

        let mut bytes = empty().to_bytes().unwrap();
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            Engine::from_bytes(&bytes),
            Err(EngineError::UnsupportedVersion { found: 2 })
        ));

        assert!(matches!(Engine::from_bytes(b"FC"), Err(EngineError::Io(_))));
        let mut bytes = empty().to_bytes().unwrap();
        bytes.truncate(12);
        assert!(matches!(Engine::from_bytes(&bytes), Err(EngineError::Deserialize(_))));
    }
}
