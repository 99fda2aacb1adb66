use formula_model::{ComputationModel, NumericType, OutputInterface};
use serde::{Deserialize, Serialize};

use super::lower::lower;
use super::Engine;
use crate::analysis::{CircularReferenceChecker, TypeAnnotator};
use crate::error::CompilerResult;
use crate::numeric;
use crate::optimizer::{ConstantSubexpressionEliminator, IntermediateResultsInliner, ReferenceCounter};
use crate::rewrite::{ModelRewriter, RewriteRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub numeric_type: NumericType,
    /// Memoize every computed value for the lifetime of a [`crate::Computation`].
    pub full_caching: bool,
    /// Run constant elimination and inlining.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            numeric_type: NumericType::Double,
            full_caching: false,
            optimize: true,
        }
    }
}

impl CompileOptions {
    pub fn new(numeric_type: NumericType) -> Self {
        Self {
            numeric_type,
            ..Self::default()
        }
    }

    pub fn with_full_caching(mut self, full_caching: bool) -> Self {
        self.full_caching = full_caching;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

/// Runs the compilation pipeline over a resolved model.
///
/// Passes, in order: cycle check, type annotation, rewriting into folds, re-annotation of the
/// rewritten nodes, then (when optimizing) constant elimination, reference counting and
/// inlining, and finally lowering.
pub struct EngineCompiler<'r> {
    options: CompileOptions,
    rules: &'r RewriteRules,
}

impl Default for EngineCompiler<'static> {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl EngineCompiler<'static> {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            rules: RewriteRules::standard(),
        }
    }
}

impl<'r> EngineCompiler<'r> {
    pub fn with_rules(options: CompileOptions, rules: &'r RewriteRules) -> Self {
        Self { options, rules }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compiles `model` into an engine providing the accessors of `interface`.
    pub fn compile(
        &self,
        mut model: ComputationModel,
        interface: &OutputInterface,
    ) -> CompilerResult<Engine> {
        self.prepare(&mut model)?;
        let program = lower(&model, interface, self.options.full_caching)?;
        Ok(Engine::new(program))
    }

    /// Runs every pass up to (not including) lowering, leaving the optimized model in place.
    pub fn prepare(&self, model: &mut ComputationModel) -> CompilerResult<()> {
        numeric::validate(self.options.numeric_type)?;
        model.set_numeric_type(self.options.numeric_type);

        CircularReferenceChecker::new(model).check()?;
        log::debug!("{} cells free of cycles", model.live_cells().len());

        TypeAnnotator::new(model).annotate_model()?;
        ModelRewriter::new(self.rules).rewrite(model)?;
        TypeAnnotator::new(model).annotate_model()?;

        if self.options.optimize {
            ConstantSubexpressionEliminator::new(model).eliminate()?;
            ReferenceCounter::new(model).count();
            IntermediateResultsInliner::new(model).inline()?;
        }
        Ok(())
    }
}
