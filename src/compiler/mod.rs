//! # Shader compiler - source to x86-64 machine code
//!
//! Compiles one shader for one pipeline stage into a [`RuntimeObject`] whose
//! exported `main` can be executed directly by the host.
//!
//! ## Architecture
//!
//! ```text
//! Source → Tokens → Typed tree + symbols → Layout → x86-64 SSE → Runtime object
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use shadejit::compiler::{CompileOptions, Compiler, Stage};
//!
//! let options = CompileOptions { stage: Stage::Fragment, ..Default::default() };
//! let mut shader = Compiler::new(options).compile(source)?;
//! shader.write_global("g_world_normal", &[0.0, 1.0, 0.0, 0.0])?;
//! shader.execute()?;
//! let colour: [f32; 4] = shader.read_global("g_colour")?;
//! ```

pub mod codegen;
pub mod context;
pub mod functions;
pub mod layout;
pub mod symbols;
pub mod x86;

pub use codegen::{CodeGenerator, GeneratedFunction, GeneratedProgram, GlobalSlot};
pub use context::{ContextFunction, ContextVariable, Direction, ProgramContext, Stage};
pub use functions::{Function, FunctionId, FunctionTable};
pub use layout::{Layout, PlacementPolicy, RegisterClass, RegisterLease, Region, TemporaryScope};
pub use symbols::{Location, Scope, Symbol, SymbolId, SymbolKind, SymbolTable};

use crate::error::{Error, Result};
use crate::parser::parse_source;
use crate::runtime::RuntimeObject;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Pipeline stage, which decides the intrinsic variables
    pub stage: Stage,
    /// Where globals and locals are placed
    pub placement: PlacementPolicy,
    /// Keep one listing line per emitted instruction
    pub keep_listing: bool,
    /// Minimum bytes of local memory reserved in each object
    pub local_memory_floor: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            stage: Stage::Vertex,
            placement: PlacementPolicy::MemoryFirst,
            keep_listing: true,
            local_memory_floor: 256,
        }
    }
}

impl CompileOptions {
    /// Options for `stage` with everything else defaulted
    pub fn for_stage(stage: Stage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Parses options from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config {
            message: e.to_string(),
        })
    }
}

/// Shader compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options this compiler was created with
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compiles `source` into an executable object
    pub fn compile(&self, source: &str) -> Result<RuntimeObject> {
        let program = self.generate(source)?;

        // Phase 4: Place into executable memory
        let object = RuntimeObject::build(program, self.options.local_memory_floor)?;
        debug!(
            bytes = object.code_size(),
            exports = object.exports().len(),
            "runtime object built"
        );
        Ok(object)
    }

    /// Runs every phase up to machine code without allocating executable memory
    pub fn generate(&self, source: &str) -> Result<GeneratedProgram> {
        // Phase 1: Context
        let context = ProgramContext::for_stage(self.options.stage);
        debug!(stage = ?self.options.stage, bytes = source.len(), "compiling shader");

        // Phase 2: Tokenize, parse and type check
        let parsed = parse_source(source, &context)?;
        debug!(
            items = parsed.program.items.len(),
            symbols = parsed.symbols.len(),
            "syntax tree built"
        );

        // Phase 3: Layout and code generation
        let generator = CodeGenerator::new(
            parsed.symbols,
            parsed.functions,
            context,
            self.options.placement,
            self.options.keep_listing,
        );
        let program = generator.generate(&parsed.program)?;
        debug!(
            functions = program.functions.len(),
            global_bytes = program.global_size,
            local_bytes = program.local_size,
            "machine code generated"
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let compiler = Compiler::new(CompileOptions::default());
        assert_eq!(compiler.options().stage, Stage::Vertex);
        assert_eq!(compiler.options().placement, PlacementPolicy::MemoryFirst);
        assert!(compiler.options().keep_listing);
        assert_eq!(compiler.options().local_memory_floor, 256);
    }

    #[test]
    fn test_options_from_json() {
        let options =
            CompileOptions::from_json(r#"{ "stage": "Fragment", "placement": "RegisterFirst" }"#)
                .unwrap();
        assert_eq!(options.stage, Stage::Fragment);
        assert_eq!(options.placement, PlacementPolicy::RegisterFirst);
        assert_eq!(options.local_memory_floor, 256);

        let err = CompileOptions::from_json(r#"{ "stage": "Geometry" }"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_generate_without_executing() {
        let compiler = Compiler::new(CompileOptions::for_stage(Stage::Fragment));
        let program = compiler
            .generate("export void main() { g_colour = g_world_normal; }")
            .unwrap();
        assert_eq!(program.functions.len(), 1);
        assert!(program.globals.iter().any(|g| g.name == "g_colour"));
    }

    #[test]
    fn test_syntax_errors_surface() {
        let compiler = Compiler::new(CompileOptions::default());
        let err = compiler
            .generate("export void main() { vec4 v; v = 1.0; }")
            .unwrap_err();
        assert!(err.is_syntax());
        assert_eq!(err.to_string(), "Incompatible types for assignment 'vec4' and 'float'");
    }
}
