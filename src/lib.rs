//! # shadejit - a shading language compiled to x86-64 at load time
//!
//! A small C-like shading language for a software rasteriser. Vertex and fragment
//! shaders are compiled straight to x86-64 SSE machine code in executable memory,
//! and the host drives them through named global variables.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shadejit::{compile, Stage};
//!
//! # fn main() -> shadejit::Result<()> {
//! let source = r#"
//!     export void main() {
//!         g_world_position = g_model * g_position;
//!         g_projected_position = g_projection * g_view * g_model * g_position;
//!     }
//! "#;
//!
//! let identity = [
//!     [1.0, 0.0, 0.0, 0.0],
//!     [0.0, 1.0, 0.0, 0.0],
//!     [0.0, 0.0, 1.0, 0.0],
//!     [0.0, 0.0, 0.0, 1.0],
//! ];
//!
//! let mut shader = compile(source, Stage::Vertex)?;
//! shader.write_global("g_model", &identity)?;
//! shader.write_global("g_view", &identity)?;
//! shader.write_global("g_projection", &identity)?;
//! shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 1.0])?;
//! shader.execute()?;
//!
//! let projected: [f32; 4] = shader.read_global("g_projected_position")?;
//! assert_eq!(projected, [1.0, 2.0, 3.0, 1.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Language Overview
//!
//! - **Types**: `void int float bool vec3 vec4 mat3x3 mat4x4`
//! - **Decorators**: `export` on functions, `uniform` / `interpolated` on globals
//! - **Statements**: declarations with initializers, expressions, `if`/`else`, `return`
//! - **Operators**: `= += -= *= /=`, `+ - * /`, `== != < <= > >=` (in `if` conditions), unary `-` and `!`
//! - **Subscripts**: `v[i]` on vectors, `m[i]` on matrix rows
//! - **Intrinsics**: `normalize`, `length`, `dot3`, `clamp`, `max`, `nop`
//!
//! `while` and `for` are parsed and type checked but have no lowering, so a shader
//! using them fails with [`Error::MalformedTree`] when code is generated.
//!
//! ## Architecture
//!
//! ```text
//! Source → Scanner → Tokens → Parser → Typed tree → CodeGenerator → RuntimeObject
//!                                  ↘ SymbolTable / FunctionTable ↗
//! ```
//!
//! ### Main Components
//!
//! - [`Scanner`] - Tokenizes source with longest-match literals and regex patterns
//! - [`Parser`] - Recursive descent with inline type checking
//! - [`Compiler`] - Runs the phases for one stage under [`CompileOptions`]
//! - [`RuntimeObject`] - Executable memory plus the globals directory
//!
//! ## Error Handling
//!
//! Parse failures carry a source excerpt with a caret under the offending column:
//!
//! ```rust
//! use shadejit::{compile, Stage};
//!
//! let err = compile("export void main() {\n  vec4 v;\n  v = 1.0;\n}", Stage::Vertex).unwrap_err();
//! assert_eq!(err.to_string(), "Incompatible types for assignment 'vec4' and 'float'");
//! assert!(err.excerpt().unwrap().contains("^ Incompatible types"));
//! ```
//!
//! ## Threading
//!
//! A [`RuntimeObject`] is `Send` but not `Sync`: one object runs one invocation at
//! a time, and independent objects may run on separate threads.

/// Version of the shader compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod types;

// Re-export main types
pub use compiler::{CompileOptions, Compiler, PlacementPolicy, Stage};
pub use error::{Error, Result};
pub use lexer::{Scanner, Token, TokenKind};
pub use parser::{parse_source, ParsedProgram, Parser, Program};
pub use runtime::{GlobalInfo, Residency, RuntimeObject, ShaderValue};
pub use types::ShaderType;

/// Compiles `source` for `stage` with default options
pub fn compile(source: &str, stage: Stage) -> Result<RuntimeObject> {
    Compiler::new(CompileOptions::for_stage(stage)).compile(source)
}
