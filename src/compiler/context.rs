//! Stage contexts: the intrinsic variables and functions injected before parsing

use super::functions::FunctionTable;
use super::symbols::{Scope, SymbolKind, SymbolTable};
use crate::error::{Error, Result};
use crate::types::ShaderType;
use serde::{Deserialize, Serialize};

/// Pipeline stage a shader is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stage {
    /// Per-vertex transform
    #[default]
    Vertex,
    /// Per-fragment shading
    Fragment,
}

/// Direction of a context variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written by the host before execution
    Input,
    /// Written by the shader, read back by the host
    Output,
}

/// A variable the stage injects
#[derive(Debug, Clone, Copy)]
pub struct ContextVariable {
    /// Variable name
    pub name: &'static str,
    /// Variable type
    pub ty: ShaderType,
    /// Input or output
    pub direction: Direction,
}

/// A function every stage provides
#[derive(Debug, Clone, Copy)]
pub struct ContextFunction {
    /// Function name
    pub name: &'static str,
    /// Return type
    pub return_type: ShaderType,
    /// Parameter types
    pub parameters: &'static [ShaderType],
}

const FUNCTIONS: &[ContextFunction] = &[
    ContextFunction {
        name: "normalize",
        return_type: ShaderType::Vec4,
        parameters: &[ShaderType::Vec4],
    },
    ContextFunction {
        name: "length",
        return_type: ShaderType::Float,
        parameters: &[ShaderType::Vec4],
    },
    ContextFunction {
        name: "max",
        return_type: ShaderType::Float,
        parameters: &[ShaderType::Float, ShaderType::Float],
    },
    ContextFunction {
        name: "dot3",
        return_type: ShaderType::Float,
        parameters: &[ShaderType::Vec4, ShaderType::Vec4],
    },
    ContextFunction {
        name: "clamp",
        return_type: ShaderType::Float,
        parameters: &[ShaderType::Float, ShaderType::Float, ShaderType::Float],
    },
    ContextFunction {
        name: "nop",
        return_type: ShaderType::Void,
        parameters: &[ShaderType::Int],
    },
];

const VERTEX_VARIABLES: &[ContextVariable] = &[
    ContextVariable {
        name: "g_position",
        ty: ShaderType::Vec4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_normal",
        ty: ShaderType::Vec4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_model",
        ty: ShaderType::Mat4x4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_view",
        ty: ShaderType::Mat4x4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_projection",
        ty: ShaderType::Mat4x4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_normal_matrix",
        ty: ShaderType::Mat4x4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_projected_position",
        ty: ShaderType::Vec4,
        direction: Direction::Output,
    },
    ContextVariable {
        name: "g_world_position",
        ty: ShaderType::Vec4,
        direction: Direction::Output,
    },
    ContextVariable {
        name: "g_world_normal",
        ty: ShaderType::Vec4,
        direction: Direction::Output,
    },
];

const FRAGMENT_VARIABLES: &[ContextVariable] = &[
    ContextVariable {
        name: "g_world_position",
        ty: ShaderType::Vec4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_world_normal",
        ty: ShaderType::Vec4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_light0_position",
        ty: ShaderType::Vec4,
        direction: Direction::Input,
    },
    ContextVariable {
        name: "g_colour",
        ty: ShaderType::Vec4,
        direction: Direction::Output,
    },
];

/// Intrinsic names and signatures for one stage
#[derive(Debug, Clone, Copy)]
pub struct ProgramContext {
    stage: Stage,
    variables: &'static [ContextVariable],
    functions: &'static [ContextFunction],
}

impl ProgramContext {
    /// Context for a stage
    pub fn for_stage(stage: Stage) -> Self {
        let variables = match stage {
            Stage::Vertex => VERTEX_VARIABLES,
            Stage::Fragment => FRAGMENT_VARIABLES,
        };

        Self {
            stage,
            variables,
            functions: FUNCTIONS,
        }
    }

    /// The stage this context describes
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Injected variables
    pub fn variables(&self) -> &'static [ContextVariable] {
        self.variables
    }

    /// Injected functions
    pub fn functions(&self) -> &'static [ContextFunction] {
        self.functions
    }

    /// Looks up an injected variable
    pub fn variable(&self, name: &str) -> Option<&'static ContextVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Whether `name` is a context output
    pub fn is_output(&self, name: &str) -> bool {
        self.variable(name)
            .is_some_and(|v| v.direction == Direction::Output)
    }

    /// Declares every intrinsic in fresh tables
    pub fn apply(&self, symbols: &mut SymbolTable, functions: &mut FunctionTable) -> Result<()> {
        for variable in self.variables {
            symbols
                .add_intrinsic(variable.name, SymbolKind::Variable, variable.ty)
                .ok_or_else(|| Error::malformed(format!("duplicate intrinsic '{}'", variable.name)))?;
        }

        for function in self.functions {
            let symbol = symbols
                .add_intrinsic(function.name, SymbolKind::Function, ShaderType::Function)
                .ok_or_else(|| Error::malformed(format!("duplicate intrinsic '{}'", function.name)))?;

            let id = functions
                .add(function.name, symbol, function.return_type)
                .ok_or_else(|| Error::malformed(format!("duplicate intrinsic '{}'", function.name)))?;
            functions.get_mut(id).intrinsic = true;

            for (i, ty) in function.parameters.iter().enumerate() {
                let name = format!("arg{}", i);
                let parameter = symbols
                    .add(&name, Scope::Local, SymbolKind::Variable, *ty, Some(id))
                    .ok_or_else(|| Error::malformed(format!("duplicate parameter '{}'", name)))?;
                functions.get_mut(id).parameters.push(parameter);
            }
        }

        Ok(())
    }
}
