//! Function registry

use super::symbols::SymbolId;
use crate::types::ShaderType;

/// Index into the function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

/// A declared or intrinsic function
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Symbol naming the function
    pub symbol: SymbolId,
    /// Parameters in declaration order
    pub parameters: Vec<SymbolId>,
    /// Locals in declaration order
    pub locals: Vec<SymbolId>,
    /// Declared return type
    pub return_type: ShaderType,
    /// Visible to the host through the runtime object
    pub export: bool,
    /// Provided by the stage context
    pub intrinsic: bool,
}

/// Registry of functions, keyed by name
#[derive(Debug, Default, Clone)]
pub struct FunctionTable {
    functions: Vec<Function>,
}

impl FunctionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function; `None` if the name is taken
    pub fn add(&mut self, name: &str, symbol: SymbolId, return_type: ShaderType) -> Option<FunctionId> {
        if self.find(name).is_some() {
            return None;
        }

        let id = FunctionId(self.functions.len());
        self.functions.push(Function {
            name: name.to_string(),
            symbol,
            parameters: Vec::new(),
            locals: Vec::new(),
            return_type,
            export: false,
            intrinsic: false,
        });
        Some(id)
    }

    /// Looks a function up by name
    pub fn find(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(FunctionId)
    }

    /// Function by id
    pub fn get(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    /// Mutable function by id
    pub fn get_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0]
    }

    /// All functions in registration order
    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i), f))
    }
}
