//! Symbol registry and storage locations

use crate::types::ShaderType;
use std::fmt;

use super::functions::FunctionId;

/// Where a value lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// Not placed yet
    #[default]
    None,
    /// Byte offset into the object's global region
    GlobalMemory(u32),
    /// Byte offset from the local-memory base register
    LocalMemory(u32),
    /// General purpose register id
    Register(u8),
    /// SSE register id
    SimdRegister(u8),
    /// Memory addressed by a general purpose register
    IndirectRegister(u8),
    /// One lane of an SSE register, `shift` bytes from lane 0
    RegisterLane {
        /// SSE register id
        simd: u8,
        /// Byte shift of the lane
        shift: u8,
    },
}

impl Location {
    /// Global, local, and indirect locations are memory operands
    pub fn is_in_memory(self) -> bool {
        matches!(
            self,
            Location::GlobalMemory(_) | Location::LocalMemory(_) | Location::IndirectRegister(_)
        )
    }

    /// Whether the location has been assigned
    pub fn is_placed(self) -> bool {
        self != Location::None
    }

    /// Offset into the global region
    pub fn global_offset(self) -> Option<u32> {
        match self {
            Location::GlobalMemory(offset) => Some(offset),
            _ => None,
        }
    }

    /// Plain register, not an address or a lane
    pub fn is_register(self) -> bool {
        matches!(self, Location::Register(_) | Location::SimdRegister(_))
    }

    /// Same location `bytes` further on; registers are returned unchanged
    pub fn offset(self, bytes: u32) -> Location {
        match self {
            Location::GlobalMemory(offset) => Location::GlobalMemory(offset + bytes),
            Location::LocalMemory(offset) => Location::LocalMemory(offset + bytes),
            other => other,
        }
    }
}

/// Symbol visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Program-wide
    Global,
    /// Parameter or local of one function
    Local,
}

/// What a symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Storage
    Variable,
    /// Callable
    Function,
}

/// Index into the symbol table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub usize);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A declared name
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Source name
    pub name: String,
    /// Global or local
    pub scope: Scope,
    /// Variable or function
    pub kind: SymbolKind,
    /// Declared type (`function` for functions)
    pub ty: ShaderType,
    /// Function owning a local; `None` for globals
    pub owner: Option<FunctionId>,
    /// Line and column of the declaring identifier
    pub declared_at: Option<(usize, usize)>,
    /// Injected by the stage context
    pub intrinsic: bool,
    /// Storage assigned by the layout
    pub location: Location,
}

/// Flat registry of globals and per-function locals
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a symbol, or returns `None` when the name is already visible from `owner`
    pub fn add(
        &mut self,
        name: &str,
        scope: Scope,
        kind: SymbolKind,
        ty: ShaderType,
        owner: Option<FunctionId>,
    ) -> Option<SymbolId> {
        if self.find(name, owner).is_some() {
            return None;
        }

        let id = SymbolId(self.symbols.len());
        self.symbols.push(Symbol {
            name: name.to_string(),
            scope,
            kind,
            ty,
            owner,
            declared_at: None,
            intrinsic: false,
            location: Location::None,
        });
        Some(id)
    }

    /// Adds a context-injected global
    pub fn add_intrinsic(&mut self, name: &str, kind: SymbolKind, ty: ShaderType) -> Option<SymbolId> {
        let id = self.add(name, Scope::Global, kind, ty, None)?;
        self.symbols[id.0].intrinsic = true;
        Some(id)
    }

    /// Looks `name` up among the locals of `owner`, falling back to globals
    pub fn find(&self, name: &str, owner: Option<FunctionId>) -> Option<SymbolId> {
        if owner.is_some() {
            let local = self
                .symbols
                .iter()
                .position(|s| s.scope == Scope::Local && s.owner == owner && s.name == name);
            if let Some(index) = local {
                return Some(SymbolId(index));
            }
        }

        self.symbols
            .iter()
            .position(|s| s.scope == Scope::Global && s.name == name)
            .map(SymbolId)
    }

    /// Symbol by id
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    /// Mutable symbol by id
    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    /// Global symbols in declaration order; intrinsics come first
    pub fn globals(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.scope == Scope::Global)
            .map(|(i, _)| SymbolId(i))
    }

    /// Finds the symbol whose memory starts at `location`, preferring locals of `owner`
    pub fn resolve_address(&self, location: Location, owner: Option<FunctionId>) -> Option<&Symbol> {
        self.symbols.iter().find(|s| {
            s.kind == SymbolKind::Variable
                && s.location == location
                && (s.scope == Scope::Global || s.owner == owner)
        })
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when nothing has been declared
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
