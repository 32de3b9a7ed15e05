//! Storage layout
//!
//! Two bump allocators hand out global and local memory, and two pools hold the
//! general purpose and SSE registers. Temporaries are placed through a
//! [`TemporaryScope`], which gives everything back when it is dropped. Scratch
//! registers for a single instruction sequence come from a [`RegisterLease`].
//!
//! ```text
//! global region   globals | constants | staging slots | spill slots
//! local region    params and locals of the current function | temporaries (LIFO)
//! ```

use super::symbols::Location;
use crate::error::{Error, Result};
use crate::types::ShaderType;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

/// General purpose registers available to values: eax, ecx, edx, edi
pub const GENERAL_REGISTERS: [u8; 4] = [0, 1, 2, 7];

/// SSE registers available to values
pub const SIMD_REGISTERS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Where globals, parameters and locals are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// Globals and locals in memory, parameters and temporaries in registers when possible
    #[default]
    MemoryFirst,
    /// Registers when possible for everything except context outputs and matrices
    RegisterFirst,
}

/// Register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// eax, ecx, edx, edi
    General,
    /// xmm0-xmm7
    Simd,
}

impl RegisterClass {
    /// Register file a value of `ty` lives in, if it can live in one at all
    pub fn of(ty: ShaderType) -> Option<Self> {
        match ty {
            ShaderType::Int | ShaderType::Bool => Some(RegisterClass::General),
            ShaderType::Float | ShaderType::Vec3 | ShaderType::Vec4 => Some(RegisterClass::Simd),
            _ => None,
        }
    }

    /// Every register of the class, in allocation order
    pub fn pool(self) -> &'static [u8] {
        match self {
            RegisterClass::General => &GENERAL_REGISTERS,
            RegisterClass::Simd => &SIMD_REGISTERS,
        }
    }

    /// Location naming register `id` of this class
    pub fn location(self, id: u8) -> Location {
        match self {
            RegisterClass::General => Location::Register(id),
            RegisterClass::Simd => Location::SimdRegister(id),
        }
    }

    /// Bytes needed to save one register
    pub fn spill_size(self) -> u32 {
        match self {
            RegisterClass::General => 4,
            RegisterClass::Simd => 16,
        }
    }
}

/// Register a location refers to, directly or as an address
pub fn register_of(location: Location) -> Option<(RegisterClass, u8)> {
    match location {
        Location::Register(r) | Location::IndirectRegister(r) => Some((RegisterClass::General, r)),
        Location::SimdRegister(x) | Location::RegisterLane { simd: x, .. } => {
            Some((RegisterClass::Simd, x))
        }
        _ => None,
    }
}

/// Memory region a placement falls back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Object-wide memory
    Global,
    /// Per-invocation memory addressed from rsi
    Local,
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

#[derive(Debug, Default)]
struct BumpAllocator {
    top: u32,
    high_water: u32,
}

impl BumpAllocator {
    fn allocate(&mut self, size: u32) -> u32 {
        // 4-byte scalars align to 4, everything wider to 16
        let align = size.clamp(4, 16);
        let offset = align_up(self.top, align);
        self.top = offset + size;
        self.high_water = self.high_water.max(self.top);
        offset
    }
}

#[derive(Debug)]
struct LayoutState {
    global: BumpAllocator,
    local: BumpAllocator,
    free_general: Vec<u8>,
    free_simd: Vec<u8>,
    leased: Vec<Location>,
}

impl LayoutState {
    fn free(&mut self, class: RegisterClass) -> &mut Vec<u8> {
        match class {
            RegisterClass::General => &mut self.free_general,
            RegisterClass::Simd => &mut self.free_simd,
        }
    }

    fn take(&mut self, class: RegisterClass) -> Option<Location> {
        let free = self.free(class);
        if free.is_empty() {
            return None;
        }
        Some(class.location(free.remove(0)))
    }

    fn give_back(&mut self, location: Location) {
        if let Some((class, id)) = register_of(location) {
            let free = self.free(class);
            if !free.contains(&id) {
                free.push(id);
                free.sort_unstable();
            }
        }
    }

    fn allocate(&mut self, region: Region, size: u32) -> Location {
        match region {
            Region::Global => Location::GlobalMemory(self.global.allocate(size)),
            Region::Local => Location::LocalMemory(self.local.allocate(size)),
        }
    }

    fn place(&mut self, ty: ShaderType, region: Region) -> Result<Location> {
        if ty.size() == 0 {
            return Err(Error::Layout {
                message: format!("type '{}' has no storage", ty),
            });
        }

        if !ty.is_matrix() {
            if let Some(register) = RegisterClass::of(ty).and_then(|class| self.take(class)) {
                return Ok(register);
            }
        }

        Ok(self.allocate(region, ty.size()))
    }

    fn place_in_memory(&mut self, ty: ShaderType, region: Region) -> Result<Location> {
        if ty.size() == 0 {
            return Err(Error::Layout {
                message: format!("type '{}' has no storage", ty),
            });
        }
        Ok(self.allocate(region, ty.size()))
    }
}

/// Shared allocator state for one compilation
#[derive(Debug, Clone)]
pub struct Layout {
    state: Rc<RefCell<LayoutState>>,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    /// Empty regions and full register pools
    pub fn new() -> Self {
        Layout {
            state: Rc::new(RefCell::new(LayoutState {
                global: BumpAllocator::default(),
                local: BumpAllocator::default(),
                free_general: GENERAL_REGISTERS.to_vec(),
                free_simd: SIMD_REGISTERS.to_vec(),
                leased: Vec::new(),
            })),
        }
    }

    /// Reserves `size` bytes of global memory
    pub fn allocate_global(&self, size: u32) -> Location {
        self.state.borrow_mut().allocate(Region::Global, size)
    }

    /// Places a value by the standard policy; registers taken here are never returned
    pub fn place(&self, ty: ShaderType, region: Region) -> Result<Location> {
        self.state.borrow_mut().place(ty, region)
    }

    /// Places a value in memory
    pub fn place_in_memory(&self, ty: ShaderType, region: Region) -> Result<Location> {
        self.state.borrow_mut().place_in_memory(ty, region)
    }

    /// Bytes of global memory handed out so far
    pub fn global_size(&self) -> u32 {
        self.state.borrow().global.high_water
    }

    /// Deepest local memory use seen so far
    pub fn local_size(&self) -> u32 {
        self.state.borrow().local.high_water
    }

    /// Number of unallocated registers in a class
    pub fn free_registers(&self, class: RegisterClass) -> usize {
        match class {
            RegisterClass::General => self.state.borrow().free_general.len(),
            RegisterClass::Simd => self.state.borrow().free_simd.len(),
        }
    }

    /// Opens a scope whose placements are undone when it drops
    pub fn scope(&self) -> TemporaryScope {
        let mark = self.state.borrow().local.top;
        TemporaryScope {
            state: Rc::clone(&self.state),
            mark,
            registers: Vec::new(),
        }
    }

    /// Leases a scratch register that is not referenced by any location in `avoid`.
    ///
    /// When the pool is exhausted an occupied register is borrowed instead, and the
    /// lease carries the slot its previous content must be saved to and restored from.
    pub fn lease(&self, class: RegisterClass, avoid: &[Location]) -> Result<RegisterLease> {
        let mut state = self.state.borrow_mut();
        let conflicts = |id: u8| {
            avoid
                .iter()
                .any(|location| register_of(*location) == Some((class, id)))
        };

        let free = state.free(class);
        if let Some(index) = free.iter().position(|id| !conflicts(*id)) {
            let id = free.remove(index);
            let location = class.location(id);
            state.leased.push(location);
            return Ok(RegisterLease {
                state: Rc::clone(&self.state),
                location,
                spill: None,
                pooled: true,
            });
        }

        let id = class
            .pool()
            .iter()
            .copied()
            .find(|id| !conflicts(*id) && !state.leased.contains(&class.location(*id)))
            .ok_or_else(|| Error::Layout {
                message: format!("no {:?} register can be borrowed", class),
            })?;
        let location = class.location(id);
        let spill = state.allocate(Region::Global, class.spill_size());
        warn!(?location, ?spill, "register pool exhausted, borrowing an occupied register");

        state.leased.push(location);
        Ok(RegisterLease {
            state: Rc::clone(&self.state),
            location,
            spill: Some(spill),
            pooled: false,
        })
    }
}

/// Placements that last until the guard drops
#[derive(Debug)]
pub struct TemporaryScope {
    state: Rc<RefCell<LayoutState>>,
    mark: u32,
    registers: Vec<Location>,
}

impl TemporaryScope {
    /// Register when one is free, local memory otherwise
    pub fn place(&mut self, ty: ShaderType) -> Result<Location> {
        let location = self.state.borrow_mut().place(ty, Region::Local)?;
        if register_of(location).is_some() {
            self.registers.push(location);
        }
        Ok(location)
    }

    /// Always local memory
    pub fn place_in_memory(&mut self, ty: ShaderType) -> Result<Location> {
        self.state.borrow_mut().place_in_memory(ty, Region::Local)
    }
}

impl Drop for TemporaryScope {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        for location in self.registers.drain(..) {
            state.give_back(location);
        }
        state.local.top = self.mark;
    }
}

/// A scratch register held for one instruction sequence
#[derive(Debug)]
pub struct RegisterLease {
    state: Rc<RefCell<LayoutState>>,
    location: Location,
    spill: Option<Location>,
    pooled: bool,
}

impl RegisterLease {
    /// The leased register
    pub fn location(&self) -> Location {
        self.location
    }

    /// Register id
    pub fn id(&self) -> u8 {
        register_of(self.location).map(|(_, id)| id).unwrap_or(0)
    }

    /// Save slot when the register was borrowed from a live value
    pub fn spill(&self) -> Option<Location> {
        self.spill
    }
}

impl Drop for RegisterLease {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.leased.iter().position(|l| *l == self.location) {
            state.leased.remove(index);
        }
        if self.pooled {
            state.give_back(self.location);
        }
    }
}
