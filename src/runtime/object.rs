//! Runtime object: one compiled shader in executable memory
//!
//! ```text
//! offset 0        global region   globals, constants, staging and spill slots
//! trampoline      register-global loads; lea rsi, [rip + local]; ret
//! functions       each starts with call trampoline
//! local region    16-byte aligned, addressed from rsi
//! ```

use super::memory::ExecutableMemory;
use super::value::ShaderValue;
use crate::compiler::codegen::{GeneratedFunction, GeneratedProgram};
use crate::compiler::layout::{register_of, RegisterClass};
use crate::compiler::symbols::Location;
use crate::compiler::x86::{apply_relocations, op, reg, CodeBuffer, Operand};
use crate::error::{Error, Result};
use crate::types::ShaderType;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Entry point every shader must export
pub const ENTRY_POINT: &str = "main";

/// Where a global's value is kept between executions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Byte offset in the object
    Memory(u32),
    /// Held in a register, loaded from a staging slot on every entry
    Register,
}

/// Public description of a global
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    /// Variable name
    pub name: String,
    /// Declared type
    pub ty: ShaderType,
    /// Memory or register
    pub residency: Residency,
    /// Injected by the stage context
    pub intrinsic: bool,
}

#[derive(Debug, Clone)]
struct GlobalEntry {
    info: GlobalInfo,
    // memory offset for memory globals, staging offset for register globals
    offset: usize,
}

#[derive(Debug, Clone)]
struct PlacedFunction {
    name: String,
    export: bool,
    offset: usize,
    size: usize,
    listing: Vec<String>,
}

/// A compiled shader, ready to execute
#[derive(Debug)]
pub struct RuntimeObject {
    memory: ExecutableMemory,
    globals: Vec<GlobalEntry>,
    index: HashMap<String, usize>,
    functions: Vec<PlacedFunction>,
    trampoline_listing: Vec<String>,
    float_constants: Vec<(f32, u32)>,
    vector_constants: Vec<([f32; 4], u32)>,
    code_size: usize,
    local_offset: usize,
    local_size: usize,
}

fn align16(value: usize) -> usize {
    (value + 15) & !15
}

impl RuntimeObject {
    /// Lays out a generated program in fresh executable memory
    pub fn build(program: GeneratedProgram, local_memory_floor: u32) -> Result<Self> {
        let has_main = program
            .functions
            .iter()
            .any(|f| f.export && f.name == ENTRY_POINT);
        if !has_main {
            return Err(Error::MissingEntryPoint);
        }

        let keep_listing = program.functions.iter().any(|f| !f.listing.is_empty());

        // Offsets of every part of the block
        let trampoline_offset = align16(program.global_size as usize);
        let staged: Vec<(Location, u32)> = program
            .globals
            .iter()
            .filter_map(|g| Some((g.location, g.staging?.global_offset()?)))
            .collect();
        let trampoline_len = trampoline_size(&staged);

        let mut cursor = align16(trampoline_offset + trampoline_len);
        let mut function_offsets = Vec::with_capacity(program.functions.len());
        for function in &program.functions {
            function_offsets.push(cursor);
            cursor = align16(cursor + function.code.len());
        }
        let local_offset = cursor;
        let local_size = align16(program.local_size.max(local_memory_floor) as usize);
        let total = local_offset + local_size;

        let mut memory = ExecutableMemory::new(total)?;
        debug!(
            globals = program.global_size,
            trampoline = trampoline_offset,
            local = local_offset,
            total,
            "object layout"
        );

        for constant in &program.constants {
            memory.write(constant.offset as usize, &constant.bytes)?;
        }

        let trampoline = build_trampoline(&staged, trampoline_offset, local_offset, keep_listing)?;
        if trampoline.0.len() != trampoline_len {
            return Err(Error::Layout {
                message: format!(
                    "trampoline is {} bytes, {} were reserved",
                    trampoline.0.len(),
                    trampoline_len
                ),
            });
        }
        memory.write(trampoline_offset, &trampoline.0)?;

        let mut functions = Vec::with_capacity(program.functions.len());
        for (function, offset) in program.functions.into_iter().zip(function_offsets) {
            functions.push(place_function(&mut memory, function, offset, trampoline_offset)?);
        }
        let code_size = trampoline.0.len() + functions.iter().map(|f| f.size).sum::<usize>();

        let mut globals = Vec::with_capacity(program.globals.len());
        let mut index = HashMap::new();
        for slot in program.globals {
            let (residency, offset) = match (slot.location, slot.staging) {
                (Location::GlobalMemory(offset), _) => (Residency::Memory(offset), offset),
                (_, Some(Location::GlobalMemory(staging))) => (Residency::Register, staging),
                (other, _) => {
                    return Err(Error::Layout {
                        message: format!("global '{}' placed at {:?}", slot.name, other),
                    })
                }
            };
            index.insert(slot.name.clone(), globals.len());
            globals.push(GlobalEntry {
                info: GlobalInfo {
                    name: slot.name,
                    ty: slot.ty,
                    residency,
                    intrinsic: slot.intrinsic,
                },
                offset: offset as usize,
            });
        }

        Ok(RuntimeObject {
            memory,
            globals,
            index,
            functions,
            trampoline_listing: trampoline.1,
            float_constants: program.float_constants,
            vector_constants: program.vector_constants,
            code_size,
            local_offset,
            local_size,
        })
    }

    /// Runs the exported `main` once
    pub fn execute(&mut self) -> Result<()> {
        let entry = self
            .functions
            .iter()
            .find(|f| f.export && f.name == ENTRY_POINT)
            .map(|f| f.offset)
            .ok_or(Error::MissingEntryPoint)?;

        // SAFETY: entry is the start of a placed function whose code begins with
        // the trampoline call and ends with ret; it only touches this block and
        // registers the sysv64 ABI treats as caller saved
        unsafe { self.memory.call(entry) }
    }

    /// Stores a typed host value into a global
    pub fn write_global<T: ShaderValue>(&mut self, name: &str, value: &T) -> Result<()> {
        let entry = self.entry(name)?;
        check_type::<T>(&entry.info)?;
        self.write_global_bytes(name, &value.to_bytes())
    }

    /// Reads a memory-resident global as a typed host value
    pub fn read_global<T: ShaderValue>(&self, name: &str) -> Result<T> {
        let entry = self.entry(name)?;
        check_type::<T>(&entry.info)?;
        let bytes = self.read_global_bytes(name)?;
        T::from_bytes(bytes).ok_or_else(|| mismatch(&entry.info, T::TYPE_NAME))
    }

    /// Copies raw bytes into a global; the length must equal the type's size
    pub fn write_global_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let entry = self.entry(name)?;
        if bytes.len() != entry.info.ty.size() as usize {
            return Err(mismatch(&entry.info, &format!("{} bytes", bytes.len())));
        }
        let offset = entry.offset;
        self.memory.write(offset, bytes)
    }

    /// Raw bytes of a memory-resident global
    pub fn read_global_bytes(&self, name: &str) -> Result<&[u8]> {
        let entry = self.entry(name)?;
        if entry.info.residency == Residency::Register {
            return Err(Error::RegisterResidentGlobal {
                name: name.to_string(),
            });
        }
        self.memory.read(entry.offset, entry.info.ty.size() as usize)
    }

    /// Whether an exported function of this name exists
    pub fn has_export(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.export && f.name == name)
    }

    /// Names of exported functions
    pub fn exports(&self) -> Vec<&str> {
        self.functions
            .iter()
            .filter(|f| f.export)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Every global, intrinsics first
    pub fn globals(&self) -> impl Iterator<Item = &GlobalInfo> {
        self.globals.iter().map(|g| &g.info)
    }

    /// Description of one global
    pub fn global(&self, name: &str) -> Option<&GlobalInfo> {
        self.entry(name).ok().map(|g| &g.info)
    }

    /// Instruction listing of a function, or of `"trampoline"`
    pub fn listing(&self, function: &str) -> Option<&[String]> {
        if function == "trampoline" {
            return Some(&self.trampoline_listing);
        }
        self.functions
            .iter()
            .find(|f| f.name == function)
            .map(|f| f.listing.as_slice())
    }

    /// Pooled scalar constants with their offsets
    pub fn float_constants(&self) -> &[(f32, u32)] {
        &self.float_constants
    }

    /// Pooled vector constants with their offsets
    pub fn vector_constants(&self) -> &[([f32; 4], u32)] {
        &self.vector_constants
    }

    /// Bytes of machine code, trampoline included
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Offset and size of the local region
    pub fn local_region(&self) -> (usize, usize) {
        (self.local_offset, self.local_size)
    }

    fn entry(&self, name: &str) -> Result<&GlobalEntry> {
        self.index
            .get(name)
            .map(|i| &self.globals[*i])
            .ok_or_else(|| Error::UnknownGlobal {
                name: name.to_string(),
            })
    }
}

fn mismatch(info: &GlobalInfo, got: &str) -> Error {
    Error::GlobalTypeMismatch {
        name: info.name.clone(),
        expected: info.ty.to_string(),
        got: got.to_string(),
    }
}

fn check_type<T: ShaderValue>(info: &GlobalInfo) -> Result<()> {
    if T::accepts(info.ty) {
        Ok(())
    } else {
        Err(mismatch(info, T::TYPE_NAME))
    }
}

fn trampoline_size(staged: &[(Location, u32)]) -> usize {
    // mov r32, [rip+d] is 6 bytes, movups xmm, [rip+d] is 7; lea is 7 and ret 1
    staged
        .iter()
        .map(|(location, _)| match register_of(*location) {
            Some((RegisterClass::General, _)) => 6,
            _ => 7,
        })
        .sum::<usize>()
        + 8
}

fn build_trampoline(
    staged: &[(Location, u32)],
    offset: usize,
    local_offset: usize,
    keep_listing: bool,
) -> Result<(Vec<u8>, Vec<String>)> {
    let mut code = CodeBuffer::new(keep_listing);

    for (location, staging) in staged {
        let (opcode, id) = match register_of(*location) {
            Some((RegisterClass::General, id)) => (&op::MOV_LOAD, id),
            Some((RegisterClass::Simd, id)) => (&op::MOVUPS_LOAD, id),
            None => continue,
        };
        let name = match location {
            Location::SimdRegister(x) => format!("xmm{}", x),
            _ => reg::name32(id).to_string(),
        };
        code.encode(opcode, id, Operand::Global(*staging), &[], || {
            format!("{} {},[staging + {}]", opcode.mnemonic, name, staging)
        });
    }

    let local = u32::try_from(local_offset).map_err(|_| Error::Layout {
        message: format!("local region offset {} out of range", local_offset),
    })?;
    code.encode(&op::LEA, reg::ESI, Operand::Global(local), &[], || {
        "lea rsi,[local]".to_string()
    });
    code.ret();

    let (mut bytes, relocations, listing) = code.finish();
    apply_relocations(&mut bytes, offset, &relocations)?;
    Ok((bytes, listing))
}

fn place_function(
    memory: &mut ExecutableMemory,
    function: GeneratedFunction,
    offset: usize,
    trampoline: usize,
) -> Result<PlacedFunction> {
    let GeneratedFunction {
        name,
        export,
        mut code,
        relocations,
        trampoline_call,
        listing,
    } = function;

    apply_relocations(&mut code, offset, &relocations)?;
    let rel = trampoline as i64 - (offset + trampoline_call + 4) as i64;
    let rel = i32::try_from(rel).map_err(|_| Error::Layout {
        message: format!("trampoline call distance {} out of range", rel),
    })?;
    code[trampoline_call..trampoline_call + 4].copy_from_slice(&rel.to_le_bytes());

    memory.write(offset, &code)?;
    trace!(function = %name, offset, bytes = code.len(), "function placed");

    Ok(PlacedFunction {
        name,
        export,
        offset,
        size: code.len(),
        listing,
    })
}

#[cfg(all(test, unix, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::compiler::{CompileOptions, Compiler, PlacementPolicy, Stage};

    fn build(source: &str) -> Result<RuntimeObject> {
        Compiler::new(CompileOptions::default()).compile(source)
    }

    #[test]
    fn test_missing_main() {
        let err = build("void helper() { }").unwrap_err();
        assert_eq!(err, Error::MissingEntryPoint);

        let err = build("void main() { }").unwrap_err();
        assert_eq!(err, Error::MissingEntryPoint);
    }

    #[test]
    fn test_trampoline_sets_local_base() {
        let object = build("export void main() { }").unwrap();
        assert_eq!(
            object.listing("trampoline").unwrap(),
            &["lea rsi,[local]".to_string(), "ret".to_string()]
        );
        assert_eq!(object.code_size(), 8 + 6);
        assert!(object.local_region().1 >= 256);
    }

    #[test]
    fn test_register_globals_are_staged() {
        let options = CompileOptions {
            stage: Stage::Fragment,
            placement: PlacementPolicy::RegisterFirst,
            ..Default::default()
        };
        let mut object = Compiler::new(options)
            .compile("export void main() { g_colour = g_world_normal; }")
            .unwrap();

        let normal = object.global("g_world_normal").unwrap();
        assert_eq!(normal.residency, Residency::Register);
        assert!(object.listing("trampoline").unwrap()[0].starts_with("movups xmm"));

        object
            .write_global("g_world_normal", &[0.0f32, 1.0, 0.0, 0.0])
            .unwrap();
        let err = object.read_global::<[f32; 4]>("g_world_normal").unwrap_err();
        assert!(matches!(err, Error::RegisterResidentGlobal { .. }));

        object.execute().unwrap();
        let colour: [f32; 4] = object.read_global("g_colour").unwrap();
        assert_eq!(colour, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_global_errors() {
        let mut object = build("float f; export void main() { }").unwrap();
        assert!(matches!(
            object.write_global("nope", &1.0f32),
            Err(Error::UnknownGlobal { .. })
        ));
        assert_eq!(
            object.write_global("f", &1i32).unwrap_err().to_string(),
            "Type mismatch for global 'f': expected float, got i32"
        );
        assert!(object.write_global_bytes("f", &[0; 16]).is_err());
        object.write_global_bytes("f", &2.5f32.to_le_bytes()).unwrap();
        assert_eq!(object.read_global::<f32>("f").unwrap(), 2.5);
    }
}
