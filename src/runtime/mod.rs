//! Runtime objects: compiled shaders placed in executable memory

mod memory;
mod object;
mod value;

pub use memory::ExecutableMemory;
pub use object::{GlobalInfo, Residency, RuntimeObject, ENTRY_POINT};
pub use value::ShaderValue;
