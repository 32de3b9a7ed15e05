//! # Built-in shader types
//!
//! The language has a closed set of types. Scalars (`int`, `float`) and `bool` occupy
//! four bytes; vectors are four lanes wide in storage (`vec3` leaves the last lane
//! unused); matrices are a sequence of vector rows.
//!
//! ```text
//! type      class     size  element
//! void      Void         0  -
//! function  Function     0  -
//! bool      Boolean      4  -
//! int       Scalar       4  -
//! float     Scalar       4  -
//! vec3      Vector      16  float   (3 live lanes)
//! vec4      Vector      16  float
//! mat3x3    Vector      48  vec3    (3 rows)
//! mat4x4    Vector      64  vec4    (4 rows)
//! ```

mod rules;

pub use rules::{
    check_additive, check_assignment, check_equality, check_multiplicative, check_scalar_pair,
    result_of,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification used by the compatibility rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// No value
    Void,
    /// Function symbol
    Function,
    /// `bool`
    Boolean,
    /// `int` and `float`
    Scalar,
    /// Vectors and matrices
    Vector,
}

/// A built-in type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderType {
    /// `void`
    Void,
    /// Type of function symbols
    Function,
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `vec3`
    Vec3,
    /// `vec4`
    Vec4,
    /// `mat3x3`
    Mat3x3,
    /// `mat4x4`
    Mat4x4,
}

impl ShaderType {
    /// Looks a type up by its source spelling
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => ShaderType::Void,
            "function" => ShaderType::Function,
            "bool" => ShaderType::Bool,
            "int" => ShaderType::Int,
            "float" => ShaderType::Float,
            "vec3" => ShaderType::Vec3,
            "vec4" => ShaderType::Vec4,
            "mat3x3" => ShaderType::Mat3x3,
            "mat4x4" => ShaderType::Mat4x4,
            _ => return None,
        })
    }

    /// Source spelling
    pub fn name(self) -> &'static str {
        match self {
            ShaderType::Void => "void",
            ShaderType::Function => "function",
            ShaderType::Bool => "bool",
            ShaderType::Int => "int",
            ShaderType::Float => "float",
            ShaderType::Vec3 => "vec3",
            ShaderType::Vec4 => "vec4",
            ShaderType::Mat3x3 => "mat3x3",
            ShaderType::Mat4x4 => "mat4x4",
        }
    }

    /// Storage size in bytes
    pub fn size(self) -> u32 {
        match self {
            ShaderType::Void | ShaderType::Function => 0,
            ShaderType::Bool | ShaderType::Int | ShaderType::Float => 4,
            ShaderType::Vec3 | ShaderType::Vec4 => 16,
            ShaderType::Mat3x3 => 48,
            ShaderType::Mat4x4 => 64,
        }
    }

    /// Classification for the compatibility rules
    pub fn class(self) -> TypeClass {
        match self {
            ShaderType::Void => TypeClass::Void,
            ShaderType::Function => TypeClass::Function,
            ShaderType::Bool => TypeClass::Boolean,
            ShaderType::Int | ShaderType::Float => TypeClass::Scalar,
            ShaderType::Vec3 | ShaderType::Vec4 | ShaderType::Mat3x3 | ShaderType::Mat4x4 => {
                TypeClass::Vector
            }
        }
    }

    /// Element type of a vector (a scalar) or matrix (a vector row)
    pub fn element(self) -> Option<ShaderType> {
        match self {
            ShaderType::Vec3 | ShaderType::Vec4 => Some(ShaderType::Float),
            ShaderType::Mat3x3 => Some(ShaderType::Vec3),
            ShaderType::Mat4x4 => Some(ShaderType::Vec4),
            _ => None,
        }
    }

    /// Number of elements: lanes for a vector, rows for a matrix
    pub fn element_count(self) -> u32 {
        match self {
            ShaderType::Vec3 | ShaderType::Mat3x3 => 3,
            ShaderType::Vec4 | ShaderType::Mat4x4 => 4,
            _ => 1,
        }
    }

    /// Byte distance between consecutive elements
    pub fn stride(self) -> u32 {
        match self.element() {
            Some(element) => element.size(),
            None => 0,
        }
    }

    /// `int` or `float`
    pub fn is_scalar(self) -> bool {
        self.class() == TypeClass::Scalar
    }

    /// Vectors and matrices
    pub fn is_vector(self) -> bool {
        self.class() == TypeClass::Vector
    }

    /// Vectors whose element is itself a vector
    pub fn is_matrix(self) -> bool {
        matches!(self, ShaderType::Mat3x3 | ShaderType::Mat4x4)
    }

    /// Values that live in general purpose registers
    pub fn is_integral(self) -> bool {
        matches!(self, ShaderType::Int | ShaderType::Bool)
    }
}

impl fmt::Display for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for ty in [
            ShaderType::Void,
            ShaderType::Bool,
            ShaderType::Int,
            ShaderType::Float,
            ShaderType::Vec3,
            ShaderType::Vec4,
            ShaderType::Mat3x3,
            ShaderType::Mat4x4,
        ] {
            assert_eq!(ShaderType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ShaderType::from_name("vec2"), None);
    }

    #[test]
    fn test_sizes_and_elements() {
        assert_eq!(ShaderType::Vec4.size(), 16);
        assert_eq!(ShaderType::Mat4x4.size(), 64);
        assert_eq!(ShaderType::Mat4x4.element(), Some(ShaderType::Vec4));
        assert_eq!(ShaderType::Vec4.element(), Some(ShaderType::Float));
        assert_eq!(ShaderType::Mat3x3.stride(), 16);
        assert!(ShaderType::Mat3x3.is_matrix());
        assert!(!ShaderType::Bool.is_scalar());
    }
}
