//! Type compatibility rules applied while the syntax tree is built

use super::{ShaderType, TypeClass};

/// `+` and `-`: both scalar, or the same vector type
pub fn check_additive(lhs: ShaderType, rhs: ShaderType) -> bool {
    if lhs.is_vector() && rhs.is_vector() {
        return lhs == rhs;
    }

    lhs.is_scalar() && rhs.is_scalar()
}

/// `*`: scalar×scalar, vector×scalar, matrix×matrix of one type, matrix×row vector
pub fn check_multiplicative(lhs: ShaderType, rhs: ShaderType) -> bool {
    match (lhs.class(), rhs.class()) {
        (TypeClass::Vector, TypeClass::Vector) => {
            (lhs.is_matrix() && lhs == rhs) || lhs.element() == Some(rhs)
        }
        (TypeClass::Vector, TypeClass::Scalar) => {
            lhs.element().is_some_and(|element| element.is_scalar())
        }
        (TypeClass::Scalar, TypeClass::Scalar) => true,
        _ => false,
    }
}

/// `==` and `!=`: both scalar, or identical
pub fn check_equality(lhs: ShaderType, rhs: ShaderType) -> bool {
    (lhs.is_scalar() && rhs.is_scalar()) || lhs == rhs
}

/// `<`, `<=`, `>`, `>=` and `/`
pub fn check_scalar_pair(lhs: ShaderType, rhs: ShaderType) -> bool {
    lhs.is_scalar() && rhs.is_scalar()
}

/// Whether a value of type `rhs` may be stored into a slot of type `lhs`
pub fn check_assignment(lhs: ShaderType, rhs: ShaderType) -> bool {
    match (lhs.class(), rhs.class()) {
        (TypeClass::Vector, _) | (_, TypeClass::Vector) => lhs == rhs,
        (TypeClass::Scalar, TypeClass::Scalar) => true,
        (TypeClass::Boolean, TypeClass::Boolean) => true,
        _ => false,
    }
}

/// Static type of a binary arithmetic expression
pub fn result_of(lhs: ShaderType, rhs: ShaderType) -> ShaderType {
    if lhs.is_vector() {
        if rhs.is_scalar() {
            return lhs;
        }
        if lhs.is_matrix() && !rhs.is_matrix() {
            return rhs;
        }
        return lhs;
    }

    if lhs.is_scalar() && (lhs == ShaderType::Float || rhs == ShaderType::Float) {
        return ShaderType::Float;
    }

    lhs
}
