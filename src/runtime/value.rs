//! Host values exchanged with shader globals

use crate::types::ShaderType;

/// A host type that can be copied into and out of a shader global
pub trait ShaderValue: Sized {
    /// Name used in type mismatch errors
    const TYPE_NAME: &'static str;

    /// Whether a global of type `ty` holds this host type
    fn accepts(ty: ShaderType) -> bool;

    /// Little-endian storage bytes
    fn to_bytes(&self) -> Vec<u8>;

    /// Decodes storage bytes; `None` on a size mismatch
    fn from_bytes(bytes: &[u8]) -> Option<Self>;
}

fn floats_to_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(f32::to_le_bytes).collect()
}

fn bytes_to_floats<const N: usize>(bytes: &[u8]) -> Option<[f32; N]> {
    if bytes.len() != N * 4 {
        return None;
    }
    let mut out = [0.0; N];
    for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(out)
}

impl ShaderValue for i32 {
    const TYPE_NAME: &'static str = "i32";

    fn accepts(ty: ShaderType) -> bool {
        ty == ShaderType::Int
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(i32::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl ShaderValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn accepts(ty: ShaderType) -> bool {
        ty == ShaderType::Bool
    }

    fn to_bytes(&self) -> Vec<u8> {
        (*self as i32).to_le_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(i32::from_le_bytes(bytes.try_into().ok()?) != 0)
    }
}

impl ShaderValue for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn accepts(ty: ShaderType) -> bool {
        ty == ShaderType::Float
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }
}

// vec3 is stored padded to four lanes
impl ShaderValue for [f32; 4] {
    const TYPE_NAME: &'static str = "[f32; 4]";

    fn accepts(ty: ShaderType) -> bool {
        matches!(ty, ShaderType::Vec3 | ShaderType::Vec4)
    }

    fn to_bytes(&self) -> Vec<u8> {
        floats_to_bytes(*self)
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes_to_floats(bytes)
    }
}

impl ShaderValue for [[f32; 4]; 3] {
    const TYPE_NAME: &'static str = "[[f32; 4]; 3]";

    fn accepts(ty: ShaderType) -> bool {
        ty == ShaderType::Mat3x3
    }

    fn to_bytes(&self) -> Vec<u8> {
        floats_to_bytes(self.iter().flatten().copied())
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let flat: [f32; 12] = bytes_to_floats(bytes)?;
        let mut rows = [[0.0; 4]; 3];
        for (row, chunk) in rows.iter_mut().zip(flat.chunks_exact(4)) {
            row.copy_from_slice(chunk);
        }
        Some(rows)
    }
}

impl ShaderValue for [[f32; 4]; 4] {
    const TYPE_NAME: &'static str = "[[f32; 4]; 4]";

    fn accepts(ty: ShaderType) -> bool {
        ty == ShaderType::Mat4x4
    }

    fn to_bytes(&self) -> Vec<u8> {
        floats_to_bytes(self.iter().flatten().copied())
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let flat: [f32; 16] = bytes_to_floats(bytes)?;
        let mut rows = [[0.0; 4]; 4];
        for (row, chunk) in rows.iter_mut().zip(flat.chunks_exact(4)) {
            row.copy_from_slice(chunk);
        }
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(6i32.to_bytes(), vec![6, 0, 0, 0]);
        assert_eq!(true.to_bytes(), vec![1, 0, 0, 0]);
        assert_eq!(bool::from_bytes(&[0, 0, 0, 0]), Some(false));
        assert_eq!(f32::from_bytes(&1.5f32.to_le_bytes()), Some(1.5));
        assert_eq!(i32::from_bytes(&[1, 2]), None);
    }

    #[test]
    fn test_matrix_rows_are_contiguous() {
        let identity = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let bytes = identity.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[20..24], &1.0f32.to_le_bytes());
        assert_eq!(<[[f32; 4]; 4]>::from_bytes(&bytes), Some(identity));
    }

    #[test]
    fn test_accepted_types() {
        assert!(<[f32; 4]>::accepts(ShaderType::Vec3));
        assert!(!<[f32; 4]>::accepts(ShaderType::Mat4x4));
        assert!(!i32::accepts(ShaderType::Float));
        assert!(<[[f32; 4]; 3]>::accepts(ShaderType::Mat3x3));
    }
}
