//! Named uniform values
//!
//! Values are written into uniform blocks in std140 form. A `Mat3` therefore
//! occupies three 16-byte columns.

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// A value that can be assigned to a named uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// Signed integer
    Int(i32),
    /// Single float
    Float(f32),
    /// Two-component vector
    Vec2(Vector2<f32>),
    /// Three-component vector
    Vec3(Vector3<f32>),
    /// Four-component vector
    Vec4(Vector4<f32>),
    /// Column-major 3x3 matrix
    Mat3(Matrix3<f32>),
    /// Column-major 4x4 matrix
    Mat4(Matrix4<f32>),
}

impl UniformValue {
    /// Byte representation in std140 layout
    pub fn to_std140_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(value) => value.to_ne_bytes().to_vec(),
            Self::Float(value) => value.to_ne_bytes().to_vec(),
            Self::Vec2(value) => bytemuck::cast_slice(value.as_slice()).to_vec(),
            Self::Vec3(value) => bytemuck::cast_slice(value.as_slice()).to_vec(),
            Self::Vec4(value) => bytemuck::cast_slice(value.as_slice()).to_vec(),
            Self::Mat3(value) => {
                let mut bytes = Vec::with_capacity(48);
                for column in value.column_iter() {
                    let padded = [column[0], column[1], column[2], 0.0f32];
                    bytes.extend_from_slice(bytemuck::cast_slice(&padded));
                }
                bytes
            }
            Self::Mat4(value) => bytemuck::cast_slice(value.as_slice()).to_vec(),
        }
    }

    /// Write into a uniform slot, truncating to the slot size
    ///
    /// Returns the number of bytes written.
    pub fn write_to(&self, slot: &mut [u8]) -> usize {
        let bytes = self.to_std140_bytes();
        let len = bytes.len().min(slot.len());
        slot[..len].copy_from_slice(&bytes[..len]);
        len
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vector2<f32>> for UniformValue {
    fn from(value: Vector2<f32>) -> Self {
        Self::Vec2(value)
    }
}

impl From<Vector3<f32>> for UniformValue {
    fn from(value: Vector3<f32>) -> Self {
        Self::Vec3(value)
    }
}

impl From<Vector4<f32>> for UniformValue {
    fn from(value: Vector4<f32>) -> Self {
        Self::Vec4(value)
    }
}

impl From<Matrix3<f32>> for UniformValue {
    fn from(value: Matrix3<f32>) -> Self {
        Self::Mat3(value)
    }
}

impl From<Matrix4<f32>> for UniformValue {
    fn from(value: Matrix4<f32>) -> Self {
        Self::Mat4(value)
    }
}
