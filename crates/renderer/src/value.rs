//! Tagged uniform values and their canonical flattening.
//!
//! Every value the host can hand to a shader is one of five shapes. The shape
//! is fixed at construction: a `Vec3` stays three components for its whole
//! life, and matrices are always 4x4 (3x3 rotations are embedded with an
//! identity homogeneous row/column).

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::error::RenderError;

/// A single 32-bit lane of a flattened value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Component {
    F32(f32),
    I32(i32),
}

impl Component {
    /// Raw little-endian bit pattern as it lands in the uniform block.
    pub fn to_bits(self) -> u32 {
        match self {
            Component::F32(value) => value.to_bits(),
            Component::I32(value) => value as u32,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Component::F32(value) => value,
            Component::I32(value) => value as f32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    F32(f32),
    I32(i32),
}

/// Shape tag used by schemas; mirrors the variants of [`UniformValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl ValueKind {
    /// Number of 32-bit lanes the kind occupies once flattened.
    pub fn lanes(self) -> usize {
        match self {
            ValueKind::Float | ValueKind::Int => 1,
            ValueKind::Vec2 => 2,
            ValueKind::Vec3 => 3,
            ValueKind::Vec4 => 4,
            ValueKind::Mat4 => 16,
        }
    }

    /// Byte alignment WGSL requires for this kind inside a uniform struct.
    pub fn wgsl_align(self) -> usize {
        match self {
            ValueKind::Float | ValueKind::Int => 4,
            ValueKind::Vec2 => 8,
            ValueKind::Vec3 | ValueKind::Vec4 | ValueKind::Mat4 => 16,
        }
    }

    pub fn wgsl_type(self) -> &'static str {
        match self {
            ValueKind::Float => "f32",
            ValueKind::Int => "i32",
            ValueKind::Vec2 => "vec2<f32>",
            ValueKind::Vec3 => "vec3<f32>",
            ValueKind::Vec4 => "vec4<f32>",
            ValueKind::Mat4 => "mat4x4<f32>",
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, ValueKind::Vec2 | ValueKind::Vec3 | ValueKind::Vec4)
    }

    pub fn is_matrix(self) -> bool {
        matches!(self, ValueKind::Mat4)
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::Vec2 => "vec2",
            ValueKind::Vec3 => "vec3",
            ValueKind::Vec4 => "vec4",
            ValueKind::Mat4 => "mat4",
        };
        f.write_str(name)
    }
}

/// A uniform value. Matrices are stored row-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Scalar(Scalar),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn float(value: f32) -> Self {
        UniformValue::Scalar(Scalar::F32(value))
    }

    pub fn int(value: i32) -> Self {
        UniformValue::Scalar(Scalar::I32(value))
    }

    pub fn identity() -> Self {
        UniformValue::Mat4([
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    /// Builds a float-based value from a component slice, choosing the shape by
    /// length. Only 1, 2, 3, 4 and 16 components describe a valid value.
    pub fn from_components(name: &str, components: &[f32]) -> Result<Self, RenderError> {
        match components {
            [x] => Ok(UniformValue::float(*x)),
            [x, y] => Ok(UniformValue::Vec2([*x, *y])),
            [x, y, z] => Ok(UniformValue::Vec3([*x, *y, *z])),
            [x, y, z, w] => Ok(UniformValue::Vec4([*x, *y, *z, *w])),
            _ if components.len() == 16 => {
                let mut rows = [0.0; 16];
                rows.copy_from_slice(components);
                Ok(UniformValue::Mat4(rows))
            }
            _ => Err(RenderError::SchemaMismatch {
                field: name.to_string(),
                expected: "1, 2, 3, 4 or 16 components".to_string(),
                found: format!("{} components", components.len()),
            }),
        }
    }

    /// Builds a value of an exact kind from raw components, rejecting any
    /// component count that does not match the kind.
    pub fn with_kind(name: &str, kind: ValueKind, components: &[f32]) -> Result<Self, RenderError> {
        if components.len() != kind.lanes() {
            return Err(RenderError::SchemaMismatch {
                field: name.to_string(),
                expected: kind.to_string(),
                found: format!("{} components", components.len()),
            });
        }
        match kind {
            ValueKind::Int => Ok(UniformValue::int(components[0].round() as i32)),
            _ => Self::from_components(name, components),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            UniformValue::Scalar(Scalar::F32(_)) => ValueKind::Float,
            UniformValue::Scalar(Scalar::I32(_)) => ValueKind::Int,
            UniformValue::Vec2(_) => ValueKind::Vec2,
            UniformValue::Vec3(_) => ValueKind::Vec3,
            UniformValue::Vec4(_) => ValueKind::Vec4,
            UniformValue::Mat4(_) => ValueKind::Mat4,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.kind().is_vector()
    }

    pub fn is_matrix(&self) -> bool {
        self.kind().is_matrix()
    }

    /// Flattens into lanes: scalars give one, vectors give x,y,z,w in order and
    /// matrices give sixteen in row-major order.
    pub fn flatten(&self) -> Vec<Component> {
        let mut out = Vec::with_capacity(self.kind().lanes());
        self.flatten_into(&mut out);
        out
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<Component>) {
        match self {
            UniformValue::Scalar(Scalar::F32(value)) => out.push(Component::F32(*value)),
            UniformValue::Scalar(Scalar::I32(value)) => out.push(Component::I32(*value)),
            UniformValue::Vec2(v) => out.extend(v.iter().copied().map(Component::F32)),
            UniformValue::Vec3(v) => out.extend(v.iter().copied().map(Component::F32)),
            UniformValue::Vec4(v) => out.extend(v.iter().copied().map(Component::F32)),
            UniformValue::Mat4(m) => out.extend(m.iter().copied().map(Component::F32)),
        }
    }

    /// Scalar view used by persistence; `None` for non-scalar values.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Scalar(Scalar::F32(value)) => Some(*value),
            UniformValue::Scalar(Scalar::I32(value)) => Some(*value as f32),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::float(value)
    }
}

/// Narrowed to `f32`; config files and float literals arrive as `f64`.
impl From<f64> for UniformValue {
    fn from(value: f64) -> Self {
        UniformValue::float(value as f32)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::int(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        UniformValue::Vec2(value.to_array())
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value.to_array())
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        // glam is column-major; transposing yields rows in memory order.
        UniformValue::Mat4(value.transpose().to_cols_array())
    }
}

impl From<Mat3> for UniformValue {
    fn from(value: Mat3) -> Self {
        UniformValue::from(Mat4::from_mat3(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_follows_component_order() {
        let flat = UniformValue::Vec3([1.0, 2.0, 3.0]).flatten();
        assert_eq!(
            flat,
            vec![Component::F32(1.0), Component::F32(2.0), Component::F32(3.0)]
        );
        assert_eq!(UniformValue::int(-4).flatten(), vec![Component::I32(-4)]);
    }

    #[test]
    fn glam_matrices_flatten_row_major() {
        let translation = Mat4::from_translation(Vec3::new(5.0, 6.0, 7.0));
        let flat: Vec<f32> = UniformValue::from(translation)
            .flatten()
            .into_iter()
            .map(Component::as_f32)
            .collect();
        // Translation sits in the last column, i.e. the fourth lane of each row.
        assert_eq!(flat[3], 5.0);
        assert_eq!(flat[7], 6.0);
        assert_eq!(flat[11], 7.0);
        assert_eq!(flat[15], 1.0);
    }

    #[test]
    fn mat3_embeds_with_homogeneous_identity() {
        let value = UniformValue::from(Mat3::IDENTITY);
        assert_eq!(value, UniformValue::identity());
    }

    #[test]
    fn predicates_match_shapes() {
        assert!(UniformValue::Vec4([0.0; 4]).is_vector());
        assert!(!UniformValue::float(1.0).is_vector());
        assert!(UniformValue::identity().is_matrix());
        assert!(!UniformValue::Vec2([0.0; 2]).is_matrix());
    }

    #[test]
    fn ill_formed_component_counts_are_rejected() {
        let err = UniformValue::from_components("sun", &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap_err();
        assert!(matches!(err, RenderError::SchemaMismatch { ref field, .. } if field == "sun"));

        let err = UniformValue::with_kind("pos", ValueKind::Vec3, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RenderError::SchemaMismatch { .. }));
    }

    #[test]
    fn int_bits_are_twos_complement() {
        assert_eq!(Component::I32(-1).to_bits(), u32::MAX);
        assert_eq!(Component::F32(1.0).to_bits(), 0x3f80_0000);
    }
}
