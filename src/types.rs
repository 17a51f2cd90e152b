//! Core value types shared by the graph, the scanner and the code generator.

use serde::{Deserialize, Serialize};

/// Type names indexed by [`ValueKind`] ordinal.
///
/// The table is used both when declaring uniforms/variables and when matching
/// the parameter types read back from a function library.
pub const TYPE_NAMES: [&str; 6] = ["", "float", "vec2", "vec3", "vec4", "image2D"];

/// Closed set of data shapes a socket or parameter can hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[default]
    None = 0,
    Scalar = 1,
    Vec2 = 2,
    Vec3 = 3,
    Vec4 = 4,
    Image = 5,
}

impl ValueKind {
    pub const ALL: [ValueKind; 6] = [
        ValueKind::None,
        ValueKind::Scalar,
        ValueKind::Vec2,
        ValueKind::Vec3,
        ValueKind::Vec4,
        ValueKind::Image,
    ];

    /// Kinds that convert freely into each other.
    pub const NUMERIC: [ValueKind; 4] = [
        ValueKind::Scalar,
        ValueKind::Vec2,
        ValueKind::Vec3,
        ValueKind::Vec4,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the GLSL type name for this kind (empty for `None`).
    pub fn type_name(self) -> &'static str {
        TYPE_NAMES[self.index()]
    }

    /// Resolve a GLSL type name against [`TYPE_NAMES`].
    pub fn from_type_name(name: &str) -> Option<ValueKind> {
        if name.is_empty() {
            return None;
        }
        TYPE_NAMES
            .iter()
            .position(|t| *t == name)
            .map(|i| Self::ALL[i])
    }

    /// Number of meaningful float components in a raw payload.
    pub fn components(self) -> usize {
        match self {
            ValueKind::None => 0,
            ValueKind::Scalar => 1,
            ValueKind::Vec2 => 2,
            ValueKind::Vec3 => 3,
            ValueKind::Vec4 | ValueKind::Image => 4,
        }
    }

    /// The kind used when this value lives in an ordinary local variable.
    pub fn local(self) -> ValueKind {
        match self {
            ValueKind::Image => ValueKind::Vec4,
            other => other,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueKind::Scalar | ValueKind::Vec2 | ValueKind::Vec3 | ValueKind::Vec4
        )
    }
}

/// Raw 4-float payload; only the leading `kind.components()` are meaningful.
pub type RawValue = [f32; 4];

/// A value uploaded to a named uniform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
}

impl UniformValue {
    /// Build a uniform from a raw payload of the given kind.
    pub fn from_raw(kind: ValueKind, raw: RawValue) -> Option<UniformValue> {
        Some(match kind {
            ValueKind::Scalar => UniformValue::Float(raw[0]),
            ValueKind::Vec2 => UniformValue::Vec2([raw[0], raw[1]]),
            ValueKind::Vec3 => UniformValue::Vec3([raw[0], raw[1], raw[2]]),
            ValueKind::Vec4 => UniformValue::Vec4(raw),
            ValueKind::None | ValueKind::Image => return None,
        })
    }

    /// Size in bytes of the value inside a std140 block.
    pub fn byte_len(&self) -> usize {
        match self {
            UniformValue::Float(_) | UniformValue::Int(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
        }
    }

    /// Little-endian bytes as laid out in a uniform buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_follow_ordinals() {
        assert_eq!(ValueKind::Scalar.type_name(), "float");
        assert_eq!(ValueKind::Vec4.type_name(), "vec4");
        assert_eq!(ValueKind::Image.type_name(), "image2D");
        assert_eq!(ValueKind::None.type_name(), "");
    }

    #[test]
    fn resolves_type_names() {
        assert_eq!(ValueKind::from_type_name("vec3"), Some(ValueKind::Vec3));
        assert_eq!(ValueKind::from_type_name("mat4"), None);
        assert_eq!(ValueKind::from_type_name(""), None);
    }

    #[test]
    fn uniform_bytes_match_kind() {
        let v = UniformValue::from_raw(ValueKind::Vec3, [1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(v, UniformValue::Vec3([1.0, 2.0, 3.0]));
        assert_eq!(v.to_bytes().len(), v.byte_len());
        assert!(UniformValue::from_raw(ValueKind::Image, [0.0; 4]).is_none());
    }
}
