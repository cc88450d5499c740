//! the scalar-type registry. A closed set of element types, each with
//! a fixed byte size and name, looked up through a lazily-built table
//! rather than re-matched by hand at every call site.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::GPError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ScalarType {
    pub fn size(self) -> usize {
        registry().get(&self).expect("closed enum").size
    }

    pub fn name(self) -> &'static str {
        registry().get(&self).expect("closed enum").name
    }

    pub const ALL: [ScalarType; 7] = [
        ScalarType::Byte,
        ScalarType::Char,
        ScalarType::Short,
        ScalarType::Int,
        ScalarType::Long,
        ScalarType::Float,
        ScalarType::Double,
    ];
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
struct TypeMeta {
    size: usize,
    name: &'static str,
}

fn registry() -> &'static HashMap<ScalarType, TypeMeta> {
    static REGISTRY: OnceLock<HashMap<ScalarType, TypeMeta>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(ScalarType::Byte, TypeMeta { size: 1, name: "byte" });
        m.insert(ScalarType::Char, TypeMeta { size: 1, name: "char" });
        m.insert(ScalarType::Short, TypeMeta { size: 2, name: "short" });
        m.insert(ScalarType::Int, TypeMeta { size: 4, name: "int" });
        m.insert(ScalarType::Long, TypeMeta { size: 8, name: "long" });
        m.insert(ScalarType::Float, TypeMeta { size: 4, name: "float" });
        m.insert(ScalarType::Double, TypeMeta { size: 8, name: "double" });
        m
    })
}

/// A Rust type that backs one `ScalarType` branch. Used to monomorphize
/// dispatch instead of re-deriving element layout by hand everywhere.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DTYPE: ScalarType;

    fn to_bytes(self, out: &mut [u8]);
    fn from_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: ScalarType = ScalarType::$variant;

            fn to_bytes(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn from_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(buf)
            }
        }
    };
}

impl_element!(u8, Byte);
impl_element!(i8, Char);
impl_element!(i16, Short);
impl_element!(i32, Int);
impl_element!(i64, Long);
impl_element!(f32, Float);
impl_element!(f64, Double);

/// Dispatch to the Rust type matching a runtime `ScalarType`. Binds a
/// concrete element type as `$Type` inside `$body`.
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $Type:ident, $body:block) => {
        match $dtype {
            $crate::dtype::ScalarType::Byte => {
                type $Type = u8;
                $body
            }
            $crate::dtype::ScalarType::Char => {
                type $Type = i8;
                $body
            }
            $crate::dtype::ScalarType::Short => {
                type $Type = i16;
                $body
            }
            $crate::dtype::ScalarType::Int => {
                type $Type = i32;
                $body
            }
            $crate::dtype::ScalarType::Long => {
                type $Type = i64;
                $body
            }
            $crate::dtype::ScalarType::Float => {
                type $Type = f32;
                $body
            }
            $crate::dtype::ScalarType::Double => {
                type $Type = f64;
                $body
            }
        }
    };
}

pub fn require_float(dtype: ScalarType) -> Result<(), GPError> {
    match dtype {
        ScalarType::Float | ScalarType::Double => Ok(()),
        other => Err(GPError::UnsupportedDType(other.name().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_declared_layout() {
        assert_eq!(ScalarType::Float.size(), 4);
        assert_eq!(ScalarType::Double.size(), 8);
        assert_eq!(ScalarType::Byte.size(), 1);
        assert_eq!(ScalarType::Long.size(), 8);
    }

    #[test]
    fn names_are_stable() {
        for t in ScalarType::ALL {
            assert!(!t.name().is_empty());
        }
    }
}
