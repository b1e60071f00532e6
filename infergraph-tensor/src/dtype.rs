use std::fmt;

/// Element types of tensors stored by the runtime.
///
/// Integer tensors use `i64` elements, which also serve as the boolean type
/// (0 or 1) for comparison and logical operators.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Float,
    Int,
}

impl DataType {
    /// Return the size of elements of this type in bytes.
    pub fn size(self) -> u8 {
        match self {
            DataType::Float => 4,
            DataType::Int => 8,
        }
    }
}

impl fmt::Display for DataType {
    /// Format this enum value in the style of the corresponding Rust type (eg.
    /// "i64" for `DataType::Int`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "f32",
            DataType::Int => "i64",
        };
        write!(f, "{}", name)
    }
}

/// Get the [`DataType`] that corresponds to a given element type.
pub trait DataTypeOf {
    /// Return the data type that corresponds to the `Self` type.
    fn dtype_of() -> DataType;
}

macro_rules! impl_data_type_of {
    ($type:ty, $dtype:ident) => {
        impl DataTypeOf for $type {
            fn dtype_of() -> DataType {
                DataType::$dtype
            }
        }
    };
}

impl_data_type_of!(f32, Float);
impl_data_type_of!(i64, Int);

#[cfg(test)]
mod tests {
    use super::{DataType, DataTypeOf};

    #[test]
    fn test_data_type_of() {
        assert_eq!(f32::dtype_of(), DataType::Float);
        assert_eq!(i64::dtype_of(), DataType::Int);
        assert_eq!(DataType::Int.to_string(), "i64");
        assert_eq!(DataType::Float.size(), 4);
    }
}
