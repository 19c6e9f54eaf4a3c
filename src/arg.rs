//! Tagged scalar kernel arguments.

use std::borrow::Cow;

/// A plain-old-data kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw bytes of a struct or vector type (`float4`, user structs, ...)
    Bytes(Vec<u8>),
}

impl ArgValue {
    /// Native-endian bytes as passed to the kernel
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            ArgValue::I8(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::U8(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::I16(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::U16(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::I32(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::U32(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::I64(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::U64(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::F32(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::F64(v) => Cow::Owned(v.to_ne_bytes().to_vec()),
            ArgValue::Bytes(b) => Cow::Borrowed(b.as_slice()),
        }
    }

    /// Argument size in bytes
    pub fn size(&self) -> usize {
        self.as_bytes().len()
    }

    /// Packs any `Pod` value (e.g. a `#[repr(C)]` struct) as a byte blob.
    pub fn pod<T: bytemuck::Pod>(value: &T) -> Self {
        ArgValue::Bytes(bytemuck::bytes_of(value).to_vec())
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ArgValue {
                fn from(v: $ty) -> Self {
                    ArgValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl From<Vec<u8>> for ArgValue {
    fn from(bytes: Vec<u8>) -> Self {
        ArgValue::Bytes(bytes)
    }
}

/// Builds a `Vec<ArgValue>` from heterogeneous scalars.
///
/// # Example
///
/// ```
/// use harp_dispatch::{args, ArgValue};
///
/// let n = 11i32;
/// let values = args![n, 1.0f32, 2.0f32];
/// assert_eq!(values[0], ArgValue::I32(11));
/// assert_eq!(values.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::ArgValue::from($value)),*]
    };
}
