// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Common types used throughout the kernels.

use half::bf16;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::simd::Accelerated;

/// Size in bytes of one fused `and128` / `or128` chunk.
pub const CHUNK_BYTES: usize = 128;

/// A source bit vector for `and128` / `or128` plus its invert flag.
///
/// When the flag is set the source contributes `!bits[offset + j]`.
pub type BitSource<'a> = (&'a [u8], bool);

/// Element type of a kernel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    BFloat16,
    Float32,
    Float64,
    /// Packed bits stored in u64 words
    PackedBits,
}

impl ElementType {
    /// Bytes per element
    pub const fn size_bytes(&self) -> usize {
        match self {
            ElementType::Int8 => 1,
            ElementType::Int16 | ElementType::BFloat16 => 2,
            ElementType::Int32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Float64 | ElementType::PackedBits => 8,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::BFloat16 => "bfloat16",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::PackedBits => "bits",
        }
    }

    /// Whether results over this type must match the reference bit for bit.
    pub const fn is_exact(&self) -> bool {
        !matches!(
            self,
            ElementType::BFloat16 | ElementType::Float32 | ElementType::Float64
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for half::bf16 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Element types that have a dot product kernel.
pub trait DotProduct: Copy + sealed::Sealed {
    /// Accumulator/result type (at least as wide as the element)
    type Output: Copy;

    const ELEMENT: ElementType;

    fn dot(accel: &dyn Accelerated, a: &[Self], b: &[Self]) -> Self::Output;
}

/// Element types that have a squared Euclidean distance kernel.
pub trait SquaredEuclidean: Copy + sealed::Sealed {
    const ELEMENT: ElementType;

    fn squared_euclidean(accel: &dyn Accelerated, a: &[Self], b: &[Self]) -> f64;
}

macro_rules! impl_dot_product {
    ($($ty:ty => $out:ty, $elem:ident, $method:ident;)*) => {
        $(
            impl DotProduct for $ty {
                type Output = $out;
                const ELEMENT: ElementType = ElementType::$elem;

                #[inline]
                fn dot(accel: &dyn Accelerated, a: &[Self], b: &[Self]) -> $out {
                    accel.$method(a, b)
                }
            }
        )*
    };
}

impl_dot_product! {
    i8 => i64, Int8, dot_product_i8;
    i16 => i64, Int16, dot_product_i16;
    i32 => i64, Int32, dot_product_i32;
    i64 => i64, Int64, dot_product_i64;
    bf16 => f32, BFloat16, dot_product_bf16;
    f32 => f32, Float32, dot_product_f32;
    f64 => f64, Float64, dot_product_f64;
}

macro_rules! impl_squared_euclidean {
    ($($ty:ty => $elem:ident, $method:ident;)*) => {
        $(
            impl SquaredEuclidean for $ty {
                const ELEMENT: ElementType = ElementType::$elem;

                #[inline]
                fn squared_euclidean(accel: &dyn Accelerated, a: &[Self], b: &[Self]) -> f64 {
                    accel.$method(a, b)
                }
            }
        )*
    };
}

impl_squared_euclidean! {
    i8 => Int8, squared_euclidean_distance_i8;
    bf16 => BFloat16, squared_euclidean_distance_bf16;
    f32 => Float32, squared_euclidean_distance_f32;
    f64 => Float64, squared_euclidean_distance_f64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::generic::GenericAccelerator;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::Int8.size_bytes(), 1);
        assert_eq!(ElementType::BFloat16.size_bytes(), 2);
        assert_eq!(ElementType::Float32.size_bytes(), 4);
        assert_eq!(ElementType::PackedBits.size_bytes(), 8);
        assert!(ElementType::Int64.is_exact());
        assert!(!ElementType::BFloat16.is_exact());
    }

    #[test]
    fn test_element_serde_names() {
        let json = serde_json::to_string(&ElementType::BFloat16).unwrap();
        assert_eq!(json, "\"bfloat16\"");
        let back: ElementType = serde_json::from_str("\"int8\"").unwrap();
        assert_eq!(back, ElementType::Int8);
    }

    #[test]
    fn test_trait_routing() {
        let accel = GenericAccelerator;
        assert_eq!(<i8 as DotProduct>::dot(&accel, &[1, 2, 3, 4], &[1, 1, 1, 1]), 10);
        assert_eq!(
            <f32 as SquaredEuclidean>::squared_euclidean(&accel, &[0.0, 0.0], &[3.0, 4.0]),
            25.0
        );
        assert_eq!(<f64 as DotProduct>::ELEMENT, ElementType::Float64);
    }
}
