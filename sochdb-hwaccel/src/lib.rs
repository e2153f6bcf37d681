// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! SochDB hardware-accelerated kernels
//!
//! The innermost loops of similarity search and ranking: dot products,
//! squared Euclidean distances, population counts and bitwise operations over
//! raw numeric buffers, each with several SIMD implementations selected once
//! at runtime from the CPU's features.
//!
//! ```rust
//! use sochdb_hwaccel::{dot_product, population_count, squared_euclidean_distance};
//!
//! assert_eq!(dot_product::<i8>(&[1, 2, 3, 4], &[1, 1, 1, 1]), 10);
//! assert_eq!(squared_euclidean_distance::<f32>(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
//! assert_eq!(population_count(&[0xff, 0x0f]), 12);
//! ```
//!
//! The free functions route through [`simd::accelerator`]. Use
//! [`simd::supported_targets`] to run a specific target instead.

pub mod config;
pub mod error;
pub mod simd;
pub mod types;
pub mod verify;

pub use config::AccelConfig;
pub use error::{Error, Result};
pub use half::bf16;
pub use simd::{accelerator, init, Accelerated, SimdLevel};
pub use types::{BitSource, DotProduct, ElementType, SquaredEuclidean, CHUNK_BYTES};

/// Dot product of `a` and `b` over `min(a.len(), b.len())` elements.
#[inline]
pub fn dot_product<T: DotProduct>(a: &[T], b: &[T]) -> T::Output {
    T::dot(accelerator(), a, b)
}

/// Squared Euclidean distance of `a` and `b`.
#[inline]
pub fn squared_euclidean_distance<T: SquaredEuclidean>(a: &[T], b: &[T]) -> f64 {
    T::squared_euclidean(accelerator(), a, b)
}

#[inline]
pub fn population_count(words: &[u64]) -> usize {
    accelerator().population_count(words)
}

#[inline]
pub fn and_bit(dest: &mut [u8], src: &[u8]) {
    accelerator().and_bit(dest, src)
}

#[inline]
pub fn or_bit(dest: &mut [u8], src: &[u8]) {
    accelerator().or_bit(dest, src)
}

#[inline]
pub fn and_not_bit(dest: &mut [u8], src: &[u8]) {
    accelerator().and_not_bit(dest, src)
}

#[inline]
pub fn not_bit(dest: &mut [u8]) {
    accelerator().not_bit(dest)
}

#[inline]
pub fn and128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    accelerator().and128(offset, sources, dest)
}

#[inline]
pub fn or128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    accelerator().or128(offset, sources, dest)
}

#[inline]
pub fn convert_bfloat16_to_float(src: &[bf16], dest: &mut [f32]) {
    accelerator().convert_bfloat16_to_float(src, dest)
}

/// Name of the resolved target.
pub fn target_name() -> &'static str {
    accelerator().target_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convenience_layer() {
        assert_eq!(dot_product::<i16>(&[2, 3], &[4, 5]), 23);
        assert_eq!(dot_product::<f64>(&[0.5, 2.0], &[4.0, 1.0]), 4.0);
        assert_eq!(squared_euclidean_distance::<i8>(&[1, -1], &[-1, 1]), 8.0);

        let mut bits = vec![0xf0u8; 9];
        and_bit(&mut bits, &[0x3cu8; 9]);
        assert!(bits.iter().all(|&b| b == 0x30));
        not_bit(&mut bits);
        assert!(bits.iter().all(|&b| b == 0xcf));

        assert!(!target_name().is_empty());
    }

    #[test]
    fn test_i32_dot_wraps_through_accelerator() {
        assert_eq!(dot_product::<i32>(&[i32::MIN; 16], &[i32::MIN; 16]), 0);
    }
}
