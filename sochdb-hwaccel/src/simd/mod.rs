// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Runtime-dispatched SIMD kernels.
//!
//! This module provides vectorized implementations of:
//! - **Dot product**: int8, int16, int32, int64, bfloat16, float32, float64
//! - **Squared Euclidean distance**: int8, bfloat16, float32, float64
//! - **Population count** over packed u64 words
//! - **Bit operations**: in-place AND / OR / AND-NOT / NOT, fused 128-byte
//!   AND / OR over many sources with per-source inversion
//! - **bfloat16 widening** to float32
//!
//! # Architecture
//!
//! Each target implements [`Accelerated`]. Operations a target does not
//! specialize fall through to the trait's default methods, which run the
//! [`generic`] reference kernels. Vector kernels are written once against the
//! [`unroll`] framework and instantiated per target with that target's load
//! tags and accumulate closures.
//!
//! # CPU Detection
//!
//! [`dispatch`] probes the CPU once and binds the best supported target:
//! - x86_64: AVX-512 (with VPOPCNTDQ) > AVX2 + FMA > Generic
//! - aarch64: NEON > Generic
//! - Other: Generic
//!
//! # Safety
//!
//! Vector kernels are `unsafe fn`s with `#[target_feature]`. A target can only
//! be constructed after its features were detected, so its safe trait methods
//! uphold the kernels' requirements.

use half::bf16;

use crate::types::{BitSource, CHUNK_BYTES};

/// Implement pairwise `Accelerated` methods by forwarding slices to raw
/// pointer kernels. Only expand inside targets whose constructor verified
/// the kernels' CPU features.
macro_rules! pairwise_kernels {
    ($($method:ident($ty:ty) -> $out:ty => $kernel:path;)*) => {
        $(
            #[inline]
            fn $method(&self, a: &[$ty], b: &[$ty]) -> $out {
                let n = $crate::simd::helpers::pair_len(a, b);
                // Safety: features checked at construction, both slices hold `n` elements.
                unsafe { $kernel(a.as_ptr(), b.as_ptr(), n) }
            }
        )*
    };
}

pub mod dispatch;
pub mod generic;
pub(crate) mod helpers;
pub mod unroll;

#[cfg(target_arch = "x86_64")]
pub mod avx2;
#[cfg(target_arch = "x86_64")]
pub mod avx512;
#[cfg(target_arch = "aarch64")]
pub mod neon;

pub use dispatch::{
    accelerator, baseline_accelerator, cpu_features, dispatch_info, init, is_resolved,
    simd_level, supported_targets, CpuFeatures, SimdLevel, TargetDescriptor,
};
pub use generic::GenericAccelerator;

/// One implementation of every kernel for one instruction set.
///
/// Slice arguments are processed over `min(a.len(), b.len())` elements; equal
/// lengths are expected and checked in debug builds.
pub trait Accelerated: Send + Sync {
    fn dot_product_f32(&self, a: &[f32], b: &[f32]) -> f32 {
        generic::dot_product_f32(a, b)
    }

    fn dot_product_bf16(&self, a: &[bf16], b: &[bf16]) -> f32 {
        generic::dot_product_bf16(a, b)
    }

    fn dot_product_f64(&self, a: &[f64], b: &[f64]) -> f64 {
        generic::dot_product_f64(a, b)
    }

    fn dot_product_i8(&self, a: &[i8], b: &[i8]) -> i64 {
        generic::dot_product_i8(a, b)
    }

    fn dot_product_i16(&self, a: &[i16], b: &[i16]) -> i64 {
        generic::dot_product_i16(a, b)
    }

    fn dot_product_i32(&self, a: &[i32], b: &[i32]) -> i64 {
        generic::dot_product_i32(a, b)
    }

    fn dot_product_i64(&self, a: &[i64], b: &[i64]) -> i64 {
        generic::dot_product_i64(a, b)
    }

    fn squared_euclidean_distance_i8(&self, a: &[i8], b: &[i8]) -> f64 {
        generic::squared_euclidean_distance_i8(a, b)
    }

    fn squared_euclidean_distance_bf16(&self, a: &[bf16], b: &[bf16]) -> f64 {
        generic::squared_euclidean_distance_bf16(a, b)
    }

    fn squared_euclidean_distance_f32(&self, a: &[f32], b: &[f32]) -> f64 {
        generic::squared_euclidean_distance_f32(a, b)
    }

    fn squared_euclidean_distance_f64(&self, a: &[f64], b: &[f64]) -> f64 {
        generic::squared_euclidean_distance_f64(a, b)
    }

    /// Total set bits over all words.
    fn population_count(&self, words: &[u64]) -> usize {
        generic::population_count(words)
    }

    /// `dest &= src`, bytewise.
    fn and_bit(&self, dest: &mut [u8], src: &[u8]) {
        generic::and_bit(dest, src)
    }

    /// `dest |= src`, bytewise.
    fn or_bit(&self, dest: &mut [u8], src: &[u8]) {
        generic::or_bit(dest, src)
    }

    /// `dest &= !src`, bytewise.
    fn and_not_bit(&self, dest: &mut [u8], src: &[u8]) {
        generic::and_not_bit(dest, src)
    }

    fn not_bit(&self, dest: &mut [u8]) {
        generic::not_bit(dest)
    }

    /// AND of the 128-byte chunks at `offset`, each source optionally inverted.
    ///
    /// # Panics
    /// Panics if a source is shorter than `offset + 128` bytes.
    fn and128(&self, offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
        generic::and128(offset, sources, dest)
    }

    /// OR of the 128-byte chunks at `offset`, each source optionally inverted.
    ///
    /// # Panics
    /// Panics if a source is shorter than `offset + 128` bytes.
    fn or128(&self, offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
        generic::or128(offset, sources, dest)
    }

    fn convert_bfloat16_to_float(&self, src: &[bf16], dest: &mut [f32]) {
        generic::convert_bfloat16_to_float(src, dest)
    }

    /// Name of the instruction set this target was built for.
    fn target_name(&self) -> &'static str;

    fn level(&self) -> SimdLevel;
}

impl std::fmt::Debug for dyn Accelerated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Accelerated({})", self.target_name())
    }
}
