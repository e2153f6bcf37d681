// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! NEON target (128-bit, aarch64)
//!
//! - f32 / f64: `vfmaq_*` into 8 accumulators
//! - bfloat16: `vshll_n_u16::<16>` widens 4 values straight to f32 bits
//! - int8: `vmull_s8` (8 x i8 -> i16) then `vpadalq_s16` (pairwise widen
//!   and accumulate into i32); the distance uses `vsubl_s8` and `vmlal_s16`
//! - popcount: `vcntq_u8` followed by a `vpaddlq` chain up to 64-bit lanes
//!
//! Tails are copied into a zeroed stack buffer before the vector load.

use std::arch::aarch64::*;

use half::bf16;

use super::dispatch::{cpu_features, SimdLevel};
use super::helpers::{self, bf16_bits_to_f32, chunked_i8, pair_len};
use super::unroll::{load_partial, AccuOps, Unroll, VecTag};
use super::Accelerated;
use crate::types::{BitSource, CHUNK_BYTES};

#[derive(Clone, Copy)]
struct F32x4;

#[derive(Clone, Copy)]
struct F64x2;

#[derive(Clone, Copy)]
struct Bf16x4;

#[derive(Clone, Copy)]
struct I8x8;

#[derive(Clone, Copy)]
struct I32x4;

#[derive(Clone, Copy)]
struct U64x2;

#[inline(always)]
unsafe fn widen_bf16(raw: uint16x4_t) -> float32x4_t {
    unsafe { vreinterpretq_f32_u32(vshll_n_u16::<16>(raw)) }
}

unsafe impl VecTag for F32x4 {
    type Scalar = f32;
    type Vector = float32x4_t;
    const LANES: usize = 4;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f32) -> float32x4_t {
        unsafe { vld1q_f32(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f32, n: usize) -> float32x4_t {
        unsafe {
            let buf: [f32; 4] = load_partial(ptr, n);
            vld1q_f32(buf.as_ptr())
        }
    }
}

unsafe impl VecTag for F64x2 {
    type Scalar = f64;
    type Vector = float64x2_t;
    const LANES: usize = 2;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f64) -> float64x2_t {
        unsafe { vld1q_f64(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f64, n: usize) -> float64x2_t {
        unsafe {
            let buf: [f64; 2] = load_partial(ptr, n);
            vld1q_f64(buf.as_ptr())
        }
    }
}

unsafe impl VecTag for Bf16x4 {
    type Scalar = bf16;
    type Vector = float32x4_t;
    const LANES: usize = 4;

    #[inline(always)]
    unsafe fn load(self, ptr: *const bf16) -> float32x4_t {
        unsafe { widen_bf16(vld1_u16(ptr as *const u16)) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const bf16, n: usize) -> float32x4_t {
        unsafe {
            let buf: [u16; 4] = load_partial(ptr as *const u16, n);
            widen_bf16(vld1_u16(buf.as_ptr()))
        }
    }
}

unsafe impl VecTag for I8x8 {
    type Scalar = i8;
    type Vector = int8x8_t;
    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn load(self, ptr: *const i8) -> int8x8_t {
        unsafe { vld1_s8(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const i8, n: usize) -> int8x8_t {
        unsafe {
            let buf: [i8; 8] = load_partial(ptr, n);
            vld1_s8(buf.as_ptr())
        }
    }
}

unsafe impl VecTag for U64x2 {
    type Scalar = u64;
    type Vector = uint64x2_t;
    const LANES: usize = 2;

    #[inline(always)]
    unsafe fn load(self, ptr: *const u64) -> uint64x2_t {
        unsafe { vld1q_u64(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const u64, n: usize) -> uint64x2_t {
        unsafe {
            let buf: [u64; 2] = load_partial(ptr, n);
            vld1q_u64(buf.as_ptr())
        }
    }
}

impl AccuOps for F32x4 {
    type Accu = float32x4_t;
    type Output = f32;

    #[inline(always)]
    unsafe fn zero(self) -> float32x4_t {
        unsafe { vdupq_n_f32(0.0) }
    }

    #[inline(always)]
    unsafe fn add(self, a: float32x4_t, b: float32x4_t) -> float32x4_t {
        unsafe { vaddq_f32(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: float32x4_t) -> f32 {
        unsafe { vaddvq_f32(v) }
    }
}

impl AccuOps for F64x2 {
    type Accu = float64x2_t;
    type Output = f64;

    #[inline(always)]
    unsafe fn zero(self) -> float64x2_t {
        unsafe { vdupq_n_f64(0.0) }
    }

    #[inline(always)]
    unsafe fn add(self, a: float64x2_t, b: float64x2_t) -> float64x2_t {
        unsafe { vaddq_f64(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: float64x2_t) -> f64 {
        unsafe { vaddvq_f64(v) }
    }
}

impl AccuOps for I32x4 {
    type Accu = int32x4_t;
    type Output = i32;

    #[inline(always)]
    unsafe fn zero(self) -> int32x4_t {
        unsafe { vdupq_n_s32(0) }
    }

    #[inline(always)]
    unsafe fn add(self, a: int32x4_t, b: int32x4_t) -> int32x4_t {
        unsafe { vaddq_s32(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: int32x4_t) -> i32 {
        unsafe { vaddvq_s32(v) }
    }
}

impl AccuOps for U64x2 {
    type Accu = uint64x2_t;
    type Output = u64;

    #[inline(always)]
    unsafe fn zero(self) -> uint64x2_t {
        unsafe { vdupq_n_u64(0) }
    }

    #[inline(always)]
    unsafe fn add(self, a: uint64x2_t, b: uint64x2_t) -> uint64x2_t {
        unsafe { vaddq_u64(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: uint64x2_t) -> u64 {
        unsafe { vaddvq_u64(v) }
    }
}

// ============================================================================
// Kernels
// ============================================================================

#[target_feature(enable = "neon")]
unsafe fn dot_product_f32(a: *const f32, b: *const f32, n: usize) -> f32 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F32x4, F32x4, a, b, n, |acc, x, y| {
            vfmaq_f32(acc, x, y)
        })
    }
}

#[target_feature(enable = "neon")]
unsafe fn dot_product_bf16(a: *const bf16, b: *const bf16, n: usize) -> f32 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x4, F32x4, a, b, n, |acc, x, y| {
            vfmaq_f32(acc, x, y)
        })
    }
}

#[target_feature(enable = "neon")]
unsafe fn dot_product_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F64x2, F64x2, a, b, n, |acc, x, y| {
            vfmaq_f64(acc, x, y)
        })
    }
}

#[target_feature(enable = "neon")]
unsafe fn dot_product_i8(a: *const i8, b: *const i8, n: usize) -> i64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x8, I32x4, pa, pb, len, |acc, x, y| {
                vpadalq_s16(acc, vmull_s8(x, y))
            })
        })
    }
}

#[target_feature(enable = "neon")]
unsafe fn squared_euclidean_distance_i8(a: *const i8, b: *const i8, n: usize) -> f64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x8, I32x4, pa, pb, len, |acc, x, y| {
                let d = vsubl_s8(x, y);
                let lo = vget_low_s16(d);
                vmlal_high_s16(vmlal_s16(acc, lo, lo), d, d)
            })
        }) as f64
    }
}

#[target_feature(enable = "neon")]
unsafe fn squared_euclidean_distance_bf16(a: *const bf16, b: *const bf16, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x4, F32x4, a, b, n, |acc, x, y| {
            let d = vsubq_f32(x, y);
            vfmaq_f32(acc, d, d)
        }) as f64
    }
}

#[target_feature(enable = "neon")]
unsafe fn squared_euclidean_distance_f32(a: *const f32, b: *const f32, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F32x4, F32x4, a, b, n, |acc, x, y| {
            let d = vsubq_f32(x, y);
            vfmaq_f32(acc, d, d)
        }) as f64
    }
}

#[target_feature(enable = "neon")]
unsafe fn squared_euclidean_distance_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F64x2, F64x2, a, b, n, |acc, x, y| {
            let d = vsubq_f64(x, y);
            vfmaq_f64(acc, d, d)
        })
    }
}

#[target_feature(enable = "neon")]
unsafe fn population_count(words: *const u64, n: usize) -> usize {
    unsafe {
        Unroll::<8>::reduce_with_sum(U64x2, U64x2, words, n, |acc, v| {
            let bytes = vcntq_u8(vreinterpretq_u8_u64(v));
            vaddq_u64(acc, vpaddlq_u32(vpaddlq_u16(vpaddlq_u8(bytes))))
        }) as usize
    }
}

/// 16-byte blocks through `op`, the rest through the scalar word/byte path.
#[inline(always)]
unsafe fn bitwise_blocks(
    dest: &mut [u8],
    src: &[u8],
    op: impl Fn(uint8x16_t, uint8x16_t) -> uint8x16_t,
    tail: impl Fn(u64, u64) -> u64,
) {
    let n = pair_len(dest, src);
    let (dest, src) = (&mut dest[..n], &src[..n]);
    let mut d_blocks = dest.chunks_exact_mut(16);
    let mut s_blocks = src.chunks_exact(16);
    for (d, s) in (&mut d_blocks).zip(&mut s_blocks) {
        unsafe { vst1q_u8(d.as_mut_ptr(), op(vld1q_u8(d.as_ptr()), vld1q_u8(s.as_ptr()))) }
    }
    helpers::bit_operation::<1>(d_blocks.into_remainder(), s_blocks.remainder(), tail);
}

#[target_feature(enable = "neon")]
unsafe fn and_bit(dest: &mut [u8], src: &[u8]) {
    unsafe { bitwise_blocks(dest, src, |x, y| vandq_u8(x, y), |x, y| x & y) }
}

#[target_feature(enable = "neon")]
unsafe fn or_bit(dest: &mut [u8], src: &[u8]) {
    unsafe { bitwise_blocks(dest, src, |x, y| vorrq_u8(x, y), |x, y| x | y) }
}

#[target_feature(enable = "neon")]
unsafe fn and_not_bit(dest: &mut [u8], src: &[u8]) {
    // bic(a, b) = a & !b
    unsafe { bitwise_blocks(dest, src, |x, y| vbicq_u8(x, y), |x, y| x & !y) }
}

#[target_feature(enable = "neon")]
unsafe fn not_bit(dest: &mut [u8]) {
    let mut blocks = dest.chunks_exact_mut(16);
    for d in &mut blocks {
        unsafe { vst1q_u8(d.as_mut_ptr(), vmvnq_u8(vld1q_u8(d.as_ptr()))) }
    }
    helpers::not_bytes(blocks.into_remainder());
}

#[inline(always)]
unsafe fn fold_chunks(
    offset: usize,
    sources: &[BitSource<'_>],
    dest: &mut [u8; CHUNK_BYTES],
    identity: uint8x16_t,
    op: impl Fn(uint8x16_t, uint8x16_t) -> uint8x16_t,
) {
    unsafe {
        let mut acc = [identity; CHUNK_BYTES / 16];
        for &(bits, invert) in sources {
            let p = helpers::chunk_ptr(bits, offset);
            for (j, slot) in acc.iter_mut().enumerate() {
                let mut v = vld1q_u8(p.add(j * 16));
                if invert {
                    v = vmvnq_u8(v);
                }
                *slot = op(*slot, v);
            }
        }
        for (j, v) in acc.into_iter().enumerate() {
            vst1q_u8(dest.as_mut_ptr().add(j * 16), v);
        }
    }
}

#[target_feature(enable = "neon")]
unsafe fn and128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe { fold_chunks(offset, sources, dest, vdupq_n_u8(0xff), |x, y| vandq_u8(x, y)) }
}

#[target_feature(enable = "neon")]
unsafe fn or128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe { fold_chunks(offset, sources, dest, vdupq_n_u8(0), |x, y| vorrq_u8(x, y)) }
}

#[target_feature(enable = "neon")]
unsafe fn convert_bfloat16_to_float(src: &[bf16], dest: &mut [f32]) {
    let n = pair_len(src, dest);
    let (src, dest) = (&src[..n], &mut dest[..n]);
    let mut s_blocks = src.chunks_exact(Bf16x4::LANES);
    let mut d_blocks = dest.chunks_exact_mut(Bf16x4::LANES);
    for (s, d) in (&mut s_blocks).zip(&mut d_blocks) {
        unsafe { vst1q_f32(d.as_mut_ptr(), Bf16x4.load(s.as_ptr())) }
    }
    for (d, s) in d_blocks.into_remainder().iter_mut().zip(s_blocks.remainder()) {
        *d = bf16_bits_to_f32(s.to_bits());
    }
}

// ============================================================================
// Target
// ============================================================================

/// NEON target. Integer dot products wider than int8 use the reference.
#[derive(Debug, Clone, Copy)]
pub struct NeonAccelerator {
    _private: (),
}

impl NeonAccelerator {
    pub const TARGET_NAME: &'static str = "NEON";

    pub fn new() -> Option<Self> {
        cpu_features()
            .supports_neon()
            .then_some(Self { _private: () })
    }

    pub(crate) fn create() -> Option<Box<dyn Accelerated>> {
        Self::new().map(|accel| Box::new(accel) as Box<dyn Accelerated>)
    }
}

impl Accelerated for NeonAccelerator {
    pairwise_kernels! {
        dot_product_f32(f32) -> f32 => dot_product_f32;
        dot_product_bf16(bf16) -> f32 => dot_product_bf16;
        dot_product_f64(f64) -> f64 => dot_product_f64;
        dot_product_i8(i8) -> i64 => dot_product_i8;
        squared_euclidean_distance_i8(i8) -> f64 => squared_euclidean_distance_i8;
        squared_euclidean_distance_bf16(bf16) -> f64 => squared_euclidean_distance_bf16;
        squared_euclidean_distance_f32(f32) -> f64 => squared_euclidean_distance_f32;
        squared_euclidean_distance_f64(f64) -> f64 => squared_euclidean_distance_f64;
    }

    fn population_count(&self, words: &[u64]) -> usize {
        // Safety: NEON verified at construction
        unsafe { population_count(words.as_ptr(), words.len()) }
    }

    fn and_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { and_bit(dest, src) }
    }

    fn or_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { or_bit(dest, src) }
    }

    fn and_not_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { and_not_bit(dest, src) }
    }

    fn not_bit(&self, dest: &mut [u8]) {
        unsafe { not_bit(dest) }
    }

    fn and128(&self, offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
        unsafe { and128(offset, sources, dest) }
    }

    fn or128(&self, offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
        unsafe { or128(offset, sources, dest) }
    }

    fn convert_bfloat16_to_float(&self, src: &[bf16], dest: &mut [f32]) {
        unsafe { convert_bfloat16_to_float(src, dest) }
    }

    fn target_name(&self) -> &'static str {
        Self::TARGET_NAME
    }

    fn level(&self) -> SimdLevel {
        SimdLevel::Neon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::generic;

    #[test]
    fn test_neon_matches_reference() {
        let Some(accel) = NeonAccelerator::new() else { return };
        for n in [0usize, 1, 2, 3, 4, 5, 7, 8, 9, 15, 16, 17, 33, 64, 255, 256, 257, 1000] {
            let a8: Vec<i8> = (0..n).map(|i| (i * 37 % 256) as u8 as i8).collect();
            let b8: Vec<i8> = (0..n).map(|i| (i * 11 % 256) as u8 as i8).collect();
            assert_eq!(accel.dot_product_i8(&a8, &b8), generic::dot_product_i8(&a8, &b8), "n={}", n);
            assert_eq!(
                accel.squared_euclidean_distance_i8(&a8, &b8),
                generic::squared_euclidean_distance_i8(&a8, &b8)
            );

            let words: Vec<u64> = (0..n as u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15)).collect();
            assert_eq!(accel.population_count(&words), generic::population_count(&words));

            let af: Vec<f32> = (0..n).map(|i| (i % 5) as f32).collect();
            let bf: Vec<f32> = (0..n).map(|i| (i % 3) as f32).collect();
            assert_eq!(accel.dot_product_f32(&af, &bf), generic::dot_product_f32(&af, &bf));
        }
    }

    #[test]
    fn test_scenarios() {
        let Some(accel) = NeonAccelerator::new() else { return };
        assert_eq!(accel.dot_product_i8(&[1, 2, 3, 4], &[1, 1, 1, 1]), 10);
        assert_eq!(accel.squared_euclidean_distance_f32(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(accel.population_count(&[0xff, 0x0f]), 12);

        let mut dest = vec![0b1100u8; 37];
        accel.and_not_bit(&mut dest, &[0b0100u8; 37]);
        assert!(dest.iter().all(|&b| b == 0b1000));
    }
}
