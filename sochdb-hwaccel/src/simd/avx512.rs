// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! AVX-512 target with VPOPCNTDQ (512-bit, x86_64)
//!
//! Requires AVX-512F, AVX-512BW, AVX-512 VPOPCNTDQ and BMI2 on top of the
//! AVX2 + FMA baseline. Tails of 32/64-bit elements use zero-masking loads
//! whose mask is built with `_bzhi_u32`, so no lane beyond `n` is touched.
//! In-place bit operations are memory bound and reuse the AVX2 kernels.

use std::arch::x86_64::*;

use half::bf16;

use super::avx2;
use super::dispatch::{cpu_features, SimdLevel};
use super::helpers::{self, bf16_bits_to_f32, chunked_i8, pair_len};
use super::unroll::{load_partial, AccuOps, Unroll, VecTag};
use super::Accelerated;
use crate::types::{BitSource, CHUNK_BYTES};

#[derive(Clone, Copy)]
struct F32x16;

#[derive(Clone, Copy)]
struct F64x8;

/// 16 bf16 values widened into one f32 register.
#[derive(Clone, Copy)]
struct Bf16x16;

/// 32 i8 values sign-extended into 32 i16 lanes.
#[derive(Clone, Copy)]
struct I8x32;

#[derive(Clone, Copy)]
struct I32x16;

#[derive(Clone, Copy)]
struct U64x8;

/// Low `n` bits set.
#[inline(always)]
unsafe fn tail_mask(n: usize) -> u32 {
    unsafe { _bzhi_u32(u32::MAX, n as u32) }
}

#[inline(always)]
unsafe fn widen_bf16(raw: __m256i) -> __m512 {
    unsafe { _mm512_castsi512_ps(_mm512_slli_epi32::<16>(_mm512_cvtepu16_epi32(raw))) }
}

unsafe impl VecTag for F32x16 {
    type Scalar = f32;
    type Vector = __m512;
    const LANES: usize = 16;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f32) -> __m512 {
        unsafe { _mm512_loadu_ps(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f32, n: usize) -> __m512 {
        unsafe { _mm512_maskz_loadu_ps(tail_mask(n) as __mmask16, ptr) }
    }
}

unsafe impl VecTag for F64x8 {
    type Scalar = f64;
    type Vector = __m512d;
    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f64) -> __m512d {
        unsafe { _mm512_loadu_pd(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f64, n: usize) -> __m512d {
        unsafe { _mm512_maskz_loadu_pd(tail_mask(n) as __mmask8, ptr) }
    }
}

unsafe impl VecTag for Bf16x16 {
    type Scalar = bf16;
    type Vector = __m512;
    const LANES: usize = 16;

    #[inline(always)]
    unsafe fn load(self, ptr: *const bf16) -> __m512 {
        unsafe { widen_bf16(_mm256_loadu_si256(ptr as *const __m256i)) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const bf16, n: usize) -> __m512 {
        unsafe {
            let buf: [u16; 16] = load_partial(ptr as *const u16, n);
            widen_bf16(_mm256_loadu_si256(buf.as_ptr() as *const __m256i))
        }
    }
}

unsafe impl VecTag for I8x32 {
    type Scalar = i8;
    type Vector = __m512i;
    const LANES: usize = 32;

    #[inline(always)]
    unsafe fn load(self, ptr: *const i8) -> __m512i {
        unsafe { _mm512_cvtepi8_epi16(_mm256_loadu_si256(ptr as *const __m256i)) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const i8, n: usize) -> __m512i {
        unsafe {
            let buf: [i8; 32] = load_partial(ptr, n);
            _mm512_cvtepi8_epi16(_mm256_loadu_si256(buf.as_ptr() as *const __m256i))
        }
    }
}

unsafe impl VecTag for U64x8 {
    type Scalar = u64;
    type Vector = __m512i;
    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn load(self, ptr: *const u64) -> __m512i {
        unsafe { _mm512_loadu_epi64(ptr as *const i64) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const u64, n: usize) -> __m512i {
        unsafe { _mm512_maskz_loadu_epi64(tail_mask(n) as __mmask8, ptr as *const i64) }
    }
}

impl AccuOps for F32x16 {
    type Accu = __m512;
    type Output = f32;

    #[inline(always)]
    unsafe fn zero(self) -> __m512 {
        unsafe { _mm512_setzero_ps() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m512, b: __m512) -> __m512 {
        unsafe { _mm512_add_ps(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m512) -> f32 {
        unsafe { _mm512_reduce_add_ps(v) }
    }
}

impl AccuOps for F64x8 {
    type Accu = __m512d;
    type Output = f64;

    #[inline(always)]
    unsafe fn zero(self) -> __m512d {
        unsafe { _mm512_setzero_pd() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m512d, b: __m512d) -> __m512d {
        unsafe { _mm512_add_pd(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m512d) -> f64 {
        unsafe { _mm512_reduce_add_pd(v) }
    }
}

impl AccuOps for I32x16 {
    type Accu = __m512i;
    type Output = i32;

    #[inline(always)]
    unsafe fn zero(self) -> __m512i {
        unsafe { _mm512_setzero_si512() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m512i, b: __m512i) -> __m512i {
        unsafe { _mm512_add_epi32(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m512i) -> i32 {
        unsafe { _mm512_reduce_add_epi32(v) }
    }
}

impl AccuOps for U64x8 {
    type Accu = __m512i;
    type Output = u64;

    #[inline(always)]
    unsafe fn zero(self) -> __m512i {
        unsafe { _mm512_setzero_si512() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m512i, b: __m512i) -> __m512i {
        unsafe { _mm512_add_epi64(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m512i) -> u64 {
        unsafe { _mm512_reduce_add_epi64(v) as u64 }
    }
}

// ============================================================================
// Kernels
// ============================================================================

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn dot_product_f32(a: *const f32, b: *const f32, n: usize) -> f32 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(F32x16, F32x16, a, b, n, |acc, x, y| {
            _mm512_fmadd_ps(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn dot_product_bf16(a: *const bf16, b: *const bf16, n: usize) -> f32 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x16, F32x16, a, b, n, |acc, x, y| {
            _mm512_fmadd_ps(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn dot_product_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(F64x8, F64x8, a, b, n, |acc, x, y| {
            _mm512_fmadd_pd(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn dot_product_i8(a: *const i8, b: *const i8, n: usize) -> i64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x32, I32x16, pa, pb, len, |acc, x, y| {
                _mm512_add_epi32(acc, _mm512_madd_epi16(x, y))
            })
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn squared_euclidean_distance_i8(a: *const i8, b: *const i8, n: usize) -> f64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x32, I32x16, pa, pb, len, |acc, x, y| {
                let d = _mm512_sub_epi16(x, y);
                _mm512_add_epi32(acc, _mm512_madd_epi16(d, d))
            })
        }) as f64
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn squared_euclidean_distance_bf16(a: *const bf16, b: *const bf16, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x16, F32x16, a, b, n, |acc, x, y| {
            let d = _mm512_sub_ps(x, y);
            _mm512_fmadd_ps(d, d, acc)
        }) as f64
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn squared_euclidean_distance_f32(a: *const f32, b: *const f32, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(F32x16, F32x16, a, b, n, |acc, x, y| {
            let d = _mm512_sub_ps(x, y);
            _mm512_fmadd_ps(d, d, acc)
        }) as f64
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn squared_euclidean_distance_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(F64x8, F64x8, a, b, n, |acc, x, y| {
            let d = _mm512_sub_pd(x, y);
            _mm512_fmadd_pd(d, d, acc)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn population_count(words: *const u64, n: usize) -> usize {
    unsafe {
        Unroll::<4>::reduce_with_sum(U64x8, U64x8, words, n, |acc, v| {
            _mm512_add_epi64(acc, _mm512_popcnt_epi64(v))
        }) as usize
    }
}

#[inline(always)]
unsafe fn fold_chunks(
    offset: usize,
    sources: &[BitSource<'_>],
    dest: &mut [u8; CHUNK_BYTES],
    identity: __m512i,
    op: impl Fn(__m512i, __m512i) -> __m512i,
) {
    unsafe {
        let ones = _mm512_set1_epi64(-1);
        let mut acc = [identity; CHUNK_BYTES / 64];
        for &(bits, invert) in sources {
            let p = helpers::chunk_ptr(bits, offset);
            for (j, slot) in acc.iter_mut().enumerate() {
                let mut v = _mm512_loadu_epi64(p.add(j * 64) as *const i64);
                if invert {
                    v = _mm512_xor_si512(v, ones);
                }
                *slot = op(*slot, v);
            }
        }
        for (j, v) in acc.into_iter().enumerate() {
            _mm512_storeu_epi64(dest.as_mut_ptr().add(j * 64) as *mut i64, v);
        }
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn and128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe {
        fold_chunks(offset, sources, dest, _mm512_set1_epi64(-1), |x, y| {
            _mm512_and_si512(x, y)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn or128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe {
        fold_chunks(offset, sources, dest, _mm512_setzero_si512(), |x, y| {
            _mm512_or_si512(x, y)
        })
    }
}

#[target_feature(enable = "avx512f,avx512bw,avx512vpopcntdq,bmi2,avx2,fma")]
unsafe fn convert_bfloat16_to_float(src: &[bf16], dest: &mut [f32]) {
    let n = pair_len(src, dest);
    let (src, dest) = (&src[..n], &mut dest[..n]);
    let mut s_blocks = src.chunks_exact(Bf16x16::LANES);
    let mut d_blocks = dest.chunks_exact_mut(Bf16x16::LANES);
    for (s, d) in (&mut s_blocks).zip(&mut d_blocks) {
        unsafe { _mm512_storeu_ps(d.as_mut_ptr(), Bf16x16.load(s.as_ptr())) }
    }
    for (d, s) in d_blocks.into_remainder().iter_mut().zip(s_blocks.remainder()) {
        *d = bf16_bits_to_f32(s.to_bits());
    }
}

// ============================================================================
// Target
// ============================================================================

/// AVX-512 target. Reported as "AVX512_POPCNT" since it depends on VPOPCNTDQ.
#[derive(Debug, Clone, Copy)]
pub struct Avx512Accelerator {
    _private: (),
}

impl Avx512Accelerator {
    pub const TARGET_NAME: &'static str = "AVX512_POPCNT";

    /// `None` unless the CPU has every feature in the target's set.
    pub fn new() -> Option<Self> {
        cpu_features()
            .supports_avx512_popcnt()
            .then_some(Self { _private: () })
    }

    pub(crate) fn create() -> Option<Box<dyn Accelerated>> {
        Self::new().map(|accel| Box::new(accel) as Box<dyn Accelerated>)
    }
}

impl Accelerated for Avx512Accelerator {
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
        // Safety: the full feature set was verified at construction
        unsafe { population_count(words.as_ptr(), words.len()) }
    }

    // AVX2 is part of this target's feature set.
    fn and_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { avx2::and_bit(dest, src) }
    }

    fn or_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { avx2::or_bit(dest, src) }
    }

    fn and_not_bit(&self, dest: &mut [u8], src: &[u8]) {
        unsafe { avx2::and_not_bit(dest, src) }
    }

    fn not_bit(&self, dest: &mut [u8]) {
        unsafe { avx2::not_bit(dest) }
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
        SimdLevel::Avx512
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::generic;

    fn accel() -> Option<Avx512Accelerator> {
        let accel = Avx512Accelerator::new();
        if accel.is_none() {
            println!("AVX-512 with VPOPCNTDQ not available, skipping");
        }
        accel
    }

    #[test]
    fn test_tail_mask() {
        if !cpu_features().has_bmi2 {
            return;
        }
        unsafe {
            assert_eq!(tail_mask(0), 0);
            assert_eq!(tail_mask(3), 0b111);
            assert_eq!(tail_mask(16), 0xffff);
        }
    }

    #[test]
    fn test_scenarios() {
        let Some(accel) = accel() else { return };
        assert_eq!(accel.dot_product_i8(&[1, 2, 3, 4], &[1, 1, 1, 1]), 10);
        assert_eq!(accel.squared_euclidean_distance_f32(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(accel.population_count(&[0xff, 0x0f]), 12);
    }

    #[test]
    fn test_boundary_sizes() {
        let Some(accel) = accel() else { return };
        for n in [0usize, 1, 7, 8, 9, 15, 16, 17, 31, 32, 33, 63, 64, 65, 127, 128, 129, 257, 1000] {
            let a8: Vec<i8> = (0..n).map(|i| (i * 37 % 256) as u8 as i8).collect();
            let b8: Vec<i8> = (0..n).map(|i| (i * 11 % 256) as u8 as i8).collect();
            assert_eq!(accel.dot_product_i8(&a8, &b8), generic::dot_product_i8(&a8, &b8), "n={}", n);
            assert_eq!(
                accel.squared_euclidean_distance_i8(&a8, &b8),
                generic::squared_euclidean_distance_i8(&a8, &b8)
            );

            let words: Vec<u64> = (0..n as u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15)).collect();
            assert_eq!(accel.population_count(&words), generic::population_count(&words), "n={}", n);

            let af: Vec<f64> = (0..n).map(|i| (i % 7) as f64).collect();
            let bf: Vec<f64> = (0..n).map(|i| (i % 4) as f64).collect();
            assert_eq!(accel.dot_product_f64(&af, &bf), generic::dot_product_f64(&af, &bf));
            assert_eq!(
                accel.squared_euclidean_distance_f64(&af, &bf),
                generic::squared_euclidean_distance_f64(&af, &bf)
            );
        }
    }

    #[test]
    fn test_chunks() {
        let Some(accel) = accel() else { return };
        let a: Vec<u8> = (0..200).map(|i| (i * 5) as u8).collect();
        let b: Vec<u8> = (0..200).map(|i| (i * 9 + 3) as u8).collect();
        let sources = [(&a[..], false), (&b[..], true), (&a[..], true)];
        let (mut x, mut y) = ([0u8; CHUNK_BYTES], [0u8; CHUNK_BYTES]);
        accel.and128(72, &sources, &mut x);
        generic::and128(72, &sources, &mut y);
        assert_eq!(x, y);
        accel.or128(72, &sources, &mut x);
        generic::or128(72, &sources, &mut y);
        assert_eq!(x, y);
    }
}
