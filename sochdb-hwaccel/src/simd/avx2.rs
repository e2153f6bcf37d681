// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! AVX2 + FMA target (256-bit, x86_64)
//!
//! # Implementation Strategy
//!
//! - f32 / f64: `_mm256_fmadd_*` into 8 accumulators
//! - bfloat16: 8 values zero-extended to 32 bits and shifted left by 16,
//!   which yields the f32 bit pattern; then the f32 path
//! - int8: sign-extension to i16 followed by `_mm256_madd_epi16`
//!   (a0*b0 + a1*b1 -> i32), 256 elements per call
//! - popcount: nibble lookup with `_mm256_shuffle_epi8`, byte counts summed
//!   per 64-bit lane with `_mm256_sad_epu8`
//!
//! Tails use `_mm256_maskload_*` for 32/64-bit elements and a zeroed stack
//! buffer for 8/16-bit elements.

use std::arch::x86_64::*;

use half::bf16;

use super::dispatch::{cpu_features, SimdLevel};
use super::helpers::{self, bf16_bits_to_f32, chunked_i8, pair_len};
use super::unroll::{load_partial, AccuOps, Unroll, VecTag};
use super::Accelerated;
use crate::types::{BitSource, CHUNK_BYTES};

// ============================================================================
// Load tags and accumulators
// ============================================================================

#[derive(Clone, Copy)]
pub(crate) struct F32x8;

#[derive(Clone, Copy)]
pub(crate) struct F64x4;

/// 8 bf16 values widened into one f32 register.
#[derive(Clone, Copy)]
pub(crate) struct Bf16x8;

/// 16 i8 values sign-extended into 16 i16 lanes.
#[derive(Clone, Copy)]
pub(crate) struct I8x16;

#[derive(Clone, Copy)]
pub(crate) struct I32x8;

#[derive(Clone, Copy)]
pub(crate) struct U64x4;

#[inline(always)]
unsafe fn first_n_mask32(n: usize) -> __m256i {
    unsafe { _mm256_cmpgt_epi32(_mm256_set1_epi32(n as i32), _mm256_setr_epi32(0, 1, 2, 3, 4, 5, 6, 7)) }
}

#[inline(always)]
unsafe fn first_n_mask64(n: usize) -> __m256i {
    unsafe { _mm256_cmpgt_epi64(_mm256_set1_epi64x(n as i64), _mm256_setr_epi64x(0, 1, 2, 3)) }
}

#[inline(always)]
unsafe fn widen_bf16(raw: __m128i) -> __m256 {
    unsafe { _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(raw))) }
}

unsafe impl VecTag for F32x8 {
    type Scalar = f32;
    type Vector = __m256;
    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f32) -> __m256 {
        unsafe { _mm256_loadu_ps(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f32, n: usize) -> __m256 {
        unsafe { _mm256_maskload_ps(ptr, first_n_mask32(n)) }
    }
}

unsafe impl VecTag for F64x4 {
    type Scalar = f64;
    type Vector = __m256d;
    const LANES: usize = 4;

    #[inline(always)]
    unsafe fn load(self, ptr: *const f64) -> __m256d {
        unsafe { _mm256_loadu_pd(ptr) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const f64, n: usize) -> __m256d {
        unsafe { _mm256_maskload_pd(ptr, first_n_mask64(n)) }
    }
}

unsafe impl VecTag for Bf16x8 {
    type Scalar = bf16;
    type Vector = __m256;
    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn load(self, ptr: *const bf16) -> __m256 {
        unsafe { widen_bf16(_mm_loadu_si128(ptr as *const __m128i)) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const bf16, n: usize) -> __m256 {
        unsafe {
            let buf: [u16; 8] = load_partial(ptr as *const u16, n);
            widen_bf16(_mm_loadu_si128(buf.as_ptr() as *const __m128i))
        }
    }
}

unsafe impl VecTag for I8x16 {
    type Scalar = i8;
    type Vector = __m256i;
    const LANES: usize = 16;

    #[inline(always)]
    unsafe fn load(self, ptr: *const i8) -> __m256i {
        unsafe { _mm256_cvtepi8_epi16(_mm_loadu_si128(ptr as *const __m128i)) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const i8, n: usize) -> __m256i {
        unsafe {
            let buf: [i8; 16] = load_partial(ptr, n);
            _mm256_cvtepi8_epi16(_mm_loadu_si128(buf.as_ptr() as *const __m128i))
        }
    }
}

unsafe impl VecTag for U64x4 {
    type Scalar = u64;
    type Vector = __m256i;
    const LANES: usize = 4;

    #[inline(always)]
    unsafe fn load(self, ptr: *const u64) -> __m256i {
        unsafe { _mm256_loadu_si256(ptr as *const __m256i) }
    }

    #[inline(always)]
    unsafe fn load_n(self, ptr: *const u64, n: usize) -> __m256i {
        unsafe { _mm256_maskload_epi64(ptr as *const i64, first_n_mask64(n)) }
    }
}

impl AccuOps for F32x8 {
    type Accu = __m256;
    type Output = f32;

    #[inline(always)]
    unsafe fn zero(self) -> __m256 {
        unsafe { _mm256_setzero_ps() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m256, b: __m256) -> __m256 {
        unsafe { _mm256_add_ps(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m256) -> f32 {
        unsafe {
            let s = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps::<1>(v));
            let s = _mm_add_ps(s, _mm_movehl_ps(s, s));
            let s = _mm_add_ss(s, _mm_shuffle_ps::<0b01>(s, s));
            _mm_cvtss_f32(s)
        }
    }
}

impl AccuOps for F64x4 {
    type Accu = __m256d;
    type Output = f64;

    #[inline(always)]
    unsafe fn zero(self) -> __m256d {
        unsafe { _mm256_setzero_pd() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m256d, b: __m256d) -> __m256d {
        unsafe { _mm256_add_pd(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m256d) -> f64 {
        unsafe {
            let s = _mm_add_pd(_mm256_castpd256_pd128(v), _mm256_extractf128_pd::<1>(v));
            _mm_cvtsd_f64(_mm_add_sd(s, _mm_unpackhi_pd(s, s)))
        }
    }
}

impl AccuOps for I32x8 {
    type Accu = __m256i;
    type Output = i32;

    #[inline(always)]
    unsafe fn zero(self) -> __m256i {
        unsafe { _mm256_setzero_si256() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m256i, b: __m256i) -> __m256i {
        unsafe { _mm256_add_epi32(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m256i) -> i32 {
        unsafe {
            let s = _mm_add_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256::<1>(v));
            let s = _mm_add_epi32(s, _mm_shuffle_epi32::<0b01_00_11_10>(s));
            let s = _mm_add_epi32(s, _mm_shuffle_epi32::<0b10_11_00_01>(s));
            _mm_cvtsi128_si32(s)
        }
    }
}

impl AccuOps for U64x4 {
    type Accu = __m256i;
    type Output = u64;

    #[inline(always)]
    unsafe fn zero(self) -> __m256i {
        unsafe { _mm256_setzero_si256() }
    }

    #[inline(always)]
    unsafe fn add(self, a: __m256i, b: __m256i) -> __m256i {
        unsafe { _mm256_add_epi64(a, b) }
    }

    #[inline(always)]
    unsafe fn reduce_sum(self, v: __m256i) -> u64 {
        unsafe {
            let s = _mm_add_epi64(_mm256_castsi256_si128(v), _mm256_extracti128_si256::<1>(v));
            _mm_cvtsi128_si64(_mm_add_epi64(s, _mm_unpackhi_epi64(s, s))) as u64
        }
    }
}

// ============================================================================
// Dot product and distance kernels
// ============================================================================

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn dot_product_f32(a: *const f32, b: *const f32, n: usize) -> f32 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F32x8, F32x8, a, b, n, |acc, x, y| {
            _mm256_fmadd_ps(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn dot_product_bf16(a: *const bf16, b: *const bf16, n: usize) -> f32 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x8, F32x8, a, b, n, |acc, x, y| {
            _mm256_fmadd_ps(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn dot_product_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F64x4, F64x4, a, b, n, |acc, x, y| {
            _mm256_fmadd_pd(x, y, acc)
        })
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn dot_product_i8(a: *const i8, b: *const i8, n: usize) -> i64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x16, I32x8, pa, pb, len, |acc, x, y| {
                _mm256_add_epi32(acc, _mm256_madd_epi16(x, y))
            })
        })
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn squared_euclidean_distance_i8(a: *const i8, b: *const i8, n: usize) -> f64 {
    unsafe {
        chunked_i8(a, b, n, |pa, pb, len| {
            Unroll::<4>::reduce_pairwise_with_sum(I8x16, I32x8, pa, pb, len, |acc, x, y| {
                let d = _mm256_sub_epi16(x, y);
                _mm256_add_epi32(acc, _mm256_madd_epi16(d, d))
            })
        }) as f64
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn squared_euclidean_distance_bf16(a: *const bf16, b: *const bf16, n: usize) -> f64 {
    unsafe {
        Unroll::<4>::reduce_pairwise_with_sum(Bf16x8, F32x8, a, b, n, |acc, x, y| {
            let d = _mm256_sub_ps(x, y);
            _mm256_fmadd_ps(d, d, acc)
        }) as f64
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn squared_euclidean_distance_f32(a: *const f32, b: *const f32, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F32x8, F32x8, a, b, n, |acc, x, y| {
            let d = _mm256_sub_ps(x, y);
            _mm256_fmadd_ps(d, d, acc)
        }) as f64
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn squared_euclidean_distance_f64(a: *const f64, b: *const f64, n: usize) -> f64 {
    unsafe {
        Unroll::<8>::reduce_pairwise_with_sum(F64x4, F64x4, a, b, n, |acc, x, y| {
            let d = _mm256_sub_pd(x, y);
            _mm256_fmadd_pd(d, d, acc)
        })
    }
}

// ============================================================================
// Bit kernels
// ============================================================================

/// Set-bit count of each 64-bit lane.
#[inline(always)]
unsafe fn popcount_epi64(v: __m256i) -> __m256i {
    unsafe {
        let lut = _mm256_setr_epi8(
            0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4, //
            0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4,
        );
        let low_mask = _mm256_set1_epi8(0x0f);
        let lo = _mm256_and_si256(v, low_mask);
        let hi = _mm256_and_si256(_mm256_srli_epi16::<4>(v), low_mask);
        let counts = _mm256_add_epi8(_mm256_shuffle_epi8(lut, lo), _mm256_shuffle_epi8(lut, hi));
        _mm256_sad_epu8(counts, _mm256_setzero_si256())
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn population_count(words: *const u64, n: usize) -> usize {
    unsafe {
        Unroll::<8>::reduce_with_sum(U64x4, U64x4, words, n, |acc, v| {
            _mm256_add_epi64(acc, popcount_epi64(v))
        }) as usize
    }
}

/// 32-byte blocks through `op`, the rest through the scalar word/byte path.
#[inline(always)]
unsafe fn bitwise_blocks(
    dest: &mut [u8],
    src: &[u8],
    op: impl Fn(__m256i, __m256i) -> __m256i,
    tail: impl Fn(u64, u64) -> u64,
) {
    let n = pair_len(dest, src);
    let (dest, src) = (&mut dest[..n], &src[..n]);
    let mut d_blocks = dest.chunks_exact_mut(32);
    let mut s_blocks = src.chunks_exact(32);
    for (d, s) in (&mut d_blocks).zip(&mut s_blocks) {
        unsafe {
            let x = _mm256_loadu_si256(d.as_ptr() as *const __m256i);
            let y = _mm256_loadu_si256(s.as_ptr() as *const __m256i);
            _mm256_storeu_si256(d.as_mut_ptr() as *mut __m256i, op(x, y));
        }
    }
    helpers::bit_operation::<1>(d_blocks.into_remainder(), s_blocks.remainder(), tail);
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn and_bit(dest: &mut [u8], src: &[u8]) {
    unsafe { bitwise_blocks(dest, src, |x, y| _mm256_and_si256(x, y), |x, y| x & y) }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn or_bit(dest: &mut [u8], src: &[u8]) {
    unsafe { bitwise_blocks(dest, src, |x, y| _mm256_or_si256(x, y), |x, y| x | y) }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn and_not_bit(dest: &mut [u8], src: &[u8]) {
    // andnot(a, b) = !a & b
    unsafe { bitwise_blocks(dest, src, |x, y| _mm256_andnot_si256(y, x), |x, y| x & !y) }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn not_bit(dest: &mut [u8]) {
    let mut blocks = dest.chunks_exact_mut(32);
    unsafe {
        let ones = _mm256_set1_epi8(-1);
        for d in &mut blocks {
            let x = _mm256_loadu_si256(d.as_ptr() as *const __m256i);
            _mm256_storeu_si256(d.as_mut_ptr() as *mut __m256i, _mm256_xor_si256(x, ones));
        }
    }
    helpers::not_bytes(blocks.into_remainder());
}

#[inline(always)]
unsafe fn fold_chunks(
    offset: usize,
    sources: &[BitSource<'_>],
    dest: &mut [u8; CHUNK_BYTES],
    identity: __m256i,
    op: impl Fn(__m256i, __m256i) -> __m256i,
) {
    unsafe {
        let ones = _mm256_set1_epi8(-1);
        let mut acc = [identity; CHUNK_BYTES / 32];
        for &(bits, invert) in sources {
            let p = helpers::chunk_ptr(bits, offset);
            for (j, slot) in acc.iter_mut().enumerate() {
                let mut v = _mm256_loadu_si256(p.add(j * 32) as *const __m256i);
                if invert {
                    v = _mm256_xor_si256(v, ones);
                }
                *slot = op(*slot, v);
            }
        }
        for (j, v) in acc.into_iter().enumerate() {
            _mm256_storeu_si256(dest.as_mut_ptr().add(j * 32) as *mut __m256i, v);
        }
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn and128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe {
        fold_chunks(offset, sources, dest, _mm256_set1_epi8(-1), |x, y| {
            _mm256_and_si256(x, y)
        })
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn or128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    unsafe {
        fold_chunks(offset, sources, dest, _mm256_setzero_si256(), |x, y| {
            _mm256_or_si256(x, y)
        })
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn convert_bfloat16_to_float(src: &[bf16], dest: &mut [f32]) {
    let n = pair_len(src, dest);
    let (src, dest) = (&src[..n], &mut dest[..n]);
    let mut s_blocks = src.chunks_exact(Bf16x8::LANES);
    let mut d_blocks = dest.chunks_exact_mut(Bf16x8::LANES);
    for (s, d) in (&mut s_blocks).zip(&mut d_blocks) {
        unsafe { _mm256_storeu_ps(d.as_mut_ptr(), Bf16x8.load(s.as_ptr())) }
    }
    for (d, s) in d_blocks.into_remainder().iter_mut().zip(s_blocks.remainder()) {
        *d = bf16_bits_to_f32(s.to_bits());
    }
}

// ============================================================================
// Target
// ============================================================================

/// AVX2 + FMA target. Integer dot products wider than int8 use the reference.
#[derive(Debug, Clone, Copy)]
pub struct Avx2Accelerator {
    _private: (),
}

impl Avx2Accelerator {
    pub const TARGET_NAME: &'static str = "AVX2";

    /// `None` unless the CPU has AVX2 and FMA.
    pub fn new() -> Option<Self> {
        cpu_features()
            .supports_avx2()
            .then_some(Self { _private: () })
    }

    pub(crate) fn create() -> Option<Box<dyn Accelerated>> {
        Self::new().map(|accel| Box::new(accel) as Box<dyn Accelerated>)
    }
}

impl Accelerated for Avx2Accelerator {
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
        // Safety: AVX2 verified at construction
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
        SimdLevel::Avx2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::generic;

    fn accel() -> Option<Avx2Accelerator> {
        let accel = Avx2Accelerator::new();
        if accel.is_none() {
            println!("AVX2 not available, skipping");
        }
        accel
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
        for n in [0usize, 1, 3, 4, 7, 8, 9, 15, 16, 17, 31, 32, 33, 63, 64, 65, 255, 256, 257, 1000] {
            let a8: Vec<i8> = (0..n).map(|i| (i * 37 % 256) as u8 as i8).collect();
            let b8: Vec<i8> = (0..n).map(|i| (i * 11 % 256) as u8 as i8).collect();
            assert_eq!(accel.dot_product_i8(&a8, &b8), generic::dot_product_i8(&a8, &b8), "n={}", n);
            assert_eq!(
                accel.squared_euclidean_distance_i8(&a8, &b8),
                generic::squared_euclidean_distance_i8(&a8, &b8),
                "n={}",
                n
            );

            let words: Vec<u64> = (0..n as u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15)).collect();
            assert_eq!(accel.population_count(&words), generic::population_count(&words));

            // Small integers: every partial sum is exact in f32.
            let af: Vec<f32> = (0..n).map(|i| (i % 5) as f32).collect();
            let bf: Vec<f32> = (0..n).map(|i| (i % 3) as f32).collect();
            assert_eq!(accel.dot_product_f32(&af, &bf), generic::dot_product_f32(&af, &bf));
            assert_eq!(
                accel.squared_euclidean_distance_f32(&af, &bf),
                generic::squared_euclidean_distance_f32(&af, &bf)
            );
        }
    }

    #[test]
    fn test_i8_extremes() {
        let Some(accel) = accel() else { return };
        let n = 70_000;
        let a = vec![-128i8; n];
        let b = vec![127i8; n];
        assert_eq!(accel.dot_product_i8(&a, &a), n as i64 * 16384);
        assert_eq!(accel.squared_euclidean_distance_i8(&a, &b), n as f64 * 65025.0);
    }

    #[test]
    fn test_bit_kernels() {
        let Some(accel) = accel() else { return };
        for n in [0usize, 5, 31, 32, 33, 100] {
            let src: Vec<u8> = (0..n).map(|i| (i * 13) as u8).collect();
            let orig: Vec<u8> = (0..n).map(|i| (i * 29 + 1) as u8).collect();

            let (mut x, mut y) = (orig.clone(), orig.clone());
            accel.and_not_bit(&mut x, &src);
            generic::and_not_bit(&mut y, &src);
            assert_eq!(x, y);

            accel.not_bit(&mut x);
            generic::not_bit(&mut y);
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_chunks_and_convert() {
        let Some(accel) = accel() else { return };
        let a: Vec<u8> = (0..256).map(|i| i as u8).collect();
        let b: Vec<u8> = (0..256).map(|i| (i * 3) as u8).collect();
        let sources = [(&a[..], true), (&b[..], false)];
        let (mut x, mut y) = ([0u8; CHUNK_BYTES], [0u8; CHUNK_BYTES]);
        accel.and128(100, &sources, &mut x);
        generic::and128(100, &sources, &mut y);
        assert_eq!(x, y);
        accel.or128(7, &sources, &mut x);
        generic::or128(7, &sources, &mut y);
        assert_eq!(x, y);

        let src: Vec<bf16> = (0..21).map(|i| bf16::from_f32(i as f32 * 0.25 - 2.0)).collect();
        let mut out = vec![0.0f32; 21];
        accel.convert_bfloat16_to_float(&src, &mut out);
        for (s, d) in src.iter().zip(&out) {
            assert_eq!(s.to_f32(), *d);
        }
    }
}
