// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Portable scalar kernels.
//!
//! These are the ground truth every vector target is checked against and the
//! fallback on CPUs without a supported SIMD extension. Floating point sums
//! use several independent partial accumulators, summed at the end, which
//! keeps both the error and the dependency chains short.
//!
//! # Accumulators
//!
//! | Operation | Element | Partials |
//! |-----------|---------|----------|
//! | dot | int8 | 8 x i32 per 256-element chunk, folded into i64 |
//! | dot | int16 / int32 / int64 | 8 x i64 |
//! | dot | float32 / float64 | 8 x f32 / f64 |
//! | dot | bfloat16 | 4 x f32 |
//! | distance | float32 / float64 | 16 x f64 (fused multiply-add) |
//! | distance | bfloat16 | 4 x f64 (fused multiply-add) |
//! | popcount | u64 words | 4 x u64 |

use half::bf16;

use super::dispatch::SimdLevel;
use super::helpers::{self, bf16_bits_to_f32, pair_len, I8_CHUNK};
use super::Accelerated;
use crate::types::{BitSource, CHUNK_BYTES};

/// Sum `term` over the pair with `UNROLL` independent partial accumulators.
#[inline(always)]
fn unrolled_sum<T, A, const UNROLL: usize>(
    a: &[T],
    b: &[T],
    zero: A,
    term: impl Fn(A, T, T) -> A,
    add: impl Fn(A, A) -> A,
) -> A
where
    T: Copy,
    A: Copy,
{
    let n = pair_len(a, b);
    let (a, b) = (&a[..n], &b[..n]);
    let mut partial = [zero; UNROLL];

    let mut a_chunks = a.chunks_exact(UNROLL);
    let mut b_chunks = b.chunks_exact(UNROLL);
    for (ca, cb) in (&mut a_chunks).zip(&mut b_chunks) {
        for j in 0..UNROLL {
            partial[j] = term(partial[j], ca[j], cb[j]);
        }
    }
    for (j, (&x, &y)) in a_chunks.remainder().iter().zip(b_chunks.remainder()).enumerate() {
        partial[j] = term(partial[j], x, y);
    }

    partial.into_iter().fold(zero, add)
}

/// Int8 pair reduction in 256-element chunks with i32 partials.
#[inline(always)]
fn chunked_i8_sum(a: &[i8], b: &[i8], term: impl Fn(i32, i8, i8) -> i32 + Copy) -> i64 {
    let n = pair_len(a, b);
    a[..n]
        .chunks(I8_CHUNK)
        .zip(b[..n].chunks(I8_CHUNK))
        .map(|(ca, cb)| unrolled_sum::<i8, i32, 8>(ca, cb, 0, term, |x, y| x + y) as i64)
        .sum()
}

// ============================================================================
// Dot product
// ============================================================================

pub fn dot_product_i8(a: &[i8], b: &[i8]) -> i64 {
    chunked_i8_sum(a, b, |acc, x, y| acc + x as i32 * y as i32)
}

pub fn dot_product_i16(a: &[i16], b: &[i16]) -> i64 {
    unrolled_sum::<i16, i64, 8>(a, b, 0, |acc, x, y| acc + x as i64 * y as i64, |x, y| x + y)
}

/// Wraps on overflow. Each product fits in i64, the running sum may not.
pub fn dot_product_i32(a: &[i32], b: &[i32]) -> i64 {
    unrolled_sum::<i32, i64, 8>(
        a,
        b,
        0,
        |acc, x, y| acc.wrapping_add(x as i64 * y as i64),
        i64::wrapping_add,
    )
}

/// Wraps on overflow, like two's-complement hardware.
pub fn dot_product_i64(a: &[i64], b: &[i64]) -> i64 {
    unrolled_sum::<i64, i64, 8>(
        a,
        b,
        0,
        |acc, x, y| acc.wrapping_add(x.wrapping_mul(y)),
        i64::wrapping_add,
    )
}

pub fn dot_product_bf16(a: &[bf16], b: &[bf16]) -> f32 {
    unrolled_sum::<bf16, f32, 4>(
        a,
        b,
        0.0,
        |acc, x, y| acc + bf16_bits_to_f32(x.to_bits()) * bf16_bits_to_f32(y.to_bits()),
        |x, y| x + y,
    )
}

pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    unrolled_sum::<f32, f32, 8>(a, b, 0.0, |acc, x, y| acc + x * y, |x, y| x + y)
}

pub fn dot_product_f64(a: &[f64], b: &[f64]) -> f64 {
    unrolled_sum::<f64, f64, 8>(a, b, 0.0, |acc, x, y| acc + x * y, |x, y| x + y)
}

// ============================================================================
// Squared Euclidean distance
// ============================================================================

pub fn squared_euclidean_distance_i8(a: &[i8], b: &[i8]) -> f64 {
    chunked_i8_sum(a, b, |acc, x, y| {
        let d = x as i32 - y as i32;
        acc + d * d
    }) as f64
}

pub fn squared_euclidean_distance_bf16(a: &[bf16], b: &[bf16]) -> f64 {
    unrolled_sum::<bf16, f64, 4>(
        a,
        b,
        0.0,
        |acc, x, y| {
            let d = (bf16_bits_to_f32(x.to_bits()) - bf16_bits_to_f32(y.to_bits())) as f64;
            d.mul_add(d, acc)
        },
        |x, y| x + y,
    )
}

pub fn squared_euclidean_distance_f32(a: &[f32], b: &[f32]) -> f64 {
    unrolled_sum::<f32, f64, 16>(
        a,
        b,
        0.0,
        |acc, x, y| {
            let d = (x - y) as f64;
            d.mul_add(d, acc)
        },
        |x, y| x + y,
    )
}

pub fn squared_euclidean_distance_f64(a: &[f64], b: &[f64]) -> f64 {
    unrolled_sum::<f64, f64, 16>(
        a,
        b,
        0.0,
        |acc, x, y| {
            let d = x - y;
            d.mul_add(d, acc)
        },
        |x, y| x + y,
    )
}

// ============================================================================
// Bits
// ============================================================================

pub fn population_count(words: &[u64]) -> usize {
    let mut partial = [0u64; 4];
    let mut chunks = words.chunks_exact(4);
    for c in &mut chunks {
        for j in 0..4 {
            partial[j] += c[j].count_ones() as u64;
        }
    }
    for (j, w) in chunks.remainder().iter().enumerate() {
        partial[j] += w.count_ones() as u64;
    }
    partial.iter().sum::<u64>() as usize
}

pub fn and_bit(dest: &mut [u8], src: &[u8]) {
    helpers::bit_operation::<8>(dest, src, |x, y| x & y);
}

pub fn or_bit(dest: &mut [u8], src: &[u8]) {
    helpers::bit_operation::<8>(dest, src, |x, y| x | y);
}

pub fn and_not_bit(dest: &mut [u8], src: &[u8]) {
    helpers::bit_operation::<8>(dest, src, |x, y| x & !y);
}

pub fn not_bit(dest: &mut [u8]) {
    helpers::not_bytes(dest);
}

const CHUNK_WORDS: usize = CHUNK_BYTES / 16;

/// Fold every source's 128-byte chunk at `offset` into `dest` as u128 words.
#[inline(always)]
fn fold_chunks(
    offset: usize,
    sources: &[BitSource<'_>],
    dest: &mut [u8; CHUNK_BYTES],
    identity: u128,
    op: impl Fn(u128, u128) -> u128,
) {
    let mut acc = [identity; CHUNK_WORDS];
    for &(bits, invert) in sources {
        let chunk = &bits[offset..offset + CHUNK_BYTES];
        for (slot, word) in acc.iter_mut().zip(chunk.chunks_exact(16)) {
            let w: u128 = bytemuck::pod_read_unaligned(word);
            *slot = op(*slot, if invert { !w } else { w });
        }
    }
    for (out, w) in dest.chunks_exact_mut(16).zip(acc) {
        out.copy_from_slice(&w.to_ne_bytes());
    }
}

/// AND the 128-byte chunks at `offset` of all sources into `dest`.
///
/// No sources yields all ones.
pub fn and128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    fold_chunks(offset, sources, dest, u128::MAX, |x, y| x & y);
}

/// OR the 128-byte chunks at `offset` of all sources into `dest`.
///
/// No sources yields all zeros.
pub fn or128(offset: usize, sources: &[BitSource<'_>], dest: &mut [u8; CHUNK_BYTES]) {
    fold_chunks(offset, sources, dest, 0, |x, y| x | y);
}

// ============================================================================
// Conversion
// ============================================================================

pub fn convert_bfloat16_to_float(src: &[bf16], dest: &mut [f32]) {
    debug_assert_eq!(src.len(), dest.len(), "buffer lengths differ");
    for (d, s) in dest.iter_mut().zip(src) {
        *d = bf16_bits_to_f32(s.to_bits());
    }
}

/// Portable target; every operation uses the trait's reference methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAccelerator;

impl GenericAccelerator {
    pub const TARGET_NAME: &'static str = "Generic";
}

impl Accelerated for GenericAccelerator {
    fn target_name(&self) -> &'static str {
        Self::TARGET_NAME
    }

    fn level(&self) -> SimdLevel {
        SimdLevel::Scalar
    }
}
