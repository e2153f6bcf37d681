// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Scalar building blocks shared by the generic and vector targets.

use crate::types::CHUNK_BYTES;

/// Elements per inner int8 kernel call.
///
/// `256 * 255^2 < 2^31`, so an i32 accumulator cannot overflow inside one
/// chunk for either the dot product or the squared distance.
pub(crate) const I8_CHUNK: usize = 256;

/// Number of elements to process for a buffer pair.
#[inline(always)]
pub(crate) fn pair_len<T, U>(a: &[T], b: &[U]) -> usize {
    debug_assert_eq!(a.len(), b.len(), "buffer lengths differ");
    a.len().min(b.len())
}

/// Run an i32-accumulating int8 kernel over [`I8_CHUNK`]-sized pieces and
/// fold the partial sums into i64.
///
/// # Safety
/// `a` and `b` must be valid for `n` reads; `kernel` must uphold its own
/// target requirements.
#[inline(always)]
pub(crate) unsafe fn chunked_i8<F>(a: *const i8, b: *const i8, n: usize, kernel: F) -> i64
where
    F: Fn(*const i8, *const i8, usize) -> i32,
{
    let mut sum = 0i64;
    let mut i = 0;
    while i < n {
        let len = I8_CHUNK.min(n - i);
        debug_assert!(len <= I8_CHUNK);
        sum += unsafe { kernel(a.add(i), b.add(i), len) } as i64;
        i += len;
    }
    sum
}

/// Apply `op` in place over `min(dest.len(), src.len())` bytes: 64-bit
/// words in groups of `UNROLL`, then leftover words, then single bytes.
#[inline]
pub(crate) fn bit_operation<const UNROLL: usize>(
    dest: &mut [u8],
    src: &[u8],
    op: impl Fn(u64, u64) -> u64,
) {
    let n = pair_len(dest, src);
    let (dest, src) = (&mut dest[..n], &src[..n]);

    let mut d_blocks = dest.chunks_exact_mut(8 * UNROLL);
    let mut s_blocks = src.chunks_exact(8 * UNROLL);
    for (d, s) in (&mut d_blocks).zip(&mut s_blocks) {
        for (dw, sw) in d.chunks_exact_mut(8).zip(s.chunks_exact(8)) {
            apply_word(dw, sw, &op);
        }
    }

    let mut d_words = d_blocks.into_remainder().chunks_exact_mut(8);
    let mut s_words = s_blocks.remainder().chunks_exact(8);
    for (dw, sw) in (&mut d_words).zip(&mut s_words) {
        apply_word(dw, sw, &op);
    }

    for (d, &s) in d_words.into_remainder().iter_mut().zip(s_words.remainder()) {
        *d = op(*d as u64, s as u64) as u8;
    }
}

#[inline(always)]
fn apply_word(dest: &mut [u8], src: &[u8], op: &impl Fn(u64, u64) -> u64) {
    let x: u64 = bytemuck::pod_read_unaligned(dest);
    let y: u64 = bytemuck::pod_read_unaligned(src);
    dest.copy_from_slice(&op(x, y).to_ne_bytes());
}

/// Complement every byte, words first.
#[inline]
pub(crate) fn not_bytes(dest: &mut [u8]) {
    let mut words = dest.chunks_exact_mut(8);
    for w in &mut words {
        let x: u64 = bytemuck::pod_read_unaligned(w);
        w.copy_from_slice(&(!x).to_ne_bytes());
    }
    for b in words.into_remainder() {
        *b = !*b;
    }
}

/// Bounds-checked start of the 128-byte chunk at `offset`.
///
/// # Panics
/// Panics if `bits` holds fewer than `offset + CHUNK_BYTES` bytes.
#[inline(always)]
pub(crate) fn chunk_ptr(bits: &[u8], offset: usize) -> *const u8 {
    bits[offset..offset + CHUNK_BYTES].as_ptr()
}

/// Widen bf16 bits to f32 bits.
#[inline(always)]
pub(crate) fn bf16_bits_to_f32(bits: u16) -> f32 {
    f32::from_bits((bits as u32) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_operation_all_lengths() {
        for n in 0..150usize {
            let mut dest: Vec<u8> = (0..n).map(|i| (i * 37 + 11) as u8).collect();
            let src: Vec<u8> = (0..n).map(|i| (i * 91 + 5) as u8).collect();
            let expected: Vec<u8> = dest.iter().zip(&src).map(|(d, s)| d & !s).collect();
            bit_operation::<8>(&mut dest, &src, |x, y| x & !y);
            assert_eq!(dest, expected, "n={}", n);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "buffer lengths differ")]
    fn test_bit_operation_length_mismatch_asserts() {
        let mut dest = vec![0xffu8; 20];
        bit_operation::<8>(&mut dest, &[0u8; 12], |x, y| x & y);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_bit_operation_shorter_source() {
        let mut dest = vec![0xffu8; 20];
        let src = vec![0u8; 12];
        bit_operation::<8>(&mut dest, &src, |x, y| x & y);
        assert!(dest[..12].iter().all(|&b| b == 0));
        assert!(dest[12..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_not_bytes() {
        let mut data: Vec<u8> = (0..19).collect();
        not_bytes(&mut data);
        for (i, &b) in data.iter().enumerate() {
            assert_eq!(b, !(i as u8));
        }
    }

    #[test]
    fn test_chunked_i8_boundaries() {
        for n in [0usize, 1, 255, 256, 257, 512, 1000] {
            let a = vec![-128i8; n];
            let b = vec![-128i8; n];
            let calls = std::cell::Cell::new(0);
            let sum = unsafe {
                chunked_i8(a.as_ptr(), b.as_ptr(), n, |pa, pb, len| {
                    calls.set(calls.get() + 1);
                    assert!(len <= I8_CHUNK);
                    let sa = std::slice::from_raw_parts(pa, len);
                    let sb = std::slice::from_raw_parts(pb, len);
                    sa.iter().zip(sb).map(|(&x, &y)| x as i32 * y as i32).sum()
                })
            };
            assert_eq!(sum, n as i64 * 16384);
            assert_eq!(calls.get(), n.div_ceil(I8_CHUNK));
        }
    }

    #[test]
    #[should_panic]
    fn test_chunk_ptr_short_source() {
        let bits = vec![0u8; 130];
        chunk_ptr(&bits, 8);
    }

    #[test]
    fn test_bf16_widen() {
        assert_eq!(bf16_bits_to_f32(0x3f80), 1.0);
        assert_eq!(bf16_bits_to_f32(0xc000), -2.0);
        assert!(bf16_bits_to_f32(0x7fc0).is_nan());
    }
}
