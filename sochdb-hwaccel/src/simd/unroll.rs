// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Multi-accumulator loop unrolling shared by every vector target.
//!
//! Every kernel in this crate is the same loop with different loads,
//! accumulate step and final reduction. This module owns that loop once:
//!
//! ```text
//! n = 37, LANES = 4, K = 4
//!
//! [ acc0 acc1 acc2 acc3 ] [ acc0 acc1 acc2 acc3 ]   main loop: K x LANES per step
//! [ acc0 ]                                          leftover whole vectors
//! [ acc1: 1 element + 3 zero lanes ]                masked tail
//!
//! acc0 += acc1, acc2 += acc3      stride 1
//! acc0 += acc2                    stride 2
//! lane_reduce(acc0)
//! ```
//!
//! The K accumulators carry no dependency on each other inside the main loop,
//! which hides the latency of the multiply-add units.
//!
//! # Tail handling
//!
//! `VecTag::load_n` loads fewer than `LANES` elements and zero-fills the rest
//! without touching memory past `n`. Every accumulate step passed to the
//! framework must map zero lanes to a zero contribution.

/// One vector shape on one target.
///
/// # Safety
///
/// `load` must read exactly `LANES` elements and `load_n` must read at most
/// `n` elements. Methods may only be called on CPUs supporting the tag's
/// instructions.
pub unsafe trait VecTag: Copy {
    /// Element type in memory
    type Scalar: Copy;
    /// Register type the elements are loaded into
    type Vector: Copy;
    /// Elements consumed by one load
    const LANES: usize;

    /// Unaligned load of `LANES` elements.
    ///
    /// # Safety
    /// `ptr` must be valid for `LANES` reads.
    unsafe fn load(self, ptr: *const Self::Scalar) -> Self::Vector;

    /// Load `n < LANES` elements, zero-filling the remaining lanes.
    ///
    /// # Safety
    /// `ptr` must be valid for `n` reads.
    unsafe fn load_n(self, ptr: *const Self::Scalar, n: usize) -> Self::Vector;
}

/// Accumulator register operations used by the `*_with_sum` forms.
pub trait AccuOps: Copy {
    type Accu: Copy;
    type Output;

    /// # Safety
    /// CPU must support the underlying instructions.
    unsafe fn zero(self) -> Self::Accu;

    /// # Safety
    /// CPU must support the underlying instructions.
    unsafe fn add(self, a: Self::Accu, b: Self::Accu) -> Self::Accu;

    /// Horizontal sum of all lanes.
    ///
    /// # Safety
    /// CPU must support the underlying instructions.
    unsafe fn reduce_sum(self, v: Self::Accu) -> Self::Output;
}

/// Copy `n` elements into a zeroed stack buffer of `N` elements.
///
/// Used by `load_n` implementations for element types without masked loads.
///
/// # Safety
/// `ptr` must be valid for `n` reads and `n <= N`.
#[inline(always)]
pub unsafe fn load_partial<T: Copy + Default, const N: usize>(ptr: *const T, n: usize) -> [T; N] {
    debug_assert!(n <= N);
    let mut buf = [T::default(); N];
    unsafe { std::ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), n.min(N)) };
    buf
}

/// Unroll factor `K` (power of two, at least 2).
pub struct Unroll<const K: usize>;

impl<const K: usize> Unroll<K> {
    const VALID: () = assert!(
        K >= 2 && K.is_power_of_two(),
        "unroll factor must be a power of two >= 2"
    );

    /// Reduce two buffers of `n` elements through `accumulate`.
    ///
    /// # Safety
    /// `a` and `b` must be valid for `n` reads; the CPU must support `tag`.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn reduce_pairwise<D, A, R, F, M, L>(
        tag: D,
        init: A,
        a: *const D::Scalar,
        b: *const D::Scalar,
        n: usize,
        accumulate: F,
        merge: M,
        lane_reduce: L,
    ) -> R
    where
        D: VecTag,
        A: Copy,
        F: Fn(A, D::Vector, D::Vector) -> A,
        M: Fn(A, A) -> A,
        L: FnOnce(A) -> R,
    {
        let () = Self::VALID;
        let lanes = D::LANES;
        let mut accu = [init; K];
        let mut i = 0;

        unsafe {
            while i + K * lanes <= n {
                for slot in accu.iter_mut() {
                    *slot = accumulate(*slot, tag.load(a.add(i)), tag.load(b.add(i)));
                    i += lanes;
                }
            }
            while i + lanes <= n {
                accu[0] = accumulate(accu[0], tag.load(a.add(i)), tag.load(b.add(i)));
                i += lanes;
            }
            let rest = n - i;
            if rest > 0 {
                accu[1] = accumulate(accu[1], tag.load_n(a.add(i), rest), tag.load_n(b.add(i), rest));
            }
        }

        lane_reduce(tree_reduce(accu, merge))
    }

    /// Reduce one buffer of `n` elements through `accumulate`.
    ///
    /// # Safety
    /// `a` must be valid for `n` reads; the CPU must support `tag`.
    #[inline(always)]
    pub unsafe fn reduce<D, A, R, F, M, L>(
        tag: D,
        init: A,
        a: *const D::Scalar,
        n: usize,
        accumulate: F,
        merge: M,
        lane_reduce: L,
    ) -> R
    where
        D: VecTag,
        A: Copy,
        F: Fn(A, D::Vector) -> A,
        M: Fn(A, A) -> A,
        L: FnOnce(A) -> R,
    {
        let () = Self::VALID;
        let lanes = D::LANES;
        let mut accu = [init; K];
        let mut i = 0;

        unsafe {
            while i + K * lanes <= n {
                for slot in accu.iter_mut() {
                    *slot = accumulate(*slot, tag.load(a.add(i)));
                    i += lanes;
                }
            }
            while i + lanes <= n {
                accu[0] = accumulate(accu[0], tag.load(a.add(i)));
                i += lanes;
            }
            let rest = n - i;
            if rest > 0 {
                accu[1] = accumulate(accu[1], tag.load_n(a.add(i), rest));
            }
        }

        lane_reduce(tree_reduce(accu, merge))
    }

    /// [`Self::reduce_pairwise`] with merge and lane reduction taken from `sum`.
    ///
    /// # Safety
    /// Same as [`Self::reduce_pairwise`]; the CPU must also support `sum`.
    #[inline(always)]
    pub unsafe fn reduce_pairwise_with_sum<D, S, F>(
        tag: D,
        sum: S,
        a: *const D::Scalar,
        b: *const D::Scalar,
        n: usize,
        accumulate: F,
    ) -> S::Output
    where
        D: VecTag,
        S: AccuOps,
        F: Fn(S::Accu, D::Vector, D::Vector) -> S::Accu,
    {
        unsafe {
            Self::reduce_pairwise(
                tag,
                sum.zero(),
                a,
                b,
                n,
                accumulate,
                |x, y| sum.add(x, y),
                |v| sum.reduce_sum(v),
            )
        }
    }

    /// [`Self::reduce`] with merge and lane reduction taken from `sum`.
    ///
    /// # Safety
    /// Same as [`Self::reduce`]; the CPU must also support `sum`.
    #[inline(always)]
    pub unsafe fn reduce_with_sum<D, S, F>(
        tag: D,
        sum: S,
        a: *const D::Scalar,
        n: usize,
        accumulate: F,
    ) -> S::Output
    where
        D: VecTag,
        S: AccuOps,
        F: Fn(S::Accu, D::Vector) -> S::Accu,
    {
        unsafe {
            Self::reduce(
                tag,
                sum.zero(),
                a,
                n,
                accumulate,
                |x, y| sum.add(x, y),
                |v| sum.reduce_sum(v),
            )
        }
    }
}

/// Pairwise tree reduction: strides 1, 2, 4, ... down to slot 0.
#[inline(always)]
pub(crate) fn tree_reduce<A: Copy, const K: usize>(mut accu: [A; K], merge: impl Fn(A, A) -> A) -> A {
    let mut stride = 1;
    while stride < K {
        let mut j = 0;
        while j + stride < K {
            accu[j] = merge(accu[j], accu[j + stride]);
            j += 2 * stride;
        }
        stride *= 2;
    }
    accu[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Plain-array tag so the framework can be tested without intrinsics.
    #[derive(Clone, Copy)]
    struct Lanes4;

    unsafe impl VecTag for Lanes4 {
        type Scalar = i64;
        type Vector = [i64; 4];
        const LANES: usize = 4;

        unsafe fn load(self, ptr: *const i64) -> [i64; 4] {
            unsafe { std::ptr::read_unaligned(ptr as *const [i64; 4]) }
        }

        unsafe fn load_n(self, ptr: *const i64, n: usize) -> [i64; 4] {
            unsafe { load_partial(ptr, n) }
        }
    }

    impl AccuOps for Lanes4 {
        type Accu = [i64; 4];
        type Output = i64;

        unsafe fn zero(self) -> [i64; 4] {
            [0; 4]
        }

        unsafe fn add(self, a: [i64; 4], b: [i64; 4]) -> [i64; 4] {
            [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
        }

        unsafe fn reduce_sum(self, v: [i64; 4]) -> i64 {
            v.iter().sum()
        }
    }

    fn mul_add4(acc: [i64; 4], x: [i64; 4], y: [i64; 4]) -> [i64; 4] {
        [
            acc[0] + x[0] * y[0],
            acc[1] + x[1] * y[1],
            acc[2] + x[2] * y[2],
            acc[3] + x[3] * y[3],
        ]
    }

    #[test]
    fn test_tree_reduce_order() {
        // Non-commutative merge exposes the pairing order.
        assert_eq!(tree_reduce([1u64, 2], |x, y| x * 10 + y), 12);
        assert_eq!(tree_reduce([1u64, 2, 3, 4], |x, y| x * 100 + y), 10504);
        let eight = tree_reduce([1u64, 2, 3, 4, 5, 6, 7, 8], |x, y| x * 100 + y);
        // ((1 2) (3 4)) ((5 6) (7 8))
        assert_eq!(eight, (102 * 100 + 304) * 100 + (506 * 100 + 708));
    }

    #[test]
    fn test_pairwise_matches_naive() {
        for n in 0..70usize {
            let a: Vec<i64> = (0..n as i64).map(|i| i * 3 - 50).collect();
            let b: Vec<i64> = (0..n as i64).map(|i| 7 - i).collect();
            let expected: i64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();

            let k2 = unsafe {
                Unroll::<2>::reduce_pairwise_with_sum(Lanes4, Lanes4, a.as_ptr(), b.as_ptr(), n, mul_add4)
            };
            let k8 = unsafe {
                Unroll::<8>::reduce_pairwise_with_sum(Lanes4, Lanes4, a.as_ptr(), b.as_ptr(), n, mul_add4)
            };
            assert_eq!(k2, expected, "K=2 n={}", n);
            assert_eq!(k8, expected, "K=8 n={}", n);
        }
    }

    #[test]
    fn test_tail_is_zero_filled() {
        let data = [5i64, 6, 7];
        let v = unsafe { Lanes4.load_n(data.as_ptr(), 3) };
        assert_eq!(v, [5, 6, 7, 0]);
        let v = unsafe { Lanes4.load_n(data.as_ptr(), 0) };
        assert_eq!(v, [0; 4]);
    }

    #[test]
    fn test_accumulator_slots() {
        // n = 4 * 4 * 2 + 4 + 1: two full rounds, one leftover vector, one tail element.
        let n = 37;
        let ones = vec![1i64; n];
        let calls = Cell::new(0usize);
        let per_slot = unsafe {
            Unroll::<4>::reduce(
                Lanes4,
                0i64,
                ones.as_ptr(),
                n,
                |acc, v: [i64; 4]| {
                    calls.set(calls.get() + 1);
                    acc + v.iter().sum::<i64>()
                },
                |x, y| x + y,
                |acc| acc,
            )
        };
        assert_eq!(per_slot, 37);
        // 8 main-loop loads + 1 leftover + 1 tail
        assert_eq!(calls.get(), 10);
    }

    #[test]
    fn test_empty_input_never_loads() {
        let result = unsafe {
            Unroll::<4>::reduce(
                Lanes4,
                0i64,
                std::ptr::null(),
                0,
                |_, _: [i64; 4]| -> i64 { panic!("no load expected") },
                |x, y| x + y,
                |acc| acc,
            )
        };
        assert_eq!(result, 0);
    }
}
