// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Cross-target verification harness.
//!
//! Runs every operation of a target and of the reference over the same
//! deterministic random buffers and compares the results: integer results
//! must be identical, floating point results must agree within a relative
//! tolerance. Lengths cover empty input, every size up to a few vectors of
//! the widest target, the int8 chunk boundaries and one buffer larger than
//! 2^16 elements. Buffers are also shifted by a few elements so unaligned
//! starts are exercised.

use half::bf16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::simd::dispatch::{baseline_accelerator, supported_targets, SimdLevel};
use crate::simd::Accelerated;
use crate::types::{BitSource, ElementType, CHUNK_BYTES};

/// Lengths checked by default.
pub fn default_lengths() -> Vec<usize> {
    let mut lengths: Vec<usize> = (0..=80).collect();
    lengths.extend([127, 128, 129, 255, 256, 257, 511, 512, 513, 1000, 4099, 140_000]);
    lengths
}

/// Verification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Element counts to check
    pub lengths: Vec<usize>,
    /// Start offsets (in elements) applied to every buffer
    pub offsets: Vec<usize>,
    /// Maximum relative error for floating point results
    pub tolerance: f64,
    /// RNG seed for the test buffers
    pub seed: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            lengths: default_lengths(),
            offsets: vec![0, 1, 3],
            tolerance: 1e-4,
            seed: 0x5eed_cafe,
        }
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub target: String,
    pub level: SimdLevel,
    pub checks: usize,
    pub max_relative_error: f64,
}

impl VerifyReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Random test buffers shared by all checks.
struct TestData {
    i8s: Vec<i8>,
    i16s: Vec<i16>,
    i32s: Vec<i32>,
    i64s: Vec<i64>,
    bf16s: Vec<bf16>,
    f32s: Vec<f32>,
    f64s: Vec<f64>,
    words: Vec<u64>,
    bytes: Vec<u8>,
}

impl TestData {
    fn generate(len: usize, rng: &mut StdRng) -> Self {
        // Non-negative floats: no cancellation, so relative error stays meaningful.
        Self {
            i8s: (0..len).map(|_| rng.gen()).collect(),
            i16s: (0..len).map(|_| rng.gen()).collect(),
            // Bounded so the i64 partial sums of 2^17+ products cannot overflow.
            i32s: (0..len).map(|_| rng.gen_range(-(1 << 20)..1 << 20)).collect(),
            i64s: (0..len).map(|_| rng.gen()).collect(),
            bf16s: (0..len).map(|_| bf16::from_f32(rng.gen_range(0.0f32..128.0))).collect(),
            f32s: (0..len).map(|_| rng.gen_range(0.0f32..500.0)).collect(),
            f64s: (0..len).map(|_| rng.gen_range(0.0f64..500.0)).collect(),
            words: (0..len).map(|_| rng.gen()).collect(),
            bytes: (0..len).map(|_| rng.gen()).collect(),
        }
    }
}

struct Checker<'a> {
    target: &'a dyn Accelerated,
    tolerance: f64,
    checks: usize,
    max_relative_error: f64,
}

impl Checker<'_> {
    fn mismatch(&self, op: &'static str, element: ElementType, len: usize, expected: f64, actual: f64) -> Error {
        Error::Mismatch {
            target: self.target.target_name(),
            op,
            element,
            len,
            expected,
            actual,
        }
    }

    fn exact(&mut self, op: &'static str, element: ElementType, len: usize, expected: i64, actual: i64) -> Result<()> {
        debug_assert!(element.is_exact());
        self.checks += 1;
        if expected != actual {
            return Err(self.mismatch(op, element, len, expected as f64, actual as f64));
        }
        Ok(())
    }

    /// Exact element types must match bit for bit, floating ones within tolerance.
    fn close(&mut self, op: &'static str, element: ElementType, len: usize, expected: f64, actual: f64) -> Result<()> {
        self.checks += 1;
        if element.is_exact() {
            if expected.to_bits() != actual.to_bits() {
                return Err(self.mismatch(op, element, len, expected, actual));
            }
            return Ok(());
        }
        let scale = expected.abs().max(actual.abs());
        let rel = if scale == 0.0 {
            0.0
        } else {
            (expected - actual).abs() / scale
        };
        if rel.is_nan() || rel > self.tolerance {
            return Err(self.mismatch(op, element, len, expected, actual));
        }
        self.max_relative_error = self.max_relative_error.max(rel);
        Ok(())
    }

    fn bytes(&mut self, op: &'static str, len: usize, expected: &[u8], actual: &[u8]) -> Result<()> {
        self.checks += 1;
        match expected.iter().zip(actual).position(|(e, a)| e != a) {
            Some(i) => Err(self.mismatch(op, ElementType::Int8, len, expected[i] as f64, actual[i] as f64)),
            None => Ok(()),
        }
    }
}

/// Compare every operation of `target` against `reference`.
pub fn verify_target(
    target: &dyn Accelerated,
    reference: &dyn Accelerated,
    config: &VerifyConfig,
) -> Result<VerifyReport> {
    let max_len = config.lengths.iter().copied().max().unwrap_or(0);
    let max_offset = config.offsets.iter().copied().max().unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let a = TestData::generate(max_len + max_offset, &mut rng);
    let b = TestData::generate(max_len + max_offset, &mut rng);

    let mut checker = Checker {
        target,
        tolerance: config.tolerance,
        checks: 0,
        max_relative_error: 0.0,
    };

    for &len in &config.lengths {
        for &off in &config.offsets {
            let r = off..off + len;
            check_numeric(&mut checker, reference, &a, &b, r.clone(), len)?;
            check_bits(&mut checker, reference, &a.bytes[r.clone()], &b.bytes[r], len)?;
        }
    }

    check_chunks(&mut checker, reference, &a.bytes, &b.bytes)?;
    check_bf16_conversion(&mut checker, reference)?;

    let report = VerifyReport {
        target: target.target_name().to_string(),
        level: target.level(),
        checks: checker.checks,
        max_relative_error: checker.max_relative_error,
    };
    debug!(
        target_name = %report.target,
        checks = report.checks,
        max_relative_error = report.max_relative_error,
        "Target verified"
    );
    Ok(report)
}

fn check_numeric(
    c: &mut Checker<'_>,
    reference: &dyn Accelerated,
    a: &TestData,
    b: &TestData,
    r: std::ops::Range<usize>,
    len: usize,
) -> Result<()> {
    let t = c.target;
    let (a8, b8) = (&a.i8s[r.clone()], &b.i8s[r.clone()]);
    let (a16, b16) = (&a.i16s[r.clone()], &b.i16s[r.clone()]);
    let (a32, b32) = (&a.i32s[r.clone()], &b.i32s[r.clone()]);
    let (a64, b64) = (&a.i64s[r.clone()], &b.i64s[r.clone()]);
    let (ah, bh) = (&a.bf16s[r.clone()], &b.bf16s[r.clone()]);
    let (af, bf) = (&a.f32s[r.clone()], &b.f32s[r.clone()]);
    let (ad, bd) = (&a.f64s[r.clone()], &b.f64s[r.clone()]);
    let words = &a.words[r];

    c.exact("dot_product", ElementType::Int8, len, reference.dot_product_i8(a8, b8), t.dot_product_i8(a8, b8))?;
    c.exact("dot_product", ElementType::Int16, len, reference.dot_product_i16(a16, b16), t.dot_product_i16(a16, b16))?;
    c.exact("dot_product", ElementType::Int32, len, reference.dot_product_i32(a32, b32), t.dot_product_i32(a32, b32))?;
    c.exact("dot_product", ElementType::Int64, len, reference.dot_product_i64(a64, b64), t.dot_product_i64(a64, b64))?;
    c.close(
        "dot_product",
        ElementType::BFloat16,
        len,
        reference.dot_product_bf16(ah, bh) as f64,
        t.dot_product_bf16(ah, bh) as f64,
    )?;
    c.close(
        "dot_product",
        ElementType::Float32,
        len,
        reference.dot_product_f32(af, bf) as f64,
        t.dot_product_f32(af, bf) as f64,
    )?;
    c.close("dot_product", ElementType::Float64, len, reference.dot_product_f64(ad, bd), t.dot_product_f64(ad, bd))?;

    c.close(
        "squared_euclidean_distance",
        ElementType::Int8,
        len,
        reference.squared_euclidean_distance_i8(a8, b8),
        t.squared_euclidean_distance_i8(a8, b8),
    )?;
    c.close(
        "squared_euclidean_distance",
        ElementType::BFloat16,
        len,
        reference.squared_euclidean_distance_bf16(ah, bh),
        t.squared_euclidean_distance_bf16(ah, bh),
    )?;
    c.close(
        "squared_euclidean_distance",
        ElementType::Float32,
        len,
        reference.squared_euclidean_distance_f32(af, bf),
        t.squared_euclidean_distance_f32(af, bf),
    )?;
    c.close(
        "squared_euclidean_distance",
        ElementType::Float64,
        len,
        reference.squared_euclidean_distance_f64(ad, bd),
        t.squared_euclidean_distance_f64(ad, bd),
    )?;

    c.exact(
        "population_count",
        ElementType::PackedBits,
        len,
        reference.population_count(words) as i64,
        t.population_count(words) as i64,
    )
}

fn check_bits(c: &mut Checker<'_>, reference: &dyn Accelerated, dest: &[u8], src: &[u8], len: usize) -> Result<()> {
    type BitOp = fn(&dyn Accelerated, &mut [u8], &[u8]);
    let ops: [(&'static str, BitOp); 3] = [
        ("and_bit", |acc, d, s| acc.and_bit(d, s)),
        ("or_bit", |acc, d, s| acc.or_bit(d, s)),
        ("and_not_bit", |acc, d, s| acc.and_not_bit(d, s)),
    ];
    for (name, op) in ops {
        let (mut expected, mut actual) = (dest.to_vec(), dest.to_vec());
        op(reference, &mut expected, src);
        op(c.target, &mut actual, src);
        c.bytes(name, len, &expected, &actual)?;
    }

    let (mut expected, mut actual) = (dest.to_vec(), dest.to_vec());
    reference.not_bit(&mut expected);
    c.target.not_bit(&mut actual);
    c.bytes("not_bit", len, &expected, &actual)
}

fn check_chunks(c: &mut Checker<'_>, reference: &dyn Accelerated, a: &[u8], b: &[u8]) -> Result<()> {
    let n = a.len().min(b.len());
    if n < CHUNK_BYTES {
        return Ok(());
    }
    let offsets = [0, 1, 64, 333, n - CHUNK_BYTES];
    for offset in offsets.into_iter().filter(|&o| o + CHUNK_BYTES <= n) {
        for mask in 0u8..8 {
            let sources: [BitSource<'_>; 3] = [(a, mask & 1 != 0), (b, mask & 2 != 0), (&a[1..], mask & 4 != 0)];
            for count in 0..=sources.len() {
                // The shifted source is one byte shorter.
                if count == 3 && offset + CHUNK_BYTES > n - 1 {
                    continue;
                }
                let sources = &sources[..count];
                let (mut expected, mut actual) = ([0u8; CHUNK_BYTES], [0u8; CHUNK_BYTES]);
                reference.and128(offset, sources, &mut expected);
                c.target.and128(offset, sources, &mut actual);
                c.bytes("and128", CHUNK_BYTES, &expected, &actual)?;
                reference.or128(offset, sources, &mut expected);
                c.target.or128(offset, sources, &mut actual);
                c.bytes("or128", CHUNK_BYTES, &expected, &actual)?;
            }
        }
    }
    Ok(())
}

fn check_bf16_conversion(c: &mut Checker<'_>, reference: &dyn Accelerated) -> Result<()> {
    let src: Vec<bf16> = (0..=u16::MAX).map(bf16::from_bits).collect();
    let mut expected = vec![0.0f32; src.len()];
    let mut actual = vec![0.0f32; src.len()];
    reference.convert_bfloat16_to_float(&src, &mut expected);
    c.target.convert_bfloat16_to_float(&src, &mut actual);
    c.checks += 1;
    match expected.iter().zip(&actual).position(|(e, a)| e.to_bits() != a.to_bits()) {
        Some(i) => Err(c.mismatch(
            "convert_bfloat16_to_float",
            ElementType::BFloat16,
            src.len(),
            expected[i] as f64,
            actual[i] as f64,
        )),
        None => Ok(()),
    }
}

/// Verify every target the running CPU supports against the generic baseline.
pub fn verify_supported_targets(config: &VerifyConfig) -> Result<Vec<VerifyReport>> {
    let reference = baseline_accelerator();
    let mut reports = Vec::new();
    for descriptor in supported_targets() {
        let Some(target) = descriptor.instantiate() else {
            continue;
        };
        reports.push(verify_target(target.as_ref(), reference.as_ref(), config)?);
    }
    info!(targets = reports.len(), "All supported targets match the reference");
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::generic::GenericAccelerator;

    fn small_config() -> VerifyConfig {
        VerifyConfig {
            lengths: vec![0, 1, 2, 17, 130, 300],
            ..VerifyConfig::default()
        }
    }

    /// Reference target with a deliberately wrong int8 dot product.
    struct OffByOne;

    impl Accelerated for OffByOne {
        fn dot_product_i8(&self, a: &[i8], b: &[i8]) -> i64 {
            crate::simd::generic::dot_product_i8(a, b) + 1
        }

        fn target_name(&self) -> &'static str {
            "OffByOne"
        }

        fn level(&self) -> SimdLevel {
            SimdLevel::Scalar
        }
    }

    /// Integer distance off by one: far below the float tolerance at large lengths.
    struct DistanceOffByOne;

    impl Accelerated for DistanceOffByOne {
        fn squared_euclidean_distance_i8(&self, a: &[i8], b: &[i8]) -> f64 {
            crate::simd::generic::squared_euclidean_distance_i8(a, b) + 1.0
        }

        fn target_name(&self) -> &'static str {
            "DistanceOffByOne"
        }

        fn level(&self) -> SimdLevel {
            SimdLevel::Scalar
        }
    }

    #[test]
    fn test_exact_types_ignore_tolerance() {
        let config = VerifyConfig {
            lengths: vec![4096],
            offsets: vec![0],
            ..VerifyConfig::default()
        };
        let err = verify_target(&DistanceOffByOne, &GenericAccelerator, &config).unwrap_err();
        match err {
            Error::Mismatch { op, element, expected, actual, .. } => {
                assert_eq!(op, "squared_euclidean_distance");
                assert_eq!(element, ElementType::Int8);
                assert!((actual - expected).abs() / expected < config.tolerance);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_generic_matches_itself() {
        let report = verify_target(&GenericAccelerator, &GenericAccelerator, &small_config()).unwrap();
        assert_eq!(report.target, "Generic");
        assert_eq!(report.max_relative_error, 0.0);
        assert!(report.checks > 0);
    }

    #[test]
    fn test_mismatch_detected() {
        let err = verify_target(&OffByOne, &GenericAccelerator, &small_config()).unwrap_err();
        match err {
            Error::Mismatch { target, op, element, len, expected, actual } => {
                assert_eq!(target, "OffByOne");
                assert_eq!(op, "dot_product");
                assert_eq!(element, ElementType::Int8);
                assert_eq!(len, 0);
                assert_eq!(actual, expected + 1.0);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_supported_targets_match_reference() {
        let reports = verify_supported_targets(&VerifyConfig::default()).unwrap();
        assert!(reports.iter().any(|r| r.level == SimdLevel::Scalar));
        for report in &reports {
            println!("{}", report.to_json().unwrap());
            assert!(report.max_relative_error <= 1e-4);
        }
    }

    #[test]
    fn test_default_lengths_cover_boundaries() {
        let lengths = default_lengths();
        assert!(lengths.contains(&0));
        assert!(lengths.contains(&(2 * 32 + 1)));
        assert!(lengths.contains(&257));
        assert!(lengths.iter().any(|&l| l > 1 << 16));
    }
}
