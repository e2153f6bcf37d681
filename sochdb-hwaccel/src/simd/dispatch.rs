// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Runtime CPU detection and accelerator selection
//!
//! CPU features are probed once and cached. The first call to
//! [`accelerator`] (or an explicit [`init`]) walks the target registry in
//! descending preference and binds the first target that the CPU supports and
//! the [`AccelConfig`] allows. The binding is process-wide and never changes.
//!
//! ```text
//! Uninitialized ──accelerator()/init()──▶ Probing ──▶ Resolved(&'static dyn Accelerated)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use sochdb_hwaccel::simd::dispatch::{accelerator, simd_level, SimdLevel};
//!
//! let accel = accelerator();
//! assert!(accel.level() <= simd_level());
//! println!("Using {}", accel.target_name());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::generic::GenericAccelerator;
use super::Accelerated;
use crate::config::{AccelConfig, MAX_LEVEL_ENV};
use crate::error::Error;

/// CPU feature flags detected at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuFeatures {
    /// SSE 4.1 support (x86)
    pub has_sse4_1: bool,
    /// AVX2 support (x86)
    pub has_avx2: bool,
    /// Fused multiply-add (x86)
    pub has_fma: bool,
    /// BZHI and friends (x86), used for AVX-512 tail masks
    pub has_bmi2: bool,
    /// AVX-512F support (x86)
    pub has_avx512f: bool,
    /// AVX-512BW support (x86)
    pub has_avx512bw: bool,
    /// AVX-512 VPOPCNTDQ support (x86)
    pub has_avx512vpopcntdq: bool,
    /// NEON support (ARM, mandatory on aarch64)
    pub has_neon: bool,
    /// Dot product instruction support (ARM v8.2+)
    pub has_dotprod: bool,
}

impl CpuFeatures {
    /// Detect CPU features at runtime.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self::detect_x86()
        }

        #[cfg(target_arch = "aarch64")]
        {
            Self::detect_arm()
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Self::default()
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_x86() -> Self {
        Self {
            has_sse4_1: is_x86_feature_detected!("sse4.1"),
            has_avx2: is_x86_feature_detected!("avx2"),
            has_fma: is_x86_feature_detected!("fma"),
            has_bmi2: is_x86_feature_detected!("bmi2"),
            has_avx512f: is_x86_feature_detected!("avx512f"),
            has_avx512bw: is_x86_feature_detected!("avx512bw"),
            has_avx512vpopcntdq: is_x86_feature_detected!("avx512vpopcntdq"),
            ..Self::default()
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn detect_arm() -> Self {
        Self {
            has_neon: std::arch::is_aarch64_feature_detected!("neon"),
            has_dotprod: std::arch::is_aarch64_feature_detected!("dotprod"),
            ..Self::default()
        }
    }

    /// AVX2 target requirements.
    pub fn supports_avx2(&self) -> bool {
        self.has_avx2 && self.has_fma
    }

    /// AVX-512 target requirements (VPOPCNTDQ for popcount, BMI2 for tail masks).
    pub fn supports_avx512_popcnt(&self) -> bool {
        self.supports_avx2()
            && self.has_avx512f
            && self.has_avx512bw
            && self.has_avx512vpopcntdq
            && self.has_bmi2
    }

    pub fn supports_neon(&self) -> bool {
        self.has_neon
    }

    /// Get the best SIMD level available.
    pub fn best_level(&self) -> SimdLevel {
        if self.supports_avx512_popcnt() {
            SimdLevel::Avx512
        } else if self.supports_avx2() {
            SimdLevel::Avx2
        } else if self.supports_neon() {
            SimdLevel::Neon
        } else {
            SimdLevel::Scalar
        }
    }
}

/// SIMD capability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SimdLevel {
    /// No SIMD, scalar operations only
    Scalar = 0,
    /// NEON (128-bit, ARM)
    Neon = 1,
    /// AVX2 + FMA (256-bit, x86)
    Avx2 = 2,
    /// AVX-512 with VPOPCNTDQ (512-bit, x86)
    Avx512 = 3,
}

impl SimdLevel {
    /// Elements per SIMD register for u8 operations.
    pub const fn u8_width(self) -> usize {
        self.width_bits() / 8
    }

    /// Elements per SIMD register for u64 operations.
    pub const fn u64_width(self) -> usize {
        self.width_bits() / 64
    }

    /// Elements per SIMD register for f32 operations.
    pub const fn f32_width(self) -> usize {
        match self {
            SimdLevel::Scalar => 1,
            _ => self.width_bits() / 32,
        }
    }

    /// Register width in bits.
    pub const fn width_bits(self) -> usize {
        match self {
            SimdLevel::Scalar => 64,
            SimdLevel::Neon => 128,
            SimdLevel::Avx2 => 256,
            SimdLevel::Avx512 => 512,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            SimdLevel::Scalar => "Scalar",
            SimdLevel::Neon => "NEON",
            SimdLevel::Avx2 => "AVX2",
            SimdLevel::Avx512 => "AVX-512",
        }
    }

    /// Whether this level can exist on the compilation target.
    pub const fn is_native(self) -> bool {
        match self {
            SimdLevel::Scalar => true,
            SimdLevel::Neon => cfg!(target_arch = "aarch64"),
            SimdLevel::Avx2 | SimdLevel::Avx512 => cfg!(target_arch = "x86_64"),
        }
    }
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SimdLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" | "generic" => Ok(SimdLevel::Scalar),
            "neon" => Ok(SimdLevel::Neon),
            "avx2" => Ok(SimdLevel::Avx2),
            "avx512" | "avx-512" => Ok(SimdLevel::Avx512),
            _ => Err(Error::UnknownLevel(s.to_string())),
        }
    }
}

// ============================================================================
// Target registry
// ============================================================================

/// One selectable target: a CPU predicate plus a constructor.
pub struct TargetDescriptor {
    pub level: SimdLevel,
    pub name: &'static str,
    pub is_supported: fn(&CpuFeatures) -> bool,
    /// Returns `None` when the running CPU lacks the target's features.
    pub create: fn() -> Option<Box<dyn Accelerated>>,
}

impl TargetDescriptor {
    /// Instantiate the target if the running CPU supports it.
    pub fn instantiate(&self) -> Option<Box<dyn Accelerated>> {
        if (self.is_supported)(cpu_features()) {
            (self.create)()
        } else {
            None
        }
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("level", &self.level)
            .field("name", &self.name)
            .finish()
    }
}

fn always(_: &CpuFeatures) -> bool {
    true
}

fn create_generic() -> Option<Box<dyn Accelerated>> {
    Some(Box::new(GenericAccelerator))
}

/// All targets compiled in, most preferred first. Generic is always last.
static TARGETS: &[TargetDescriptor] = &[
    #[cfg(target_arch = "x86_64")]
    TargetDescriptor {
        level: SimdLevel::Avx512,
        name: super::avx512::Avx512Accelerator::TARGET_NAME,
        is_supported: CpuFeatures::supports_avx512_popcnt,
        create: super::avx512::Avx512Accelerator::create,
    },
    #[cfg(target_arch = "x86_64")]
    TargetDescriptor {
        level: SimdLevel::Avx2,
        name: super::avx2::Avx2Accelerator::TARGET_NAME,
        is_supported: CpuFeatures::supports_avx2,
        create: super::avx2::Avx2Accelerator::create,
    },
    #[cfg(target_arch = "aarch64")]
    TargetDescriptor {
        level: SimdLevel::Neon,
        name: super::neon::NeonAccelerator::TARGET_NAME,
        is_supported: CpuFeatures::supports_neon,
        create: super::neon::NeonAccelerator::create,
    },
    TargetDescriptor {
        level: SimdLevel::Scalar,
        name: GenericAccelerator::TARGET_NAME,
        is_supported: always,
        create: create_generic,
    },
];

/// Every compiled-in target, supported or not.
pub fn all_targets() -> &'static [TargetDescriptor] {
    TARGETS
}

/// Targets the running CPU supports, most preferred first.
pub fn supported_targets() -> Vec<&'static TargetDescriptor> {
    let features = cpu_features();
    TARGETS.iter().filter(|t| (t.is_supported)(features)).collect()
}

/// Pick the first target allowed by `config` and supported by `features`.
pub fn select_target(features: &CpuFeatures, config: &AccelConfig) -> Box<dyn Accelerated> {
    for target in TARGETS {
        if !config.allows(target.level) {
            debug!(name = target.name, level = %target.level, "Skipping target above max_level");
            continue;
        }
        if !(target.is_supported)(features) {
            debug!(name = target.name, "Skipping target unsupported by this CPU");
            continue;
        }
        if let Some(accel) = (target.create)() {
            return accel;
        }
    }
    Box::new(GenericAccelerator)
}

// ============================================================================
// Process-wide state
// ============================================================================

/// Global CPU features, detected once at first use.
static CPU_FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

struct Resolved {
    config: AccelConfig,
    accel: Box<dyn Accelerated>,
}

static RESOLVED: OnceLock<Resolved> = OnceLock::new();

/// Get detected CPU features (cached).
#[inline]
pub fn cpu_features() -> &'static CpuFeatures {
    CPU_FEATURES.get_or_init(CpuFeatures::detect)
}

/// Get best available SIMD level.
#[inline]
pub fn simd_level() -> SimdLevel {
    cpu_features().best_level()
}

/// The process-wide accelerator, resolved on first use from the environment.
#[inline]
pub fn accelerator() -> &'static dyn Accelerated {
    if let Some(resolved) = RESOLVED.get() {
        return resolved.accel.as_ref();
    }
    let config = AccelConfig::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring invalid {}", MAX_LEVEL_ENV);
        AccelConfig::default()
    });
    init(&config)
}

/// Resolve the process-wide accelerator with an explicit config.
///
/// Only the first resolution takes effect; later configs are ignored.
pub fn init(config: &AccelConfig) -> &'static dyn Accelerated {
    let resolved = RESOLVED.get_or_init(|| {
        let accel = select_target(cpu_features(), config);
        info!(
            target_name = accel.target_name(),
            level = %accel.level(),
            detected = %simd_level(),
            "Resolved hardware accelerator"
        );
        Resolved {
            config: config.clone(),
            accel,
        }
    });
    if resolved.config != *config {
        debug!(
            requested = ?config,
            active = ?resolved.config,
            "Accelerator already resolved, ignoring config"
        );
    }
    resolved.accel.as_ref()
}

/// Whether the process-wide accelerator has been bound.
pub fn is_resolved() -> bool {
    RESOLVED.get().is_some()
}

/// A fresh generic target, the baseline for comparisons.
pub fn baseline_accelerator() -> Box<dyn Accelerated> {
    Box::new(GenericAccelerator)
}

/// Get a human-readable description of SIMD capabilities.
pub fn dispatch_info() -> String {
    let features = cpu_features();
    let level = features.best_level();

    let mut info = format!(
        "SIMD Level: {} ({}-bit)\n",
        level.name(),
        level.width_bits()
    );

    #[cfg(target_arch = "x86_64")]
    {
        info.push_str(&format!("  SSE4.1: {}\n", features.has_sse4_1));
        info.push_str(&format!("  AVX2: {}\n", features.has_avx2));
        info.push_str(&format!("  FMA: {}\n", features.has_fma));
        info.push_str(&format!("  BMI2: {}\n", features.has_bmi2));
        info.push_str(&format!("  AVX-512F: {}\n", features.has_avx512f));
        info.push_str(&format!("  AVX-512BW: {}\n", features.has_avx512bw));
        info.push_str(&format!("  AVX-512 VPOPCNTDQ: {}\n", features.has_avx512vpopcntdq));
    }

    #[cfg(target_arch = "aarch64")]
    {
        info.push_str(&format!("  NEON: {}\n", features.has_neon));
        info.push_str(&format!("  DOTPROD: {}\n", features.has_dotprod));
    }

    let names: Vec<&str> = supported_targets().iter().map(|t| t.name).collect();
    info.push_str(&format!("Supported targets: {}\n", names.join(", ")));

    match RESOLVED.get() {
        Some(resolved) => info.push_str(&format!("Active target: {}\n", resolved.accel.target_name())),
        None => info.push_str("Active target: <unresolved>\n"),
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_detection() {
        let features = cpu_features();
        let level = features.best_level();

        println!("Detected SIMD level: {:?}", level);
        println!("Features: {:?}", features);

        assert!(level >= SimdLevel::Scalar);
        assert!(level.is_native());
    }

    #[test]
    fn test_simd_widths() {
        assert_eq!(SimdLevel::Scalar.u8_width(), 8);
        assert_eq!(SimdLevel::Avx2.u8_width(), 32);
        assert_eq!(SimdLevel::Neon.u8_width(), 16);
        assert_eq!(SimdLevel::Avx512.u8_width(), 64);
        assert_eq!(SimdLevel::Scalar.f32_width(), 1);
        assert_eq!(SimdLevel::Avx512.f32_width(), 16);
        assert_eq!(SimdLevel::Avx2.u64_width(), 4);
    }

    #[test]
    fn test_level_ordering() {
        assert!(SimdLevel::Scalar < SimdLevel::Neon);
        assert!(SimdLevel::Neon < SimdLevel::Avx2);
        assert!(SimdLevel::Avx2 < SimdLevel::Avx512);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("generic".parse::<SimdLevel>().unwrap(), SimdLevel::Scalar);
        assert_eq!(" AVX512 ".parse::<SimdLevel>().unwrap(), SimdLevel::Avx512);
        assert_eq!("Neon".parse::<SimdLevel>().unwrap(), SimdLevel::Neon);
        assert!(matches!("mmx".parse::<SimdLevel>(), Err(Error::UnknownLevel(_))));
    }

    #[test]
    fn test_registry_order() {
        let targets = all_targets();
        assert!(targets.windows(2).all(|w| w[0].level > w[1].level));
        let last = targets.last().unwrap();
        assert_eq!(last.name, "Generic");
        assert!((last.is_supported)(&CpuFeatures::default()));
    }

    #[test]
    fn test_supported_targets() {
        let best = simd_level();
        let supported = supported_targets();
        assert_eq!(supported.last().unwrap().level, SimdLevel::Scalar);
        for target in supported {
            assert!(target.level <= best);
            let accel = target.instantiate().expect("supported target must instantiate");
            assert_eq!(accel.target_name(), target.name);
            assert_eq!(accel.level(), target.level);
        }
    }

    #[test]
    fn test_scalar_cap_forces_generic() {
        let accel = select_target(cpu_features(), &AccelConfig::with_max_level(SimdLevel::Scalar));
        assert_eq!(accel.target_name(), "Generic");
    }

    #[test]
    fn test_default_selects_best() {
        let features = cpu_features();
        let accel = select_target(features, &AccelConfig::default());
        assert_eq!(accel.level(), features.best_level());
    }

    #[test]
    fn test_no_features_selects_generic() {
        let accel = select_target(&CpuFeatures::default(), &AccelConfig::default());
        assert_eq!(accel.level(), SimdLevel::Scalar);
    }

    #[test]
    fn test_resolution_idempotent() {
        let first = accelerator();
        assert!(is_resolved());
        let second = init(&AccelConfig::with_max_level(SimdLevel::Scalar));
        let third = accelerator();
        assert!(std::ptr::addr_eq(first, second));
        assert!(std::ptr::addr_eq(first, third));
        assert!(first.level() <= simd_level());
    }

    #[test]
    fn test_baseline() {
        let baseline = baseline_accelerator();
        assert_eq!(baseline.target_name(), "Generic");
    }

    #[test]
    fn test_dispatch_info() {
        let info = dispatch_info();
        println!("{}", info);
        assert!(!info.is_empty());
        assert!(info.contains("Supported targets:"));
    }
}
