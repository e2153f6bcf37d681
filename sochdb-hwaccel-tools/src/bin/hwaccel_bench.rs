// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Kernel micro-benchmark
//!
//! Times squared Euclidean distance, dot product and popcount for the
//! generic baseline, the resolved accelerator and every target the CPU
//! supports.
//!
//! # Usage
//!
//! ```bash
//! # 1000 elements, 1,000,000 calls per kernel
//! hwaccel-bench
//!
//! # Verify every target first, print JSON
//! hwaccel-bench 768 200000 --verify --json
//!
//! # Cap the resolved target
//! hwaccel-bench --max-level avx2
//! ```

use std::hint::black_box;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use sochdb_hwaccel::simd::dispatch::{self, baseline_accelerator, supported_targets};
use sochdb_hwaccel::verify::{verify_supported_targets, VerifyConfig};
use sochdb_hwaccel::{bf16, init, AccelConfig, Accelerated, ElementType, SimdLevel};

/// Benchmark the hardware-accelerated kernels
#[derive(Parser, Debug)]
#[command(name = "hwaccel-bench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Elements per buffer
    #[arg(default_value = "1000")]
    length: usize,

    /// Calls per kernel
    #[arg(default_value = "1000000")]
    count: usize,

    /// Verify every supported target against the baseline first
    #[arg(long)]
    verify: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Highest SIMD level to resolve (scalar, neon, avx2, avx512)
    #[arg(long)]
    max_level: Option<SimdLevel>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Serialize)]
struct BenchResult {
    accelerator: &'static str,
    role: &'static str,
    op: &'static str,
    element: ElementType,
    length: usize,
    count: usize,
    total_ms: f64,
    ns_per_call: f64,
    gb_per_sec: f64,
    checksum: f64,
}

struct Buffers {
    f64s: (Vec<f64>, Vec<f64>),
    f32s: (Vec<f32>, Vec<f32>),
    bf16s: (Vec<bf16>, Vec<bf16>),
    i8s: (Vec<i8>, Vec<i8>),
    words: Vec<u64>,
}

impl Buffers {
    fn new(length: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(length as u64);
        let floats = |rng: &mut StdRng| -> Vec<f64> { (0..length).map(|_| rng.gen_range(0.0..500.0)).collect() };
        let (a, b) = (floats(&mut rng), floats(&mut rng));
        Self {
            f32s: (a.iter().map(|&x| x as f32).collect(), b.iter().map(|&x| x as f32).collect()),
            bf16s: (
                a.iter().map(|&x| bf16::from_f64(x)).collect(),
                b.iter().map(|&x| bf16::from_f64(x)).collect(),
            ),
            i8s: ((0..length).map(|_| rng.gen()).collect(), (0..length).map(|_| rng.gen()).collect()),
            words: (0..length).map(|_| rng.gen()).collect(),
            f64s: (a, b),
        }
    }
}

fn time<F: FnMut() -> f64>(count: usize, mut kernel: F) -> (f64, f64) {
    let mut checksum = 0.0;
    let start = Instant::now();
    for _ in 0..count {
        checksum += black_box(kernel());
    }
    (start.elapsed().as_secs_f64() * 1e3, checksum)
}

fn bench_accelerator(
    accel: &dyn Accelerated,
    role: &'static str,
    buffers: &Buffers,
    args: &Args,
) -> Vec<BenchResult> {
    let Buffers { f64s, f32s, bf16s, i8s, words } = buffers;
    let cases: [(&'static str, ElementType, Box<dyn FnMut() -> f64 + '_>); 9] = [
        ("squared_euclidean_distance", ElementType::Float64, Box::new(|| {
            accel.squared_euclidean_distance_f64(black_box(&f64s.0), black_box(&f64s.1))
        })),
        ("squared_euclidean_distance", ElementType::Float32, Box::new(|| {
            accel.squared_euclidean_distance_f32(black_box(&f32s.0), black_box(&f32s.1))
        })),
        ("squared_euclidean_distance", ElementType::BFloat16, Box::new(|| {
            accel.squared_euclidean_distance_bf16(black_box(&bf16s.0), black_box(&bf16s.1))
        })),
        ("squared_euclidean_distance", ElementType::Int8, Box::new(|| {
            accel.squared_euclidean_distance_i8(black_box(&i8s.0), black_box(&i8s.1))
        })),
        ("dot_product", ElementType::Float64, Box::new(|| {
            accel.dot_product_f64(black_box(&f64s.0), black_box(&f64s.1))
        })),
        ("dot_product", ElementType::Float32, Box::new(|| {
            accel.dot_product_f32(black_box(&f32s.0), black_box(&f32s.1)) as f64
        })),
        ("dot_product", ElementType::BFloat16, Box::new(|| {
            accel.dot_product_bf16(black_box(&bf16s.0), black_box(&bf16s.1)) as f64
        })),
        ("dot_product", ElementType::Int8, Box::new(|| {
            accel.dot_product_i8(black_box(&i8s.0), black_box(&i8s.1)) as f64
        })),
        ("population_count", ElementType::PackedBits, Box::new(|| {
            accel.population_count(black_box(words)) as f64
        })),
    ];

    cases
        .into_iter()
        .map(|(op, element, kernel)| {
            let (total_ms, checksum) = time(args.count, kernel);
            let inputs = if element == ElementType::PackedBits { 1 } else { 2 };
            let bytes = (inputs * args.length * element.size_bytes() * args.count) as f64;
            BenchResult {
                accelerator: accel.target_name(),
                role,
                op,
                element,
                length: args.length,
                count: args.count,
                total_ms,
                ns_per_call: total_ms * 1e6 / args.count.max(1) as f64,
                gb_per_sec: if total_ms > 0.0 { bytes / (total_ms * 1e6) } else { 0.0 },
                checksum,
            }
        })
        .collect()
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match args.max_level {
        Some(level) => AccelConfig::with_max_level(level),
        None => AccelConfig::from_env().unwrap_or_else(|e| {
            error!(error = %e, "Invalid environment override, using defaults");
            AccelConfig::default()
        }),
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid --max-level");
        return ExitCode::FAILURE;
    }
    let resolved = init(&config);

    info!("{}", dispatch::dispatch_info().trim_end());

    if args.verify {
        match verify_supported_targets(&VerifyConfig::default()) {
            Ok(reports) => {
                for report in reports {
                    info!(
                        target_name = %report.target,
                        checks = report.checks,
                        max_relative_error = report.max_relative_error,
                        "Verified"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Verification failed");
                return ExitCode::FAILURE;
            }
        }
    }

    let buffers = Buffers::new(args.length);
    let baseline = baseline_accelerator();

    let mut results = bench_accelerator(baseline.as_ref(), "baseline", &buffers, &args);
    results.extend(bench_accelerator(resolved, "resolved", &buffers, &args));
    for descriptor in supported_targets() {
        if descriptor.name == resolved.target_name() {
            continue;
        }
        if let Some(target) = descriptor.instantiate() {
            results.extend(bench_accelerator(target.as_ref(), "target", &buffers, &args));
        }
    }

    if args.json {
        match serde_json::to_string_pretty(&results) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!(error = %e, "Failed to serialize results");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!(
            "{:<14} {:<9} {:<28} {:<9} {:>12} {:>12} {:>8}",
            "target", "role", "op", "element", "total ms", "ns/call", "GB/s"
        );
        for r in &results {
            println!(
                "{:<14} {:<9} {:<28} {:<9} {:>12.3} {:>12.1} {:>8.2}",
                r.accelerator, r.role, r.op, r.element.name(), r.total_ms, r.ns_per_call, r.gb_per_sec
            );
        }
    }

    ExitCode::SUCCESS
}
