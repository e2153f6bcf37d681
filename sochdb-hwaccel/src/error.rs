// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Error types for the hardware-accelerated kernels.
//!
//! The kernels themselves are infallible. Errors only come from configuration
//! parsing and from the verification harness.

use thiserror::Error;

use crate::types::ElementType;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown SIMD level '{0}' (expected scalar, generic, neon, avx2 or avx512)")]
    UnknownLevel(String),

    #[error(
        "{target}: {op} over {element} (len {len}) diverged from reference: expected {expected}, got {actual}"
    )]
    Mismatch {
        target: &'static str,
        op: &'static str,
        element: ElementType,
        len: usize,
        expected: f64,
        actual: f64,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message() {
        let err = Error::Mismatch {
            target: "AVX2",
            op: "dot_product",
            element: ElementType::Float32,
            len: 17,
            expected: 1.0,
            actual: 2.0,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("AVX2: dot_product over float32 (len 17)"));
        assert!(msg.contains("expected 1, got 2"));
    }
}
