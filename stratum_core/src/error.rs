// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the rasterizer boundary.
//!
//! Only two failures cross the backend boundary as values; everything else
//! is either a transient not-ready-yet condition (empty view bounds, an
//! uninitialized context) that is silently retried on the next frame, or a
//! programming error (layer stack underflow, double release) that panics.

use thiserror::Error;

/// A failure reported by the rasterizer backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Framebuffer allocation failed because device memory is exhausted.
    ///
    /// Propagated to the caller of
    /// [`start_layer`](crate::renderer::PaintCtx::start_layer), which must
    /// fall back to drawing uncached into the parent target.
    #[error("GPU device memory exhausted")]
    OutOfDeviceMemory,

    /// Context or framebuffer creation failed at the native API level.
    ///
    /// Non-fatal: initialization is retried on the next paint attempt.
    #[error("rasterizer backend error: {0}")]
    Backend(String),
}

impl BackendError {
    /// Convenience constructor for [`BackendError::Backend`].
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
