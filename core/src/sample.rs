//! Numeric sample type shared by the generator and synchronizer.
//!
//! Both are generic over the real type `T` underlying `Complex<T>` samples so
//! that the same code runs in single or double precision.

use rustfft::num_complex::Complex;
use rustfft::num_traits::{Float, FloatConst};
use rustfft::FftNum;

/// Real scalar type of a complex baseband sample.
pub trait Real: FftNum + Float + FloatConst + Default {
    /// Convert an `f64` design constant into this type.
    fn lit(value: f64) -> Self;

    /// Widen to `f64` for statistics and logging.
    fn as_f64(self) -> f64;
}

impl Real for f32 {
    #[inline]
    fn lit(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    #[inline]
    fn lit(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

/// `e^{j·phase}`
#[inline]
pub fn cis<T: Real>(phase: T) -> Complex<T> {
    Complex::new(phase.cos(), phase.sin())
}

/// Wrap a phase into `(-π, π]`.
#[inline]
pub fn wrap_phase<T: Real>(phase: T) -> T {
    let two_pi = T::lit(2.0) * T::PI();
    let mut p = phase;
    if !p.is_finite() {
        return p;
    }
    while p > T::PI() {
        p = p - two_pi;
    }
    while p <= -T::PI() {
        p = p + two_pi;
    }
    p
}
