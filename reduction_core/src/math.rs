//! Scalar helpers shared by the update kernels and the loss functions.

/// Largest exponent whose `exp` still fits in an `f32`.
const MAX_EXPONENT: f32 = 88.0;

/// Sign with `sign(0) == 0`.
#[inline]
pub fn sign(w: f32) -> f32 {
    if w > 0.0 {
        1.0
    } else if w < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `exp` with the exponent clamped so the result stays finite.
#[inline]
pub fn corrected_exp(exponent: f32) -> f32 {
    exponent.min(MAX_EXPONENT).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(3.5), 1.0);
        assert_eq!(sign(-1e-9), -1.0);
    }

    #[test]
    fn corrected_exp_never_overflows() {
        assert!(corrected_exp(1_000.0).is_finite());
        assert!((corrected_exp(0.0) - 1.0).abs() < 1e-7);
    }
}
