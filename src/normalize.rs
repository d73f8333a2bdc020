use ndarray::ArrayViewMut2;

use crate::*;

/// Euclidean norm, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Scale `v` to unit L2 norm in place.
///
/// Fails with [`VocabErr::ZeroNorm`] if the norm is zero or not finite; `v` is
/// left untouched in that case.
pub fn l2_normalize(v: &mut [f32]) -> VocabResult<()> {
    let norm = l2_norm(v);
    if !(norm > 0. && norm.is_finite()) {
        return Err(VocabErr::ZeroNorm);
    }
    let inv = 1. / norm;
    for x in v.iter_mut() {
        *x = (f64::from(*x) * inv) as f32;
    }
    Ok(())
}

/// Signed power normalization, `sign(x) * |x|^gamma`, in place.
///
/// `gamma` must be finite and positive. `gamma == 1` leaves `v` unchanged.
pub fn power_normalize(v: &mut [f32], gamma: f32) -> VocabResult<()> {
    check_gamma(gamma)?;
    if gamma == 1. {
        return Ok(());
    }
    for x in v.iter_mut() {
        *x = x.signum() * x.abs().powf(gamma);
    }
    Ok(())
}

pub(crate) fn check_gamma(gamma: f32) -> VocabResult<()> {
    if gamma.is_finite() && gamma > 0. {
        Ok(())
    } else {
        Err(VocabErr::InvalidParameter(format!(
            "gamma must be finite and positive, got {}",
            gamma
        )))
    }
}

/// Divide a descriptor matrix by its largest entry, mapping non-negative
/// descriptors (e.g. byte-valued ORB/FREAK output) into `[0, 1]`.
///
/// An all-zero or non-finite matrix is rejected with [`VocabErr::ZeroNorm`]
/// rather than filled with NaN.
pub fn scale_by_max(mut descriptors: ArrayViewMut2<f32>) -> VocabResult<()> {
    if descriptors.is_empty() {
        return Err(VocabErr::EmptyInput);
    }
    let max = descriptors.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    if !(max > 0. && max.is_finite()) {
        return Err(VocabErr::ZeroNorm);
    }
    descriptors.mapv_inplace(|x| x / max);
    Ok(())
}
