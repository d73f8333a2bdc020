use ndarray::ArrayView2;

use crate::normalize::{check_gamma, l2_normalize, power_normalize};
use crate::*;

/// Smallest variance used as a divisor. Mixture variances below it are
/// raised to it before encoding.
pub const VARIANCE_FLOOR: f64 = 1e-6;

/// Floor one variance entry at [`VARIANCE_FLOOR`].
///
/// Negative or non-finite values mean the mixture is corrupt and give
/// [`VocabErr::DegenerateVariance`].
pub fn floor_variance(value: f64, component: usize, dim: usize) -> VocabResult<f64> {
    if !value.is_finite() || value < 0. {
        return Err(VocabErr::DegenerateVariance {
            component,
            dim,
            value,
        });
    }
    Ok(value.max(VARIANCE_FLOOR))
}

/// Fisher vector of `descriptors` with respect to `mixture`.
///
/// For component `k` with weight `w`, mean `mu` and standard deviation `s`
/// (from the floored variance), and posteriors `q` of the `N` descriptors:
///
/// ```text
/// G_mu[k]    = 1 / (N * sqrt(w))     * sum_n q[n,k] * (x[n] - mu) / s
/// G_sigma[k] = 1 / (N * sqrt(2 * w)) * sum_n q[n,k] * ((x[n] - mu)^2 / s^2 - 1)
/// ```
///
/// Output is all `K` mean gradients followed by all `K` variance gradients,
/// `2 * K * D` values, then power normalized with `gamma` and l2 normalized.
pub fn encode_fisher(
    descriptors: ArrayView2<f32>,
    mixture: &MixtureModel,
    gamma: f32,
) -> VocabResult<Feature> {
    check_gamma(gamma)?;
    mixture.check(descriptors)?;
    let (n, k, d) = (descriptors.nrows(), mixture.k(), mixture.dim());

    let inv_sigma = mixture.floored_variances()?.mapv(|v| 1. / v.sqrt());
    let means = mixture.means();
    let posteriors = mixture.posteriors(descriptors)?;

    let mut grad = vec![0f64; 2 * k * d];
    let (g_mu, g_sigma) = grad.split_at_mut(k * d);
    for (x, q) in descriptors.rows().into_iter().zip(posteriors.rows()) {
        for c in 0..k {
            let qc = q[c];
            if qc == 0. {
                continue;
            }
            for j in 0..d {
                let z = (f64::from(x[j]) - means[[c, j]]) * inv_sigma[[c, j]];
                g_mu[c * d + j] += qc * z;
                g_sigma[c * d + j] += qc * (z * z - 1.);
            }
        }
    }

    for (c, &w) in mixture.weights().iter().enumerate() {
        let mu_scale = 1. / (n as f64 * w.sqrt());
        let sigma_scale = 1. / (n as f64 * (2. * w).sqrt());
        for j in 0..d {
            g_mu[c * d + j] *= mu_scale;
            g_sigma[c * d + j] *= sigma_scale;
        }
    }

    let mut fv: Feature = grad.into_iter().map(|g| g as f32).collect();
    power_normalize(&mut fv, gamma)?;
    l2_normalize(&mut fv)?;
    Ok(fv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::l2_norm;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn standard_normal() -> MixtureModel {
        MixtureModel::new(array![1.0], array![[0.0]], array![[1.0]]).unwrap()
    }

    #[test]
    fn single_gaussian_gradients() {
        let fv = encode_fisher(array![[2.0f32]].view(), &standard_normal(), 1.0).unwrap();
        // G_mu = 2, G_sigma = 3 / sqrt(2)
        let norm = 8.5f32.sqrt();
        assert_relative_eq!(fv[0], 2.0 / norm, epsilon = 1e-6);
        assert_relative_eq!(fv[1], 3.0 / 2f32.sqrt() / norm, epsilon = 1e-6);
    }

    #[test]
    fn gradients_that_cancel_are_not_normalized() {
        let res = encode_fisher(array![[1.0f32], [-1.0]].view(), &standard_normal(), 0.5);
        assert!(matches!(res, Err(VocabErr::ZeroNorm)));
    }

    #[test]
    fn mean_gradients_precede_variance_gradients() {
        let mixture = MixtureModel::new(
            array![0.5, 0.5],
            array![[-10.0], [10.0]],
            array![[1.0], [1.0]],
        )
        .unwrap();
        let fv = encode_fisher(array![[10.5f32]].view(), &mixture, 1.0).unwrap();
        assert_eq!(fv.len(), 4);
        assert!(fv[0].abs() < 1e-6);
        assert!(fv[1] > 0.);
        assert!(fv[2].abs() < 1e-6);
        assert!(fv[3] < 0.);
        // 0.5 / sqrt(0.5) against -0.75
        assert_relative_eq!(fv[1] / fv[3], -(0.5 / 0.5f32.sqrt()) / 0.75, epsilon = 1e-5);
    }

    #[test]
    fn length_norm_and_idempotence() {
        let mixture = MixtureModel::new(
            array![0.2, 0.3, 0.5],
            array![[0.0, 1.0], [2.0, -1.0], [-3.0, 0.5]],
            array![[1.0, 0.5], [2.0, 1.0], [0.3, 0.3]],
        )
        .unwrap();
        let desc = Array2::from_shape_fn((25, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f32 - 5.0);
        let a = encode_fisher(desc.view(), &mixture, 0.5).unwrap();
        let b = encode_fisher(desc.view(), &mixture, 0.5).unwrap();
        assert_eq!(a.len(), 2 * 3 * 2);
        assert_relative_eq!(l2_norm(&a), 1.0, epsilon = 1e-6);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_variance_is_floored() {
        let mixture = MixtureModel::new(array![1.0], array![[0.0, 0.0]], array![[0.0, 1.0]]).unwrap();
        let fv = encode_fisher(array![[0.5f32, 0.5]].view(), &mixture, 0.5).unwrap();
        assert!(fv.iter().all(|x| x.is_finite()));
        assert_relative_eq!(l2_norm(&fv), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn floor_variance_policy() {
        assert_eq!(floor_variance(0.0, 0, 0).unwrap(), VARIANCE_FLOOR);
        assert_eq!(floor_variance(1e-9, 0, 0).unwrap(), VARIANCE_FLOOR);
        assert_eq!(floor_variance(0.25, 0, 0).unwrap(), 0.25);
        assert!(matches!(
            floor_variance(-1e-3, 2, 5),
            Err(VocabErr::DegenerateVariance {
                component: 2,
                dim: 5,
                ..
            })
        ));
        assert!(floor_variance(f64::NAN, 0, 0).is_err());
    }

    #[test]
    fn rejects_empty_input_and_bad_gamma() {
        let empty = Array2::<f32>::zeros((0, 1));
        assert!(matches!(
            encode_fisher(empty.view(), &standard_normal(), 0.5),
            Err(VocabErr::EmptyInput)
        ));
        assert!(matches!(
            encode_fisher(array![[1.0f32]].view(), &standard_normal(), -1.0),
            Err(VocabErr::InvalidParameter(_))
        ));
    }
}
