use std::time::Instant;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::descriptor::pool;
use crate::fisher::floor_variance;
use crate::kmeans::{assign, minibatch_kmeans};
use crate::*;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// Gaussian mixture with diagonal covariances, the soft-assignment
/// vocabulary behind Fisher vectors.
///
/// Weights are positive and sum to one; means and variances are `K x D`.
pub struct MixtureModel {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl MixtureModel {
    /// Assemble a mixture from its parameters, validating shapes and values.
    ///
    /// Variances below [`VARIANCE_FLOOR`](crate::fisher::VARIANCE_FLOOR) are
    /// accepted and floored when used; negative or NaN variances are not.
    pub fn new(
        weights: Array1<f64>,
        means: Array2<f64>,
        variances: Array2<f64>,
    ) -> VocabResult<Self> {
        let k = weights.len();
        if k == 0 {
            return Err(VocabErr::InvalidParameter(
                "mixture needs at least one component".into(),
            ));
        }
        if means.nrows() != k || means.dim() != variances.dim() {
            return Err(VocabErr::InvalidParameter(format!(
                "mixture shapes disagree: {} weights, means {:?}, variances {:?}",
                k,
                means.dim(),
                variances.dim()
            )));
        }
        if weights.iter().any(|&w| !(w > 0. && w.is_finite())) {
            return Err(VocabErr::InvalidParameter(
                "mixture weights must be positive".into(),
            ));
        }
        if (weights.sum() - 1.).abs() > 1e-6 {
            return Err(VocabErr::InvalidParameter(format!(
                "mixture weights sum to {}",
                weights.sum()
            )));
        }
        if means.iter().any(|m| !m.is_finite()) {
            return Err(VocabErr::InvalidParameter(
                "mixture means must be finite".into(),
            ));
        }
        for ((c, d), &v) in variances.indexed_iter() {
            floor_variance(v, c, d)?;
        }
        Ok(Self {
            weights,
            means,
            variances,
        })
    }

    /// Fit a `k` component mixture to the pooled descriptors of `records`
    /// with expectation-maximization.
    ///
    /// Responsibilities start from a hard k-means assignment. Fails with
    /// [`VocabErr::Convergence`] when the mean log-likelihood has not settled
    /// within `params.max_iter` iterations.
    pub fn fit(records: &[DescriptorRecord], k: usize, params: &GmmParams) -> VocabResult<Self> {
        let pooled = pool(records)?;
        let n = pooled.nrows();
        let start = Instant::now();

        let kmeans = KMeansParams::default().with_seed(params.seed);
        let centroids = minibatch_kmeans(pooled.view(), k, &kmeans)?;
        let mut resp = Array2::<f64>::zeros((n, k));
        for (i, w) in assign(pooled.view(), centroids.view()).into_iter().enumerate() {
            resp[[i, w]] = 1.;
        }

        let x = pooled.mapv(f64::from);
        let mut model = Self::m_step(x.view(), &resp, params.reg_covar);
        let mut lower_bound = f64::NEG_INFINITY;
        let mut change = f64::INFINITY;

        for iter in 1..=params.max_iter {
            let prev = lower_bound;
            let (r, lb) = model.e_step(x.view())?;
            if !lb.is_finite() {
                return Err(VocabErr::Convergence {
                    iterations: iter,
                    change: lb,
                });
            }
            resp = r;
            lower_bound = lb;
            model = Self::m_step(x.view(), &resp, params.reg_covar);

            change = lower_bound - prev;
            debug!("EM iteration {}: log-likelihood {:.6}, change {:.6}", iter, lower_bound, change);
            if change.abs() < params.tol {
                info!(
                    "GMM training with {} descriptors, k = {} converged after {} iterations in {:.3} seconds",
                    n,
                    k,
                    iter,
                    start.elapsed().as_secs_f64()
                );
                return Ok(model);
            }
        }

        Err(VocabErr::Convergence {
            iterations: params.max_iter,
            change,
        })
    }

    /// [`fit`](Self::fit) with default EM parameters.
    pub fn fit_default(records: &[DescriptorRecord], k: usize) -> VocabResult<Self> {
        Self::fit(records, k, &GmmParams::default())
    }

    /// Number of components.
    pub fn k(&self) -> usize {
        self.weights.len()
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn means(&self) -> ArrayView2<'_, f64> {
        self.means.view()
    }

    pub fn variances(&self) -> ArrayView2<'_, f64> {
        self.variances.view()
    }

    /// Posterior probability of every component for every descriptor,
    /// `N x K`, rows summing to one.
    pub fn posteriors(&self, descriptors: ArrayView2<f32>) -> VocabResult<Array2<f64>> {
        self.check(descriptors)?;
        Ok(self.e_step(descriptors.mapv(f64::from).view())?.0)
    }

    /// Mean per-descriptor log-likelihood of `descriptors` under the mixture.
    pub fn log_likelihood(&self, descriptors: ArrayView2<f32>) -> VocabResult<f64> {
        self.check(descriptors)?;
        Ok(self.e_step(descriptors.mapv(f64::from).view())?.1)
    }

    /// Fisher vector of `descriptors`, see [`encode_fisher`].
    pub fn encode(&self, descriptors: ArrayView2<f32>, gamma: f32) -> VocabResult<Feature> {
        encode_fisher(descriptors, self, gamma)
    }

    /// Variances with every entry floored, checked for corruption.
    pub fn floored_variances(&self) -> VocabResult<Array2<f64>> {
        let mut out = self.variances.clone();
        for ((c, d), v) in out.indexed_iter_mut() {
            *v = floor_variance(*v, c, d)?;
        }
        Ok(out)
    }

    /// Load a mixture from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> VocabResult<Self> {
        load_bincode(file)
    }

    /// Save mixture to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> VocabResult<()> {
        save_bincode(self, file)
    }

    pub(crate) fn check(&self, descriptors: ArrayView2<f32>) -> VocabResult<()> {
        if descriptors.ncols() != self.dim() {
            return Err(VocabErr::DimensionMismatch {
                expected: self.dim(),
                found: descriptors.ncols(),
            });
        }
        if descriptors.nrows() == 0 {
            return Err(VocabErr::EmptyInput);
        }
        Ok(())
    }

    /// Responsibilities and mean log-likelihood of the rows of `x`.
    fn e_step(&self, x: ArrayView2<f64>) -> VocabResult<(Array2<f64>, f64)> {
        let k = self.k();
        let variances = self.floored_variances()?;
        let precisions = variances.mapv(|v| 1. / v);
        let log_norm: Vec<f64> = variances
            .rows()
            .into_iter()
            .zip(self.weights.iter())
            .map(|(var, &w)| {
                w.ln() - 0.5 * (self.dim() as f64 * LN_2PI + var.iter().map(|v| v.ln()).sum::<f64>())
            })
            .collect();

        let mut resp = Array2::zeros((x.nrows(), k));
        let mut total = 0.;
        let mut log_p: SmallVec<[f64; 16]> = SmallVec::with_capacity(k);
        for (row, mut r) in x.rows().into_iter().zip(resp.rows_mut()) {
            log_p.clear();
            for c in 0..k {
                let mahalanobis = row
                    .iter()
                    .zip(self.means.row(c))
                    .zip(precisions.row(c))
                    .fold(0., |acc, ((&v, &m), &p)| acc + (v - m) * (v - m) * p);
                log_p.push(log_norm[c] - 0.5 * mahalanobis);
            }
            let max = log_p.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let lse = max + log_p.iter().map(|lp| (lp - max).exp()).sum::<f64>().ln();
            for (dst, lp) in r.iter_mut().zip(log_p.iter()) {
                *dst = (lp - lse).exp();
            }
            total += lse;
        }
        Ok((resp, total / x.nrows().max(1) as f64))
    }

    fn m_step(x: ArrayView2<f64>, resp: &Array2<f64>, reg_covar: f64) -> Self {
        let nk = resp.sum_axis(Axis(0)) + 10. * f64::EPSILON;
        let nk_col = nk.view().insert_axis(Axis(1));

        let mut means = resp.t().dot(&x);
        means /= &nk_col;
        let mut avg_x2 = resp.t().dot(&x.mapv(|v| v * v));
        avg_x2 /= &nk_col;

        let mut variances = avg_x2 - &means.mapv(|m| m * m);
        variances.mapv_inplace(|v| (v + reg_covar).max(reg_covar));

        let weights = &nk / nk.sum();
        Self {
            weights,
            means,
            variances,
        }
    }
}
