use serde::{Deserialize, Serialize};

use crate::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Mini-batch k-means parameters.
pub struct KMeansParams {
    /// Batch size is `batch_factor * k`, capped at the number of descriptors.
    pub batch_factor: usize,
    /// Number of passes over the pooled descriptors, counted in batches.
    pub max_iter: usize,
    /// Stop after this many consecutive batches without improvement of the
    /// smoothed inertia.
    pub max_no_improvement: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            batch_factor: 10,
            max_iter: 100,
            max_no_improvement: 10,
            seed: 0,
        }
    }
}

impl KMeansParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// EM parameters for fitting a diagonal Gaussian mixture.
pub struct GmmParams {
    pub max_iter: usize,
    /// Convergence threshold on the change of the mean per-descriptor
    /// log-likelihood.
    pub tol: f64,
    /// Added to every variance after each M step.
    pub reg_covar: f64,
    /// Used for the k-means initialization.
    pub seed: u64,
}

impl Default for GmmParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
        }
    }
}

impl GmmParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    /// Hard assignment histogram over a k-means codebook.
    Bovw,
    /// Fisher vector over a diagonal Gaussian mixture.
    Fisher,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Everything needed to build a [`Vocabulary`] and encode with it.
///
/// ```
/// let conf = fvbow::EncoderConfig::from_json(r#"{ "kind": "fisher", "k": 8 }"#).unwrap();
/// assert_eq!(conf.kind, fvbow::EncodingKind::Fisher);
/// assert_eq!(conf.gamma, 0.5);
/// ```
pub struct EncoderConfig {
    pub kind: EncodingKind,
    /// Codebook size or number of mixture components.
    pub k: usize,
    /// Power normalization exponent, Fisher vectors only.
    pub gamma: f32,
    pub kmeans: KMeansParams,
    pub gmm: GmmParams,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::bovw(100)
    }
}

impl EncoderConfig {
    pub fn bovw(k: usize) -> Self {
        Self {
            kind: EncodingKind::Bovw,
            k,
            gamma: 1.,
            kmeans: KMeansParams::default(),
            gmm: GmmParams::default(),
        }
    }

    pub fn fisher(k: usize, gamma: f32) -> Self {
        Self {
            kind: EncodingKind::Fisher,
            k,
            gamma,
            kmeans: KMeansParams::default(),
            gmm: GmmParams::default(),
        }
    }

    /// Parse a config from JSON. Missing fields take their defaults, except
    /// that a Fisher config without `gamma` gets `0.5` (signed square root).
    pub fn from_json(s: &str) -> VocabResult<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        let mut conf: Self = serde_json::from_value(value.clone())?;
        if conf.kind == EncodingKind::Fisher && value.get("gamma").is_none() {
            conf.gamma = 0.5;
        }
        Ok(conf)
    }

    /// Use the same seed for k-means and the mixture initialization.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.kmeans.seed = seed;
        self.gmm.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let conf = EncoderConfig::from_json("{}").unwrap();
        assert_eq!(conf, EncoderConfig::default());
        assert_eq!(conf.kmeans.batch_factor, 10);
    }

    #[test]
    fn nested_params_are_partially_overridable() {
        let conf = EncoderConfig::from_json(
            r#"{ "kind": "bovw", "k": 16, "kmeans": { "seed": 7 }, "gmm": { "tol": 0.01 } }"#,
        )
        .unwrap();
        assert_eq!(conf.k, 16);
        assert_eq!(conf.kmeans.seed, 7);
        assert_eq!(conf.kmeans.max_iter, 100);
        assert_eq!(conf.gmm.tol, 0.01);
    }

    #[test]
    fn fisher_keeps_explicit_gamma() {
        let conf = EncoderConfig::from_json(r#"{ "kind": "fisher", "gamma": 1.0 }"#).unwrap();
        assert_eq!(conf.gamma, 1.0);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            EncoderConfig::from_json("{ k: }"),
            Err(VocabErr::Config(_))
        ));
    }
}
