use thiserror::Error;

/// Local descriptor records and the in-memory descriptor store.
pub mod descriptor;
pub use descriptor::{DescriptorRecord, DescriptorStore, Extractor};

/// Mini-batch k-means used to build hard-assignment codebooks.
pub mod kmeans;

/// Hard-assignment visual vocabulary and bag-of-visual-words encoding.
pub mod codebook;
pub use codebook::{encode_bovw, Codebook};

/// Diagonal-covariance Gaussian mixture fitted with EM.
pub mod mixture;
pub use mixture::MixtureModel;

/// Fisher vector encoding against a [`MixtureModel`].
pub mod fisher;
pub use fisher::encode_fisher;

/// Normalization shared by the encoders and descriptor post-processing.
pub mod normalize;

/// Parameters for vocabulary construction and encoding.
pub mod config;
pub use config::{EncoderConfig, EncodingKind, GmmParams, KMeansParams};

/// One vocabulary, one encoder: the facade used for whole corpus passes.
pub mod encoder;
pub use encoder::{EncodedSample, Encoder, Vocabulary};

/// Matrix of local descriptors, one row per interest point.
pub type Descriptors = ndarray::Array2<f32>;

/// Binary keypoint descriptor as produced by ORB or BRIEF.
pub type BinaryDesc = [u8; 32];

/// Encoded global feature of an image.
///
/// Length is `K` for bag-of-visual-words and `2 * K * D` for Fisher vectors.
/// Always unit L2 norm.
pub type Feature = Vec<f32>;

/// Similarity scores between encoded features.
pub trait FeatureTrait {
    /// L1 score, `1 - 0.5 * sum(|a - b|)`. (Galvez, Eq 2).
    fn l1(&self, other: &Self) -> f32;
    /// L2 score, `1 - 0.5 * ||a - b||`. In `[0, 1]` for unit vectors.
    fn l2(&self, other: &Self) -> f32;
    fn dot(&self, other: &Self) -> f32;
}

impl FeatureTrait for Feature {
    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }

    fn l2(&self, other: &Self) -> f32 {
        let sq = self
            .iter()
            .zip(other)
            .fold(0., |a, (b, c)| a + (b - c) * (b - c));
        1. - 0.5 * sq.sqrt()
    }

    fn dot(&self, other: &Self) -> f32 {
        self.iter().zip(other).map(|(a, b)| a * b).sum()
    }
}

pub type VocabResult<T> = std::result::Result<T, VocabErr>;

#[derive(Error, Debug)]
pub enum VocabErr {
    #[error("Descriptor dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Insufficient data: {available} descriptors for {requested} clusters")]
    InsufficientData { available: usize, requested: usize },
    #[error("Mixture fitting did not converge after {iterations} iterations (last change {change})")]
    Convergence { iterations: usize, change: f64 },
    #[error("Empty descriptor set")]
    EmptyInput,
    #[error("Degenerate variance {value} in component {component}, dimension {dim}")]
    DegenerateVariance {
        component: usize,
        dim: usize,
        value: f64,
    },
    #[error("Cannot normalize a vector with zero or non-finite norm")]
    ZeroNorm,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Config Error")]
    Config(#[from] serde_json::Error),
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Vocabulary Serialization Error")]
    Bincode(#[from] bincode::Error),
}

/// Load a bincode-serialized value from a file.
#[cfg(feature = "bincode")]
pub(crate) fn load_bincode<T, P>(file: P) -> VocabResult<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<std::path::Path>,
{
    let mut file = std::fs::File::open(file)?;
    let mut buffer: Vec<u8> = Vec::new();
    std::io::Read::read_to_end(&mut file, &mut buffer)?;
    Ok(bincode::deserialize(&buffer)?)
}

/// Save a value to a file with bincode.
#[cfg(feature = "bincode")]
pub(crate) fn save_bincode<T, P>(value: &T, file: P) -> VocabResult<()>
where
    T: serde::Serialize,
    P: AsRef<std::path::Path>,
{
    let serialized = bincode::serialize(value)?;
    let mut file = std::fs::File::create(file)?;
    std::io::Write::write_all(&mut file, &serialized)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn l1_score_of_identical_features_is_one() {
        let a: Feature = vec![0.5, 0.25, 0.25];
        assert_relative_eq!(a.l1(&a), 1.0);
    }

    #[test]
    fn l2_score_of_opposite_unit_features_is_zero() {
        let a: Feature = vec![1.0, 0.0];
        let b: Feature = vec![-1.0, 0.0];
        assert_relative_eq!(a.l2(&b), 0.0);
        assert_relative_eq!(a.l2(&a), 1.0);
        assert_relative_eq!(a.dot(&b), -1.0);
    }
}
