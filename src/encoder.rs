use log::info;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::normalize::check_gamma;
use crate::*;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// A visual vocabulary of either kind.
pub enum Vocabulary {
    /// Hard assignment, bag-of-visual-words features of length `K`.
    Hard(Codebook),
    /// Soft assignment, Fisher vector features of length `2 * K * D`.
    Soft(MixtureModel),
}

impl Vocabulary {
    /// Build the vocabulary `conf.kind` asks for from the pooled descriptors
    /// of `records`.
    pub fn build(records: &[DescriptorRecord], conf: &EncoderConfig) -> VocabResult<Self> {
        Ok(match conf.kind {
            EncodingKind::Bovw => Vocabulary::Hard(Codebook::build(records, conf.k, &conf.kmeans)?),
            EncodingKind::Fisher => Vocabulary::Soft(MixtureModel::fit(records, conf.k, &conf.gmm)?),
        })
    }

    pub fn k(&self) -> usize {
        match self {
            Vocabulary::Hard(cb) => cb.k(),
            Vocabulary::Soft(gmm) => gmm.k(),
        }
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        match self {
            Vocabulary::Hard(cb) => cb.dim(),
            Vocabulary::Soft(gmm) => gmm.dim(),
        }
    }

    /// Length of the features this vocabulary produces.
    pub fn feature_len(&self) -> usize {
        match self {
            Vocabulary::Hard(cb) => cb.k(),
            Vocabulary::Soft(gmm) => 2 * gmm.k() * gmm.dim(),
        }
    }

    /// Encode `descriptors`. `gamma` only applies to Fisher vectors.
    pub fn encode(&self, descriptors: ArrayView2<f32>, gamma: f32) -> VocabResult<Feature> {
        match self {
            Vocabulary::Hard(cb) => cb.encode(descriptors),
            Vocabulary::Soft(gmm) => encode_fisher(descriptors, gmm, gamma),
        }
    }
}

/// Feature of one record, tagged with where it came from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub source_id: String,
    pub label: String,
    pub feature: Feature,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// A vocabulary together with its encoding parameters. Built once from the
/// training records, then used unchanged for every training and test image
/// so that all features live in the same space.
pub struct Encoder {
    vocabulary: Vocabulary,
    gamma: f32,
}

impl Encoder {
    pub fn new(vocabulary: Vocabulary, gamma: f32) -> VocabResult<Self> {
        check_gamma(gamma)?;
        Ok(Self { vocabulary, gamma })
    }

    /// Build the vocabulary from `records` according to `conf`.
    pub fn build(records: &[DescriptorRecord], conf: &EncoderConfig) -> VocabResult<Self> {
        check_gamma(conf.gamma)?;
        let vocabulary = Vocabulary::build(records, conf)?;
        info!(
            "Built {:?} vocabulary: k = {}, dim = {}, feature length {}",
            conf.kind,
            vocabulary.k(),
            vocabulary.dim(),
            vocabulary.feature_len()
        );
        Ok(Self {
            vocabulary,
            gamma: conf.gamma,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn feature_len(&self) -> usize {
        self.vocabulary.feature_len()
    }

    pub fn encode(&self, descriptors: ArrayView2<f32>) -> VocabResult<Feature> {
        self.vocabulary.encode(descriptors, self.gamma)
    }

    pub fn encode_record(&self, record: &DescriptorRecord) -> VocabResult<EncodedSample> {
        Ok(EncodedSample {
            source_id: record.source_id().to_string(),
            label: record.label().to_string(),
            feature: self.encode(record.descriptors())?,
        })
    }

    /// Encode every record of `store` in order, stopping at the first
    /// failure.
    pub fn encode_store(&self, store: &DescriptorStore) -> VocabResult<Vec<EncodedSample>> {
        let samples = store
            .records()
            .iter()
            .map(|r| self.encode_record(r))
            .collect::<VocabResult<Vec<_>>>()?;
        info!("Encoded {} images", samples.len());
        Ok(samples)
    }

    /// Load an encoder from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> VocabResult<Self> {
        load_bincode(file)
    }

    /// Save encoder to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> VocabResult<()> {
        save_bincode(self, file)
    }
}
