use std::fmt;
use std::time::Instant;

use log::info;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::descriptor::pool;
use crate::kmeans::{assign, minibatch_kmeans, nearest};
use crate::normalize::l2_normalize;
use crate::*;

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual vocabulary of `K` codewords for hard assignment. Can be:
/// 1. Built from the pooled descriptors of a training corpus.
/// 2. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
/// 3. Used to transform a descriptor set into its bag-of-visual-words feature.
///
/// Codeword order is the histogram bin order and never changes for a given
/// instance.
pub struct Codebook {
    centroids: Array2<f32>,
    cluster_size: Vec<usize>,
}

/// Codebook API
impl Codebook {
    /// Build a codebook of `k` words from the descriptors of `records`.
    pub fn build(
        records: &[DescriptorRecord],
        k: usize,
        params: &KMeansParams,
    ) -> VocabResult<Self> {
        let pooled = pool(records)?;
        let start = Instant::now();
        let centroids = minibatch_kmeans(pooled.view(), k, params)?;

        let mut cluster_size = vec![0; k];
        for w in assign(pooled.view(), centroids.view()) {
            cluster_size[w] += 1;
        }
        info!(
            "Codebook training took {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(Self {
            centroids,
            cluster_size,
        })
    }

    /// [`build`](Self::build) with default k-means parameters.
    pub fn build_default(records: &[DescriptorRecord], k: usize) -> VocabResult<Self> {
        Self::build(records, k, &KMeansParams::default())
    }

    /// Wrap existing centroids, one codeword per row.
    pub fn from_centroids(centroids: Array2<f32>) -> VocabResult<Self> {
        if centroids.nrows() == 0 {
            return Err(VocabErr::InvalidParameter(
                "codebook needs at least one centroid".into(),
            ));
        }
        let cluster_size = vec![0; centroids.nrows()];
        Ok(Self {
            centroids,
            cluster_size,
        })
    }

    /// Number of codewords.
    pub fn k(&self) -> usize {
        self.centroids.nrows()
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.centroids.ncols()
    }

    pub fn centroids(&self) -> ArrayView2<'_, f32> {
        self.centroids.view()
    }

    /// Transform a descriptor set into its bag-of-visual-words feature: the
    /// histogram of nearest-codeword counts, l2 normalized.
    pub fn encode(&self, descriptors: ArrayView2<f32>) -> VocabResult<Feature> {
        let mut bow: Feature = vec![0.; self.k()];
        for w in self.assign(descriptors)? {
            bow[w] += 1.;
        }
        l2_normalize(&mut bow)?;
        Ok(bow)
    }

    /// Word id of every descriptor, in row order.
    ///
    /// Ties between equidistant codewords go to the lowest word id.
    pub fn assign(&self, descriptors: ArrayView2<f32>) -> VocabResult<Vec<usize>> {
        self.check(descriptors)?;
        Ok(descriptors
            .rows()
            .into_iter()
            .map(|x| nearest(x, self.centroids.view()).0)
            .collect())
    }

    /// Load a codebook from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> VocabResult<Self> {
        load_bincode(file)
    }

    /// Save codebook to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> VocabResult<()> {
        save_bincode(self, file)
    }

    fn check(&self, descriptors: ArrayView2<f32>) -> VocabResult<()> {
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
}

/// Bag-of-visual-words feature of `descriptors` with respect to `codebook`.
pub fn encode_bovw(descriptors: ArrayView2<f32>, codebook: &Codebook) -> VocabResult<Feature> {
    codebook.encode(descriptors)
}

impl fmt::Debug for Codebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sum = self.cluster_size.iter().sum::<usize>();
        f.debug_struct("Codebook")
            .field("Words", &self.k())
            .field("Dimension", &self.dim())
            .field("Total Training Features", &sum)
            .field(
                "Min Word Cluster Size",
                &self.cluster_size.iter().min().copied().unwrap_or(0),
            )
            .field(
                "Max Word Cluster Size",
                &self.cluster_size.iter().max().copied().unwrap_or(0),
            )
            .field("Mean Word Cluster Size", &(sum / self.k().max(1)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::l2_norm;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn line_codebook() -> Codebook {
        Codebook::from_centroids(array![[0.0f32, 0.0], [1.0, 0.0], [5.0, 0.0]]).unwrap()
    }

    #[test]
    fn encode_counts_nearest_words() {
        let cb = line_codebook();
        let desc = array![[0.1f32, 0.0], [0.9, 0.1], [1.2, 0.0], [4.0, 0.0]];
        let bow = cb.encode(desc.view()).unwrap();
        // counts [1, 2, 1]
        let n = 6f32.sqrt();
        assert_relative_eq!(bow[0], 1. / n, epsilon = 1e-6);
        assert_relative_eq!(bow[1], 2. / n, epsilon = 1e-6);
        assert_relative_eq!(bow[2], 1. / n, epsilon = 1e-6);
        assert_relative_eq!(l2_norm(&bow), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn unhit_words_stay_zero() {
        let cb = line_codebook();
        let bow = cb.encode(array![[5.0f32, 1.0]].view()).unwrap();
        assert_eq!(bow, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn equidistant_descriptor_goes_to_lowest_word() {
        let cb = line_codebook();
        assert_eq!(cb.assign(array![[0.5f32, 0.0]].view()).unwrap(), vec![0]);
    }

    #[test]
    fn empty_descriptor_set_is_rejected() {
        let cb = line_codebook();
        let empty = Array2::<f32>::zeros((0, 2));
        assert!(matches!(cb.encode(empty.view()), Err(VocabErr::EmptyInput)));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let cb = line_codebook();
        assert!(matches!(
            cb.encode(array![[1.0f32, 2.0, 3.0]].view()),
            Err(VocabErr::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn build_checks_dimensions_before_clustering() {
        let records = vec![
            DescriptorRecord::new("a", "x", Array2::zeros((50, 4))),
            DescriptorRecord::new("b", "x", Array2::zeros((50, 5))),
        ];
        assert!(matches!(
            Codebook::build_default(&records, 2),
            Err(VocabErr::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn build_records_cluster_sizes() {
        let records = vec![
            DescriptorRecord::new("a", "x", Array2::from_elem((6, 2), 0.0)),
            DescriptorRecord::new("b", "y", Array2::from_elem((4, 2), 8.0)),
        ];
        let cb = Codebook::build_default(&records, 2).unwrap();
        assert_eq!(cb.k(), 2);
        let mut sizes = cb.cluster_size.clone();
        sizes.sort();
        assert_eq!(sizes, vec![4, 6]);
        assert!(format!("{:?}", cb).contains("Total Training Features: 10"));
    }
}
